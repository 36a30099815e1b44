#![recursion_limit = "256"]

use anyhow::Context;
use burn::backend::NdArray;
use burn::config::Config;
use burn::prelude::{Backend, Tensor, TensorData};
use burn::tensor::activation::softmax;
use clap::Parser;
use coorlg::models::coorlg::checkpoint::load_checkpoint;
use coorlg::models::coorlg::coorlg_model::{CoorLGNet, CoorLGNetConfig, CoorLGNetMeta};
use coorlg::models::coorlg::prefabs::{CoorLGInputConfig, Interpolation};
use image::imageops::{self, FilterType};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Number of classes; overrides ``--config``.
    #[arg(long)]
    num_classes: Option<usize>,

    /// Model config json; defaults to the ``coorlgnet`` prefab.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Checkpoint path, without the recorder extension.
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Image to classify; a random input is used when absent.
    #[arg(long)]
    image: Option<PathBuf>,

    /// Number of classes to print.
    #[arg(long, default_value = "5")]
    top_k: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    type B = NdArray<f32>;
    let device = Default::default();

    let config = match &args.config {
        Some(path) => {
            let config = CoorLGNetConfig::load(path)
                .map_err(|err| anyhow::anyhow!("loading config {}: {err:?}", path.display()))?;
            match args.num_classes {
                Some(num_classes) => config.for_finetune(num_classes),
                None => config,
            }
        }
        None => CoorLGNetConfig::coorlgnet(args.num_classes.unwrap_or(2)),
    };

    let model: CoorLGNet<B> = config.init(&device);
    let model = match &args.checkpoint {
        Some(path) => load_checkpoint(model, path, &device)?,
        None => {
            tracing::warn!("no checkpoint given; using random weights");
            model
        }
    };

    let input_config = config.input_config();
    let x = match &args.image {
        Some(path) => load_image::<B>(path, &input_config, &device)?,
        None => {
            let [c, h, w] = input_config.input_size;
            Tensor::random([1, c, h, w], burn::tensor::Distribution::Default, &device)
        }
    };
    let x = input_config.normalize(x);

    let probs = softmax(model.forward(x), 1);
    let probs: Vec<f32> = probs
        .into_data()
        .to_vec()
        .map_err(|err| anyhow::anyhow!("reading output: {err:?}"))?;

    let mut ranked: Vec<(usize, f32)> = probs.into_iter().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    println!("top {} of {} classes:", args.top_k, model.num_classes());
    for (class, prob) in ranked.into_iter().take(args.top_k) {
        println!("  {class:>5}: {prob:.4}");
    }

    Ok(())
}

/// Load an image: resize the shorter side, center crop, scale to ``[0, 1]``.
///
/// Returns ``[1, 3, height, width]``.
fn load_image<B: Backend>(
    path: &Path,
    config: &CoorLGInputConfig,
    device: &B::Device,
) -> anyhow::Result<Tensor<B, 4>> {
    let img = image::open(path)
        .with_context(|| format!("opening image {}", path.display()))?
        .to_rgb8();

    let filter = match config.interpolation {
        Interpolation::Bilinear => FilterType::Triangle,
        Interpolation::Bicubic => FilterType::CatmullRom,
    };

    let resize = config.resize_size() as f64;
    let (w, h) = img.dimensions();
    let scale = resize / w.min(h) as f64;
    let (rw, rh) = (
        ((w as f64 * scale).round() as u32).max(1),
        ((h as f64 * scale).round() as u32).max(1),
    );
    let img = imageops::resize(&img, rw, rh, filter);

    let [ch, cw] = config.crop_size();
    let (ch, cw) = (ch as u32, cw as u32);
    anyhow::ensure!(
        rw >= cw && rh >= ch,
        "resized image {rw}x{rh} is smaller than the {cw}x{ch} crop"
    );
    let img = imageops::crop_imm(&img, (rw - cw) / 2, (rh - ch) / 2, cw, ch).to_image();

    let values: Vec<f32> = img.into_raw().into_iter().map(|v| v as f32 / 255.0).collect();
    let x = Tensor::<B, 3>::from_data(
        TensorData::new(values, [ch as usize, cw as usize, 3]),
        device,
    );

    Ok(x.permute([2, 0, 1]).unsqueeze::<4>())
}
