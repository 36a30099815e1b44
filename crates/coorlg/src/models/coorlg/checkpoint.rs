//! # Checkpoint I/O.
//!
//! Checkpoints are ``burn`` named message-pack records.
//!
//! Loading adapts a checkpoint taken at another image size: each stage's
//! ``relative_pos`` tensor is resized bilinearly to the target model's shape.
//! Every other learned tensor is resolution independent.
//!
//! A checkpoint with a different class count keeps the model's classifier,
//! so a backbone can be loaded for fine-tuning. Any other shape disagreement
//! fails the load.

use crate::models::coorlg::coorlg_model::{CoorLGNet, CoorLGNetRecord};
use anyhow::{Context, ensure};
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};
use std::path::PathBuf;

/// The checkpoint recorder.
pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Save a model checkpoint.
///
/// The recorder appends its file extension to ``path``.
pub fn save_checkpoint<B: Backend>(
    model: CoorLGNet<B>,
    path: impl Into<PathBuf>,
) -> anyhow::Result<()> {
    let path = path.into();
    model
        .save_file(path.clone(), &CheckpointRecorder::new())
        .with_context(|| format!("saving checkpoint {}", path.display()))?;

    tracing::info!(path = %path.display(), "saved checkpoint");
    Ok(())
}

/// Load a model checkpoint onto ``model``.
///
/// Stage positional tensors are resized to ``model``'s shapes.
pub fn load_checkpoint<B: Backend>(
    model: CoorLGNet<B>,
    path: impl Into<PathBuf>,
    device: &B::Device,
) -> anyhow::Result<CoorLGNet<B>> {
    let path = path.into();
    let record: CoorLGNetRecord<B> = CheckpointRecorder::new()
        .load(path.clone(), device)
        .with_context(|| format!("loading checkpoint {}", path.display()))?;

    let record = adapt_record(&model, record)?;

    tracing::info!(path = %path.display(), "loaded checkpoint");
    Ok(model.load_record(record))
}

/// Reconcile a checkpoint record with ``model``'s shapes.
///
/// * Stage ``relative_pos`` tensors are resized to the model's token grid.
/// * A classifier with a different class count is replaced by the model's own.
///
/// Stage and block counts, window bias tables, and the representation layer
/// must match; anything else is an error.
pub fn adapt_record<B: Backend>(
    model: &CoorLGNet<B>,
    mut record: CoorLGNetRecord<B>,
) -> anyhow::Result<CoorLGNetRecord<B>> {
    ensure!(
        record.stages.len() == model.stages.len(),
        "checkpoint has {} stages, model has {}",
        record.stages.len(),
        model.stages.len()
    );

    record.stages = record
        .stages
        .into_iter()
        .zip(&model.stages)
        .enumerate()
        .map(|(i, (mut stage_record, stage))| {
            ensure!(
                stage_record.blocks.len() == stage.blocks.len(),
                "stage {i} has {} blocks in the checkpoint, {} in the model",
                stage_record.blocks.len(),
                stage.blocks.len()
            );
            for (j, (block_record, block)) in
                stage_record.blocks.iter().zip(&stage.blocks).enumerate()
            {
                let source = block_record
                    .window_attn
                    .relative_position_bias_table
                    .val()
                    .dims();
                let target = block.window_attn.relative_position_bias_table.val().dims();
                ensure!(
                    source == target,
                    "stage {i} block {j} window bias table is {source:?}, model has {target:?}"
                );
            }

            let [heads, n, m] = stage.relative_pos.val().dims();
            let source = stage_record.relative_pos.val().dims();
            if source != [heads, n, m] {
                ensure!(
                    source[0] == heads,
                    "stage {i} relative_pos has {} heads, model has {heads}",
                    source[0]
                );
                tracing::info!(
                    stage = i,
                    ?source,
                    target = ?[heads, n, m],
                    "resizing relative_pos"
                );
                stage_record.relative_pos = stage_record
                    .relative_pos
                    .map(|pos| resize_relative_pos(pos, [n, m]));
            }
            Ok(stage_record)
        })
        .collect::<anyhow::Result<_>>()?;

    let source = record
        .head
        .pre_logits
        .as_ref()
        .map(|layer| layer.weight.val().dims());
    let target = model
        .head
        .pre_logits
        .as_ref()
        .map(|layer| layer.weight.val().dims());
    ensure!(
        source == target,
        "checkpoint representation layer is {source:?}, model has {target:?}"
    );

    let source = record
        .head
        .classifier
        .as_ref()
        .map(|layer| layer.weight.val().dims());
    let target = model
        .head
        .classifier
        .as_ref()
        .map(|layer| layer.weight.val().dims());
    if source != target {
        tracing::warn!(
            ?source,
            ?target,
            "checkpoint classifier does not match; keeping the model's classifier"
        );
        record.head.classifier = model.head.classifier.clone().map(|layer| layer.into_record());
    }

    Ok(record)
}

/// Bilinear resize of a ``[heads, n, m]`` positional tensor.
///
/// # Returns
///
/// ``[heads, size[0], size[1]]``
pub fn resize_relative_pos<B: Backend>(
    relative_pos: Tensor<B, 3>,
    size: [usize; 2],
) -> Tensor<B, 3> {
    if relative_pos.dims()[1..] == size {
        return relative_pos;
    }
    interpolate(
        relative_pos.unsqueeze::<4>(),
        size,
        InterpolateOptions::new(InterpolateMode::Bilinear),
    )
    .squeeze::<3>(0)
}

/// Resize a ``[1, prefix + g * g, d]`` position embedding to a new grid.
///
/// The leading ``num_prefix_tokens`` tokens are kept as-is; the rest are
/// treated as a square ``g x g`` grid and bilinearly resized.
///
/// # Returns
///
/// ``[1, prefix + grid[0] * grid[1], d]``
pub fn resize_pos_embed<B: Backend>(
    pos_embed: Tensor<B, 3>,
    num_prefix_tokens: usize,
    grid: [usize; 2],
) -> anyhow::Result<Tensor<B, 3>> {
    let [batch, total, d] = pos_embed.dims();
    ensure!(batch == 1, "expected a single position embedding, got {batch}");
    ensure!(
        total >= num_prefix_tokens,
        "position embedding has {total} tokens, fewer than {num_prefix_tokens} prefix tokens"
    );

    let grid_tokens = total - num_prefix_tokens;
    let old = (grid_tokens as f64).sqrt().round() as usize;
    ensure!(
        old * old == grid_tokens,
        "position embedding grid of {grid_tokens} tokens is not square"
    );

    let [gh, gw] = grid;
    tracing::info!(from = ?[old, old], to = ?grid, "resizing position embedding");

    let tokens = pos_embed
        .clone()
        .narrow(1, num_prefix_tokens, grid_tokens)
        .reshape([1, old, old, d])
        .permute([0, 3, 1, 2]);
    let tokens = interpolate(
        tokens,
        [gh, gw],
        InterpolateOptions::new(InterpolateMode::Bilinear),
    )
    .permute([0, 2, 3, 1])
    .reshape([1, gh * gw, d]);

    Ok(match num_prefix_tokens {
        0 => tokens,
        _ => Tensor::cat(vec![pos_embed.narrow(1, 0, num_prefix_tokens), tokens], 1),
    })
}

/// Reshape a flattened ``[out, in * kh * kw]`` patch projection weight
/// to the conv layout ``[out, in, kh, kw]``.
pub fn remap_legacy_patch_weight<B: Backend>(
    weight: Tensor<B, 2>,
    in_channels: usize,
    kernel_size: [usize; 2],
) -> anyhow::Result<Tensor<B, 4>> {
    let [out, flat] = weight.dims();
    let [kh, kw] = kernel_size;
    ensure!(
        flat == in_channels * kh * kw,
        "patch weight has {flat} inputs, expected {in_channels}*{kh}*{kw}"
    );
    Ok(weight.reshape([out, in_channels, kh, kw]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::coorlg::coorlg_model::{CoorLGNetConfig, CoorLGNetMeta};
    use crate::models::coorlg::coorlg_model::tests::tiny_config;
    use burn::backend::NdArray;
    use burn::prelude::Int;
    use burn::tensor::{Distribution, Tolerance};

    type B = NdArray<f32>;

    #[test]
    fn test_round_trip() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coorlg");

        let config: CoorLGNetConfig = tiny_config();
        let model: CoorLGNet<B> = config.init(&device);
        let x = Tensor::<B, 4>::random([1, 3, 32, 32], Distribution::Default, &device);
        let expected = model.forward(x.clone());

        save_checkpoint(model, &path).unwrap();

        let fresh: CoorLGNet<B> = config.init(&device);
        let loaded = load_checkpoint(fresh, &path, &device).unwrap();

        loaded
            .forward(x)
            .to_data()
            .assert_approx_eq(&expected.to_data(), Tolerance::<f64>::default());
    }

    #[test]
    fn test_load_resizes_relative_pos() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coorlg");

        let small: CoorLGNet<B> = tiny_config().init(&device);
        save_checkpoint(small, &path).unwrap();

        let large: CoorLGNet<B> = tiny_config().with_img_size(64).init(&device);
        let shapes: Vec<_> = large
            .stages
            .iter()
            .map(|s| s.relative_pos.val().dims())
            .collect();

        let loaded = load_checkpoint(large, &path, &device).unwrap();
        assert_eq!(loaded.img_size, 64);
        for (stage, shape) in loaded.stages.iter().zip(shapes) {
            assert_eq!(stage.relative_pos.val().dims(), shape);
        }

        let x = Tensor::<B, 4>::random([1, 3, 64, 64], Distribution::Default, &device);
        assert_eq!(loaded.forward(x).dims(), [1, 2]);
    }

    #[test]
    fn test_load_keeps_model_classifier() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coorlg");

        let source: CoorLGNet<B> = tiny_config().with_num_classes(2).init(&device);
        let x = Tensor::<B, 4>::random([1, 3, 32, 32], Distribution::Default, &device);
        let features = source.forward_features(x.clone());
        save_checkpoint(source, &path).unwrap();

        let target: CoorLGNet<B> = tiny_config().with_num_classes(10).init(&device);
        let loaded = load_checkpoint(target, &path, &device).unwrap();

        assert_eq!(loaded.num_classes(), 10);
        assert_eq!(loaded.forward(x.clone()).dims(), [1, 10]);
        loaded
            .forward_features(x)
            .to_data()
            .assert_approx_eq(&features.to_data(), Tolerance::<f64>::default());
    }

    #[test]
    fn test_load_rejects_depth_mismatch() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coorlg");

        let source: CoorLGNet<B> = tiny_config().with_depths([1, 1, 2, 1]).init(&device);
        save_checkpoint(source, &path).unwrap();

        let target: CoorLGNet<B> = tiny_config().with_depths([1, 1, 1, 1]).init(&device);
        let err = load_checkpoint(target, &path, &device).unwrap_err();
        assert!(format!("{err:#}").contains("blocks"), "{err:#}");
    }

    #[test]
    fn test_load_rejects_window_mismatch() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coorlg");

        let source: CoorLGNet<B> = tiny_config().with_window_size(2).init(&device);
        save_checkpoint(source, &path).unwrap();

        let target: CoorLGNet<B> = tiny_config().with_window_size(4).init(&device);
        let err = load_checkpoint(target, &path, &device).unwrap_err();
        assert!(format!("{err:#}").contains("window bias table"), "{err:#}");
    }

    #[test]
    fn test_load_missing() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();

        let model: CoorLGNet<B> = tiny_config().init(&device);
        assert!(load_checkpoint(model, dir.path().join("missing"), &device).is_err());
    }

    #[test]
    fn test_resize_relative_pos() {
        let device = Default::default();

        let pos = Tensor::<B, 3>::ones([2, 4, 2], &device);
        let resized = resize_relative_pos(pos, [16, 4]);
        resized.to_data().assert_approx_eq(
            &Tensor::<B, 3>::ones([2, 16, 4], &device).to_data(),
            Tolerance::<f64>::default(),
        );

        let pos = Tensor::<B, 3>::random([1, 3, 3], Distribution::Default, &device);
        resize_relative_pos(pos.clone(), [3, 3])
            .to_data()
            .assert_eq(&pos.to_data(), true);
    }

    #[test]
    fn test_resize_pos_embed() {
        let device = Default::default();

        let cls = Tensor::<B, 3>::full([1, 1, 4], -1.0, &device);
        let grid = Tensor::<B, 3>::full([1, 9, 4], 2.0, &device);
        let pos_embed = Tensor::cat(vec![cls.clone(), grid], 1);

        let resized = resize_pos_embed(pos_embed, 1, [5, 5]).unwrap();
        assert_eq!(resized.dims(), [1, 26, 4]);

        resized
            .clone()
            .narrow(1, 0, 1)
            .to_data()
            .assert_eq(&cls.to_data(), true);
        resized
            .narrow(1, 1, 25)
            .to_data()
            .assert_approx_eq(
                &Tensor::<B, 3>::full([1, 25, 4], 2.0, &device).to_data(),
                Tolerance::<f64>::default(),
            );

        let bad = Tensor::<B, 3>::zeros([1, 8, 4], &device);
        assert!(resize_pos_embed(bad, 0, [2, 2]).is_err());
    }

    #[test]
    fn test_remap_legacy_patch_weight() {
        let device = Default::default();

        let weight = Tensor::<B, 1, Int>::arange(0..48, &device)
            .float()
            .reshape([4, 12]);
        let remapped = remap_legacy_patch_weight(weight.clone(), 3, [2, 2]).unwrap();
        assert_eq!(remapped.dims(), [4, 3, 2, 2]);
        remapped
            .reshape([4, 12])
            .to_data()
            .assert_eq(&weight.to_data(), true);

        assert!(remap_legacy_patch_weight(weight, 2, [2, 2]).is_err());
    }
}
