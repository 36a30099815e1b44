//! # Window partitioning
//!
//! Splits ``(B, H, W, C)`` maps into non-overlapping square tiles
//! and merges them back. Neither direction pads; see [`window_padding`].

use bimm_contracts::unpack_shape_contract;
use burn::prelude::{Backend, Tensor};
use burn::tensor::BasicOps;

/// The right/bottom padding needed to tile a resolution.
///
/// # Arguments
///
/// - `resolution`: ``[height, width]``.
/// - `window_size`: the tile size.
///
/// # Returns
///
/// ``[pad_bottom, pad_right]``
#[must_use]
pub fn window_padding(
    resolution: [usize; 2],
    window_size: usize,
) -> [usize; 2] {
    let [h, w] = resolution;
    [
        (window_size - h % window_size) % window_size,
        (window_size - w % window_size) % window_size,
    ]
}

/// Window Partition.
///
/// Windows are ordered row-major over the window grid.
///
/// # Arguments
///
/// - `tensor`: ``[batch, h_wins * window_size, w_wins * window_size, channels]``.
/// - `window_size`: the tile size.
///
/// # Returns
///
/// ``[batch * h_wins * w_wins, window_size, window_size, channels]``
#[inline]
#[must_use]
pub fn window_partition<B: Backend, K>(
    tensor: Tensor<B, 4, K>,
    window_size: usize,
) -> Tensor<B, 4, K>
where
    K: BasicOps<B>,
{
    let [b, h_wins, w_wins, c] = unpack_shape_contract!(
        [
            "batch",
            "height" = "h_wins" * "window_size",
            "width" = "w_wins" * "window_size",
            "channels"
        ],
        &tensor,
        &["batch", "h_wins", "w_wins", "channels"],
        &[("window_size", window_size)]
    );

    tensor
        .reshape([b, h_wins, window_size, w_wins, window_size, c])
        .swap_dims(2, 3)
        .reshape([b * h_wins * w_wins, window_size, window_size, c])
}

/// Window Reverse; the inverse of [`window_partition`].
///
/// # Arguments
///
/// - `windows`: ``[batch * h_wins * w_wins, window_size, window_size, channels]``.
/// - `window_size`: the tile size.
/// - `h`: ``h_wins * window_size``.
/// - `w`: ``w_wins * window_size``.
///
/// # Returns
///
/// ``[batch, h, w, channels]``
#[inline]
#[must_use]
pub fn window_reverse<B: Backend, K>(
    windows: Tensor<B, 4, K>,
    window_size: usize,
    h: usize,
    w: usize,
) -> Tensor<B, 4, K>
where
    K: BasicOps<B>,
{
    assert!(
        h % window_size == 0 && w % window_size == 0,
        "Resolution ({h}*{w}) is not a multiple of window size {window_size}"
    );
    let h_wins = h / window_size;
    let w_wins = w / window_size;

    let [b, c] = unpack_shape_contract!(
        [
            "num_windows" = "batch" * "h_wins" * "w_wins",
            "window_size",
            "window_size",
            "channels"
        ],
        &windows,
        &["batch", "channels"],
        &[
            ("h_wins", h_wins),
            ("w_wins", w_wins),
            ("window_size", window_size)
        ]
    );

    windows
        .reshape([b, h_wins, w_wins, window_size, window_size, c])
        .swap_dims(2, 3)
        .reshape([b, h, w, c])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::prelude::Int;
    use burn::tensor::Distribution;

    #[test]
    fn test_window_padding() {
        assert_eq!(window_padding([56, 56], 7), [0, 0]);
        assert_eq!(window_padding([14, 10], 7), [0, 4]);
        assert_eq!(window_padding([3, 8], 7), [4, 6]);
    }

    #[test]
    fn test_round_trip() {
        let device = Default::default();

        let b = 3;
        let window_size = 4;
        let channels = 3;

        let h_wins = 2;
        let w_wins = 3;
        let h = h_wins * window_size;
        let w = w_wins * window_size;

        let input =
            Tensor::<NdArray, 4>::random([b, h, w, channels], Distribution::Default, &device);

        let windows = window_partition(input.clone(), window_size);
        assert_eq!(
            windows.dims(),
            [b * h_wins * w_wins, window_size, window_size, channels]
        );

        let reverse = window_reverse(windows, window_size, h, w);
        reverse.to_data().assert_eq(&input.to_data(), true);
    }

    #[test]
    fn test_window_ordering() {
        let device = Default::default();

        // 4x4 map of cell ids, tiled by 2.
        let input = Tensor::<NdArray, 1, Int>::arange(0..16, &device).reshape([1, 4, 4, 1]);
        let windows = window_partition(input, 2);

        windows.reshape([4, 4]).to_data().assert_eq(
            &Tensor::<NdArray, 2, Int>::from_data(
                [[0, 1, 4, 5], [2, 3, 6, 7], [8, 9, 12, 13], [10, 11, 14, 15]],
                &device,
            )
            .to_data(),
            true,
        );
    }

    #[test]
    #[should_panic]
    fn test_partition_not_divisible() {
        let device = Default::default();
        let input = Tensor::<NdArray, 4>::zeros([1, 5, 4, 2], &device);
        let _ = window_partition(input, 2);
    }
}
