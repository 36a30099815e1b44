//! # Drop Path Rate schedules.

/// ``n`` evenly spaced values from ``start`` to ``end``, inclusive.
#[must_use]
pub fn float_vec_linspace(
    start: f64,
    end: f64,
    n: usize,
) -> Vec<f64> {
    match n {
        0 => vec![],
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// A progressive drop path rate, over all blocks of all stages.
///
/// # Arguments
///
/// * `drop_path_rate`: The final drop path rate.
/// * `depth`: The total number of blocks.
///
/// # Returns
///
/// ``depth`` rates, from 0.0 to ``drop_path_rate``.
#[inline(always)]
#[must_use]
pub fn progressive_dpr(
    drop_path_rate: f64,
    depth: usize,
) -> Vec<f64> {
    float_vec_linspace(0.0, drop_path_rate, depth)
}

/// Table of progressive drop path rates, sliced per stage.
#[derive(Debug, Clone)]
pub struct DropPathRateDepthTable {
    progressive_dpr: Vec<f64>,
    stage_depths: Vec<usize>,
}

impl DropPathRateDepthTable {
    /// Build a table.
    ///
    /// # Arguments
    ///
    /// * `drop_path_rate`: The final drop path rate.
    /// * `stage_depths`: The number of blocks in each stage.
    #[must_use]
    pub fn new(
        drop_path_rate: f64,
        stage_depths: &[usize],
    ) -> Self {
        let stage_depths = stage_depths.to_vec();
        let progressive_dpr = progressive_dpr(drop_path_rate, stage_depths.iter().sum());
        Self {
            progressive_dpr,
            stage_depths,
        }
    }

    /// The number of stages.
    #[must_use]
    pub fn num_stages(&self) -> usize {
        self.stage_depths.len()
    }

    /// The drop path rates for the blocks of one stage.
    ///
    /// # Panics
    ///
    /// If the stage index is out of bounds.
    #[must_use]
    pub fn stage_dprs(
        &self,
        stage: usize,
    ) -> Vec<f64> {
        assert!(
            stage < self.num_stages(),
            "Stage index {} out of bounds for {} stages",
            stage,
            self.num_stages()
        );
        let start = self.stage_depths[..stage].iter().sum::<usize>();
        let end = start + self.stage_depths[stage];

        self.progressive_dpr[start..end].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::assert_close_to_vec;
    use hamcrest::prelude::*;

    #[test]
    fn test_linspace() {
        assert!(float_vec_linspace(0.0, 1.0, 0).is_empty());
        assert_close_to_vec(&float_vec_linspace(0.3, 1.0, 1), &[0.3], 1e-9);
        assert_close_to_vec(
            &float_vec_linspace(0.0, 1.0, 5),
            &[0.0, 0.25, 0.5, 0.75, 1.0],
            1e-9,
        );
    }

    #[test]
    fn test_progressive_dpr() {
        let rates = progressive_dpr(0.1, 9);
        assert_close_to_vec(
            &rates,
            &[0.0, 0.0125, 0.025, 0.0375, 0.05, 0.0625, 0.075, 0.0875, 0.1],
            0.001,
        );
    }

    #[test]
    fn test_table() {
        let depths = vec![2, 3, 4];
        let table = DropPathRateDepthTable::new(0.1, &depths);

        assert_eq!(table.num_stages(), 3);

        let rates: Vec<Vec<f64>> = (0..3).map(|i| table.stage_dprs(i)).collect();
        assert_that!(
            &rates.iter().map(Vec::len).collect::<Vec<_>>(),
            contains(depths).exactly()
        );
        assert_close_to_vec(&rates[0], &[0.0, 0.0125], 0.001);
        assert_close_to_vec(&rates[1], &[0.025, 0.0375, 0.05], 0.001);
        assert_close_to_vec(&rates[2], &[0.0625, 0.075, 0.0875, 0.1], 0.001);
    }

    #[test]
    fn test_zero_rate() {
        let table = DropPathRateDepthTable::new(0.0, &[2, 2, 10, 2]);
        assert!((0..4).flat_map(|i| table.stage_dprs(i)).all(|r| r == 0.0));
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_bad_stage() {
        let _ = DropPathRateDepthTable::new(0.1, &[1, 2]).stage_dprs(2);
    }
}
