//! Scalar host counter.

use crate::counter::{
    transition_code, validate_labels, CountConfig, TileCount, TileCounter, SKIPPED_TRANSITION,
};
use crate::matrix::CountMatrix;
use crate::raster::LabelView;
use crate::util::ChangeMatrixResult;

/// Single-pass host counter: `counts[reference][current] += 1` per pixel.
#[derive(Clone, Debug)]
pub struct CpuCounter {
    cfg: CountConfig,
}

impl CpuCounter {
    pub fn new(cfg: CountConfig) -> ChangeMatrixResult<Self> {
        cfg.validate()?;
        Ok(Self { cfg })
    }
}

impl TileCounter for CpuCounter {
    fn config(&self) -> &CountConfig {
        &self.cfg
    }

    fn count(
        &self,
        reference: LabelView<'_>,
        current: LabelView<'_>,
    ) -> ChangeMatrixResult<TileCount> {
        validate_labels(reference, current, &self.cfg)?;

        let n = self.cfg.num_classes;
        let mut matrix = CountMatrix::zeros(n)?;
        let mut map = self
            .cfg
            .keep_transition_map
            .then(|| Vec::with_capacity(reference.len()));

        for (ref_row, cur_row) in reference.rows().zip(current.rows()) {
            for (&a, &b) in ref_row.iter().zip(cur_row) {
                // Only reachable with LabelPolicy::Skip after validation.
                if a as usize >= n || b as usize >= n {
                    if let Some(map) = map.as_mut() {
                        map.push(SKIPPED_TRANSITION);
                    }
                    continue;
                }
                matrix.increment(a, b);
                if let Some(map) = map.as_mut() {
                    map.push(transition_code(a, b, n));
                }
            }
        }

        Ok(TileCount {
            matrix,
            transition_map: map,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::CpuCounter;
    use crate::counter::{CountConfig, LabelPolicy, TileCounter, SKIPPED_TRANSITION};
    use crate::raster::LabelRaster;

    #[test]
    fn two_by_two_tile_counts_each_transition_once() {
        let reference = LabelRaster::from_rows(&[[0u8, 0], [1, 1]]).unwrap();
        let current = LabelRaster::from_rows(&[[0u8, 1], [1, 0]]).unwrap();
        let counter = CpuCounter::new(CountConfig::new(2)).unwrap();
        let out = counter.count(reference.view(), current.view()).unwrap();
        assert_eq!(out.matrix.to_rows(), vec![vec![1, 1], vec![1, 1]]);
        assert_eq!(out.matrix.total(), 4);
        assert!(out.transition_map.is_none());
    }

    #[test]
    fn skip_policy_drops_out_of_range_pixels() {
        let reference = LabelRaster::from_rows(&[[0u8, 9], [1, 1]]).unwrap();
        let current = LabelRaster::from_rows(&[[0u8, 1], [1, 0]]).unwrap();
        let counter = CpuCounter::new(CountConfig {
            num_classes: 2,
            policy: LabelPolicy::Skip,
            keep_transition_map: true,
        })
        .unwrap();
        let out = counter.count(reference.view(), current.view()).unwrap();
        assert_eq!(out.matrix.total(), 3);
        assert_eq!(
            out.transition_map,
            Some(vec![0, SKIPPED_TRANSITION, 3, 2])
        );
    }
}
