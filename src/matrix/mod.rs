//! Class-pair count matrices.
//!
//! `CountMatrix` is a dense `C x C` grid addressed as
//! `[reference_class][current_class]`. It is the per-tile partial result and
//! the snapshot type returned by the shared [`ChangeMatrix`] accumulator.

mod accumulator;

pub use accumulator::{ChangeMatrix, MergeOutcome};

use crate::raster::Label;
use crate::util::{ChangeMatrixError, ChangeMatrixResult};

/// Largest supported class count; labels are stored as `u8`.
pub const MAX_CLASSES: usize = Label::MAX as usize + 1;

/// Checks that a class count is usable with `u8` labels.
pub fn validate_num_classes(num_classes: usize) -> ChangeMatrixResult<()> {
    if num_classes == 0 || num_classes > MAX_CLASSES {
        return Err(ChangeMatrixError::config(format!(
            "class count {num_classes} outside 1..={MAX_CLASSES}"
        )));
    }
    Ok(())
}

/// Dense `C x C` matrix of transition counts.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CountMatrix {
    num_classes: usize,
    counts: Vec<u64>,
}

impl CountMatrix {
    /// Creates a zeroed matrix.
    pub fn zeros(num_classes: usize) -> ChangeMatrixResult<Self> {
        validate_num_classes(num_classes)?;
        Ok(Self {
            num_classes,
            counts: vec![0; num_classes * num_classes],
        })
    }

    /// Wraps row-major counts; `counts.len()` must be `num_classes^2`.
    pub fn from_counts(num_classes: usize, counts: Vec<u64>) -> ChangeMatrixResult<Self> {
        validate_num_classes(num_classes)?;
        if counts.len() != num_classes * num_classes {
            return Err(ChangeMatrixError::config(format!(
                "{} counts do not form a {num_classes}x{num_classes} matrix",
                counts.len()
            )));
        }
        Ok(Self {
            num_classes,
            counts,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Count of pixels that moved from `from` in the reference to `to`.
    pub fn get(&self, from: usize, to: usize) -> Option<u64> {
        if from >= self.num_classes || to >= self.num_classes {
            return None;
        }
        Some(self.counts[from * self.num_classes + to])
    }

    /// Row of counts for reference class `from`.
    pub fn row(&self, from: usize) -> Option<&[u64]> {
        if from >= self.num_classes {
            return None;
        }
        let start = from * self.num_classes;
        Some(&self.counts[start..start + self.num_classes])
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.counts
    }

    /// Sum of all cells.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Sum of the diagonal (pixels whose class did not change).
    pub fn unchanged(&self) -> u64 {
        (0..self.num_classes)
            .map(|c| self.counts[c * self.num_classes + c])
            .sum()
    }

    /// Sum of the off-diagonal cells.
    pub fn changed(&self) -> u64 {
        self.total() - self.unchanged()
    }

    /// Non-zero cells as `(from, to, count)` in row-major order.
    pub fn transitions(&self) -> impl Iterator<Item = (usize, usize, u64)> + '_ {
        let n = self.num_classes;
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, &count)| count != 0)
            .map(move |(idx, &count)| (idx / n, idx % n, count))
    }

    /// Rows as nested vectors, mostly for assertions and display.
    pub fn to_rows(&self) -> Vec<Vec<u64>> {
        self.counts
            .chunks(self.num_classes)
            .map(<[u64]>::to_vec)
            .collect()
    }

    #[inline]
    pub(crate) fn increment(&mut self, from: Label, to: Label) {
        self.counts[from as usize * self.num_classes + to as usize] += 1;
    }

    /// Adds `other` element-wise; both matrices must have the same class count.
    pub fn add_assign(&mut self, other: &CountMatrix) -> ChangeMatrixResult<()> {
        if other.num_classes != self.num_classes {
            return Err(ChangeMatrixError::config(format!(
                "cannot add a {0}x{0} matrix into a {1}x{1} matrix",
                other.num_classes, self.num_classes
            )));
        }
        for (dst, src) in self.counts.iter_mut().zip(&other.counts) {
            *dst = dst.saturating_add(*src);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::CountMatrix;

    #[test]
    fn summaries_split_diagonal() {
        let m = CountMatrix::from_counts(2, vec![3, 1, 2, 4]).unwrap();
        assert_eq!(m.total(), 10);
        assert_eq!(m.unchanged(), 7);
        assert_eq!(m.changed(), 3);
        assert_eq!(m.get(1, 0), Some(2));
        assert_eq!(m.get(2, 0), None);
        assert_eq!(m.row(1), Some(&[2u64, 4][..]));
        let cells: Vec<_> = m.transitions().collect();
        assert_eq!(cells, vec![(0, 0, 3), (0, 1, 1), (1, 0, 2), (1, 1, 4)]);
    }

    #[test]
    fn rejects_bad_class_counts() {
        assert!(CountMatrix::zeros(0).is_err());
        assert!(CountMatrix::zeros(257).is_err());
        assert!(CountMatrix::zeros(256).is_ok());
        assert!(CountMatrix::from_counts(2, vec![0; 3]).is_err());
    }

    #[test]
    fn add_assign_requires_same_size() {
        let mut a = CountMatrix::zeros(2).unwrap();
        let b = CountMatrix::zeros(3).unwrap();
        assert!(a.add_assign(&b).is_err());
    }
}
