//! Shared run-wide accumulator with one-way freeze.

use crate::matrix::CountMatrix;
use crate::trace::{trace_event, trace_warn};
use crate::util::sync::lock;
use crate::util::ChangeMatrixResult;
use std::sync::Mutex;

/// What happened to a partial matrix handed to [`ChangeMatrix::merge`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The counts were added to the running total.
    Applied,
    /// The accumulator was already frozen; nothing changed.
    Frozen,
}

struct State {
    totals: CountMatrix,
    frozen: bool,
}

/// Thread-safe running total of class-pair counts.
///
/// Workers call [`merge`](Self::merge) concurrently. Once the caller knows no
/// more work is outstanding it calls [`freeze`](Self::freeze); later merges are
/// ignored and the matrix becomes the final result. A single mutex guards the
/// whole grid, so a merge is applied completely or not at all.
pub struct ChangeMatrix {
    num_classes: usize,
    state: Mutex<State>,
}

impl ChangeMatrix {
    /// Creates a zeroed, unfrozen accumulator for `num_classes` classes.
    pub fn new(num_classes: usize) -> ChangeMatrixResult<Self> {
        let totals = CountMatrix::zeros(num_classes)?;
        Ok(Self {
            num_classes,
            state: Mutex::new(State {
                totals,
                frozen: false,
            }),
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Adds a tile's partial matrix into the running total.
    ///
    /// Returns `MergeOutcome::Frozen` without touching the totals when called
    /// after [`freeze`](Self::freeze). Fails only if `partial` has a different
    /// class count, in which case nothing is applied.
    pub fn merge(&self, partial: &CountMatrix) -> ChangeMatrixResult<MergeOutcome> {
        let mut state = lock(&self.state);
        if state.frozen {
            trace_warn!("merge_after_freeze", cells = partial.total());
            return Ok(MergeOutcome::Frozen);
        }
        state.totals.add_assign(partial)?;
        Ok(MergeOutcome::Applied)
    }

    /// Stops accepting merges. Calling it again has no effect.
    pub fn freeze(&self) {
        let mut state = lock(&self.state);
        if !state.frozen {
            state.frozen = true;
            trace_event!("freeze", total = state.totals.total());
        }
    }

    pub fn is_frozen(&self) -> bool {
        lock(&self.state).frozen
    }

    /// Consistent snapshot of the totals.
    ///
    /// Before freeze more merges may still arrive; after freeze this is the
    /// final result.
    pub fn read(&self) -> CountMatrix {
        lock(&self.state).totals.clone()
    }
}

impl std::fmt::Debug for ChangeMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("ChangeMatrix")
            .field("num_classes", &self.num_classes)
            .field("frozen", &state.frozen)
            .field("total", &state.totals.total())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeMatrix, MergeOutcome};
    use crate::matrix::CountMatrix;

    #[test]
    fn freeze_is_idempotent_and_blocks_merges() {
        let acc = ChangeMatrix::new(2).unwrap();
        let partial = CountMatrix::from_counts(2, vec![1, 1, 1, 1]).unwrap();
        assert_eq!(acc.merge(&partial).unwrap(), MergeOutcome::Applied);
        acc.freeze();
        acc.freeze();
        assert!(acc.is_frozen());
        let before = acc.read();
        assert_eq!(acc.merge(&partial).unwrap(), MergeOutcome::Frozen);
        assert_eq!(acc.read(), before);
    }

    #[test]
    fn mismatched_partial_is_not_applied() {
        let acc = ChangeMatrix::new(2).unwrap();
        let partial = CountMatrix::zeros(3).unwrap();
        assert!(acc.merge(&partial).is_err());
        assert_eq!(acc.read().total(), 0);
    }
}
