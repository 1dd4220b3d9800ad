//! Integer helpers for tile and launch geometry.

/// Returns the largest divisor of `value` that is not greater than `max`.
///
/// Returns `None` when `value` or `max` is zero.
pub(crate) fn largest_divisor_at_most(value: usize, max: usize) -> Option<usize> {
    if value == 0 || max == 0 {
        return None;
    }
    (1..=max.min(value)).rev().find(|d| value % d == 0)
}

/// Smallest `side` such that `side * side >= value`.
pub(crate) fn ceil_sqrt(value: usize) -> usize {
    if value == 0 {
        return 0;
    }
    let mut side = (value as f64).sqrt() as usize;
    while side * side < value {
        side += 1;
    }
    while side > 1 && (side - 1) * (side - 1) >= value {
        side -= 1;
    }
    side
}
