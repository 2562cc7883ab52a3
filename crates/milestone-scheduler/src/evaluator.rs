//! Pure, side-effect-free subscriber ladder math.
//!
//! No I/O, no async, no dependencies, so its invariants can be checked directly with `proptest`
//! without any test double.

#![forbid(unsafe_code)]

/// Every ladder rung `r` with `prev < r <= curr`, ascending. Empty if `prev >= curr` or if there
/// is no previous observation (`prev = None`, first-ever sample).
pub fn crossings(prev: Option<u64>, curr: u64, ladder: &[u64]) -> Vec<u64> {
    let Some(prev) = prev else {
        return Vec::new();
    };
    if prev >= curr {
        return Vec::new();
    }
    ladder.iter().copied().filter(|&r| prev < r && r <= curr).collect()
}

/// The smallest rung strictly greater than every element of `already_achieved`, and also strictly
/// greater than `curr` when no milestone has been achieved yet.
pub fn next_unachieved(curr: u64, already_achieved: &[u64], ladder: &[u64]) -> Option<u64> {
    let floor = already_achieved.iter().copied().max();
    match floor {
        Some(max_achieved) => ladder.iter().copied().filter(|&r| r > max_achieved).min(),
        None => ladder.iter().copied().filter(|&r| r > curr).min(),
    }
}

/// `curr / rung` as a float ratio. Returns `0.0` if `rung` is zero (never expected in practice
/// since the ladder is validated non-zero at config time, but kept total rather than panicking).
pub fn progress_ratio(curr: u64, rung: u64) -> f64 {
    if rung == 0 {
        return 0.0;
    }
    curr as f64 / rung as f64
}
