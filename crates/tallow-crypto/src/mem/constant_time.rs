//! Constant-time operations to prevent timing side-channels

use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};

/// Constant-time equality comparison
///
/// Compares two byte slices in constant time. Always returns `false` for
/// slices of different lengths; for equal lengths the comparison runs to
/// the end regardless of where the first difference sits.
pub fn constant_time_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.ct_eq(b).into()
}

/// Constant-time selection between two copyable values
pub fn ct_select<T: ConditionallySelectable + Copy>(condition: bool, a: T, b: T) -> T {
    let choice = Choice::from(condition as u8);
    T::conditional_select(&b, &a, choice)
}
