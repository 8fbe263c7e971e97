//! Distance kernel for exact nearest-neighbor search.

/// Squared Euclidean distance between two vectors of equal length.
///
/// Accumulates in `f64` so that small integer-valued vectors produce exact
/// results and long vectors do not lose precision. Callers are responsible
/// for checking the lengths match; extra trailing components are ignored.
#[inline]
#[must_use]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum()
}

/// Returns the position of the first NaN or infinite component, if any.
#[must_use]
pub fn first_non_finite(vector: &[f32]) -> Option<usize> {
    vector.iter().position(|v| !v.is_finite())
}
