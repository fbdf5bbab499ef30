//! Relative-deviation arithmetic for numeric disagreements
//!
//! Deviation is the spread of the asserted values (`max - min`) divided by
//! their mean, so the reference point never depends on which provider was
//! dispatched first. A deviation exactly equal to the tolerance counts as
//! agreement.

/// Absorbs floating-point noise at the tolerance boundary
pub const BOUNDARY_EPSILON: f64 = 1e-9;

/// Arithmetic mean, `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// `(max - min) / mean`. Zero when every value is zero.
pub fn relative_spread(values: &[f64]) -> f64 {
    let Some(mean) = mean(values) else {
        return 0.0;
    };
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let spread = max - min;
    if spread <= 0.0 {
        return 0.0;
    }
    if mean.abs() <= f64::EPSILON {
        return f64::INFINITY;
    }
    spread / mean.abs()
}

/// Whether the values disagree beyond `tolerance`.
pub fn exceeds_tolerance(values: &[f64], tolerance: f64) -> bool {
    values.len() >= 2 && relative_spread(values) > tolerance + BOUNDARY_EPSILON
}

/// Pairwise form used when folding a duplicate into an existing value.
pub fn within_tolerance(existing: f64, candidate: f64, tolerance: f64) -> bool {
    !exceeds_tolerance(&[existing, candidate], tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spread_over_mean() {
        let spread = relative_spread(&[500.0, 520.0]);
        assert!((spread - 20.0 / 510.0).abs() < 1e-12);
        assert!(exceeds_tolerance(&[500.0, 520.0], 0.02));
    }

    #[test]
    fn test_boundary_is_agreement() {
        // 2 / 100 is exactly 2%
        assert!(!exceeds_tolerance(&[99.0, 101.0], 0.02));
        assert!(exceeds_tolerance(&[99.0, 101.01], 0.02));
    }

    #[test]
    fn test_reference_is_order_independent() {
        assert_eq!(
            relative_spread(&[100.0, 103.0, 101.0]),
            relative_spread(&[103.0, 101.0, 100.0])
        );
    }

    #[test]
    fn test_zero_and_single_values() {
        assert_eq!(relative_spread(&[0.0, 0.0]), 0.0);
        assert!(!exceeds_tolerance(&[42.0], 0.01));
        assert!(!exceeds_tolerance(&[], 0.01));
        assert!(exceeds_tolerance(&[0.0, 5.0], 0.02));
    }

    #[test]
    fn test_within_tolerance_pairwise() {
        assert!(within_tolerance(100.0, 101.0, 0.01));
        assert!(!within_tolerance(100.0, 110.0, 0.02));
    }
}
