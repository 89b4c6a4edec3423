use std::f64::consts::PI;

/// Symmetric Hann window: `w[k] = 0.5 - 0.5 * cos(2πk / (N - 1))`.
///
/// Both end points are zero and, for odd `N`, the centre sample is one.
/// Lengths below two have no meaningful taper and yield a flat window.
pub fn hann_window(length: usize) -> Vec<f32> {
    if length < 2 {
        return vec![1.0; length];
    }

    let denominator = (length - 1) as f64;
    (0..length)
        .map(|k| (0.5 - 0.5 * (2.0 * PI * k as f64 / denominator).cos()) as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hann_end_points_are_zero() {
        for length in [2, 8, 255, 1024] {
            let window = hann_window(length);
            assert_eq!(window.len(), length);
            assert!(window[0].abs() < 1e-7);
            assert!(window[length - 1].abs() < 1e-7);
        }
    }

    #[test]
    fn test_hann_peak_is_one_for_odd_length() {
        let window = hann_window(257);
        assert!((window[128] - 1.0).abs() < 1e-7);
    }

    #[test]
    fn test_hann_is_symmetric() {
        let window = hann_window(64);
        for k in 0..32 {
            assert!((window[k] - window[63 - k]).abs() < 1e-6);
        }
    }
}
