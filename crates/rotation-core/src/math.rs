//! Small statistical helpers shared by feature extraction and context
//! tracking.

/// Return `val` if finite, otherwise `default`.
#[inline]
pub fn finite_or(val: f64, default: f64) -> f64 {
    if val.is_finite() {
        val
    } else {
        default
    }
}

/// Arithmetic mean; 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator); 0.0 below two samples.
pub fn stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let sq_sum: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    (sq_sum / (values.len() - 1) as f64).sqrt()
}

/// Population standard deviation (n denominator); 0.0 below two samples.
pub fn stddev_pop(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let sq_sum: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    (sq_sum / values.len() as f64).sqrt()
}

/// Maximum value; 0.0 for an empty slice.
pub fn max(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Minimum value; 0.0 for an empty slice.
pub fn min(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

/// Z-score of `value` against `history`; 0.0 when the history is too
/// short or degenerate.
pub fn zscore(value: f64, history: &[f64]) -> f64 {
    if history.len() < 2 {
        return 0.0;
    }
    let sd = stddev_pop(history);
    if sd < 1e-10 {
        return 0.0;
    }
    (value - mean(history)) / sd
}

/// Pearson correlation of two equal-length series; 0.0 when degenerate.
pub fn correlation(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() < 2 {
        return 0.0;
    }
    let n = x.len() as f64;
    let mx = mean(x);
    let my = mean(y);
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (a, b) in x.iter().zip(y.iter()) {
        let dx = a - mx;
        let dy = b - my;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    let sx = (var_x / n).sqrt();
    let sy = (var_y / n).sqrt();
    if sx < 1e-10 || sy < 1e-10 {
        return 0.0;
    }
    cov / (n * sx * sy)
}

/// Clamp to [0, 1].
#[inline]
pub fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_and_stddev() {
        let vals = [1.0, 2.0, 3.0, 4.0];
        assert!((mean(&vals) - 2.5).abs() < 1e-12);
        // Sample stddev of 1..4 = sqrt(5/3)
        assert!((stddev(&vals) - (5.0_f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(stddev(&[1.0]), 0.0);
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn min_max() {
        let vals = [3.0, -1.0, 2.0];
        assert_eq!(max(&vals), 3.0);
        assert_eq!(min(&vals), -1.0);
        assert_eq!(min(&[]), 0.0);
    }

    #[test]
    fn correlation_of_linear_series() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 4.0, 6.0, 8.0, 10.0];
        assert!((correlation(&x, &y) - 1.0).abs() < 1e-10);
        let inv: Vec<f64> = y.iter().map(|v| -v).collect();
        assert!((correlation(&x, &inv) + 1.0).abs() < 1e-10);
        // Flat series has no correlation.
        assert_eq!(correlation(&x, &[1.0; 5]), 0.0);
    }

    #[test]
    fn zscore_of_last_value() {
        let hist = [1.0, 2.0, 3.0, 4.0, 5.0];
        let z = zscore(5.0, &hist);
        assert!(z > 0.0);
        assert_eq!(zscore(1.0, &[2.0]), 0.0);
        assert_eq!(zscore(1.0, &[2.0, 2.0, 2.0]), 0.0);
    }

    #[test]
    fn finite_guard() {
        assert_eq!(finite_or(1.5, 0.0), 1.5);
        assert_eq!(finite_or(f64::NAN, 0.5), 0.5);
        assert_eq!(finite_or(f64::INFINITY, 1.0), 1.0);
    }
}
