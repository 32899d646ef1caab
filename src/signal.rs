//! Gap-aware signal primitives
//!
//! Smoothing and order statistics over `Series` values. Gaps (`None`) are
//! treated as missing data: they never contribute to a neighbour's estimate
//! and a gap at the centre of a window stays a gap.

use crate::types::{Point, Series};

/// Centered median filter of odd width `window`.
///
/// Each defined sample is replaced by the median of the defined samples in
/// its window; undefined samples stay undefined.
pub fn median_filter(series: &[Option<f64>], window: usize) -> Series {
    let half = window / 2;
    let n = series.len();
    let mut buf = Vec::with_capacity(window);

    (0..n)
        .map(|t| {
            series[t]?;
            buf.clear();
            let lo = t.saturating_sub(half);
            let hi = (t + half).min(n.saturating_sub(1));
            buf.extend(series[lo..=hi].iter().flatten().copied());
            median_in_place(&mut buf)
        })
        .collect()
}

/// Median filter applied independently to both coordinates of a point track
pub fn median_filter_points(points: &[Option<Point>], window: usize) -> Vec<Option<Point>> {
    let xs: Series = points.iter().map(|p| p.map(|p| p.x)).collect();
    let ys: Series = points.iter().map(|p| p.map(|p| p.y)).collect();
    let xs = median_filter(&xs, window);
    let ys = median_filter(&ys, window);
    xs.into_iter()
        .zip(ys)
        .map(|(x, y)| Some(Point::new(x?, y?)))
        .collect()
}

/// Gaussian smoothing with standard deviation `sigma` frames.
///
/// The kernel is truncated at 3σ and renormalised over the defined samples
/// it covers. A σ below half a frame returns the input unchanged.
pub fn gaussian_smooth(series: &[Option<f64>], sigma: f64) -> Series {
    if sigma < 0.5 {
        return series.to_vec();
    }
    let radius = (3.0 * sigma).ceil() as usize;
    let kernel: Vec<f64> = (0..=radius)
        .map(|k| (-((k * k) as f64) / (2.0 * sigma * sigma)).exp())
        .collect();
    let n = series.len();

    (0..n)
        .map(|t| {
            series[t]?;
            let lo = t.saturating_sub(radius);
            let hi = (t + radius).min(n - 1);
            let mut acc = 0.0;
            let mut weight = 0.0;
            for (i, value) in series.iter().enumerate().take(hi + 1).skip(lo) {
                if let Some(v) = value {
                    let w = kernel[t.abs_diff(i)];
                    acc += w * v;
                    weight += w;
                }
            }
            Some(acc / weight)
        })
        .collect()
}

/// Percentile `p` (0-100) of the defined values, linearly interpolated
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

/// Combine two series frame by frame; undefined if either input is
pub fn zip_with(a: &[Option<f64>], b: &[Option<f64>], f: impl Fn(f64, f64) -> f64) -> Series {
    a.iter()
        .zip(b)
        .map(|(x, y)| Some(f((*x)?, (*y)?)))
        .collect()
}

fn median_in_place(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_median_filter_removes_spike() {
        let series = vec![Some(1.0), Some(1.0), Some(50.0), Some(1.0), Some(1.0)];
        let filtered = median_filter(&series, 3);
        assert_eq!(filtered[2], Some(1.0));
    }

    #[test]
    fn test_median_filter_keeps_gaps() {
        let series = vec![Some(1.0), None, Some(3.0), Some(5.0)];
        let filtered = median_filter(&series, 3);
        assert_eq!(filtered[1], None);
        // neighbours of frame 0 are {1.0} only; the gap does not count as zero
        assert_eq!(filtered[0], Some(1.0));
        assert_eq!(filtered[2], Some(4.0));
    }

    #[test]
    fn test_gaussian_preserves_constant() {
        let series = vec![Some(2.5); 20];
        for v in gaussian_smooth(&series, 2.0).into_iter().flatten() {
            assert_relative_eq!(v, 2.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_gaussian_ignores_gap_neighbours() {
        let mut series = vec![Some(4.0); 11];
        series[4] = None;
        let smoothed = gaussian_smooth(&series, 1.5);
        assert_eq!(smoothed[4], None);
        assert_relative_eq!(smoothed[5].unwrap(), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_gaussian_small_sigma_is_identity() {
        let series = vec![Some(1.0), Some(9.0), Some(1.0)];
        assert_eq!(gaussian_smooth(&series, 0.2), series);
    }

    #[test]
    fn test_gaussian_is_linear_in_scale() {
        let series: Series = (0..30).map(|i| Some((i as f64 * 0.7).sin() + 2.0)).collect();
        let scaled: Series = series.iter().map(|v| v.map(|v| v * 1.1)).collect();
        let a = gaussian_smooth(&series, 2.0);
        let b = gaussian_smooth(&scaled, 2.0);
        for (x, y) in a.iter().zip(&b) {
            assert_relative_eq!(x.unwrap() * 1.1, y.unwrap(), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_percentile() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&values, 0.0), Some(1.0));
        assert_eq!(percentile(&values, 50.0), Some(3.0));
        assert_eq!(percentile(&values, 100.0), Some(5.0));
        assert_relative_eq!(percentile(&values, 85.0).unwrap(), 4.4, epsilon = 1e-12);
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn test_percentile_is_order_independent() {
        let a = [3.2, 1.1, 7.4, 5.5, 2.0, 9.9];
        let mut b = a;
        b.reverse();
        assert_eq!(percentile(&a, 85.0), percentile(&b, 85.0));
    }
}
