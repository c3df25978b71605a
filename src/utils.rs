//! Utility functions shared by statistics collection and surface handling

use ndarray::Array2;
use num_traits::Float;

/// Find minimum and maximum of a slice in one pass, ignoring NaNs.
/// Returns `(inf, -inf)` for an empty or all-NaN input.
pub fn find_min_max<T: Float>(values: &[T]) -> (T, T) {
    let mut min = T::infinity();
    let mut max = T::neg_infinity();
    for &value in values {
        if value.is_nan() {
            continue;
        }
        if value < min {
            min = value;
        }
        if value > max {
            max = value;
        }
    }
    (min, max)
}

/// Evenly spaced histogram bin edges over `[min, max]`, `bins + 1` values
pub fn bin_edges(min: f32, max: f32, bins: usize) -> Vec<f32> {
    let step = (max - min) / bins as f32;
    (0..=bins).map(|i| min + step * i as f32).collect()
}

/// Index of the histogram bin containing `value`, clamped to the last bin
pub fn bin_index(value: f32, edges: &[f32]) -> usize {
    let bins = edges.len() - 1;
    let span = edges[bins] - edges[0];
    if span <= 0.0 {
        return 0;
    }
    let pos = ((value - edges[0]) / span * bins as f32) as usize;
    pos.min(bins - 1)
}

/// Quantile of an ascending-sorted sample, linearly interpolated
pub fn sorted_quantile(sorted: &[f32], q: f64) -> f32 {
    if sorted.is_empty() {
        return f32::NAN;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let weight = (pos - lo as f64) as f32;
    sorted[lo] * (1.0 - weight) + sorted[hi] * weight
}

/// Gaussian kernel of odd size `kernel_size`, normalized to unit sum
pub fn gaussian_kernel(kernel_size: usize, sigma: f64) -> Array2<f64> {
    let half = (kernel_size / 2) as isize;
    let mut kernel = Array2::<f64>::zeros((kernel_size, kernel_size));
    let mut total = 0.0;
    for i in 0..kernel_size {
        for j in 0..kernel_size {
            let di = (i as isize - half) as f64;
            let dj = (j as isize - half) as f64;
            let weight = (-(di * di + dj * dj) / (2.0 * sigma * sigma)).exp();
            kernel[[i, j]] = weight;
            total += weight;
        }
    }
    kernel.mapv_inplace(|w| w / total);
    kernel
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_min_max() {
        let (min, max) = find_min_max(&[3.0f32, -1.0, 2.0]);
        assert_eq!((min, max), (-1.0, 3.0));

        let (min, max) = find_min_max(&[f32::NAN, 5.0, f32::NAN]);
        assert_eq!((min, max), (5.0, 5.0));

        let (min, max) = find_min_max::<f32>(&[]);
        assert!(min.is_infinite() && max.is_infinite());
    }

    #[test]
    fn test_bin_edges_and_index() {
        let edges = bin_edges(0.0, 10.0, 5);
        assert_eq!(edges.len(), 6);
        assert_eq!(edges[0], 0.0);
        assert_eq!(edges[5], 10.0);

        assert_eq!(bin_index(0.0, &edges), 0);
        assert_eq!(bin_index(3.5, &edges), 1);
        // Right edge falls into the last bin
        assert_eq!(bin_index(10.0, &edges), 4);
    }

    #[test]
    fn test_sorted_quantile() {
        let sample = vec![1.0f32, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sorted_quantile(&sample, 0.0), 1.0);
        assert_eq!(sorted_quantile(&sample, 1.0), 5.0);
        assert_eq!(sorted_quantile(&sample, 0.5), 3.0);
        assert_eq!(sorted_quantile(&sample, 0.25), 2.0);
    }

    #[test]
    fn test_gaussian_kernel() {
        let kernel = gaussian_kernel(3, 0.8);
        let total: f64 = kernel.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
        // Center carries the largest weight
        assert!(kernel[[1, 1]] > kernel[[0, 0]]);
    }
}
