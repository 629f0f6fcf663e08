//! Per-pixel evaluation and the small statistics kernels shared by the stages

use num_traits::Float;

/// Evaluate `f` at every pixel of a `(rows, cols)` grid, in row-major order.
///
/// Pixels are independent, so the grid is spread over the rayon pool.
#[cfg(feature = "parallel")]
pub(crate) fn map_pixels<T, F>(shape: (usize, usize), f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize, usize) -> T + Sync + Send,
{
    use rayon::prelude::*;

    let (rows, cols) = shape;
    (0..rows * cols)
        .into_par_iter()
        .map(|idx| f(idx / cols, idx % cols))
        .collect()
}

/// Evaluate `f` at every pixel of a `(rows, cols)` grid, in row-major order.
#[cfg(not(feature = "parallel"))]
pub(crate) fn map_pixels<T, F>(shape: (usize, usize), f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize, usize) -> T + Sync + Send,
{
    let (rows, cols) = shape;
    (0..rows * cols).map(|idx| f(idx / cols, idx % cols)).collect()
}

/// Median of the samples; even counts average the two middle values
pub fn median<T: Float>(values: &mut [T]) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = values.len();
    let mid = n / 2;
    if n % 2 == 1 {
        Some(values[mid])
    } else {
        let two = T::one() + T::one();
        Some((values[mid - 1] + values[mid]) / two)
    }
}

/// Mean and population standard deviation (two-pass)
pub fn mean_std<T: Float>(values: &[T]) -> Option<(T, T)> {
    if values.is_empty() {
        return None;
    }
    let n = T::from(values.len())?;
    let mean = values.iter().fold(T::zero(), |acc, &v| acc + v) / n;
    let variance = values
        .iter()
        .fold(T::zero(), |acc, &v| acc + (v - mean) * (v - mean))
        / n;
    Some((mean, variance.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&mut [3.0f32, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [100.0f32, 110.0]), Some(105.0));
        assert_eq!(median::<f32>(&mut []), None);
    }

    #[test]
    fn test_population_std() {
        let (mean, std) = mean_std(&[2.0f64, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_abs_diff_eq!(mean, 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(std, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_map_pixels_row_major() {
        let out = map_pixels((2, 3), |r, c| r * 10 + c);
        assert_eq!(out, vec![0, 1, 2, 10, 11, 12]);
    }
}
