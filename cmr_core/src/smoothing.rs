//! Generic point-sequence smoothing.
//!
//! Grounded in `original_source/include/bkAlgorithm/smooth.h`: both
//! routines alternate between two scratch buffers so that reading
//! iteration `it` never observes writes from the same iteration, copy the
//! first/last `kernel_size/2` elements unchanged, and force the kernel
//! size to be odd. Generic over any vector-like `T` so the same code
//! smooths both `Vector3<f64>` centerline points and `Matrix3<f64>` local
//! coordinate frames (see [`crate::centerline`]).

use std::ops::{Add, Div, Mul, Sub};

/// Bound satisfied by `nalgebra::Vector3<f64>` and `nalgebra::Matrix3<f64>`,
/// the two types this module is used with.
pub trait Smoothable:
    Copy
    + Default
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<f64, Output = Self>
    + Div<f64, Output = Self>
{
}

impl<T> Smoothable for T where
    T: Copy
        + Default
        + Add<Output = Self>
        + Sub<Output = Self>
        + Mul<f64, Output = Self>
        + Div<f64, Output = Self>
{
}

/// Exact (non-overflowing for the small `n` used here) binomial coefficient `C(n, k)`.
///
/// Mirrors `original_source/src/bkMath/functions/binomial_coefficient.h`.
pub fn binomial_coefficient(n: u32, k: u32) -> u32 {
    assert!(k <= n, "binomial_coefficient requires k <= n");

    if k == 0 || k == n {
        return 1;
    }

    let (hi, lo) = if k >= n - k { (k, n - k) } else { (n - k, k) };

    let mut nom: u64 = 1;
    let mut i = n;
    while i > hi {
        nom *= i as u64;
        i -= 1;
    }

    let mut denom: u64 = 1;
    let mut j = lo;
    while j > 1 {
        denom *= j as u64;
        j -= 1;
    }

    if nom == 0 || denom == 0 {
        0
    } else {
        (nom / denom) as u32
    }
}

fn forced_odd(kernel_size: u32) -> u32 {
    if kernel_size % 2 == 0 {
        kernel_size + 1
    } else {
        kernel_size
    }
}

/// Binomial-weighted smoothing over a sequence, in place.
///
/// A no-op when `iterations == 0`. `kernel_size < 2` is treated as a no-op
/// too (documented choice, see `DESIGN.md` Open Question on
/// `smooth_binomial` with `kernel_size < 2`: the original silently
/// returns and this keeps that behavior rather than making it an error,
/// since callers pass a compile-time-constant kernel size and a panic
/// would only ever fire on a programming mistake never an input error).
pub fn smooth_binomial<T: Smoothable>(data: &mut [T], iterations: u32, kernel_size: u32) {
    if iterations == 0 || kernel_size < 2 || data.len() < 2 {
        return;
    }

    let n = data.len();
    let ks = forced_odd(kernel_size) as usize;
    if ks > n {
        return;
    }
    let half = ks / 2;

    let mut weights = vec![0.0_f64; ks];
    let mut wsum = 0.0;
    for (i, w) in weights.iter_mut().enumerate() {
        *w = binomial_coefficient((ks - 1) as u32, i as u32) as f64;
        wsum += *w;
    }
    for w in &mut weights {
        *w /= wsum;
    }

    let mut buf0: Vec<T> = data.to_vec();
    let mut buf1: Vec<T> = buf0.clone();

    for it in 0..iterations {
        let (read, write): (&Vec<T>, &mut Vec<T>) = if it % 2 == 0 {
            (&buf0, &mut buf1)
        } else {
            (&buf1, &mut buf0)
        };

        for i in half..n - half {
            let mut acc = T::default();
            for (k, w) in weights.iter().enumerate() {
                let off = k as isize - half as isize;
                let idx = (i as isize + off) as usize;
                acc = acc + read[idx] * *w;
            }
            write[i] = acc;
        }

        for i in 0..half {
            write[i] = read[i];
        }
        for i in n - half..n {
            write[i] = read[i];
        }
    }

    let result = if iterations % 2 != 0 { &buf1 } else { &buf0 };
    data.copy_from_slice(result);
}

/// Taubin λ/μ smoothing over a sequence, in place.
///
/// At even iterations the relaxation weight is `lambda`, at odd iterations
/// it is `mu` (conventionally `mu` is negative and `|mu| > lambda` to
/// counteract the shrinkage that plain Laplacian smoothing introduces).
/// A no-op when `iterations == 0`, `kernel_size < 1`, or both weights are zero.
pub fn smooth_lambda_mu<T: Smoothable>(
    data: &mut [T],
    iterations: u32,
    kernel_size: u32,
    lambda: f64,
    mu: f64,
) {
    if iterations == 0 || kernel_size < 1 || (lambda == 0.0 && mu == 0.0) || data.is_empty() {
        return;
    }

    let n = data.len();
    let ks = forced_odd(kernel_size) as usize;
    if ks > n {
        return;
    }
    let half = ks / 2;

    let mut buf0: Vec<T> = data.to_vec();
    let mut buf1: Vec<T> = buf0.clone();

    for it in 0..iterations {
        let (read, write): (&Vec<T>, &mut Vec<T>) = if it % 2 == 0 {
            (&buf0, &mut buf1)
        } else {
            (&buf1, &mut buf0)
        };
        let w = if it % 2 == 0 { lambda } else { mu };

        for i in half..n - half {
            let mut mean = T::default();
            for k in 0..half {
                let off = k as isize - half as isize;
                mean = mean + read[(i as isize + off) as usize];
            }
            for k in half + 1..ks {
                let off = k as isize - half as isize;
                mean = mean + read[(i as isize + off) as usize];
            }
            mean = mean / ((ks - 1) as f64);

            let diff = (mean - read[i]) * w;
            write[i] = read[i] + diff;
        }

        for i in 0..half {
            write[i] = read[i];
        }
        for i in n - half..n {
            write[i] = read[i];
        }
    }

    let result = if iterations % 2 != 0 { &buf1 } else { &buf0 };
    data.copy_from_slice(result);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binomial_coefficient_matches_pascal_triangle() {
        assert_eq!(binomial_coefficient(4, 0), 1);
        assert_eq!(binomial_coefficient(4, 2), 6);
        assert_eq!(binomial_coefficient(4, 4), 1);
        assert_eq!(binomial_coefficient(5, 2), 10);
    }

    #[test]
    fn lambda_mu_removes_single_point_outlier() {
        // 100 collinear points along x, with a single y-outlier at index 50.
        let mut pts: Vec<f64> = (0..100).map(|_| 0.0).collect();
        pts[50] = 1.0;
        smooth_lambda_mu(&mut pts, 50, 3, 0.5, -0.53);
        // neighbors of the former outlier are all ~0, so the outlier's
        // residual from its (now smoothed) neighborhood must be small.
        let neighborhood_mean = (pts[49] + pts[51]) / 2.0;
        assert!((pts[50] - neighborhood_mean).abs() < 0.05);
    }

    #[test]
    fn binomial_smoothing_is_noop_below_kernel_two() {
        let mut pts = vec![1.0, 2.0, 3.0, 4.0];
        let before = pts.clone();
        smooth_binomial(&mut pts, 10, 1);
        assert_eq!(pts, before);
    }
}
