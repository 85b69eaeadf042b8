//! Otsu thresholding, grounded in
//! `original_source/src/bkAlgorithm/otsu.h`.

/// Computes the Otsu threshold of a sample of scalar values.
///
/// Builds a `num_buckets`-bin histogram over `[min, max]` and returns the
/// value (not the bin index) that maximizes the between-class variance
/// `q1 * q2 * (mu1 - mu2)^2`.
///
/// Returns `None` for an empty slice.
pub fn otsu_threshold(values: &[f64], num_buckets: usize) -> Option<f64> {
    if values.is_empty() || num_buckets == 0 {
        return None;
    }

    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    if !(max > min) {
        return Some(min);
    }

    let mut hist = vec![0.0_f64; num_buckets];
    let bucket_width = (max - min) / num_buckets as f64;
    for &v in values {
        let mut b = ((v - min) / bucket_width) as isize;
        if b < 0 {
            b = 0;
        }
        if b as usize >= num_buckets {
            b = num_buckets as isize - 1;
        }
        hist[b as usize] += 1.0;
    }

    let n = values.len() as f64;
    let sum: f64 = hist.iter().enumerate().map(|(i, c)| i as f64 * c).sum();

    let mut threshold_bin = 0usize;
    let mut var_max = 0.0_f64;
    let mut q1 = 0.0_f64;
    let mut sum_b = 0.0_f64;

    for (t, &count) in hist.iter().enumerate() {
        q1 += count;
        if q1 == 0.0 {
            continue;
        }
        sum_b += t as f64 * count;
        let q2 = n - q1;
        if q2 <= 0.0 {
            break;
        }
        let temp = (sum_b / q1) - (sum - sum_b) / q2;
        let sigma2 = q1 * q2 * temp * temp;

        if sigma2 > var_max {
            threshold_bin = t;
            var_max = sigma2;
        }
    }

    Some(min + (threshold_bin as f64 / num_buckets as f64) * (max - min))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separates_two_well_spaced_clusters() {
        let mut values = vec![0.0; 50];
        values.extend(std::iter::repeat(10.0).take(50));
        let t = otsu_threshold(&values, 256).unwrap();
        assert!(t > 0.5 && t < 9.5);
    }

    #[test]
    fn empty_input_returns_none() {
        assert!(otsu_threshold(&[], 256).is_none());
    }
}
