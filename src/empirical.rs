//! Empirical p-values of observed loadings against pooled null loadings, and
//! per-axis overall scores derived from them.
//!
//! Tail convention: `p = #{v in pool : |v| >= |observed|} / |pool|`, with no
//! continuity correction. PCA axis signs are arbitrary, so only magnitudes
//! are compared.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis, Zip};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::error::{JackStrawError, Result};
use crate::result::{AxisScore, SignificanceResult};

/// Default p-value threshold used when scoring axes.
pub const DEFAULT_SCORE_THRESHOLD: f64 = 1e-5;

/// Sorted absolute null values of one axis.
struct NullTail {
    sorted_magnitudes: Vec<f64>,
}

impl NullTail {
    fn new(pool: ArrayView1<f64>) -> Self {
        let mut sorted_magnitudes: Vec<f64> = pool.iter().map(|v| v.abs()).collect();
        sorted_magnitudes.sort_by(|a, b| a.total_cmp(b));
        Self { sorted_magnitudes }
    }

    fn p_value(&self, observed: f64) -> f64 {
        let magnitude = observed.abs();
        let below = self.sorted_magnitudes.partition_point(|&v| v < magnitude);
        (self.sorted_magnitudes.len() - below) as f64 / self.sorted_magnitudes.len() as f64
    }
}

/// Empirical p-values for every entity and axis.
///
/// * `loadings` - observed loadings, shape `(n_entities, n_axes)`.
/// * `null_pools` - pooled null loadings, shape `(n_pooled, n_axes)`.
///
/// Returns a matrix shaped like `loadings`.
pub fn empirical_p_values(
    loadings: ArrayView2<f64>,
    null_pools: ArrayView2<f64>,
) -> Result<Array2<f64>> {
    if loadings.ncols() != null_pools.ncols() {
        return Err(JackStrawError::DimensionMismatch(format!(
            "loadings have {} axes but null pools have {}",
            loadings.ncols(),
            null_pools.ncols()
        )));
    }
    if null_pools.nrows() == 0 {
        return Err(JackStrawError::InvalidParameter(
            "null pools are empty".to_string(),
        ));
    }
    if let Some(bad) = loadings.iter().find(|v| !v.is_finite()) {
        return Err(JackStrawError::InvalidParameter(format!(
            "observed loadings must be finite, found {}",
            bad
        )));
    }
    if null_pools.iter().any(|v| v.is_nan()) {
        return Err(JackStrawError::Numerical(
            "null pools contain NaN values".into(),
        ));
    }

    let mut p_values = Array2::<f64>::zeros(loadings.raw_dim());
    Zip::from(p_values.axis_iter_mut(Axis(1)))
        .and(loadings.axis_iter(Axis(1)))
        .and(null_pools.axis_iter(Axis(1)))
        .par_for_each(|mut p_column, observed, pool| {
            let tail = NullTail::new(pool);
            Zip::from(&mut p_column)
                .and(&observed)
                .for_each(|p, &x| *p = tail.p_value(x));
        });
    Ok(p_values)
}

/// Two-sample proportion test (Pearson chi-square, one degree of freedom,
/// Yates continuity correction) of `successes_a / n` against `successes_b / n`.
fn two_proportion_test(successes_a: usize, successes_b: usize, n: usize) -> f64 {
    let n_f = n as f64;
    let x = [successes_a as f64, successes_b as f64];
    let pooled = (x[0] + x[1]) / (2.0 * n_f);
    if pooled <= 0.0 || pooled >= 1.0 {
        return 1.0;
    }
    let delta = (x[0] - x[1]).abs() / n_f;
    let yates = 0.5f64.min(delta / (2.0 / n_f));
    let expected_success = n_f * pooled;
    let expected_failure = n_f * (1.0 - pooled);
    let statistic: f64 = x
        .iter()
        .map(|&xi| {
            let dev_success = ((xi - expected_success).abs() - yates).powi(2) / expected_success;
            let dev_failure =
                (((n_f - xi) - expected_failure).abs() - yates).powi(2) / expected_failure;
            dev_success + dev_failure
        })
        .sum();
    match ChiSquared::new(1.0) {
        Ok(dist) if statistic.is_finite() => dist.sf(statistic),
        _ => 1.0,
    }
}

/// Overall score of each requested axis (1-based).
///
/// Compares the count of entities with `p <= score_threshold` against
/// `floor(n_entities * score_threshold)`, the count expected under uniform
/// p-values. Axes without any entity under the threshold score 1.
pub fn score_axes(
    result: &SignificanceResult,
    axes: &[usize],
    score_threshold: f64,
) -> Result<Vec<AxisScore>> {
    if !(score_threshold > 0.0 && score_threshold < 1.0) {
        return Err(JackStrawError::InvalidParameter(format!(
            "score threshold must be in (0, 1), got {}",
            score_threshold
        )));
    }
    if axes.is_empty() {
        return Err(JackStrawError::InvalidParameter(
            "at least one axis must be scored".to_string(),
        ));
    }
    for &axis in axes {
        result.check_axis(axis)?;
    }

    let n_entities = result.num_entities();
    let expected = (n_entities as f64 * score_threshold).floor() as usize;
    axes.iter()
        .map(|&axis| {
            let column = result.axis_p_values(axis)?;
            let observed = column.iter().filter(|&&p| p <= score_threshold).count();
            let score = if observed == 0 {
                1.0
            } else {
                two_proportion_test(observed, expected, n_entities)
            };
            Ok(AxisScore { axis, score })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use float_cmp::assert_approx_eq;
    use ndarray::{array, Array2};

    #[test]
    fn extremes_map_to_zero_and_one() {
        let null = array![[0.1, -0.2], [-0.3, 0.4], [0.2, 0.1]];
        let observed = array![[0.5, -0.05], [0.01, 0.9]];
        let p = empirical_p_values(observed.view(), null.view()).unwrap();
        assert_eq!(p[[0, 0]], 0.0);
        assert_eq!(p[[1, 0]], 1.0);
        assert_eq!(p[[0, 1]], 1.0);
        assert_eq!(p[[1, 1]], 0.0);
    }

    #[test]
    fn ties_count_toward_the_tail() {
        let null = array![[0.1], [0.2], [-0.3], [0.4]];
        let observed = array![[-0.2], [0.3]];
        let p = empirical_p_values(observed.view(), null.view()).unwrap();
        assert_approx_eq!(f64, p[[0, 0]], 0.75, epsilon = 1e-12);
        assert_approx_eq!(f64, p[[1, 0]], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn p_values_are_monotone_in_magnitude() {
        let null = Array2::from_shape_fn((50, 1), |(i, _)| ((i * 37) % 50) as f64 / 10.0 - 2.5);
        let observed = Array2::from_shape_fn((40, 1), |(i, _)| i as f64 * 0.08);
        let p = empirical_p_values(observed.view(), null.view()).unwrap();
        for i in 1..40 {
            assert!(p[[i, 0]] <= p[[i - 1, 0]]);
            assert!((0.0..=1.0).contains(&p[[i, 0]]));
        }
    }

    #[test]
    fn mismatched_axes_are_rejected() {
        let null = Array2::<f64>::zeros((4, 2));
        let observed = Array2::<f64>::zeros((3, 3));
        assert!(empirical_p_values(observed.view(), null.view()).is_err());
        let empty = Array2::<f64>::zeros((0, 3));
        assert!(empirical_p_values(observed.view(), empty.view()).is_err());
    }

    #[test]
    fn non_finite_observed_loadings_are_rejected() {
        let null = array![[0.1], [0.2]];
        for bad in [f64::NAN, f64::INFINITY] {
            let observed = array![[0.05], [bad]];
            assert!(matches!(
                empirical_p_values(observed.view(), null.view()),
                Err(JackStrawError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn proportion_test_matches_reference_values() {
        // 10/100 vs 0/100 with Yates correction: X^2 = 8.5263, p = 0.003501.
        assert_abs_diff_eq!(two_proportion_test(10, 0, 100), 0.003501, epsilon = 1e-5);
        // Equal proportions are not significant.
        assert_abs_diff_eq!(two_proportion_test(5, 5, 100), 1.0, epsilon = 1e-12);
        assert_eq!(two_proportion_test(0, 0, 100), 1.0);
    }

    #[test]
    fn score_axes_flags_axes_with_excess_small_p_values() {
        let mut p = Array2::from_elem((200, 2), 0.5);
        for i in 0..20 {
            p[[i, 0]] = 0.0;
        }
        let names = (0..200).map(|i| format!("g{}", i)).collect();
        let result =
            SignificanceResult::new("PC_", names, p, Array2::zeros((10, 2))).unwrap();
        let scores = score_axes(&result, &[1, 2], 1e-3).unwrap();
        assert_eq!(scores[0].axis, 1);
        assert!(scores[0].score < 1e-4);
        assert_eq!(scores[1].score, 1.0);

        assert!(score_axes(&result, &[3], 1e-3).is_err());
        assert!(score_axes(&result, &[1], 0.0).is_err());
        assert!(score_axes(&result, &[], 1e-3).is_err());
    }
}
