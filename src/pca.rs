// Exact PCA over a feature-by-sample matrix

use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::ThreadSafeStdError;
use crate::linalg_backends::{BackendEigh, LinAlgBackendProvider};

/// Cross-product eigenvalues at or below this fraction of the largest one mark
/// the decomposition as rank deficient on the requested axes.
const RELATIVE_RANK_TOLERANCE: f64 = 1e-12;
/// Below this the matrix is treated as all zeros.
const ABSOLUTE_EIGENVALUE_FLOOR: f64 = 1e-24;

/// How the host computed its PCA.
///
/// Both the host's original PCA and every resampled PCA must use the same
/// flags, otherwise real and null loadings are not on the same scale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcaConfig {
    /// Axes were computed on the feature-by-sample matrix itself rather than
    /// on its transpose. Loadings then live on the left singular vectors and
    /// can carry the singular values.
    pub reversed_formulation: bool,
    /// Scale by the singular values: feature loadings when
    /// `reversed_formulation` is set, sample embeddings otherwise.
    pub variance_weighted: bool,
}

/// Result of an exact PCA fit.
#[derive(Debug, Clone)]
pub struct PcaFit {
    /// Feature loadings. Shape: `(n_features, n_axes)`
    pub loadings: Array2<f64>,
    /// Sample embeddings. Shape: `(n_samples, n_axes)`
    pub embeddings: Array2<f64>,
    /// Singular values of the input matrix, descending. Shape: `(n_axes)`
    pub singular_values: Array1<f64>,
    /// Per-axis standard deviations, `d / sqrt(max(1, n - 1))`.
    pub standard_deviations: Array1<f64>,
}

/// Exact PCA of an already scaled feature-by-sample matrix.
///
/// The input is not re-centered. Chooses the eigendecomposition of
/// `X X^T` when there are no more features than samples, and of `X^T X`
/// (the Gram trick) otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct FeaturePca {
    config: PcaConfig,
    backend: LinAlgBackendProvider,
}

impl FeaturePca {
    pub fn new(config: PcaConfig) -> Self {
        Self {
            config,
            backend: LinAlgBackendProvider::new(),
        }
    }

    pub fn config(&self) -> PcaConfig {
        self.config
    }

    /// Fits the first `n_axes` principal axes of `data`.
    ///
    /// * `data` - shape `(n_features, n_samples)`.
    /// * `n_axes` - number of leading axes to keep, at most `min(n_features, n_samples)`.
    ///
    /// # Errors
    /// Returns an error if the input is empty or non-finite, if `n_axes` is out of range,
    /// if the eigendecomposition fails, or if any requested axis has a (numerically)
    /// zero singular value.
    pub fn fit(&self, data: ArrayView2<f64>, n_axes: usize) -> Result<PcaFit, ThreadSafeStdError> {
        let n_features = data.nrows();
        let n_samples = data.ncols();

        if n_features == 0 || n_samples == 0 {
            return Err("Input matrix has zero features or zero samples.".into());
        }
        if n_axes == 0 {
            return Err("Number of requested axes must be greater than 0.".into());
        }
        if n_axes > n_features.min(n_samples) {
            return Err(format!(
                "Requested {} axes but a {}x{} matrix has at most {}.",
                n_axes,
                n_features,
                n_samples,
                n_features.min(n_samples)
            )
            .into());
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err("Input matrix contains non-finite values.".into());
        }

        let use_feature_side = n_features <= n_samples;
        let cross_product = if use_feature_side {
            data.dot(&data.t())
        } else {
            data.t().dot(&data)
        };
        let eigh = self
            .backend
            .eigh_upper(&cross_product)
            .map_err(|e| format!("Eigendecomposition of cross-product matrix failed: {}", e))?;

        let mut order: Vec<usize> = (0..eigh.eigenvalues.len()).collect();
        order.sort_by(|&a, &b| {
            eigh.eigenvalues[b]
                .partial_cmp(&eigh.eigenvalues[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let top_eigenvalues: Vec<f64> = order[..n_axes]
            .iter()
            .map(|&i| eigh.eigenvalues[i].max(0.0))
            .collect();

        let largest = top_eigenvalues[0];
        if largest <= ABSOLUTE_EIGENVALUE_FLOOR {
            return Err("Input matrix is numerically zero; no principal axes exist.".into());
        }
        if let Some(axis) = top_eigenvalues
            .iter()
            .position(|&lambda| lambda <= largest * RELATIVE_RANK_TOLERANCE)
        {
            return Err(format!(
                "Matrix is rank deficient: axis {} has a zero singular value.",
                axis + 1
            )
            .into());
        }
        let singular_values: Array1<f64> = top_eigenvalues.iter().map(|l| l.sqrt()).collect();

        let mut left = Array2::<f64>::zeros((n_features, n_axes));
        let mut right = Array2::<f64>::zeros((n_samples, n_axes));
        for (k, &eig_idx) in order[..n_axes].iter().enumerate() {
            let eigvec = eigh.eigenvectors.column(eig_idx);
            let d = singular_values[k];
            if use_feature_side {
                left.column_mut(k).assign(&eigvec);
                right.column_mut(k).assign(&(data.t().dot(&eigvec) / d));
            } else {
                right.column_mut(k).assign(&eigvec);
                left.column_mut(k).assign(&(data.dot(&eigvec) / d));
            }
        }
        normalize_columns(&mut left);
        normalize_columns(&mut right);

        let weights = singular_values.view().insert_axis(Axis(0));
        let (loadings, embeddings, sd_denominator) = if self.config.reversed_formulation {
            let loadings = if self.config.variance_weighted { &left * &weights } else { left };
            (loadings, right, n_features)
        } else {
            let embeddings = if self.config.variance_weighted { &right * &weights } else { right };
            (left, embeddings, n_samples)
        };
        let denom = (sd_denominator.saturating_sub(1).max(1) as f64).sqrt();
        let standard_deviations = singular_values.mapv(|d| d / denom);

        Ok(PcaFit {
            loadings,
            embeddings,
            singular_values,
            standard_deviations,
        })
    }

    /// Fits `r2` axes and returns the loadings of the requested rows on axes `r1..=r2` (1-based).
    pub fn fit_rows(
        &self,
        data: ArrayView2<f64>,
        rows: &[usize],
        first_axis: usize,
        last_axis: usize,
    ) -> Result<Array2<f64>, ThreadSafeStdError> {
        if first_axis == 0 || first_axis > last_axis {
            return Err(format!("Invalid axis range {}..={}.", first_axis, last_axis).into());
        }
        let fit = self.fit(data, last_axis)?;
        let columns = fit.loadings.slice(s![.., first_axis - 1..last_axis]);
        Ok(columns.select(Axis(0), rows))
    }
}

fn normalize_columns(matrix: &mut Array2<f64>) {
    const NORMALIZATION_THRESHOLD: f64 = 1e-12;
    for mut column in matrix.columns_mut() {
        let norm = column.dot(&column).sqrt();
        if norm > NORMALIZATION_THRESHOLD {
            column.mapv_inplace(|v| v / norm);
        } else {
            column.fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_matrix(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-1.0..1.0))
    }

    fn check_reconstruction(data: &Array2<f64>, fit: &PcaFit) {
        // Unweighted standard formulation: X = U diag(d) V^T when all axes are kept.
        let scaled_u = &fit.loadings * &fit.singular_values.view().insert_axis(Axis(0));
        let rebuilt = scaled_u.dot(&fit.embeddings.t());
        for (a, b) in rebuilt.iter().zip(data.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-8);
        }
    }

    #[test]
    fn full_rank_fit_reconstructs_tall_and_wide_inputs() {
        let pca = FeaturePca::new(PcaConfig::default());
        let wide = random_matrix(4, 9, 7);
        check_reconstruction(&wide, &pca.fit(wide.view(), 4).unwrap());

        let tall = random_matrix(9, 4, 8);
        check_reconstruction(&tall, &pca.fit(tall.view(), 4).unwrap());
    }

    #[test]
    fn loadings_are_unit_norm_and_orthogonal() {
        let data = random_matrix(12, 30, 11);
        let fit = FeaturePca::new(PcaConfig::default()).fit(data.view(), 3).unwrap();
        let gram = fit.loadings.t().dot(&fit.loadings);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(gram[[i, j]], expected, epsilon = 1e-9);
            }
        }
        for w in fit.singular_values.windows(2) {
            assert!(w[0] >= w[1]);
        }
    }

    #[test]
    fn variance_weighting_applies_to_the_configured_side() {
        let data = random_matrix(6, 10, 3);
        let plain = FeaturePca::new(PcaConfig::default()).fit(data.view(), 2).unwrap();
        let reversed_weighted_pca = FeaturePca::new(PcaConfig {
            reversed_formulation: true,
            variance_weighted: true,
        });
        assert!(reversed_weighted_pca.config().reversed_formulation);
        let reversed_weighted = reversed_weighted_pca.fit(data.view(), 2).unwrap();
        let standard_weighted = FeaturePca::new(PcaConfig {
            reversed_formulation: false,
            variance_weighted: true,
        })
        .fit(data.view(), 2)
        .unwrap();

        for k in 0..2 {
            let d = plain.singular_values[k];
            for i in 0..6 {
                assert_abs_diff_eq!(
                    reversed_weighted.loadings[[i, k]].abs(),
                    plain.loadings[[i, k]].abs() * d,
                    epsilon = 1e-9
                );
                assert_abs_diff_eq!(
                    standard_weighted.loadings[[i, k]].abs(),
                    plain.loadings[[i, k]].abs(),
                    epsilon = 1e-9
                );
            }
            for j in 0..10 {
                assert_abs_diff_eq!(
                    standard_weighted.embeddings[[j, k]].abs(),
                    plain.embeddings[[j, k]].abs() * d,
                    epsilon = 1e-9
                );
            }
        }
        assert_abs_diff_eq!(
            plain.standard_deviations[0],
            plain.singular_values[0] / 3.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            reversed_weighted.standard_deviations[0],
            plain.singular_values[0] / 5.0f64.sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn rank_deficient_request_is_an_error() {
        let data = array![[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [3.0, 6.0, 9.0]];
        let pca = FeaturePca::new(PcaConfig::default());
        assert!(pca.fit(data.view(), 1).is_ok());
        assert!(pca.fit(data.view(), 2).is_err());
    }

    #[test]
    fn rejects_bad_inputs() {
        let pca = FeaturePca::new(PcaConfig::default());
        let data = random_matrix(3, 5, 1);
        assert!(pca.fit(data.view(), 0).is_err());
        assert!(pca.fit(data.view(), 4).is_err());
        assert!(pca.fit(Array2::<f64>::zeros((0, 4)).view(), 1).is_err());
        let mut with_nan = data.clone();
        with_nan[[1, 1]] = f64::NAN;
        assert!(pca.fit(with_nan.view(), 1).is_err());
    }

    #[test]
    fn fit_rows_selects_rows_and_axis_range() {
        let data = random_matrix(8, 15, 21);
        let pca = FeaturePca::new(PcaConfig::default());
        let full = pca.fit(data.view(), 3).unwrap();
        let sub = pca.fit_rows(data.view(), &[5, 1], 2, 3).unwrap();
        assert_eq!(sub.dim(), (2, 2));
        assert_abs_diff_eq!(sub[[0, 0]], full.loadings[[5, 1]], epsilon = 1e-12);
        assert_abs_diff_eq!(sub[[1, 1]], full.loadings[[1, 2]], epsilon = 1e-12);
        assert!(pca.fit_rows(data.view(), &[0], 0, 2).is_err());
    }
}
