use log::trace;
use ndarray::{Array2, ArrayView2};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::{JackStrawError, Result};
use crate::pca::{FeaturePca, PcaConfig};

/// Fewest entities a replicate may permute.
pub const MIN_PERMUTED_ENTITIES: usize = 3;

/// `round(fraction * n_entities)`, before the floor of three is applied.
pub fn requested_entity_count(n_entities: usize, sampling_fraction: f64) -> usize {
    (sampling_fraction * n_entities as f64).round() as usize
}

/// Number of entities permuted per replicate: `max(3, round(fraction * n_entities))`.
pub fn permuted_entity_count(n_entities: usize, sampling_fraction: f64) -> usize {
    requested_entity_count(n_entities, sampling_fraction).max(MIN_PERMUTED_ENTITIES)
}

/// Produces one replicate's synthetic loadings.
///
/// Each call draws `permuted_count` entities, shuffles every drawn row across
/// samples with its own permutation, refits the PCA on the whole modified
/// matrix, and keeps only the drawn rows on axes `first_axis..=last_axis`.
#[derive(Debug, Clone)]
pub struct NullGenerator<'a> {
    /// Shape: `(n_entities, n_samples)`
    data: ArrayView2<'a, f64>,
    permuted_count: usize,
    first_axis: usize,
    last_axis: usize,
    pca: FeaturePca,
}

impl<'a> NullGenerator<'a> {
    /// # Errors
    /// Fails when fewer than three entities are available, when the sampling
    /// fraction is outside `(0, 1]`, or when the axis range is empty or exceeds
    /// what the matrix supports.
    pub fn new(
        data: ArrayView2<'a, f64>,
        sampling_fraction: f64,
        first_axis: usize,
        last_axis: usize,
        pca_config: PcaConfig,
    ) -> Result<Self> {
        let n_entities = data.nrows();
        if n_entities < MIN_PERMUTED_ENTITIES {
            return Err(JackStrawError::InsufficientData {
                available: n_entities,
                required: MIN_PERMUTED_ENTITIES,
            });
        }
        if !(sampling_fraction > 0.0 && sampling_fraction <= 1.0) {
            return Err(JackStrawError::InvalidParameter(format!(
                "sampling fraction must be in (0, 1], got {}",
                sampling_fraction
            )));
        }
        let max_axes = n_entities.min(data.ncols());
        if first_axis == 0 || first_axis > last_axis || last_axis > max_axes {
            return Err(JackStrawError::InvalidParameter(format!(
                "axis range {}..={} is not within 1..={}",
                first_axis, last_axis, max_axes
            )));
        }
        Ok(Self {
            data,
            permuted_count: permuted_entity_count(n_entities, sampling_fraction),
            first_axis,
            last_axis,
            pca: FeaturePca::new(pca_config),
        })
    }

    pub fn permuted_count(&self) -> usize {
        self.permuted_count
    }

    pub fn num_axes(&self) -> usize {
        self.last_axis - self.first_axis + 1
    }

    /// Synthetic loadings for one seed. Shape: `(permuted_count, num_axes)`
    pub fn generate(&self, seed: u64) -> Result<Array2<f64>> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let drawn = self.draw_entities(&mut rng);

        let mut modified = self.data.to_owned();
        for &row_idx in &drawn {
            let mut row_values = modified.row(row_idx).to_vec();
            row_values.shuffle(&mut rng);
            modified
                .row_mut(row_idx)
                .iter_mut()
                .zip(row_values)
                .for_each(|(dst, v)| *dst = v);
        }

        let loadings = self
            .pca
            .fit_rows(modified.view(), &drawn, self.first_axis, self.last_axis)
            .map_err(|e| {
                JackStrawError::Numerical(
                    format!("replicate with seed {} failed: {}", seed, e).into(),
                )
            })?;
        trace!(
            "Replicate seed {}: permuted {} entities, null loadings shape {:?}",
            seed,
            drawn.len(),
            loadings.dim()
        );
        Ok(loadings)
    }

    /// Entity indices drawn uniformly without replacement, in draw order.
    pub fn draw_entities(&self, rng: &mut ChaCha8Rng) -> Vec<usize> {
        rand::seq::index::sample(rng, self.data.nrows(), self.permuted_count).into_vec()
    }
}
