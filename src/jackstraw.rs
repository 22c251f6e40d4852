use std::time::Instant;

use log::{debug, info, warn};
use ndarray::s;
use serde::{Deserialize, Serialize};

use crate::aggregator::ReplicateAggregator;
use crate::empirical::{empirical_p_values, score_axes, DEFAULT_SCORE_THRESHOLD};
use crate::error::{JackStrawError, Result};
use crate::host::SignificanceHost;
use crate::null_generator::{
    permuted_entity_count, requested_entity_count, NullGenerator, MIN_PERMUTED_ENTITIES,
};
use crate::result::{AxisScore, SignificanceResult};
use crate::selector::{select_significant, validate_axes, SelectionOptions};

/// Parameters of a significance run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JackStrawConfig {
    /// Number of leading axes to test. Clamped to the available axes and sample count.
    pub num_axes: usize,
    /// Number of independent permutation replicates; replicate `i` uses seed `i`.
    pub num_replicate: usize,
    /// Fraction of entities permuted per replicate (at least three are always permuted).
    pub sampling_fraction: f64,
    /// Log each completed replicate.
    pub report_progress: bool,
    /// Prefix of the axis labels the result is stored under.
    pub axis_label_prefix: String,
}

impl Default for JackStrawConfig {
    fn default() -> Self {
        JackStrawConfig {
            num_axes: 20,
            num_replicate: 100,
            sampling_fraction: 0.01,
            report_progress: false,
            axis_label_prefix: "PC_".to_string(),
        }
    }
}

/// Entry points of the significance engine.
#[derive(Debug, Clone, Default)]
pub struct JackStraw {
    config: JackStrawConfig,
}

impl JackStraw {
    pub fn new(config: JackStrawConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &JackStrawConfig {
        &self.config
    }

    /// Runs the permutation test against the host's PCA and stores the result in the host.
    ///
    /// # Errors
    /// - `ConfigMissing` if the host has no PCA loadings, embeddings or configuration.
    /// - `InsufficientData` if fewer than three entities were used by the PCA.
    /// - `InvalidParameter` / `DimensionMismatch` for unusable parameters or inputs.
    /// - `Numerical` if any replicate's PCA refit is degenerate. Nothing is stored then.
    pub fn compute_significance<H: SignificanceHost>(
        &self,
        host: &mut H,
    ) -> Result<SignificanceResult> {
        let result = self.evaluate(&*host)?;
        host.set_significance_result(result.clone());
        Ok(result)
    }

    fn evaluate<H: SignificanceHost>(&self, host: &H) -> Result<SignificanceResult> {
        let config = &self.config;
        if config.num_axes == 0 {
            return Err(JackStrawError::InvalidParameter(
                "number of axes must be greater than 0".to_string(),
            ));
        }
        if config.num_replicate == 0 {
            return Err(JackStrawError::InvalidParameter(
                "number of replicates must be greater than 0".to_string(),
            ));
        }
        if !(config.sampling_fraction > 0.0 && config.sampling_fraction <= 1.0) {
            return Err(JackStrawError::InvalidParameter(format!(
                "sampling fraction must be in (0, 1], got {}",
                config.sampling_fraction
            )));
        }

        let loadings = host.pca_loadings().ok_or_else(|| {
            JackStrawError::ConfigMissing("host has no PCA loadings".to_string())
        })?;
        let embeddings = host.pca_embeddings().ok_or_else(|| {
            JackStrawError::ConfigMissing("host has no PCA embeddings".to_string())
        })?;
        let pca_config = host.pca_config().ok_or_else(|| {
            JackStrawError::ConfigMissing("host has no PCA configuration".to_string())
        })?;

        if embeddings.ncols() != loadings.ncols() {
            return Err(JackStrawError::DimensionMismatch(format!(
                "embeddings have {} axes but loadings have {}",
                embeddings.ncols(),
                loadings.ncols()
            )));
        }
        let num_axes = clamp_num_axes(config.num_axes, loadings.ncols(), embeddings.nrows());
        if num_axes == 0 {
            return Err(JackStrawError::ConfigMissing(
                "host PCA has no axes".to_string(),
            ));
        }

        let entity_names = &loadings.row_names;
        let n_entities = entity_names.len();
        if n_entities < MIN_PERMUTED_ENTITIES {
            return Err(JackStrawError::InsufficientData {
                available: n_entities,
                required: MIN_PERMUTED_ENTITIES,
            });
        }
        let requested = requested_entity_count(n_entities, config.sampling_fraction);
        if requested < MIN_PERMUTED_ENTITIES {
            warn!(
                "Sampling fraction {} of {} entities permutes {}; using {} per replicate.",
                config.sampling_fraction,
                n_entities,
                requested,
                permuted_entity_count(n_entities, config.sampling_fraction)
            );
        }

        let measurements = host.scaled_measurements(entity_names)?;
        if measurements.nrows() != n_entities || measurements.ncols() != embeddings.nrows() {
            return Err(JackStrawError::DimensionMismatch(format!(
                "measurements are {}x{}, expected {}x{} (entities x samples)",
                measurements.nrows(),
                measurements.ncols(),
                n_entities,
                embeddings.nrows()
            )));
        }

        info!(
            "Starting JackStraw: {} axes, {} replicates, fraction {}, {}x{} (entities x samples)",
            num_axes,
            config.num_replicate,
            config.sampling_fraction,
            n_entities,
            measurements.ncols()
        );
        let overall_start_time = Instant::now();

        let generator = NullGenerator::new(
            measurements.view(),
            config.sampling_fraction,
            1,
            num_axes,
            pca_config,
        )?;
        let null_scores = ReplicateAggregator::new(&generator, config.num_replicate)?
            .report_progress(config.report_progress)
            .run()?;

        let observed = loadings.data.slice(s![.., ..num_axes]);
        let p_values = empirical_p_values(observed, null_scores.view())?;
        debug!("Computed empirical p-value matrix of shape {:?}", p_values.dim());

        let result = SignificanceResult::new(
            config.axis_label_prefix.clone(),
            entity_names.clone(),
            p_values,
            null_scores,
        )?;
        info!("JackStraw completed in {:?}", overall_start_time.elapsed());
        Ok(result)
    }

    /// Entities whose minimum p-value over `axes` (1-based) is below `cutoff`,
    /// optionally capped to the top `max_per_axis` absolute loadings per axis.
    /// Returned in loadings row order.
    ///
    /// # Errors
    /// - `UnsupportedMode` if `use_extended` is set.
    /// - `ResultMissing` if no result is stored under this configuration's prefix.
    /// - `AxisOutOfRange` if an axis was not tested.
    pub fn select_significant_entities<H: SignificanceHost>(
        &self,
        host: &H,
        axes: &[usize],
        cutoff: f64,
        use_extended: bool,
        max_per_axis: Option<usize>,
    ) -> Result<Vec<String>> {
        if use_extended {
            return Err(JackStrawError::UnsupportedMode(
                "significance for an extended entity set is not computed".to_string(),
            ));
        }
        let result = self.stored_result(host)?;
        validate_axes(axes, result.num_axes())?;

        let options = SelectionOptions {
            cutoff,
            max_per_axis,
        };
        let rows = match max_per_axis {
            None => select_significant(result.p_values(), None, axes, &options)?,
            Some(_) => {
                let loadings = host.pca_loadings().ok_or_else(|| {
                    JackStrawError::ConfigMissing("host has no PCA loadings".to_string())
                })?;
                if loadings.row_names != result.entity_names {
                    return Err(JackStrawError::DimensionMismatch(
                        "host loadings no longer match the entities of the stored result"
                            .to_string(),
                    ));
                }
                select_significant(result.p_values(), Some(loadings.view()), axes, &options)?
            }
        };
        debug!(
            "Selected {} of {} entities on axes {:?}",
            rows.len(),
            result.num_entities(),
            axes
        );
        Ok(rows
            .into_iter()
            .map(|row| result.entity_names[row].clone())
            .collect())
    }

    /// Scores `axes` (1-based) of the stored result and writes the scores back to the host.
    pub fn score_axes<H: SignificanceHost>(
        &self,
        host: &mut H,
        axes: &[usize],
        score_threshold: Option<f64>,
    ) -> Result<Vec<AxisScore>> {
        let mut result = self.stored_result(&*host)?.clone();
        let scores = score_axes(
            &result,
            axes,
            score_threshold.unwrap_or(DEFAULT_SCORE_THRESHOLD),
        )?;
        result.overall_scores = scores.clone();
        host.set_significance_result(result);
        Ok(scores)
    }

    fn stored_result<'h, H: SignificanceHost>(
        &self,
        host: &'h H,
    ) -> Result<&'h SignificanceResult> {
        host.significance_result(&self.config.axis_label_prefix)
            .ok_or_else(|| JackStrawError::ResultMissing(self.config.axis_label_prefix.clone()))
    }
}

/// Smallest of the requested, available and sample-supported axis counts,
/// with a warning whenever the request is reduced.
fn clamp_num_axes(requested: usize, available_axes: usize, num_samples: usize) -> usize {
    let mut num_axes = requested;
    if num_axes > available_axes {
        warn!(
            "Requested {} axes but only {} are available; testing {} axes.",
            requested, available_axes, available_axes
        );
        num_axes = available_axes;
    }
    if num_axes > num_samples {
        warn!(
            "Requested {} axes but there are only {} samples; testing {} axes.",
            requested, num_samples, num_samples
        );
        num_axes = num_samples;
    }
    num_axes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamping_takes_the_smallest_bound() {
        assert_eq!(clamp_num_axes(5, 10, 20), 5);
        assert_eq!(clamp_num_axes(15, 10, 20), 10);
        assert_eq!(clamp_num_axes(15, 10, 4), 4);
        assert_eq!(clamp_num_axes(15, 30, 12), 12);
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = JackStrawConfig::default();
        assert_eq!(config.num_axes, 20);
        assert_eq!(config.num_replicate, 100);
        assert_eq!(config.sampling_fraction, 0.01);
        assert!(!config.report_progress);
        assert_eq!(config.axis_label_prefix, "PC_");
    }
}
