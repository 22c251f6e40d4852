use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{JackStrawError, Result};

/// Overall significance of one axis (see [`crate::empirical::score_axes`]).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisScore {
    /// 1-based axis index.
    pub axis: usize,
    /// Proportion-test p-value for an excess of significant entities on this axis.
    pub score: f64,
}

/// Outcome of one significance run, as stored in the host.
///
/// Created once per run and replaced wholesale by the next run under the
/// same `axis_label_prefix`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignificanceResult {
    /// Prefix of the axis labels, e.g. `"PC_"`.
    pub axis_label_prefix: String,
    /// Entity identifiers, in loadings row order.
    pub entity_names: Vec<String>,
    /// Column labels, `<prefix>1 ..= <prefix>num_axes`.
    pub axis_labels: Vec<String>,
    /// Empirical p-values. Shape: `(n_entities, num_axes)`
    pub empirical_p_values: Array2<f64>,
    /// Pooled null loadings, replicate 1 first.
    /// Shape: `(num_replicate * permuted_entity_count, num_axes)`
    pub null_scores: Array2<f64>,
    /// Per-axis overall scores, empty until axes are scored.
    pub overall_scores: Vec<AxisScore>,
}

impl SignificanceResult {
    /// Builds a result and checks that names, labels and matrices agree.
    pub fn new(
        axis_label_prefix: impl Into<String>,
        entity_names: Vec<String>,
        empirical_p_values: Array2<f64>,
        null_scores: Array2<f64>,
    ) -> Result<Self> {
        let axis_label_prefix = axis_label_prefix.into();
        if entity_names.len() != empirical_p_values.nrows() {
            return Err(JackStrawError::DimensionMismatch(format!(
                "{} entity names for a p-value matrix with {} rows",
                entity_names.len(),
                empirical_p_values.nrows()
            )));
        }
        if null_scores.ncols() != empirical_p_values.ncols() {
            return Err(JackStrawError::DimensionMismatch(format!(
                "null scores have {} axes but p-values have {}",
                null_scores.ncols(),
                empirical_p_values.ncols()
            )));
        }
        let axis_labels = axis_labels(&axis_label_prefix, empirical_p_values.ncols());
        Ok(Self {
            axis_label_prefix,
            entity_names,
            axis_labels,
            empirical_p_values,
            null_scores,
            overall_scores: Vec::new(),
        })
    }

    pub fn num_axes(&self) -> usize {
        self.empirical_p_values.ncols()
    }

    pub fn num_entities(&self) -> usize {
        self.empirical_p_values.nrows()
    }

    pub fn p_values(&self) -> ArrayView2<f64> {
        self.empirical_p_values.view()
    }

    /// P-values of one axis (1-based).
    pub fn axis_p_values(&self, axis: usize) -> Result<ArrayView1<f64>> {
        self.check_axis(axis)?;
        Ok(self.empirical_p_values.column(axis - 1))
    }

    /// Null pool of one axis (1-based).
    pub fn null_pool(&self, axis: usize) -> Result<ArrayView1<f64>> {
        self.check_axis(axis)?;
        Ok(self.null_scores.column(axis - 1))
    }

    pub(crate) fn check_axis(&self, axis: usize) -> Result<()> {
        if axis == 0 || axis > self.num_axes() {
            return Err(JackStrawError::AxisOutOfRange {
                axis,
                available: self.num_axes(),
            });
        }
        Ok(())
    }
}

pub(crate) fn axis_labels(prefix: &str, num_axes: usize) -> Vec<String> {
    (1..=num_axes).map(|a| format!("{}{}", prefix, a)).collect()
}
