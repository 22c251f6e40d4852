use std::collections::HashSet;

use ndarray::ArrayView2;

use crate::error::{JackStrawError, Result};

/// Default p-value cutoff for selecting entities.
pub const DEFAULT_P_VALUE_CUTOFF: f64 = 0.1;

/// Options for [`select_significant`].
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionOptions {
    /// Entities with a minimum p-value strictly below this are significant.
    pub cutoff: f64,
    /// Keep at most this many top-loading entities per axis before intersecting.
    pub max_per_axis: Option<usize>,
}

impl Default for SelectionOptions {
    fn default() -> Self {
        Self {
            cutoff: DEFAULT_P_VALUE_CUTOFF,
            max_per_axis: None,
        }
    }
}

/// Validates a 1-based axis set against the number of tested axes.
pub fn validate_axes(axes: &[usize], available: usize) -> Result<()> {
    if axes.is_empty() {
        return Err(JackStrawError::InvalidParameter(
            "axis set must not be empty".to_string(),
        ));
    }
    match axes.iter().find(|&&a| a == 0 || a > available) {
        Some(&axis) => Err(JackStrawError::AxisOutOfRange { axis, available }),
        None => Ok(()),
    }
}

/// Row indices of entities judged significant on `axes` (1-based), ascending.
///
/// An entity qualifies when its smallest p-value over `axes` is below the
/// cutoff. With `max_per_axis`, it must also rank among the top
/// `max_per_axis` absolute loadings of at least one requested axis; ties in
/// that ranking go to the earlier row.
///
/// * `p_values` - shape `(n_entities, n_tested_axes)`.
/// * `loadings` - shape `(n_entities, n_axes)` with `n_axes >= max(axes)`;
///   required when `max_per_axis` is set.
pub fn select_significant(
    p_values: ArrayView2<f64>,
    loadings: Option<ArrayView2<f64>>,
    axes: &[usize],
    options: &SelectionOptions,
) -> Result<Vec<usize>> {
    validate_axes(axes, p_values.ncols())?;
    if options.cutoff.is_nan() {
        return Err(JackStrawError::InvalidParameter(
            "p-value cutoff must not be NaN".to_string(),
        ));
    }

    let passing = (0..p_values.nrows()).filter(|&row| {
        let min_p = axes
            .iter()
            .map(|&a| p_values[[row, a - 1]])
            .fold(f64::INFINITY, f64::min);
        min_p < options.cutoff
    });

    let Some(max_per_axis) = options.max_per_axis else {
        return Ok(passing.collect());
    };
    let loadings = loadings.ok_or_else(|| {
        JackStrawError::InvalidParameter(
            "loadings are required to cap entities per axis".to_string(),
        )
    })?;

    if loadings.nrows() != p_values.nrows() {
        return Err(JackStrawError::DimensionMismatch(format!(
            "loadings have {} entities but p-values have {}",
            loadings.nrows(),
            p_values.nrows()
        )));
    }
    validate_axes(axes, loadings.ncols())?;

    let mut top: HashSet<usize> = HashSet::new();
    for &axis in axes {
        let column = loadings.column(axis - 1);
        let mut order: Vec<usize> = (0..column.len()).collect();
        // Stable sort: equal magnitudes keep row order.
        order.sort_by(|&a, &b| column[b].abs().total_cmp(&column[a].abs()));
        top.extend(order.into_iter().take(max_per_axis));
    }
    Ok(passing.filter(|row| top.contains(row)).collect())
}
