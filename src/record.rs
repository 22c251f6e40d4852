// Persisted significance records and migration of older record layouts

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::{debug, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{JackStrawError, Result};
use crate::result::{axis_labels, AxisScore, SignificanceResult};

/// Schema version written by [`save_record`].
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// On-disk form of a [`SignificanceResult`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignificanceRecord {
    pub schema_version: u32,
    pub result: SignificanceResult,
}

/// Version 1 layout. Every field may be absent in a stale record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacySignificanceRecord {
    /// Entities x axes.
    pub empirical_p_values: Option<Array2<f64>>,
    /// Pooled null loadings, rows x axes.
    pub fake_scores: Option<Array2<f64>>,
    /// Two columns: axis index, score.
    pub overall_p_values: Option<Array2<f64>>,
    pub entity_names: Option<Vec<String>>,
}

/// Upgrades a version 1 record to the current result layout.
///
/// # Errors
/// Fails if the p-values, null scores or entity names are missing, or if
/// their shapes disagree, or if the overall score table is malformed.
pub fn migrate_legacy_record(
    legacy: LegacySignificanceRecord,
    axis_label_prefix: &str,
) -> Result<SignificanceResult> {
    let empirical_p_values = legacy.empirical_p_values.ok_or_else(|| {
        JackStrawError::Persistence("legacy record has no empirical p-values".to_string())
    })?;
    let fake_scores = legacy.fake_scores.ok_or_else(|| {
        JackStrawError::Persistence("legacy record has no null scores".to_string())
    })?;
    let entity_names = legacy.entity_names.ok_or_else(|| {
        JackStrawError::Persistence("legacy record has no entity names".to_string())
    })?;

    let mut result =
        SignificanceResult::new(axis_label_prefix, entity_names, empirical_p_values, fake_scores)?;

    if let Some(table) = legacy.overall_p_values {
        let num_axes = result.num_axes();
        if table.ncols() != 2 {
            return Err(JackStrawError::Persistence(format!(
                "legacy overall score table has {} columns, expected 2",
                table.ncols()
            )));
        }
        result.overall_scores = table
            .rows()
            .into_iter()
            .map(|row| {
                let axis = row[0];
                if axis.fract() != 0.0 || axis < 1.0 || axis as usize > num_axes {
                    return Err(JackStrawError::Persistence(format!(
                        "legacy overall score refers to invalid axis {}",
                        axis
                    )));
                }
                Ok(AxisScore {
                    axis: axis as usize,
                    score: row[1],
                })
            })
            .collect::<Result<Vec<_>>>()?;
    }
    debug!(
        "Migrated legacy significance record: {} entities, {} axes",
        result.num_entities(),
        result.num_axes()
    );
    Ok(result)
}

/// Writes `result` with bincode.
pub fn save_record<P: AsRef<Path>>(result: &SignificanceResult, path: P) -> Result<()> {
    let file = File::create(path.as_ref()).map_err(|e| {
        JackStrawError::Persistence(format!("Failed to create file at {:?}: {}", path.as_ref(), e))
    })?;
    let mut writer = BufWriter::new(file);
    let record = SignificanceRecord {
        schema_version: CURRENT_SCHEMA_VERSION,
        result: result.clone(),
    };
    bincode::serde::encode_into_std_write(&record, &mut writer, bincode::config::standard())
        .map_err(|e| {
            JackStrawError::Persistence(format!("Failed to serialize significance record: {}", e))
        })?;
    Ok(())
}

/// Reads a record written by [`save_record`] and validates it.
pub fn load_record<P: AsRef<Path>>(path: P) -> Result<SignificanceResult> {
    let file = File::open(path.as_ref()).map_err(|e| {
        JackStrawError::Persistence(format!("Failed to open file at {:?}: {}", path.as_ref(), e))
    })?;
    let mut reader = BufReader::new(file);
    let record: SignificanceRecord =
        bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard()).map_err(
            |e| {
                JackStrawError::Persistence(format!(
                    "Failed to deserialize significance record: {}",
                    e
                ))
            },
        )?;

    if record.schema_version != CURRENT_SCHEMA_VERSION {
        warn!(
            "Significance record has schema version {}, expected {}",
            record.schema_version, CURRENT_SCHEMA_VERSION
        );
        return Err(JackStrawError::Persistence(format!(
            "unsupported schema version {}",
            record.schema_version
        )));
    }
    let result = record.result;
    if result.entity_names.len() != result.num_entities()
        || result.null_scores.ncols() != result.num_axes()
        || result.axis_labels != axis_labels(&result.axis_label_prefix, result.num_axes())
    {
        return Err(JackStrawError::Persistence(
            "loaded significance record has inconsistent dimensions".to_string(),
        ));
    }
    if result
        .empirical_p_values
        .iter()
        .any(|&p| !(0.0..=1.0).contains(&p))
    {
        return Err(JackStrawError::Persistence(
            "loaded significance record has p-values outside [0, 1]".to_string(),
        ));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::NamedTempFile;

    fn sample_result() -> SignificanceResult {
        let mut result = SignificanceResult::new(
            "PC_",
            vec!["a".into(), "b".into()],
            array![[0.0, 0.5], [1.0, 0.25]],
            array![[0.1, -0.2], [0.3, 0.05], [-0.4, 0.2]],
        )
        .unwrap();
        result.overall_scores = vec![AxisScore { axis: 1, score: 0.02 }];
        result
    }

    #[test]
    fn saved_record_loads_back() -> Result<()> {
        let file = NamedTempFile::new()?;
        let original = sample_result();
        save_record(&original, file.path())?;
        let loaded = load_record(file.path())?;
        assert_eq!(loaded, original);
        assert_eq!(loaded.axis_labels, vec!["PC_1".to_string(), "PC_2".to_string()]);
        Ok(())
    }

    #[test]
    fn loading_garbage_fails() -> Result<()> {
        let file = NamedTempFile::new()?;
        std::fs::write(file.path(), b"not a record")?;
        assert!(load_record(file.path()).is_err());
        Ok(())
    }

    #[test]
    fn out_of_range_p_values_are_rejected_on_load() -> Result<()> {
        let file = NamedTempFile::new()?;
        let mut bad = sample_result();
        bad.empirical_p_values[[0, 0]] = 1.5;
        save_record(&bad, file.path())?;
        assert!(load_record(file.path()).is_err());
        Ok(())
    }

    #[test]
    fn complete_legacy_record_migrates() {
        let legacy = LegacySignificanceRecord {
            empirical_p_values: Some(array![[0.0, 0.5], [1.0, 0.25]]),
            fake_scores: Some(array![[0.1, 0.2]]),
            overall_p_values: Some(array![[1.0, 0.01], [2.0, 0.7]]),
            entity_names: Some(vec!["a".into(), "b".into()]),
        };
        let result = migrate_legacy_record(legacy, "PC_").unwrap();
        assert_eq!(result.axis_labels, vec!["PC_1", "PC_2"]);
        assert_eq!(result.overall_scores.len(), 2);
        assert_eq!(result.overall_scores[1], AxisScore { axis: 2, score: 0.7 });
    }

    #[test]
    fn legacy_record_missing_fields_is_rejected() {
        let complete = LegacySignificanceRecord {
            empirical_p_values: Some(array![[0.5]]),
            fake_scores: Some(array![[0.1]]),
            overall_p_values: None,
            entity_names: Some(vec!["a".into()]),
        };
        assert!(migrate_legacy_record(complete.clone(), "PC_").is_ok());

        let mut no_p = complete.clone();
        no_p.empirical_p_values = None;
        assert!(migrate_legacy_record(no_p, "PC_").is_err());

        let mut no_scores = complete.clone();
        no_scores.fake_scores = None;
        assert!(migrate_legacy_record(no_scores, "PC_").is_err());

        let mut no_names = complete.clone();
        no_names.entity_names = None;
        assert!(migrate_legacy_record(no_names, "PC_").is_err());

        let mut bad_table = complete;
        bad_table.overall_p_values = Some(array![[3.0, 0.1]]);
        assert!(migrate_legacy_record(bad_table, "PC_").is_err());
    }
}
