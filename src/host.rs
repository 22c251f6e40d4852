use std::collections::HashMap;

use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{JackStrawError, Result};
use crate::pca::{FeaturePca, PcaConfig};
use crate::result::SignificanceResult;

/// A matrix whose rows carry identifiers.
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledMatrix {
    pub row_names: Vec<String>,
    pub data: Array2<f64>,
}

impl LabeledMatrix {
    pub fn new(row_names: Vec<String>, data: Array2<f64>) -> Result<Self> {
        if row_names.len() != data.nrows() {
            return Err(JackStrawError::DimensionMismatch(format!(
                "{} row names for a matrix with {} rows",
                row_names.len(),
                data.nrows()
            )));
        }
        Ok(Self { row_names, data })
    }

    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    pub fn view(&self) -> ArrayView2<f64> {
        self.data.view()
    }
}

/// How the significance engine reads the host container and writes results back.
///
/// Implementors own the measurements and the prior PCA; the engine only
/// borrows them. `Sync` because replicates read through shared references.
pub trait SignificanceHost: Sync {
    /// Sample embeddings of the prior PCA. Shape: `(n_samples, n_axes)`
    fn pca_embeddings(&self) -> Option<ArrayView2<f64>>;

    /// Entity loadings of the prior PCA; row names are the entities used in the PCA.
    fn pca_loadings(&self) -> Option<&LabeledMatrix>;

    /// Flags the prior PCA was computed with.
    fn pca_config(&self) -> Option<PcaConfig>;

    /// Scaled measurements of the given entities, rows in the order given.
    /// Shape: `(entity_ids.len(), n_samples)`
    fn scaled_measurements(&self, entity_ids: &[String]) -> Result<Array2<f64>>;

    /// Stores `result`, replacing any result under the same axis label prefix.
    fn set_significance_result(&mut self, result: SignificanceResult);

    /// The result stored under `axis_label_prefix`, if any.
    fn significance_result(&self, axis_label_prefix: &str) -> Option<&SignificanceResult>;
}

/// A host that keeps everything in memory.
#[derive(Clone, Debug)]
pub struct InMemoryHost {
    entity_names: Vec<String>,
    entity_index: HashMap<String, usize>,
    /// Shape: `(n_entities, n_samples)`
    scaled_data: Array2<f64>,
    loadings: Option<LabeledMatrix>,
    embeddings: Option<Array2<f64>>,
    pca_config: Option<PcaConfig>,
    results: HashMap<String, SignificanceResult>,
}

impl InMemoryHost {
    /// A host holding scaled measurements but no PCA yet.
    pub fn new(entity_names: Vec<String>, scaled_data: Array2<f64>) -> Result<Self> {
        if entity_names.len() != scaled_data.nrows() {
            return Err(JackStrawError::DimensionMismatch(format!(
                "{} entity names for a measurement matrix with {} rows",
                entity_names.len(),
                scaled_data.nrows()
            )));
        }
        let mut entity_index = HashMap::with_capacity(entity_names.len());
        for (i, name) in entity_names.iter().enumerate() {
            if entity_index.insert(name.clone(), i).is_some() {
                return Err(JackStrawError::InvalidParameter(format!(
                    "duplicate entity name '{}'",
                    name
                )));
            }
        }
        Ok(Self {
            entity_names,
            entity_index,
            scaled_data,
            loadings: None,
            embeddings: None,
            pca_config: None,
            results: HashMap::new(),
        })
    }

    /// Installs a PCA computed elsewhere.
    pub fn with_pca(
        mut self,
        loadings: LabeledMatrix,
        embeddings: Array2<f64>,
        config: PcaConfig,
    ) -> Result<Self> {
        if embeddings.nrows() != self.scaled_data.ncols() {
            return Err(JackStrawError::DimensionMismatch(format!(
                "embeddings have {} samples but measurements have {}",
                embeddings.nrows(),
                self.scaled_data.ncols()
            )));
        }
        if let Some(missing) = loadings
            .row_names
            .iter()
            .find(|name| !self.entity_index.contains_key(*name))
        {
            return Err(JackStrawError::DimensionMismatch(format!(
                "loadings entity '{}' has no measurements",
                missing
            )));
        }
        self.loadings = Some(loadings);
        self.embeddings = Some(embeddings);
        self.pca_config = Some(config);
        Ok(self)
    }

    /// Computes `n_axes` axes over `features` (all entities when `None`) and installs them.
    pub fn run_pca(
        self,
        features: Option<&[String]>,
        n_axes: usize,
        config: PcaConfig,
    ) -> Result<Self> {
        let features: Vec<String> = match features {
            Some(f) => f.to_vec(),
            None => self.entity_names.clone(),
        };
        let data = self.scaled_measurements(&features)?;
        let fit = FeaturePca::new(config).fit(data.view(), n_axes)?;
        let loadings = LabeledMatrix::new(features, fit.loadings)?;
        self.with_pca(loadings, fit.embeddings, config)
    }

    pub fn entity_names(&self) -> &[String] {
        &self.entity_names
    }
}

impl SignificanceHost for InMemoryHost {
    fn pca_embeddings(&self) -> Option<ArrayView2<f64>> {
        self.embeddings.as_ref().map(|e| e.view())
    }

    fn pca_loadings(&self) -> Option<&LabeledMatrix> {
        self.loadings.as_ref()
    }

    fn pca_config(&self) -> Option<PcaConfig> {
        self.pca_config
    }

    fn scaled_measurements(&self, entity_ids: &[String]) -> Result<Array2<f64>> {
        let rows = entity_ids
            .iter()
            .map(|id| {
                self.entity_index.get(id).copied().ok_or_else(|| {
                    JackStrawError::DimensionMismatch(format!("unknown entity '{}'", id))
                })
            })
            .collect::<Result<Vec<usize>>>()?;
        Ok(self.scaled_data.select(Axis(0), &rows))
    }

    fn set_significance_result(&mut self, result: SignificanceResult) {
        self.results
            .insert(result.axis_label_prefix.clone(), result);
    }

    fn significance_result(&self, axis_label_prefix: &str) -> Option<&SignificanceResult> {
        self.results.get(axis_label_prefix)
    }
}
