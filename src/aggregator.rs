use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use log::{debug, info};
use ndarray::{concatenate, Array2, ArrayView2, Axis};
use rayon::prelude::*;

use crate::error::{JackStrawError, Result};
use crate::null_generator::NullGenerator;

/// Called after each finished replicate with `(completed, total)`.
type ProgressCallback = fn(usize, usize);

fn log_progress(completed: usize, total: usize) {
    info!("JackStraw replicate {}/{} complete", completed, total);
}

fn silent_progress(_completed: usize, _total: usize) {}

/// Runs replicates `1..=num_replicate` (seed = replicate index) and pools
/// their synthetic loadings per axis.
pub struct ReplicateAggregator<'g, 'a> {
    generator: &'g NullGenerator<'a>,
    num_replicate: usize,
    on_progress: ProgressCallback,
}

impl<'g, 'a> ReplicateAggregator<'g, 'a> {
    pub fn new(generator: &'g NullGenerator<'a>, num_replicate: usize) -> Result<Self> {
        if num_replicate == 0 {
            return Err(JackStrawError::InvalidParameter(
                "number of replicates must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            generator,
            num_replicate,
            on_progress: silent_progress,
        })
    }

    /// Log each completed replicate at info level.
    pub fn report_progress(mut self, enabled: bool) -> Self {
        self.on_progress = if enabled { log_progress } else { silent_progress };
        self
    }

    /// Pooled null loadings. Rows are grouped by replicate in seed order.
    /// Shape: `(num_replicate * permuted_count, num_axes)`
    ///
    /// Any failing replicate fails the whole run.
    pub fn run(&self) -> Result<Array2<f64>> {
        debug!(
            "Running {} replicates permuting {} entities each over {} axes",
            self.num_replicate,
            self.generator.permuted_count(),
            self.generator.num_axes()
        );
        let start_time = Instant::now();
        let completed = AtomicUsize::new(0);
        let total = self.num_replicate;

        let replicates: Vec<Array2<f64>> = (1..=total)
            .into_par_iter()
            .map(|replicate| {
                let loadings = self.generator.generate(replicate as u64)?;
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                (self.on_progress)(done, total);
                Ok(loadings)
            })
            .collect::<Result<Vec<_>>>()?;

        let views: Vec<ArrayView2<f64>> = replicates.iter().map(|r| r.view()).collect();
        let pooled = concatenate(Axis(0), &views)?;
        info!(
            "Pooled {} null loadings per axis from {} replicates in {:?}",
            pooled.nrows(),
            total,
            start_time.elapsed()
        );
        Ok(pooled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pca::PcaConfig;
    use ndarray::s;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_matrix(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-1.0..1.0))
    }

    #[test]
    fn pools_replicates_in_seed_order() {
        let data = random_matrix(30, 16, 5);
        let generator = NullGenerator::new(data.view(), 0.1, 1, 3, PcaConfig::default()).unwrap();
        let pooled = ReplicateAggregator::new(&generator, 4)
            .unwrap()
            .report_progress(true)
            .run()
            .unwrap();
        assert_eq!(pooled.dim(), (12, 3));

        let third = generator.generate(3).unwrap();
        assert_eq!(pooled.slice(s![6..9, ..]), third);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let data = random_matrix(25, 12, 6);
        let generator = NullGenerator::new(data.view(), 0.2, 1, 2, PcaConfig::default()).unwrap();
        let aggregator = ReplicateAggregator::new(&generator, 6).unwrap();
        assert_eq!(aggregator.run().unwrap(), aggregator.run().unwrap());
    }

    #[test]
    fn zero_replicates_is_rejected() {
        let data = random_matrix(10, 6, 7);
        let generator = NullGenerator::new(data.view(), 0.3, 1, 1, PcaConfig::default()).unwrap();
        assert!(ReplicateAggregator::new(&generator, 0).is_err());
    }
}
