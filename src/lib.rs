// JackStraw significance of feature loadings on principal components

#![doc = include_str!("../README.md")]

pub mod aggregator;
pub mod empirical;
pub mod error;
pub mod host;
pub mod jackstraw;
pub mod linalg_backends;
pub mod null_generator;
pub mod pca;
pub mod record;
pub mod result;
pub mod selector;


pub use error::{JackStrawError, Result, ThreadSafeStdError};
pub use host::{InMemoryHost, LabeledMatrix, SignificanceHost};
pub use jackstraw::{JackStraw, JackStrawConfig};
pub use pca::{FeaturePca, PcaConfig, PcaFit};
pub use result::{AxisScore, SignificanceResult};
