use std::error::Error;
use std::fmt;

/// A thread-safe wrapper for standard dynamic errors,
/// so they implement `Send` and `Sync`.
pub type ThreadSafeStdError = Box<dyn Error + Send + Sync + 'static>;

/// Errors raised by significance computation, selection and record handling.
#[derive(Debug)]
pub enum JackStrawError {
    /// The host holds no prior PCA (loadings, embeddings or configuration).
    ConfigMissing(String),
    /// Too few entities to draw a permuted subset from.
    InsufficientData {
        /// Entities available to the PCA.
        available: usize,
        /// Minimum required.
        required: usize,
    },
    /// No significance result is stored under the requested label prefix.
    ResultMissing(String),
    /// A requested mode that this crate does not implement.
    UnsupportedMode(String),
    /// A requested axis lies outside `[1, available]`.
    AxisOutOfRange {
        /// 1-based axis index that was requested.
        axis: usize,
        /// Number of axes that were tested.
        available: usize,
    },
    /// A parameter is outside its valid domain.
    InvalidParameter(String),
    /// Matrix shapes or entity identifiers disagree.
    DimensionMismatch(String),
    /// A linear algebra step failed or produced a degenerate decomposition.
    Numerical(ThreadSafeStdError),
    /// Reading or writing a persisted record failed.
    Persistence(String),
}

impl fmt::Display for JackStrawError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JackStrawError::ConfigMissing(msg) => write!(f, "No prior PCA available: {}", msg),
            JackStrawError::InsufficientData { available, required } => write!(
                f,
                "Too few entities for resampling: {} available, at least {} required",
                available, required
            ),
            JackStrawError::ResultMissing(prefix) => write!(
                f,
                "No significance result stored for axes '{}'; run compute_significance first",
                prefix
            ),
            JackStrawError::UnsupportedMode(msg) => write!(f, "Unsupported mode: {}", msg),
            JackStrawError::AxisOutOfRange { axis, available } => write!(
                f,
                "Axis {} is outside the tested range 1..={}",
                axis, available
            ),
            JackStrawError::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            JackStrawError::DimensionMismatch(msg) => write!(f, "Dimension mismatch: {}", msg),
            JackStrawError::Numerical(e) => write!(f, "Numerical failure during PCA: {}", e),
            JackStrawError::Persistence(msg) => write!(f, "Record persistence error: {}", msg),
        }
    }
}

impl Error for JackStrawError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            JackStrawError::Numerical(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<ThreadSafeStdError> for JackStrawError {
    fn from(e: ThreadSafeStdError) -> Self {
        JackStrawError::Numerical(e)
    }
}

impl From<std::io::Error> for JackStrawError {
    fn from(e: std::io::Error) -> Self {
        JackStrawError::Persistence(format!("I/O error: {}", e))
    }
}

impl From<ndarray::ShapeError> for JackStrawError {
    fn from(e: ndarray::ShapeError) -> Self {
        JackStrawError::DimensionMismatch(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, JackStrawError>;
