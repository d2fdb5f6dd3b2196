use thiserror::Error;

/// Result alias for the numerical core.
pub type AlignResult<T> = std::result::Result<T, AlignError>;

/// Failures raised by the transform, metric, model and session layers.
///
/// Cancellation and cap exhaustion are not errors; they are reported as
/// [`RunStatus`](crate::algorithms::RunStatus) values on a successful run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AlignError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(
        "crop borders (horizontal {horizontal}, top {top}, bottom {bottom}) leave a {width}x{height} image"
    )]
    InvalidCrop {
        horizontal: u32,
        top: u32,
        bottom: u32,
        width: i64,
        height: i64,
    },

    #[error("image shapes differ: {left:?} vs {right:?}")]
    ShapeMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },

    #[error("numeric error: {0}")]
    Numeric(String),

    #[error("another alignment action is already running")]
    Busy,
}

impl AlignError {
    /// True for the failures that abort an optimization run.
    pub fn aborts_run(&self) -> bool {
        matches!(
            self,
            AlignError::InvalidCrop { .. } | AlignError::Numeric(_) | AlignError::ShapeMismatch { .. }
        )
    }
}
