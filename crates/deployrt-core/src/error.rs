use thiserror::Error;

/// Unified error type for the pipeline runtime.
///
/// Backend crates define their own `thiserror` enums for loader and
/// allocation failures and convert them into this type at the trait
/// boundary (one `From` impl per backend error enum).
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("resource exhausted: {detail}")]
    ResourceExhausted { detail: String },

    #[error("stage '{stage}' failed: {message}")]
    StageFailed { stage: String, message: String },

    #[error("tensor shape or access error: {message}")]
    ShapeOrAccess { message: String },

    #[error("operation rejected, queue is disabled")]
    Rejected,

    #[error("queue drained, no more input")]
    Drained,

    #[error("pipeline is shutting down")]
    ShuttingDown,
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
