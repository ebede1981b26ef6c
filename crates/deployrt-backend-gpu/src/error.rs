use std::path::PathBuf;

use deployrt_core::RuntimeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpuBackendError {
    #[error("gpu engine file '{path}' does not end in the expected '.engine' suffix")]
    UnexpectedEngineSuffix { path: PathBuf },

    #[error("failed to load serialized gpu engine at {path}")]
    LoadEngine {
        path: PathBuf,
        #[source]
        source: ort::Error,
    },

    #[error("gpu engine declares dynamic shape for blob '{blob}' with no override supplied")]
    MissingShapeOverride { blob: String },

    #[error("invalid shape override: {message}")]
    InvalidShapeOverride { message: String },

    #[error("failed to create execution context for thread")]
    CreateContext {
        #[source]
        source: ort::Error,
    },
}

impl From<GpuBackendError> for RuntimeError {
    fn from(err: GpuBackendError) -> Self {
        RuntimeError::Configuration {
            message: err.to_string(),
        }
    }
}
