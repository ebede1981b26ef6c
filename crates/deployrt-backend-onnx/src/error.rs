use std::path::PathBuf;

use deployrt_core::RuntimeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OnnxBackendError {
    #[error("failed to load onnx model at {path}")]
    LoadModel {
        path: PathBuf,
        #[source]
        source: ort::Error,
    },

    #[error("onnx model declares dynamic shape for blob '{blob}' with no override supplied")]
    MissingShapeOverride { blob: String },

    #[error("invalid shape override: {message}")]
    InvalidShapeOverride { message: String },

    #[error("onnx session run failed")]
    SessionRun {
        #[source]
        source: ort::Error,
    },

    #[error("unsupported onnx element data type for blob '{blob}'")]
    UnsupportedElementType { blob: String },
}

impl From<OnnxBackendError> for RuntimeError {
    fn from(err: OnnxBackendError) -> Self {
        match err {
            OnnxBackendError::MissingShapeOverride { blob } => RuntimeError::Configuration {
                message: format!("missing shape override for dynamic blob '{blob}'"),
            },
            other => RuntimeError::Configuration {
                message: other.to_string(),
            },
        }
    }
}
