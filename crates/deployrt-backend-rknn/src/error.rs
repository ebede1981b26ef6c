use std::path::PathBuf;

use deployrt_core::RuntimeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RknnBackendError {
    #[error("parallel_ctx_num must be >= 1, got {value}")]
    InvalidContextCount { value: i32 },

    #[error("failed to load librknnrt.so dynamic library")]
    LoadLibrary {
        #[source]
        source: libloading::Error,
    },

    #[error("failed to read rknn model from {path}")]
    ReadModel {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rknn_init failed for context {index} with status code {code}")]
    InitContext { index: usize, code: i32 },

    #[error("rknn_query failed with status code {code}")]
    Query { code: i32 },

    #[error("input tensor type for blob '{blob}' has no declared byte size")]
    UnsupportedElementType { blob: String },
}

impl From<RknnBackendError> for RuntimeError {
    fn from(err: RknnBackendError) -> Self {
        RuntimeError::Configuration {
            message: err.to_string(),
        }
    }
}
