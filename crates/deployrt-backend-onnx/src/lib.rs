//! ONNX Runtime backend adapter: host-backed, built on the `ort` crate.
//!
//! This is the simplest of the three backend variants: no device memory,
//! no per-thread execution context cache. `ort::Session` is internally
//! synchronized, so a single session is shared across all pipeline
//! worker threads behind a mutex.

mod error;

use std::path::Path;
use std::sync::Mutex;

use deployrt_core::config::ShapeOverrides;
use deployrt_core::{Backend, DataLocation, PipelinePackage, PooledHandle, Tensor, TensorSet};
use tracing::debug;

pub use error::OnnxBackendError;

#[derive(Debug, Clone)]
struct BlobInfo {
    name: String,
    element_byte_size: usize,
    shape: Vec<usize>,
}

/// Minimal pipeline package for the ONNX backend: just the pooled
/// tensor-set handle. Application-specific input/output shaping is the
/// caller's concern, supplied through the `build`/`extract` closures
/// passed to `InferenceDriver::run_sync`/`run_async`.
pub struct OnnxPackage {
    tensors: PooledHandle<TensorSet>,
}

impl OnnxPackage {
    pub fn new(tensors: PooledHandle<TensorSet>) -> Self {
        Self { tensors }
    }

    pub fn into_tensors(self) -> PooledHandle<TensorSet> {
        self.tensors
    }
}

impl PipelinePackage for OnnxPackage {
    fn tensor_set(&self) -> &PooledHandle<TensorSet> {
        &self.tensors
    }

    fn tensor_set_mut(&mut self) -> &mut PooledHandle<TensorSet> {
        &mut self.tensors
    }
}

/// Host-backed ONNX Runtime adapter.
pub struct OnnxBackend {
    session: Mutex<ort::session::Session>,
    inputs: Vec<BlobInfo>,
    outputs: Vec<BlobInfo>,
}

impl OnnxBackend {
    /// Loads an ONNX model from `path`. Blob shapes are resolved from the
    /// model's declared static shapes; any dynamic dimension must be
    /// supplied via `shape_overrides`, keyed by blob name, or loading
    /// fails with `MissingShapeOverride`.
    pub fn load(
        path: impl AsRef<Path>,
        num_threads: usize,
        shape_overrides: &ShapeOverrides,
    ) -> Result<Self, OnnxBackendError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading onnx model");
        let session = ort::session::Session::builder()
            .map_err(|source| OnnxBackendError::LoadModel {
                path: path.to_path_buf(),
                source,
            })?
            .with_intra_threads(num_threads)
            .map_err(|source| OnnxBackendError::LoadModel {
                path: path.to_path_buf(),
                source,
            })?
            .commit_from_file(path)
            .map_err(|source| OnnxBackendError::LoadModel {
                path: path.to_path_buf(),
                source,
            })?;

        let known_blob_names: Vec<String> = session
            .inputs
            .iter()
            .chain(session.outputs.iter())
            .map(|blob| blob.name.clone())
            .collect();
        shape_overrides
            .validate_against(&known_blob_names)
            .map_err(|err| OnnxBackendError::InvalidShapeOverride { message: err.to_string() })?;

        let inputs = Self::resolve_blobs(&session.inputs, shape_overrides)?;
        let outputs = Self::resolve_blobs(&session.outputs, shape_overrides)?;

        Ok(Self {
            session: Mutex::new(session),
            inputs,
            outputs,
        })
    }

    fn resolve_blobs(
        declared: &[ort::session::input::SessionInputInfo],
        shape_overrides: &ShapeOverrides,
    ) -> Result<Vec<BlobInfo>, OnnxBackendError> {
        let mut blobs = Vec::with_capacity(declared.len());
        for blob in declared {
            let name = blob.name.clone();
            let shape = if blob.dynamic {
                shape_overrides
                    .get(&name)
                    .map(|s| s.to_vec())
                    .ok_or_else(|| OnnxBackendError::MissingShapeOverride { blob: name.clone() })?
            } else {
                blob.shape.clone()
            };
            blobs.push(BlobInfo {
                name,
                element_byte_size: blob.element_byte_size,
                shape,
            });
        }
        Ok(blobs)
    }
}

impl Backend for OnnxBackend {
    type Package = OnnxPackage;

    fn allocate_buffer_set(&self) -> TensorSet {
        let tensors = self
            .inputs
            .iter()
            .chain(self.outputs.iter())
            .map(|blob| Tensor::new(blob.name.clone(), blob.element_byte_size, blob.shape.clone(), false))
            .collect();
        TensorSet::new(tensors)
    }

    fn preprocess(&self, _pkg: &mut Self::Package) -> bool {
        // Host-only backend: inputs are already where the model expects them.
        true
    }

    fn inference(&self, pkg: &mut Self::Package) -> bool {
        let set = pkg.tensor_set_mut();

        let mut inputs: Vec<(&str, ort::value::DynValue)> = Vec::with_capacity(self.inputs.len());
        for blob in &self.inputs {
            let tensor = match set.get_mut(&blob.name) {
                Ok(tensor) => tensor,
                Err(err) => {
                    tracing::error!(blob = %blob.name, error = %err, "missing declared input blob");
                    return false;
                }
            };
            tensor.set_location(DataLocation::Host);
            let ptr = match tensor.raw_ptr() {
                Ok(ptr) => ptr,
                Err(err) => {
                    tracing::error!(blob = %blob.name, error = %err, "input blob has no readable host data");
                    return false;
                }
            };
            let shape: Vec<i64> = tensor.current_shape().iter().map(|d| *d as i64).collect();
            let bytes = tensor.current_byte_size();
            // SAFETY: `ptr` is valid for `bytes` for the duration of this call;
            // the pooled handle guarantees exclusive access to the tensor-set.
            let slice = unsafe { std::slice::from_raw_parts(ptr, bytes) };
            match ort::value::Value::from_array((shape, slice.to_vec())) {
                Ok(value) => inputs.push((blob.name.as_str(), value.into_dyn())),
                Err(err) => {
                    tracing::error!(blob = %blob.name, error = %err, "failed to wrap input buffer as onnx value");
                    return false;
                }
            }
        }

        let session = self.session.lock().unwrap();
        debug!(inputs = ?self.inputs.iter().map(|b| b.name.as_str()).collect::<Vec<_>>(), "running onnx session");
        let outputs = match session.run(inputs) {
            Ok(outputs) => outputs,
            Err(err) => {
                tracing::error!(error = %err, "onnx session run failed");
                return false;
            }
        };

        for blob in &self.outputs {
            let Some(value) = outputs.get(blob.name.as_str()) else {
                tracing::error!(blob = %blob.name, "onnx session did not produce declared output blob");
                return false;
            };
            let (_, data) = match value.try_extract_raw_tensor::<u8>() {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::error!(blob = %blob.name, error = %err, "failed to extract onnx output tensor");
                    return false;
                }
            };
            let tensor = match set.get_mut(&blob.name) {
                Ok(tensor) => tensor,
                Err(err) => {
                    tracing::error!(blob = %blob.name, error = %err, "missing declared output blob");
                    return false;
                }
            };
            tensor.set_location(DataLocation::Host);
            let ptr = match tensor.raw_ptr_mut() {
                Ok(ptr) => ptr,
                Err(err) => {
                    tracing::error!(blob = %blob.name, error = %err, "output blob has no writable host data");
                    return false;
                }
            };
            // SAFETY: `ptr` is valid for `data.len()` bytes; ort guarantees
            // `data` is no larger than the tensor's declared byte size.
            unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len()) };
        }
        true
    }

    fn postprocess(&self, _pkg: &mut Self::Package) -> bool {
        // Host-only backend: outputs are already host-visible.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_info_construction_carries_declared_shape() {
        let blob = BlobInfo {
            name: "input".to_string(),
            element_byte_size: 4,
            shape: vec![1, 3, 224, 224],
        };
        assert_eq!(blob.shape, vec![1, 3, 224, 224]);
    }
}
