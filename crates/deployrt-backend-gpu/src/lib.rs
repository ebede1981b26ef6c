//! GPU-engine backend adapter: device-backed, built on `ort` with a
//! CUDA/TensorRT execution provider. Owns the per-thread execution
//! context cache that is the key concurrency invariant for this backend:
//! only one worker thread touches any one context, and only while
//! inference is in progress for that thread's current package.

mod context_cache;
mod error;

use std::path::{Path, PathBuf};

use deployrt_core::config::ShapeOverrides;
use deployrt_core::{Backend, DataLocation, PipelinePackage, PooledHandle, Tensor, TensorSet};
use tracing::debug;

pub use error::GpuBackendError;
use context_cache::ThreadContextCache;

const ENGINE_SUFFIX: &str = ".engine";

#[derive(Debug, Clone)]
struct BlobInfo {
    name: String,
    element_byte_size: usize,
    shape: Vec<usize>,
}

pub struct GpuPackage {
    tensors: PooledHandle<TensorSet>,
}

impl GpuPackage {
    pub fn new(tensors: PooledHandle<TensorSet>) -> Self {
        Self { tensors }
    }

    pub fn into_tensors(self) -> PooledHandle<TensorSet> {
        self.tensors
    }
}

impl PipelinePackage for GpuPackage {
    fn tensor_set(&self) -> &PooledHandle<TensorSet> {
        &self.tensors
    }

    fn tensor_set_mut(&mut self) -> &mut PooledHandle<TensorSet> {
        &mut self.tensors
    }
}

/// Device-backed backend over a serialized TensorRT engine, loaded
/// through `ort`'s CUDA/TensorRT execution provider.
pub struct GpuBackend {
    engine_path: PathBuf,
    inputs: Vec<BlobInfo>,
    outputs: Vec<BlobInfo>,
    contexts: ThreadContextCache,
}

impl GpuBackend {
    pub fn load(
        engine_path: impl AsRef<Path>,
        shape_overrides: &ShapeOverrides,
    ) -> Result<Self, GpuBackendError> {
        let engine_path = engine_path.as_ref().to_path_buf();
        if engine_path.extension().and_then(|e| e.to_str()) != Some(&ENGINE_SUFFIX[1..]) {
            return Err(GpuBackendError::UnexpectedEngineSuffix { path: engine_path });
        }

        let base_session = Self::build_session(&engine_path).map_err(|source| GpuBackendError::LoadEngine {
            path: engine_path.clone(),
            source,
        })?;

        let known_blob_names: Vec<String> = base_session
            .inputs
            .iter()
            .chain(base_session.outputs.iter())
            .map(|blob| blob.name.clone())
            .collect();
        shape_overrides
            .validate_against(&known_blob_names)
            .map_err(|err| GpuBackendError::InvalidShapeOverride { message: err.to_string() })?;

        let inputs = Self::resolve_blobs(&base_session.inputs, shape_overrides)?;
        let outputs = Self::resolve_blobs(&base_session.outputs, shape_overrides)?;

        Ok(Self {
            engine_path,
            inputs,
            outputs,
            contexts: ThreadContextCache::new(),
        })
    }

    /// Builds one execution context against the serialized engine. Called
    /// once up front to resolve blob metadata, then again by
    /// `ThreadContextCache` the first time each stage worker thread calls
    /// `inference`, so every thread gets its own `ort::session::Session`
    /// bound to its own TensorRT execution context.
    fn build_session(engine_path: &Path) -> Result<ort::session::Session, ort::Error> {
        debug!(path = %engine_path.display(), "loading gpu engine");
        ort::session::Session::builder()?
            .with_execution_providers([
                ort::execution_providers::TensorRTExecutionProvider::default().build(),
                ort::execution_providers::CUDAExecutionProvider::default().build(),
            ])?
            .commit_from_file(engine_path)
    }

    fn resolve_blobs(
        declared: &[ort::session::input::SessionInputInfo],
        shape_overrides: &ShapeOverrides,
    ) -> Result<Vec<BlobInfo>, GpuBackendError> {
        let mut blobs = Vec::with_capacity(declared.len());
        for blob in declared {
            let name = blob.name.clone();
            let shape = if blob.dynamic {
                shape_overrides
                    .get(&name)
                    .map(|s| s.to_vec())
                    .ok_or_else(|| GpuBackendError::MissingShapeOverride { blob: name.clone() })?
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

impl Backend for GpuBackend {
    type Package = GpuPackage;

    fn allocate_buffer_set(&self) -> TensorSet {
        let tensors = self
            .inputs
            .iter()
            .chain(self.outputs.iter())
            .map(|blob| Tensor::new(blob.name.clone(), blob.element_byte_size, blob.shape.clone(), true))
            .collect();
        TensorSet::new(tensors)
    }

    /// Uploads host->device for every input currently on host.
    fn preprocess(&self, pkg: &mut Self::Package) -> bool {
        let set = pkg.tensor_set_mut();
        for blob in &self.inputs {
            let tensor = match set.get_mut(&blob.name) {
                Ok(t) => t,
                Err(err) => {
                    tracing::error!(blob = %blob.name, error = %err, "missing declared input blob");
                    return false;
                }
            };
            if tensor.location() == DataLocation::Host {
                if let Err(err) = tensor.to_location(DataLocation::Device) {
                    tracing::error!(blob = %blob.name, error = %err, "host->device upload failed");
                    return false;
                }
            }
        }
        true
    }

    fn inference(&self, pkg: &mut Self::Package) -> bool {
        let engine_path = self.engine_path.clone();
        let context = match self.contexts.get_or_create(|| Self::build_session(&engine_path)) {
            Ok(context) => context,
            Err(err) => {
                tracing::error!(error = %err, path = %engine_path.display(), "failed to acquire execution context");
                return false;
            }
        };

        let set = pkg.tensor_set_mut();
        let mut inputs: Vec<(&str, ort::value::DynValue)> = Vec::with_capacity(self.inputs.len());
        for blob in &self.inputs {
            let tensor = match set.get_mut(&blob.name) {
                Ok(t) => t,
                Err(err) => {
                    tracing::error!(blob = %blob.name, error = %err, "missing declared input blob");
                    return false;
                }
            };
            let ptr = match tensor.raw_ptr() {
                Ok(ptr) => ptr,
                Err(err) => {
                    tracing::error!(blob = %blob.name, error = %err, "input blob not readable");
                    return false;
                }
            };
            let shape: Vec<i64> = tensor.current_shape().iter().map(|d| *d as i64).collect();
            let bytes = tensor.current_byte_size();
            // SAFETY: `ptr` is valid for `bytes`; exclusivity is guaranteed
            // by the pooled handle discipline.
            let slice = unsafe { std::slice::from_raw_parts(ptr, bytes) };
            match ort::value::Value::from_array((shape, slice.to_vec())) {
                Ok(value) => inputs.push((blob.name.as_str(), value.into_dyn())),
                Err(err) => {
                    tracing::error!(blob = %blob.name, error = %err, "failed to wrap device input as onnx value");
                    return false;
                }
            }
        }

        let outputs = match context.run(inputs) {
            Ok(outputs) => outputs,
            Err(err) => {
                tracing::error!(error = %err, "gpu engine run failed");
                return false;
            }
        };

        for blob in &self.outputs {
            let Some(value) = outputs.get(blob.name.as_str()) else {
                tracing::error!(blob = %blob.name, "engine did not produce declared output blob");
                return false;
            };
            let (_, data) = match value.try_extract_raw_tensor::<u8>() {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::error!(blob = %blob.name, error = %err, "failed to extract output tensor");
                    return false;
                }
            };
            let tensor = match set.get_mut(&blob.name) {
                Ok(t) => t,
                Err(err) => {
                    tracing::error!(blob = %blob.name, error = %err, "missing declared output blob");
                    return false;
                }
            };
            tensor.set_location(DataLocation::Device);
            let ptr = match tensor.raw_ptr_mut() {
                Ok(ptr) => ptr,
                Err(err) => {
                    tracing::error!(blob = %blob.name, error = %err, "output blob not writable");
                    return false;
                }
            };
            // SAFETY: `ptr` is valid for `data.len()` bytes.
            unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len()) };
        }
        true
    }

    /// Downloads device->host for every declared output, so `extract`
    /// (which only ever sees the package after the pipeline's delivery
    /// callback has already run) observes host-visible data.
    fn postprocess(&self, pkg: &mut Self::Package) -> bool {
        let set = pkg.tensor_set_mut();
        for blob in &self.outputs {
            let tensor = match set.get_mut(&blob.name) {
                Ok(t) => t,
                Err(err) => {
                    tracing::error!(blob = %blob.name, error = %err, "missing declared output blob");
                    return false;
                }
            };
            if tensor.location() == DataLocation::Device {
                if let Err(err) = tensor.to_location(DataLocation::Host) {
                    tracing::error!(blob = %blob.name, error = %err, "device->host download failed");
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_engine_file_with_wrong_suffix() {
        let result = GpuBackend::load(PathBuf::from("model.onnx"), &ShapeOverrides::default());
        assert!(matches!(result, Err(GpuBackendError::UnexpectedEngineSuffix { .. })));
    }
}
