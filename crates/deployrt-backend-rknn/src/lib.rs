//! RKNN / NPU backend adapter: device-backed, loads `librknnrt.so` via
//! `libloading`. Unlike the GPU backend's one-context-per-thread model,
//! this backend permits multiple concurrent executions sharing a small,
//! fixed-size pool of contexts created once at construction.
//!
//! `preprocess` reserves a context and hands off the actual
//! `rknn_inputs_set`/`rknn_run`/`rknn_outputs_get` sequence to a spawned
//! OS thread, enqueuing its join handle; `inference` waits on that job.
//! A reserved context is always returned to the pool, success or
//! failure (see DESIGN.md for why that matters).

mod error;
mod ffi;

use std::collections::HashMap;
use std::ffi::{c_void, CStr};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use deployrt_core::{Backend, BlockingQueue, DataLocation, PipelinePackage, PooledHandle, Tensor, TensorSet};
use tracing::{debug, error};

pub use error::RknnBackendError;
use ffi::{RknnContext, RknnInput, RknnLibrary, RknnOutput, RKNN_QUERY_INPUT_ATTR, RKNN_QUERY_OUTPUT_ATTR};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RknnInputTensorType {
    U8,
    I8,
    F16,
    F32,
    U32,
    I32,
    I64,
}

impl RknnInputTensorType {
    fn element_byte_size(self) -> usize {
        match self {
            RknnInputTensorType::U8 | RknnInputTensorType::I8 => 1,
            RknnInputTensorType::F16 => 4,
            RknnInputTensorType::F32 => 4,
            RknnInputTensorType::U32 => 4,
            RknnInputTensorType::I32 => 4,
            RknnInputTensorType::I64 => 8,
        }
    }
}

#[derive(Debug, Clone)]
struct BlobDescriptor {
    name: String,
    index: u32,
    element_byte_size: usize,
    shape: Vec<usize>,
}

pub struct RknnPackage {
    tensors: PooledHandle<TensorSet>,
}

impl RknnPackage {
    pub fn new(tensors: PooledHandle<TensorSet>) -> Self {
        Self { tensors }
    }

    pub fn into_tensors(self) -> PooledHandle<TensorSet> {
        self.tensors
    }
}

impl PipelinePackage for RknnPackage {
    fn tensor_set(&self) -> &PooledHandle<TensorSet> {
        &self.tensors
    }

    fn tensor_set_mut(&mut self) -> &mut PooledHandle<TensorSet> {
        &mut self.tensors
    }
}

struct ReservedCtxPtr(*mut c_void);
unsafe impl Send for ReservedCtxPtr {}

/// Points at an in-flight RKNN execution; `inference` waits on it.
struct AsyncJob {
    handle: JoinHandle<bool>,
}

pub struct RknnBackend {
    lib: Arc<RknnLibrary>,
    ctx_pool: Arc<BlockingQueue<RknnContext>>,
    async_jobs: BlockingQueue<AsyncJob>,
    inputs: Vec<BlobDescriptor>,
    outputs: Vec<BlobDescriptor>,
    parallel_ctx_num: usize,
}

impl RknnBackend {
    pub fn load(
        lib_path: &str,
        model_path: impl AsRef<Path>,
        map_blob_type: &HashMap<String, RknnInputTensorType>,
        parallel_ctx_num: usize,
    ) -> Result<Self, RknnBackendError> {
        if parallel_ctx_num == 0 {
            return Err(RknnBackendError::InvalidContextCount {
                value: parallel_ctx_num as i32,
            });
        }

        let lib = Arc::new(RknnLibrary::load(lib_path)?);
        let mut model_data = fs::read(model_path.as_ref()).map_err(|source| RknnBackendError::ReadModel {
            path: model_path.as_ref().to_path_buf(),
            source,
        })?;

        let ctx_pool = Arc::new(BlockingQueue::new(parallel_ctx_num));
        let mut first_ctx = None;
        for i in 0..parallel_ctx_num {
            let ctx = lib
                .init(&mut model_data)
                .map_err(|code| RknnBackendError::InitContext { index: i, code })?;
            if first_ctx.is_none() {
                first_ctx = Some(ctx);
            }
            ctx_pool.push_blocking(ctx);
        }
        let probe_ctx = first_ctx.expect("parallel_ctx_num >= 1");

        let io_num = lib.query_io_num(probe_ctx).map_err(|code| RknnBackendError::Query { code })?;
        let mut inputs = Vec::with_capacity(io_num.n_input as usize);
        for i in 0..io_num.n_input {
            let attr = lib
                .query_tensor_attr(probe_ctx, RKNN_QUERY_INPUT_ATTR, i)
                .map_err(|code| RknnBackendError::Query { code })?;
            inputs.push(Self::descriptor_from_attr(&attr, map_blob_type)?);
        }
        let mut outputs = Vec::with_capacity(io_num.n_output as usize);
        for i in 0..io_num.n_output {
            let attr = lib
                .query_tensor_attr(probe_ctx, RKNN_QUERY_OUTPUT_ATTR, i)
                .map_err(|code| RknnBackendError::Query { code })?;
            outputs.push(Self::descriptor_from_attr(&attr, map_blob_type)?);
        }

        Ok(Self {
            lib,
            ctx_pool,
            async_jobs: BlockingQueue::new(parallel_ctx_num),
            inputs,
            outputs,
            parallel_ctx_num,
        })
    }

    fn descriptor_from_attr(
        attr: &ffi::RknnTensorAttr,
        map_blob_type: &HashMap<String, RknnInputTensorType>,
    ) -> Result<BlobDescriptor, RknnBackendError> {
        let name = unsafe { CStr::from_ptr(attr.name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        let shape: Vec<usize> = attr.dims[..attr.n_dims as usize].iter().map(|d| *d as usize).collect();
        let element_byte_size = map_blob_type
            .get(&name)
            .map(|t| t.element_byte_size())
            .unwrap_or(4);
        Ok(BlobDescriptor {
            name,
            index: attr.index,
            element_byte_size,
            shape,
        })
    }
}

impl Drop for RknnBackend {
    fn drop(&mut self) {
        for _ in 0..self.parallel_ctx_num {
            match self.ctx_pool.try_take() {
                Some(ctx) => {
                    if self.lib.destroy(ctx) != ffi::RKNN_SUCC {
                        error!("failed to destroy rknn context during backend teardown");
                    }
                }
                None => {
                    error!("rknn context pool short during teardown, a context may have leaked");
                }
            }
        }
    }
}

impl Backend for RknnBackend {
    type Package = RknnPackage;

    fn allocate_buffer_set(&self) -> TensorSet {
        let tensors = self
            .inputs
            .iter()
            .chain(self.outputs.iter())
            .map(|blob| Tensor::new(blob.name.clone(), blob.element_byte_size, blob.shape.clone(), false))
            .collect();
        TensorSet::new(tensors)
    }

    /// Reserves a context and hands the actual inference call off to a
    /// spawned thread; that thread returns the context to the pool
    /// itself once done, success or failure.
    fn preprocess(&self, pkg: &mut Self::Package) -> bool {
        let ctx = match self.ctx_pool.take_blocking().value() {
            Some(ctx) => ctx,
            None => {
                error!("rknn context pool drained, cannot reserve a context");
                return false;
            }
        };

        let set = pkg.tensor_set_mut();
        let mut input_ptrs = Vec::with_capacity(self.inputs.len());
        for blob in &self.inputs {
            let tensor = match set.get_mut(&blob.name) {
                Ok(t) => t,
                Err(err) => {
                    error!(blob = %blob.name, error = %err, "missing declared input blob");
                    self.ctx_pool.push_blocking(ctx);
                    return false;
                }
            };
            tensor.set_location(DataLocation::Host);
            let ptr = match tensor.raw_ptr_mut() {
                Ok(p) => p,
                Err(err) => {
                    error!(blob = %blob.name, error = %err, "input blob not writable");
                    self.ctx_pool.push_blocking(ctx);
                    return false;
                }
            };
            input_ptrs.push((blob.index, ReservedCtxPtr(ptr as *mut c_void), tensor.current_byte_size()));
        }
        let mut output_ptrs = Vec::with_capacity(self.outputs.len());
        for blob in &self.outputs {
            let tensor = match set.get_mut(&blob.name) {
                Ok(t) => t,
                Err(err) => {
                    error!(blob = %blob.name, error = %err, "missing declared output blob");
                    self.ctx_pool.push_blocking(ctx);
                    return false;
                }
            };
            tensor.set_location(DataLocation::Host);
            let ptr = match tensor.raw_ptr_mut() {
                Ok(p) => p,
                Err(err) => {
                    error!(blob = %blob.name, error = %err, "output blob not writable");
                    self.ctx_pool.push_blocking(ctx);
                    return false;
                }
            };
            output_ptrs.push((blob.index, ReservedCtxPtr(ptr as *mut c_void), tensor.current_byte_size()));
        }

        let lib = Arc::clone(&self.lib);
        let ctx_pool = Arc::clone(&self.ctx_pool);
        let handle = std::thread::spawn(move || {
            let mut inputs: Vec<RknnInput> = input_ptrs
                .into_iter()
                .map(|(index, ptr, size)| RknnInput {
                    index,
                    buf: ptr.0,
                    size: size as u32,
                    pass_through: 0,
                    type_: 0,
                    fmt: 0,
                })
                .collect();
            let mut outputs: Vec<RknnOutput> = output_ptrs
                .into_iter()
                .map(|(index, ptr, size)| RknnOutput {
                    want_float: 1,
                    is_prealloc: 1,
                    index,
                    buf: ptr.0,
                    size: size as u32,
                })
                .collect();

            let ok = lib.inputs_set(ctx, &mut inputs) == ffi::RKNN_SUCC
                && lib.run(ctx) == ffi::RKNN_SUCC
                && lib.outputs_get(ctx, &mut outputs) == ffi::RKNN_SUCC;

            if !ok {
                error!("rknn inference job failed");
            }
            // Always return the context, success or failure.
            ctx_pool.push_blocking(ctx);
            ok
        });

        self.async_jobs.push_blocking(AsyncJob { handle })
    }

    fn inference(&self, _pkg: &mut Self::Package) -> bool {
        match self.async_jobs.take_blocking().value() {
            Some(job) => job.handle.join().unwrap_or_else(|_| {
                error!("rknn async inference job panicked");
                false
            }),
            None => {
                error!("no pending rknn async job to wait on");
                false
            }
        }
    }

    fn postprocess(&self, _pkg: &mut Self::Package) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_context_count_is_rejected() {
        let result = RknnBackend::load("librknnrt.so", "model.rknn", &HashMap::new(), 0);
        assert!(matches!(result, Err(RknnBackendError::InvalidContextCount { value: 0 })));
    }
}
