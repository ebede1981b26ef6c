use std::sync::{Arc, Mutex};

use futures::channel::oneshot;

use crate::backend::Backend;
use crate::error::{RuntimeError, RuntimeResult};
use crate::pipeline::PipelineEngine;
use crate::pool::{BufferPool, PooledHandle};
use crate::stage::Stage;
use crate::tensor_set::TensorSet;

/// Composes a [`PipelineEngine`] with a backend's preprocess/inference/
/// postprocess stages and owns the buffer pool those stages draw from.
///
/// Field order matters: `pipeline` is dropped first (joining every
/// worker and abandoning in-flight packages, which returns their pool
/// handles), then `pool` (freeing the backing tensor-sets), and only
/// then `backend`. Device memory must be freed before backend teardown.
pub struct InferenceDriver<B: Backend> {
    pipeline: Mutex<PipelineEngine<B::Package>>,
    pool: Arc<BufferPool<TensorSet>>,
    backend: Arc<B>,
}

impl<B: Backend> InferenceDriver<B> {
    pub fn new(backend: B, pool_size: usize, queue_capacity: usize) -> RuntimeResult<Self> {
        if !(1..=100).contains(&pool_size) {
            return Err(RuntimeError::Configuration {
                message: format!("pool size must be in 1..=100, got {pool_size}"),
            });
        }
        let backend = Arc::new(backend);

        let alloc_backend = Arc::clone(&backend);
        let pool = Arc::new(BufferPool::new(pool_size, move || alloc_backend.allocate_buffer_set()));

        let pre_backend = Arc::clone(&backend);
        let infer_backend = Arc::clone(&backend);
        let post_backend = Arc::clone(&backend);
        let stages = vec![
            Stage::new("preprocess", move |pkg: &mut B::Package| pre_backend.preprocess(pkg)),
            Stage::new("inference", move |pkg: &mut B::Package| infer_backend.inference(pkg)),
            Stage::new("postprocess", move |pkg: &mut B::Package| post_backend.postprocess(pkg)),
        ];
        let mut pipeline = PipelineEngine::new("inference-driver", stages);
        pipeline.start(queue_capacity);

        Ok(Self {
            pipeline: Mutex::new(pipeline),
            pool,
            backend,
        })
    }

    pub fn start_pipeline(&self, queue_capacity: usize) {
        self.pipeline.lock().unwrap().start(queue_capacity);
    }

    pub fn stop_pipeline(&self) {
        let pipeline = self.pipeline.lock().unwrap();
        pipeline.signal_no_more_input();
        pipeline.join();
    }

    pub fn pool_remaining(&self) -> usize {
        self.pool.remaining()
    }

    /// Runs preprocess -> inference -> postprocess directly on the
    /// calling thread, bypassing the pipeline engine entirely. Any stage
    /// failure fails the whole call; the handle returns to the pool
    /// unconditionally via `build`'s package being dropped on return.
    pub fn run_sync<R>(
        &self,
        build: impl FnOnce(PooledHandle<TensorSet>) -> B::Package,
        extract: impl FnOnce(B::Package) -> R,
    ) -> RuntimeResult<R> {
        let handle = self
            .pool
            .acquire(true)
            .ok_or_else(|| RuntimeError::ResourceExhausted {
                detail: "buffer pool exhausted on blocking acquire".to_string(),
            })?;
        let mut pkg = build(handle);

        if !self.backend.preprocess(&mut pkg) {
            return Err(RuntimeError::StageFailed {
                stage: "preprocess".to_string(),
                message: "preprocess returned failure".to_string(),
            });
        }
        if !self.backend.inference(&mut pkg) {
            return Err(RuntimeError::StageFailed {
                stage: "inference".to_string(),
                message: "inference returned failure".to_string(),
            });
        }
        if !self.backend.postprocess(&mut pkg) {
            return Err(RuntimeError::StageFailed {
                stage: "postprocess".to_string(),
                message: "postprocess returned failure".to_string(),
            });
        }
        Ok(extract(pkg))
    }

    /// Acquires a pooled handle (blocking unless `cover_oldest`), wraps it
    /// in a package with a completion callback that fulfils a one-shot
    /// channel, and submits it to the pipeline. A non-blocking acquire
    /// that finds the pool exhausted returns a receiver whose sender was
    /// never created — it resolves to `Err(Canceled)` the moment it is
    /// polled, without surfacing as an error here.
    pub fn run_async<R: Send + 'static>(
        &self,
        cover_oldest: bool,
        build: impl FnOnce(PooledHandle<TensorSet>) -> B::Package,
        extract: impl FnOnce(B::Package) -> R + Send + 'static,
    ) -> oneshot::Receiver<R> {
        let (tx, rx) = oneshot::channel();
        let handle = match self.pool.acquire(!cover_oldest) {
            Some(handle) => handle,
            None => return rx,
        };
        let pkg = build(handle);
        let callback: Box<dyn FnOnce(B::Package) + Send> = Box::new(move |pkg: B::Package| {
            let _ = tx.send(extract(pkg));
        });

        let pipeline = self.pipeline.lock().unwrap();
        let submitted = if cover_oldest {
            pipeline.submit_cover(pkg, Some(callback))
        } else {
            pipeline.submit(pkg, Some(callback))
        };
        // On rejection the package (and its callback, holding `tx`) were
        // already dropped inside `submit`/`submit_cover`; `rx` resolves to
        // `Err(Canceled)` on its own once polled.
        if let Err(err) = submitted {
            tracing::warn!(error = %err, "run_async submission rejected");
        }
        rx
    }
}
