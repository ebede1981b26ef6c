use crate::pool::PooledHandle;
use crate::tensor_set::TensorSet;

/// Capability a pipeline package must expose: access to its embedded
/// pooled tensor-set handle. The pipeline engine itself is generic over
/// any package type with this capability; it never needs to know the
/// rest of the package's shape.
pub trait PipelinePackage {
    fn tensor_set(&self) -> &PooledHandle<TensorSet>;
    fn tensor_set_mut(&mut self) -> &mut PooledHandle<TensorSet>;
}

/// Per-backend (ONNX / GPU-engine / NPU) implementation of the three
/// inference stages plus buffer allocation. Backend crates implement
/// this trait; `deployrt-core` never depends on a concrete backend.
pub trait Backend: Send + Sync + 'static {
    type Package: PipelinePackage + Send + 'static;

    /// Constructs one tensor-set carrying one tensor per model I/O blob.
    /// Called exactly `pool_size` times by the driver at construction.
    fn allocate_buffer_set(&self) -> TensorSet;

    /// Uploads host->device for inputs that need it; identity for
    /// host-only backends.
    fn preprocess(&self, pkg: &mut Self::Package) -> bool;

    /// Looks up (or lazily creates) the calling thread's execution
    /// context, binds I/O tensors, runs the model, waits for completion.
    fn inference(&self, pkg: &mut Self::Package) -> bool;

    /// Downloads device->host for outputs the caller expects on host.
    fn postprocess(&self, pkg: &mut Self::Package) -> bool;
}
