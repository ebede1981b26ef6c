use crate::error::{RuntimeError, RuntimeResult};

/// Where a tensor's active memory region currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLocation {
    Host,
    Device,
    Unknown,
}

/// A named, typed buffer for a single model input or output.
///
/// A tensor always owns a host region. Backends that need device memory
/// (GPU engines) additionally own a device region; host-only backends
/// (ONNX running on CPU) leave `device` empty. `current_shape` may never
/// describe a footprint larger than `default_shape`'s.
#[derive(Debug)]
pub struct Tensor {
    name: String,
    element_byte_size: usize,
    default_shape: Vec<usize>,
    current_shape: Vec<usize>,
    host: Vec<u8>,
    device: Option<Vec<u8>>,
    location: DataLocation,
}

fn footprint(element_byte_size: usize, shape: &[usize]) -> usize {
    element_byte_size * shape.iter().product::<usize>()
}

impl Tensor {
    /// Allocates a tensor with a host region of the default shape's
    /// footprint. `has_device` additionally allocates a same-sized device
    /// region, for backends that operate on device memory.
    pub fn new(
        name: impl Into<String>,
        element_byte_size: usize,
        default_shape: Vec<usize>,
        has_device: bool,
    ) -> Self {
        let max_bytes = footprint(element_byte_size, &default_shape);
        let device = has_device.then(|| vec![0u8; max_bytes]);
        Self {
            name: name.into(),
            element_byte_size,
            current_shape: default_shape.clone(),
            default_shape,
            host: vec![0u8; max_bytes],
            device,
            location: DataLocation::Host,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element_byte_size(&self) -> usize {
        self.element_byte_size
    }

    pub fn default_shape(&self) -> &[usize] {
        &self.default_shape
    }

    pub fn current_shape(&self) -> &[usize] {
        &self.current_shape
    }

    pub fn location(&self) -> DataLocation {
        self.location
    }

    pub fn default_byte_size(&self) -> usize {
        footprint(self.element_byte_size, &self.default_shape)
    }

    pub fn current_byte_size(&self) -> usize {
        footprint(self.element_byte_size, &self.current_shape)
    }

    /// Declares where the caller has just written data. Does not copy.
    pub fn set_location(&mut self, loc: DataLocation) {
        self.location = loc;
    }

    /// Sets the current shape. Rejected if its footprint exceeds the
    /// default shape's footprint (the shape-budget invariant).
    pub fn set_shape(&mut self, shape: Vec<usize>) -> RuntimeResult<()> {
        let requested = footprint(self.element_byte_size, &shape);
        if requested > self.default_byte_size() {
            return Err(RuntimeError::ShapeOrAccess {
                message: format!(
                    "shape {shape:?} exceeds default footprint for tensor '{}'",
                    self.name
                ),
            });
        }
        self.current_shape = shape;
        Ok(())
    }

    /// Returns a pointer to the buffer at the current location. Reading
    /// at `Unknown` location is a programmer error.
    pub fn raw_ptr(&self) -> RuntimeResult<*const u8> {
        match self.location {
            DataLocation::Host => Ok(self.host.as_ptr()),
            DataLocation::Device => self
                .device
                .as_ref()
                .map(|d| d.as_ptr())
                .ok_or_else(|| RuntimeError::ShapeOrAccess {
                    message: format!("tensor '{}' has no device region", self.name),
                }),
            DataLocation::Unknown => Err(RuntimeError::ShapeOrAccess {
                message: format!("tensor '{}' read at unknown location", self.name),
            }),
        }
    }

    pub fn raw_ptr_mut(&mut self) -> RuntimeResult<*mut u8> {
        match self.location {
            DataLocation::Host => Ok(self.host.as_mut_ptr()),
            DataLocation::Device => self
                .device
                .as_mut()
                .map(|d| d.as_mut_ptr())
                .ok_or_else(|| RuntimeError::ShapeOrAccess {
                    message: format!("tensor '{}' has no device region", self.name),
                }),
            DataLocation::Unknown => Err(RuntimeError::ShapeOrAccess {
                message: format!("tensor '{}' written at unknown location", self.name),
            }),
        }
    }

    /// Ensures the buffer is readable at `loc`. Copies host<->device if
    /// both regions exist and the current tag differs; no-ops if already
    /// at `loc`. Errors if `loc` requires a region this tensor lacks.
    pub fn to_location(&mut self, loc: DataLocation) -> RuntimeResult<()> {
        if self.location == loc {
            return Ok(());
        }
        match (self.location, loc) {
            (DataLocation::Host, DataLocation::Device) => {
                let bytes = self.current_byte_size();
                let device = self.device.as_mut().ok_or_else(|| RuntimeError::ShapeOrAccess {
                    message: format!("tensor '{}' has no device region", self.name),
                })?;
                device[..bytes].copy_from_slice(&self.host[..bytes]);
                self.location = DataLocation::Device;
                Ok(())
            }
            (DataLocation::Device, DataLocation::Host) => {
                let bytes = self.current_byte_size();
                let device = self.device.as_ref().ok_or_else(|| RuntimeError::ShapeOrAccess {
                    message: format!("tensor '{}' has no device region", self.name),
                })?;
                self.host[..bytes].copy_from_slice(&device[..bytes]);
                self.location = DataLocation::Host;
                Ok(())
            }
            _ => Err(RuntimeError::ShapeOrAccess {
                message: format!(
                    "tensor '{}' cannot move from {:?} to {:?}",
                    self.name, self.location, loc
                ),
            }),
        }
    }

    /// Adopts `other`'s active region and location tag directly, with no
    /// memcpy: `other`'s host/device buffers are swapped into `self`,
    /// leaving `other` holding what used to be `self`'s regions. Only
    /// valid when `other` is at a readable location.
    pub fn zero_copy(&mut self, other: &mut Tensor) -> RuntimeResult<()> {
        if other.location == DataLocation::Unknown {
            return Err(RuntimeError::ShapeOrAccess {
                message: format!("source tensor '{}' has unknown location", other.name),
            });
        }
        std::mem::swap(&mut self.host, &mut other.host);
        std::mem::swap(&mut self.device, &mut other.device);
        self.current_shape = other.current_shape.clone();
        self.location = other.location;
        Ok(())
    }

    /// Memcpys `other`'s bytes into this tensor's own region, preserving
    /// `other`'s location tag on `self`.
    pub fn deep_copy(&mut self, other: &Tensor) -> RuntimeResult<()> {
        let bytes = other.current_byte_size();
        if footprint(self.element_byte_size, &self.default_shape) < bytes {
            return Err(RuntimeError::ShapeOrAccess {
                message: format!(
                    "tensor '{}' too small to receive {} bytes from '{}'",
                    self.name, bytes, other.name
                ),
            });
        }
        match other.location {
            DataLocation::Host => {
                self.host[..bytes].copy_from_slice(&other.host[..bytes]);
                self.location = DataLocation::Host;
            }
            DataLocation::Device => {
                let src = other.device.as_ref().ok_or_else(|| RuntimeError::ShapeOrAccess {
                    message: format!("source tensor '{}' has no device region", other.name),
                })?;
                let dst = self.device.get_or_insert_with(|| vec![0u8; self.host.len()]);
                dst[..bytes].copy_from_slice(&src[..bytes]);
                self.location = DataLocation::Device;
            }
            DataLocation::Unknown => {
                return Err(RuntimeError::ShapeOrAccess {
                    message: format!("source tensor '{}' has unknown location", other.name),
                })
            }
        }
        self.current_shape = other.current_shape.clone();
        Ok(())
    }

    /// Returns this tensor to default shape and host location.
    pub fn reset(&mut self) {
        self.current_shape = self.default_shape.clone();
        self.location = DataLocation::Host;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_budget_enforced() {
        let mut t = Tensor::new("x", 4, vec![1, 3, 8, 8], false);
        assert!(t.set_shape(vec![1, 3, 4, 4]).is_ok());
        assert!(t.set_shape(vec![1, 3, 16, 16]).is_err());
    }

    #[test]
    fn to_location_round_trip() {
        let mut t = Tensor::new("x", 4, vec![1, 2], true);
        t.set_location(DataLocation::Host);
        assert!(t.to_location(DataLocation::Device).is_ok());
        assert_eq!(t.location(), DataLocation::Device);
        assert!(t.to_location(DataLocation::Host).is_ok());
        assert_eq!(t.location(), DataLocation::Host);
    }

    #[test]
    fn raw_ptr_unknown_location_errors() {
        let mut t = Tensor::new("x", 4, vec![1], false);
        t.set_location(DataLocation::Unknown);
        assert!(t.raw_ptr().is_err());
    }

    #[test]
    fn zero_copy_adopts_region_without_copying_bytes() {
        let mut src = Tensor::new("src", 4, vec![1, 4], false);
        src.set_location(DataLocation::Host);
        let src_ptr = src.raw_ptr().unwrap();

        let mut dst = Tensor::new("dst", 4, vec![1, 4], false);
        dst.zero_copy(&mut src).unwrap();

        assert_eq!(dst.raw_ptr().unwrap(), src_ptr);
        assert_eq!(dst.location(), DataLocation::Host);
    }

    #[test]
    fn reset_restores_default_shape_and_host() {
        let mut t = Tensor::new("x", 4, vec![1, 4], true);
        t.set_shape(vec![1, 2]).unwrap();
        t.set_location(DataLocation::Device);
        t.reset();
        assert_eq!(t.current_shape(), &[1, 4]);
        assert_eq!(t.location(), DataLocation::Host);
    }
}
