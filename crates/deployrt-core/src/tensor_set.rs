use std::collections::HashMap;

use crate::error::{RuntimeError, RuntimeResult};
use crate::pool::Resettable;
use crate::tensor::Tensor;

/// A name → tensor mapping for one model's full set of I/O blobs.
///
/// Built once by a backend adapter's `allocate_buffer_set`; membership
/// never changes afterward, only the tensors' shapes/contents/locations.
#[derive(Debug)]
pub struct TensorSet {
    tensors: HashMap<String, Tensor>,
    order: Vec<String>,
}

impl TensorSet {
    pub fn new(tensors: Vec<Tensor>) -> Self {
        let order = tensors.iter().map(|t| t.name().to_string()).collect();
        let tensors = tensors.into_iter().map(|t| (t.name().to_string(), t)).collect();
        Self { tensors, order }
    }

    pub fn get(&self, name: &str) -> RuntimeResult<&Tensor> {
        self.tensors.get(name).ok_or_else(|| RuntimeError::ShapeOrAccess {
            message: format!("unknown blob name '{name}'"),
        })
    }

    pub fn get_mut(&mut self, name: &str) -> RuntimeResult<&mut Tensor> {
        self.tensors.get_mut(name).ok_or_else(|| RuntimeError::ShapeOrAccess {
            message: format!("unknown blob name '{name}'"),
        })
    }

    pub fn size(&self) -> usize {
        self.tensors.len()
    }

    /// Names in the order the backend declared them at allocation time.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Returns every tensor to default shape and host location.
    pub fn reset(&mut self) {
        for tensor in self.tensors.values_mut() {
            tensor.reset();
        }
    }
}

impl Resettable for TensorSet {
    fn reset(&mut self) {
        TensorSet::reset(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    fn make_set() -> TensorSet {
        TensorSet::new(vec![
            Tensor::new("input", 4, vec![1, 3, 224, 224], false),
            Tensor::new("output", 4, vec![1, 1000], false),
        ])
    }

    #[test]
    fn get_unknown_name_errors() {
        let set = make_set();
        assert!(set.get("missing").is_err());
        assert!(set.get("input").is_ok());
    }

    #[test]
    fn reset_resets_every_tensor() {
        let mut set = make_set();
        set.get_mut("input").unwrap().set_shape(vec![1, 3, 64, 64]).unwrap();
        set.reset();
        assert_eq!(set.get("input").unwrap().current_shape(), &[1, 3, 224, 224]);
    }

    #[test]
    fn size_matches_constructed_blob_count() {
        let set = make_set();
        assert_eq!(set.size(), 2);
    }
}
