use std::collections::HashMap;

use crate::error::{RuntimeError, RuntimeResult};

/// Configuration for a [`crate::pipeline::PipelineEngine`].
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { queue_capacity: 100 }
    }
}

/// Configuration for a [`crate::pool::BufferPool`].
#[derive(Debug, Clone, Copy)]
pub struct BufferPoolConfig {
    pub pool_size: usize,
}

impl BufferPoolConfig {
    pub fn new(pool_size: usize) -> RuntimeResult<Self> {
        if !(1..=100).contains(&pool_size) {
            return Err(RuntimeError::Configuration {
                message: format!("pool size must be in 1..=100, got {pool_size}"),
            });
        }
        Ok(Self { pool_size })
    }
}

/// Caller-supplied shape overrides for models with dynamic input shapes,
/// keyed by blob name. Construction rejects names the model doesn't
/// declare.
#[derive(Debug, Clone, Default)]
pub struct ShapeOverrides {
    shapes: HashMap<String, Vec<usize>>,
}

impl ShapeOverrides {
    pub fn new(shapes: HashMap<String, Vec<usize>>) -> Self {
        Self { shapes }
    }

    pub fn validate_against(&self, known_blob_names: &[String]) -> RuntimeResult<()> {
        for name in self.shapes.keys() {
            if !known_blob_names.iter().any(|n| n == name) {
                return Err(RuntimeError::Configuration {
                    message: format!("shape override references unknown blob name '{name}'"),
                });
            }
        }
        Ok(())
    }

    pub fn get(&self, blob_name: &str) -> Option<&[usize]> {
        self.shapes.get(blob_name).map(|v| v.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_size_bounds_enforced() {
        assert!(BufferPoolConfig::new(0).is_err());
        assert!(BufferPoolConfig::new(101).is_err());
        assert!(BufferPoolConfig::new(1).is_ok());
        assert!(BufferPoolConfig::new(100).is_ok());
    }

    #[test]
    fn shape_override_rejects_unknown_blob() {
        let mut map = HashMap::new();
        map.insert("bogus".to_string(), vec![1, 3]);
        let overrides = ShapeOverrides::new(map);
        assert!(overrides.validate_against(&["input".to_string()]).is_err());
    }
}
