//! Model shard identification.
//!
//! A shard names the contiguous layer range of a model that a node executes.
//! Shards are constructed by external partitioning logic and travel through
//! this layer unchanged.

use serde::{Deserialize, Serialize};

use crate::errors::{NetError, Result};

/// A contiguous layer range of a named model assigned to one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shard {
    /// Model identifier (e.g., "llama-3.1-8b")
    pub model_id: String,

    /// First layer executed by this shard (inclusive)
    pub start_layer: u32,

    /// Last layer executed by this shard (inclusive)
    pub end_layer: u32,

    /// Total layer count of the model
    pub n_layers: u32,
}

impl Shard {
    /// Create a shard, enforcing `start_layer <= end_layer < n_layers`.
    pub fn new(
        model_id: impl Into<String>,
        start_layer: u32,
        end_layer: u32,
        n_layers: u32,
    ) -> Result<Self> {
        if start_layer > end_layer || end_layer >= n_layers {
            return Err(NetError::Decode(format!(
                "invalid shard layer range [{start_layer}, {end_layer}] for {n_layers} layers"
            )));
        }
        Ok(Self {
            model_id: model_id.into(),
            start_layer,
            end_layer,
            n_layers,
        })
    }

    /// Whether this shard holds the first layer of the model.
    pub fn is_first_layer(&self) -> bool {
        self.start_layer == 0
    }

    /// Whether this shard holds the last layer of the model.
    pub fn is_last_layer(&self) -> bool {
        self.end_layer == self.n_layers - 1
    }

    /// Number of layers this shard executes.
    pub fn layer_count(&self) -> u32 {
        self.end_layer - self.start_layer + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_new_valid() {
        let shard = Shard::new("llama-3.1-8b", 0, 15, 32).unwrap();
        assert!(shard.is_first_layer());
        assert!(!shard.is_last_layer());
        assert_eq!(shard.layer_count(), 16);
    }

    #[test]
    fn test_shard_last_layer() {
        let shard = Shard::new("llama-3.1-8b", 16, 31, 32).unwrap();
        assert!(!shard.is_first_layer());
        assert!(shard.is_last_layer());
    }

    #[test]
    fn test_shard_single_layer() {
        let shard = Shard::new("m", 5, 5, 10).unwrap();
        assert_eq!(shard.layer_count(), 1);
    }

    #[test]
    fn test_shard_rejects_inverted_range() {
        assert!(Shard::new("m", 8, 4, 32).is_err());
    }

    #[test]
    fn test_shard_rejects_out_of_bounds() {
        assert!(Shard::new("m", 0, 32, 32).is_err());
        assert!(Shard::new("m", 0, 0, 0).is_err());
    }

    #[test]
    fn test_shard_serialization() {
        let shard = Shard::new("mixtral-8x7b", 4, 11, 32).unwrap();
        let json = serde_json::to_string(&shard).unwrap();
        let decoded: Shard = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, shard);
    }
}
