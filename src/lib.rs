//! shardlink: peer-to-peer transport and topology discovery for a sharded
//! model inference cluster.
//!
//! Nodes exchange prompts, intermediate tensors, and streamed results over
//! a length-prefixed CBOR wire protocol, and collectively discover the
//! cluster's connectivity graph through a bounded-depth recursive protocol.
//! Model execution itself is owned by an [`InferenceNode`] implementation
//! supplied by the embedding orchestrator.

pub mod config;
pub mod device;
pub mod discovery;
pub mod errors;
pub mod events;
pub mod network;
pub mod node;
pub mod observability;
pub mod shard;
pub mod tensor;
pub mod topology;

pub use config::{NetConfig, RetryPolicy};
pub use device::{DeviceCapabilities, DeviceFlops};
pub use errors::{NetError, Result};
pub use events::{EventRegistry, TokenEvent};
pub use network::protocol::generate_request_id;
pub use network::{PeerHandle, ServerEndpoint};
pub use node::InferenceNode;
pub use shard::Shard;
pub use tensor::{Dtype, Tensor, TensorEnvelope};
pub use topology::{NodeId, Topology};
