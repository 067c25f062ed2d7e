//! The local inference collaborator consumed by the server endpoint.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::events::{EventRegistry, TokenEvent};
use crate::shard::Shard;
use crate::tensor::Tensor;
use crate::topology::{NodeId, Topology};

/// Operations a server endpoint delegates to. Implemented by the
/// orchestrator that owns model execution; this layer only moves requests,
/// tensors, and topology information to and from it.
///
/// A `None` tensor from the processing calls means the result is still
/// streaming or pending; it travels the wire as the canonical absent
/// envelope.
#[async_trait]
pub trait InferenceNode: Send + Sync {
    /// Run a text prompt against the given shard.
    async fn process_prompt(
        &self,
        shard: Shard,
        prompt: &str,
        request_id: &str,
    ) -> anyhow::Result<Option<Tensor>>;

    /// Run forwarded activations against the given shard. This is how a
    /// multi-hop pipeline moves intermediate state between stages.
    async fn process_tensor(
        &self,
        shard: Shard,
        tensor: Tensor,
        request_id: &str,
    ) -> anyhow::Result<Option<Tensor>>;

    /// Poll for the terminal result of a request.
    async fn get_inference_result(
        &self,
        request_id: &str,
    ) -> anyhow::Result<(Option<Tensor>, bool)>;

    /// Answer a topology discovery call, recursing into this node's own
    /// peers within the remaining depth budget. Implementations typically
    /// delegate to [`crate::discovery::collect_topology`].
    async fn collect_topology(
        &self,
        visited: BTreeSet<NodeId>,
        max_depth: u32,
    ) -> anyhow::Result<Topology>;

    /// Registry receiving streamed token results pushed by remote nodes.
    fn token_events(&self) -> &EventRegistry<TokenEvent>;

    /// Registry receiving out-of-band status strings pushed by remote nodes.
    fn status_events(&self) -> &EventRegistry<String>;
}
