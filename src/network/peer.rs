//! Client-side handle for one remote node.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::config::NetConfig;
use crate::device::DeviceCapabilities;
use crate::errors::{NetError, Result};
use crate::network::connection::Connection;
use crate::network::protocol::{Request, Response};
use crate::shard::Shard;
use crate::tensor::{Tensor, TensorEnvelope};
use crate::topology::{NodeId, Topology};

/// One remote node and its outbound connection.
///
/// The handle owns the connection lifecycle exclusively: `Disconnected ->
/// Connecting -> Ready`, back to `Disconnected` on explicit close or
/// transport failure. All RPCs ensure a live connection first and retry
/// transient failures per the configured policy before surfacing them.
pub struct PeerHandle {
    id: NodeId,
    address: String,
    capabilities: DeviceCapabilities,
    config: NetConfig,
    // Single slot guarded by an async mutex: concurrent connect() callers
    // serialize here, so exactly one underlying connection is established.
    conn: Mutex<Option<Arc<Connection>>>,
}

impl PeerHandle {
    pub fn new(
        id: impl Into<NodeId>,
        address: impl Into<String>,
        capabilities: DeviceCapabilities,
    ) -> Self {
        Self::with_config(id, address, capabilities, NetConfig::default())
    }

    pub fn with_config(
        id: impl Into<NodeId>,
        address: impl Into<String>,
        capabilities: DeviceCapabilities,
        config: NetConfig,
    ) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            capabilities,
            config,
            conn: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Establish the connection if none is live. Idempotent; blocks until
    /// the transport is ready or the connect deadline elapses.
    pub async fn connect(&self) -> Result<()> {
        self.ensure_connected().await.map(|_| ())
    }

    /// Whether a connection exists and the transport reports ready.
    pub async fn is_connected(&self) -> bool {
        self.conn
            .lock()
            .await
            .as_ref()
            .is_some_and(|conn| conn.is_ready())
    }

    /// Close and clear the connection. Idempotent; in-flight calls fail.
    pub async fn disconnect(&self) {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.close();
            tracing::debug!(peer = %self.id, "disconnected");
        }
    }

    async fn ensure_connected(&self) -> Result<Arc<Connection>> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            if conn.is_ready() {
                return Ok(conn.clone());
            }
            // Stale connection from an earlier transport failure
            slot.take();
        }

        tracing::debug!(peer = %self.id, address = %self.address, "connecting");
        let stream = timeout(self.config.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| NetError::ConnectionTimeout {
                peer: self.id.clone(),
                timeout: self.config.connect_timeout,
            })?
            .map_err(|e| NetError::Unavailable(format!("dial {}: {e}", self.address)))?;
        let _ = stream.set_nodelay(true);

        let conn = Arc::new(Connection::spawn(stream, &self.config));
        *slot = Some(conn.clone());
        tracing::debug!(peer = %self.id, "connection ready");
        Ok(conn)
    }

    /// Drop a connection that died under us so the next attempt redials.
    async fn clear_dead_connection(&self) {
        let mut slot = self.conn.lock().await;
        if slot.as_ref().is_some_and(|conn| !conn.is_ready()) {
            if let Some(conn) = slot.take() {
                conn.close();
            }
        }
    }

    /// Issue a call, retrying transient failures with bounded backoff.
    async fn call(&self, request: Request) -> Result<Response> {
        let retry = &self.config.retry;
        let mut backoff = retry.initial_backoff;
        let mut attempt = 1u32;
        loop {
            let result = match self.ensure_connected().await {
                Ok(conn) => conn.call(request.clone()).await,
                Err(e) => Err(e),
            };
            match result {
                Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                    tracing::debug!(
                        peer = %self.id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "transient transport failure, retrying"
                    );
                    self.clear_dead_connection().await;
                    tokio::time::sleep(backoff).await;
                    backoff = retry.next_backoff(backoff);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Lightweight liveness probe. Never errors: any failure within the
    /// deadline is reported as `false`.
    pub async fn health_check(&self) -> bool {
        let probe = self.call(Request::HealthCheck);
        match timeout(self.config.health_check_timeout, probe).await {
            Ok(Ok(Response::HealthCheck { is_healthy })) => is_healthy,
            Ok(Ok(_)) | Ok(Err(_)) => {
                tracing::debug!(peer = %self.id, address = %self.address, "health check failed");
                false
            }
            Err(_) => {
                tracing::debug!(peer = %self.id, address = %self.address, "health check timed out");
                false
            }
        }
    }

    /// Submit a text prompt tagged with a shard and correlation id. `None`
    /// means the remote is still streaming or pending.
    pub async fn send_prompt(
        &self,
        shard: &Shard,
        prompt: &str,
        request_id: &str,
    ) -> Result<Option<Tensor>> {
        let response = self
            .call(Request::SendPrompt {
                shard: shard.clone(),
                prompt: prompt.to_string(),
                request_id: request_id.to_string(),
            })
            .await?;
        match response {
            Response::Tensor(envelope) => envelope.decode(),
            other => Err(NetError::Decode(format!(
                "unexpected response to SendPrompt: {other:?}"
            ))),
        }
    }

    /// Forward activations to the next pipeline stage. Same return contract
    /// as [`send_prompt`](Self::send_prompt).
    pub async fn send_tensor(
        &self,
        shard: &Shard,
        tensor: &Tensor,
        request_id: &str,
    ) -> Result<Option<Tensor>> {
        let response = self
            .call(Request::SendTensor {
                shard: shard.clone(),
                tensor: TensorEnvelope::from_tensor(tensor),
                request_id: request_id.to_string(),
            })
            .await?;
        match response {
            Response::Tensor(envelope) => envelope.decode(),
            other => Err(NetError::Decode(format!(
                "unexpected response to SendTensor: {other:?}"
            ))),
        }
    }

    /// Poll for the terminal result of a request.
    pub async fn get_inference_result(&self, request_id: &str) -> Result<(Option<Tensor>, bool)> {
        let response = self
            .call(Request::GetInferenceResult {
                request_id: request_id.to_string(),
            })
            .await?;
        match response {
            Response::InferenceResult {
                tensor,
                is_finished,
            } => Ok((tensor.decode()?, is_finished)),
            other => Err(NetError::Decode(format!(
                "unexpected response to GetInferenceResult: {other:?}"
            ))),
        }
    }

    /// Query the remote node's view of the cluster graph. `visited` is the
    /// snapshot of node ids already traversed in this discovery chain;
    /// `max_depth` is the remaining recursion budget.
    pub async fn collect_topology(
        &self,
        visited: &BTreeSet<NodeId>,
        max_depth: u32,
    ) -> Result<Topology> {
        let response = self
            .call(Request::CollectTopology {
                visited: visited.clone(),
                max_depth,
            })
            .await?;
        match response {
            Response::Topology(topology) => Ok(topology),
            other => Err(NetError::Decode(format!(
                "unexpected response to CollectTopology: {other:?}"
            ))),
        }
    }

    /// Push a streamed token batch to the remote node's dispatcher.
    pub async fn send_result(
        &self,
        request_id: &str,
        tokens: Vec<u32>,
        is_finished: bool,
    ) -> Result<()> {
        let response = self
            .call(Request::SendResult {
                request_id: request_id.to_string(),
                tokens,
                is_finished,
            })
            .await?;
        match response {
            Response::Ack => Ok(()),
            other => Err(NetError::Decode(format!(
                "unexpected response to SendResult: {other:?}"
            ))),
        }
    }

    /// Push an out-of-band status string to the remote node's dispatcher.
    pub async fn send_opaque_status(&self, request_id: &str, status: &str) -> Result<()> {
        let response = self
            .call(Request::SendOpaqueStatus {
                request_id: request_id.to_string(),
                status: status.to_string(),
            })
            .await?;
        match response {
            Response::Ack => Ok(()),
            other => Err(NetError::Decode(format!(
                "unexpected response to SendOpaqueStatus: {other:?}"
            ))),
        }
    }
}

impl std::fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle")
            .field("id", &self.id)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
