//! Server endpoint binding a local node to the wire protocol.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{timeout, Instant};

use crate::config::NetConfig;
use crate::errors::Result;
use crate::events::TokenEvent;
use crate::network::protocol::{read_frame, write_frame, Body, Frame, Request, Response};
use crate::node::InferenceNode;
use crate::tensor::TensorEnvelope;

/// Listens for inbound peer calls, delegates them to the local node, and
/// replies on the wire.
///
/// Inbound calls run concurrently under a bounded handler pool. A handler
/// failure is converted to a per-call error response; it never terminates
/// the connection loop or touches other in-flight calls. Connections are
/// recycled when idle or aged out, with a grace period for in-flight work.
pub struct ServerEndpoint {
    node: Arc<dyn InferenceNode>,
    config: NetConfig,
    state: Mutex<Option<Running>>,
}

struct Running {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl ServerEndpoint {
    pub fn new(node: Arc<dyn InferenceNode>) -> Self {
        Self::with_config(node, NetConfig::default())
    }

    pub fn with_config(node: Arc<dyn InferenceNode>, config: NetConfig) -> Self {
        Self {
            node,
            config,
            state: Mutex::new(None),
        }
    }

    /// Begin listening. Idempotent: if already listening, returns the bound
    /// address. Pass port 0 for an OS-assigned port.
    pub async fn start(&self, host: &str, port: u16) -> Result<SocketAddr> {
        let mut state = self.state.lock().await;
        if let Some(running) = state.as_ref() {
            return Ok(running.local_addr);
        }

        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let node = self.node.clone();
        let config = self.config.clone();
        let accept_task = tokio::spawn(async move {
            accept_loop(listener, node, config, shutdown_rx).await;
        });

        *state = Some(Running {
            local_addr,
            shutdown_tx,
            accept_task,
        });
        tracing::info!(addr = %local_addr, "server listening");
        Ok(local_addr)
    }

    /// Address the endpoint is listening on, if started.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Graceful shutdown: stop accepting, give in-flight calls a bounded
    /// grace period, then cancel whatever remains. Idempotent.
    pub async fn stop(&self) {
        let running = self.state.lock().await.take();
        if let Some(running) = running {
            let _ = running.shutdown_tx.send(true);
            if running.accept_task.await.is_err() {
                tracing::debug!("accept task cancelled during shutdown");
            }
            tracing::info!("server stopped");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    node: Arc<dyn InferenceNode>,
    config: NetConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // Bounded worker pool shared by every connection
    let limiter = Arc::new(Semaphore::new(config.max_concurrent_handlers));
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    tracing::debug!(%remote, "peer connected");
                    connections.spawn(serve_connection(
                        stream,
                        remote,
                        node.clone(),
                        config.clone(),
                        limiter.clone(),
                        shutdown_rx.clone(),
                    ));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                }
            }
        }
    }
    drop(listener);

    // Grace-bounded drain, then cancellation
    let deadline = Instant::now() + config.shutdown_grace;
    while !connections.is_empty() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, connections.join_next()).await {
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => break,
        }
    }
    connections.shutdown().await;
}

async fn serve_connection(
    stream: TcpStream,
    remote: SocketAddr,
    node: Arc<dyn InferenceNode>,
    config: NetConfig,
    limiter: Arc<Semaphore>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let max_size = config.max_message_size;

    // Responses from concurrent handlers are serialized through a writer task
    let (writer_tx, mut writer_rx) = mpsc::channel::<Frame>(64);
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = writer_rx.recv().await {
            if let Err(e) = write_frame(&mut write_half, &frame, max_size).await {
                tracing::debug!(error = %e, "response write failed");
                break;
            }
        }
    });

    let opened = Instant::now();
    let mut inflight = JoinSet::new();

    // The server probes the peer too; a client that goes silent is dropped
    // after an unanswered ping instead of lingering until the idle window
    let mut ping_ticker = tokio::time::interval(config.keepalive_interval);
    ping_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_ticker.tick().await; // first tick completes immediately
    let mut ping_seq: u64 = 0;
    let mut pending_ping: Option<(u64, Instant)> = None;

    loop {
        let elapsed = opened.elapsed();
        if elapsed >= config.max_connection_age {
            tracing::debug!(%remote, "connection reached max age, recycling");
            break;
        }
        let read_window = config.max_idle.min(config.max_connection_age - elapsed);

        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ping_ticker.tick() => {
                if pending_ping.is_none() {
                    ping_seq += 1;
                    pending_ping = Some((ping_seq, Instant::now()));
                    let ping = Frame { id: ping_seq, body: Body::Ping };
                    if writer_tx.send(ping).await.is_err() {
                        break;
                    }
                }
            }
            _ = pong_deadline(pending_ping, config.keepalive_timeout) => {
                tracing::debug!(%remote, "keepalive probe unanswered, closing connection");
                break;
            }
            read = timeout(read_window, read_frame(&mut read_half, max_size)) => match read {
                Err(_) => {
                    tracing::debug!(%remote, "connection idle or aged out, recycling");
                    break;
                }
                Ok(Err(e)) => {
                    if e.kind() != io::ErrorKind::UnexpectedEof {
                        tracing::debug!(%remote, error = %e, "connection read failed");
                    }
                    break;
                }
                Ok(Ok(frame)) => match frame.body {
                    Body::Pong => {
                        if pending_ping.is_some_and(|(id, _)| id == frame.id) {
                            pending_ping = None;
                        }
                    }
                    _ => dispatch_frame(frame, &node, &writer_tx, &limiter, &mut inflight).await,
                }
            }
        }
    }

    // Grace for in-flight handlers before forced close
    let deadline = Instant::now() + config.connection_age_grace;
    while !inflight.is_empty() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        if timeout(remaining, inflight.join_next()).await.is_err() {
            break;
        }
    }
    inflight.shutdown().await;
    drop(writer_tx);
    let _ = writer_task.await;
    tracing::debug!(%remote, "connection closed");
}

/// Resolves when an outstanding ping has gone unanswered past the deadline;
/// never resolves while no ping is outstanding.
async fn pong_deadline(pending: Option<(u64, Instant)>, keepalive_timeout: Duration) {
    match pending {
        Some((_, sent)) => tokio::time::sleep_until(sent + keepalive_timeout).await,
        None => std::future::pending().await,
    }
}

async fn dispatch_frame(
    frame: Frame,
    node: &Arc<dyn InferenceNode>,
    writer_tx: &mpsc::Sender<Frame>,
    limiter: &Arc<Semaphore>,
    inflight: &mut JoinSet<()>,
) {
    match frame.body {
        Body::Ping => {
            let pong = Frame {
                id: frame.id,
                body: Body::Pong,
            };
            let _ = writer_tx.send(pong).await;
        }
        Body::Request(request) => {
            let permit = match limiter.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let node = node.clone();
            let writer_tx = writer_tx.clone();
            let id = frame.id;
            inflight.spawn(async move {
                // The handler runs in its own task so that a panic is
                // contained and answered, not silently swallowed leaving
                // the caller waiting on a frame that never comes
                let handler =
                    tokio::spawn(async move { handle_request(node.as_ref(), request).await });
                let response = match handler.await {
                    Ok(Ok(response)) => response,
                    Ok(Err(e)) => {
                        // Isolated to this call; the connection loop survives
                        tracing::warn!(error = %format!("{e:#}"), "handler failed");
                        Response::Error {
                            message: format!("{e:#}"),
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "handler panicked");
                        Response::Error {
                            message: format!("handler panicked: {e}"),
                        }
                    }
                };
                let frame = Frame {
                    id,
                    body: Body::Response(response),
                };
                let _ = writer_tx.send(frame).await;
                drop(permit);
            });
        }
        Body::Response(_) | Body::Pong => {
            tracing::trace!("unexpected frame from client");
        }
    }
}

async fn handle_request(node: &dyn InferenceNode, request: Request) -> anyhow::Result<Response> {
    match request {
        // Transport-liveness signal, independent of model-serving health
        Request::HealthCheck => Ok(Response::HealthCheck { is_healthy: true }),

        Request::SendPrompt {
            shard,
            prompt,
            request_id,
        } => {
            tracing::debug!(%request_id, model = %shard.model_id, "SendPrompt");
            let result = node.process_prompt(shard, &prompt, &request_id).await?;
            Ok(Response::Tensor(TensorEnvelope::from_optional(
                result.as_ref(),
            )))
        }

        Request::SendTensor {
            shard,
            tensor,
            request_id,
        } => {
            let tensor = tensor
                .decode()?
                .ok_or_else(|| anyhow::anyhow!("SendTensor carried an absent tensor"))?;
            tracing::debug!(%request_id, model = %shard.model_id, "SendTensor");
            let result = node.process_tensor(shard, tensor, &request_id).await?;
            Ok(Response::Tensor(TensorEnvelope::from_optional(
                result.as_ref(),
            )))
        }

        Request::GetInferenceResult { request_id } => {
            let (tensor, is_finished) = node.get_inference_result(&request_id).await?;
            Ok(Response::InferenceResult {
                tensor: TensorEnvelope::from_optional(tensor.as_ref()),
                is_finished,
            })
        }

        Request::CollectTopology { visited, max_depth } => {
            tracing::debug!(max_depth, visited = visited.len(), "CollectTopology");
            let topology = node.collect_topology(visited, max_depth).await?;
            Ok(Response::Topology(topology))
        }

        // Fire-and-forget: route to local observers, ack immediately
        Request::SendResult {
            request_id,
            tokens,
            is_finished,
        } => {
            node.token_events()
                .trigger_all(&request_id, TokenEvent { tokens, is_finished })
                .await;
            Ok(Response::Ack)
        }

        Request::SendOpaqueStatus { request_id, status } => {
            node.status_events().trigger_all(&request_id, status).await;
            Ok(Response::Ack)
        }
    }
}
