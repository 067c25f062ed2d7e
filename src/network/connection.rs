//! Client-side connection internals.
//!
//! A [`Connection`] owns a TCP stream through three tasks: a reader routing
//! inbound frames to per-call waiters by frame id, a writer draining an
//! outbound queue, and a keepalive loop probing the peer. When any of them
//! observes a transport failure the connection is marked dead and every
//! in-flight call fails with `Unavailable`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::NetConfig;
use crate::errors::{NetError, Result};
use crate::network::protocol::{read_frame, write_frame, Body, Frame, Request, Response};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Body>>>>;

/// Drop all pending waiters, failing their calls.
fn fail_pending(pending: &Pending) {
    pending.lock().expect("pending lock poisoned").clear();
}

pub(crate) struct Connection {
    next_id: Arc<AtomicU64>,
    pending: Pending,
    writer_tx: mpsc::Sender<Frame>,
    closed: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    /// Take ownership of a freshly dialed stream and spawn its tasks.
    pub(crate) fn spawn(stream: TcpStream, config: &NetConfig) -> Self {
        let (mut read_half, mut write_half) = stream.into_split();
        let (writer_tx, mut writer_rx) = mpsc::channel::<Frame>(64);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let next_id = Arc::new(AtomicU64::new(1));
        let closed = Arc::new(AtomicBool::new(false));
        let max_size = config.max_message_size;

        let writer_task = {
            let pending = pending.clone();
            let closed = closed.clone();
            tokio::spawn(async move {
                while let Some(frame) = writer_rx.recv().await {
                    if let Err(e) = write_frame(&mut write_half, &frame, max_size).await {
                        tracing::debug!(error = %e, "connection write failed");
                        break;
                    }
                }
                closed.store(true, Ordering::Release);
                fail_pending(&pending);
            })
        };

        let reader_task = {
            let pending = pending.clone();
            let closed = closed.clone();
            let writer_tx = writer_tx.clone();
            tokio::spawn(async move {
                loop {
                    match read_frame(&mut read_half, max_size).await {
                        Ok(frame) => match frame.body {
                            Body::Response(_) | Body::Pong => {
                                let waiter =
                                    pending.lock().expect("pending lock poisoned").remove(&frame.id);
                                match waiter {
                                    Some(tx) => {
                                        let _ = tx.send(frame.body);
                                    }
                                    None => {
                                        tracing::trace!(id = frame.id, "frame with no waiter")
                                    }
                                }
                            }
                            Body::Ping => {
                                let pong = Frame {
                                    id: frame.id,
                                    body: Body::Pong,
                                };
                                if writer_tx.send(pong).await.is_err() {
                                    break;
                                }
                            }
                            Body::Request(_) => {
                                tracing::trace!("ignoring request frame on client connection");
                            }
                        },
                        Err(e) => {
                            tracing::debug!(error = %e, "connection read ended");
                            break;
                        }
                    }
                }
                closed.store(true, Ordering::Release);
                fail_pending(&pending);
            })
        };

        let keepalive_task = {
            let pending = pending.clone();
            let closed = closed.clone();
            let writer_tx = writer_tx.clone();
            let next_id = next_id.clone();
            let interval = config.keepalive_interval;
            let deadline = config.keepalive_timeout;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await; // first tick completes immediately
                loop {
                    ticker.tick().await;
                    if closed.load(Ordering::Acquire) {
                        break;
                    }
                    let id = next_id.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = oneshot::channel();
                    pending.lock().expect("pending lock poisoned").insert(id, tx);
                    let ping = Frame {
                        id,
                        body: Body::Ping,
                    };
                    if writer_tx.send(ping).await.is_err() {
                        pending.lock().expect("pending lock poisoned").remove(&id);
                        break;
                    }
                    match timeout(deadline, rx).await {
                        Ok(Ok(Body::Pong)) => {
                            tracing::trace!("keepalive pong");
                        }
                        _ => {
                            tracing::debug!("keepalive probe failed, closing connection");
                            closed.store(true, Ordering::Release);
                            fail_pending(&pending);
                            break;
                        }
                    }
                }
            })
        };

        Self {
            next_id,
            pending,
            writer_tx,
            closed,
            tasks: vec![writer_task, reader_task, keepalive_task],
        }
    }

    /// Whether the transport still reports a ready state.
    pub(crate) fn is_ready(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Issue one call and await its response.
    pub(crate) async fn call(&self, request: Request) -> Result<Response> {
        if !self.is_ready() {
            return Err(NetError::Unavailable("connection closed".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .insert(id, tx);

        let frame = Frame {
            id,
            body: Body::Request(request),
        };
        if self.writer_tx.send(frame).await.is_err() {
            self.pending
                .lock()
                .expect("pending lock poisoned")
                .remove(&id);
            return Err(NetError::Unavailable("connection closed".to_string()));
        }

        match rx.await {
            Ok(Body::Response(Response::Error { message })) => Err(NetError::Remote(message)),
            Ok(Body::Response(response)) => Ok(response),
            Ok(other) => Err(NetError::Decode(format!("unexpected frame body: {other:?}"))),
            // Waiter dropped: the connection died (or was closed) mid-call
            Err(_) => Err(NetError::Unavailable("connection lost mid-call".to_string())),
        }
    }

    /// Close the connection, cancelling all in-flight calls.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for task in &self.tasks {
            task.abort();
        }
        fail_pending(&self.pending);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
