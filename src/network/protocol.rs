//! Wire format: length-prefixed CBOR frames.
//!
//! Every message on a connection is a [`Frame`]: a connection-local id plus
//! a body. Requests and responses are matched by id, which lets one
//! connection carry many concurrent calls; `Ping`/`Pong` frames reuse the
//! same matching for keepalive probes.
//!
//! Framing: `[4-byte big-endian length][CBOR payload]`.

use std::collections::BTreeSet;
use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::shard::Shard;
use crate::tensor::TensorEnvelope;
use crate::topology::{NodeId, Topology};

/// One message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Connection-local correlation between a request and its response
    pub id: u64,
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Body {
    Request(Request),
    Response(Response),
    /// Keepalive probe; the receiver answers with a `Pong` carrying the
    /// same frame id
    Ping,
    Pong,
}

/// Inbound peer calls, one variant per operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    HealthCheck,
    SendPrompt {
        shard: Shard,
        prompt: String,
        request_id: String,
    },
    SendTensor {
        shard: Shard,
        tensor: TensorEnvelope,
        request_id: String,
    },
    GetInferenceResult {
        request_id: String,
    },
    CollectTopology {
        visited: BTreeSet<NodeId>,
        max_depth: u32,
    },
    SendResult {
        request_id: String,
        tokens: Vec<u32>,
        is_finished: bool,
    },
    SendOpaqueStatus {
        request_id: String,
        status: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    HealthCheck {
        is_healthy: bool,
    },
    Tensor(TensorEnvelope),
    InferenceResult {
        tensor: TensorEnvelope,
        is_finished: bool,
    },
    Topology(Topology),
    /// Empty acknowledgement for fire-and-forget pushes
    Ack,
    /// The handler for this call failed; the call fails, the connection
    /// survives
    Error {
        message: String,
    },
}

/// Generate a fresh correlation id for a new logical request.
///
/// Ids are caller-generated and uniqueness is assumed, not enforced; UUID v4
/// makes collisions negligible.
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Read one length-prefixed frame from an async stream.
pub async fn read_frame<R>(io: &mut R, max_size: usize) -> io::Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    io.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > max_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame size {len} exceeds limit {max_size}"),
        ));
    }

    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;

    ciborium::from_reader(&buf[..]).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Write one length-prefixed frame to an async stream.
pub async fn write_frame<W>(io: &mut W, frame: &Frame, max_size: usize) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    ciborium::into_writer(frame, &mut buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    if buf.len() > max_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame size {} exceeds limit {}", buf.len(), max_size),
        ));
    }

    let len = buf.len() as u32;
    io.write_all(&len.to_be_bytes()).await?;
    io.write_all(&buf).await?;
    io.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    const MAX: usize = 128 * 1024 * 1024;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let frame = Frame {
            id: 42,
            body: Body::Request(Request::SendPrompt {
                shard: Shard::new("llama-3.1-8b", 0, 15, 32).unwrap(),
                prompt: "hello".to_string(),
                request_id: generate_request_id(),
            }),
        };

        let mut buf = Vec::new();
        write_frame(&mut buf, &frame, MAX).await.unwrap();

        let mut cursor = &buf[..];
        let decoded = read_frame(&mut cursor, MAX).await.unwrap();
        assert_eq!(decoded, frame);
    }

    #[tokio::test]
    async fn test_tensor_response_round_trip() {
        let tensor = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let frame = Frame {
            id: 7,
            body: Body::Response(Response::Tensor(TensorEnvelope::from_tensor(&tensor))),
        };

        let mut buf = Vec::new();
        write_frame(&mut buf, &frame, MAX).await.unwrap();
        let decoded = read_frame(&mut &buf[..], MAX).await.unwrap();

        match decoded.body {
            Body::Response(Response::Tensor(envelope)) => {
                assert_eq!(envelope.decode().unwrap().unwrap(), tensor);
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_rejects_oversized_prefix() {
        let frame = Frame {
            id: 1,
            body: Body::Ping,
        };
        let mut buf = Vec::new();
        write_frame(&mut buf, &frame, MAX).await.unwrap();

        // Tamper with the length prefix to exceed a small limit
        let oversize: u32 = 1025;
        buf[0..4].copy_from_slice(&oversize.to_be_bytes());

        let result = read_frame(&mut &buf[..], 1024).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_write_rejects_oversized_frame() {
        let frame = Frame {
            id: 1,
            body: Body::Response(Response::Tensor(TensorEnvelope {
                data: vec![1u8; 2048],
                shape: vec![2048],
                dtype: "uint8".to_string(),
            })),
        };
        let mut buf = Vec::new();
        let result = write_frame(&mut buf, &frame, 1024).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_read_truncated_payload() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&100u32.to_be_bytes());
        buf.extend_from_slice(&[1, 2, 3]);

        let result = read_frame(&mut &buf[..], MAX).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_read_malformed_cbor() {
        let payload = [0xFFu8; 8];
        let mut buf = Vec::new();
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&payload);

        let result = read_frame(&mut &buf[..], MAX).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        assert_ne!(generate_request_id(), generate_request_id());
    }
}
