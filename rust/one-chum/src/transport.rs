use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use crate::{Frame, OneChumError};

/// Frames larger than this are rejected as a protocol violation.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// A duplex frame transport. The embedder supplies the byte stream; the
/// session only ever sees whole frames.
#[async_trait]
pub trait ChumTransport: Send + Sync {
    /// Sends one frame.
    async fn send(&self, frame: &Frame) -> Result<(), OneChumError>;

    /// Receives the next frame, or `None` when the peer closed down.
    async fn recv(&self) -> Result<Option<Frame>, OneChumError>;

    /// Closes the transport; subsequent `recv` on the peer yields `None`.
    async fn close(&self);
}

/// A [`ChumTransport`] over any duplex byte stream, speaking
/// length-prefixed JSON frames (`u32` big-endian length, then the body).
pub struct StreamTransport<S> {
    reader: Mutex<Option<ReadHalf<S>>>,
    writer: Mutex<Option<WriteHalf<S>>>,
}

impl<S: AsyncRead + AsyncWrite + Send> StreamTransport<S> {
    /// Wraps a duplex stream.
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        }
    }
}

/// An in-memory transport pair for tests and same-process sessions.
pub fn duplex_transport_pair() -> (
    StreamTransport<tokio::io::DuplexStream>,
    StreamTransport<tokio::io::DuplexStream>,
) {
    let (left, right) = tokio::io::duplex(256 * 1024);
    (StreamTransport::new(left), StreamTransport::new(right))
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Send + 'static> ChumTransport for StreamTransport<S> {
    async fn send(&self, frame: &Frame) -> Result<(), OneChumError> {
        let body = serde_json::to_vec(frame).map_err(|error| OneChumError::ProtocolMismatch {
            reason: error.to_string(),
        })?;
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(OneChumError::TransportClosed);
        };
        let write = async {
            writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
            writer.write_all(&body).await?;
            writer.flush().await
        };
        write.await.map_err(|_| OneChumError::TransportClosed)
    }

    async fn recv(&self) -> Result<Option<Frame>, OneChumError> {
        let mut reader = self.reader.lock().await;
        let Some(reader) = reader.as_mut() else {
            return Ok(None);
        };

        let mut length = [0u8; 4];
        match reader.read_exact(&mut length).await {
            Ok(_) => {}
            // A clean close between frames.
            Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(_) => return Err(OneChumError::TransportClosed),
        }
        let length = u32::from_be_bytes(length);
        if length > MAX_FRAME_LEN {
            return Err(OneChumError::ProtocolMismatch {
                reason: format!("frame of {length} bytes"),
            });
        }
        let mut body = vec![0u8; length as usize];
        reader
            .read_exact(&mut body)
            .await
            .map_err(|_| OneChumError::TransportClosed)?;
        let frame =
            serde_json::from_slice(&body).map_err(|error| OneChumError::ProtocolMismatch {
                reason: error.to_string(),
            })?;
        Ok(Some(frame))
    }

    async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.reader.lock().await.take();
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;
    use crate::{ChumRequest, FrameBody};

    #[tokio::test]
    async fn it_round_trips_frames_over_a_duplex_pair() -> Result<()> {
        let (left, right) = duplex_transport_pair();
        let frame = Frame {
            id: 7,
            body: FrameBody::Request(ChumRequest::GetObject {
                hash: one_common::Hash::digest(b"x"),
            }),
        };
        left.send(&frame).await?;
        let received = right.recv().await?.unwrap();
        assert_eq!(received, frame);

        left.close().await;
        assert!(right.recv().await?.is_none());
        Ok(())
    }
}
