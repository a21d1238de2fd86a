//! Boundary to the transport collaborator
//!
//! The core never touches sockets. Inbound frames are handed to
//! [`crate::mcp::server::McpServer::handle_frame`]; outbound frames leave through
//! a [`Transport`].

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use crate::errors::TransportError;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_frame(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Called once when the session ends, gracefully or after a fatal error.
    async fn close(&self) {}
}

/// Frames a client may leave undrained before new ones are dropped.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Queues outbound frames on a bounded channel for the binding to drain.
///
/// Sending never waits: once the queue is full the frame is dropped and the
/// caller gets [`TransportError::Full`].
#[derive(Debug)]
pub struct ChannelTransport {
    sender: mpsc::Sender<Vec<u8>>,
    closed: AtomicBool,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::Receiver<Vec<u8>>) {
        Self::with_capacity(DEFAULT_OUTBOUND_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                closed: AtomicBool::new(false),
            },
            receiver,
        )
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send_frame(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        match self.sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(frame)) => {
                warn!(
                    frame_bytes = frame.len(),
                    capacity = self.sender.max_capacity(),
                    "outbound queue full, frame dropped"
                );
                Err(TransportError::Full)
            }
            Err(TrySendError::Closed(_)) => Err(TransportError::Send(
                "outbound queue receiver dropped".to_string(),
            )),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queues_frames_until_closed() {
        let (transport, mut receiver) = ChannelTransport::new();

        transport
            .send_frame(b"{}".to_vec())
            .await
            .expect("send before close");
        assert_eq!(receiver.try_recv().expect("queued frame"), b"{}".to_vec());

        transport.close().await;
        assert!(transport.is_closed());
        assert_eq!(
            transport.send_frame(b"{}".to_vec()).await,
            Err(TransportError::Closed)
        );
    }

    #[tokio::test]
    async fn drops_frames_once_the_queue_is_full() {
        let (transport, mut receiver) = ChannelTransport::with_capacity(2);

        transport.send_frame(b"1".to_vec()).await.expect("first");
        transport.send_frame(b"2".to_vec()).await.expect("second");
        assert_eq!(
            transport.send_frame(b"3".to_vec()).await,
            Err(TransportError::Full)
        );

        assert_eq!(receiver.try_recv().expect("queued"), b"1".to_vec());
        transport.send_frame(b"4".to_vec()).await.expect("room again");
        assert_eq!(receiver.try_recv().expect("queued"), b"2".to_vec());
        assert_eq!(receiver.try_recv().expect("queued"), b"4".to_vec());
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn reports_dropped_receiver() {
        let (transport, receiver) = ChannelTransport::new();
        drop(receiver);

        let error = transport
            .send_frame(b"{}".to_vec())
            .await
            .expect_err("receiver dropped");
        assert!(matches!(error, TransportError::Send(_)));
    }
}
