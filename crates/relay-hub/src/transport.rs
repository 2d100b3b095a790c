//! Outbound transport handle.
//!
//! The hub never touches sockets. A gateway hands it a [`Transport`] per
//! connection; [`ChannelTransport`] is the bounded-channel implementation the
//! websocket gateway uses, with the socket writer draining the receiver.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Why a transport write failed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport was closed or its reader went away.
    #[error("transport closed")]
    Closed,
    /// The outbound buffer is full.
    #[error("outbound buffer full")]
    Full,
    /// The frame exceeds the configured size limit.
    #[error("message of {size} bytes exceeds limit of {limit}")]
    TooLarge {
        /// Serialized size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },
}

impl TransportError {
    /// Short label for metrics.
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Full => "full",
            Self::TooLarge { .. } => "too_large",
        }
    }
}

/// A write handle to one client.
///
/// `send` must not block: it either enqueues the frame or fails immediately.
pub trait Transport: Send + Sync {
    /// Enqueue one serialized message.
    fn send(&self, frame: Arc<String>) -> Result<(), TransportError>;

    /// Close the transport. Idempotent.
    fn close(&self);

    /// Whether writes can still succeed.
    fn is_open(&self) -> bool;
}

/// Transport backed by a bounded `mpsc` channel.
pub struct ChannelTransport {
    tx: mpsc::Sender<Arc<String>>,
    closed: CancellationToken,
    dropped: AtomicU64,
}

impl ChannelTransport {
    /// Create a transport and the receiver its writer task drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let transport = Self {
            tx,
            closed: CancellationToken::new(),
            dropped: AtomicU64::new(0),
        };
        (transport, rx)
    }

    /// Token cancelled when the hub closes this transport.
    ///
    /// The socket writer selects on it to send a close frame.
    pub fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Frames rejected because the buffer was full or closed.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, frame: Arc<String>) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(TransportError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Full(_) => TransportError::Full,
                mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
            }
        })
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.tx.is_closed()
    }
}
