use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::error::RelayError;
use crate::signaling::SignalMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// Why a connection left the OPEN state. Recorded once, on the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A newer connection claimed the same `(room, user)` slot.
    Replaced,
    /// The client sent a close frame or the stream ended.
    RemoteClosed,
    /// Reading from or writing to the socket failed.
    TransportError,
    /// The server is shutting down.
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Replaced => "replaced",
            CloseReason::RemoteClosed => "remote_closed",
            CloseReason::TransportError => "transport_error",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// Handle to one joined client.
///
/// Cloning is cheap; all clones refer to the same connection. Two handles
/// are equal when they refer to the same connection, regardless of which
/// room slot they came from.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: Uuid,
    room_id: String,
    user_id: String,
    remote_addr: Option<SocketAddr>,
    joined_at: DateTime<Utc>,
    outbound: mpsc::Sender<SignalMessage>,
    close_reason: OnceLock<CloseReason>,
    closed: CancellationToken,
}

impl Connection {
    /// Creates an OPEN connection and the receiving half of its outbound
    /// queue, which the transport drains into frames.
    pub fn new(
        room_id: impl Into<String>,
        user_id: impl Into<String>,
        remote_addr: Option<SocketAddr>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<SignalMessage>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let connection = Self {
            inner: Arc::new(ConnectionInner {
                id: Uuid::new_v4(),
                room_id: room_id.into(),
                user_id: user_id.into(),
                remote_addr,
                joined_at: Utc::now(),
                outbound: tx,
                close_reason: OnceLock::new(),
                closed: CancellationToken::new(),
            }),
        };
        (connection, rx)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn room_id(&self) -> &str {
        &self.inner.room_id
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    pub fn joined_at(&self) -> DateTime<Utc> {
        self.inner.joined_at
    }

    pub fn state(&self) -> ConnectionState {
        if self.inner.close_reason.get().is_some() {
            ConnectionState::Closed
        } else {
            ConnectionState::Open
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.close_reason.get().copied()
    }

    /// Moves the connection to CLOSED.
    ///
    /// Returns `true` only for the call that performed the transition; the
    /// first reason wins and later calls change nothing.
    pub fn close(&self, reason: CloseReason) -> bool {
        let transitioned = self.inner.close_reason.set(reason).is_ok();
        self.inner.closed.cancel();
        transitioned
    }

    /// Resolves once the connection has been closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.inner.closed.cancelled()
    }

    /// Queues a message for delivery without waiting.
    ///
    /// A full queue drops the message rather than stall the caller.
    pub fn send(&self, message: SignalMessage) -> Result<(), RelayError> {
        if !self.is_open() {
            return Err(RelayError::ConnectionClosed);
        }
        self.inner
            .outbound
            .try_send(message)
            .map_err(|err| match err {
                TrySendError::Full(_) => RelayError::Backpressure,
                TrySendError::Closed(_) => RelayError::ConnectionClosed,
            })
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("room_id", &self.inner.room_id)
            .field("user_id", &self.inner.user_id)
            .field("state", &self.state())
            .finish()
    }
}
