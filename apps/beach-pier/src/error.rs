use thiserror::Error;

/// Failures that can occur while relaying a single inbound frame.
///
/// None of these are fatal to the connection that produced them; the
/// websocket loop logs, counts and drops them.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("user {user_id} is not present in room {room_id}")]
    UnknownTarget { room_id: String, user_id: String },
    #[error("refusing to relay {event} back to its sender")]
    SelfAddressed { event: &'static str },
    #[error("connection is closed")]
    ConnectionClosed,
    #[error("outbound queue is full")]
    Backpressure,
}

impl RelayError {
    /// Label used for the `reason` dimension of the drop counter.
    pub fn reason(&self) -> &'static str {
        match self {
            RelayError::Malformed(_) => "malformed",
            RelayError::UnknownTarget { .. } => "unknown_target",
            RelayError::SelfAddressed { .. } => "self_addressed",
            RelayError::ConnectionClosed => "closed",
            RelayError::Backpressure => "backpressure",
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Malformed(err.to_string())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid listen address {addr}: {reason}")]
    ListenAddr { addr: String, reason: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}
