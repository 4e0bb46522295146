use std::time::Duration;

use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::connection::{CloseReason, Connection};
use crate::keepalive::KeepaliveExit;
use crate::registry::Registry;

/// How long the writer gets to flush its close frame before it is aborted.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Tasks owned by one connection. Consumed by [`release`], so they are torn
/// down exactly once.
pub struct ConnectionResources {
    pub connection: Connection,
    pub keepalive: JoinHandle<KeepaliveExit>,
    pub writer: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Release {
    /// Reason recorded on the connection's terminal transition.
    pub reason: CloseReason,
    /// Whether the slot was freed; `false` when a newer connection had
    /// already taken it over.
    pub unregistered: bool,
}

/// Terminal cleanup for a connection whose reader has already stopped.
///
/// Closes the connection (keeping an earlier reason if it was already
/// closed), stops the keepalive, frees the registry slot if this connection
/// still holds it, then lets the writer flush its close frame.
pub async fn release(
    registry: &Registry,
    resources: ConnectionResources,
    reason: CloseReason,
) -> Release {
    let ConnectionResources {
        connection,
        keepalive,
        writer,
    } = resources;

    connection.close(reason);
    keepalive.abort();

    let unregistered = registry.unregister_if_current(&connection);
    let reason = connection.close_reason().unwrap_or(reason);

    if unregistered {
        gauge!(
            "beach_pier_connections_active",
            registry.connection_count() as f64
        );
    } else {
        debug!(
            room_id = %connection.room_id(),
            user_id = %connection.user_id(),
            connection_id = %connection.id(),
            "slot already taken over; leaving it in place"
        );
    }

    if let Some(mut writer) = writer {
        if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
            writer.abort();
        }
    }

    counter!("beach_pier_connections_closed_total", 1, "reason" => reason.as_str());
    info!(
        room_id = %connection.room_id(),
        user_id = %connection.user_id(),
        connection_id = %connection.id(),
        reason = reason.as_str(),
        "connection closed"
    );

    Release {
        reason,
        unregistered,
    }
}
