//! Periodic `ping` envelopes that keep idle sockets alive through proxies
//! and NAT mappings. Clients are not expected to answer.

use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use crate::connection::Connection;
use crate::signaling::SignalMessage;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveExit {
    /// The connection closed while waiting for the next tick.
    Cancelled,
    /// A tick found the connection no longer open.
    NotOpen,
}

/// Starts the keepalive for `conn`. The first ping goes out one full
/// interval after this call.
pub fn spawn(conn: Connection, interval: Duration) -> JoinHandle<KeepaliveExit> {
    tokio::spawn(run(conn, interval))
}

pub async fn run(conn: Connection, interval: Duration) -> KeepaliveExit {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = conn.closed() => return KeepaliveExit::Cancelled,
            _ = ticker.tick() => {
                if !conn.is_open() {
                    return KeepaliveExit::NotOpen;
                }
                match conn.send(SignalMessage::Ping) {
                    Ok(()) => counter!("beach_pier_keepalive_pings_total", 1),
                    Err(err) => debug!(
                        room_id = %conn.room_id(),
                        user_id = %conn.user_id(),
                        error = %err,
                        "keepalive ping not queued"
                    ),
                }
            }
        }
    }
}
