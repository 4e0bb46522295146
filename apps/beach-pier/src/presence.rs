use metrics::counter;
use tracing::{debug, info};

use crate::connection::Connection;
use crate::registry::Registry;
use crate::signaling::{Participant, SignalMessage};

pub struct JoinOutcome {
    /// Existing occupants that were sent `newParticipant`.
    pub notified: usize,
    /// Previous occupant of the slot, already closed.
    pub evicted: Option<Connection>,
}

/// Announces `conn` to the room and then registers it.
///
/// Runs under the room lock: the peer list is taken before the newcomer is
/// inserted, so it never hears about itself, and a stale connection for the
/// same user is evicted in the same step.
pub fn join(registry: &Registry, conn: Connection) -> JoinOutcome {
    let user_id = conn.user_id().to_string();
    let room_id = conn.room_id().to_string();

    let (notified, evicted) = registry.with_room(&room_id, |slots| {
        let announcement = SignalMessage::NewParticipant(Participant {
            user_id: user_id.clone(),
        });
        let mut notified = 0usize;
        for peer in slots.others(&user_id) {
            match peer.send(announcement.clone()) {
                Ok(()) => notified += 1,
                Err(err) => debug!(
                    room_id = %room_id,
                    user_id = %peer.user_id(),
                    error = %err,
                    "presence notification dropped"
                ),
            }
        }
        (notified, slots.claim(conn))
    });

    counter!("beach_pier_presence_notifications_total", notified as u64);
    if let Some(old) = &evicted {
        counter!("beach_pier_evictions_total", 1);
        info!(
            room_id = %room_id,
            user_id = %user_id,
            connection_id = %old.id(),
            "evicted previous connection for user"
        );
    }

    JoinOutcome { notified, evicted }
}
