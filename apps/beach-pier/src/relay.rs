use crate::connection::Connection;
use crate::error::RelayError;
use crate::registry::Registry;
use crate::signaling::{ClientMessage, NegotiationKind, RelayPayload};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered {
        kind: NegotiationKind,
        target: String,
    },
    Ignored {
        event: String,
    },
}

/// Handles one inbound text frame from `sender`.
///
/// Offers and answers go to the addressed user in the sender's room with
/// `userId` rewritten to the sender. Everything else is ignored. Errors are
/// per-message; the caller keeps the connection open.
///
/// A sender that is already closed relays nothing, even if its frame was
/// read before the close was observed.
pub fn handle_text(
    registry: &Registry,
    sender: &Connection,
    text: &str,
) -> Result<RelayOutcome, RelayError> {
    if !sender.is_open() {
        return Err(RelayError::ConnectionClosed);
    }
    match ClientMessage::parse(text)? {
        ClientMessage::Negotiation { kind, body } => forward(registry, sender, kind, body),
        ClientMessage::Unrecognized { event } => Ok(RelayOutcome::Ignored { event }),
    }
}

fn forward(
    registry: &Registry,
    sender: &Connection,
    kind: NegotiationKind,
    body: RelayPayload,
) -> Result<RelayOutcome, RelayError> {
    let RelayPayload { user_id: target, payload } = body;

    if target == sender.user_id() {
        return Err(RelayError::SelfAddressed {
            event: kind.as_str(),
        });
    }

    let recipient = registry
        .lookup(sender.room_id(), &target)
        .ok_or_else(|| RelayError::UnknownTarget {
            room_id: sender.room_id().to_string(),
            user_id: target.clone(),
        })?;

    recipient.send(kind.into_message(RelayPayload {
        user_id: sender.user_id().to_string(),
        payload,
    }))?;

    Ok(RelayOutcome::Delivered { kind, target })
}
