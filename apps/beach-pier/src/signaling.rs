use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::RelayError;

/// Envelope pushed from the relay to a client.
///
/// Serialized as `{"event": "...", "data": {...}}`; `ping` carries no data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum SignalMessage {
    /// Someone joined the room the recipient is in.
    NewParticipant(Participant),
    Offer(RelayPayload),
    Answer(RelayPayload),
    /// Keepalive; no acknowledgement expected.
    Ping,
}

impl SignalMessage {
    pub fn event(&self) -> &'static str {
        match self {
            SignalMessage::NewParticipant(_) => "newParticipant",
            SignalMessage::Offer(_) => "offer",
            SignalMessage::Answer(_) => "answer",
            SignalMessage::Ping => "ping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
}

/// Body of an offer or answer. On the way in `user_id` names the target;
/// on the way out it names the sender.
///
/// `payload` is `None` only when the key is absent; an explicit `null` is
/// kept and relayed as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayPayload {
    pub user_id: String,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub payload: Option<Value>,
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationKind {
    Offer,
    Answer,
}

impl NegotiationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NegotiationKind::Offer => "offer",
            NegotiationKind::Answer => "answer",
        }
    }

    /// Wraps a payload into the outbound envelope for this kind.
    pub fn into_message(self, payload: RelayPayload) -> SignalMessage {
        match self {
            NegotiationKind::Offer => SignalMessage::Offer(payload),
            NegotiationKind::Answer => SignalMessage::Answer(payload),
        }
    }
}

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Negotiation {
        kind: NegotiationKind,
        body: RelayPayload,
    },
    /// Anything else, including server-only events echoed back. Ignored.
    Unrecognized { event: String },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

impl ClientMessage {
    /// Parses one inbound frame.
    ///
    /// Frames that are not JSON, lack an `event` string, or carry an
    /// offer/answer without a string `data.userId` are `Malformed`. Unknown
    /// event names parse successfully as `Unrecognized`.
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let kind = match envelope.event.as_str() {
            "offer" => NegotiationKind::Offer,
            "answer" => NegotiationKind::Answer,
            _ => {
                return Ok(ClientMessage::Unrecognized {
                    event: envelope.event,
                })
            }
        };
        let body: RelayPayload = serde_json::from_value(envelope.data)?;
        Ok(ClientMessage::Negotiation { kind, body })
    }
}
