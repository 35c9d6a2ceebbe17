use serde_json::Value as Json;
use tokio::sync::mpsc;

/// An asynchronous push delivered to every attached connection of a user:
/// an incoming message, a verification notice, a room change. The gateway's
/// per-connection writer task wraps this in a Text frame and serializes it
/// to bytes; `chat-control` itself never touches the wire format (see
/// DESIGN.md's notes on the `TcpRoom`/`TextDataRoom` split).
#[derive(Clone, Debug)]
pub struct OutboundEvent(pub Json);

impl OutboundEvent {
    pub fn new(value: Json) -> Self {
        Self(value)
    }
}

/// Per-connection outbound channel. The gateway owns the receiving end and
/// the socket; `chat-control` only ever holds the sending half inside a
/// [`crate::user::User`]'s connection table.
pub type OutboundSender = mpsc::UnboundedSender<OutboundEvent>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<OutboundEvent>;

pub fn channel() -> (OutboundSender, OutboundReceiver) {
    mpsc::unbounded_channel()
}
