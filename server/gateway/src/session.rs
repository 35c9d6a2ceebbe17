use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chat_control::events::OutboundSender;
use chat_control::{ConnectionHandle, Manager, UserId};

/// Per-connection state holding the authenticated identity (spec.md §4.13,
/// C13). `user_id` starts at [`UserId::SENTINEL`] and is set exactly once
/// by a successful `login`; an `AtomicI64` is enough since the only
/// transition is sentinel → real id and every reader only needs the
/// current value, not a consistent view alongside other session fields.
pub struct Session {
    manager: Arc<Manager>,
    handle: ConnectionHandle,
    user_id: AtomicI64,
    /// The connection's push sender, attached to the `User` on successful
    /// `login` so `Manager`/`User` fan-out reaches this connection's writer
    /// task. Held here (rather than only inside the login handler) so the
    /// connection pipeline and dispatcher share one source of truth.
    push_tx: OutboundSender,
}

impl Session {
    pub fn new(manager: Arc<Manager>, handle: ConnectionHandle, push_tx: OutboundSender) -> Self {
        Self {
            manager,
            handle,
            user_id: AtomicI64::new(UserId::SENTINEL.get()),
            push_tx,
        }
    }

    pub fn push_tx(&self) -> OutboundSender {
        self.push_tx.clone()
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn user_id(&self) -> UserId {
        UserId::new(self.user_id.load(Ordering::Acquire))
    }

    pub fn is_logged_in(&self) -> bool {
        self.user_id() != UserId::SENTINEL
    }

    pub fn set_user_id(&self, user_id: UserId) {
        self.user_id.store(user_id.get(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_control::InMemoryDataManager;

    #[test]
    fn starts_as_sentinel_then_binds() {
        let manager = Arc::new(Manager::new(Box::new(InMemoryDataManager)));
        let (tx, _rx) = chat_control::events::channel();
        let session = Session::new(manager, ConnectionHandle::allocate(), tx);
        assert!(!session.is_logged_in());
        session.set_user_id(UserId::new(10000));
        assert!(session.is_logged_in());
        assert_eq!(session.user_id(), UserId::new(10000));
    }
}
