use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;

use crate::errors::{ControlError, ControlResult};
use crate::events::OutboundEvent;
use crate::ids::{PrivateRoomKey, UserId};
use crate::model::{next_message_key, MessageKey, MessageRecord};
use crate::room::RoomMembers;
use crate::user::User;

/// A two-party conversation. Grounded on the original's `PrivateRoom`:
/// fixed membership of exactly two users, a `can_be_used` flag that is
/// flipped once and never reset, and an ordered message log retained for a
/// bounded window.
pub struct PrivateRoom {
    user_a: UserId,
    user_b: UserId,
    members: RoomMembers,
    can_be_used: AtomicBool,
    messages: RwLock<BTreeMap<MessageKey, MessageRecord>>,
}

impl PrivateRoom {
    pub fn new(user_a: UserId, user_b: UserId, a: &Arc<User>, b: &Arc<User>) -> Self {
        let room = Self {
            user_a,
            user_b,
            members: RoomMembers::new(),
            can_be_used: AtomicBool::new(true),
            messages: RwLock::new(BTreeMap::new()),
        };
        room.members.join(user_a, a);
        room.members.join(user_b, b);
        room
    }

    pub fn key(&self) -> PrivateRoomKey {
        PrivateRoomKey::new(self.user_a, self.user_b)
    }

    pub fn user_ids(&self) -> (UserId, UserId) {
        (self.user_a, self.user_b)
    }

    pub fn has_member(&self, user_id: UserId) -> bool {
        user_id == self.user_a || user_id == self.user_b
    }

    pub fn other(&self, user_id: UserId) -> Option<UserId> {
        if user_id == self.user_a {
            Some(self.user_b)
        } else if user_id == self.user_b {
            Some(self.user_a)
        } else {
            None
        }
    }

    pub fn can_be_used(&self) -> bool {
        self.can_be_used.load(Ordering::Acquire)
    }

    /// Sets `can_be_used` false permanently. Membership is left intact so a
    /// racing send still resolves to a well-defined (though rejected)
    /// outcome rather than a dangling lookup.
    pub fn remove(&self) {
        self.can_be_used.store(false, Ordering::Release);
    }

    fn require_usable(&self) -> ControlResult<()> {
        if self.can_be_used() {
            Ok(())
        } else {
            Err(ControlError::PrivateRoomUnableToUse)
        }
    }

    pub fn send_message(&self, sender: UserId, body: &str, now_ms: i64) -> ControlResult<()> {
        self.require_usable()?;
        if !self.has_member(sender) {
            return Ok(());
        }
        let record = MessageRecord::normal(sender, body, now_ms);
        self.messages
            .write()
            .insert(next_message_key(now_ms), record);

        self.members.send_all(&OutboundEvent::new(json!({
            "type": "private_message",
            "data": { "user_id": sender.get(), "message": body },
        })));
        Ok(())
    }

    pub fn send_tip_message(&self, sender: UserId, body: &str, now_ms: i64) -> ControlResult<()> {
        self.require_usable()?;
        if !self.has_member(sender) {
            return Ok(());
        }
        let record = MessageRecord::tip(sender, body, now_ms);
        self.messages
            .write()
            .insert(next_message_key(now_ms), record);

        self.members.send_all(&OutboundEvent::new(json!({
            "type": "private_tip_message",
            "data": { "user_id": sender.get(), "message": body },
        })));
        Ok(())
    }

    pub fn messages_between(&self, from_ms: i64, to_ms: i64) -> ControlResult<Vec<MessageRecord>> {
        self.require_usable()?;
        if from_ms > to_ms {
            return Ok(Vec::new());
        }
        let messages = self.messages.read();
        Ok(messages
            .range((from_ms, u64::MIN)..=(to_ms, u64::MAX))
            .map(|(_, v)| v.clone())
            .collect())
    }

    /// Drops every message older than `cutoff_ms`, called periodically by a
    /// manager-wide sweep task (the original spawns one timer per room;
    /// here retention is driven from a single background task instead — see
    /// DESIGN.md).
    pub fn retain_since(&self, cutoff_ms: i64) {
        self.messages.write().retain(|(sent_at, _), _| *sent_at >= cutoff_ms);
    }

    pub fn message_count(&self) -> usize {
        self.messages.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::Profile;

    fn sample_user(id: i64) -> Arc<User> {
        Arc::new(User::new(
            UserId(id),
            Profile {
                user_name: format!("u{id}"),
                registered_time: 0,
                age: 0,
                email: String::new(),
                phone: String::new(),
                signature: String::new(),
            },
        ))
    }

    #[test]
    fn key_is_symmetric() {
        let a = sample_user(1);
        let b = sample_user(2);
        let room = PrivateRoom::new(UserId(1), UserId(2), &a, &b);
        assert_eq!(room.key(), PrivateRoomKey::new(UserId(2), UserId(1)));
    }

    #[test]
    fn send_from_non_member_is_noop() {
        let a = sample_user(1);
        let b = sample_user(2);
        let room = PrivateRoom::new(UserId(1), UserId(2), &a, &b);
        room.send_message(UserId(99), "hi", 1000).unwrap();
        assert_eq!(room.message_count(), 0);
    }

    #[test]
    fn removed_room_rejects_sends() {
        let a = sample_user(1);
        let b = sample_user(2);
        let room = PrivateRoom::new(UserId(1), UserId(2), &a, &b);
        room.remove();
        assert_eq!(
            room.send_message(UserId(1), "hi", 1000),
            Err(ControlError::PrivateRoomUnableToUse)
        );
    }

    #[test]
    fn messages_between_respects_bounds_and_inverted_range() {
        let a = sample_user(1);
        let b = sample_user(2);
        let room = PrivateRoom::new(UserId(1), UserId(2), &a, &b);
        room.send_message(UserId(1), "m1", 100).unwrap();
        room.send_message(UserId(2), "m2", 200).unwrap();
        room.send_message(UserId(1), "m3", 300).unwrap();

        assert_eq!(room.messages_between(100, 200).unwrap().len(), 2);
        assert_eq!(room.messages_between(300, 100).unwrap().len(), 0);
        assert_eq!(room.messages_between(0, 1000).unwrap().len(), 3);
    }

    #[test]
    fn retain_since_drops_old_messages() {
        let a = sample_user(1);
        let b = sample_user(2);
        let room = PrivateRoom::new(UserId(1), UserId(2), &a, &b);
        room.send_message(UserId(1), "old", 100).unwrap();
        room.send_message(UserId(2), "new", 9_000_000).unwrap();
        room.retain_since(1_000_000);
        assert_eq!(room.message_count(), 1);
    }
}
