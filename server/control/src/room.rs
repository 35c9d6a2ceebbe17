use std::collections::HashMap;
use std::sync::Weak;

use parking_lot::RwLock;

use crate::events::OutboundEvent;
use crate::ids::UserId;
use crate::user::User;

/// Membership table shared by [`crate::private_room::PrivateRoom`] and
/// [`crate::group_room::GroupRoom`]: a set of users plus the fan-out
/// primitive to reach them.
///
/// Grounded on the original's `TCPRoom`/`TextDataRoom` split — this
/// implementation collapses that split into one primitive since framing
/// lives entirely in the gateway crate here (see DESIGN.md).
#[derive(Default)]
pub struct RoomMembers {
    members: RwLock<HashMap<UserId, Weak<User>>>,
}

impl RoomMembers {
    pub fn new() -> Self {
        Self::default()
    }

    /// No-op if `user_id` is already a member.
    pub fn join(&self, user_id: UserId, user: &std::sync::Arc<User>) {
        self.members
            .write()
            .entry(user_id)
            .or_insert_with(|| std::sync::Arc::downgrade(user));
    }

    pub fn has_user(&self, user_id: UserId) -> bool {
        self.members.read().contains_key(&user_id)
    }

    /// No-op if `user_id` is not a member.
    pub fn leave(&self, user_id: UserId) {
        self.members.write().remove(&user_id);
    }

    pub fn member_ids(&self) -> Vec<UserId> {
        self.members.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Fan out to every live member. A dead weak reference (the user was
    /// dropped from the manager without first leaving every room — should
    /// not happen, but is tolerated) is silently skipped.
    pub fn send_all(&self, event: &OutboundEvent) {
        for weak in self.members.read().values() {
            if let Some(user) = weak.upgrade() {
                user.notify_all(event.clone());
            }
        }
    }

    /// Send to exactly one member. Non-members are silently dropped
    /// (returns without error) rather than surfacing membership to the
    /// caller.
    pub fn send_one(&self, event: &OutboundEvent, user_id: UserId) {
        if let Some(user) = self
            .members
            .read()
            .get(&user_id)
            .and_then(|weak| weak.upgrade())
        {
            user.notify_all(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::Profile;
    use serde_json::json;
    use std::sync::Arc;

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
    fn join_is_idempotent() {
        let room = RoomMembers::new();
        let user = sample_user(1);
        room.join(UserId(1), &user);
        room.join(UserId(1), &user);
        assert_eq!(room.len(), 1);
    }

    #[test]
    fn leave_unknown_user_is_noop() {
        let room = RoomMembers::new();
        room.leave(UserId(99));
        assert!(room.is_empty());
    }

    #[test]
    fn send_one_to_non_member_does_not_panic() {
        let room = RoomMembers::new();
        room.send_one(&OutboundEvent::new(json!({"k": "v"})), UserId(5));
    }

    #[test]
    fn dropped_user_is_skipped_on_fan_out() {
        let room = RoomMembers::new();
        {
            let user = sample_user(1);
            room.join(UserId(1), &user);
        }
        // `user` has been dropped; only the manager's strong Arc would have
        // kept it alive in the real system. Fan-out must not panic.
        room.send_all(&OutboundEvent::new(json!({"k": "v"})));
        assert!(!room.has_user(UserId(2)));
    }
}
