use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::json;
use tracing::info;

use crate::connection::ConnectionHandle;
use crate::data_manager::{DataManager, InMemoryDataManager};
use crate::errors::{ControlError, ControlResult};
use crate::events::OutboundSender;
use crate::group_room::GroupRoom;
use crate::ids::{GroupId, PrivateRoomKey, UserId};
use crate::model::DeviceType;
use crate::perms::Role;
use crate::private_room::PrivateRoom;
use crate::user::{Profile, User};
use crate::verification::{AckOutcome, VerificationEngine};

/// Owns the full in-memory object graph: users, rooms, and pending
/// handshakes. Grounded on the original's `Manager` + `VerificationManager`
/// pair, merged into one orchestrator here since the split between "room
/// bookkeeping" and "verification bookkeeping" in the original exists only
/// because both needed the same global `serverManager` singleton — in this
/// design `Manager` already owns everything both of them touched.
pub struct Manager {
    users: RwLock<HashMap<UserId, Arc<User>>>,
    private_rooms: RwLock<HashMap<PrivateRoomKey, Arc<PrivateRoom>>>,
    group_rooms: RwLock<HashMap<GroupId, Arc<GroupRoom>>>,
    connection_owners: RwLock<HashMap<ConnectionHandle, UserId>>,
    verification: VerificationEngine,
    data_manager: Box<dyn DataManager>,
    next_user_id: AtomicI64,
    next_group_id: AtomicI64,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new(Box::new(InMemoryDataManager))
    }
}

impl Manager {
    pub fn new(data_manager: Box<dyn DataManager>) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            private_rooms: RwLock::new(HashMap::new()),
            group_rooms: RwLock::new(HashMap::new()),
            connection_owners: RwLock::new(HashMap::new()),
            verification: VerificationEngine::new(),
            data_manager,
            next_user_id: AtomicI64::new(10_000),
            next_group_id: AtomicI64::new(10_000),
        }
    }

    // -- users --

    pub fn add_new_user(&self, profile: Profile) -> UserId {
        let id = UserId(self.next_user_id.fetch_add(1, Ordering::Relaxed));
        let user = Arc::new(User::new(id, profile));
        self.users.write().insert(id, user);
        self.data_manager.add_new_user(id);
        info!(user_id = %id, "user registered");
        id
    }

    pub fn has_user(&self, user_id: UserId) -> bool {
        self.users.read().contains_key(&user_id)
    }

    pub fn get_user(&self, user_id: UserId) -> ControlResult<Arc<User>> {
        self.users
            .read()
            .get(&user_id)
            .cloned()
            .ok_or(ControlError::UserNotExisted(user_id.get()))
    }

    pub fn user_count(&self) -> usize {
        self.users.read().len()
    }

    pub fn change_password(&self, user_id: UserId, old: &str, new: &str) -> ControlResult<()> {
        let user = self.get_user(user_id)?;
        user.change_password(old, new)?;
        self.data_manager.change_password(user_id);
        Ok(())
    }

    pub fn verify_password(&self, user_id: UserId, password: &str) -> ControlResult<()> {
        let user = self.get_user(user_id)?;
        user.verify_password(password)?;
        if !self.data_manager.verify_password(user_id) {
            return Err(ControlError::PasswordMismatched);
        }
        Ok(())
    }

    // -- connections --

    /// Registers `handle` with the sentinel user, matching spec.md §4.2
    /// step (c): the gateway calls this immediately after the TLS
    /// handshake, before any `login`.
    pub fn register_connection(&self, handle: ConnectionHandle) {
        self.connection_owners.write().insert(handle, UserId::SENTINEL);
    }

    /// Binds `handle` to `user_id` and attaches the connection's outbound
    /// sender. Fails only if the handle is already bound to a *different*,
    /// already-logged-in user — rebinding a handle still holding the
    /// sentinel (the pre-login registration) is the expected `login` path.
    pub fn attach_connection(
        &self,
        user_id: UserId,
        handle: ConnectionHandle,
        device: DeviceType,
        tx: OutboundSender,
    ) -> ControlResult<()> {
        let user = self.get_user(user_id)?;
        let mut owners = self.connection_owners.write();
        if matches!(owners.get(&handle), Some(&existing) if existing != UserId::SENTINEL) {
            return Err(ControlError::SocketPointerExisted);
        }
        owners.insert(handle, user_id);
        drop(owners);
        user.attach(handle, device, tx);
        Ok(())
    }

    /// Idempotent: detaching an unknown handle is a no-op, since the
    /// connection's teardown path and an explicit logout can race.
    pub fn detach_connection(&self, handle: ConnectionHandle) {
        if let Some(user_id) = self.connection_owners.write().remove(&handle) {
            if let Ok(user) = self.get_user(user_id) {
                user.detach(handle);
            }
        }
    }

    pub fn connection_owner(&self, handle: ConnectionHandle) -> ControlResult<UserId> {
        self.connection_owners
            .read()
            .get(&handle)
            .copied()
            .ok_or(ControlError::SocketPointerNotExisted)
    }

    // -- private rooms --

    pub fn has_private_room(&self, a: UserId, b: UserId) -> bool {
        self.private_rooms
            .read()
            .contains_key(&PrivateRoomKey::new(a, b))
    }

    pub fn get_private_room(&self, a: UserId, b: UserId) -> ControlResult<Arc<PrivateRoom>> {
        self.private_rooms
            .read()
            .get(&PrivateRoomKey::new(a, b))
            .cloned()
            .ok_or(ControlError::PrivateRoomNotExisted)
    }

    fn create_private_room(&self, a: UserId, b: UserId) -> ControlResult<Arc<PrivateRoom>> {
        if self.has_private_room(a, b) {
            return Err(ControlError::PrivateRoomExisted);
        }
        let ua = self.get_user(a)?;
        let ub = self.get_user(b)?;
        let room = Arc::new(PrivateRoom::new(a, b, &ua, &ub));
        self.private_rooms
            .write()
            .insert(PrivateRoomKey::new(a, b), room.clone());
        Ok(room)
    }

    pub fn remove_private_room(&self, a: UserId, b: UserId) -> ControlResult<()> {
        let room = self
            .private_rooms
            .write()
            .remove(&PrivateRoomKey::new(a, b))
            .ok_or(ControlError::PrivateRoomNotExisted)?;
        room.remove();
        Ok(())
    }

    // -- group rooms --

    pub fn add_group_room(&self, administrator: UserId) -> ControlResult<GroupId> {
        let admin_user = self.get_user(administrator)?;
        let id = GroupId(self.next_group_id.fetch_add(1, Ordering::Relaxed));
        let room = Arc::new(GroupRoom::new(id, administrator, &admin_user));
        self.group_rooms.write().insert(id, room);
        admin_user.add_group(id);
        Ok(id)
    }

    pub fn has_group_room(&self, group_id: GroupId) -> bool {
        self.group_rooms.read().contains_key(&group_id)
    }

    pub fn get_group_room(&self, group_id: GroupId) -> ControlResult<Arc<GroupRoom>> {
        self.group_rooms
            .read()
            .get(&group_id)
            .cloned()
            .ok_or(ControlError::GroupRoomNotExisted(group_id.get()))
    }

    /// Removing a room must drop `group_id` from every member's group set
    /// too (including the admin), or invariant 2 (`g ∈ groups(u) ⇔
    /// u ∈ members(g)`) holds on the room side and breaks on the user side
    /// — mirrors the symmetric update `leave_group` performs for a single
    /// member.
    pub fn remove_group_room(&self, group_id: GroupId) -> ControlResult<()> {
        let room = self
            .group_rooms
            .write()
            .remove(&group_id)
            .ok_or(ControlError::GroupRoomNotExisted(group_id.get()))?;
        for member_id in room.member_ids() {
            if let Ok(user) = self.get_user(member_id) {
                user.remove_group(group_id);
            }
        }
        room.remove();
        Ok(())
    }

    // -- friend verification handshake --

    /// Starts a friend-add handshake between `a` and `b`. Grounded on
    /// `VerificationManager::addFriendRoomVerification`: rejects
    /// self-friending, requires both ids to exist, rejects if already
    /// friends, and notifies `b` of the new inbound request.
    pub fn add_friend_verification(&self, a: UserId, b: UserId) -> ControlResult<()> {
        if a == b {
            return Err(ControlError::InvalidVerification);
        }
        if !self.has_user(a) {
            return Err(ControlError::UserNotExisted(a.get()));
        }
        if !self.has_user(b) {
            return Err(ControlError::UserNotExisted(b.get()));
        }
        if self.has_private_room(a, b) {
            return Err(ControlError::PrivateRoomExisted);
        }
        self.verification.start_friend_verification(a, b)?;

        let user_a = self.get_user(a)?;
        let user_b = self.get_user(b)?;
        user_a.add_friend_verification(crate::model::FriendVerificationEntry {
            user_id: b,
            direction: crate::model::VerificationDirection::Sent,
        });
        user_b.add_friend_verification(crate::model::FriendVerificationEntry {
            user_id: a,
            direction: crate::model::VerificationDirection::Received,
        });
        user_b.notify_all(crate::events::OutboundEvent::new(json!({
            "type": "added_friend_verification",
            "userid": a.get(),
            "message": "",
        })));
        Ok(())
    }

    /// Acks the handshake on behalf of `acker` (must be `a` or `b`). Once
    /// both have acked, creates the private room, updates both friend
    /// lists, clears both inboxes, and notifies the other party.
    pub fn set_friend_verified(&self, a: UserId, b: UserId, acker: UserId) -> ControlResult<bool> {
        let outcome = self.verification.ack_friend_verification(a, b, acker)?;
        if outcome != AckOutcome::Completed {
            return Ok(false);
        }

        self.create_private_room(a, b)?;

        let user_a = self.get_user(a)?;
        let user_b = self.get_user(b)?;
        user_a.add_friend(b);
        user_a.remove_friend_verification(b);
        user_b.add_friend(a);
        user_b.remove_friend_verification(a);

        // Notify whichever side did not just ack, carrying the acker's id —
        // e.g. when the recipient accepts, the original requester is told
        // who accepted, not the other way around.
        let (notify, notified_id) = if acker == b { (&user_a, b) } else { (&user_b, a) };
        notify.notify_all(crate::events::OutboundEvent::new(json!({
            "type": "added_friend",
            "userid": notified_id.get(),
        })));
        Ok(true)
    }

    pub fn remove_friend_verification(&self, a: UserId, b: UserId) -> ControlResult<()> {
        self.verification.remove_friend_verification(a, b)?;

        let user_a = self.get_user(a)?;
        let user_b = self.get_user(b)?;
        user_a.remove_friend_verification(b);
        user_b.remove_friend_verification(a);

        user_a.notify_all(crate::events::OutboundEvent::new(json!({
            "type": "rejected_to_add_friend",
            "userid": b.get(),
        })));
        user_b.notify_all(crate::events::OutboundEvent::new(json!({
            "type": "rejected_to_add_friend",
            "userid": a.get(),
        })));
        Ok(())
    }

    // -- group verification handshake --

    pub fn add_group_verification(&self, group_id: GroupId, user_id: UserId) -> ControlResult<()> {
        let room = self.get_group_room(group_id)?;
        if !self.has_user(user_id) {
            return Err(ControlError::UserNotExisted(user_id.get()));
        }
        self.verification.start_group_verification(group_id, user_id)?;

        let applicant = self.get_user(user_id)?;
        applicant.add_group_verification(crate::model::GroupVerificationEntry {
            group_id,
            user_id,
            direction: crate::model::VerificationDirection::Sent,
        });

        let admin_id = room.administrator();
        let admin = self.get_user(admin_id)?;
        admin.add_group_verification(crate::model::GroupVerificationEntry {
            group_id,
            user_id,
            direction: crate::model::VerificationDirection::Received,
        });
        admin.notify_all(crate::events::OutboundEvent::new(json!({
            "type": "added_group_verification",
            "groupid": group_id.get(),
            "userid": user_id.get(),
            "message": "",
        })));
        Ok(())
    }

    /// The group administrator's side of the handshake.
    pub fn set_group_verified_by_admin(&self, group_id: GroupId, user_id: UserId) -> ControlResult<bool> {
        let outcome = self.verification.ack_group_admin(group_id, user_id)?;
        self.finish_group_verification_if_complete(group_id, user_id, outcome)
    }

    /// The applicant's own side of the handshake.
    pub fn set_group_verified_by_applicant(&self, group_id: GroupId, user_id: UserId) -> ControlResult<bool> {
        let outcome = self.verification.ack_group_applicant(group_id, user_id)?;
        self.finish_group_verification_if_complete(group_id, user_id, outcome)
    }

    fn finish_group_verification_if_complete(
        &self,
        group_id: GroupId,
        user_id: UserId,
        outcome: AckOutcome,
    ) -> ControlResult<bool> {
        if outcome != AckOutcome::Completed {
            return Ok(false);
        }
        let room = self.get_group_room(group_id)?;
        let user = self.get_user(user_id)?;
        room.add_member(user_id, &user, format!("user{}", user_id.get()));
        user.add_group(group_id);
        user.remove_group_verification(group_id, user_id);

        let admin = self.get_user(room.administrator())?;
        admin.remove_group_verification(group_id, user_id);

        user.notify_all(crate::events::OutboundEvent::new(json!({
            "type": "added_group",
            "groupid": group_id.get(),
        })));
        Ok(true)
    }

    pub fn remove_group_verification(&self, group_id: GroupId, user_id: UserId) -> ControlResult<()> {
        self.verification.remove_group_verification(group_id, user_id)?;

        let room = self.get_group_room(group_id)?;
        let admin = self.get_user(room.administrator())?;
        let user = self.get_user(user_id)?;
        admin.remove_group_verification(group_id, user_id);
        user.remove_group_verification(group_id, user_id);

        user.notify_all(crate::events::OutboundEvent::new(json!({
            "type": "rejected_to_add_group",
            "groupid": group_id.get(),
        })));
        admin.notify_all(crate::events::OutboundEvent::new(json!({
            "type": "rejected_to_add_member_to_group",
            "groupid": group_id.get(),
            "userid": user_id.get(),
            "message": "",
        })));
        Ok(())
    }

    /// Symmetric removal: drops both friend-set entries and the backing
    /// private room. Fails with `PrivateRoomNotExisted` if `a`/`b` were not
    /// friends, making a second call the idempotence boundary spec.md §8
    /// requires (`remove_friend` ... "returns error on the second" call).
    pub fn remove_friend(&self, a: UserId, b: UserId) -> ControlResult<()> {
        self.remove_private_room(a, b)?;
        let user_a = self.get_user(a)?;
        let user_b = self.get_user(b)?;
        user_a.remove_friend(b);
        user_b.remove_friend(a);
        Ok(())
    }

    /// Removes `user_id` from `group_id`'s membership. The group's
    /// administrator may not leave this way (spec.md §3 invariant: admin is
    /// always a member) — use `set_administrator` to transfer, then leave.
    pub fn leave_group(&self, group_id: GroupId, user_id: UserId) -> ControlResult<()> {
        let room = self.get_group_room(group_id)?;
        if room.administrator() == user_id {
            return Err(ControlError::PermissionDenied);
        }
        if !room.has_member(user_id) {
            return Err(ControlError::UserNotExisted(user_id.get()));
        }
        room.remove_member(user_id);
        let user = self.get_user(user_id)?;
        user.remove_group(group_id);
        Ok(())
    }

    /// Periodic retention sweep: drops messages older than `cutoff_ms` from
    /// every room. Run from a single background task rather than one timer
    /// per room.
    pub fn sweep_message_retention(&self, cutoff_ms: i64) {
        for room in self.private_rooms.read().values() {
            room.retain_since(cutoff_ms);
        }
        for room in self.group_rooms.read().values() {
            room.retain_since(cutoff_ms);
        }
    }

    pub fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Convenience used by the gateway when promoting a group's default
    /// role member to operator on creation (an administrator always starts
    /// with `Role::Administrator`; this just exposes that for assertions).
    pub fn default_group_role() -> Role {
        Role::Default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_profile(name: &str) -> Profile {
        Profile {
            user_name: name.to_string(),
            registered_time: 0,
            age: 0,
            email: String::new(),
            phone: String::new(),
            signature: String::new(),
        }
    }

    #[test]
    fn register_then_lookup() {
        let m = Manager::default();
        let id = m.add_new_user(sample_profile("alice"));
        assert!(m.has_user(id));
        assert_eq!(m.get_user(id).unwrap().profile().user_name, "alice");
    }

    #[test]
    fn friend_handshake_creates_private_room_and_updates_friend_lists() {
        let m = Manager::default();
        let a = m.add_new_user(sample_profile("a"));
        let b = m.add_new_user(sample_profile("b"));

        m.add_friend_verification(a, b).unwrap();
        assert!(!m.set_friend_verified(a, b, a).unwrap());
        assert!(m.set_friend_verified(a, b, b).unwrap());

        assert!(m.has_private_room(a, b));
        assert!(m.get_user(a).unwrap().has_friend(b));
        assert!(m.get_user(b).unwrap().has_friend(a));
        assert!(m.get_user(a).unwrap().friend_verifications().is_empty());
    }

    #[test]
    fn friend_verification_rejects_self_and_existing_room() {
        let m = Manager::default();
        let a = m.add_new_user(sample_profile("a"));
        assert_eq!(
            m.add_friend_verification(a, a),
            Err(ControlError::InvalidVerification)
        );
    }

    #[test]
    fn group_handshake_adds_member_once_both_sides_ack() {
        let m = Manager::default();
        let admin = m.add_new_user(sample_profile("admin"));
        let applicant = m.add_new_user(sample_profile("applicant"));
        let group = m.add_group_room(admin).unwrap();

        m.add_group_verification(group, applicant).unwrap();
        // The applicant's ack is implicit in `add_group_verification`; the
        // admin's ack alone completes the handshake.
        assert!(m
            .set_group_verified_by_admin(group, applicant)
            .unwrap());

        assert!(m.get_group_room(group).unwrap().has_member(applicant));
        assert!(m.get_user(applicant).unwrap().has_group(group));
    }

    #[test]
    fn detach_unknown_connection_is_noop() {
        let m = Manager::default();
        m.detach_connection(ConnectionHandle::allocate());
    }

    #[test]
    fn attach_connection_twice_on_same_handle_fails() {
        let m = Manager::default();
        let user_id = m.add_new_user(sample_profile("a"));
        let handle = ConnectionHandle::allocate();
        let (tx, _rx) = crate::events::channel();
        m.attach_connection(user_id, handle, DeviceType::Unknown, tx.clone())
            .unwrap();
        assert_eq!(
            m.attach_connection(user_id, handle, DeviceType::Unknown, tx),
            Err(ControlError::SocketPointerExisted)
        );
    }

    #[test]
    fn register_connection_then_login_rebinds_sentinel() {
        let m = Manager::default();
        let user_id = m.add_new_user(sample_profile("a"));
        let handle = ConnectionHandle::allocate();
        m.register_connection(handle);
        assert_eq!(m.connection_owner(handle).unwrap(), UserId::SENTINEL);

        let (tx, _rx) = crate::events::channel();
        m.attach_connection(user_id, handle, DeviceType::Unknown, tx)
            .unwrap();
        assert_eq!(m.connection_owner(handle).unwrap(), user_id);
    }

    #[test]
    fn remove_friend_is_not_idempotent_the_second_time() {
        let m = Manager::default();
        let a = m.add_new_user(sample_profile("a"));
        let b = m.add_new_user(sample_profile("b"));
        m.add_friend_verification(a, b).unwrap();
        m.set_friend_verified(a, b, b).unwrap();

        m.remove_friend(a, b).unwrap();
        assert!(!m.get_user(a).unwrap().has_friend(b));
        assert!(!m.has_private_room(a, b));
        assert_eq!(
            m.remove_friend(a, b),
            Err(ControlError::PrivateRoomNotExisted)
        );
    }

    #[test]
    fn administrator_cannot_leave_own_group() {
        let m = Manager::default();
        let admin = m.add_new_user(sample_profile("admin"));
        let group = m.add_group_room(admin).unwrap();
        assert_eq!(
            m.leave_group(group, admin),
            Err(ControlError::PermissionDenied)
        );
    }

    #[test]
    fn member_can_leave_group() {
        let m = Manager::default();
        let admin = m.add_new_user(sample_profile("admin"));
        let applicant = m.add_new_user(sample_profile("applicant"));
        let group = m.add_group_room(admin).unwrap();
        m.add_group_verification(group, applicant).unwrap();
        m.set_group_verified_by_admin(group, applicant).unwrap();

        m.leave_group(group, applicant).unwrap();
        assert!(!m.get_group_room(group).unwrap().has_member(applicant));
        assert!(!m.get_user(applicant).unwrap().has_group(group));
    }

    #[test]
    fn remove_group_room_clears_group_from_every_members_group_set() {
        let m = Manager::default();
        let admin = m.add_new_user(sample_profile("admin"));
        let applicant = m.add_new_user(sample_profile("applicant"));
        let group = m.add_group_room(admin).unwrap();
        m.add_group_verification(group, applicant).unwrap();
        m.set_group_verified_by_admin(group, applicant).unwrap();

        m.remove_group_room(group).unwrap();
        assert!(!m.get_user(admin).unwrap().has_group(group));
        assert!(!m.get_user(applicant).unwrap().has_group(group));
    }

    #[test]
    fn friend_accept_notifies_requester_with_acceptors_id() {
        let m = Manager::default();
        let requester = m.add_new_user(sample_profile("requester"));
        let acceptor = m.add_new_user(sample_profile("acceptor"));

        m.add_friend_verification(requester, acceptor).unwrap();

        let (tx, mut rx) = crate::events::channel();
        m.get_user(requester)
            .unwrap()
            .attach(ConnectionHandle::allocate(), DeviceType::Unknown, tx);

        assert!(m
            .set_friend_verified(requester, acceptor, acceptor)
            .unwrap());

        let event = rx.try_recv().expect("requester should be notified");
        assert_eq!(event.0["type"], "added_friend");
        assert_eq!(event.0["userid"], acceptor.get());
    }
}
