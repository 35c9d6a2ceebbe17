use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::json;

use crate::errors::{ControlError, ControlResult};
use crate::events::OutboundEvent;
use crate::ids::{GroupId, UserId};
use crate::model::{next_message_key, MessageKey, MessageRecord};
use crate::perms::{GroupPermission, Role};
use crate::room::RoomMembers;
use crate::user::User;

/// Per-member data that is not part of the permission table: display
/// nickname and a `[1, 100]`-clamped level. Grounded on the original's
/// `UserDataStructure`/`UserLevel<1, 100>`.
#[derive(Clone, Debug)]
pub struct MemberData {
    pub nickname: String,
    pub level: i64,
}

impl MemberData {
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            level: 1,
        }
    }
}

fn validate_level(level: i64) -> ControlResult<()> {
    if (1..=100).contains(&level) {
        Ok(())
    } else {
        Err(ControlError::GroupRoomUserLevelInvalid)
    }
}

struct MuteEntry {
    since: DateTime<Utc>,
    duration_mins: i64,
}

impl MuteEntry {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        now - self.since >= chrono::Duration::minutes(self.duration_mins)
    }
}

/// A many-member room with a role hierarchy, moderation actions, and mute
/// state. Grounded on the original's `GroupRoom`.
pub struct GroupRoom {
    group_id: GroupId,
    administrator: RwLock<UserId>,
    members: RoomMembers,
    member_data: RwLock<HashMap<UserId, MemberData>>,
    permissions: GroupPermission,
    muted: RwLock<HashMap<UserId, MuteEntry>>,
    can_be_used: AtomicBool,
    messages: RwLock<BTreeMap<MessageKey, MessageRecord>>,
}

impl GroupRoom {
    pub fn new(group_id: GroupId, administrator: UserId, admin_user: &Arc<User>) -> Self {
        let room = Self {
            group_id,
            administrator: RwLock::new(administrator),
            members: RoomMembers::new(),
            member_data: RwLock::new(HashMap::new()),
            permissions: GroupPermission::new(),
            muted: RwLock::new(HashMap::new()),
            can_be_used: AtomicBool::new(true),
            messages: RwLock::new(BTreeMap::new()),
        };
        room.members.join(administrator, admin_user);
        room.member_data
            .write()
            .insert(administrator, MemberData::new(format!("user{}", administrator.get())));
        room.permissions.set_user_role(administrator, Role::Administrator);
        room
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn administrator(&self) -> UserId {
        *self.administrator.read()
    }

    pub fn can_be_used(&self) -> bool {
        self.can_be_used.load(Ordering::Acquire)
    }

    pub fn remove(&self) {
        self.can_be_used.store(false, Ordering::Release);
    }

    fn require_usable(&self) -> ControlResult<()> {
        if self.can_be_used() {
            Ok(())
        } else {
            Err(ControlError::GroupRoomUnableToUse)
        }
    }

    pub fn has_member(&self, user_id: UserId) -> bool {
        self.members.has_user(user_id)
    }

    pub fn member_ids(&self) -> Vec<UserId> {
        self.members.member_ids()
    }

    /// Returns `false` (not an error) if already a member, matching the
    /// original's `bool addMember`.
    pub fn add_member(&self, user_id: UserId, user: &Arc<User>, nickname: impl Into<String>) -> bool {
        if self.has_member(user_id) {
            return false;
        }
        self.members.join(user_id, user);
        self.member_data
            .write()
            .insert(user_id, MemberData::new(nickname));
        self.permissions.set_user_role(user_id, Role::Default);
        true
    }

    pub fn remove_member(&self, user_id: UserId) -> bool {
        if !self.has_member(user_id) {
            return false;
        }
        self.members.leave(user_id);
        self.member_data.write().remove(&user_id);
        let _ = self.permissions.remove_user(user_id);
        self.muted.write().remove(&user_id);
        true
    }

    /// Auto-adds `user_id` as a member if absent, demotes the previous
    /// administrator to `Role::Default`, and promotes `user_id` to
    /// Administrator, all in one critical section (spec.md §4.8).
    pub fn set_administrator(&self, user_id: UserId, user: &Arc<User>) -> ControlResult<()> {
        self.require_usable()?;
        if !self.has_member(user_id) {
            self.add_member(user_id, user, format!("user{}", user_id.get()));
        }
        let previous = *self.administrator.read();
        self.permissions.set_user_role(previous, Role::Default);
        self.permissions.set_user_role(user_id, Role::Administrator);
        *self.administrator.write() = user_id;
        Ok(())
    }

    pub fn nickname(&self, user_id: UserId) -> ControlResult<String> {
        self.require_usable()?;
        self.member_data
            .read()
            .get(&user_id)
            .map(|d| d.nickname.clone())
            .ok_or(ControlError::UserNotExisted(user_id.get()))
    }

    pub fn level(&self, user_id: UserId) -> ControlResult<i64> {
        self.require_usable()?;
        self.member_data
            .read()
            .get(&user_id)
            .map(|d| d.level)
            .ok_or(ControlError::UserNotExisted(user_id.get()))
    }

    pub fn set_level(&self, user_id: UserId, level: i64) -> ControlResult<()> {
        self.require_usable()?;
        validate_level(level)?;
        let mut data = self.member_data.write();
        let entry = data
            .get_mut(&user_id)
            .ok_or(ControlError::UserNotExisted(user_id.get()))?;
        entry.level = level;
        Ok(())
    }

    pub fn role(&self, user_id: UserId) -> ControlResult<Role> {
        self.permissions.user_role(user_id)
    }

    pub fn user_has(&self, user_id: UserId, perm: &str) -> ControlResult<bool> {
        self.permissions.user_has(user_id, perm)
    }

    pub fn default_users(&self) -> Vec<UserId> {
        self.permissions.default_users()
    }

    pub fn operators(&self) -> Vec<UserId> {
        self.permissions.operators()
    }

    fn is_muted(&self, user_id: UserId, now: DateTime<Utc>) -> bool {
        let mut muted = self.muted.write();
        if let Some(entry) = muted.get(&user_id) {
            if entry.expired(now) {
                muted.remove(&user_id);
                false
            } else {
                true
            }
        } else {
            false
        }
    }

    pub fn send_message(&self, sender: UserId, body: &str, now: DateTime<Utc>) -> ControlResult<()> {
        self.require_usable()?;
        if !self.has_member(sender) || self.is_muted(sender, now) {
            return Ok(());
        }
        let now_ms = now.timestamp_millis();
        self.messages
            .write()
            .insert(next_message_key(now_ms), MessageRecord::normal(sender, body, now_ms));
        self.members.send_all(&OutboundEvent::new(json!({
            "type": "group_message",
            "data": { "group_id": self.group_id.get(), "user_id": sender.get(), "message": body },
        })));
        Ok(())
    }

    pub fn send_tip_message(&self, sender: UserId, body: &str, now: DateTime<Utc>) -> ControlResult<()> {
        self.require_usable()?;
        if !self.has_member(sender) {
            return Ok(());
        }
        let now_ms = now.timestamp_millis();
        self.messages
            .write()
            .insert(next_message_key(now_ms), MessageRecord::tip(sender, body, now_ms));
        self.members.send_all(&OutboundEvent::new(json!({
            "type": "group_tip_message",
            "data": { "group_id": self.group_id.get(), "user_id": sender.get(), "message": body },
        })));
        Ok(())
    }

    pub fn send_user_tip_message(
        &self,
        sender: UserId,
        body: &str,
        target: UserId,
        now: DateTime<Utc>,
    ) -> ControlResult<()> {
        self.require_usable()?;
        if !self.has_member(sender) {
            return Ok(());
        }
        let now_ms = now.timestamp_millis();
        self.messages.write().insert(
            next_message_key(now_ms),
            MessageRecord::user_tip(sender, body, target, now_ms),
        );
        self.members.send_one(
            &OutboundEvent::new(json!({
                "type": "group_user_tip_message",
                "data": { "group_id": self.group_id.get(), "user_id": sender.get(), "message": body },
            })),
            target,
        );
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

    pub fn retain_since(&self, cutoff_ms: i64) {
        self.messages.write().retain(|(sent_at, _), _| *sent_at >= cutoff_ms);
    }

    fn roles_allow_action(&self, executor: UserId, target: UserId) -> ControlResult<bool> {
        if executor == target || !self.has_member(target) || !self.has_member(executor) {
            return Ok(false);
        }
        let executor_role = self.permissions.user_role(executor)?;
        let target_role = self.permissions.user_role(target)?;
        Ok(target_role < executor_role)
    }

    pub fn mute_user(&self, executor: UserId, target: UserId, minutes: i64, now: DateTime<Utc>) -> ControlResult<bool> {
        self.require_usable()?;
        if !self.roles_allow_action(executor, target)? {
            return Ok(false);
        }
        self.muted.write().insert(
            target,
            MuteEntry {
                since: now,
                duration_mins: minutes,
            },
        );
        let (target_name, executor_name) = (self.nickname(target)?, self.nickname(executor)?);
        self.send_tip_message(executor, &format!("{target_name} was muted by {executor_name}"), now)?;
        Ok(true)
    }

    pub fn unmute_user(&self, executor: UserId, target: UserId, now: DateTime<Utc>) -> ControlResult<bool> {
        self.require_usable()?;
        if !self.roles_allow_action(executor, target)? {
            return Ok(false);
        }
        self.muted.write().remove(&target);
        let (target_name, executor_name) = (self.nickname(target)?, self.nickname(executor)?);
        self.send_tip_message(executor, &format!("{target_name} was unmuted by {executor_name}"), now)?;
        Ok(true)
    }

    pub fn kick_user(&self, executor: UserId, target: UserId, now: DateTime<Utc>) -> ControlResult<bool> {
        self.require_usable()?;
        if !self.roles_allow_action(executor, target)? {
            return Ok(false);
        }
        let (target_name, executor_name) = (self.nickname(target)?, self.nickname(executor)?);
        self.send_tip_message(executor, &format!("{target_name} was kicked by {executor_name}"), now)?;
        self.remove_member(target);
        Ok(true)
    }

    /// Administrator-only, and only promotes an adjacent role (Default →
    /// Operator) per spec.md §4.8 — unlike mute/kick/unmute this is not a
    /// plain "higher role wins" tie-break.
    pub fn add_operator(&self, executor: UserId, target: UserId) -> ControlResult<bool> {
        self.require_usable()?;
        if executor == target || !self.has_member(executor) || !self.has_member(target) {
            return Ok(false);
        }
        if self.permissions.user_role(executor)? != Role::Administrator {
            return Ok(false);
        }
        if self.permissions.user_role(target)? != Role::Default {
            return Ok(false);
        }
        self.permissions.set_user_role(target, Role::Operator);
        let (target_name, executor_name) = (self.nickname(target)?, self.nickname(executor)?);
        self.send_tip_message(
            executor,
            &format!("{target_name} was turned operator by {executor_name}"),
            Utc::now(),
        )?;
        Ok(true)
    }

    /// Administrator-only, and only demotes an adjacent role (Operator →
    /// Default) per spec.md §4.8.
    pub fn remove_operator(&self, executor: UserId, target: UserId) -> ControlResult<bool> {
        self.require_usable()?;
        if executor == target || !self.has_member(executor) || !self.has_member(target) {
            return Ok(false);
        }
        if self.permissions.user_role(executor)? != Role::Administrator {
            return Ok(false);
        }
        if self.permissions.user_role(target)? != Role::Operator {
            return Ok(false);
        }
        self.permissions.set_user_role(target, Role::Default);
        let (target_name, executor_name) = (self.nickname(target)?, self.nickname(executor)?);
        self.send_tip_message(
            executor,
            &format!("{target_name} was removed as operator by {executor_name}"),
            Utc::now(),
        )?;
        Ok(true)
    }
}
