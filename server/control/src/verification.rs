use std::collections::HashMap;

use parking_lot::RwLock;

use crate::errors::{ControlError, ControlResult};
use crate::ids::{GroupId, GroupVerificationKey, PrivateRoomKey, UserId};
use crate::model::{FriendVerification, GroupVerification};

/// Outcome of acknowledging one side of a handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckOutcome {
    /// The other side has not acked yet.
    Pending,
    /// Both sides have now acked; the caller should finalize (create the
    /// room / add the member, update friend or group lists, notify).
    Completed,
}

/// Canonical bilateral-handshake bookkeeping for both friend requests and
/// group-join requests. Grounded on the original's `VerificationManager`:
/// this struct owns exactly the two maps and the completion arithmetic; the
/// side effects the original interleaves with that bookkeeping (room
/// creation, per-user inbox updates, notifications) are the caller's
/// responsibility here — see `manager.rs` — to avoid `VerificationEngine`
/// needing a back-reference to user/room state.
#[derive(Default)]
pub struct VerificationEngine {
    friend_verifications: RwLock<HashMap<PrivateRoomKey, FriendVerification>>,
    group_verifications: RwLock<HashMap<GroupVerificationKey, GroupVerification>>,
}

impl VerificationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    // -- friend handshake --

    pub fn has_friend_verification(&self, a: UserId, b: UserId) -> bool {
        self.friend_verifications
            .read()
            .contains_key(&PrivateRoomKey::new(a, b))
    }

    /// Creates the handshake entry and immediately acks `a`'s side, per
    /// spec.md §4.10: the initiator's ack is implicit in the act of
    /// requesting. Only `b`'s subsequent ack is needed to complete it.
    pub fn start_friend_verification(&self, a: UserId, b: UserId) -> ControlResult<()> {
        if a == b {
            return Err(ControlError::InvalidVerification);
        }
        let mut table = self.friend_verifications.write();
        let key = PrivateRoomKey::new(a, b);
        if table.contains_key(&key) {
            return Err(ControlError::VerificationExisted);
        }
        let mut entry = FriendVerification::new(a, b);
        entry.ack(a);
        table.insert(key, entry);
        Ok(())
    }

    /// Acks on behalf of `acker`. Returns `Completed` once both sides have
    /// acked, removing the entry from the table in the same step (mirrors
    /// the original's erase-on-completion behavior — a completed handshake
    /// cannot be acked again).
    pub fn ack_friend_verification(&self, a: UserId, b: UserId, acker: UserId) -> ControlResult<AckOutcome> {
        if a == b {
            return Err(ControlError::InvalidVerification);
        }
        let mut table = self.friend_verifications.write();
        let key = PrivateRoomKey::new(a, b);
        let entry = table
            .get_mut(&key)
            .ok_or(ControlError::VerificationNotExisted)?;
        entry.ack(acker);
        if entry.is_complete() {
            table.remove(&key);
            Ok(AckOutcome::Completed)
        } else {
            Ok(AckOutcome::Pending)
        }
    }

    pub fn remove_friend_verification(&self, a: UserId, b: UserId) -> ControlResult<()> {
        if a == b {
            return Err(ControlError::InvalidVerification);
        }
        let mut table = self.friend_verifications.write();
        let key = PrivateRoomKey::new(a, b);
        if table.remove(&key).is_none() {
            return Err(ControlError::VerificationNotExisted);
        }
        Ok(())
    }

    // -- group handshake --

    pub fn has_group_verification(&self, group_id: GroupId, user_id: UserId) -> bool {
        self.group_verifications
            .read()
            .contains_key(&GroupVerificationKey::new(group_id, user_id))
    }

    /// Creates the handshake entry and immediately acks the applicant's
    /// side, mirroring `start_friend_verification`: only the group admin's
    /// subsequent ack is needed to complete it.
    pub fn start_group_verification(&self, group_id: GroupId, user_id: UserId) -> ControlResult<()> {
        let mut table = self.group_verifications.write();
        let key = GroupVerificationKey::new(group_id, user_id);
        if table.contains_key(&key) {
            return Err(ControlError::VerificationExisted);
        }
        let mut entry = GroupVerification::new(group_id, user_id);
        entry.applicant_acked = true;
        table.insert(key, entry);
        Ok(())
    }

    pub fn ack_group_admin(&self, group_id: GroupId, user_id: UserId) -> ControlResult<AckOutcome> {
        let mut table = self.group_verifications.write();
        let key = GroupVerificationKey::new(group_id, user_id);
        let entry = table
            .get_mut(&key)
            .ok_or(ControlError::VerificationNotExisted)?;
        entry.group_admin_acked = true;
        if entry.is_complete() {
            table.remove(&key);
            Ok(AckOutcome::Completed)
        } else {
            Ok(AckOutcome::Pending)
        }
    }

    pub fn ack_group_applicant(&self, group_id: GroupId, user_id: UserId) -> ControlResult<AckOutcome> {
        let mut table = self.group_verifications.write();
        let key = GroupVerificationKey::new(group_id, user_id);
        let entry = table
            .get_mut(&key)
            .ok_or(ControlError::VerificationNotExisted)?;
        entry.applicant_acked = true;
        if entry.is_complete() {
            table.remove(&key);
            Ok(AckOutcome::Completed)
        } else {
            Ok(AckOutcome::Pending)
        }
    }

    pub fn remove_group_verification(&self, group_id: GroupId, user_id: UserId) -> ControlResult<()> {
        let mut table = self.group_verifications.write();
        let key = GroupVerificationKey::new(group_id, user_id);
        if table.remove(&key).is_none() {
            return Err(ControlError::VerificationNotExisted);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_friend_verification_rejected() {
        let engine = VerificationEngine::new();
        assert_eq!(
            engine.start_friend_verification(UserId(1), UserId(1)),
            Err(ControlError::InvalidVerification)
        );
    }

    #[test]
    fn duplicate_friend_verification_rejected() {
        let engine = VerificationEngine::new();
        engine.start_friend_verification(UserId(1), UserId(2)).unwrap();
        assert_eq!(
            engine.start_friend_verification(UserId(2), UserId(1)),
            Err(ControlError::VerificationExisted)
        );
    }

    #[test]
    fn friend_verification_completes_on_second_ack_and_then_disappears() {
        let engine = VerificationEngine::new();
        engine.start_friend_verification(UserId(1), UserId(2)).unwrap();
        assert_eq!(
            engine.ack_friend_verification(UserId(1), UserId(2), UserId(1)),
            Ok(AckOutcome::Pending)
        );
        assert_eq!(
            engine.ack_friend_verification(UserId(1), UserId(2), UserId(2)),
            Ok(AckOutcome::Completed)
        );
        assert_eq!(
            engine.ack_friend_verification(UserId(1), UserId(2), UserId(1)),
            Err(ControlError::VerificationNotExisted)
        );
    }

    #[test]
    fn group_verification_applicant_is_preacked_so_admin_ack_completes_it() {
        let engine = VerificationEngine::new();
        engine.start_group_verification(GroupId(10), UserId(1)).unwrap();
        assert_eq!(
            engine.ack_group_admin(GroupId(10), UserId(1)),
            Ok(AckOutcome::Completed)
        );
        assert_eq!(
            engine.ack_group_applicant(GroupId(10), UserId(1)),
            Err(ControlError::VerificationNotExisted)
        );
    }
}
