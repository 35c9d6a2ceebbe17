use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::ids::{GroupId, UserId};

/// `(sent_at_ms, sequence)` — the canonical ordering/uniqueness key for a
/// room's message log. The sequence tie-breaks messages sent within the
/// same millisecond; it carries no meaning beyond program-wide insertion
/// order.
pub type MessageKey = (i64, u64);

static MESSAGE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

pub fn next_message_key(sent_at: i64) -> MessageKey {
    (sent_at, MESSAGE_SEQUENCE.fetch_add(1, Ordering::Relaxed))
}

/// Client-declared kind of device, used for targeted notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Unknown,
    PersonalComputer,
    Phone,
    Web,
}

impl DeviceType {
    pub fn from_str(s: &str) -> Self {
        match s {
            "PersonalComputer" | "pc" => DeviceType::PersonalComputer,
            "Phone" | "phone" => DeviceType::Phone,
            "Web" | "web" => DeviceType::Web,
            _ => DeviceType::Unknown,
        }
    }
}

/// Kind of message a [`MessageRecord`] carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Normal,
    Tip,
}

/// One entry in a room's message log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageRecord {
    pub sender_id: UserId,
    pub body: String,
    pub kind: MessageKind,
    /// Set only for unicast tip messages inside a group.
    pub target: Option<UserId>,
    pub sent_at: i64,
}

impl MessageRecord {
    pub fn normal(sender_id: UserId, body: impl Into<String>, sent_at: i64) -> Self {
        Self {
            sender_id,
            body: body.into(),
            kind: MessageKind::Normal,
            target: None,
            sent_at,
        }
    }

    pub fn tip(sender_id: UserId, body: impl Into<String>, sent_at: i64) -> Self {
        Self {
            sender_id,
            body: body.into(),
            kind: MessageKind::Tip,
            target: None,
            sent_at,
        }
    }

    pub fn user_tip(
        sender_id: UserId,
        body: impl Into<String>,
        target: UserId,
        sent_at: i64,
    ) -> Self {
        Self {
            sender_id,
            body: body.into(),
            kind: MessageKind::Tip,
            target: Some(target),
            sent_at,
        }
    }
}

/// Bilateral friend-request handshake. Completes only when both flags are
/// true.
#[derive(Clone, Debug)]
pub struct FriendVerification {
    pub user_a: UserId,
    pub user_b: UserId,
    pub a_acked: bool,
    pub b_acked: bool,
}

impl FriendVerification {
    pub fn new(user_a: UserId, user_b: UserId) -> Self {
        Self {
            user_a,
            user_b,
            a_acked: false,
            b_acked: false,
        }
    }

    pub fn ack(&mut self, user: UserId) {
        if user == self.user_a {
            self.a_acked = true;
        } else if user == self.user_b {
            self.b_acked = true;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.a_acked && self.b_acked
    }
}

/// Bilateral group-join handshake between an applicant and the group's
/// admin.
#[derive(Clone, Debug)]
pub struct GroupVerification {
    pub group_id: GroupId,
    pub applicant_id: UserId,
    pub group_admin_acked: bool,
    pub applicant_acked: bool,
}

impl GroupVerification {
    pub fn new(group_id: GroupId, applicant_id: UserId) -> Self {
        Self {
            group_id,
            applicant_id,
            group_admin_acked: false,
            applicant_acked: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.group_admin_acked && self.applicant_acked
    }
}

/// Direction of a pending verification as it appears in a user's inbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationDirection {
    Sent,
    Received,
}

/// Summary row shown by `get_friend_verification_list` / the group
/// equivalent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FriendVerificationEntry {
    pub user_id: UserId,
    pub direction: VerificationDirection,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupVerificationEntry {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub direction: VerificationDirection,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn friend_verification_completes_when_both_ack() {
        let mut v = FriendVerification::new(UserId(1), UserId(2));
        assert!(!v.is_complete());
        v.ack(UserId(1));
        assert!(!v.is_complete());
        v.ack(UserId(2));
        assert!(v.is_complete());
    }

    #[test]
    fn device_type_parses_case_and_unknown_default() {
        assert_eq!(DeviceType::from_str("Phone"), DeviceType::Phone);
        assert_eq!(DeviceType::from_str("bogus"), DeviceType::Unknown);
    }
}
