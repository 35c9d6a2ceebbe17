use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel value meaning "no user" / "not yet logged in".
pub const NO_USER: i64 = -1;

macro_rules! nominal_id {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

nominal_id!(UserId);
nominal_id!(GroupId);

impl UserId {
    pub const SENTINEL: UserId = UserId(NO_USER);
}

/// Unordered pair of users identifying at most one [`PrivateRoom`](crate::private_room::PrivateRoom).
///
/// Equality and hashing are symmetric: `{a, b} == {b, a}`.
#[derive(Clone, Copy, Debug, Eq)]
pub struct PrivateRoomKey(pub UserId, pub UserId);

impl PrivateRoomKey {
    pub fn new(a: UserId, b: UserId) -> Self {
        Self(a, b)
    }
}

impl PartialEq for PrivateRoomKey {
    fn eq(&self, other: &Self) -> bool {
        (self.0 == other.0 && self.1 == other.1) || (self.0 == other.1 && self.1 == other.0)
    }
}

impl std::hash::Hash for PrivateRoomKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Symmetric combiner: XOR is commutative so {a,b} and {b,a} collide to
        // the same pre-hash, matching the PartialEq impl above.
        let combined = self.0.get() ^ self.1.get();
        combined.hash(state);
    }
}

/// Composite key for a pending group-join handshake. Unlike [`PrivateRoomKey`]
/// this is asymmetric: (group, user) and (user, group) are different keys by
/// construction (the fields have different types), so no symmetric combiner
/// is needed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GroupVerificationKey {
    pub group_id: GroupId,
    pub user_id: UserId,
}

impl GroupVerificationKey {
    pub fn new(group_id: GroupId, user_id: UserId) -> Self {
        Self { group_id, user_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn private_room_key_is_symmetric() {
        let a = UserId(10000);
        let b = UserId(10001);
        assert_eq!(PrivateRoomKey::new(a, b), PrivateRoomKey::new(b, a));

        let mut set = HashSet::new();
        set.insert(PrivateRoomKey::new(a, b));
        assert!(set.contains(&PrivateRoomKey::new(b, a)));
    }

    #[test]
    fn group_verification_key_is_asymmetric_by_field() {
        let k1 = GroupVerificationKey::new(GroupId(10000), UserId(20000));
        let k2 = GroupVerificationKey::new(GroupId(20000), UserId(10000));
        assert_ne!(k1, k2);
    }

    #[test]
    fn sentinel_means_not_logged_in() {
        assert_eq!(UserId::SENTINEL.get(), -1);
    }
}
