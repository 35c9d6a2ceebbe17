use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use rand::RngCore;
use sha3::{Digest, Sha3_512};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::connection::ConnectionHandle;
use crate::errors::{ControlError, ControlResult};
use crate::events::{OutboundEvent, OutboundSender};
use crate::ids::{GroupId, UserId};
use crate::model::{DeviceType, FriendVerificationEntry, GroupVerificationEntry};

/// Profile fields that change independently of credentials or the social
/// graph — guarded by their own lock so a profile read never blocks a
/// friend-list write.
#[derive(Clone, Debug)]
pub struct Profile {
    pub user_name: String,
    pub registered_time: i64,
    pub age: u32,
    pub email: String,
    pub phone: String,
    pub signature: String,
}

struct Credentials {
    hash: Option<[u8; 64]>,
    salt: Option<[u8; 16]>,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            hash: None,
            salt: None,
        }
    }
}

fn hash_password(password: &str, salt: &[u8; 16]) -> [u8; 64] {
    let mut hasher = Sha3_512::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 64];
    out.copy_from_slice(&digest);
    out
}

/// `{user_id, profile, credentials, friends, groups, friend_verifications,
/// group_verifications, connections}` from spec.md §3. Every collection has
/// its own lock: reading the profile never blocks a friend-list mutation.
pub struct User {
    user_id: UserId,
    profile: RwLock<Profile>,
    credentials: RwLock<Credentials>,
    friends: RwLock<HashSet<UserId>>,
    groups: RwLock<HashSet<GroupId>>,
    friend_verifications: RwLock<HashMap<UserId, FriendVerificationEntry>>,
    group_verifications: RwLock<Vec<GroupVerificationEntry>>,
    connections: RwLock<HashMap<ConnectionHandle, (DeviceType, OutboundSender)>>,
}

impl User {
    pub fn new(user_id: UserId, profile: Profile) -> Self {
        Self {
            user_id,
            profile: RwLock::new(profile),
            credentials: RwLock::new(Credentials::default()),
            friends: RwLock::new(HashSet::new()),
            groups: RwLock::new(HashSet::new()),
            friend_verifications: RwLock::new(HashMap::new()),
            group_verifications: RwLock::new(Vec::new()),
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    // -- profile --

    pub fn profile(&self) -> Profile {
        self.profile.read().clone()
    }

    pub fn update_profile(&self, f: impl FnOnce(&mut Profile)) {
        f(&mut self.profile.write());
    }

    // -- credentials --

    /// Fails with `PasswordAlreadySet` if a hash already exists.
    pub fn first_set_password(&self, password: &str) -> ControlResult<()> {
        let mut creds = self.credentials.write();
        if creds.hash.is_some() {
            return Err(ControlError::PasswordAlreadySet);
        }
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        creds.hash = Some(hash_password(password, &salt));
        creds.salt = Some(salt);
        Ok(())
    }

    /// Hash `password` with the stored salt and compare in constant time.
    pub fn verify_password(&self, password: &str) -> ControlResult<()> {
        let creds = self.credentials.read();
        let (Some(salt), Some(expected)) = (creds.salt, creds.hash) else {
            return Err(ControlError::PasswordMismatched);
        };
        let actual = hash_password(password, &salt);
        if actual.ct_eq(&expected).into() {
            Ok(())
        } else {
            Err(ControlError::PasswordMismatched)
        }
    }

    /// Authenticates `old` before installing `new`. The original
    /// implementation's second update path never re-checked policy on the
    /// new password; this implementation matches that (no length/complexity
    /// policy is enforced here — see DESIGN.md Open Questions).
    pub fn change_password(&self, old: &str, new: &str) -> ControlResult<()> {
        self.verify_password(old)?;
        let mut creds = self.credentials.write();
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        creds.hash = Some(hash_password(new, &salt));
        creds.salt = Some(salt);
        Ok(())
    }

    // -- friends --

    pub fn add_friend(&self, other: UserId) {
        self.friends.write().insert(other);
    }

    pub fn remove_friend(&self, other: UserId) -> bool {
        self.friends.write().remove(&other)
    }

    pub fn has_friend(&self, other: UserId) -> bool {
        self.friends.read().contains(&other)
    }

    pub fn friends(&self) -> Vec<UserId> {
        self.friends.read().iter().copied().collect()
    }

    // -- groups --

    pub fn add_group(&self, group: GroupId) {
        self.groups.write().insert(group);
    }

    pub fn remove_group(&self, group: GroupId) -> bool {
        self.groups.write().remove(&group)
    }

    pub fn has_group(&self, group: GroupId) -> bool {
        self.groups.read().contains(&group)
    }

    pub fn groups(&self) -> Vec<GroupId> {
        self.groups.read().iter().copied().collect()
    }

    // -- friend verification inbox --

    pub fn add_friend_verification(&self, entry: FriendVerificationEntry) {
        self.friend_verifications
            .write()
            .insert(entry.user_id, entry);
    }

    pub fn remove_friend_verification(&self, other: UserId) {
        self.friend_verifications.write().remove(&other);
    }

    pub fn friend_verifications(&self) -> Vec<FriendVerificationEntry> {
        self.friend_verifications.read().values().cloned().collect()
    }

    // -- group verification inbox (multimap: several applicants per group,
    // or several applications by the same user, can coexist) --

    pub fn add_group_verification(&self, entry: GroupVerificationEntry) {
        let mut inbox = self.group_verifications.write();
        inbox.retain(|e| !(e.group_id == entry.group_id && e.user_id == entry.user_id));
        inbox.push(entry);
    }

    pub fn remove_group_verification(&self, group: GroupId, user: UserId) {
        self.group_verifications
            .write()
            .retain(|e| !(e.group_id == group && e.user_id == user));
    }

    pub fn group_verifications(&self) -> Vec<GroupVerificationEntry> {
        self.group_verifications.read().clone()
    }

    // -- connections --

    pub fn attach(&self, handle: ConnectionHandle, device: DeviceType, tx: OutboundSender) {
        self.connections.write().insert(handle, (device, tx));
    }

    pub fn detach(&self, handle: ConnectionHandle) {
        self.connections.write().remove(&handle);
    }

    pub fn change_device_type(&self, handle: ConnectionHandle, device: DeviceType) -> bool {
        if let Some(entry) = self.connections.write().get_mut(&handle) {
            entry.0 = device;
            true
        } else {
            false
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Writes `event` to every attached connection. A send failure (the
    /// connection's writer task has already exited) is logged and does not
    /// abort the fan-out loop, per spec.md §4.9.
    pub fn notify_all(&self, event: OutboundEvent) {
        for (handle, (_, tx)) in self.connections.read().iter() {
            if tx.send(event.clone()).is_err() {
                warn!(%handle, user_id = %self.user_id, "dropped notify_all: connection gone");
            }
        }
    }

    pub fn notify_device(&self, device: DeviceType, event: OutboundEvent) {
        for (handle, (dev, tx)) in self.connections.read().iter() {
            if *dev != device {
                continue;
            }
            if tx.send(event.clone()).is_err() {
                warn!(%handle, user_id = %self.user_id, "dropped notify_device: connection gone");
            }
        }
    }
}
