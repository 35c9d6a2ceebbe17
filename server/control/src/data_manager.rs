use crate::ids::UserId;

/// Persistence boundary. `chat-control` keeps the authoritative copy of
/// every credential and profile field in memory on the corresponding
/// [`crate::user::User`]; a `DataManager` is notified of the same mutations
/// so a real backend can mirror them to storage. Grounded on the original's
/// `DataManager` — out-of-process persistence itself is a non-goal, so the
/// only implementation shipped here is the in-memory no-op.
pub trait DataManager: Send + Sync {
    fn add_new_user(&self, user_id: UserId);
    fn change_password(&self, user_id: UserId);
    fn verify_password(&self, user_id: UserId) -> bool;
}

/// The default `DataManager`: acknowledges every mutation and always
/// reports a password as verified, since `User::verify_password` already
/// did the real check against the in-memory hash.
#[derive(Default)]
pub struct InMemoryDataManager;

impl DataManager for InMemoryDataManager {
    fn add_new_user(&self, _user_id: UserId) {}
    fn change_password(&self, _user_id: UserId) {}
    fn verify_password(&self, _user_id: UserId) -> bool {
        true
    }
}
