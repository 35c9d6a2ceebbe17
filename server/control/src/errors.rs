use thiserror::Error;

pub type ControlResult<T> = Result<T, ControlError>;

/// The full error taxonomy a command handler or background task can raise.
/// Framing/TLS failures are not modeled here — those live in `anyhow::Error`
/// at the gateway layer and terminate the connection outright.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    // -- network / connection bookkeeping --
    #[error("socket pointer already exists")]
    SocketPointerExisted,
    #[error("socket pointer does not exist")]
    SocketPointerNotExisted,
    #[error("connection test failed")]
    ConnectionTestFailed,

    // -- user --
    #[error("password already set")]
    PasswordAlreadySet,
    #[error("password mismatched")]
    PasswordMismatched,
    #[error("user already exists")]
    UserExisted,
    #[error("user does not exist: {0}")]
    UserNotExisted(i64),

    // -- verification --
    #[error("verification already exists")]
    VerificationExisted,
    #[error("verification does not exist")]
    VerificationNotExisted,
    #[error("invalid verification")]
    InvalidVerification,

    // -- private room --
    #[error("private room already exists")]
    PrivateRoomExisted,
    #[error("private room does not exist")]
    PrivateRoomNotExisted,
    #[error("private room is no longer usable")]
    PrivateRoomUnableToUse,

    // -- group room --
    #[error("group room already exists")]
    GroupRoomExisted,
    #[error("group room does not exist: {0}")]
    GroupRoomNotExisted(i64),
    #[error("group room is no longer usable")]
    GroupRoomUnableToUse,
    #[error("group room user level invalid, must be in [1, 100]")]
    GroupRoomUserLevelInvalid,

    // -- permission --
    #[error("no such permission: {0}")]
    NoPermission(String),
    #[error("permission denied")]
    PermissionDenied,

    #[error("null pointer")]
    NullPointer,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_stable_strings() {
        assert_eq!(
            ControlError::UserNotExisted(42).to_string(),
            "user does not exist: 42"
        );
        assert_eq!(
            ControlError::PasswordMismatched.to_string(),
            "password mismatched"
        );
    }
}
