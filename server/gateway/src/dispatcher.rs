use std::collections::HashMap;
use std::sync::OnceLock;

use chat_control::events::OutboundEvent;
use chat_control::{ControlError, GroupId, UserId};
use serde_json::{json, Map, Value};

use crate::session::Session;

/// JSON type a command parameter is declared as. Mirrors spec.md §4.12's
/// "presence and JSON type" validation step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamType {
    Int,
    Str,
}

#[derive(Clone, Copy, Debug)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
}

const fn p(name: &'static str, ty: ParamType) -> ParamSpec {
    ParamSpec { name, ty }
}

/// A successful command's reply: a human-readable `message` plus whatever
/// extra fields the command contributes to the envelope (e.g. `user_id` on
/// `register`, `friends` on `get_friend_list`).
pub struct CommandOutput {
    pub message: String,
    pub extra: Map<String, Value>,
}

impl CommandOutput {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            extra: Map::new(),
        }
    }

    fn with(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}

pub type CommandResult = Result<CommandOutput, String>;

type Handler = fn(&Session, &Map<String, Value>) -> CommandResult;

pub struct CommandSpec {
    pub params: &'static [ParamSpec],
    /// Allowed before `login` succeeds (spec.md §4.12 step 2's pre-login set).
    pub pre_login: bool,
    pub handler: Handler,
}

/// The command table: built once, looked up by name on every Text frame.
/// Grounded on SPEC_FULL.md §4's "sum-type command-value" design note —
/// this is a plain `HashMap` rather than a dynamic trait-object registry.
pub fn command_table() -> &'static HashMap<&'static str, CommandSpec> {
    static TABLE: OnceLock<HashMap<&'static str, CommandSpec>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut t: HashMap<&'static str, CommandSpec> = HashMap::new();
        t.insert(
            "login",
            CommandSpec {
                params: &[
                    p("user_id", ParamType::Int),
                    p("password", ParamType::Str),
                    p("device", ParamType::Str),
                ],
                pre_login: true,
                handler: cmd_login,
            },
        );
        t.insert(
            "register",
            CommandSpec {
                params: &[p("email", ParamType::Str), p("password", ParamType::Str)],
                pre_login: true,
                handler: cmd_register,
            },
        );
        t.insert(
            "has_user",
            CommandSpec {
                params: &[p("user_id", ParamType::Int)],
                pre_login: true,
                handler: cmd_has_user,
            },
        );
        t.insert(
            "search_user",
            CommandSpec {
                params: &[p("user_name", ParamType::Str)],
                pre_login: true,
                handler: cmd_search_user,
            },
        );
        t.insert(
            "add_friend",
            CommandSpec {
                params: &[p("user_id", ParamType::Int)],
                pre_login: false,
                handler: cmd_add_friend,
            },
        );
        t.insert(
            "accept_friend_verification",
            CommandSpec {
                params: &[p("user_id", ParamType::Int)],
                pre_login: false,
                handler: cmd_accept_friend_verification,
            },
        );
        t.insert(
            "reject_friend_verification",
            CommandSpec {
                params: &[p("user_id", ParamType::Int)],
                pre_login: false,
                handler: cmd_reject_friend_verification,
            },
        );
        t.insert(
            "remove_friend",
            CommandSpec {
                params: &[p("user_id", ParamType::Int)],
                pre_login: false,
                handler: cmd_remove_friend,
            },
        );
        t.insert(
            "get_friend_list",
            CommandSpec {
                params: &[],
                pre_login: false,
                handler: cmd_get_friend_list,
            },
        );
        t.insert(
            "get_friend_verification_list",
            CommandSpec {
                params: &[],
                pre_login: false,
                handler: cmd_get_friend_verification_list,
            },
        );
        t.insert(
            "create_group",
            CommandSpec {
                params: &[],
                pre_login: false,
                handler: cmd_create_group,
            },
        );
        t.insert(
            "add_group",
            CommandSpec {
                params: &[p("group_id", ParamType::Int)],
                pre_login: false,
                handler: cmd_add_group,
            },
        );
        t.insert(
            "accept_group_verification",
            CommandSpec {
                params: &[p("group_id", ParamType::Int), p("user_id", ParamType::Int)],
                pre_login: false,
                handler: cmd_accept_group_verification,
            },
        );
        t.insert(
            "reject_group_verification",
            CommandSpec {
                params: &[p("group_id", ParamType::Int), p("user_id", ParamType::Int)],
                pre_login: false,
                handler: cmd_reject_group_verification,
            },
        );
        t.insert(
            "leave_group",
            CommandSpec {
                params: &[p("group_id", ParamType::Int)],
                pre_login: false,
                handler: cmd_leave_group,
            },
        );
        t.insert(
            "remove_group",
            CommandSpec {
                params: &[p("group_id", ParamType::Int)],
                pre_login: false,
                handler: cmd_remove_group,
            },
        );
        t.insert(
            "get_group_list",
            CommandSpec {
                params: &[],
                pre_login: false,
                handler: cmd_get_group_list,
            },
        );
        t.insert(
            "get_group_verification_list",
            CommandSpec {
                params: &[],
                pre_login: false,
                handler: cmd_get_group_verification_list,
            },
        );
        t.insert(
            "send_friend_message",
            CommandSpec {
                params: &[p("user_id", ParamType::Int), p("message", ParamType::Str)],
                pre_login: false,
                handler: cmd_send_friend_message,
            },
        );
        t.insert(
            "send_group_message",
            CommandSpec {
                params: &[p("group_id", ParamType::Int), p("message", ParamType::Str)],
                pre_login: false,
                handler: cmd_send_group_message,
            },
        );
        t.insert(
            "mute_group_member",
            CommandSpec {
                params: &[
                    p("group_id", ParamType::Int),
                    p("user_id", ParamType::Int),
                    p("duration_minutes", ParamType::Int),
                ],
                pre_login: false,
                handler: cmd_mute_group_member,
            },
        );
        t.insert(
            "unmute_group_member",
            CommandSpec {
                params: &[p("group_id", ParamType::Int), p("user_id", ParamType::Int)],
                pre_login: false,
                handler: cmd_unmute_group_member,
            },
        );
        t.insert(
            "kick_group_member",
            CommandSpec {
                params: &[p("group_id", ParamType::Int), p("user_id", ParamType::Int)],
                pre_login: false,
                handler: cmd_kick_group_member,
            },
        );
        t.insert(
            "add_group_operator",
            CommandSpec {
                params: &[p("group_id", ParamType::Int), p("user_id", ParamType::Int)],
                pre_login: false,
                handler: cmd_add_group_operator,
            },
        );
        t.insert(
            "remove_group_operator",
            CommandSpec {
                params: &[p("group_id", ParamType::Int), p("user_id", ParamType::Int)],
                pre_login: false,
                handler: cmd_remove_group_operator,
            },
        );
        t.insert(
            "set_group_administrator",
            CommandSpec {
                params: &[p("group_id", ParamType::Int), p("user_id", ParamType::Int)],
                pre_login: false,
                handler: cmd_set_group_administrator,
            },
        );
        t
    })
}

/// Validates `params` against `spec.params`: presence and JSON type. Errors
/// use the exact wording from spec.md §4.12.
pub fn validate_params(spec: &CommandSpec, params: &Map<String, Value>) -> Result<(), String> {
    for field in spec.params {
        match params.get(field.name) {
            None => return Err(format!("Lost a parameter: {}", field.name)),
            Some(v) => {
                let ok = match field.ty {
                    ParamType::Int => v.is_i64() || v.is_u64(),
                    ParamType::Str => v.is_string(),
                };
                if !ok {
                    return Err(format!("Wrong parameter type: {}", field.name));
                }
            }
        }
    }
    Ok(())
}

fn get_i64(params: &Map<String, Value>, name: &str) -> i64 {
    params.get(name).and_then(Value::as_i64).unwrap_or_default()
}

fn get_str<'a>(params: &'a Map<String, Value>, name: &str) -> &'a str {
    params.get(name).and_then(Value::as_str).unwrap_or_default()
}

fn control_err(e: ControlError) -> String {
    e.to_string()
}

// -- pre-login --

fn cmd_login(session: &Session, params: &Map<String, Value>) -> CommandResult {
    let user_id = UserId::new(get_i64(params, "user_id"));
    let password = get_str(params, "password");
    let device = chat_control::model::DeviceType::from_str(get_str(params, "device"));

    session
        .manager()
        .verify_password(user_id, password)
        .map_err(control_err)?;
    session
        .manager()
        .attach_connection(user_id, session.handle(), device, session.push_tx())
        .map_err(control_err)?;
    session.set_user_id(user_id);
    Ok(CommandOutput::new("Successfully logged in!"))
}

fn cmd_register(session: &Session, params: &Map<String, Value>) -> CommandResult {
    let email = get_str(params, "email").to_string();
    let password = get_str(params, "password");

    let profile = chat_control::user::Profile {
        user_name: email.clone(),
        registered_time: chat_control::Manager::now_ms(),
        age: 0,
        email,
        phone: String::new(),
        signature: String::new(),
    };
    let user_id = session.manager().add_new_user(profile);
    let user = session.manager().get_user(user_id).map_err(control_err)?;
    user.first_set_password(password).map_err(control_err)?;

    Ok(CommandOutput::new("Successfully created a new user!")
        .with("user_id", json!(user_id.get())))
}

fn cmd_has_user(session: &Session, params: &Map<String, Value>) -> CommandResult {
    let user_id = UserId::new(get_i64(params, "user_id"));
    let exists = session.manager().has_user(user_id);
    Ok(CommandOutput::new("OK").with("exists", json!(exists)))
}

/// Reserved per spec.md §4.12's command inventory — user-name search is not
/// backed by an index in this core (no secondary index over `user_name` is
/// specified), so it always reports no match rather than scanning every user.
fn cmd_search_user(_session: &Session, _params: &Map<String, Value>) -> CommandResult {
    Ok(CommandOutput::new("search_user is reserved").with("users", json!([])))
}

// -- friends --

fn cmd_add_friend(session: &Session, params: &Map<String, Value>) -> CommandResult {
    let other = UserId::new(get_i64(params, "user_id"));
    session
        .manager()
        .add_friend_verification(session.user_id(), other)
        .map_err(control_err)?;
    Ok(CommandOutput::new("Friend request sent."))
}

fn cmd_accept_friend_verification(session: &Session, params: &Map<String, Value>) -> CommandResult {
    let other = UserId::new(get_i64(params, "user_id"));
    session
        .manager()
        .set_friend_verified(other, session.user_id(), session.user_id())
        .map_err(control_err)?;
    Ok(CommandOutput::new("Friend request accepted."))
}

fn cmd_reject_friend_verification(session: &Session, params: &Map<String, Value>) -> CommandResult {
    let other = UserId::new(get_i64(params, "user_id"));
    session
        .manager()
        .remove_friend_verification(other, session.user_id())
        .map_err(control_err)?;
    Ok(CommandOutput::new("Friend request rejected."))
}

fn cmd_remove_friend(session: &Session, params: &Map<String, Value>) -> CommandResult {
    let other = UserId::new(get_i64(params, "user_id"));
    session
        .manager()
        .remove_friend(session.user_id(), other)
        .map_err(control_err)?;
    Ok(CommandOutput::new("Friend removed."))
}

fn cmd_get_friend_list(session: &Session, _params: &Map<String, Value>) -> CommandResult {
    let user = session.manager().get_user(session.user_id()).map_err(control_err)?;
    let friends: Vec<i64> = user.friends().into_iter().map(UserId::get).collect();
    Ok(CommandOutput::new("OK").with("friends", json!(friends)))
}

fn cmd_get_friend_verification_list(session: &Session, _params: &Map<String, Value>) -> CommandResult {
    let user = session.manager().get_user(session.user_id()).map_err(control_err)?;
    let entries: Vec<Value> = user
        .friend_verifications()
        .into_iter()
        .map(|e| json!({ "user_id": e.user_id.get(), "direction": direction_str(e.direction) }))
        .collect();
    Ok(CommandOutput::new("OK").with("verifications", json!(entries)))
}

// -- groups --

fn cmd_create_group(session: &Session, _params: &Map<String, Value>) -> CommandResult {
    let group_id = session
        .manager()
        .add_group_room(session.user_id())
        .map_err(control_err)?;
    Ok(CommandOutput::new("Group created.").with("group_id", json!(group_id.get())))
}

fn cmd_add_group(session: &Session, params: &Map<String, Value>) -> CommandResult {
    let group_id = GroupId::new(get_i64(params, "group_id"));
    session
        .manager()
        .add_group_verification(group_id, session.user_id())
        .map_err(control_err)?;
    Ok(CommandOutput::new("Join request sent."))
}

fn cmd_accept_group_verification(session: &Session, params: &Map<String, Value>) -> CommandResult {
    let group_id = GroupId::new(get_i64(params, "group_id"));
    let applicant = UserId::new(get_i64(params, "user_id"));
    session
        .manager()
        .set_group_verified_by_admin(group_id, applicant)
        .map_err(control_err)?;
    Ok(CommandOutput::new("Join request accepted."))
}

fn cmd_reject_group_verification(session: &Session, params: &Map<String, Value>) -> CommandResult {
    let group_id = GroupId::new(get_i64(params, "group_id"));
    let applicant = UserId::new(get_i64(params, "user_id"));
    session
        .manager()
        .remove_group_verification(group_id, applicant)
        .map_err(control_err)?;
    Ok(CommandOutput::new("Join request rejected."))
}

fn cmd_leave_group(session: &Session, params: &Map<String, Value>) -> CommandResult {
    let group_id = GroupId::new(get_i64(params, "group_id"));
    session
        .manager()
        .leave_group(group_id, session.user_id())
        .map_err(control_err)?;
    Ok(CommandOutput::new("Left group."))
}

fn cmd_remove_group(session: &Session, params: &Map<String, Value>) -> CommandResult {
    let group_id = GroupId::new(get_i64(params, "group_id"));
    let room = session.manager().get_group_room(group_id).map_err(control_err)?;
    if room.administrator() != session.user_id() {
        return Err(ControlError::PermissionDenied.to_string());
    }
    session.manager().remove_group_room(group_id).map_err(control_err)?;
    Ok(CommandOutput::new("Group removed."))
}

fn cmd_get_group_list(session: &Session, _params: &Map<String, Value>) -> CommandResult {
    let user = session.manager().get_user(session.user_id()).map_err(control_err)?;
    let groups: Vec<i64> = user.groups().into_iter().map(GroupId::get).collect();
    Ok(CommandOutput::new("OK").with("groups", json!(groups)))
}

fn cmd_get_group_verification_list(session: &Session, _params: &Map<String, Value>) -> CommandResult {
    let user = session.manager().get_user(session.user_id()).map_err(control_err)?;
    let entries: Vec<Value> = user
        .group_verifications()
        .into_iter()
        .map(|e| {
            json!({
                "group_id": e.group_id.get(),
                "user_id": e.user_id.get(),
                "direction": direction_str(e.direction),
            })
        })
        .collect();
    Ok(CommandOutput::new("OK").with("verifications", json!(entries)))
}

// -- messaging --

fn cmd_send_friend_message(session: &Session, params: &Map<String, Value>) -> CommandResult {
    let other = UserId::new(get_i64(params, "user_id"));
    let message = get_str(params, "message");
    let room = session
        .manager()
        .get_private_room(session.user_id(), other)
        .map_err(control_err)?;
    room.send_message(session.user_id(), message, chat_control::Manager::now_ms())
        .map_err(control_err)?;
    Ok(CommandOutput::new("Message sent."))
}

fn cmd_send_group_message(session: &Session, params: &Map<String, Value>) -> CommandResult {
    let group_id = GroupId::new(get_i64(params, "group_id"));
    let message = get_str(params, "message");
    let room = session.manager().get_group_room(group_id).map_err(control_err)?;
    room.send_message(session.user_id(), message, chrono::Utc::now())
        .map_err(control_err)?;
    Ok(CommandOutput::new("Message sent."))
}

// -- group moderation --

/// The room's moderation ops return `Ok(false)` for a rejected tie-break
/// (spec.md §4.8: `executor != target` and `role(executor) > role(target)`)
/// rather than a distinct error, so the dispatcher maps that into the same
/// `permission_denied` text every other permission failure uses.
fn moderation_result(ok: bool) -> CommandResult {
    if ok {
        Ok(CommandOutput::new("OK"))
    } else {
        Err(ControlError::PermissionDenied.to_string())
    }
}

fn cmd_mute_group_member(session: &Session, params: &Map<String, Value>) -> CommandResult {
    let group_id = GroupId::new(get_i64(params, "group_id"));
    let target = UserId::new(get_i64(params, "user_id"));
    let minutes = get_i64(params, "duration_minutes");
    let room = session.manager().get_group_room(group_id).map_err(control_err)?;
    let ok = room
        .mute_user(session.user_id(), target, minutes, chrono::Utc::now())
        .map_err(control_err)?;
    moderation_result(ok)
}

fn cmd_unmute_group_member(session: &Session, params: &Map<String, Value>) -> CommandResult {
    let group_id = GroupId::new(get_i64(params, "group_id"));
    let target = UserId::new(get_i64(params, "user_id"));
    let room = session.manager().get_group_room(group_id).map_err(control_err)?;
    let ok = room
        .unmute_user(session.user_id(), target, chrono::Utc::now())
        .map_err(control_err)?;
    moderation_result(ok)
}

fn cmd_kick_group_member(session: &Session, params: &Map<String, Value>) -> CommandResult {
    let group_id = GroupId::new(get_i64(params, "group_id"));
    let target = UserId::new(get_i64(params, "user_id"));
    let room = session.manager().get_group_room(group_id).map_err(control_err)?;
    let ok = room
        .kick_user(session.user_id(), target, chrono::Utc::now())
        .map_err(control_err)?;
    if ok {
        if let Ok(user) = session.manager().get_user(target) {
            user.remove_group(group_id);
        }
    }
    moderation_result(ok)
}

fn cmd_add_group_operator(session: &Session, params: &Map<String, Value>) -> CommandResult {
    let group_id = GroupId::new(get_i64(params, "group_id"));
    let target = UserId::new(get_i64(params, "user_id"));
    let room = session.manager().get_group_room(group_id).map_err(control_err)?;
    let ok = room
        .add_operator(session.user_id(), target)
        .map_err(control_err)?;
    moderation_result(ok)
}

fn cmd_remove_group_operator(session: &Session, params: &Map<String, Value>) -> CommandResult {
    let group_id = GroupId::new(get_i64(params, "group_id"));
    let target = UserId::new(get_i64(params, "user_id"));
    let room = session.manager().get_group_room(group_id).map_err(control_err)?;
    let ok = room
        .remove_operator(session.user_id(), target)
        .map_err(control_err)?;
    moderation_result(ok)
}

fn cmd_set_group_administrator(session: &Session, params: &Map<String, Value>) -> CommandResult {
    let group_id = GroupId::new(get_i64(params, "group_id"));
    let target = UserId::new(get_i64(params, "user_id"));
    let room = session.manager().get_group_room(group_id).map_err(control_err)?;
    if room.administrator() != session.user_id() {
        return Err(ControlError::PermissionDenied.to_string());
    }
    let target_user = session.manager().get_user(target).map_err(control_err)?;
    room.set_administrator(target, &target_user).map_err(control_err)?;
    // `set_administrator` may have just auto-added `target` as a member;
    // keep `group_id ∈ groups(u) ⇔ u ∈ members(g)` in lockstep (idempotent
    // if `target` was already a member).
    target_user.add_group(group_id);
    Ok(CommandOutput::new("Administrator transferred."))
}

fn direction_str(d: chat_control::model::VerificationDirection) -> &'static str {
    match d {
        chat_control::model::VerificationDirection::Sent => "sent",
        chat_control::model::VerificationDirection::Received => "received",
    }
}

/// Dispatches one parsed RPC. Returns the full JSON envelope
/// (`{"state": ..., "message": ...}` plus any command-contributed fields)
/// ready to be wrapped in a Text frame with the request's `requestID`.
pub fn dispatch(session: &Session, function: &str, parameters: &Value) -> Value {
    let Some(spec) = command_table().get(function) else {
        return error_envelope(format!("Unknown function: {function}"));
    };

    if !session.is_logged_in() && !spec.pre_login {
        return error_envelope("You haven't logged in".to_string());
    }

    let empty = Map::new();
    let params = parameters.as_object().unwrap_or(&empty);
    if let Err(e) = validate_params(spec, params) {
        return error_envelope(e);
    }

    match (spec.handler)(session, params) {
        Ok(output) => {
            let mut obj = Map::new();
            obj.insert("state".into(), json!("success"));
            obj.insert("message".into(), json!(output.message));
            obj.extend(output.extra);
            Value::Object(obj)
        }
        Err(message) => error_envelope(message),
    }
}

fn error_envelope(message: String) -> Value {
    json!({ "state": "error", "message": message })
}

/// Wraps a raw push (an incoming message, a verification notice, a room
/// change) in the same envelope shape so the client doesn't need to
/// distinguish a push from a reply by anything other than `requestID`
/// (pushes always carry `requestID = 0`, per spec.md §4.12).
pub fn push_payload(event: &OutboundEvent) -> Value {
    event.0.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_control::{InMemoryDataManager, Manager};
    use std::sync::Arc;

    fn new_session() -> Session {
        let manager = Arc::new(Manager::new(Box::new(InMemoryDataManager)));
        let (tx, _rx) = chat_control::events::channel();
        Session::new(manager, chat_control::ConnectionHandle::allocate(), tx)
    }

    #[test]
    fn unknown_function_is_an_error() {
        let session = new_session();
        let resp = dispatch(&session, "not_a_command", &json!({}));
        assert_eq!(resp["state"], "error");
    }

    #[test]
    fn commands_before_login_are_rejected() {
        let session = new_session();
        let resp = dispatch(&session, "get_friend_list", &json!({}));
        assert_eq!(resp["state"], "error");
        assert_eq!(resp["message"], "You haven't logged in");
    }

    #[test]
    fn missing_parameter_is_reported_by_name() {
        let session = new_session();
        let resp = dispatch(&session, "has_user", &json!({}));
        assert_eq!(resp["state"], "error");
        assert_eq!(resp["message"], "Lost a parameter: user_id");
    }

    #[test]
    fn wrong_parameter_type_is_reported_by_name() {
        let session = new_session();
        let resp = dispatch(&session, "has_user", &json!({"user_id": "not an int"}));
        assert_eq!(resp["message"], "Wrong parameter type: user_id");
    }

    #[test]
    fn register_then_login_end_to_end() {
        let session = new_session();
        let resp = dispatch(
            &session,
            "register",
            &json!({"email": "a@b.com", "password": "pw"}),
        );
        assert_eq!(resp["state"], "success");
        let user_id = resp["user_id"].as_i64().unwrap();

        let resp = dispatch(
            &session,
            "login",
            &json!({"user_id": user_id, "password": "pw", "device": "Phone"}),
        );
        assert_eq!(resp["state"], "success");
        assert!(session.is_logged_in());
    }

    #[test]
    fn friend_handshake_via_dispatcher() {
        let manager = Arc::new(Manager::new(Box::new(InMemoryDataManager)));
        let a = manager.add_new_user(chat_control::user::Profile {
            user_name: "a".into(),
            registered_time: 0,
            age: 0,
            email: String::new(),
            phone: String::new(),
            signature: String::new(),
        });
        let b = manager.add_new_user(chat_control::user::Profile {
            user_name: "b".into(),
            registered_time: 0,
            age: 0,
            email: String::new(),
            phone: String::new(),
            signature: String::new(),
        });

        let (tx_a, _rx_a) = chat_control::events::channel();
        let session_a = Session::new(manager.clone(), chat_control::ConnectionHandle::allocate(), tx_a);
        session_a.set_user_id(a);
        let (tx_b, _rx_b) = chat_control::events::channel();
        let session_b = Session::new(manager.clone(), chat_control::ConnectionHandle::allocate(), tx_b);
        session_b.set_user_id(b);

        let resp = dispatch(&session_a, "add_friend", &json!({"user_id": b.get()}));
        assert_eq!(resp["state"], "success");

        // b alone accepting completes the handshake (a's ack is implicit).
        let resp = dispatch(
            &session_b,
            "accept_friend_verification",
            &json!({"user_id": a.get()}),
        );
        assert_eq!(resp["state"], "success");

        let resp = dispatch(&session_a, "get_friend_list", &json!({}));
        assert_eq!(resp["friends"], json!([b.get()]));
    }

    #[test]
    fn group_moderation_via_dispatcher() {
        let manager = Arc::new(Manager::new(Box::new(InMemoryDataManager)));
        let admin = manager.add_new_user(chat_control::user::Profile {
            user_name: "admin".into(),
            registered_time: 0,
            age: 0,
            email: String::new(),
            phone: String::new(),
            signature: String::new(),
        });
        let member = manager.add_new_user(chat_control::user::Profile {
            user_name: "member".into(),
            registered_time: 0,
            age: 0,
            email: String::new(),
            phone: String::new(),
            signature: String::new(),
        });

        let (tx_admin, _rx_admin) = chat_control::events::channel();
        let session_admin = Session::new(manager.clone(), chat_control::ConnectionHandle::allocate(), tx_admin);
        session_admin.set_user_id(admin);
        let (tx_member, _rx_member) = chat_control::events::channel();
        let session_member = Session::new(manager.clone(), chat_control::ConnectionHandle::allocate(), tx_member);
        session_member.set_user_id(member);

        let resp = dispatch(&session_admin, "create_group", &json!({}));
        let group_id = resp["group_id"].as_i64().unwrap();

        dispatch(&session_member, "add_group", &json!({"group_id": group_id}));
        dispatch(
            &session_admin,
            "accept_group_verification",
            &json!({"group_id": group_id, "user_id": member.get()}),
        );

        // S5: the admin promotes the member to operator...
        let resp = dispatch(
            &session_admin,
            "add_group_operator",
            &json!({"group_id": group_id, "user_id": member.get()}),
        );
        assert_eq!(resp["state"], "success");

        // ...and the freshly-promoted operator cannot demote the admin back.
        let resp = dispatch(
            &session_member,
            "remove_group_operator",
            &json!({"group_id": group_id, "user_id": admin.get()}),
        );
        assert_eq!(resp["state"], "error");
    }
}
