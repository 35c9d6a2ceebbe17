//! In-memory object graph for the chat backend: users, rooms, friend and
//! group verification handshakes, and role-based permissions. This crate
//! never touches the network; it is driven by `chat-gateway`'s command
//! dispatcher and communicates outward only through
//! [`events::OutboundEvent`] pushed onto a user's attached connections.

pub mod connection;
pub mod data_manager;
pub mod errors;
pub mod events;
pub mod group_room;
pub mod ids;
pub mod manager;
pub mod model;
pub mod perms;
pub mod private_room;
pub mod room;
pub mod user;
pub mod verification;

pub use connection::ConnectionHandle;
pub use data_manager::{DataManager, InMemoryDataManager};
pub use errors::{ControlError, ControlResult};
pub use ids::{GroupId, UserId};
pub use manager::Manager;
