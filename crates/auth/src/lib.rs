//! `conveyor-auth` — pure authorization boundary for queue operations.
//!
//! This crate is intentionally decoupled from transport and storage.

pub mod actor;
pub mod gate;
pub mod permissions;

pub use actor::Actor;
pub use gate::{AccessError, AccessGate, AllowAll, PermissionGate, QueueAction, authorize};
pub use permissions::Permission;
