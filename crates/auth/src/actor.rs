use conveyor_core::ActorId;

use crate::Permission;

/// A fully resolved identity for authorization decisions.
///
/// Construction of this object is intentionally decoupled from storage and
/// transport: callers derive permissions from whatever session or policy
/// source they use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: ActorId,
    pub permissions: Vec<Permission>,
}

impl Actor {
    pub fn new(id: ActorId, permissions: Vec<Permission>) -> Self {
        Self { id, permissions }
    }

    /// An actor holding the wildcard permission. Used by in-process callers
    /// (schedulers, workers) that act on their own behalf.
    pub fn system() -> Self {
        Self {
            id: ActorId::new(),
            permissions: vec![Permission::new("*")],
        }
    }

    /// An actor with no permissions at all.
    pub fn anonymous() -> Self {
        Self {
            id: ActorId::new(),
            permissions: Vec::new(),
        }
    }

    pub fn grant(mut self, permission: impl Into<Permission>) -> Self {
        self.permissions.push(permission.into());
        self
    }
}
