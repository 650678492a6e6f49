use std::sync::Arc;

use thiserror::Error;

use crate::{Actor, Permission};

/// Queue operations subject to access control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueAction {
    Enqueue,
    Run,
    Cancel,
}

impl QueueAction {
    /// The permission this action requires under the default policy.
    pub fn permission(&self) -> Permission {
        match self {
            Self::Enqueue => Permission::new("jobs.enqueue"),
            Self::Run => Permission::new("jobs.run"),
            Self::Cancel => Permission::new("jobs.cancel"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Yes/no gate consulted before an operation claims or mutates jobs.
///
/// Implementations must be pure policy checks: no IO, no panics, no business
/// logic. On deny, the operation must not have touched any job record.
pub trait AccessGate: Send + Sync {
    fn check(&self, actor: &Actor, action: QueueAction) -> Result<(), AccessError>;
}

impl<G: AccessGate + ?Sized> AccessGate for Arc<G> {
    fn check(&self, actor: &Actor, action: QueueAction) -> Result<(), AccessError> {
        (**self).check(actor, action)
    }
}

/// Gate that admits every actor. The default when no policy layer is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessGate for AllowAll {
    fn check(&self, _actor: &Actor, _action: QueueAction) -> Result<(), AccessError> {
        Ok(())
    }
}

/// Gate that requires the action's permission (or the wildcard).
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionGate;

impl AccessGate for PermissionGate {
    fn check(&self, actor: &Actor, action: QueueAction) -> Result<(), AccessError> {
        authorize(actor, &action.permission())
    }
}

/// Authorize an actor against a required permission.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(actor: &Actor, required: &Permission) -> Result<(), AccessError> {
    let granted = actor
        .permissions
        .iter()
        .any(|p| p.is_wildcard() || p == required);

    if granted {
        Ok(())
    } else {
        Err(AccessError::Forbidden(required.as_str().to_string()))
    }
}
