//! Calling-context identity.
//!
//! A blocking wait issued from the context that feeds lines into the
//! correlator can never be satisfied: the only thread able to deliver the
//! reply is the one blocked waiting for it. Hosts therefore identify their
//! line delivery context with a [`ContextId`], and every blocking call names
//! the context it runs in. The check is a plain equality test.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identity of an execution context (a thread, task or event loop).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Create a new, unique context identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx_{}", self.0.simple())
    }
}
