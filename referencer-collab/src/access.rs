//! Role-based write gating.
//!
//! The role is decided upstream, before the connection reaches the
//! coordinator, and is fixed for the lifetime of the connection. Only
//! content mutations are gated; state-vector requests and presence are
//! served to every role.

use std::fmt;

/// Role tag attached to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    /// Read-only access
    Viewer,
    /// Read-write access
    Editor,
    /// Any other upstream role; treated as read-write
    Other(String),
}

impl Role {
    /// Parse a role tag. A missing tag means read-only.
    pub fn parse(tag: Option<&str>) -> Self {
        match tag.map(str::trim) {
            None | Some("") | Some("viewer") => Role::Viewer,
            Some("editor") => Role::Editor,
            Some(other) => Role::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Viewer => "viewer",
            Role::Editor => "editor",
            Role::Other(tag) => tag,
        }
    }

    /// Whether this role may mutate document content.
    pub fn can_write(&self) -> bool {
        !matches!(self, Role::Viewer)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
