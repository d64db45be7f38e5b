use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use super::error::ConfigurationError;
use super::resource::AuthorizationResource;

/// Every operation the engine knows about. Which ones are legal for a resource
/// type is decided by its [`ResourceActionProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    View,
    ViewList,
    Create,
    Modify,
    Delete,
    Claim,
    Assign,
    Assignable,
    Complete,
    /// Never satisfiable. Accepted for every resource type.
    Deny,
}

impl ActionKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::ViewList => "view_list",
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
            Self::Claim => "claim",
            Self::Assign => "assign",
            Self::Assignable => "assignable",
            Self::Complete => "complete",
            Self::Deny => "deny",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        let kind = match key {
            "view" => Self::View,
            "view_list" => Self::ViewList,
            "create" => Self::Create,
            "modify" => Self::Modify,
            "delete" => Self::Delete,
            "claim" => Self::Claim,
            "assign" => Self::Assign,
            "assignable" => Self::Assignable,
            "complete" => Self::Complete,
            "deny" => Self::Deny,
            _ => return None,
        };
        Some(kind)
    }

    pub const fn is_deny(&self) -> bool {
        matches!(self, Self::Deny)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declares the closed set of actions a resource type supports.
pub trait ResourceActionProvider {
    /// Grantable actions. `Deny` is implied and need not be listed.
    fn available_actions() -> &'static [ActionKind];
}

/// An action scoped to resource type `T`.
pub struct Action<T> {
    kind: ActionKind,
    resource: PhantomData<fn() -> T>,
}

impl<T> Action<T> {
    pub const VIEW: Self = Self::new(ActionKind::View);
    pub const VIEW_LIST: Self = Self::new(ActionKind::ViewList);
    pub const CREATE: Self = Self::new(ActionKind::Create);
    pub const MODIFY: Self = Self::new(ActionKind::Modify);
    pub const DELETE: Self = Self::new(ActionKind::Delete);
    pub const CLAIM: Self = Self::new(ActionKind::Claim);
    pub const ASSIGN: Self = Self::new(ActionKind::Assign);
    pub const ASSIGNABLE: Self = Self::new(ActionKind::Assignable);
    pub const COMPLETE: Self = Self::new(ActionKind::Complete);
    pub const DENY: Self = Self::new(ActionKind::Deny);

    pub const fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            resource: PhantomData,
        }
    }

    pub const fn kind(&self) -> ActionKind {
        self.kind
    }
}

impl<T: AuthorizationResource> Action<T> {
    /// Fails fast when `T` does not offer this action.
    pub fn ensure_available(&self) -> Result<(), ConfigurationError> {
        if self.kind.is_deny() || T::available_actions().contains(&self.kind) {
            Ok(())
        } else {
            Err(ConfigurationError::unsupported_action(T::resource_type(), self.kind))
        }
    }
}

impl<T> Clone for Action<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Action<T> {}

impl<T> PartialEq for Action<T> {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl<T> Eq for Action<T> {}

impl<T> fmt::Debug for Action<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Action").field(&self.kind).finish()
    }
}

impl<T> fmt::Display for Action<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}
