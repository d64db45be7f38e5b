use std::fmt;

use super::action::ActionKind;
use super::resource::ResourceType;

pub type AuthorizationResult<T> = Result<T, AuthorizationError>;

/// Programming or configuration defects. These are never a policy outcome.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("action `{action}` is not available for resource type `{resource_type}`")]
    UnsupportedAction { resource_type: String, action: String },
    #[error("no action provider registered for resource type `{0}`")]
    MissingActionProvider(String),
    #[error("unknown resource type `{0}`")]
    UnknownResourceType(String),
    #[error("unknown action `{0}`")]
    UnknownAction(String),
    #[error("no relation registered from `{from}` to `{to}`")]
    MissingRelation { from: String, to: String },
    #[error("no entity loader registered for resource type `{0}`")]
    MissingEntityLoader(String),
    #[error("invalid field path `{0}`")]
    InvalidFieldPath(String),
    #[error("invalid permission condition: {0}")]
    InvalidCondition(String),
    #[error("field `{field}` is not mapped for resource type `{resource_type}`")]
    UnmappedField { resource_type: String, field: String },
    #[error("cannot serialize `{resource_type}` entity: {reason}")]
    UnserializableEntity { resource_type: String, reason: String },
}

impl ConfigurationError {
    pub fn unsupported_action(resource_type: ResourceType, action: impl fmt::Display) -> Self {
        Self::UnsupportedAction {
            resource_type: resource_type.name().to_string(),
            action: action.to_string(),
        }
    }

    pub fn missing_relation(from: ResourceType, to: ResourceType) -> Self {
        Self::MissingRelation {
            from: from.name().to_string(),
            to: to.name().to_string(),
        }
    }

    pub fn invalid_condition(message: impl Into<String>) -> Self {
        Self::InvalidCondition(message.into())
    }
}

/// The policy denial raised by `require_permission`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDenied {
    pub resource_type: ResourceType,
    pub action: ActionKind,
    pub instance_id: Option<String>,
}

impl fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "access denied: `{}` on `{}`", self.action, self.resource_type)?;
        if let Some(id) = &self.instance_id {
            write!(f, " (instance `{id}`)")?;
        }
        Ok(())
    }
}

impl std::error::Error for AccessDenied {}

/// Failures of the role/permission store or an entity loader.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("malformed stored value: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("corrupt stored record: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(thiserror::Error, Debug)]
pub enum AuthorizationError {
    #[error(transparent)]
    AccessDenied(#[from] AccessDenied),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Store(StoreError),
    #[error("related `{resource_type}` with identifier `{identifier}` not found")]
    RelatedEntityNotFound {
        resource_type: ResourceType,
        identifier: String,
    },
    #[error("no authenticated principal in scope")]
    NoPrincipal,
}

impl AuthorizationError {
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied(_))
    }
}

impl From<StoreError> for AuthorizationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Configuration(err) => Self::Configuration(err),
            other => Self::Store(other),
        }
    }
}
