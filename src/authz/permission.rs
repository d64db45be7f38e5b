use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::action::{Action, ActionKind};
use super::error::ConfigurationError;
use super::predicate::{Comparison, FieldPath};
use super::principal::Principal;
use super::resource::{AuthorizationResource, ResourceRegistry, ResourceType};

/// Replaced by the effective principal's identifier.
pub const CURRENT_USER_IDENTIFIER: &str = "${currentUserIdentifier}";
/// Replaced by the effective principal's role keys (a list, use with `in`).
pub const CURRENT_USER_ROLES: &str = "${currentUserRoles}";
pub const NULL_VALUE: &str = "${null}";

/// Opaque grant key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role {
    key: String,
}

impl Role {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    #[serde(rename = "==")]
    EqualTo,
    #[serde(rename = "!=")]
    NotEqualTo,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterThanOrEqualTo,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessThanOrEqualTo,
    #[serde(rename = "in")]
    In,
}

impl ConditionOperator {
    /// `None` for `In`, which is a membership test.
    pub const fn comparison(&self) -> Option<Comparison> {
        match self {
            Self::EqualTo => Some(Comparison::Equal),
            Self::NotEqualTo => Some(Comparison::NotEqual),
            Self::GreaterThan => Some(Comparison::GreaterThan),
            Self::GreaterThanOrEqualTo => Some(Comparison::GreaterThanOrEqual),
            Self::LessThan => Some(Comparison::LessThan),
            Self::LessThanOrEqualTo => Some(Comparison::LessThanOrEqual),
            Self::In => None,
        }
    }
}

/// Structural condition attached to a permission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PermissionCondition {
    /// Compares an attribute of the candidate entity with a value.
    Field {
        field: String,
        operator: ConditionOperator,
        value: Value,
    },
    /// The nested conditions hold on a related entity of another type.
    #[serde(rename_all = "camelCase")]
    Container {
        resource_type: String,
        conditions: Vec<PermissionCondition>,
    },
}

impl PermissionCondition {
    pub fn field(field: impl Into<String>, operator: ConditionOperator, value: impl Into<Value>) -> Self {
        Self::Field {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn container<T: AuthorizationResource>(conditions: Vec<PermissionCondition>) -> Self {
        Self::Container {
            resource_type: T::NAME.to_string(),
            conditions,
        }
    }

    /// Checks field paths, operators and container relations against the
    /// registry for conditions evaluated on rows of `resource_type`.
    pub fn validate(&self, registry: &ResourceRegistry, resource_type: ResourceType) -> Result<(), ConfigurationError> {
        match self {
            Self::Field { field, operator, value } => {
                registry.check_field(resource_type, &FieldPath::parse(field)?)?;
                if *operator != ConditionOperator::In && value.is_array() {
                    return Err(ConfigurationError::invalid_condition(format!(
                        "operator on `{field}` does not accept a list"
                    )));
                }
                Ok(())
            }
            Self::Container {
                resource_type: target,
                conditions,
            } => {
                let target = registry.resource_type(target)?;
                registry.relation(resource_type, target)?;
                validate_conditions(conditions, registry, target)
            }
        }
    }
}

pub fn validate_conditions(
    conditions: &[PermissionCondition],
    registry: &ResourceRegistry,
    resource_type: ResourceType,
) -> Result<(), ConfigurationError> {
    conditions
        .iter()
        .try_for_each(|condition| condition.validate(registry, resource_type))
}

/// Resolves the current-user placeholders in a condition value.
pub fn resolve_value(value: &Value, principal: &Principal) -> Value {
    match value.as_str() {
        Some(CURRENT_USER_IDENTIFIER) => Value::String(principal.identifier.clone()),
        Some(CURRENT_USER_ROLES) => Value::Array(principal.role_keys().into_iter().map(Value::String).collect()),
        Some(NULL_VALUE) => Value::Null,
        _ => value.clone(),
    }
}

/// Candidate list for `in`; list-valued placeholders are flattened.
pub fn resolve_values(value: &Value, principal: &Principal) -> Vec<Value> {
    let items = match value {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    };
    items
        .into_iter()
        .flat_map(|item| match resolve_value(item, principal) {
            Value::Array(resolved) => resolved,
            resolved => vec![resolved],
        })
        .collect()
}

/// The permission only applies when the request carries a context entity of
/// `resource_type` satisfying `conditions`.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextRequirement {
    pub resource_type: ResourceType,
    pub conditions: Vec<PermissionCondition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Permission {
    pub id: Uuid,
    pub role: Role,
    pub resource_type: ResourceType,
    pub action: ActionKind,
    pub conditions: Vec<PermissionCondition>,
    pub context: Option<ContextRequirement>,
}

impl Permission {
    pub fn new<T: AuthorizationResource>(role: Role, action: Action<T>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            resource_type: T::resource_type(),
            action: action.kind(),
            conditions: Vec::new(),
            context: None,
        }
    }

    pub fn with_conditions(mut self, conditions: Vec<PermissionCondition>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_context<C: AuthorizationResource>(mut self, conditions: Vec<PermissionCondition>) -> Self {
        self.context = Some(ContextRequirement {
            resource_type: C::resource_type(),
            conditions,
        });
        self
    }

    pub fn grants(&self, resource_type: ResourceType, action: ActionKind) -> bool {
        self.resource_type == resource_type && self.action == action
    }

    pub fn validate(&self, registry: &ResourceRegistry) -> Result<(), ConfigurationError> {
        if !registry.available_actions(self.resource_type)?.contains(&self.action) {
            return Err(ConfigurationError::unsupported_action(self.resource_type, self.action));
        }
        validate_conditions(&self.conditions, registry, self.resource_type)?;
        if let Some(context) = &self.context {
            registry.ensure_registered(context.resource_type)?;
            validate_conditions(&context.conditions, registry, context.resource_type)?;
        }
        Ok(())
    }
}
