//! Deploys permission definitions from JSON.
//!
//! A definition file is a JSON array of objects:
//!
//! ```json
//! [
//!   {
//!     "resourceType": "task",
//!     "action": "assign",
//!     "roleKey": "CASE_HANDLER",
//!     "conditions": [{ "type": "field", "field": "case_team", "operator": "==", "value": "north" }]
//!   }
//! ]
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::authz::{
    AuthorizationContext, ConfigurationError, ContextRequirement, Permission, PermissionCondition, ResourceRegistry,
    Role, StoreError,
};
use crate::db::SqliteRoleRepository;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDefinition {
    pub resource_type: String,
    pub action: String,
    pub role_key: String,
    #[serde(default)]
    pub conditions: Vec<PermissionCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_conditions: Vec<PermissionCondition>,
}

impl PermissionDefinition {
    pub fn to_permission(&self, registry: &ResourceRegistry) -> Result<Permission, ConfigurationError> {
        let resource_type = registry.resource_type(&self.resource_type)?;
        let action = registry.parse_action(resource_type, &self.action)?;
        let context = match &self.context_resource_type {
            Some(name) => Some(ContextRequirement {
                resource_type: registry.resource_type(name)?,
                conditions: self.context_conditions.clone(),
            }),
            None if !self.context_conditions.is_empty() => {
                return Err(ConfigurationError::invalid_condition(
                    "contextConditions given without contextResourceType",
                ))
            }
            None => None,
        };

        let permission = Permission {
            id: Uuid::new_v4(),
            role: Role::new(self.role_key.clone()),
            resource_type,
            action,
            conditions: self.conditions.clone(),
            context,
        };
        permission.validate(registry)?;
        Ok(permission)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DeploymentError {
    #[error("failed to read permission definitions: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid permission definitions: {0}")]
    Json(#[from] serde_json::Error),
    #[error("definition {index}: {source}")]
    Definition {
        index: usize,
        #[source]
        source: ConfigurationError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentSummary {
    pub permissions: usize,
    pub roles: usize,
}

pub struct PermissionDeployer {
    registry: Arc<ResourceRegistry>,
    repository: SqliteRoleRepository,
}

impl PermissionDeployer {
    pub fn new(registry: Arc<ResourceRegistry>, repository: SqliteRoleRepository) -> Self {
        Self { registry, repository }
    }

    /// Validates every definition before writing any, then replaces the
    /// stored permissions. Runs without authorization.
    pub async fn deploy(&self, definitions: &[PermissionDefinition]) -> Result<DeploymentSummary, DeploymentError> {
        let permissions = definitions
            .iter()
            .enumerate()
            .map(|(index, definition)| {
                definition
                    .to_permission(&self.registry)
                    .map_err(|source| DeploymentError::Definition { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        AuthorizationContext::run_without_authorization(self.repository.replace_permissions(&permissions)).await?;

        let mut roles: Vec<&str> = permissions.iter().map(|permission| permission.role.key()).collect();
        roles.sort_unstable();
        roles.dedup();

        let summary = DeploymentSummary {
            permissions: permissions.len(),
            roles: roles.len(),
        };
        tracing::info!(
            permissions = summary.permissions,
            roles = summary.roles,
            "deployed permission definitions"
        );
        Ok(summary)
    }

    pub async fn deploy_file(&self, path: impl AsRef<Path>) -> Result<DeploymentSummary, DeploymentError> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "loading permission definitions");
        let raw = std::fs::read_to_string(path)?;
        let definitions: Vec<PermissionDefinition> = serde_json::from_str(&raw)?;
        self.deploy(&definitions).await
    }
}
