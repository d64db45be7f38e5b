use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use super::action::ActionKind;
use super::error::StoreError;
use super::permission::{Permission, Role};
use super::predicate::{values_equal, FieldPath};
use super::resource::{AuthorizationResource, ResourceType};

/// Access to roles and their permissions.
#[async_trait]
pub trait RoleRepository: Send + Sync {
    /// Every role with at least one permission for `(resource_type, action)`.
    async fn roles_granting(&self, resource_type: ResourceType, action: ActionKind) -> Result<HashSet<Role>, StoreError>;

    async fn permissions_for(&self, role: &Role, resource_type: ResourceType) -> Result<Vec<Permission>, StoreError>;

    /// Roles held by a user, looked up by identifier rather than ambiently.
    async fn roles_of_user(&self, user_identifier: &str) -> Result<HashSet<Role>, StoreError>;
}

/// Fetches serialized entities of one resource type. Used to materialize
/// related entities while computing a decision.
#[async_trait]
pub trait EntityLoader: Send + Sync {
    async fn find_by_field(&self, field: &FieldPath, value: &Value) -> Result<Vec<Value>, StoreError>;
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("in-memory store lock poisoned".to_string())
}

#[derive(Debug, Default)]
pub struct InMemoryRoleRepository {
    permissions: RwLock<Vec<Permission>>,
    user_roles: RwLock<HashMap<String, HashSet<Role>>>,
}

impl InMemoryRoleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_permissions(self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        if let Ok(mut stored) = self.permissions.write() {
            stored.extend(permissions);
        }
        self
    }

    pub fn with_user_roles(self, user: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        if let Ok(mut stored) = self.user_roles.write() {
            stored.entry(user.into()).or_default().extend(roles);
        }
        self
    }

    pub fn grant(&self, permission: Permission) -> Result<(), StoreError> {
        self.permissions.write().map_err(|_| poisoned())?.push(permission);
        Ok(())
    }

    pub fn assign(&self, user: &str, role: Role) -> Result<(), StoreError> {
        self.user_roles
            .write()
            .map_err(|_| poisoned())?
            .entry(user.to_string())
            .or_default()
            .insert(role);
        Ok(())
    }
}

#[async_trait]
impl RoleRepository for InMemoryRoleRepository {
    async fn roles_granting(&self, resource_type: ResourceType, action: ActionKind) -> Result<HashSet<Role>, StoreError> {
        let permissions = self.permissions.read().map_err(|_| poisoned())?;
        Ok(permissions
            .iter()
            .filter(|permission| permission.grants(resource_type, action))
            .map(|permission| permission.role.clone())
            .collect())
    }

    async fn permissions_for(&self, role: &Role, resource_type: ResourceType) -> Result<Vec<Permission>, StoreError> {
        let permissions = self.permissions.read().map_err(|_| poisoned())?;
        Ok(permissions
            .iter()
            .filter(|permission| &permission.role == role && permission.resource_type == resource_type)
            .cloned()
            .collect())
    }

    async fn roles_of_user(&self, user_identifier: &str) -> Result<HashSet<Role>, StoreError> {
        let user_roles = self.user_roles.read().map_err(|_| poisoned())?;
        Ok(user_roles.get(user_identifier).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEntityLoader {
    entities: RwLock<Vec<Value>>,
}

impl InMemoryEntityLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: AuthorizationResource>(&self, entity: &T) -> Result<(), StoreError> {
        let attributes = entity.to_attributes()?;
        self.entities.write().map_err(|_| poisoned())?.push(attributes);
        Ok(())
    }
}

#[async_trait]
impl EntityLoader for InMemoryEntityLoader {
    async fn find_by_field(&self, field: &FieldPath, value: &Value) -> Result<Vec<Value>, StoreError> {
        let entities = self.entities.read().map_err(|_| poisoned())?;
        Ok(entities
            .iter()
            .filter(|entity| {
                field
                    .resolve(entity)
                    .is_some_and(|attribute| !attribute.is_null() && values_equal(attribute, value))
            })
            .cloned()
            .collect())
    }
}
