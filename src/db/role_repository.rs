use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::authz::{
    ActionKind, ContextRequirement, Permission, PermissionCondition, ResourceRegistry, ResourceType, Role,
    RoleRepository, StoreError,
};

/// Roles, permissions and user role assignments stored in SQLite.
#[derive(Clone)]
pub struct SqliteRoleRepository {
    pool: SqlitePool,
    registry: Arc<ResourceRegistry>,
}

#[derive(Debug, Clone, FromRow)]
struct DbPermission {
    id: String,
    role_key: String,
    resource_type: String,
    action: String,
    conditions: String,
    context_resource_type: Option<String>,
    context_conditions: Option<String>,
}

impl DbPermission {
    /// Stored rows are re-validated so a typo cannot yield an unprotected
    /// resource type.
    fn into_permission(self, registry: &ResourceRegistry) -> Result<Permission, StoreError> {
        let resource_type = registry.resource_type(&self.resource_type)?;
        let action = registry.parse_action(resource_type, &self.action)?;
        let conditions: Vec<PermissionCondition> = serde_json::from_str(&self.conditions)?;

        let context = match self.context_resource_type {
            Some(name) => {
                let conditions = match self.context_conditions {
                    Some(raw) => serde_json::from_str(&raw)?,
                    None => Vec::new(),
                };
                Some(ContextRequirement {
                    resource_type: registry.resource_type(&name)?,
                    conditions,
                })
            }
            None => None,
        };

        let permission = Permission {
            id: Uuid::parse_str(&self.id).map_err(|err| StoreError::Corrupt(format!("permission id `{}`: {err}", self.id)))?,
            role: Role::new(self.role_key),
            resource_type,
            action,
            conditions,
            context,
        };
        permission.validate(registry)?;
        Ok(permission)
    }
}

impl SqliteRoleRepository {
    pub fn new(pool: SqlitePool, registry: Arc<ResourceRegistry>) -> Self {
        Self { pool, registry }
    }

    /// Replaces every stored permission with `permissions`, creating missing
    /// roles. Runs in one transaction.
    pub async fn replace_permissions(&self, permissions: &[Permission]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM permissions").execute(&mut *tx).await?;

        for permission in permissions {
            let role_id = ensure_role(&mut tx, permission.role.key()).await?;
            let conditions = serde_json::to_string(&permission.conditions)?;
            let (context_type, context_conditions) = match &permission.context {
                Some(context) => (
                    Some(context.resource_type.name()),
                    Some(serde_json::to_string(&context.conditions)?),
                ),
                None => (None, None),
            };

            sqlx::query(
                r#"
                INSERT INTO permissions
                    (id, role_id, resource_type, action, conditions, context_resource_type, context_conditions, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(permission.id.to_string())
            .bind(role_id)
            .bind(permission.resource_type.name())
            .bind(permission.action.as_str())
            .bind(conditions)
            .bind(context_type)
            .bind(context_conditions)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn assign_role(&self, user_identifier: &str, role: &Role) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let role_id = ensure_role(&mut tx, role.key()).await?;
        sqlx::query("INSERT OR IGNORE INTO user_roles (user_identifier, role_id, created_at) VALUES (?, ?, ?)")
            .bind(user_identifier)
            .bind(role_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn all_permissions(&self) -> Result<Vec<Permission>, StoreError> {
        let rows = sqlx::query_as::<_, DbPermission>(
            r#"
            SELECT p.id, r.role_key, p.resource_type, p.action, p.conditions,
                   p.context_resource_type, p.context_conditions
            FROM permissions p
            INNER JOIN roles r ON r.id = p.role_id
            ORDER BY r.role_key, p.resource_type, p.action
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_permission(&self.registry))
            .collect()
    }
}

async fn ensure_role(tx: &mut Transaction<'_, Sqlite>, key: &str) -> Result<String, StoreError> {
    sqlx::query("INSERT OR IGNORE INTO roles (id, role_key, created_at) VALUES (?, ?, ?)")
        .bind(Uuid::new_v4().to_string())
        .bind(key)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;

    let id: String = sqlx::query_scalar("SELECT id FROM roles WHERE role_key = ?")
        .bind(key)
        .fetch_one(&mut **tx)
        .await?;
    Ok(id)
}

#[async_trait]
impl RoleRepository for SqliteRoleRepository {
    async fn roles_granting(&self, resource_type: ResourceType, action: ActionKind) -> Result<HashSet<Role>, StoreError> {
        let keys: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT r.role_key
            FROM permissions p
            INNER JOIN roles r ON r.id = p.role_id
            WHERE p.resource_type = ? AND p.action = ?
            "#,
        )
        .bind(resource_type.name())
        .bind(action.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(keys.into_iter().map(Role::new).collect())
    }

    async fn permissions_for(&self, role: &Role, resource_type: ResourceType) -> Result<Vec<Permission>, StoreError> {
        let rows = sqlx::query_as::<_, DbPermission>(
            r#"
            SELECT p.id, r.role_key, p.resource_type, p.action, p.conditions,
                   p.context_resource_type, p.context_conditions
            FROM permissions p
            INNER JOIN roles r ON r.id = p.role_id
            WHERE r.role_key = ? AND p.resource_type = ?
            ORDER BY p.created_at, p.id
            "#,
        )
        .bind(role.key())
        .bind(resource_type.name())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_permission(&self.registry))
            .collect()
    }

    async fn roles_of_user(&self, user_identifier: &str) -> Result<HashSet<Role>, StoreError> {
        let keys: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT r.role_key
            FROM user_roles ur
            INNER JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_identifier = ?
            "#,
        )
        .bind(user_identifier)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys.into_iter().map(Role::new).collect())
    }
}
