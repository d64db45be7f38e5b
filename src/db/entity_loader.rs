use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::{Row, SqlitePool};

use super::predicate_sql::{bind_values, SqlPredicateBuilder, TableMappings, ROOT_ALIAS};
use crate::authz::{AuthorizationResource, EntityLoader, FieldPath, Predicate, ResourceType, StoreError};

/// Loads serialized entities of one resource kind from its table.
#[derive(Clone)]
pub struct SqliteEntityLoader {
    pool: SqlitePool,
    mappings: Arc<TableMappings>,
    resource_type: ResourceType,
}

impl SqliteEntityLoader {
    pub fn new<T: AuthorizationResource>(pool: SqlitePool, mappings: Arc<TableMappings>) -> Self {
        Self {
            pool,
            mappings,
            resource_type: T::resource_type(),
        }
    }

    /// Rows satisfying `predicate`, e.g. an authorization specification
    /// AND-ed with caller filters.
    pub async fn find_matching(&self, predicate: &Predicate) -> Result<Vec<Value>, StoreError> {
        let mut builder = SqlPredicateBuilder::new(&self.mappings, self.resource_type);
        let filter = predicate.build(&mut builder)?;
        let mapping = self.mappings.get(self.resource_type)?;
        let sql = format!(
            "SELECT {} AS entity FROM {} {ROOT_ALIAS} WHERE {} ORDER BY {ROOT_ALIAS}.rowid",
            mapping.json_object(ROOT_ALIAS),
            mapping.table,
            filter.sql
        );
        tracing::debug!(resource_type = %self.resource_type, sql = %sql, "authorized list query");
        self.fetch(&sql, &filter.binds).await
    }

    /// Typed variant of [`Self::find_matching`].
    pub async fn find_matching_as<T: DeserializeOwned>(&self, predicate: &Predicate) -> Result<Vec<T>, StoreError> {
        self.find_matching(predicate)
            .await?
            .into_iter()
            .map(|entity| serde_json::from_value(entity).map_err(StoreError::from))
            .collect()
    }

    async fn fetch(&self, sql: &str, binds: &[Value]) -> Result<Vec<Value>, StoreError> {
        let rows = bind_values(sqlx::query(sql), binds).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<Value, StoreError> {
                let raw: String = row.try_get("entity")?;
                Ok(serde_json::from_str(&raw)?)
            })
            .collect()
    }
}

#[async_trait]
impl EntityLoader for SqliteEntityLoader {
    async fn find_by_field(&self, field: &FieldPath, value: &Value) -> Result<Vec<Value>, StoreError> {
        let mapping = self.mappings.get(self.resource_type)?;
        let column = mapping.column(ROOT_ALIAS, self.resource_type, field)?;
        let sql = format!(
            "SELECT {} AS entity FROM {} {ROOT_ALIAS} WHERE {column} = ?",
            mapping.json_object(ROOT_ALIAS),
            mapping.table
        );
        self.fetch(&sql, std::slice::from_ref(value)).await
    }
}
