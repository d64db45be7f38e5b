use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::authz::{AuthorizationResource, ConfigurationError, ResourceRegistry, StoreError};
use crate::resources::{self, Document, Execution, ProcessDefinition, Task};

pub mod entity_loader;
pub mod predicate_sql;
pub mod role_repository;

pub use entity_loader::SqliteEntityLoader;
pub use predicate_sql::{SqlFragment, SqlPredicateBuilder, TableMapping, TableMappings};
pub use role_repository::SqliteRoleRepository;

pub async fn init() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&database_url)
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    Ok(pool)
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

/// Tables backing the resource kinds.
pub fn table_mappings() -> TableMappings {
    TableMappings::new()
        .with_table::<Task>(TableMapping::new(
            "tasks",
            &[
                "id",
                "name",
                "assignee",
                "candidate_group",
                "case_team",
                "document_id",
                "process_definition_id",
            ],
        ))
        .with_table::<Document>(
            TableMapping::new("documents", &["id", "definition_name", "assignee", "team", "content"])
                .with_json_columns(&["content"]),
        )
        .with_table::<ProcessDefinition>(TableMapping::new(
            "process_definitions",
            &["id", "definition_key", "version"],
        ))
        .with_table::<Execution>(TableMapping::new(
            "executions",
            &["id", "process_definition_id", "business_key"],
        ))
}

/// Resource registry whose related-entity lookups read from `pool`.
pub fn sqlite_registry(pool: &SqlitePool) -> Result<ResourceRegistry, ConfigurationError> {
    let mappings = Arc::new(table_mappings());
    let registry = resources::registry()?;
    Ok(registry
        .with_loader(
            Task::resource_type(),
            Arc::new(SqliteEntityLoader::new::<Task>(pool.clone(), mappings.clone())),
        )
        .with_loader(
            Document::resource_type(),
            Arc::new(SqliteEntityLoader::new::<Document>(pool.clone(), mappings.clone())),
        )
        .with_loader(
            ProcessDefinition::resource_type(),
            Arc::new(SqliteEntityLoader::new::<ProcessDefinition>(pool.clone(), mappings.clone())),
        )
        .with_loader(
            Execution::resource_type(),
            Arc::new(SqliteEntityLoader::new::<Execution>(pool.clone(), mappings)),
        ))
}
