use std::path::PathBuf;
use std::sync::Arc;

use axum::http::Method;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{AuthorizationService, ResourceRegistry, RoleRepository, TaskScopedPrincipal};
use crate::db::{self, SqliteRoleRepository};
use crate::errors::AppError;
use crate::jwt::{self, JwtConfig};
use crate::routes::{health, permissions};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// Permission definitions deployed at startup, if set.
    pub permissions_file: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let port = match std::env::var("APP_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .map_err(|_| AppError::configuration("APP_PORT must be a valid port number"))?,
            Err(_) => 8000,
        };
        let permissions_file = std::env::var("AUTHZ_PERMISSIONS_FILE")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self { port, permissions_file })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub roles: Arc<dyn RoleRepository>,
    pub authorization: AuthorizationService,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, registry: Arc<ResourceRegistry>) -> Self {
        let roles: Arc<dyn RoleRepository> = Arc::new(SqliteRoleRepository::new(pool.clone(), registry.clone()));
        let authorization = AuthorizationService::new(registry, roles.clone(), Arc::new(TaskScopedPrincipal));
        Self {
            pool,
            jwt: Arc::new(jwt),
            roles,
            authorization,
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let registry = db::sqlite_registry(&pool).map_err(|err| AppError::configuration(err.to_string()))?;
    let state = AppState::new(pool, jwt_config, Arc::new(registry));

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/api/health", get(health::health))
        .route("/api/v1/permissions", post(permissions::permissions_available))
        .layer(middleware::from_fn_with_state(state.clone(), jwt::security_context))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
