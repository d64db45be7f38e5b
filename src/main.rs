use std::sync::Arc;

use anyhow::Context;
use workflow_authz::app::AppConfig;
use workflow_authz::db::{self, SqliteRoleRepository};
use workflow_authz::deployment::PermissionDeployer;
use workflow_authz::{create_app, docs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let config = AppConfig::from_env()?;
    let pool = db::init().await?;

    if let Some(path) = &config.permissions_file {
        let registry = Arc::new(db::sqlite_registry(&pool)?);
        let deployer = PermissionDeployer::new(registry.clone(), SqliteRoleRepository::new(pool.clone(), registry));
        deployer
            .deploy_file(path)
            .await
            .with_context(|| format!("failed to deploy permissions from {}", path.display()))?;
    }

    let openapi = docs::build_openapi(config.port)?;
    let app = create_app(pool).await?.merge(docs::swagger_routes(openapi));

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
