use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use workflow_authz::authz::{Role, RoleRepository};
use workflow_authz::db::{self, SqliteRoleRepository};
use workflow_authz::deployment::PermissionDeployer;

#[derive(Parser, Debug)]
#[command(author, version, about = "workflow authorization admin tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Replace the stored permissions with the definitions in a JSON file
    Deploy { file: PathBuf },
    /// Grant a role to a user
    AssignRole { user: String, role: String },
    /// List the roles held by a user
    Roles { user: String },
    /// List every stored permission
    Permissions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let pool = get_pool().await?;

    match cli.command {
        Commands::MigrateRun => {
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::Deploy { file } => {
            let repository = repository(&pool)?;
            let deployer = PermissionDeployer::new(Arc::new(db::sqlite_registry(&pool)?), repository);
            let summary = deployer
                .deploy_file(&file)
                .await
                .with_context(|| format!("failed to deploy {}", file.display()))?;
            println!(
                "Deployed {} permissions for {} roles",
                summary.permissions, summary.roles
            );
        }
        Commands::AssignRole { user, role } => {
            repository(&pool)?.assign_role(&user, &Role::new(role.clone())).await?;
            println!("Assigned {role} to {user}");
        }
        Commands::Roles { user } => {
            let mut roles: Vec<Role> = repository(&pool)?.roles_of_user(&user).await?.into_iter().collect();
            roles.sort();
            for role in roles {
                println!("{role}");
            }
        }
        Commands::Permissions => {
            println!("{:<20} {:<20} {:<12} {}", "Role", "Resource", "Action", "Conditions");
            for permission in repository(&pool)?.all_permissions().await? {
                println!(
                    "{:<20} {:<20} {:<12} {}",
                    permission.role.to_string(),
                    permission.resource_type.to_string(),
                    permission.action.to_string(),
                    serde_json::to_string(&permission.conditions)?
                );
            }
        }
    }

    Ok(())
}

fn repository(pool: &SqlitePool) -> anyhow::Result<SqliteRoleRepository> {
    let registry = db::sqlite_registry(pool)?;
    Ok(SqliteRoleRepository::new(pool.clone(), Arc::new(registry)))
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    let tracked: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
            .fetch_optional(pool)
            .await?;
    let applied_versions: HashSet<i64> = if tracked.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let status = if applied_versions.contains(&migration.version) { "applied" } else { "pending" };
        let description = migration.description.trim();
        let name = if description.is_empty() { "unknown" } else { description };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Prefer ./migrations; containers often run with a different working directory.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {display}"))
}
