use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use jsonwebtoken::{EncodingKey, Header};
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`

use workflow_authz::authz::Role;
use workflow_authz::create_app;
use workflow_authz::db::{self, SqliteRoleRepository};
use workflow_authz::deployment::{PermissionDefinition, PermissionDeployer};
use workflow_authz::jwt::Claims;

const SECRET: &str = "test-secret";

async fn setup() -> Result<(TempDir, SqlitePool, Router)> {
    let dir = tempdir()?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("test.db"))
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    for (id, team) in [("doc-n", "north"), ("doc-s", "south")] {
        sqlx::query("INSERT INTO documents (id, definition_name, team) VALUES (?, 'loan', ?)")
            .bind(id)
            .bind(team)
            .execute(&pool)
            .await?;
    }
    sqlx::query("INSERT INTO process_definitions (id, definition_key, version) VALUES ('pd-1', 'loan', 1)")
        .execute(&pool)
        .await?;
    for (id, team) in [("123", "north"), ("456", "south")] {
        sqlx::query("INSERT INTO tasks (id, name, case_team, process_definition_id) VALUES (?, 'Review', ?, 'pd-1')")
            .bind(id)
            .bind(team)
            .execute(&pool)
            .await?;
    }

    let registry = Arc::new(db::sqlite_registry(&pool)?);
    let repository = SqliteRoleRepository::new(pool.clone(), registry.clone());
    let definitions: Vec<PermissionDefinition> = serde_json::from_value(json!([
        {
            "resourceType": "task",
            "action": "claim",
            "roleKey": "CASE_HANDLER",
            "conditions": [{
                "type": "container",
                "resourceType": "document",
                "conditions": [{ "type": "field", "field": "team", "operator": "==", "value": "north" }]
            }]
        },
        {
            "resourceType": "task",
            "action": "view",
            "roleKey": "CASE_HANDLER",
            "conditions": [{ "type": "field", "field": "case_team", "operator": "==", "value": "north" }]
        }
    ]))?;
    PermissionDeployer::new(registry, repository.clone()).deploy(&definitions).await?;
    repository.assign_role("carol", &Role::new("CASE_HANDLER")).await?;

    // tests run in CI/container; ensure a JWT secret is available for verifying tokens
    std::env::set_var("JWT_SECRET", SECRET);
    let app = create_app(pool.clone()).await?;
    Ok((dir, pool, app))
}

fn token(user: &str) -> Result<String> {
    let claims = Claims {
        sub: user.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        iat: chrono::Utc::now().timestamp() as usize,
    };
    Ok(jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes()))?)
}

fn permissions_request(body: &Value, bearer: Option<&str>) -> Result<Request<Body>> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/permissions")
        .header("content-type", "application/json");
    if let Some(bearer) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", bearer));
    }
    Ok(builder.body(Body::from(body.to_string()))?)
}

async fn read_json(resp: Response) -> Result<Value> {
    let body_bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    Ok(serde_json::from_slice(&body_bytes)?)
}

#[tokio::test]
async fn health_endpoint_reports_db_ok() -> Result<()> {
    let (_dir, _pool, app) = setup().await?;

    let req = Request::builder()
        .method("GET")
        .uri("/api/health")
        .body(Body::empty())?;

    let resp: Response = app.oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK, "health endpoint did not return 200");

    let v = read_json(resp).await?;
    assert_eq!(v.get("db_ok").and_then(Value::as_bool), Some(true), "unexpected body: {}", v);
    Ok(())
}

#[tokio::test]
async fn permission_availability_is_reported_per_item() -> Result<()> {
    let (_dir, _pool, app) = setup().await?;

    let body = json!([
        { "resource": "task", "action": "claim", "context": { "resource": "document", "identifier": "doc-n" } },
        { "resource": "task", "action": "claim", "context": { "resource": "document", "identifier": "doc-s" } },
        { "resource": "task", "action": "claim", "context": { "resource": "document", "identifier": "doc-missing" } },
        { "resource": "tsak", "action": "claim", "context": { "resource": "document", "identifier": "doc-n" } },
        { "resource": "task", "action": "deny", "context": { "resource": "document", "identifier": "doc-n" } }
    ]);

    let resp = app.oneshot(permissions_request(&body, Some(&token("carol")?))?).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let results = read_json(resp).await?;
    let available: Vec<bool> = results
        .as_array()
        .map(|items| items.iter().filter_map(|item| item.get("available").and_then(Value::as_bool)).collect())
        .unwrap_or_default();
    assert_eq!(available, vec![true, false, false, false, false]);
    assert_eq!(results[0]["context"]["identifier"], "doc-n");
    assert_eq!(results[3]["resource"], "tsak");
    Ok(())
}

#[tokio::test]
async fn context_of_the_requested_type_is_checked_directly() -> Result<()> {
    let (_dir, _pool, app) = setup().await?;

    let body = json!([
        { "resource": "task", "action": "view", "context": { "resource": "task", "identifier": "123" } },
        { "resource": "task", "action": "view", "context": { "resource": "task", "identifier": "456" } },
        { "resource": "task", "action": "view", "context": { "resource": "task", "identifier": "789" } }
    ]);
    let resp = app.oneshot(permissions_request(&body, Some(&token("carol")?))?).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let results = read_json(resp).await?;
    assert_eq!(results[0]["available"], true);
    assert_eq!(results[1]["available"], false);
    assert_eq!(results[2]["available"], false);
    Ok(())
}

#[tokio::test]
async fn users_without_roles_get_nothing() -> Result<()> {
    let (_dir, _pool, app) = setup().await?;

    let body = json!([
        { "resource": "task", "action": "claim", "context": { "resource": "document", "identifier": "doc-n" } }
    ]);
    let resp = app.oneshot(permissions_request(&body, Some(&token("mallory")?))?).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(read_json(resp).await?[0]["available"], false);
    Ok(())
}

#[tokio::test]
async fn permissions_endpoint_requires_a_valid_token() -> Result<()> {
    let (_dir, _pool, app) = setup().await?;
    let body = json!([]);

    let resp = app.clone().oneshot(permissions_request(&body, None)?).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(resp).await?["error"], "unauthorized");

    let resp = app.oneshot(permissions_request(&body, Some("not-a-jwt"))?).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(resp).await?["error"], "token");
    Ok(())
}
