use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::routes::{health, permissions};

#[derive(OpenApi)]
#[openapi(
    paths(health::health, permissions::permissions_available),
    components(
        schemas(
            health::HealthResponse,
            permissions::PermissionContext,
            permissions::PermissionAvailableRequest,
            permissions::PermissionAvailableResult
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Service liveness"),
        (name = "Permissions", description = "Permission availability for the current user")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearerAuth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).bearer_format("JWT").build()),
            );
        }
    }
}

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
    let mut doc = serde_json::to_value(ApiDoc::openapi())?;
    add_examples(&mut doc);
    ensure_servers(&mut doc, port);
    Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> Router {
    let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
        .try_it_out_enabled(true)
        .with_credentials(true)
        .persist_authorization(true);

    let doc = Arc::new(doc);
    let json_route = get(move || {
        let doc = Arc::clone(&doc);
        async move { Json((*doc).clone()) }
    });

    Router::new()
        .route("/api-docs/openapi.json", json_route)
        .merge(SwaggerUi::new("/docs").config(swagger_config))
}

fn add_examples(doc: &mut Value) {
    let Some(operation) = doc.pointer_mut("/paths/~1api~1v1~1permissions/post") else {
        return;
    };
    if let Some(body) = operation.pointer_mut("/requestBody/content/application~1json") {
        if let Some(body) = body.as_object_mut() {
            body.insert(
                "example".to_string(),
                json!([
                    { "resource": "task", "action": "claim", "context": { "resource": "document", "identifier": "doc-1" } },
                    { "resource": "document", "action": "modify", "context": { "resource": "task", "identifier": "task-7" } }
                ]),
            );
        }
    }
    if let Some(ok) = operation.pointer_mut("/responses/200/content/application~1json") {
        if let Some(ok) = ok.as_object_mut() {
            ok.insert(
                "example".to_string(),
                json!([
                    { "resource": "task", "action": "claim", "context": { "resource": "document", "identifier": "doc-1" }, "available": true },
                    { "resource": "document", "action": "modify", "context": { "resource": "task", "identifier": "task-7" }, "available": false }
                ]),
            );
        }
    }
}

fn ensure_servers(doc: &mut Value, port: u16) {
    let server_url = format!("http://localhost:{port}");

    match doc.get_mut("servers") {
        Some(Value::Array(servers)) => {
            let present = servers
                .iter()
                .any(|server| server.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
            if !present {
                servers.push(json!({ "url": server_url }));
            }
        }
        _ => {
            doc["servers"] = json!([{ "url": server_url }]);
        }
    }
}
