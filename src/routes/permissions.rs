use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::app::AppState;
use crate::authz::{
    Action, ActionKind, AuthorizationResource, AuthorizationResult, AuthorizationService, ConfigurationError,
    RelatedEntityAuthorizationRequest,
};
use crate::errors::AppResult;
use crate::jwt::AuthUser;
use crate::resources::{Document, Execution, ProcessDefinition, Task};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PermissionContext {
    /// Resource type name of the related entity, e.g. `document`.
    #[schema(example = "document")]
    pub resource: String,
    #[schema(example = "doc-1")]
    pub identifier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PermissionAvailableRequest {
    #[schema(example = "task")]
    pub resource: String,
    #[schema(example = "claim")]
    pub action: String,
    pub context: PermissionContext,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PermissionAvailableResult {
    pub resource: String,
    pub action: String,
    pub context: PermissionContext,
    pub available: bool,
}

#[utoipa::path(
    post,
    path = "/api/v1/permissions",
    tag = "Permissions",
    request_body = [PermissionAvailableRequest],
    responses(
        (status = 200, description = "Availability of each requested permission", body = [PermissionAvailableResult]),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearerAuth" = []))
)]
pub async fn permissions_available(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(requests): Json<Vec<PermissionAvailableRequest>>,
) -> AppResult<Json<Vec<PermissionAvailableResult>>> {
    tracing::debug!(user = %auth.principal.identifier, checks = requests.len(), "checking permission availability");

    let mut results = Vec::with_capacity(requests.len());
    for request in requests {
        let available = match is_available(&state.authorization, &request).await {
            Ok(available) => available,
            Err(err) => {
                tracing::error!(error = %err, request = ?request, "failed to determine permission");
                false
            }
        };
        results.push(PermissionAvailableResult {
            resource: request.resource,
            action: request.action,
            context: request.context,
            available,
        });
    }

    Ok(Json(results))
}

async fn is_available(service: &AuthorizationService, request: &PermissionAvailableRequest) -> AuthorizationResult<bool> {
    match request.resource.as_str() {
        name if name == Task::NAME => related::<Task>(service, request).await,
        name if name == Document::NAME => related::<Document>(service, request).await,
        name if name == ProcessDefinition::NAME => related::<ProcessDefinition>(service, request).await,
        name if name == Execution::NAME => related::<Execution>(service, request).await,
        other => Err(ConfigurationError::UnknownResourceType(other.to_string()).into()),
    }
}

async fn related<T: AuthorizationResource>(
    service: &AuthorizationService,
    request: &PermissionAvailableRequest,
) -> AuthorizationResult<bool> {
    let kind = ActionKind::parse(&request.action)
        .ok_or_else(|| ConfigurationError::UnknownAction(request.action.clone()))?;
    let related_type = service.registry().resource_type(&request.context.resource)?;
    let related = RelatedEntityAuthorizationRequest::with_related_type(
        Action::<T>::new(kind),
        related_type,
        request.context.identifier.clone(),
    )?;
    service.has_permission(related).await
}
