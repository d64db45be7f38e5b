use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{DecodingKey, Validation};

use crate::app::AppState;
use crate::authz::{Principal, SecurityContext};
use crate::errors::AppError;

/// Verifies bearer tokens issued elsewhere; this service never issues tokens.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Arc<Vec<u8>>,
}

impl JwtConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let secret = std::env::var("JWT_SECRET").map_err(|_| AppError::configuration("JWT_SECRET not set"))?;
        Ok(Self::new(secret))
    }

    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: Arc::new(secret.into()),
        }
    }

    pub fn decode(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(|err| AppError::token(err.to_string()))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    /// User identifier.
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub iat: usize,
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Installs the caller as the task-scoped principal for the rest of the
/// request. Requests without a bearer token pass through anonymously.
pub async fn security_context(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(token) = bearer_token(request.headers()) else {
        return Ok(next.run(request).await);
    };

    let claims = state.jwt.decode(token)?;
    let roles = state.roles.roles_of_user(&claims.sub).await?;
    tracing::debug!(user = %claims.sub, roles = roles.len(), "authenticated principal");

    let principal = Principal::new(claims.sub).with_roles(roles);
    Ok(SecurityContext::scope(principal, next.run(request)).await)
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub principal: Principal,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(_parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        SecurityContext::current()
            .map(|principal| AuthUser { principal })
            .ok_or_else(|| AppError::unauthorized("Authorization header missing"))
    }
}
