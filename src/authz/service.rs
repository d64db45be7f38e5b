use std::collections::HashSet;
use std::sync::Arc;

use super::action::ActionKind;
use super::context::AuthorizationContext;
use super::error::{AccessDenied, AuthorizationError, AuthorizationResult};
use super::permission::{Permission, Role};
use super::principal::{CurrentPrincipal, Principal};
use super::request::{AuthorizationRequest, AuthorizationResourceContext};
use super::resource::{AuthorizationResource, ResourceRegistry, ResourceType};
use super::specification::AuthorizationSpecification;
use super::store::RoleRepository;

/// Single entry point for permission checks.
#[derive(Clone)]
pub struct AuthorizationService {
    registry: Arc<ResourceRegistry>,
    roles: Arc<dyn RoleRepository>,
    principal: Arc<dyn CurrentPrincipal>,
}

impl AuthorizationService {
    pub fn new(
        registry: Arc<ResourceRegistry>,
        roles: Arc<dyn RoleRepository>,
        principal: Arc<dyn CurrentPrincipal>,
    ) -> Self {
        Self {
            registry,
            roles,
            principal,
        }
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    /// Fails with [`AccessDenied`] unless the request is authorized. A `deny`
    /// request fails for every caller outside a bypass scope.
    pub async fn require_permission<T: AuthorizationResource>(
        &self,
        request: impl Into<AuthorizationRequest<T>>,
    ) -> AuthorizationResult<()> {
        let request = request.into();
        if self.check(&request).await? {
            return Ok(());
        }

        let denied = AccessDenied {
            resource_type: T::resource_type(),
            action: request.action().kind(),
            instance_id: request.instance_id(),
        };
        tracing::warn!(
            resource_type = %denied.resource_type,
            action = %denied.action,
            instance = ?denied.instance_id,
            "permission denied"
        );
        Err(denied.into())
    }

    pub async fn has_permission<T: AuthorizationResource>(
        &self,
        request: impl Into<AuthorizationRequest<T>>,
    ) -> AuthorizationResult<bool> {
        self.check(&request.into()).await
    }

    /// Composable form of the decision, to be AND-ed into list queries.
    /// `context` is attached to the request before compiling.
    pub async fn get_authorization_specification<T: AuthorizationResource>(
        &self,
        request: impl Into<AuthorizationRequest<T>>,
        context: Option<AuthorizationResourceContext>,
    ) -> AuthorizationResult<AuthorizationSpecification<T>> {
        let mut request = request.into();
        if let Some(context) = context {
            request = request.with_context(context);
        }
        if AuthorizationContext::is_bypassed() {
            tracing::debug!(resource_type = %T::resource_type(), "authorization bypassed, unrestricted specification");
            return Ok(AuthorizationSpecification::unrestricted(
                self.registry.clone(),
                request.action().kind(),
            ));
        }
        self.specification(&request).await
    }

    /// Every role whose permissions authorize the request, independent of the
    /// roles the caller holds. Placeholders resolve against the effective
    /// principal when there is one.
    pub async fn get_authorized_roles<T: AuthorizationResource>(
        &self,
        request: impl Into<AuthorizationRequest<T>>,
    ) -> AuthorizationResult<HashSet<Role>> {
        let request = request.into();
        let resource_type = T::resource_type();
        let action = request.action().kind();
        if action.is_deny() {
            return Ok(HashSet::new());
        }

        let principal = match self.effective_principal(&request).await {
            Ok(principal) => principal,
            Err(AuthorizationError::NoPrincipal) => Principal::anonymous(),
            Err(err) => return Err(err),
        };

        let mut granting: Vec<Role> = self.roles.roles_granting(resource_type, action).await?.into_iter().collect();
        granting.sort();

        let mut authorized = HashSet::new();
        for role in granting {
            let permissions = self.permissions_of(&role, resource_type, action).await?;
            let spec =
                AuthorizationSpecification::compile(self.registry.clone(), &principal, &request, &permissions).await?;
            if spec.is_authorized().await? {
                authorized.insert(role);
            }
        }

        tracing::debug!(
            resource_type = %resource_type,
            action = %action,
            roles = authorized.len(),
            "resolved authorized roles"
        );
        Ok(authorized)
    }

    async fn check<T: AuthorizationResource>(&self, request: &AuthorizationRequest<T>) -> AuthorizationResult<bool> {
        if AuthorizationContext::is_bypassed() {
            tracing::debug!(
                resource_type = %T::resource_type(),
                action = %request.action(),
                "authorization bypassed"
            );
            return Ok(true);
        }
        self.specification(request).await?.is_authorized().await
    }

    async fn specification<T: AuthorizationResource>(
        &self,
        request: &AuthorizationRequest<T>,
    ) -> AuthorizationResult<AuthorizationSpecification<T>> {
        let action = request.action().kind();
        if action.is_deny() {
            return Ok(AuthorizationSpecification::denied(self.registry.clone(), action));
        }
        let principal = self.effective_principal(request).await?;
        let permissions = self.resolve_permissions(&principal, T::resource_type(), action).await?;
        AuthorizationSpecification::compile(self.registry.clone(), &principal, request, &permissions).await
    }

    /// The delegate user for delegate requests, the ambient principal otherwise.
    async fn effective_principal<T: AuthorizationResource>(
        &self,
        request: &AuthorizationRequest<T>,
    ) -> AuthorizationResult<Principal> {
        match request {
            AuthorizationRequest::DelegateUser(delegate) => {
                let roles = self.roles.roles_of_user(delegate.user()).await?;
                Ok(Principal::new(delegate.user()).with_roles(roles))
            }
            _ => {
                let identifier = self
                    .principal
                    .current_user_identifier()
                    .ok_or(AuthorizationError::NoPrincipal)?;
                Ok(Principal::new(identifier).with_roles(self.principal.current_user_roles()))
            }
        }
    }

    /// Permissions of the roles both held by `principal` and granting the pair.
    async fn resolve_permissions(
        &self,
        principal: &Principal,
        resource_type: ResourceType,
        action: ActionKind,
    ) -> AuthorizationResult<Vec<Permission>> {
        let mut held: Vec<Role> = self
            .roles
            .roles_granting(resource_type, action)
            .await?
            .into_iter()
            .filter(|role| principal.has_role(role))
            .collect();
        held.sort();

        let mut permissions = Vec::new();
        for role in &held {
            permissions.extend(self.permissions_of(role, resource_type, action).await?);
        }

        tracing::debug!(
            principal = %principal.identifier,
            resource_type = %resource_type,
            action = %action,
            roles = held.len(),
            permissions = permissions.len(),
            "resolved permissions"
        );
        Ok(permissions)
    }

    async fn permissions_of(
        &self,
        role: &Role,
        resource_type: ResourceType,
        action: ActionKind,
    ) -> AuthorizationResult<Vec<Permission>> {
        Ok(self
            .roles
            .permissions_for(role, resource_type)
            .await?
            .into_iter()
            .filter(|permission| permission.grants(resource_type, action))
            .collect())
    }
}
