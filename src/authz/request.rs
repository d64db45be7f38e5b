use serde_json::Value;

use super::action::Action;
use super::error::ConfigurationError;
use super::resource::{AuthorizationResource, ResourceType};

/// A third entity a permission may depend on, e.g. the document that
/// triggered a process start.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationResourceContext {
    resource_type: ResourceType,
    entity: Value,
}

impl AuthorizationResourceContext {
    pub fn new<C: AuthorizationResource>(entity: &C) -> Result<Self, ConfigurationError> {
        Ok(Self {
            resource_type: C::resource_type(),
            entity: entity.to_attributes()?,
        })
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn entity(&self) -> &Value {
        &self.entity
    }
}

/// Permission check on `T`, for one instance or, without one, for "ever".
#[derive(Debug, Clone)]
pub struct EntityAuthorizationRequest<T> {
    action: Action<T>,
    instance: Option<T>,
    context: Option<AuthorizationResourceContext>,
}

impl<T: AuthorizationResource> EntityAuthorizationRequest<T> {
    pub fn new(action: Action<T>, instance: Option<T>) -> Result<Self, ConfigurationError> {
        action.ensure_available()?;
        Ok(Self {
            action,
            instance,
            context: None,
        })
    }

    pub fn for_instance(action: Action<T>, instance: T) -> Result<Self, ConfigurationError> {
        Self::new(action, Some(instance))
    }

    pub fn for_any(action: Action<T>) -> Result<Self, ConfigurationError> {
        Self::new(action, None)
    }

    pub fn with_context(mut self, context: AuthorizationResourceContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn action(&self) -> Action<T> {
        self.action
    }

    pub fn instance(&self) -> Option<&T> {
        self.instance.as_ref()
    }

    pub fn context(&self) -> Option<&AuthorizationResourceContext> {
        self.context.as_ref()
    }
}

/// Permission on `T` derived from the permission rule of a related entity,
/// e.g. creating an execution is governed by the process definition.
#[derive(Debug, Clone)]
pub struct RelatedEntityAuthorizationRequest<T> {
    action: Action<T>,
    related_resource_type: ResourceType,
    related_identifier: String,
    context: Option<AuthorizationResourceContext>,
}

impl<T: AuthorizationResource> RelatedEntityAuthorizationRequest<T> {
    pub fn new<R: AuthorizationResource>(
        action: Action<T>,
        related_identifier: impl Into<String>,
    ) -> Result<Self, ConfigurationError> {
        Self::with_related_type(action, R::resource_type(), related_identifier)
    }

    /// For callers that only learn the related type at runtime.
    pub fn with_related_type(
        action: Action<T>,
        related_resource_type: ResourceType,
        related_identifier: impl Into<String>,
    ) -> Result<Self, ConfigurationError> {
        action.ensure_available()?;
        Ok(Self {
            action,
            related_resource_type,
            related_identifier: related_identifier.into(),
            context: None,
        })
    }

    pub fn with_context(mut self, context: AuthorizationResourceContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn action(&self) -> Action<T> {
        self.action
    }

    pub fn related_resource_type(&self) -> ResourceType {
        self.related_resource_type
    }

    pub fn related_identifier(&self) -> &str {
        &self.related_identifier
    }

    pub fn context(&self) -> Option<&AuthorizationResourceContext> {
        self.context.as_ref()
    }
}

/// Evaluates as though `user` were the acting principal, without touching the
/// ambient one.
#[derive(Debug, Clone)]
pub struct DelegateUserEntityAuthorizationRequest<T> {
    action: Action<T>,
    user: String,
    instance: Option<T>,
    context: Option<AuthorizationResourceContext>,
}

impl<T: AuthorizationResource> DelegateUserEntityAuthorizationRequest<T> {
    pub fn new(action: Action<T>, user: impl Into<String>, instance: Option<T>) -> Result<Self, ConfigurationError> {
        action.ensure_available()?;
        Ok(Self {
            action,
            user: user.into(),
            instance,
            context: None,
        })
    }

    pub fn with_context(mut self, context: AuthorizationResourceContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn action(&self) -> Action<T> {
        self.action
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn instance(&self) -> Option<&T> {
        self.instance.as_ref()
    }

    pub fn context(&self) -> Option<&AuthorizationResourceContext> {
        self.context.as_ref()
    }
}

#[derive(Debug, Clone)]
pub enum AuthorizationRequest<T> {
    Entity(EntityAuthorizationRequest<T>),
    RelatedEntity(RelatedEntityAuthorizationRequest<T>),
    DelegateUser(DelegateUserEntityAuthorizationRequest<T>),
}

impl<T: AuthorizationResource> AuthorizationRequest<T> {
    pub fn action(&self) -> Action<T> {
        match self {
            Self::Entity(request) => request.action(),
            Self::RelatedEntity(request) => request.action(),
            Self::DelegateUser(request) => request.action(),
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        T::resource_type()
    }

    /// The instance under check; related-entity requests have none.
    pub fn instance(&self) -> Option<&T> {
        match self {
            Self::Entity(request) => request.instance(),
            Self::DelegateUser(request) => request.instance(),
            Self::RelatedEntity(_) => None,
        }
    }

    /// Identifier reported in denials.
    pub fn instance_id(&self) -> Option<String> {
        match self {
            Self::RelatedEntity(request) => Some(format!(
                "{}:{}",
                request.related_resource_type(),
                request.related_identifier()
            )),
            _ => self.instance().map(AuthorizationResource::identifier),
        }
    }

    pub fn context(&self) -> Option<&AuthorizationResourceContext> {
        match self {
            Self::Entity(request) => request.context(),
            Self::RelatedEntity(request) => request.context(),
            Self::DelegateUser(request) => request.context(),
        }
    }

    pub fn with_context(self, context: AuthorizationResourceContext) -> Self {
        match self {
            Self::Entity(request) => Self::Entity(request.with_context(context)),
            Self::RelatedEntity(request) => Self::RelatedEntity(request.with_context(context)),
            Self::DelegateUser(request) => Self::DelegateUser(request.with_context(context)),
        }
    }
}

impl<T> From<EntityAuthorizationRequest<T>> for AuthorizationRequest<T> {
    fn from(request: EntityAuthorizationRequest<T>) -> Self {
        Self::Entity(request)
    }
}

impl<T> From<RelatedEntityAuthorizationRequest<T>> for AuthorizationRequest<T> {
    fn from(request: RelatedEntityAuthorizationRequest<T>) -> Self {
        Self::RelatedEntity(request)
    }
}

impl<T> From<DelegateUserEntityAuthorizationRequest<T>> for AuthorizationRequest<T> {
    fn from(request: DelegateUserEntityAuthorizationRequest<T>) -> Self {
        Self::DelegateUser(request)
    }
}
