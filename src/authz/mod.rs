//! Authorization engine.
//!
//! Decides whether a principal may perform an action on a resource type and
//! expresses that same decision as a composable query predicate:
//! - typed actions validated per resource type at request construction
//! - entity, related-entity and delegate-user requests
//! - permission conditions compiled to an ORM-agnostic predicate
//! - a task-scoped, re-entrant bypass for system work

pub mod action;
pub mod context;
pub mod error;
pub mod permission;
pub mod predicate;
pub mod principal;
pub mod request;
pub mod resource;
pub mod service;
pub mod specification;
pub mod store;

pub use action::{Action, ActionKind, ResourceActionProvider};
pub use context::AuthorizationContext;
pub use error::{AccessDenied, AuthorizationError, AuthorizationResult, ConfigurationError, StoreError};
pub use permission::{ConditionOperator, ContextRequirement, Permission, PermissionCondition, Role};
pub use predicate::{Comparison, EvaluationRow, FieldPath, Predicate, QueryBuilder, Relation};
pub use principal::{CurrentPrincipal, Principal, SecurityContext, TaskScopedPrincipal};
pub use request::{
    AuthorizationRequest, AuthorizationResourceContext, DelegateUserEntityAuthorizationRequest,
    EntityAuthorizationRequest, RelatedEntityAuthorizationRequest,
};
pub use resource::{AuthorizationResource, ResourceRegistry, ResourceType};
pub use service::AuthorizationService;
pub use specification::AuthorizationSpecification;
pub use store::{EntityLoader, InMemoryEntityLoader, InMemoryRoleRepository, RoleRepository};

