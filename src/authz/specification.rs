//! Compiles a request plus its resolved permissions into an
//! [`AuthorizationSpecification`].
//!
//! Rules:
//! * `deny` compiles to the unsatisfiable specification.
//! * Conditions within one permission are AND-ed, permissions are OR-ed, and
//!   an empty permission set is unsatisfiable.
//! * A permission with a context requirement only takes part when the request
//!   carries a context entity of that type satisfying the context conditions.
//! * A related-entity request for `A` via `B` keeps the permissions whose
//!   conditions all target `B` and evaluates them on the `B` row identified by
//!   the request, joined back to `A` through the registered relation. When
//!   `B` is `A` itself, the permissions' own conditions are evaluated on the
//!   identified row.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use super::action::ActionKind;
use super::context::AuthorizationContext;
use super::error::{AuthorizationError, AuthorizationResult, ConfigurationError};
use super::permission::{resolve_value, resolve_values, Permission, PermissionCondition};
use super::predicate::{Comparison, EvaluationRow, FieldPath, Predicate, QueryBuilder};
use super::principal::Principal;
use super::request::{AuthorizationRequest, AuthorizationResourceContext};
use super::resource::{AuthorizationResource, ResourceRegistry, ResourceType};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone)]
enum Target {
    /// Entity and delegate-user requests, with or without an instance.
    Instance(Option<Value>),
    /// Related-entity requests; the decision is taken on the related row.
    Related {
        resource_type: ResourceType,
        identifier_field: FieldPath,
        identifier: String,
        predicate: Predicate,
    },
}

/// Decision and query predicate for one request, derived from one permission
/// set. Both forms walk the same [`Predicate`].
#[derive(Debug, Clone)]
pub struct AuthorizationSpecification<T> {
    action: ActionKind,
    predicate: Predicate,
    applicable: bool,
    target: Target,
    registry: Arc<ResourceRegistry>,
    resource: PhantomData<fn() -> T>,
}

impl<T: AuthorizationResource> AuthorizationSpecification<T> {
    /// Never satisfied, whatever the row.
    pub fn denied(registry: Arc<ResourceRegistry>, action: ActionKind) -> Self {
        Self {
            action,
            predicate: Predicate::FALSE,
            applicable: false,
            target: Target::Instance(None),
            registry,
            resource: PhantomData,
        }
    }

    /// Always satisfied. Returned inside a bypass scope.
    pub fn unrestricted(registry: Arc<ResourceRegistry>, action: ActionKind) -> Self {
        Self {
            action,
            predicate: Predicate::TRUE,
            applicable: true,
            target: Target::Instance(None),
            registry,
            resource: PhantomData,
        }
    }

    /// `principal` resolves placeholders; `permissions` are the grants already
    /// resolved for it. Permissions for other (type, action) pairs are ignored.
    pub async fn compile(
        registry: Arc<ResourceRegistry>,
        principal: &Principal,
        request: &AuthorizationRequest<T>,
        permissions: &[Permission],
    ) -> AuthorizationResult<Self> {
        let resource_type = T::resource_type();
        let action = request.action().kind();
        if action.is_deny() {
            return Ok(Self::denied(registry, action));
        }
        registry.ensure_registered(resource_type)?;

        let compiler = ConditionCompiler {
            registry: &registry,
            principal,
        };

        let mut applicable = Vec::new();
        for permission in permissions.iter().filter(|p| p.grants(resource_type, action)) {
            if compiler.context_allows(permission, request.context()).await? {
                applicable.push(permission);
            }
        }

        let (predicate, target) = match request {
            AuthorizationRequest::Entity(_) | AuthorizationRequest::DelegateUser(_) => {
                let fragments = applicable
                    .iter()
                    .map(|permission| compiler.conditions(resource_type, &permission.conditions))
                    .collect::<Result<Vec<_>, _>>()?;
                let instance = request
                    .instance()
                    .map(AuthorizationResource::to_attributes)
                    .transpose()?;
                (Predicate::any(fragments), Target::Instance(instance))
            }
            AuthorizationRequest::RelatedEntity(related) => {
                let related_type = related.related_resource_type();
                registry.ensure_registered(related_type)?;
                let identifier_field = FieldPath::parse(registry.identifier_field(related_type)?)?;

                // A context of the requested type is the instance itself.
                let relation = if related_type == resource_type {
                    None
                } else {
                    Some(registry.relation(resource_type, related_type)?.clone())
                };

                let mut fragments = Vec::new();
                for permission in &applicable {
                    let conditions = match relation {
                        None => Some(permission.conditions.clone()),
                        Some(_) => project_onto(&permission.conditions, related_type),
                    };
                    if let Some(conditions) = conditions {
                        fragments.push(compiler.conditions(related_type, &conditions)?);
                    }
                }
                let related_predicate = Predicate::any(fragments);
                let joined = Predicate::equal(identifier_field.clone(), related.related_identifier())
                    .and(related_predicate.clone());

                (
                    match relation {
                        Some(relation) => Predicate::exists(relation, joined),
                        None => joined,
                    },
                    Target::Related {
                        resource_type: related_type,
                        identifier_field,
                        identifier: related.related_identifier().to_string(),
                        predicate: related_predicate,
                    },
                )
            }
        };

        tracing::debug!(
            resource_type = %resource_type,
            action = %action,
            principal = %principal.identifier,
            permissions = applicable.len(),
            "compiled authorization specification"
        );

        Ok(Self {
            action,
            predicate,
            applicable: !applicable.is_empty(),
            target,
            registry,
            resource: PhantomData,
        })
    }

    pub fn resource_type(&self) -> ResourceType {
        T::resource_type()
    }

    pub fn action(&self) -> ActionKind {
        self.action
    }

    /// Predicate over rows of `T`.
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn to_predicate<Q: QueryBuilder + ?Sized>(&self, builder: &mut Q) -> Q::Output {
        self.predicate.build(builder)
    }

    /// Intersects with caller filtering.
    pub fn and(&self, other: Predicate) -> Predicate {
        self.predicate.clone().and(other)
    }

    pub fn is_unsatisfiable(&self) -> bool {
        self.predicate.is_unsatisfiable()
    }

    /// Decision for the request this specification was compiled from. Without
    /// an instance this answers whether any permission applies at all.
    pub async fn is_authorized(&self) -> AuthorizationResult<bool> {
        match &self.target {
            Target::Instance(None) => Ok(self.applicable),
            Target::Instance(Some(instance)) => self.evaluate(instance.clone(), &self.predicate).await,
            Target::Related {
                resource_type,
                identifier_field,
                identifier,
                predicate,
            } => {
                if predicate.is_unsatisfiable() {
                    return Ok(false);
                }
                let related = load_related(&self.registry, *resource_type, identifier_field, identifier).await?;
                self.evaluate(related, predicate).await
            }
        }
    }

    /// Evaluates the predicate against one instance of `T`, as a list query
    /// containing only that instance would.
    pub async fn is_authorized_for(&self, instance: &T) -> AuthorizationResult<bool> {
        self.evaluate(instance.to_attributes()?, &self.predicate).await
    }

    async fn evaluate(&self, attributes: Value, predicate: &Predicate) -> AuthorizationResult<bool> {
        if predicate.is_unsatisfiable() || predicate.is_unrestricted() {
            return Ok(predicate.is_unrestricted());
        }
        let row = materialize(&self.registry, attributes, predicate).await?;
        Ok(predicate.evaluate(&row))
    }
}

/// Conditions of a permission re-expressed on `related`, or `None` when any
/// of them constrains something other than a `related` container.
fn project_onto(conditions: &[PermissionCondition], related: ResourceType) -> Option<Vec<PermissionCondition>> {
    let mut projected = Vec::new();
    for condition in conditions {
        match condition {
            PermissionCondition::Container {
                resource_type,
                conditions,
            } if resource_type == related.name() => projected.extend(conditions.iter().cloned()),
            _ => return None,
        }
    }
    Some(projected)
}

struct ConditionCompiler<'a> {
    registry: &'a ResourceRegistry,
    principal: &'a Principal,
}

impl ConditionCompiler<'_> {
    fn conditions(
        &self,
        resource_type: ResourceType,
        conditions: &[PermissionCondition],
    ) -> Result<Predicate, ConfigurationError> {
        conditions
            .iter()
            .map(|condition| self.condition(resource_type, condition))
            .collect::<Result<Vec<_>, _>>()
            .map(Predicate::all)
    }

    fn condition(
        &self,
        resource_type: ResourceType,
        condition: &PermissionCondition,
    ) -> Result<Predicate, ConfigurationError> {
        match condition {
            PermissionCondition::Field { field, operator, value } => {
                let field = FieldPath::parse(field)?;
                self.registry.check_field(resource_type, &field)?;
                let Some(comparison) = operator.comparison() else {
                    return Ok(Predicate::is_in(field, resolve_values(value, self.principal)));
                };
                match resolve_value(value, self.principal) {
                    Value::Array(values) if comparison == Comparison::Equal => Ok(Predicate::is_in(field, values)),
                    Value::Array(_) => Err(ConfigurationError::invalid_condition(format!(
                        "operator on `{field}` does not accept a list"
                    ))),
                    resolved => Ok(Predicate::compare(field, comparison, resolved)),
                }
            }
            PermissionCondition::Container {
                resource_type: target,
                conditions,
            } => {
                let target = self.registry.resource_type(target)?;
                let relation = self.registry.relation(resource_type, target)?.clone();
                Ok(Predicate::exists(relation, self.conditions(target, conditions)?))
            }
        }
    }

    async fn context_allows(
        &self,
        permission: &Permission,
        context: Option<&AuthorizationResourceContext>,
    ) -> AuthorizationResult<bool> {
        let Some(requirement) = &permission.context else {
            return Ok(true);
        };
        let Some(context) = context.filter(|context| context.resource_type() == requirement.resource_type) else {
            return Ok(false);
        };
        let predicate = self.conditions(requirement.resource_type, &requirement.conditions)?;
        let row = materialize(self.registry, context.entity().clone(), &predicate).await?;
        Ok(predicate.evaluate(&row))
    }
}

/// Loads, without authorization, the related rows `predicate` ranges over.
fn materialize<'a>(
    registry: &'a ResourceRegistry,
    attributes: Value,
    predicate: &'a Predicate,
) -> BoxFuture<'a, AuthorizationResult<EvaluationRow>> {
    Box::pin(async move {
        let mut row = EvaluationRow::new(attributes);
        for (relation, filter) in predicate.subqueries() {
            let key = relation
                .from_field
                .resolve(row.attributes())
                .filter(|value| !value.is_null())
                .cloned();

            let mut related_rows = Vec::new();
            if let Some(key) = key {
                let loader = registry.loader(relation.to)?;
                let entities =
                    AuthorizationContext::run_without_authorization(loader.find_by_field(&relation.to_field, &key))
                        .await?;
                for entity in entities {
                    related_rows.push(materialize(registry, entity, &filter).await?);
                }
            }
            row.insert_related(relation, related_rows);
        }
        Ok(row)
    })
}

async fn load_related(
    registry: &ResourceRegistry,
    resource_type: ResourceType,
    identifier_field: &FieldPath,
    identifier: &str,
) -> AuthorizationResult<Value> {
    let loader = registry.loader(resource_type)?;
    let key = Value::String(identifier.to_string());
    let found = AuthorizationContext::run_without_authorization(loader.find_by_field(identifier_field, &key)).await?;
    found
        .into_iter()
        .next()
        .ok_or_else(|| AuthorizationError::RelatedEntityNotFound {
            resource_type,
            identifier: identifier.to_string(),
        })
}
