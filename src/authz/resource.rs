use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::action::{ActionKind, ResourceActionProvider};
use super::error::ConfigurationError;
use super::predicate::{FieldPath, Relation};
use super::store::EntityLoader;

/// Identity of a protected entity kind.
///
/// Equality is by Rust type identity, so two resource kinds can never be
/// confused through a mistyped name.
#[derive(Clone, Copy)]
pub struct ResourceType {
    id: TypeId,
    name: &'static str,
}

impl ResourceType {
    pub fn of<T: AuthorizationResource>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: T::NAME,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ResourceType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ResourceType {}

impl Hash for ResourceType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResourceType").field(&self.name).finish()
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A Rust type that can be the subject of an authorization request.
///
/// Instances are serialized to JSON to evaluate permission conditions, so the
/// serialized field names are the attribute names conditions refer to.
pub trait AuthorizationResource: ResourceActionProvider + Serialize + Send + Sync + 'static {
    /// Stable name used in stored permissions and over HTTP.
    const NAME: &'static str;
    /// Attribute holding the identifier; related-entity lookups go through it.
    const IDENTIFIER_FIELD: &'static str = "id";
    /// Attributes holding a nested JSON document. Only these accept dotted
    /// field paths.
    const DOCUMENT_FIELDS: &'static [&'static str] = &[];

    fn identifier(&self) -> String;

    fn resource_type() -> ResourceType
    where
        Self: Sized,
    {
        ResourceType::of::<Self>()
    }

    fn to_attributes(&self) -> Result<Value, ConfigurationError> {
        serde_json::to_value(self).map_err(|err| ConfigurationError::UnserializableEntity {
            resource_type: Self::NAME.to_string(),
            reason: err.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct RegisteredResource {
    resource_type: ResourceType,
    actions: &'static [ActionKind],
    identifier_field: &'static str,
    document_fields: &'static [&'static str],
}

/// Everything the engine knows about resource types: their action providers,
/// the relations container conditions traverse, and the loaders used to
/// fetch related entities while computing a decision.
#[derive(Default, Clone)]
pub struct ResourceRegistry {
    resources: HashMap<&'static str, RegisteredResource>,
    relations: HashMap<(ResourceType, ResourceType), Relation>,
    loaders: HashMap<ResourceType, Arc<dyn EntityLoader>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource<T: AuthorizationResource>(mut self) -> Self {
        let registered = RegisteredResource {
            resource_type: T::resource_type(),
            actions: T::available_actions(),
            identifier_field: T::IDENTIFIER_FIELD,
            document_fields: T::DOCUMENT_FIELDS,
        };
        self.resources.insert(T::NAME, registered);
        self
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relations.insert((relation.from, relation.to), relation);
        self
    }

    pub fn with_loader(mut self, resource_type: ResourceType, loader: Arc<dyn EntityLoader>) -> Self {
        self.loaders.insert(resource_type, loader);
        self
    }

    pub fn resource_types(&self) -> impl Iterator<Item = ResourceType> + '_ {
        self.resources.values().map(|registered| registered.resource_type)
    }

    pub fn resource_type(&self, name: &str) -> Result<ResourceType, ConfigurationError> {
        self.resources
            .get(name)
            .map(|registered| registered.resource_type)
            .ok_or_else(|| ConfigurationError::UnknownResourceType(name.to_string()))
    }

    fn registered(&self, resource_type: ResourceType) -> Result<&RegisteredResource, ConfigurationError> {
        self.resources
            .get(resource_type.name())
            .filter(|registered| registered.resource_type == resource_type)
            .ok_or_else(|| ConfigurationError::MissingActionProvider(resource_type.name().to_string()))
    }

    pub fn ensure_registered(&self, resource_type: ResourceType) -> Result<(), ConfigurationError> {
        self.registered(resource_type).map(|_| ())
    }

    pub fn available_actions(&self, resource_type: ResourceType) -> Result<&'static [ActionKind], ConfigurationError> {
        self.registered(resource_type).map(|registered| registered.actions)
    }

    pub fn identifier_field(&self, resource_type: ResourceType) -> Result<&'static str, ConfigurationError> {
        self.registered(resource_type).map(|registered| registered.identifier_field)
    }

    /// Dotted paths are only valid below a document field.
    pub fn check_field(&self, resource_type: ResourceType, field: &FieldPath) -> Result<(), ConfigurationError> {
        let registered = self.registered(resource_type)?;
        if field.nested().is_empty() || registered.document_fields.contains(&field.root()) {
            Ok(())
        } else {
            Err(ConfigurationError::InvalidFieldPath(field.to_string()))
        }
    }

    /// Parses a stored or submitted action key and checks it is grantable on
    /// `resource_type`. `deny` is never grantable.
    pub fn parse_action(&self, resource_type: ResourceType, key: &str) -> Result<ActionKind, ConfigurationError> {
        let action = ActionKind::parse(key).ok_or_else(|| ConfigurationError::UnknownAction(key.to_string()))?;
        if self.available_actions(resource_type)?.contains(&action) {
            Ok(action)
        } else {
            Err(ConfigurationError::unsupported_action(resource_type, action))
        }
    }

    pub fn relation(&self, from: ResourceType, to: ResourceType) -> Result<&Relation, ConfigurationError> {
        self.relations
            .get(&(from, to))
            .ok_or_else(|| ConfigurationError::missing_relation(from, to))
    }

    pub fn loader(&self, resource_type: ResourceType) -> Result<&Arc<dyn EntityLoader>, ConfigurationError> {
        self.loaders
            .get(&resource_type)
            .ok_or_else(|| ConfigurationError::MissingEntityLoader(resource_type.name().to_string()))
    }
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .field("relations", &self.relations.values().collect::<Vec<_>>())
            .field("loaders", &self.loaders.keys().collect::<Vec<_>>())
            .finish()
    }
}
