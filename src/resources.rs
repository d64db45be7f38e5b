//! Protected resource kinds of the workflow platform and their actions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::authz::{Action, ActionKind, AuthorizationResource, ConfigurationError, Relation, ResourceActionProvider, ResourceRegistry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub assignee: Option<String>,
    pub candidate_group: Option<String>,
    pub case_team: Option<String>,
    pub document_id: Option<String>,
    pub process_definition_id: String,
}

pub type TaskAction = Action<Task>;

impl ResourceActionProvider for Task {
    fn available_actions() -> &'static [ActionKind] {
        &[
            ActionKind::View,
            ActionKind::ViewList,
            ActionKind::Claim,
            ActionKind::Assign,
            ActionKind::Assignable,
            ActionKind::Complete,
        ]
    }
}

impl AuthorizationResource for Task {
    const NAME: &'static str = "task";

    fn identifier(&self) -> String {
        self.id.clone()
    }
}

/// A case document; `content` is the free-form JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub definition_name: String,
    pub assignee: Option<String>,
    pub team: Option<String>,
    pub content: Value,
}

pub type DocumentAction = Action<Document>;

impl ResourceActionProvider for Document {
    fn available_actions() -> &'static [ActionKind] {
        &[
            ActionKind::View,
            ActionKind::ViewList,
            ActionKind::Create,
            ActionKind::Modify,
            ActionKind::Delete,
            ActionKind::Claim,
            ActionKind::Assign,
            ActionKind::Assignable,
        ]
    }
}

impl AuthorizationResource for Document {
    const NAME: &'static str = "document";
    const DOCUMENT_FIELDS: &'static [&'static str] = &["content"];

    fn identifier(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    pub id: String,
    pub definition_key: String,
    pub version: i64,
}

pub type ProcessDefinitionAction = Action<ProcessDefinition>;

impl ResourceActionProvider for ProcessDefinition {
    fn available_actions() -> &'static [ActionKind] {
        &[
            ActionKind::View,
            ActionKind::ViewList,
            ActionKind::Create,
            ActionKind::Modify,
            ActionKind::Delete,
        ]
    }
}

impl AuthorizationResource for ProcessDefinition {
    const NAME: &'static str = "process_definition";

    fn identifier(&self) -> String {
        self.id.clone()
    }
}

/// A running process instance. Starting one is `create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub process_definition_id: String,
    pub business_key: Option<String>,
}

pub type ExecutionAction = Action<Execution>;

impl ResourceActionProvider for Execution {
    fn available_actions() -> &'static [ActionKind] {
        &[ActionKind::Create, ActionKind::View, ActionKind::ViewList]
    }
}

impl AuthorizationResource for Execution {
    const NAME: &'static str = "execution";

    fn identifier(&self) -> String {
        self.id.clone()
    }
}

/// Registry with every resource kind and the relations between them.
/// Entity loaders are attached by the storage layer.
pub fn registry() -> Result<ResourceRegistry, ConfigurationError> {
    Ok(ResourceRegistry::new()
        .with_resource::<Task>()
        .with_resource::<Document>()
        .with_resource::<ProcessDefinition>()
        .with_resource::<Execution>()
        .with_relation(Relation::new::<Task, Document>("document_id", "id")?)
        .with_relation(Relation::new::<Task, ProcessDefinition>("process_definition_id", "id")?)
        .with_relation(Relation::new::<Execution, ProcessDefinition>("process_definition_id", "id")?)
        .with_relation(Relation::new::<Document, Task>("id", "document_id")?))
}
