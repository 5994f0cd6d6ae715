//! Core data models used throughout the context queue.
//!
//! These types represent the documents, contexts, and task intents that flow
//! through the ingestion pipeline and the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

/// A stored document. Immutable once committed; only deletion changes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default = "new_id")]
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default = "now")]
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            content: content.into(),
            metadata: Map::new(),
            created_at: now(),
        }
    }
}

/// A named, ordered collection of document references.
///
/// `documents` holds ids only; the referenced documents are owned by the
/// store and may disappear independently. Duplicates are allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default = "new_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub documents: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "now")]
    pub updated_at: DateTime<Utc>,
}

impl Context {
    pub fn new(name: impl Into<String>) -> Self {
        let ts = now();
        Self {
            id: new_id(),
            name: name.into(),
            documents: Vec::new(),
            description: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    pub fn with_documents(mut self, documents: Vec<String>) -> Self {
        self.documents = documents;
        self
    }
}

/// One resolved document inside a [`ContextContent`] join.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentItem {
    pub id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
}

/// Response shape for `GET /contexts/{id}/content`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextContent {
    pub context_id: String,
    pub name: String,
    pub documents: Vec<ContentItem>,
}

/// The kind of mutation a [`TaskIntent`] asks for.
///
/// Serialized as the bare type string (`"create_document"`, ...). Unknown
/// strings round-trip through [`TaskKind::Other`] so they can still be listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskKind {
    CreateDocument,
    CreateContext,
    /// Validation-failure record written by a context update.
    UpdateContext,
    Other(String),
}

impl TaskKind {
    pub fn as_str(&self) -> &str {
        match self {
            TaskKind::CreateDocument => "create_document",
            TaskKind::CreateContext => "create_context",
            TaskKind::UpdateContext => "update_context",
            TaskKind::Other(s) => s,
        }
    }
}

impl From<String> for TaskKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "create_document" => TaskKind::CreateDocument,
            "create_context" => TaskKind::CreateContext,
            "update_context" => TaskKind::UpdateContext,
            _ => TaskKind::Other(s),
        }
    }
}

impl From<TaskKind> for String {
    fn from(kind: TaskKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded request to mutate the store, queued instead of applied
/// immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskIntent {
    #[serde(rename = "type")]
    pub kind: TaskKind,
    #[serde(rename = "data")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskIntent {
    pub fn new(kind: TaskKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            error: None,
        }
    }

    pub fn create_document(doc: &Document) -> serde_json::Result<Self> {
        Ok(Self::new(TaskKind::CreateDocument, serde_json::to_value(doc)?))
    }

    pub fn create_context(ctx: &Context) -> serde_json::Result<Self> {
        Ok(Self::new(TaskKind::CreateContext, serde_json::to_value(ctx)?))
    }
}
