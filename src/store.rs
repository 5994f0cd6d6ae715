//! In-memory document and context store.
//!
//! [`Store`] owns every [`Document`] and [`Context`] and is the only place
//! referential integrity between them is enforced:
//!
//! | Operation | Integrity rule |
//! |-----------|----------------|
//! | [`delete_document`](Store::delete_document) | cascade: the id is removed from every context |
//! | [`update_context`](Store::update_context) | filter-on-write: unresolved ids are dropped and reported |
//! | [`render_context_content`](Store::render_context_content) | best-effort join: unresolved ids are skipped |
//! | [`put_context`](Store::put_context) | none (creation is asynchronous) |
//!
//! Both maps sit behind one `RwLock`, so multi-entity mutations are never
//! partially visible.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use crate::error::{CoreError, CoreResult};
use crate::models::{ContentItem, Context, ContextContent, Document};

#[derive(Default)]
struct Tables {
    documents: HashMap<String, Document>,
    contexts: HashMap<String, Context>,
}

/// Result of a filtered context update.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextUpdate {
    /// The record as committed, with unresolved references removed.
    pub context: Context,
    /// Document ids that failed to resolve, one entry per dropped occurrence.
    pub rejected: Vec<String>,
}

#[derive(Default)]
pub struct Store {
    tables: RwLock<Tables>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put_document(&self, doc: Document) -> Document {
        self.write()
            .documents
            .insert(doc.id.clone(), doc.clone());
        doc
    }

    pub fn get_document(&self, id: &str) -> CoreResult<Document> {
        self.read()
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::DocumentNotFound(id.to_string()))
    }

    /// Remove a document and every reference to it.
    ///
    /// Contexts that actually lose a reference get a fresh `updated_at`.
    /// Returns the number of contexts touched.
    pub fn delete_document(&self, id: &str) -> CoreResult<usize> {
        let mut tables = self.write();
        if tables.documents.remove(id).is_none() {
            return Err(CoreError::DocumentNotFound(id.to_string()));
        }

        let now = Utc::now();
        let mut touched = 0;
        for ctx in tables.contexts.values_mut() {
            let before = ctx.documents.len();
            ctx.documents.retain(|doc_id| doc_id != id);
            if ctx.documents.len() != before {
                ctx.updated_at = now;
                touched += 1;
            }
        }
        Ok(touched)
    }

    pub fn put_context(&self, ctx: Context) -> Context {
        self.write().contexts.insert(ctx.id.clone(), ctx.clone());
        ctx
    }

    pub fn get_context(&self, id: &str) -> CoreResult<Context> {
        self.read()
            .contexts
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::ContextNotFound(id.to_string()))
    }

    /// Replace a context, dropping document references that do not resolve.
    ///
    /// The committed record keeps the path `id` and the stored `created_at`;
    /// `updated_at` is set to now. Unresolved ids never abort the update.
    pub fn update_context(&self, id: &str, new_ctx: Context) -> CoreResult<ContextUpdate> {
        let mut tables = self.write();
        let created_at = match tables.contexts.get(id) {
            Some(existing) => existing.created_at,
            None => return Err(CoreError::ContextNotFound(id.to_string())),
        };

        let mut documents = Vec::with_capacity(new_ctx.documents.len());
        let mut rejected = Vec::new();
        for doc_id in new_ctx.documents {
            if tables.documents.contains_key(&doc_id) {
                documents.push(doc_id);
            } else {
                rejected.push(doc_id);
            }
        }

        let context = Context {
            id: id.to_string(),
            name: new_ctx.name,
            documents,
            description: new_ctx.description,
            created_at,
            updated_at: Utc::now(),
        };
        tables.contexts.insert(id.to_string(), context.clone());
        Ok(ContextUpdate { context, rejected })
    }

    pub fn delete_context(&self, id: &str) -> CoreResult<()> {
        self.write()
            .contexts
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CoreError::ContextNotFound(id.to_string()))
    }

    /// Join a context's references against the store, skipping any that no
    /// longer resolve.
    pub fn render_context_content(&self, id: &str) -> CoreResult<ContextContent> {
        let tables = self.read();
        let ctx = tables
            .contexts
            .get(id)
            .ok_or_else(|| CoreError::ContextNotFound(id.to_string()))?;

        let documents = ctx
            .documents
            .iter()
            .filter_map(|doc_id| tables.documents.get(doc_id))
            .map(|doc| ContentItem {
                id: doc.id.clone(),
                content: doc.content.clone(),
                metadata: doc.metadata.clone(),
            })
            .collect();

        Ok(ContextContent {
            context_id: ctx.id.clone(),
            name: ctx.name.clone(),
            documents,
        })
    }

    /// `(documents, contexts)` currently stored.
    pub fn counts(&self) -> (usize, usize) {
        let tables = self.read();
        (tables.documents.len(), tables.contexts.len())
    }
}
