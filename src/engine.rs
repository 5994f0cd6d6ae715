//! Operations the HTTP layer calls into.
//!
//! [`Engine`] ties the [`Store`], the [`TaskQueue`] and the [`Processor`]
//! together. Creates are accepted and queued; every other operation runs
//! directly against the store and returns its errors to the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::config::QueueConfig;
use crate::error::{CoreError, CoreResult};
use crate::models::{Context, ContextContent, Document, TaskIntent, TaskKind};
use crate::processor::{Processor, ProcessorState, Timing};
use crate::queue::{MemoryQueue, TaskQueue};
use crate::rate_limit::RateLimiter;
use crate::store::Store;

/// Liveness snapshot for `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub timestamp: DateTime<Utc>,
    pub queue_size: usize,
    pub failed_tasks: usize,
    pub documents: usize,
    pub contexts: usize,
    pub processor: ProcessorState,
}

#[derive(Clone)]
pub struct Engine {
    store: Arc<Store>,
    queue: Arc<dyn TaskQueue>,
    processor: Arc<Processor>,
}

impl Engine {
    pub fn new(store: Arc<Store>, queue: Arc<dyn TaskQueue>, processor: Arc<Processor>) -> Self {
        Self {
            store,
            queue,
            processor,
        }
    }

    /// Build an engine with an in-memory queue and a processor configured
    /// from `[queue]`. The processor is not started.
    pub fn from_config(cfg: &QueueConfig) -> Self {
        let store = Arc::new(Store::new());
        let queue: Arc<dyn TaskQueue> = Arc::new(MemoryQueue::new(cfg.retry_position));
        let limiter = RateLimiter::new(cfg.requests_per_minute, cfg.window());
        let timing = Timing {
            throttle_backoff: cfg.throttle_backoff(),
            poll_interval: cfg.poll_interval(),
        };
        let processor = Arc::new(Processor::new(
            store.clone(),
            queue.clone(),
            limiter,
            timing,
        ));
        Self::new(store, queue, processor)
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    pub fn processor(&self) -> &Arc<Processor> {
        &self.processor
    }

    /// Queue a document for creation and return it as accepted.
    ///
    /// The document is not visible to reads until the processor applies it.
    pub fn submit_document(&self, doc: Document) -> CoreResult<Document> {
        let intent =
            TaskIntent::create_document(&doc).map_err(|e| CoreError::TaskApply(e.to_string()))?;
        self.queue.enqueue(intent);
        tracing::debug!(id = %doc.id, "Queued document");
        Ok(doc)
    }

    /// Queue a context for creation and return it as accepted.
    pub fn submit_context(&self, ctx: Context) -> CoreResult<Context> {
        let intent =
            TaskIntent::create_context(&ctx).map_err(|e| CoreError::TaskApply(e.to_string()))?;
        self.queue.enqueue(intent);
        tracing::debug!(id = %ctx.id, "Queued context");
        Ok(ctx)
    }

    pub fn get_document(&self, id: &str) -> CoreResult<Document> {
        self.store.get_document(id)
    }

    pub fn delete_document(&self, id: &str) -> CoreResult<()> {
        let touched = self.store.delete_document(id)?;
        tracing::info!(%id, contexts = touched, "Deleted document");
        Ok(())
    }

    pub fn get_context(&self, id: &str) -> CoreResult<Context> {
        self.store.get_context(id)
    }

    /// Commit a context update, recording one validation failure per
    /// reference that did not resolve.
    pub fn update_context(&self, id: &str, ctx: Context) -> CoreResult<Context> {
        let update = self.store.update_context(id, ctx)?;
        for document_id in update.rejected {
            let record = TaskIntent::new(
                TaskKind::UpdateContext,
                json!({ "context_id": id, "document_id": document_id }),
            );
            let failure = CoreError::ValidationFailure {
                context_id: id.to_string(),
                document_id,
            };
            tracing::warn!(context = %id, "{}", failure);
            self.queue.fail(record, failure.to_string());
        }
        Ok(update.context)
    }

    pub fn delete_context(&self, id: &str) -> CoreResult<()> {
        self.store.delete_context(id)?;
        tracing::info!(%id, "Deleted context");
        Ok(())
    }

    pub fn context_content(&self, id: &str) -> CoreResult<ContextContent> {
        self.store.render_context_content(id)
    }

    pub fn failed_tasks(&self) -> Vec<TaskIntent> {
        self.queue.list_failed()
    }

    /// Move every failed intent back to pending; returns the number moved.
    pub fn retry_failed(&self) -> usize {
        let moved = self.queue.retry_all();
        if moved > 0 {
            tracing::info!(moved, "Retrying failed tasks");
        }
        moved
    }

    pub fn status(&self) -> Status {
        let (documents, contexts) = self.store.counts();
        Status {
            timestamp: Utc::now(),
            queue_size: self.queue.pending_len(),
            failed_tasks: self.queue.failed_len(),
            documents,
            contexts,
            processor: self.processor.state(),
        }
    }
}
