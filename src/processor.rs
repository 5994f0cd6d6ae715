//! The single worker that drains the task queue.
//!
//! Each [`step`](Processor::step) walks one edge of a small state machine:
//!
//! ```text
//!            queue empty
//!   ┌──────┐ ─────────────▶ Idle
//!   │ step │  limiter rejects
//!   └──────┘ ─────────────▶ Throttled  (wait backoff, nothing dequeued)
//!            admitted
//!            ─────────────▶ Applying ──▶ Applied | Failed ──▶ Idle
//! ```
//!
//! Failures are captured on the intent and moved to the failed list; they
//! never stop the loop.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::error::CoreError;
use crate::models::{Context, Document, TaskIntent, TaskKind};
use crate::queue::TaskQueue;
use crate::rate_limit::RateLimiter;
use crate::store::Store;

/// Observable processor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorState {
    Idle,
    Throttled,
    Applying,
}

impl ProcessorState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ProcessorState::Throttled,
            2 => ProcessorState::Applying,
            _ => ProcessorState::Idle,
        }
    }
}

/// What a single [`Processor::step`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Nothing pending.
    Idle,
    /// Work is pending but the rate limiter refused admission.
    Throttled,
    /// The intent was committed; carries the id of the stored entity.
    Applied { kind: TaskKind, id: String },
    /// The intent moved to the failed list with this error.
    Failed { kind: TaskKind, error: String },
}

/// Loop pacing.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Wait after a rejected admission before checking again.
    pub throttle_backoff: Duration,
    /// Yield between steps, including while idle.
    pub poll_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            throttle_backoff: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}

pub struct Processor {
    store: Arc<Store>,
    queue: Arc<dyn TaskQueue>,
    limiter: RateLimiter,
    timing: Timing,
    state: AtomicU8,
}

impl Processor {
    pub fn new(
        store: Arc<Store>,
        queue: Arc<dyn TaskQueue>,
        limiter: RateLimiter,
        timing: Timing,
    ) -> Self {
        Self {
            store,
            queue,
            limiter,
            timing,
            state: AtomicU8::new(ProcessorState::Idle as u8),
        }
    }

    pub fn state(&self) -> ProcessorState {
        ProcessorState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn set_state(&self, state: ProcessorState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    /// Run one admission check and, if admitted, apply one intent.
    pub fn step(&self) -> Step {
        if self.queue.pending_len() == 0 {
            self.set_state(ProcessorState::Idle);
            return Step::Idle;
        }

        if !self.limiter.admit() {
            self.set_state(ProcessorState::Throttled);
            tracing::warn!(
                limit = self.limiter.capacity(),
                in_window = self.limiter.in_window(),
                pending = self.queue.pending_len(),
                "Rate limit reached, waiting before processing more tasks"
            );
            return Step::Throttled;
        }

        self.set_state(ProcessorState::Applying);
        // Another consumer may have drained the queue since the length check.
        let Some(intent) = self.queue.dequeue_next() else {
            self.set_state(ProcessorState::Idle);
            return Step::Idle;
        };

        let kind = intent.kind.clone();
        let step = match self.apply(&intent) {
            Ok(id) => {
                tracing::info!(task = %kind, %id, "Processed task");
                Step::Applied { kind, id }
            }
            Err(err) => {
                // A replayed validation record keeps the diagnostic it was
                // recorded with.
                let error = match (&intent.kind, &intent.error) {
                    (TaskKind::UpdateContext, Some(recorded)) => recorded.clone(),
                    _ => err.to_string(),
                };
                tracing::error!(task = %kind, %error, "Error processing task");
                self.queue.fail(intent, error.clone());
                Step::Failed { kind, error }
            }
        };
        self.set_state(ProcessorState::Idle);
        step
    }

    fn apply(&self, intent: &TaskIntent) -> Result<String, CoreError> {
        match &intent.kind {
            TaskKind::CreateDocument => {
                let doc: Document = serde_json::from_value(intent.payload.clone())
                    .map_err(|e| CoreError::TaskApply(format!("invalid document: {}", e)))?;
                Ok(self.store.put_document(doc).id)
            }
            TaskKind::CreateContext => {
                let ctx: Context = serde_json::from_value(intent.payload.clone())
                    .map_err(|e| CoreError::TaskApply(format!("invalid context: {}", e)))?;
                Ok(self.store.put_context(ctx).id)
            }
            other => Err(CoreError::TaskApply(format!(
                "unsupported task type: {}",
                other
            ))),
        }
    }

    /// Drive [`step`](Self::step) forever, sleeping between steps.
    pub async fn run(self: Arc<Self>) {
        loop {
            let pause = match self.step() {
                Step::Throttled => self.timing.throttle_backoff,
                _ => self.timing.poll_interval,
            };
            tokio::time::sleep(pause).await;
        }
    }

    /// Start [`run`](Self::run) on the current tokio runtime. Abort the
    /// returned handle to stop the loop.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use serde_json::json;

    fn setup(capacity: usize) -> (Arc<Store>, Arc<MemoryQueue>, Arc<Processor>) {
        let store = Arc::new(Store::new());
        let queue = Arc::new(MemoryQueue::default());
        let processor = Arc::new(Processor::new(
            store.clone(),
            queue.clone(),
            RateLimiter::per_minute(capacity),
            Timing::default(),
        ));
        (store, queue, processor)
    }

    fn create_doc(payload: serde_json::Value) -> TaskIntent {
        TaskIntent::new(TaskKind::CreateDocument, payload)
    }

    #[test]
    fn test_idle_when_queue_empty() {
        let (_, _, processor) = setup(10);
        assert_eq!(processor.step(), Step::Idle);
        assert_eq!(processor.state(), ProcessorState::Idle);
    }

    #[test]
    fn test_applies_document_without_id() {
        let (store, queue, processor) = setup(10);
        queue.enqueue(create_doc(json!({ "content": "hello", "metadata": { "k": 1 } })));

        let Step::Applied { kind, id } = processor.step() else {
            panic!("expected applied step");
        };
        assert_eq!(kind, TaskKind::CreateDocument);
        let doc = store.get_document(&id).unwrap();
        assert_eq!(doc.content, "hello");
        assert_eq!(doc.metadata["k"], json!(1));
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn test_applies_context() {
        let (store, queue, processor) = setup(10);
        queue.enqueue(TaskIntent::new(
            TaskKind::CreateContext,
            json!({ "id": "c1", "name": "notes", "documents": ["not-yet"] }),
        ));
        assert!(matches!(processor.step(), Step::Applied { .. }));
        // Creation does not validate references.
        assert_eq!(store.get_context("c1").unwrap().documents, vec!["not-yet"]);
    }

    #[test]
    fn test_malformed_intent_is_isolated() {
        let (store, queue, processor) = setup(10);
        queue.enqueue(create_doc(json!({ "id": "bad", "metadata": {} })));
        queue.enqueue(create_doc(json!({ "id": "good", "content": "ok" })));

        let Step::Failed { error, .. } = processor.step() else {
            panic!("expected failed step");
        };
        assert!(error.contains("content"), "error was: {error}");

        assert!(matches!(processor.step(), Step::Applied { .. }));
        assert!(store.get_document("good").is_ok());
        assert!(store.get_document("bad").is_err());

        let failed = queue.list_failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].payload["id"], "bad");
        assert!(!failed[0].error.as_deref().unwrap_or_default().is_empty());
    }

    #[test]
    fn test_unsupported_kind_fails() {
        let (_, queue, processor) = setup(10);
        queue.enqueue(TaskIntent::new(TaskKind::Other("reindex".into()), json!({})));
        queue.enqueue(TaskIntent::new(TaskKind::UpdateContext, json!({})));

        for expected in ["reindex", "update_context"] {
            match processor.step() {
                Step::Failed { error, .. } => {
                    assert_eq!(error, format!("unsupported task type: {expected}"))
                }
                other => panic!("unexpected step: {other:?}"),
            }
        }
        assert_eq!(queue.failed_len(), 2);
    }

    #[test]
    fn test_throttled_step_leaves_queue_untouched() {
        let (_, queue, processor) = setup(1);
        queue.enqueue(create_doc(json!({ "content": "a" })));
        queue.enqueue(create_doc(json!({ "content": "b" })));

        assert!(matches!(processor.step(), Step::Applied { .. }));
        assert_eq!(processor.step(), Step::Throttled);
        assert_eq!(processor.state(), ProcessorState::Throttled);
        assert_eq!(queue.pending_len(), 1);
        assert_eq!(queue.failed_len(), 0);
    }

    #[test]
    fn test_retried_intents_are_reprocessed() {
        let (store, queue, processor) = setup(10);
        queue.enqueue(TaskIntent::new(TaskKind::CreateContext, json!({ "id": "c1" })));
        assert!(matches!(processor.step(), Step::Failed { .. }));

        assert_eq!(queue.retry_all(), 1);
        assert!(matches!(processor.step(), Step::Failed { .. }));
        assert_eq!(queue.failed_len(), 1);
        assert!(store.get_context("c1").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_drains_queue() {
        let (store, queue, processor) = setup(60);
        for n in 0..3 {
            queue.enqueue(create_doc(json!({ "id": format!("d{n}"), "content": "x" })));
        }
        let handle = processor.spawn();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(store.counts(), (3, 0));

        handle.abort();
    }

    #[test]
    fn test_replayed_validation_record_keeps_its_error() {
        let (_, queue, processor) = setup(10);
        queue.fail(
            TaskIntent::new(
                TaskKind::UpdateContext,
                json!({ "context_id": "c1", "document_id": "d9" }),
            ),
            "Document d9 does not exist".to_string(),
        );
        assert_eq!(queue.retry_all(), 1);

        let Step::Failed { error, .. } = processor.step() else {
            panic!("expected failed step");
        };
        assert_eq!(error, "Document d9 does not exist");
        let failed = queue.list_failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error.as_deref(), Some("Document d9 does not exist"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_resumes_after_window_elapses() {
        let store = Arc::new(Store::new());
        let queue = Arc::new(MemoryQueue::default());
        let processor = Arc::new(Processor::new(
            store.clone(),
            queue.clone(),
            RateLimiter::new(1, Duration::from_secs(10)),
            Timing::default(),
        ));
        queue.enqueue(create_doc(json!({ "content": "a" })));
        queue.enqueue(create_doc(json!({ "content": "b" })));

        let handle = processor.spawn();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.counts(), (1, 0));
        assert_eq!(processor.state(), ProcessorState::Throttled);

        tokio::time::sleep(Duration::from_secs(55)).await;
        assert_eq!(store.counts(), (2, 0));
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(processor.state(), ProcessorState::Idle);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_backs_off_when_throttled() {
        let store = Arc::new(Store::new());
        let queue = Arc::new(MemoryQueue::default());
        let processor = Arc::new(Processor::new(
            store.clone(),
            queue.clone(),
            RateLimiter::new(1, Duration::from_secs(3600)),
            Timing::default(),
        ));
        queue.enqueue(create_doc(json!({ "content": "a" })));
        queue.enqueue(create_doc(json!({ "content": "b" })));

        let handle = processor.spawn();
        tokio::time::sleep(Duration::from_secs(12)).await;

        // The second intent stays pending while the window is full.
        assert_eq!(store.counts(), (1, 0));
        assert_eq!(queue.pending_len(), 1);
        assert_eq!(processor.state(), ProcessorState::Throttled);

        handle.abort();
    }
}
