//! # Context Queue
//!
//! An in-memory document and context store behind an HTTP API, with an
//! asynchronous ingestion pipeline.
//!
//! Creates are not applied when the request arrives. They are queued as
//! task intents and drained by a single rate-limited processor, which either
//! commits them to the store or moves them to a failed list for inspection
//! and retry. Reads, deletes and updates go straight to the store, which
//! keeps context references consistent (cascading deletes, filter-on-write
//! updates).
//!
//! ## Architecture
//!
//! ```text
//!  HTTP ──▶ Engine ──enqueue──▶ TaskQueue ──▶ Processor ──▶ Store
//!             │                    ▲   │          │ admit?
//!             │                    │   └─failed◀──┤
//!             │                 retry             ▼
//!             └──── direct get/delete/update ─▶ Store   RateLimiter
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`models`] | Documents, contexts and task intents |
//! | [`error`] | Core error taxonomy |
//! | [`rate_limit`] | Sliding-window admission control |
//! | [`store`] | Entity storage and referential integrity |
//! | [`queue`] | Pending and failed intent lists |
//! | [`processor`] | The queue-draining worker |
//! | [`engine`] | Operations exposed to the API |
//! | [`server`] | Axum HTTP server |
//! | [`logging`] | Tracing subscriber setup |

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod processor;
pub mod queue;
pub mod rate_limit;
pub mod server;
pub mod store;
