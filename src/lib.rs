//! # faultline
//!
//! Single-process, Erlang-supervisor-style fault containment core.
//!
//! ## Overview
//!
//! `faultline` lets independently-developed modules communicate only through
//! an authorized event bus. When a module's error rate crosses a threshold it
//! is stopped and a registered recovery strategy is attempted; once recovered,
//! the write-ahead log lets the module replay the writes it missed while down.
//!
//! ## Quick Start
//!
//! ```rust
//! use faultline::{PermissionTable, Runtime, WriteRequest};
//!
//! # async fn example() -> faultline::Result<()> {
//! // Grant application subscribers access to events they may observe
//! let permissions = PermissionTable::new()
//!     .allow("application.ready", "chaos-agent");
//!
//! let runtime = Runtime::builder().permissions(permissions).build().await;
//! runtime.start(&[]).await;
//!
//! // A service announces a mutation before committing it; the WAL records it
//! let request = WriteRequest {
//!     operation: "create".to_string(),
//!     next: serde_json::json!({"id": "/posts/1", "module": "posts"}),
//!     prev: None,
//! };
//! runtime.bus().publish_typed("store.write_requested", &request).await?;
//!
//! println!("last sequence: {:?}", runtime.wal().last_sequence_id());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **EventBus** — in-process publish/subscribe; synchronous, ordered dispatch
//! - **AuthorizedBus** — permission-table gating plus per-event schema validation
//! - **ModuleRegistry** — constructor registration, lifecycle records, teardown
//! - **Supervisor** — (error kind, module) histogram with single-fire breaches
//! - **RecoveryManager** — ordered per-module strategies, clamped round-robin
//! - **WriteAheadLog** — sequenced append-only log with replay queries

pub mod authz;
pub mod bus;
pub mod error;
pub mod recovery;
pub mod registry;
pub mod runtime;
pub mod schema;
pub mod supervisor;
pub mod types;
pub mod wal;

// Re-export core types
pub use authz::{AuthorizedBus, Decision, PermissionTable};
pub use bus::{handler_fn, EventBus, EventHandler};
pub use error::{FaultError, Result};
pub use recovery::{
    RecoveryConfig, RecoveryManager, RecoveryStrategy, RegistrationSnapshot, StrategySnapshot,
};
pub use registry::{
    module_ctor, ErrorStats, ModuleContext, ModuleCtor, ModuleErrorHandler, ModuleRecord,
    ModuleRegistry, ModuleStatus, TeardownFn,
};
pub use runtime::{Runtime, RuntimeBuilder};
pub use schema::{EventSchema, MemorySchemaRegistry, SchemaRegistry};
pub use supervisor::{ErrorBucket, ErrorHistogram, Supervisor, SupervisorConfig};
pub use types::{
    topic, AttemptStatus, Envelope, EventHeader, ModuleErrorReport, Payload, RecoveryOutcome,
    ThresholdBreach, WriteRequest,
};
pub use wal::{WalEntry, WriteAheadLog};
