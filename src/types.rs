//! Core event types for the supervision runtime
//!
//! All payload types use camelCase JSON serialization for wire compatibility.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Well-known event names used by the supervision core
///
/// Names follow the dot-separated `<component>.<event>` convention. Application
/// code may publish its own names alongside these, subject to the permission table.
pub mod topic {
    /// A module reported a domain error
    pub const MODULE_ERROR: &str = "module.error";
    /// An error-histogram bucket crossed the global threshold
    pub const THRESHOLD_EXCEEDED: &str = "supervisor.threshold_exceeded";
    /// Recovery strategies were registered for a module
    pub const STRATEGY_REGISTERED: &str = "recovery.strategy_registered";
    /// A recovery attempt finished (ok or error)
    pub const RECOVERY_COMPLETED: &str = "recovery.attempt_completed";
    /// A service announced a mutation before committing it
    pub const WRITE_REQUESTED: &str = "store.write_requested";
    /// All modules started; the process is open for business
    pub const APPLICATION_READY: &str = "application.ready";
}

/// Upper bound on nested-envelope flattening
///
/// Envelopes are acyclic by construction (boxed ownership), but `resolve` still
/// refuses to walk deeper than this.
const MAX_RESOLVE_DEPTH: usize = 32;

static NULL_PAYLOAD: serde_json::Value = serde_json::Value::Null;

/// Envelope header: identity and emission time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventHeader {
    /// Unique envelope identifier (evt-<uuid>)
    pub id: String,

    /// Event name this envelope was published under
    pub name: String,

    /// Unix timestamp in milliseconds
    pub timestamp: u64,
}

/// Envelope payload: either a raw JSON value or another envelope
///
/// Wrapping happens when an already-enveloped event is re-published (e.g. a
/// module error forwarded to a logging sink). `Envelope::resolve` unwraps one
/// level at a time until it reaches a raw value.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Concrete payload value
    Value(serde_json::Value),
    /// A nested envelope, flattened on access
    Wrapped(Box<Envelope>),
}

/// The wrapper handed to every subscriber of a published event
///
/// Created fresh per publish and immutable afterwards; all subscribers of one
/// delivery observe the same shared, read-only reference.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Header with id, event name, and emission timestamp
    pub header: EventHeader,

    payload: Payload,
}

impl Envelope {
    /// Create an envelope around a raw payload value
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            header: EventHeader {
                id: format!("evt-{}", uuid::Uuid::new_v4()),
                name: name.into(),
                timestamp: now_millis(),
            },
            payload: Payload::Value(payload),
        }
    }

    /// Create an envelope that wraps another envelope
    pub fn wrapping(name: impl Into<String>, inner: Envelope) -> Self {
        Self {
            header: EventHeader {
                id: format!("evt-{}", uuid::Uuid::new_v4()),
                name: name.into(),
                timestamp: now_millis(),
            },
            payload: Payload::Wrapped(Box::new(inner)),
        }
    }

    /// Resolve the innermost concrete payload
    ///
    /// Unwraps nested envelopes one level at a time until a raw value is
    /// reached. Walks at most `MAX_RESOLVE_DEPTH` levels; beyond that the
    /// payload is treated as null and a diagnostic is logged.
    pub fn resolve(&self) -> &serde_json::Value {
        let mut current = self;
        for _ in 0..MAX_RESOLVE_DEPTH {
            match &current.payload {
                Payload::Value(value) => return value,
                Payload::Wrapped(inner) => current = inner,
            }
        }
        tracing::warn!(
            envelope = %self.header.id,
            event = %self.header.name,
            max_depth = MAX_RESOLVE_DEPTH,
            "Envelope nesting exceeds resolve depth; payload treated as null"
        );
        &NULL_PAYLOAD
    }

    /// Deserialize the resolved payload into a typed value
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.resolve().clone())?)
    }
}

/// A module's report of a domain error, published as `module.error`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleErrorReport {
    /// Name of the module the error originated in
    pub module: String,

    /// Error kind, the histogram's first-level key (e.g. "service.error")
    pub kind: String,

    /// Unique error identifier (err-<uuid>)
    pub error_id: String,

    /// Human-readable error message
    pub message: String,
}

impl ModuleErrorReport {
    /// Create a report with an auto-generated error id
    pub fn new(
        module: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            kind: kind.into(),
            error_id: format!("err-{}", uuid::Uuid::new_v4()),
            message: message.into(),
        }
    }
}

/// Payload of `supervisor.threshold_exceeded`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdBreach {
    /// Module whose bucket crossed the limit
    pub module: String,

    /// Error kind of the breaching bucket
    pub error_kind: String,

    /// Bucket count at the moment of the crossing
    pub error_count: u64,
}

/// Outcome of a single recovery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttemptStatus {
    /// Strategy ran to completion without error
    Ok,
    /// Strategy failed or timed out
    Error,
}

/// Payload of `recovery.attempt_completed`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryOutcome {
    /// Module the attempt targeted
    pub module: String,

    /// Name of the attempted strategy
    pub strategy: String,

    /// Whether the attempt succeeded
    pub status: AttemptStatus,
}

/// Payload of `store.write_requested`, emitted by a service before it commits
/// a mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteRequest {
    /// Kind of mutation (e.g. "create", "edit", "remove")
    pub operation: String,

    /// Post-mutation state snapshot; carries a `module` field for replay routing
    pub next: serde_json::Value,

    /// Pre-mutation state snapshot, absent for creations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<serde_json::Value>,
}

/// Current time in Unix milliseconds
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
