//! Authorization layer — capability-gated access to the event bus
//!
//! `AuthorizedBus` wraps an [`EventBus`] and enforces a static
//! [`PermissionTable`] on every subscribe attempt, plus optional per-event
//! schema validation on every publish. Denied subscriptions are never added to
//! the underlying bus; the attempt is logged and dropped, never an error.
//! Payloads that fail schema validation are logged and not delivered to any
//! subscriber.

use crate::bus::{EventBus, EventHandler};
use crate::error::{FaultError, Result};
use crate::schema::{EventSchema, MemorySchemaRegistry, SchemaRegistry};
use crate::types::Envelope;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Outcome of a permission lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Subscriber may attach to the event
    Granted,
    /// The event name has no entry in the table
    UnknownEvent,
    /// The event is known but the subscriber has no entry
    UnknownSubscriber,
    /// The subscriber is explicitly denied
    Denied,
}

/// Static mapping from event name → subscriber id → allow flag
///
/// Read-only at runtime and the sole authorization source. Absence of either
/// key is treated as deny, logged as a distinct diagnostic from an explicit
/// `false`. Loadable from a JSON file for per-deployment tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionTable {
    #[serde(flatten)]
    grants: HashMap<String, HashMap<String, bool>>,
}

impl PermissionTable {
    /// Create an empty table (everything denied)
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a subscriber access to an event (builder style)
    pub fn allow(mut self, event: impl Into<String>, subscriber: impl Into<String>) -> Self {
        self.grants
            .entry(event.into())
            .or_default()
            .insert(subscriber.into(), true);
        self
    }

    /// Explicitly deny a subscriber access to an event (builder style)
    pub fn deny(mut self, event: impl Into<String>, subscriber: impl Into<String>) -> Self {
        self.grants
            .entry(event.into())
            .or_default()
            .insert(subscriber.into(), false);
        self
    }

    /// Look up the decision for a (event, subscriber) pair
    pub fn check(&self, event: &str, subscriber: &str) -> Decision {
        match self.grants.get(event) {
            None => Decision::UnknownEvent,
            Some(subscribers) => match subscribers.get(subscriber) {
                None => Decision::UnknownSubscriber,
                Some(true) => Decision::Granted,
                Some(false) => Decision::Denied,
            },
        }
    }

    /// Load a table from a JSON file
    ///
    /// The file holds a mapping of event names to subscriber allow flags:
    /// `{"module.error": {"module-registry": true, "audit": false}}`
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            FaultError::Config(format!(
                "Failed to read permission table {}: {}",
                path.display(),
                e
            ))
        })?;
        let table: PermissionTable = serde_json::from_str(&json).map_err(|e| {
            FaultError::Config(format!(
                "Failed to parse permission table {}: {}",
                path.display(),
                e
            ))
        })?;

        tracing::debug!(
            path = %path.display(),
            events = table.grants.len(),
            "Permission table loaded"
        );
        Ok(table)
    }

    /// Number of event names with at least one entry
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    /// True if the table has no entries
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

/// Capability-gated wrapper over the event bus
///
/// Cheap to clone — clones share the underlying bus, table, and schema
/// registry. All supervision components publish and subscribe through this
/// type rather than touching the raw bus.
#[derive(Clone)]
pub struct AuthorizedBus {
    bus: EventBus,
    permissions: Arc<PermissionTable>,
    schemas: Arc<MemorySchemaRegistry>,
}

impl AuthorizedBus {
    /// Wrap a bus with a permission table
    pub fn new(bus: EventBus, permissions: PermissionTable) -> Self {
        Self {
            bus,
            permissions: Arc::new(permissions),
            schemas: Arc::new(MemorySchemaRegistry::new()),
        }
    }

    /// Attempt to subscribe a handler to an event
    ///
    /// The handler is registered only when the permission table grants the
    /// subscriber access; denied attempts log a diagnostic and return `false`
    /// without touching the bus. A supplied schema is associated with the
    /// event name (latest registration wins) when the subscription is granted.
    pub async fn subscribe(
        &self,
        event: &str,
        subscriber_id: &str,
        handler: Arc<dyn EventHandler>,
        schema: Option<EventSchema>,
    ) -> bool {
        match self.permissions.check(event, subscriber_id) {
            Decision::Granted => {}
            Decision::UnknownEvent => {
                tracing::warn!(
                    event = %event,
                    subscriber = %subscriber_id,
                    "Subscription dropped: event not present in permission table"
                );
                return false;
            }
            Decision::UnknownSubscriber => {
                tracing::warn!(
                    event = %event,
                    subscriber = %subscriber_id,
                    "Subscription dropped: subscriber not listed for event"
                );
                return false;
            }
            Decision::Denied => {
                tracing::warn!(
                    event = %event,
                    subscriber = %subscriber_id,
                    "Subscription dropped: subscriber explicitly denied"
                );
                return false;
            }
        }

        if let Some(schema) = schema {
            if let Err(e) = self.schemas.register(schema) {
                tracing::warn!(event = %event, error = %e, "Schema registration failed");
            }
        }

        self.bus.subscribe(event, subscriber_id, handler).await;
        true
    }

    /// Publish a payload under an event name
    ///
    /// Validates the payload against any registered schema first; a rejected
    /// payload is logged and not delivered to any subscriber (fail closed).
    /// Returns the envelope when delivery happened.
    pub async fn publish(&self, event: &str, payload: serde_json::Value) -> Option<Envelope> {
        match self.schemas.validate(event, &payload) {
            Ok(()) => {}
            Err(e) => {
                tracing::warn!(
                    event = %event,
                    error = %e,
                    "Publish dropped: payload failed schema validation"
                );
                return None;
            }
        }

        Some(self.bus.publish(event, payload).await)
    }

    /// Serialize a typed payload and publish it
    pub async fn publish_typed<T: Serialize>(&self, event: &str, payload: &T) -> Result<Option<Envelope>> {
        let value = serde_json::to_value(payload)?;
        Ok(self.publish(event, value).await)
    }

    /// Number of handlers registered for an event name on the underlying bus
    pub async fn subscriber_count(&self, event: &str) -> usize {
        self.bus.subscriber_count(event).await
    }

    /// The permission table in force
    pub fn permissions(&self) -> &PermissionTable {
        &self.permissions
    }
}
