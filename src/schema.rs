//! Event schema registry — validate payloads before delivery
//!
//! Provides a `SchemaRegistry` trait for registering and validating event
//! payload shapes. Schemas are keyed by event name; registering a schema for
//! an event that already has one replaces it (latest registration wins).
//! Validation fails closed at the publish site: a rejected payload is never
//! delivered to any subscriber.

use crate::error::{FaultError, Result};
use std::collections::HashMap;
use std::sync::RwLock;

/// Schema definition for one event name
#[derive(Debug, Clone)]
pub struct EventSchema {
    /// Event name this schema applies to (e.g. "store.write_requested")
    pub event: String,

    /// Required top-level fields in the payload
    pub required_fields: Vec<String>,

    /// Optional description of the schema
    pub description: String,
}

impl EventSchema {
    /// Build a schema from an event name and its required fields
    pub fn new(event: impl Into<String>, required_fields: &[&str]) -> Self {
        Self {
            event: event.into(),
            required_fields: required_fields.iter().map(|f| f.to_string()).collect(),
            description: String::new(),
        }
    }
}

/// Trait for event schema registries
///
/// Implementations store schema definitions and validate payloads against
/// them before events are dispatched.
pub trait SchemaRegistry: Send + Sync {
    /// Register a schema, replacing any existing schema for the same event
    fn register(&self, schema: EventSchema) -> Result<()>;

    /// Get the schema registered for an event name
    fn get(&self, event: &str) -> Result<Option<EventSchema>>;

    /// List all event names with a registered schema
    fn list_events(&self) -> Result<Vec<String>>;

    /// Validate a payload against the schema for an event name
    ///
    /// Returns Ok(()) if valid or if no schema is registered.
    fn validate(&self, event: &str, payload: &serde_json::Value) -> Result<()>;
}

/// In-memory schema registry
///
/// Stores schemas in a `HashMap` protected by `RwLock`.
/// Schemas are lost on process restart.
pub struct MemorySchemaRegistry {
    /// event name → schema
    schemas: RwLock<HashMap<String, EventSchema>>,
}

impl MemorySchemaRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            schemas: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemorySchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry for MemorySchemaRegistry {
    fn register(&self, schema: EventSchema) -> Result<()> {
        if schema.event.is_empty() {
            return Err(FaultError::Config(
                "Event name cannot be empty".to_string(),
            ));
        }

        let mut schemas = self.schemas.write().map_err(|e| {
            FaultError::LockPoisoned(format!("Schema registry: {}", e))
        })?;
        schemas.insert(schema.event.clone(), schema);
        Ok(())
    }

    fn get(&self, event: &str) -> Result<Option<EventSchema>> {
        let schemas = self.schemas.read().map_err(|e| {
            FaultError::LockPoisoned(format!("Schema registry: {}", e))
        })?;
        Ok(schemas.get(event).cloned())
    }

    fn list_events(&self) -> Result<Vec<String>> {
        let schemas = self.schemas.read().map_err(|e| {
            FaultError::LockPoisoned(format!("Schema registry: {}", e))
        })?;
        let mut events: Vec<String> = schemas.keys().cloned().collect();
        events.sort();
        Ok(events)
    }

    fn validate(&self, event: &str, payload: &serde_json::Value) -> Result<()> {
        let schemas = self.schemas.read().map_err(|e| {
            FaultError::LockPoisoned(format!("Schema registry: {}", e))
        })?;

        let schema = match schemas.get(event) {
            Some(s) => s,
            None => return Ok(()), // No schema registered — pass through
        };

        if let serde_json::Value::Object(map) = payload {
            for field in &schema.required_fields {
                if !map.contains_key(field) {
                    return Err(FaultError::SchemaValidation {
                        event: event.to_string(),
                        reason: format!("Missing required field '{}'", field),
                    });
                }
            }
        } else if !schema.required_fields.is_empty() {
            return Err(FaultError::SchemaValidation {
                event: event.to_string(),
                reason: "Payload must be a JSON object when schema has required fields"
                    .to_string(),
            });
        }

        Ok(())
    }
}
