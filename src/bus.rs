//! In-process event bus — synchronous, ordered dispatch
//!
//! `EventBus` delivers each published event to every registered handler in
//! subscription order before `publish` returns. There is no queuing, no
//! cross-process delivery, and no persistence of undelivered events; a publish
//! with zero subscribers succeeds and delivers nothing.
//!
//! Handler failures are contained at the dispatch boundary: an error from one
//! handler is logged and dispatch continues with the next handler. Errors never
//! unwind into the publisher's call stack.

use crate::error::Result;
use crate::types::Envelope;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Trait for event subscribers
///
/// Implementations receive a shared reference to the published envelope.
/// Returning an error marks the delivery as failed for diagnostics but does
/// not affect delivery to other handlers.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one delivered event
    async fn on_event(&self, event: &Envelope) -> Result<()>;
}

/// Adapter turning a plain closure into an `EventHandler`
///
/// Useful for tests and simple subscribers that don't need their own type.
pub struct HandlerFn<F>(F);

#[async_trait]
impl<F> EventHandler for HandlerFn<F>
where
    F: Fn(&Envelope) -> Result<()> + Send + Sync,
{
    async fn on_event(&self, event: &Envelope) -> Result<()> {
        (self.0)(event)
    }
}

/// Wrap a closure as a shareable `EventHandler`
pub fn handler_fn<F>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(&Envelope) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(HandlerFn(f))
}

#[derive(Clone)]
struct Registration {
    subscriber_id: String,
    handler: Arc<dyn EventHandler>,
}

/// Process-wide publish/subscribe primitive
///
/// Cheap to clone — clones share the same subscriber table. Authorization and
/// schema validation live in [`AuthorizedBus`](crate::authz::AuthorizedBus);
/// this type performs raw registration and dispatch only.
#[derive(Clone, Default)]
pub struct EventBus {
    /// event name → handlers in subscription order
    subscribers: Arc<RwLock<HashMap<String, Vec<Registration>>>>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event name
    ///
    /// Handlers for the same event are dispatched in the order they subscribed.
    pub async fn subscribe(
        &self,
        event: impl Into<String>,
        subscriber_id: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) {
        let event = event.into();
        let subscriber_id = subscriber_id.into();

        let mut subs = self.subscribers.write().await;
        subs.entry(event.clone()).or_default().push(Registration {
            subscriber_id: subscriber_id.clone(),
            handler,
        });

        tracing::debug!(event = %event, subscriber = %subscriber_id, "Subscription added");
    }

    /// Publish a payload under an event name
    ///
    /// Wraps the payload in a fresh [`Envelope`] and delivers it synchronously
    /// to every registered handler in subscription order. Returns the envelope
    /// after delivery completes.
    pub async fn publish(&self, event: impl Into<String>, payload: serde_json::Value) -> Envelope {
        let envelope = Envelope::new(event, payload);
        self.dispatch(&envelope).await;
        envelope
    }

    /// Deliver an already-built envelope to all handlers of its event name
    pub async fn publish_envelope(&self, envelope: Envelope) -> Envelope {
        self.dispatch(&envelope).await;
        envelope
    }

    /// Number of handlers registered for an event name
    pub async fn subscriber_count(&self, event: &str) -> usize {
        let subs = self.subscribers.read().await;
        subs.get(event).map(Vec::len).unwrap_or(0)
    }

    async fn dispatch(&self, envelope: &Envelope) {
        // Snapshot the handler list so dispatch runs without holding the lock;
        // handlers may themselves subscribe or publish.
        let handlers: Vec<Registration> = {
            let subs = self.subscribers.read().await;
            subs.get(&envelope.header.name).cloned().unwrap_or_default()
        };

        for registration in &handlers {
            if let Err(e) = registration.handler.on_event(envelope).await {
                tracing::warn!(
                    event = %envelope.header.name,
                    subscriber = %registration.subscriber_id,
                    error = %e,
                    "Handler failed; continuing dispatch"
                );
            }
        }
    }
}
