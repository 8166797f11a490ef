//! Module registry — lifecycle management for independently-developed units
//!
//! A module is registered as a constructor function and instantiated once
//! against a shared [`ModuleContext`]. The registry owns each module's
//! [`ModuleRecord`] (status, launch time, ready flag, error statistics) and
//! its teardown function. Records are mutated only through registry
//! operations and destroyed only by process teardown.

use crate::authz::AuthorizedBus;
use crate::bus::EventHandler;
use crate::error::{FaultError, Result};
use crate::supervisor::Supervisor;
use crate::types::{now_millis, topic, Envelope, ModuleErrorReport, ThresholdBreach};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Teardown function captured from a module constructor
pub type TeardownFn = Box<dyn FnOnce() + Send>;

/// Module constructor: builds an instance against the shared context and
/// optionally returns a teardown function
pub type ModuleCtor =
    Arc<dyn Fn(ModuleContext) -> BoxFuture<'static, Result<Option<TeardownFn>>> + Send + Sync>;

/// Wrap an async closure as a [`ModuleCtor`]
pub fn module_ctor<F, Fut>(f: F) -> ModuleCtor
where
    F: Fn(ModuleContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<TeardownFn>>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Shared context handed to every module constructor
#[derive(Clone)]
pub struct ModuleContext {
    /// Authorized bus for module subscriptions and publishes
    pub bus: AuthorizedBus,

    /// Opaque application configuration
    pub config: Arc<serde_json::Value>,
}

/// Module lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModuleStatus {
    Up,
    Down,
}

/// Per-module error statistics block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStats {
    /// Errors observed for this module since registration
    pub count: u64,

    /// True once any error has been observed
    pub detected: bool,

    /// Id of the most recent error
    pub last_error_id: Option<String>,

    /// Kind of the most recent error
    pub last_kind: Option<String>,

    /// Message of the most recent error
    pub last_message: Option<String>,

    /// Unix millisecond timestamp of the most recent error
    pub last_seen: Option<u64>,
}

/// Lifecycle metadata for one registered module
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRecord {
    /// Module name, the registry's unique key
    pub name: String,

    /// Current lifecycle status
    pub status: ModuleStatus,

    /// Unix millisecond timestamp of the most recent (re)start
    pub launched_at: u64,

    /// Whether the module is accepting work
    pub ready: bool,

    /// Error statistics
    pub errors: ErrorStats,
}

struct ModuleSlot {
    ctor: ModuleCtor,
    record: ModuleRecord,
    teardown: Option<TeardownFn>,
}

#[derive(Default)]
struct Inner {
    modules: HashMap<String, ModuleSlot>,
    /// Registration order, used by batch start
    order: Vec<String>,
}

/// Registry of module constructors and lifecycle records
pub struct ModuleRegistry {
    context: ModuleContext,
    inner: Mutex<Inner>,
}

impl ModuleRegistry {
    /// Create a registry whose modules share the given context
    pub fn new(context: ModuleContext) -> Self {
        Self {
            context,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Store a constructor under a module name without invoking it
    ///
    /// Re-registering a name replaces the constructor and resets the record.
    pub async fn register(&self, name: impl Into<String>, ctor: ModuleCtor) {
        let name = name.into();
        let mut inner = self.inner.lock().await;

        if inner.modules.contains_key(&name) {
            tracing::warn!(module = %name, "Module re-registered; replacing constructor");
        } else {
            inner.order.push(name.clone());
        }

        inner.modules.insert(
            name.clone(),
            ModuleSlot {
                ctor,
                record: ModuleRecord {
                    name: name.clone(),
                    status: ModuleStatus::Down,
                    launched_at: 0,
                    ready: false,
                    errors: ErrorStats::default(),
                },
                teardown: None,
            },
        );

        tracing::debug!(module = %name, "Module registered");
    }

    /// Start modules by name, or all registered modules when `names` is empty
    ///
    /// Modules start in list order (registration order for the empty case).
    /// A constructor failure is logged and does not abort the batch; the
    /// failed module is left down.
    pub async fn start(&self, names: &[&str]) {
        let targets: Vec<String> = if names.is_empty() {
            self.inner.lock().await.order.clone()
        } else {
            names.iter().map(|n| n.to_string()).collect()
        };

        for name in targets {
            if let Err(e) = self.launch(&name).await {
                tracing::error!(module = %name, error = %e, "Module failed to start; continuing batch");
            }
        }
    }

    /// Mark a module down and invoke its teardown exactly once
    ///
    /// Stopping an already-stopped module is a no-op beyond the status flip;
    /// the teardown never runs twice.
    pub async fn stop(&self, name: &str) -> Result<()> {
        let teardown = {
            let mut inner = self.inner.lock().await;
            let slot = inner
                .modules
                .get_mut(name)
                .ok_or_else(|| FaultError::UnknownModule(name.to_string()))?;
            slot.record.status = ModuleStatus::Down;
            slot.record.ready = false;
            slot.teardown.take()
        };

        if let Some(teardown) = teardown {
            teardown();
        }

        tracing::info!(module = %name, "Module stopped");
        Ok(())
    }

    /// Re-invoke the module's original constructor for a fresh instance
    ///
    /// A still-live instance has its teardown invoked before the replacement
    /// is built. Prior error statistics are preserved; counters never reset
    /// on restart.
    pub async fn restart(&self, name: &str) -> Result<()> {
        {
            let inner = self.inner.lock().await;
            if !inner.modules.contains_key(name) {
                return Err(FaultError::UnknownModule(name.to_string()));
            }
        }
        self.launch(name).await
    }

    /// Account for a module error and stop the module on a threshold breach
    ///
    /// Updates the module's error statistics, delegates counting to the
    /// supervisor, and on the breach that first crosses the threshold stops
    /// the module and returns the breach for the caller to act on (publish,
    /// trigger recovery).
    pub async fn handle_module_error(
        &self,
        report: &ModuleErrorReport,
        supervisor: &Supervisor,
    ) -> Result<Option<ThresholdBreach>> {
        let known = {
            let mut inner = self.inner.lock().await;
            match inner.modules.get_mut(&report.module) {
                Some(slot) => {
                    let errors = &mut slot.record.errors;
                    errors.count += 1;
                    errors.detected = true;
                    errors.last_error_id = Some(report.error_id.clone());
                    errors.last_kind = Some(report.kind.clone());
                    errors.last_message = Some(report.message.clone());
                    errors.last_seen = Some(now_millis());
                    true
                }
                None => {
                    tracing::warn!(
                        module = %report.module,
                        "Error reported for unregistered module; counting without lifecycle"
                    );
                    false
                }
            }
        };

        let breach = supervisor.record_error(report)?;

        if let Some(ref breach) = breach {
            if known {
                self.stop(&breach.module).await?;
            }
        }

        Ok(breach)
    }

    /// Snapshot of one module's lifecycle record
    pub async fn record(&self, name: &str) -> Option<ModuleRecord> {
        let inner = self.inner.lock().await;
        inner.modules.get(name).map(|slot| slot.record.clone())
    }

    /// Snapshot of all records in registration order
    pub async fn records(&self) -> Vec<ModuleRecord> {
        let inner = self.inner.lock().await;
        inner
            .order
            .iter()
            .filter_map(|name| inner.modules.get(name))
            .map(|slot| slot.record.clone())
            .collect()
    }

    async fn launch(&self, name: &str) -> Result<()> {
        let (ctor, prior_teardown) = {
            let mut inner = self.inner.lock().await;
            let slot = inner
                .modules
                .get_mut(name)
                .ok_or_else(|| FaultError::UnknownModule(name.to_string()))?;
            slot.record.status = ModuleStatus::Up;
            slot.record.ready = true;
            slot.record.launched_at = now_millis();
            (slot.ctor.clone(), slot.teardown.take())
        };

        // A still-live instance is torn down before its replacement is built.
        if let Some(teardown) = prior_teardown {
            tracing::info!(module = %name, "Tearing down live instance before relaunch");
            teardown();
        }

        // Constructor runs outside the lock; it may subscribe or publish.
        match ctor(self.context.clone()).await {
            Ok(teardown) => {
                let mut inner = self.inner.lock().await;
                if let Some(slot) = inner.modules.get_mut(name) {
                    slot.teardown = teardown;
                }
                tracing::info!(module = %name, "Module started");
                Ok(())
            }
            Err(e) => {
                let mut inner = self.inner.lock().await;
                if let Some(slot) = inner.modules.get_mut(name) {
                    slot.record.status = ModuleStatus::Down;
                    slot.record.ready = false;
                }
                Err(FaultError::ModuleStart {
                    module: name.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

/// Bus adapter: drives error accounting from `module.error` envelopes
///
/// Parses each envelope into a [`ModuleErrorReport`], runs it through
/// [`ModuleRegistry::handle_module_error`], and publishes
/// `supervisor.threshold_exceeded` when a bucket crosses the limit.
pub struct ModuleErrorHandler {
    registry: Arc<ModuleRegistry>,
    supervisor: Arc<Supervisor>,
    bus: AuthorizedBus,
}

impl ModuleErrorHandler {
    /// Wire a registry and supervisor to the bus
    pub fn new(registry: Arc<ModuleRegistry>, supervisor: Arc<Supervisor>, bus: AuthorizedBus) -> Self {
        Self {
            registry,
            supervisor,
            bus,
        }
    }
}

#[async_trait]
impl EventHandler for ModuleErrorHandler {
    async fn on_event(&self, event: &Envelope) -> Result<()> {
        let report: ModuleErrorReport = event.payload_as()?;

        if let Some(breach) = self
            .registry
            .handle_module_error(&report, &self.supervisor)
            .await?
        {
            self.bus
                .publish_typed(topic::THRESHOLD_EXCEEDED, &breach)
                .await?;
        }
        Ok(())
    }
}
