//! Runtime assembly — wires the supervision components onto one bus
//!
//! [`Runtime`] owns an authorized bus, module registry, supervisor, recovery
//! manager, and write-ahead log, with the internal subscriptions already in
//! place. Tests and embedders get a fresh instance graph per build; there are
//! no process-wide singletons.

use crate::authz::{AuthorizedBus, PermissionTable};
use crate::bus::EventBus;
use crate::recovery::{RecoveryConfig, RecoveryManager};
use crate::registry::{ModuleContext, ModuleErrorHandler, ModuleRegistry};
use crate::schema::EventSchema;
use crate::supervisor::{Supervisor, SupervisorConfig};
use crate::types::topic;
use crate::wal::WriteAheadLog;
use std::sync::Arc;

/// Subscriber id used by the registry's module-error handler
pub const REGISTRY_SUBSCRIBER: &str = "module-registry";
/// Subscriber id used by the recovery manager
pub const RECOVERY_SUBSCRIBER: &str = "recovery-manager";
/// Subscriber id used by the write-ahead log
pub const WAL_SUBSCRIBER: &str = "wal";

/// Builder for a [`Runtime`]
pub struct RuntimeBuilder {
    permissions: PermissionTable,
    supervisor_config: SupervisorConfig,
    recovery_config: RecoveryConfig,
    app_config: serde_json::Value,
}

impl RuntimeBuilder {
    /// Start from defaults: empty permission table, default thresholds
    pub fn new() -> Self {
        Self {
            permissions: PermissionTable::new(),
            supervisor_config: SupervisorConfig::default(),
            recovery_config: RecoveryConfig::default(),
            app_config: serde_json::Value::Null,
        }
    }

    /// Permission table for application subscribers
    ///
    /// Grants for the internal subscribers are added on top during build.
    pub fn permissions(mut self, permissions: PermissionTable) -> Self {
        self.permissions = permissions;
        self
    }

    /// Supervisor tuning (error threshold)
    pub fn supervisor_config(mut self, config: SupervisorConfig) -> Self {
        self.supervisor_config = config;
        self
    }

    /// Recovery tuning (strategy timeout)
    pub fn recovery_config(mut self, config: RecoveryConfig) -> Self {
        self.recovery_config = config;
        self
    }

    /// Opaque application configuration handed to module constructors
    pub fn app_config(mut self, config: serde_json::Value) -> Self {
        self.app_config = config;
        self
    }

    /// Assemble the runtime and wire the internal subscriptions
    pub async fn build(self) -> Runtime {
        let permissions = self
            .permissions
            .allow(topic::MODULE_ERROR, REGISTRY_SUBSCRIBER)
            .allow(topic::THRESHOLD_EXCEEDED, RECOVERY_SUBSCRIBER)
            .allow(topic::WRITE_REQUESTED, WAL_SUBSCRIBER);

        let bus = AuthorizedBus::new(EventBus::new(), permissions);
        let supervisor = Arc::new(Supervisor::new(self.supervisor_config));
        let registry = Arc::new(ModuleRegistry::new(ModuleContext {
            bus: bus.clone(),
            config: Arc::new(self.app_config),
        }));
        let recovery = Arc::new(RecoveryManager::new(bus.clone(), self.recovery_config));
        let wal = Arc::new(WriteAheadLog::new());

        bus.subscribe(
            topic::MODULE_ERROR,
            REGISTRY_SUBSCRIBER,
            Arc::new(ModuleErrorHandler::new(
                registry.clone(),
                supervisor.clone(),
                bus.clone(),
            )),
            Some(EventSchema::new(
                topic::MODULE_ERROR,
                &["module", "kind", "errorId", "message"],
            )),
        )
        .await;

        bus.subscribe(
            topic::THRESHOLD_EXCEEDED,
            RECOVERY_SUBSCRIBER,
            recovery.clone(),
            Some(EventSchema::new(
                topic::THRESHOLD_EXCEEDED,
                &["module", "errorKind", "errorCount"],
            )),
        )
        .await;

        bus.subscribe(
            topic::WRITE_REQUESTED,
            WAL_SUBSCRIBER,
            wal.clone(),
            Some(EventSchema::new(
                topic::WRITE_REQUESTED,
                &["operation", "next"],
            )),
        )
        .await;

        Runtime {
            bus,
            registry,
            supervisor,
            recovery,
            wal,
        }
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Assembled supervision runtime
pub struct Runtime {
    bus: AuthorizedBus,
    registry: Arc<ModuleRegistry>,
    supervisor: Arc<Supervisor>,
    recovery: Arc<RecoveryManager>,
    wal: Arc<WriteAheadLog>,
}

impl Runtime {
    /// Begin building a runtime
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Start modules (all registered modules when `names` is empty) and
    /// announce `application.ready`
    pub async fn start(&self, names: &[&str]) {
        self.registry.start(names).await;
        self.bus
            .publish(topic::APPLICATION_READY, serde_json::json!({}))
            .await;
        tracing::info!("Application ready");
    }

    /// The authorized bus shared by all components
    pub fn bus(&self) -> &AuthorizedBus {
        &self.bus
    }

    /// The module registry
    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// The error-rate supervisor
    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// The recovery manager
    pub fn recovery(&self) -> &Arc<RecoveryManager> {
        &self.recovery
    }

    /// The write-ahead log
    pub fn wal(&self) -> &Arc<WriteAheadLog> {
        &self.wal
    }
}
