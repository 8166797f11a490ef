//! Recovery manager — ordered remediation strategies per module
//!
//! Each module may register an ordered list of named, zero-argument recovery
//! strategies. On a threshold breach the manager runs the strategy at the
//! current offset, then advances the offset, clamped at the last index: once
//! the list is exhausted, repeated breaches keep re-running the final
//! strategy. Strategies run inside a fault barrier with a bounded timeout;
//! failures and timeouts are logged and recorded, never re-thrown.
//!
//! Registrations accumulate: registering twice for the same module appends
//! strategies, it does not replace them.

use crate::authz::AuthorizedBus;
use crate::bus::EventHandler;
use crate::error::{FaultError, Result};
use crate::types::{
    now_millis, topic, AttemptStatus, Envelope, RecoveryOutcome, ThresholdBreach,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Executable body of a recovery strategy
pub type StrategyFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Recovery manager tuning knobs
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Time budget for one strategy run; exceeding it records a failed attempt
    pub strategy_timeout: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            strategy_timeout: Duration::from_secs(30),
        }
    }
}

/// A named remediation procedure with attempt statistics
pub struct RecoveryStrategy {
    /// Strategy name, recorded as `lastAttemptedStrategy` when run
    pub name: String,

    body: Option<StrategyFn>,
    attempt_count: u64,
    last_attempt: Option<u64>,
}

impl RecoveryStrategy {
    /// Build a strategy from a name and an async closure
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            body: Some(Arc::new(move || Box::pin(body()))),
            attempt_count: 0,
            last_attempt: None,
        }
    }

    /// Build a strategy that succeeds without doing anything
    pub fn noop(name: impl Into<String>) -> Self {
        Self::new(name, || async { Ok::<(), FaultError>(()) })
    }

    /// Build a strategy from possibly-missing parts (e.g. config-driven
    /// registration where the body could not be resolved)
    ///
    /// A missing body is rejected at registration time and substituted with a
    /// no-op; it never surfaces as an invocation-time failure.
    pub fn from_parts(name: impl Into<String>, body: Option<StrategyFn>) -> Self {
        Self {
            name: name.into(),
            body,
            attempt_count: 0,
            last_attempt: None,
        }
    }
}

/// Read-only view of one registered strategy
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategySnapshot {
    /// Strategy name
    pub name: String,

    /// Times this strategy has run, regardless of outcome
    pub attempt_count: u64,

    /// Unix millisecond timestamp of the most recent run
    pub last_attempt: Option<u64>,
}

/// Read-only view of a module's registration
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationSnapshot {
    /// Strategies in registration order
    pub strategies: Vec<StrategySnapshot>,

    /// Index of the next strategy to attempt
    pub attempt_offset: usize,
}

struct Registration {
    strategies: Vec<RecoveryStrategy>,
    offset: usize,
    in_flight: bool,
}

#[derive(Default)]
struct Inner {
    registrations: HashMap<String, Registration>,
    last_attempted_strategy: Option<String>,
    last_attempted_status: Option<AttemptStatus>,
}

/// Executes recovery strategies in response to threshold breaches
pub struct RecoveryManager {
    config: RecoveryConfig,
    bus: AuthorizedBus,
    inner: Mutex<Inner>,
}

impl RecoveryManager {
    /// Create a manager publishing its outcomes on the given bus
    pub fn new(bus: AuthorizedBus, config: RecoveryConfig) -> Self {
        Self {
            config,
            bus,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Append strategies to a module's list
    ///
    /// Additive across calls. A strategy without a callable body is logged as
    /// a bad request and substituted with a no-op. Publishes an informational
    /// `recovery.strategy_registered` event naming the module.
    pub async fn register_strategies(
        &self,
        module: impl Into<String>,
        strategies: Vec<RecoveryStrategy>,
    ) -> Result<()> {
        let module = module.into();
        let names: Vec<String> = strategies.iter().map(|s| s.name.clone()).collect();

        {
            let mut inner = self.lock_inner()?;
            let registration = inner
                .registrations
                .entry(module.clone())
                .or_insert_with(|| Registration {
                    strategies: Vec::new(),
                    offset: 0,
                    in_flight: false,
                });

            for mut strategy in strategies {
                if strategy.body.is_none() {
                    tracing::warn!(
                        module = %module,
                        strategy = %strategy.name,
                        "Bad request: strategy body is not callable; substituting no-op"
                    );
                    strategy.body = RecoveryStrategy::noop(strategy.name.clone()).body;
                }
                registration.strategies.push(strategy);
            }
        }

        tracing::info!(module = %module, strategies = ?names, "Recovery strategies registered");
        self.bus
            .publish(
                topic::STRATEGY_REGISTERED,
                serde_json::json!({ "module": module, "strategies": names }),
            )
            .await;
        Ok(())
    }

    /// React to a threshold breach for a module
    ///
    /// Selects the strategy at the current offset, advances the offset
    /// (clamped at the last index), and runs the body under the configured
    /// timeout. Errors and timeouts are contained here; the outcome is
    /// recorded and published as `recovery.attempt_completed`. Without any
    /// registered strategies this logs a diagnostic and does nothing. A breach
    /// arriving while an attempt for the same module is in flight is skipped.
    pub async fn on_threshold_exceeded(&self, breach: &ThresholdBreach) -> Result<()> {
        let (name, body) = {
            let mut inner = self.lock_inner()?;
            let registration = match inner.registrations.get_mut(&breach.module) {
                Some(r) => r,
                None => {
                    tracing::warn!(
                        module = %breach.module,
                        error_kind = %breach.error_kind,
                        "No recovery strategy registered for module"
                    );
                    return Ok(());
                }
            };

            if registration.strategies.is_empty() {
                tracing::warn!(
                    module = %breach.module,
                    error_kind = %breach.error_kind,
                    "No recovery strategy registered for module"
                );
                return Ok(());
            }

            if registration.in_flight {
                tracing::warn!(
                    module = %breach.module,
                    "Recovery attempt already in flight; skipping breach"
                );
                return Ok(());
            }

            let index = registration.offset;
            let last = registration.strategies.len() - 1;
            registration.offset = (index + 1).min(last);
            registration.in_flight = true;

            let strategy = &mut registration.strategies[index];
            strategy.attempt_count += 1;
            strategy.last_attempt = Some(now_millis());

            let name = strategy.name.clone();
            let body = strategy.body.clone();
            inner.last_attempted_strategy = Some(name.clone());
            (name, body)
        };

        tracing::info!(
            module = %breach.module,
            strategy = %name,
            error_kind = %breach.error_kind,
            error_count = breach.error_count,
            "Running recovery strategy"
        );

        let outcome = self.run_with_timeout(&breach.module, &name, body).await;

        let status = match outcome {
            Ok(()) => AttemptStatus::Ok,
            Err(ref e) => {
                tracing::warn!(
                    module = %breach.module,
                    strategy = %name,
                    error = %e,
                    "Recovery strategy error"
                );
                AttemptStatus::Error
            }
        };

        {
            let mut inner = self.lock_inner()?;
            inner.last_attempted_status = Some(status);
            if let Some(registration) = inner.registrations.get_mut(&breach.module) {
                registration.in_flight = false;
            }
        }

        self.bus
            .publish_typed(
                topic::RECOVERY_COMPLETED,
                &RecoveryOutcome {
                    module: breach.module.clone(),
                    strategy: name,
                    status,
                },
            )
            .await?;
        Ok(())
    }

    /// Read-only snapshot of every module's registration
    pub fn all_strategies(&self) -> Result<HashMap<String, RegistrationSnapshot>> {
        let inner = self.lock_inner()?;
        Ok(inner
            .registrations
            .iter()
            .map(|(module, registration)| {
                (
                    module.clone(),
                    RegistrationSnapshot {
                        strategies: registration
                            .strategies
                            .iter()
                            .map(|s| StrategySnapshot {
                                name: s.name.clone(),
                                attempt_count: s.attempt_count,
                                last_attempt: s.last_attempt,
                            })
                            .collect(),
                        attempt_offset: registration.offset,
                    },
                )
            })
            .collect())
    }

    /// Name of the most recently attempted strategy, process-wide
    pub fn last_attempted_strategy(&self) -> Result<Option<String>> {
        Ok(self.lock_inner()?.last_attempted_strategy.clone())
    }

    /// Outcome of the most recent attempt, process-wide
    pub fn last_attempted_status(&self) -> Result<Option<AttemptStatus>> {
        Ok(self.lock_inner()?.last_attempted_status)
    }

    async fn run_with_timeout(
        &self,
        module: &str,
        strategy: &str,
        body: Option<StrategyFn>,
    ) -> Result<()> {
        let body = match body {
            Some(body) => body,
            // Registration substitutes no-ops, so this only guards internal misuse.
            None => return Ok(()),
        };

        let timeout = self.config.strategy_timeout;
        match tokio::time::timeout(timeout, body()).await {
            Ok(result) => result.map_err(|e| FaultError::Strategy {
                module: module.to_string(),
                strategy: strategy.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(FaultError::StrategyTimeout {
                module: module.to_string(),
                strategy: strategy.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    fn lock_inner(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| FaultError::LockPoisoned(format!("Recovery registrations: {}", e)))
    }
}

#[async_trait]
impl EventHandler for RecoveryManager {
    async fn on_event(&self, event: &Envelope) -> Result<()> {
        let breach: ThresholdBreach = event.payload_as()?;
        self.on_threshold_exceeded(&breach).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::PermissionTable;
    use crate::bus::EventBus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_manager(config: RecoveryConfig) -> RecoveryManager {
        let bus = AuthorizedBus::new(EventBus::new(), PermissionTable::new());
        RecoveryManager::new(bus, config)
    }

    fn breach(module: &str) -> ThresholdBreach {
        ThresholdBreach {
            module: module.to_string(),
            error_kind: "service.error".to_string(),
            error_count: 1,
        }
    }

    fn counting_strategy(name: &str, runs: Arc<AtomicUsize>) -> RecoveryStrategy {
        RecoveryStrategy::new(name, move || {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<(), FaultError>(())
            }
        })
    }

    #[tokio::test]
    async fn test_no_strategy_registered_is_silent() {
        let manager = test_manager(RecoveryConfig::default());
        manager.on_threshold_exceeded(&breach("ghost")).await.unwrap();
        assert!(manager.last_attempted_strategy().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_registration_is_additive() {
        let manager = test_manager(RecoveryConfig::default());
        manager
            .register_strategies("posts", vec![RecoveryStrategy::noop("a")])
            .await
            .unwrap();
        manager
            .register_strategies("posts", vec![RecoveryStrategy::noop("b"), RecoveryStrategy::noop("c")])
            .await
            .unwrap();

        let all = manager.all_strategies().unwrap();
        let names: Vec<&str> = all["posts"].strategies.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_offset_advances_and_clamps_at_last_index() {
        let manager = test_manager(RecoveryConfig::default());
        let a_runs = Arc::new(AtomicUsize::new(0));
        let b_runs = Arc::new(AtomicUsize::new(0));

        manager
            .register_strategies(
                "posts",
                vec![
                    counting_strategy("restart", a_runs.clone()),
                    counting_strategy("reload-config", b_runs.clone()),
                ],
            )
            .await
            .unwrap();

        manager.on_threshold_exceeded(&breach("posts")).await.unwrap();
        manager.on_threshold_exceeded(&breach("posts")).await.unwrap();
        manager.on_threshold_exceeded(&breach("posts")).await.unwrap();

        assert_eq!(a_runs.load(Ordering::SeqCst), 1);
        assert_eq!(b_runs.load(Ordering::SeqCst), 2, "final strategy re-runs once exhausted");

        let all = manager.all_strategies().unwrap();
        assert_eq!(all["posts"].attempt_offset, 1);
        assert_eq!(all["posts"].strategies[0].attempt_count, 1);
        assert_eq!(all["posts"].strategies[1].attempt_count, 2);
        assert_eq!(
            manager.last_attempted_strategy().unwrap().as_deref(),
            Some("reload-config")
        );
    }

    #[tokio::test]
    async fn test_breach_during_in_flight_attempt_is_skipped() {
        use tokio::sync::Notify;

        let manager = Arc::new(test_manager(RecoveryConfig::default()));
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let second_runs = Arc::new(AtomicUsize::new(0));

        let entered_tx = entered.clone();
        let release_rx = release.clone();
        manager
            .register_strategies(
                "posts",
                vec![
                    RecoveryStrategy::new("slow-restart", move || {
                        let entered = entered_tx.clone();
                        let release = release_rx.clone();
                        async move {
                            entered.notify_one();
                            release.notified().await;
                            Ok::<(), FaultError>(())
                        }
                    }),
                    counting_strategy("reload-config", second_runs.clone()),
                ],
            )
            .await
            .unwrap();

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.on_threshold_exceeded(&breach("posts")).await })
        };
        entered.notified().await;

        // Second breach while the first attempt is still running: nothing runs
        manager.on_threshold_exceeded(&breach("posts")).await.unwrap();
        assert_eq!(second_runs.load(Ordering::SeqCst), 0);

        release.notify_one();
        first.await.unwrap().unwrap();

        let all = manager.all_strategies().unwrap();
        assert_eq!(all["posts"].strategies[0].attempt_count, 1);
        assert_eq!(all["posts"].strategies[1].attempt_count, 0);
        assert_eq!(
            manager.last_attempted_strategy().unwrap().as_deref(),
            Some("slow-restart")
        );
        assert_eq!(
            manager.last_attempted_status().unwrap(),
            Some(AttemptStatus::Ok)
        );
    }

    #[tokio::test]
    async fn test_strategy_error_is_contained_and_recorded() {
        let manager = test_manager(RecoveryConfig::default());
        manager
            .register_strategies(
                "posts",
                vec![RecoveryStrategy::new("explode", || async {
                    let failed: Result<()> = Err(FaultError::Config("still broken".to_string()));
                    failed
                })],
            )
            .await
            .unwrap();

        manager.on_threshold_exceeded(&breach("posts")).await.unwrap();

        assert_eq!(
            manager.last_attempted_status().unwrap(),
            Some(AttemptStatus::Error)
        );
        assert_eq!(manager.all_strategies().unwrap()["posts"].strategies[0].attempt_count, 1);
    }

    #[tokio::test]
    async fn test_strategy_timeout_records_failure() {
        let manager = test_manager(RecoveryConfig {
            strategy_timeout: Duration::from_millis(50),
        });
        manager
            .register_strategies(
                "posts",
                vec![RecoveryStrategy::new("hang", || async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok::<(), FaultError>(())
                })],
            )
            .await
            .unwrap();

        manager.on_threshold_exceeded(&breach("posts")).await.unwrap();
        assert_eq!(
            manager.last_attempted_status().unwrap(),
            Some(AttemptStatus::Error)
        );
    }

    #[tokio::test]
    async fn test_non_callable_body_substituted_at_registration() {
        let manager = test_manager(RecoveryConfig::default());
        manager
            .register_strategies("posts", vec![RecoveryStrategy::from_parts("mystery", None)])
            .await
            .unwrap();

        // Runs as a no-op instead of failing at invocation time
        manager.on_threshold_exceeded(&breach("posts")).await.unwrap();
        assert_eq!(
            manager.last_attempted_status().unwrap(),
            Some(AttemptStatus::Ok)
        );
        assert_eq!(
            manager.last_attempted_strategy().unwrap().as_deref(),
            Some("mystery")
        );
    }

    #[tokio::test]
    async fn test_successful_attempt_status_ok() {
        let manager = test_manager(RecoveryConfig::default());
        let runs = Arc::new(AtomicUsize::new(0));
        manager
            .register_strategies("posts", vec![counting_strategy("restart", runs.clone())])
            .await
            .unwrap();

        manager.on_threshold_exceeded(&breach("posts")).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(
            manager.last_attempted_status().unwrap(),
            Some(AttemptStatus::Ok)
        );
    }
}
