//! Supervisor — error-rate accounting over a (kind, module) histogram
//!
//! The supervisor accumulates a monotonically growing histogram of error
//! occurrences keyed by error kind and originating module. Each bucket fires a
//! [`ThresholdBreach`] exactly once: on the error that first makes its count
//! reach the global threshold. Further errors keep counting but stay silent
//! until the bucket is explicitly reset.
//!
//! The threshold is a single process-wide scalar, settable at any time and
//! read at emission-check time rather than snapshotted per bucket.

use crate::error::{FaultError, Result};
use crate::types::{ModuleErrorReport, ThresholdBreach};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Supervisor tuning knobs
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Bucket count at which a breach fires
    pub error_threshold: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self { error_threshold: 5 }
    }
}

/// One histogram cell for a (kind, module) pair
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorBucket {
    /// Number of errors recorded, never decremented
    pub count: u64,

    /// Whether this bucket already fired a breach in the current cycle
    pub breached: bool,
}

/// Raw histogram shape handed to [`Supervisor::inspect`]
pub type ErrorHistogram = HashMap<String, HashMap<String, ErrorBucket>>;

/// Error-rate supervisor
///
/// The only mutation path into the histogram is [`record_error`]
/// (plus the explicit [`reset_bucket`] hook).
///
/// [`record_error`]: Supervisor::record_error
/// [`reset_bucket`]: Supervisor::reset_bucket
pub struct Supervisor {
    threshold: AtomicU64,

    /// error kind → module name → bucket
    histogram: RwLock<ErrorHistogram>,
}

impl Supervisor {
    /// Create a supervisor with the given configuration
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            threshold: AtomicU64::new(config.error_threshold),
            histogram: RwLock::new(HashMap::new()),
        }
    }

    /// Current global threshold
    pub fn threshold(&self) -> u64 {
        self.threshold.load(Ordering::SeqCst)
    }

    /// Replace the global threshold, effective for the next recorded error
    pub fn set_threshold(&self, threshold: u64) {
        self.threshold.store(threshold, Ordering::SeqCst);
        tracing::info!(threshold, "Supervisor threshold updated");
    }

    /// Record one error occurrence
    ///
    /// Increments the (kind, module) bucket and returns a breach when the
    /// running count first reaches the global threshold. Buckets that already
    /// breached stay silent on subsequent errors.
    pub fn record_error(&self, report: &ModuleErrorReport) -> Result<Option<ThresholdBreach>> {
        let threshold = self.threshold();

        let mut histogram = self.histogram.write().map_err(|e| {
            FaultError::LockPoisoned(format!("Supervisor histogram: {}", e))
        })?;

        let bucket = histogram
            .entry(report.kind.clone())
            .or_default()
            .entry(report.module.clone())
            .or_default();
        bucket.count += 1;

        tracing::debug!(
            module = %report.module,
            kind = %report.kind,
            count = bucket.count,
            error_id = %report.error_id,
            "Error recorded"
        );

        if !bucket.breached && threshold > 0 && bucket.count >= threshold {
            bucket.breached = true;
            tracing::warn!(
                module = %report.module,
                kind = %report.kind,
                count = bucket.count,
                threshold,
                "Error threshold exceeded"
            );
            return Ok(Some(ThresholdBreach {
                module: report.module.clone(),
                error_kind: report.kind.clone(),
                error_count: bucket.count,
            }));
        }

        Ok(None)
    }

    /// Hand the raw histogram to a read-only analysis closure
    pub fn inspect<R>(&self, analyze: impl FnOnce(&ErrorHistogram) -> R) -> Result<R> {
        let histogram = self.histogram.read().map_err(|e| {
            FaultError::LockPoisoned(format!("Supervisor histogram: {}", e))
        })?;
        Ok(analyze(&histogram))
    }

    /// Clear one bucket, allowing it to breach again
    ///
    /// Never invoked automatically; callers decide when a supervision cycle
    /// starts over (e.g. after a verified recovery).
    pub fn reset_bucket(&self, kind: &str, module: &str) -> Result<()> {
        let mut histogram = self.histogram.write().map_err(|e| {
            FaultError::LockPoisoned(format!("Supervisor histogram: {}", e))
        })?;

        if let Some(modules) = histogram.get_mut(kind) {
            if let Some(bucket) = modules.get_mut(module) {
                *bucket = ErrorBucket::default();
                tracing::info!(module, kind, "Error bucket reset");
            }
        }
        Ok(())
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(SupervisorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(module: &str, kind: &str) -> ModuleErrorReport {
        ModuleErrorReport::new(module, kind, "boom")
    }

    #[test]
    fn test_histogram_counts_every_error() {
        let sup = Supervisor::new(SupervisorConfig { error_threshold: 100 });
        for _ in 0..7 {
            sup.record_error(&report("posts", "service.error")).unwrap();
        }

        let count = sup
            .inspect(|h| h["service.error"]["posts"].count)
            .unwrap();
        assert_eq!(count, 7);
    }

    #[test]
    fn test_breach_fires_once_at_first_crossing() {
        let sup = Supervisor::new(SupervisorConfig { error_threshold: 3 });
        let r = report("posts", "service.error");

        assert!(sup.record_error(&r).unwrap().is_none());
        assert!(sup.record_error(&r).unwrap().is_none());

        let breach = sup.record_error(&r).unwrap().unwrap();
        assert_eq!(breach.module, "posts");
        assert_eq!(breach.error_kind, "service.error");
        assert_eq!(breach.error_count, 3);

        // Above threshold but already breached — stays silent
        assert!(sup.record_error(&r).unwrap().is_none());
        assert!(sup.record_error(&r).unwrap().is_none());
    }

    #[test]
    fn test_threshold_one_two_errors_single_breach() {
        let sup = Supervisor::new(SupervisorConfig { error_threshold: 1 });
        let r = report("postService", "service.error");

        let breach = sup.record_error(&r).unwrap().unwrap();
        assert_eq!(breach.error_count, 1);
        assert!(sup.record_error(&r).unwrap().is_none());
    }

    #[test]
    fn test_buckets_are_independent() {
        let sup = Supervisor::new(SupervisorConfig { error_threshold: 2 });

        sup.record_error(&report("posts", "service.error")).unwrap();
        sup.record_error(&report("users", "service.error")).unwrap();
        sup.record_error(&report("posts", "db.error")).unwrap();

        // No bucket has reached 2 yet
        let total_breached = sup
            .inspect(|h| {
                h.values()
                    .flat_map(|m| m.values())
                    .filter(|b| b.breached)
                    .count()
            })
            .unwrap();
        assert_eq!(total_breached, 0);

        let breach = sup
            .record_error(&report("posts", "service.error"))
            .unwrap()
            .unwrap();
        assert_eq!(breach.module, "posts");
        assert_eq!(breach.error_kind, "service.error");
    }

    #[test]
    fn test_threshold_read_at_check_time() {
        let sup = Supervisor::new(SupervisorConfig { error_threshold: 10 });
        let r = report("posts", "service.error");

        sup.record_error(&r).unwrap();
        sup.record_error(&r).unwrap();

        // Lowering the threshold makes the next error breach immediately
        sup.set_threshold(3);
        assert!(sup.record_error(&r).unwrap().is_some());
    }

    #[test]
    fn test_reset_allows_new_breach() {
        let sup = Supervisor::new(SupervisorConfig { error_threshold: 2 });
        let r = report("posts", "service.error");

        sup.record_error(&r).unwrap();
        assert!(sup.record_error(&r).unwrap().is_some());
        assert!(sup.record_error(&r).unwrap().is_none());

        sup.reset_bucket("service.error", "posts").unwrap();
        sup.record_error(&r).unwrap();
        let breach = sup.record_error(&r).unwrap().unwrap();
        assert_eq!(breach.error_count, 2);
    }

    #[test]
    fn test_zero_threshold_never_breaches() {
        let sup = Supervisor::new(SupervisorConfig { error_threshold: 0 });
        let r = report("posts", "service.error");
        for _ in 0..5 {
            assert!(sup.record_error(&r).unwrap().is_none());
        }
    }
}
