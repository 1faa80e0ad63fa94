//! Metrics facade for Vellum.
//!
//! Provides a [`MetricsRecorder`] trait with domain-specific methods and
//! default no-op implementations. A global singleton recorder is accessed via
//! [`recorder()`], and convenience free functions delegate to it.
//!
//! # Usage
//!
//! Callers record metrics via free functions:
//! ```ignore
//! vellum_metrics::record_store_read(latency_secs);
//! vellum_metrics::record_block_committed(height, latency_secs);
//! ```
//!
//! At startup a backend may be installed with [`install`]; until then every
//! call is a no-op.

#![warn(missing_docs)]

use std::sync::OnceLock;

/// Domain-specific metrics recording trait.
///
/// All methods have default no-op implementations so backends only need
/// to override the metrics they care about.
#[allow(unused_variables)]
pub trait MetricsRecorder: Send + Sync + 'static {
    // ── Stores ───────────────────────────────────────────────────────

    /// Record a store read latency.
    fn record_store_read(&self, latency_secs: f64) {}

    /// Record a store write latency.
    fn record_store_write(&self, latency_secs: f64) {}

    /// Record a named store operation latency.
    fn record_store_operation(&self, operation: &str, latency_secs: f64) {}

    // ── Commit pipeline ──────────────────────────────────────────────

    /// Record a block fully committed across all stores.
    fn record_block_committed(&self, height: u64, latency_secs: f64) {}

    /// Record the number of state-trie nodes persisted by a checkpoint.
    fn record_trie_nodes_persisted(&self, count: usize) {}
}

/// No-op recorder used until a backend is installed.
struct NoopRecorder;

impl MetricsRecorder for NoopRecorder {}

static RECORDER: OnceLock<Box<dyn MetricsRecorder>> = OnceLock::new();
static NOOP: NoopRecorder = NoopRecorder;

/// Install a metrics backend. Later installs are ignored.
pub fn install(recorder: Box<dyn MetricsRecorder>) {
    let _ = RECORDER.set(recorder);
}

/// Access the global recorder.
pub fn recorder() -> &'static dyn MetricsRecorder {
    RECORDER.get().map(|r| r.as_ref()).unwrap_or(&NOOP)
}

/// Record a store read latency.
pub fn record_store_read(latency_secs: f64) {
    recorder().record_store_read(latency_secs);
}

/// Record a store write latency.
pub fn record_store_write(latency_secs: f64) {
    recorder().record_store_write(latency_secs);
}

/// Record a named store operation latency.
pub fn record_store_operation(operation: &str, latency_secs: f64) {
    recorder().record_store_operation(operation, latency_secs);
}

/// Record a block fully committed across all stores.
pub fn record_block_committed(height: u64, latency_secs: f64) {
    recorder().record_block_committed(height, latency_secs);
}

/// Record the number of state-trie nodes persisted by a checkpoint.
pub fn record_trie_nodes_persisted(count: usize) {
    recorder().record_trie_nodes_persisted(count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingRecorder(Arc<AtomicUsize>);

    impl MetricsRecorder for CountingRecorder {
        fn record_store_write(&self, _latency_secs: f64) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_uninstalled_recorder_is_noop() {
        // Must not panic or block.
        record_store_read(0.001);
        record_block_committed(1, 0.01);
    }

    #[test]
    fn test_recorder_trait_dispatch() {
        let count = Arc::new(AtomicUsize::new(0));
        let recorder: Box<dyn MetricsRecorder> = Box::new(CountingRecorder(count.clone()));
        recorder.record_store_write(0.002);
        recorder.record_store_read(0.001); // default no-op
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
