use std::time::Duration;

/// Opaque metrics sink the coalescer reports through: a depth gauge, a
/// per-dispatch-size meter, and a dispatch-latency timer. Kept as a
/// narrow trait rather than a concrete metrics type, so a caller can wire
/// in whatever registry it already uses without this crate depending on
/// it directly.
pub trait MetricsSink: Send + Sync {
    /// PendingWork depth, sampled during phases 1–2 of the worker loop.
    fn set_pending_depth(&self, depth: u64);
    /// Queries included in one dispatch (phase 3).
    fn record_dispatch_size(&self, queries: u64);
    /// Wall time of one downstream dispatch call.
    fn record_dispatch_latency(&self, elapsed: Duration);
}

/// Default sink: discards everything. Used when the caller doesn't wire
/// up a real metrics backend.
#[derive(Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn set_pending_depth(&self, _depth: u64) {}
    fn record_dispatch_size(&self, _queries: u64) {}
    fn record_dispatch_latency(&self, _elapsed: Duration) {}
}
