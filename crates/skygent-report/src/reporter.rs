//! The small progress-observer interface a sync or derive pipeline
//! reports through (spec.md §4.11 "Reporter").

const LOG_TARGET: &str = "skygent::report";

/// One progress tick, emitted at producer-controlled frequency (spec.md
/// §4.7 "every 100 posts or 5s", §4.8 per batch).
#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub processed: u64,
    pub stored: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub errors: u64,
    pub elapsed_ms: u64,
    pub rate: f64,
    pub total: Option<u64>,
    pub eta_ms: Option<u64>,
    pub store: String,
    pub source: String,
}

/// A sync/derive pipeline's observer. Emission cadence is
/// producer-controlled, not this trait's concern.
pub trait Reporter: Send + Sync {
    fn report(&self, progress: &Progress);
    fn warn(&self, message: &str, fields: &[(&str, &str)]);
}

/// Discards every event — useful in tests and as an explicit opt-out.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl Reporter for NoopReporter {
    fn report(&self, _progress: &Progress) {}
    fn warn(&self, _message: &str, _fields: &[(&str, &str)]) {}
}

/// Routes every event through `tracing`, the workspace's ambient logging
/// stack — the default outside of test doubles.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, progress: &Progress) {
        tracing::info!(
            target: LOG_TARGET,
            store = %progress.store,
            source = %progress.source,
            processed = progress.processed,
            stored = progress.stored,
            deleted = progress.deleted,
            skipped = progress.skipped,
            errors = progress.errors,
            rate = progress.rate,
            "sync progress"
        );
    }

    fn warn(&self, message: &str, fields: &[(&str, &str)]) {
        // Sensitive payloads must never reach `message` (spec.md §7) —
        // callers are responsible for passing already-redacted strings.
        let rendered: String = fields.iter().map(|(k, v)| format!(" {k}={v}")).collect();
        tracing::warn!(target: LOG_TARGET, "{message}{rendered}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_reporter_accepts_everything() {
        let reporter = NoopReporter;
        reporter.report(&Progress::default());
        reporter.warn("ignored", &[("k", "v")]);
    }
}
