use tracing::{debug, info};

/// Receives progress of the top-level actions of a run.
pub trait ProgressSink: Send + Sync {
    /// Fraction of the root's children dispatched so far, in `(0, 1]`.
    fn progress(&self, fraction: f32);

    /// Signals that a run started (`true`) or ended (`false`), successfully or not.
    fn busy(&self, active: bool);
}

/// Reports progress through tracing.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn progress(&self, fraction: f32) {
        debug!(target: "macrotree::progress", percent = (fraction * 100.0).round() as u32, "progress");
    }

    fn busy(&self, active: bool) {
        if active {
            info!(target: "macrotree::progress", "macro running");
        } else {
            info!(target: "macrotree::progress", "macro idle");
        }
    }
}
