//! Execution context handed to a connector for one job run.

use domain_jobs::progress::ProgressUpdate;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Per-run handle through which a connector reports progress and observes
/// cancellation.
///
/// Progress flows over a bounded channel into the worker's progress pump,
/// which throttles and persists ticks; a connector can therefore report
/// as often as it likes. The cancellation signal is a `watch` channel the
/// runtime flips when the job is cancelled; connectors are expected to
/// check it between network round-trips.
pub struct ExecutionContext {
    job_id: String,
    progress_tx: mpsc::Sender<ProgressUpdate>,
    cancel_rx: watch::Receiver<bool>,
}

impl ExecutionContext {
    pub fn new(
        job_id: impl Into<String>,
        progress_tx: mpsc::Sender<ProgressUpdate>,
        cancel_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            progress_tx,
            cancel_rx,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Report a progress tick. Never blocks the connector: if the pump is
    /// saturated the tick is dropped (the next one carries fresher state).
    pub fn report_progress(&self, update: ProgressUpdate) {
        if self.progress_tx.try_send(update).is_err() {
            debug!(job_id = %self.job_id, "Progress pump saturated, tick dropped");
        }
    }

    /// Convenience for a bare percentage tick.
    pub fn report_percent(&self, percent: u8) {
        self.report_progress(ProgressUpdate::percent(percent));
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// A receiver a connector can `select!` on while awaiting its backend.
    pub fn cancellation_signal(&self) -> watch::Receiver<bool> {
        self.cancel_rx.clone()
    }

    /// Resolve once cancellation is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        if *rx.borrow() {
            return;
        }
        // A closed channel means the runtime is gone; treat as cancelled.
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> (ExecutionContext, mpsc::Receiver<ProgressUpdate>, watch::Sender<bool>) {
        let (progress_tx, progress_rx) = mpsc::channel(4);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        (
            ExecutionContext::new("job-1", progress_tx, cancel_rx),
            progress_rx,
            cancel_tx,
        )
    }

    #[tokio::test]
    async fn test_progress_flows_through() {
        let (ctx, mut rx, _cancel) = context();
        ctx.report_percent(25);
        let update = rx.recv().await.unwrap();
        assert_eq!(update.percent, 25);
    }

    #[tokio::test]
    async fn test_saturated_pump_drops_ticks() {
        let (ctx, _rx, _cancel) = context();
        for percent in 0..20 {
            ctx.report_percent(percent);
        }
        // No panic, no block; only the channel capacity was retained.
    }

    #[tokio::test]
    async fn test_cancellation_signal() {
        let (ctx, _rx, cancel) = context();
        assert!(!ctx.is_cancelled());
        cancel.send(true).unwrap();
        assert!(ctx.is_cancelled());
        ctx.cancelled().await;
    }

    #[tokio::test]
    async fn test_cancelled_resolves_on_closed_channel() {
        let (ctx, _rx, cancel) = context();
        drop(cancel);
        // Runtime gone: must resolve rather than hang.
        ctx.cancelled().await;
    }
}
