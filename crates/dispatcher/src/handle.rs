//! DispatcherHandle - owner side of a running dispatcher task

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use contracts::{PhysicalTopic, Position};

use crate::dispatcher::{DispatcherKind, DispatcherShared, DispatcherStats};
use crate::lock;
use crate::metrics::DispatcherMetrics;

/// Handle to a running dispatcher worker
pub struct DispatcherHandle {
    /// State shared with the worker
    shared: Arc<DispatcherShared>,
    /// Cancels the worker's fetch and any pending send
    cancel: CancellationToken,
    /// Worker task handle, taken on shutdown
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DispatcherHandle {
    pub(crate) fn new(
        shared: Arc<DispatcherShared>,
        cancel: CancellationToken,
        worker: JoinHandle<()>,
    ) -> Self {
        Self {
            shared,
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub(crate) fn shared(&self) -> &DispatcherShared {
        &self.shared
    }

    pub fn id(&self) -> u64 {
        self.shared.id()
    }

    pub fn topic(&self) -> &PhysicalTopic {
        self.shared.topic()
    }

    pub fn kind(&self) -> DispatcherKind {
        self.shared.kind()
    }

    /// End of the last batch offered to every attached target
    pub fn cursor(&self) -> Position {
        self.shared.cursor()
    }

    pub fn num_targets(&self) -> usize {
        self.shared.num_targets()
    }

    /// Whether the worker stopped (cancelled or transport failure)
    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    pub fn metrics(&self) -> &DispatcherMetrics {
        self.shared.metrics()
    }

    pub fn stats(&self) -> DispatcherStats {
        self.shared.stats()
    }

    /// Stop the worker, waiting at most `grace` before aborting it
    ///
    /// Safe to call more than once; later calls return immediately.
    #[instrument(
        name = "dispatcher_handle_shutdown",
        skip(self),
        fields(topic = %self.shared.topic(), id = self.shared.id())
    )]
    pub async fn shutdown(&self, grace: Duration) {
        self.cancel.cancel();

        let worker = lock(&self.worker).take();
        let Some(mut worker) = worker else {
            return;
        };

        match tokio::time::timeout(grace, &mut worker).await {
            Ok(Ok(())) => debug!("DispatcherHandle shutdown complete"),
            Ok(Err(e)) => error!(error = ?e, "Dispatcher task panicked"),
            Err(_) => {
                warn!(?grace, "Dispatcher did not stop within grace period, aborting");
                worker.abort();
                self.shared.mark_stopped();
            }
        }
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
