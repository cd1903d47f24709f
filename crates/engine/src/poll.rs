//! Poll loop for partner/official instances.
//!
//! Those backends push nothing; a per-instance loop polls every in-flight
//! task and feeds the payloads through the correlator's update path.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use atelier_core::task::TaskStatus;
use atelier_gateway::UpstreamPoller;
use atelier_store::{TaskQuery, TaskRepository};

use crate::correlator::Correlator;

/// Default polling interval.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Polls one partner/official instance's in-flight tasks.
pub struct PollLoop {
    channel_id: String,
    store: Arc<dyn TaskRepository>,
    poller: Arc<dyn UpstreamPoller>,
    correlator: Arc<Correlator>,
    interval: Duration,
}

impl PollLoop {
    pub fn new(
        channel_id: impl Into<String>,
        store: Arc<dyn TaskRepository>,
        poller: Arc<dyn UpstreamPoller>,
        correlator: Arc<Correlator>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            store,
            poller,
            correlator,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        tracing::info!(channel_id = %self.channel_id, "Poll loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(channel_id = %self.channel_id, "Poll loop shutting down");
                    break;
                }
                _ = ticker.tick() => self.poll_once().await,
            }
        }
    }

    /// One cycle: poll every submitted/in-progress task on this instance.
    pub async fn poll_once(&self) {
        let query = TaskQuery::by_statuses(vec![TaskStatus::Submitted, TaskStatus::InProgress])
            .on_instance(self.channel_id.clone());
        let in_flight = match self.store.list(&query).await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!(channel_id = %self.channel_id, error = %e, "Poll listing failed");
                return;
            }
        };

        for task in in_flight {
            match self.poller.poll(&task.id).await {
                Ok(update) => self.correlator.on_poll_update(update).await,
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "Poll failed");
                }
            }
        }
    }
}
