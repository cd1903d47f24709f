//! Upstream account instance.
//!
//! One [`UpstreamInstance`] per account: bounded per-mode FIFO queues, a
//! worker pool of `core_size` tasks, the running-task index, the nonce and
//! message-id correlation indexes, and the pacing clock that spaces out
//! sends. Command producers are built by the orchestrator and executed here
//! after the pacing clock grants a slot.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use rand::Rng;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use atelier_core::account::Account;
use atelier_core::submit::{Message, SubmitResult};
use atelier_core::task::{AccountFilter, SpeedMode, Task, TaskStatus};
use atelier_core::types::{ChannelId, TaskId, Timestamp};
use atelier_core::CoreError;
use atelier_events::{TaskBus, TaskEvent, TaskEventKind};
use atelier_gateway::CommandSender;
use atelier_store::TaskRepository;

use crate::locks::LockRegistry;

/// Deferred upstream command; resolved by a worker to the acknowledgement.
pub type Producer = BoxFuture<'static, Result<Message, CoreError>>;

/// How long a worker waits for the task-level lock before giving up.
const TASK_LOCK_WAIT: Duration = Duration::from_secs(10);

/// Idle workers re-check the queues at this interval even without a wake-up.
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A send gap longer than this starts a new burst (the full `interval`
/// applies again instead of the shorter between-send pause).
const BURST_RESET: Duration = Duration::from_secs(60);

/// Queue drain order: a FAST task may overtake a RELAX task.
const MODE_PRIORITY: [SpeedMode; 3] = [SpeedMode::Fast, SpeedMode::Turbo, SpeedMode::Relax];

struct QueuedTask {
    task_id: TaskId,
    producer: Producer,
}

/// Pacing clock state; the mutex around it serializes the workers' turns.
#[derive(Default)]
pub struct PacingClock {
    last_send: Option<Instant>,
}

impl PacingClock {
    fn next_wait(&self, account: &Account) -> Duration {
        match self.last_send {
            Some(at) if at.elapsed() < BURST_RESET => {
                let min = account.after_interval_min_secs.max(0.0);
                let max = account.after_interval_max_secs.max(min);
                if max <= 0.0 {
                    Duration::ZERO
                } else {
                    Duration::from_secs_f64(rand::rng().random_range(min..=max))
                }
            }
            _ => Duration::from_secs_f64(account.interval_secs.max(0.0)),
        }
    }
}

/// One account's live execution state.
pub struct UpstreamInstance {
    channel_id: ChannelId,
    account: RwLock<Account>,
    sender: Arc<dyn CommandSender>,
    store: Arc<dyn TaskRepository>,
    bus: Arc<TaskBus>,
    locks: Arc<LockRegistry>,
    queues: Mutex<HashMap<SpeedMode, VecDeque<QueuedTask>>>,
    running: RwLock<HashMap<TaskId, ()>>,
    by_nonce: RwLock<HashMap<String, TaskId>>,
    by_message_id: RwLock<HashMap<String, TaskId>>,
    pacing: Mutex<PacingClock>,
    connected: AtomicBool,
    cancel: CancellationToken,
    workers: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl UpstreamInstance {
    /// Create the instance and spawn its worker pool.
    pub fn spawn(
        account: Account,
        sender: Arc<dyn CommandSender>,
        store: Arc<dyn TaskRepository>,
        bus: Arc<TaskBus>,
        locks: Arc<LockRegistry>,
    ) -> Arc<Self> {
        let core_size = account.core_size.max(1);
        let instance = Arc::new(Self {
            channel_id: account.channel_id.clone(),
            account: RwLock::new(account),
            sender,
            store,
            bus,
            locks,
            queues: Mutex::new(HashMap::new()),
            running: RwLock::new(HashMap::new()),
            by_nonce: RwLock::new(HashMap::new()),
            by_message_id: RwLock::new(HashMap::new()),
            pacing: Mutex::new(PacingClock::default()),
            connected: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            workers: std::sync::Mutex::new(Vec::new()),
        });

        let mut handles = Vec::with_capacity(core_size);
        for worker in 0..core_size {
            let instance = Arc::clone(&instance);
            handles.push(tokio::spawn(async move {
                instance.worker_loop(worker).await;
            }));
        }
        *instance.workers.lock().unwrap_or_else(|e| e.into_inner()) = handles;
        instance
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn sender(&self) -> Arc<dyn CommandSender> {
        Arc::clone(&self.sender)
    }

    /// Snapshot of the account parameters.
    pub async fn account(&self) -> Account {
        self.account.read().await.clone()
    }

    /// Replace the account snapshot (out-of-band mutation observed).
    pub async fn update_account(&self, account: Account) {
        *self.account.write().await = account;
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Alive = transport connected, account enabled, inside work hours.
    pub async fn is_alive(&self, now: Timestamp) -> bool {
        self.is_connected() && self.account.read().await.is_on_duty(now)
    }

    /// Alive and not fully saturated across its allowed modes.
    ///
    /// A per-mode queue can still be full while this is true; that case is
    /// reported as `FAILURE("queue full")` by [`submit_task`](Self::submit_task).
    pub async fn is_accept_new_task(&self, now: Timestamp) -> bool {
        if !self.is_alive(now).await {
            return false;
        }
        let account = self.account.read().await;
        let capacity: usize = account
            .allowed_modes
            .iter()
            .map(|mode| account.queue_sizes.for_mode(*mode))
            .sum();
        self.running_count().await + self.queued_count().await < account.core_size + capacity
    }

    pub async fn queued_count(&self) -> usize {
        self.queues.lock().await.values().map(VecDeque::len).sum()
    }

    pub async fn queue_len(&self, mode: SpeedMode) -> usize {
        self.queues
            .lock()
            .await
            .get(&mode)
            .map_or(0, VecDeque::len)
    }

    pub async fn running_count(&self) -> usize {
        self.running.read().await.len()
    }

    /// Load snapshot for the selector.
    pub async fn load(&self) -> atelier_core::selection::CandidateLoad {
        let account = self.account.read().await;
        atelier_core::selection::CandidateLoad {
            queued: self.queued_count().await,
            running: self.running_count().await,
            core_size: account.core_size,
            weight: account.weight,
            sort: account.sort,
        }
    }

    // -- correlation indexes --

    pub async fn find_by_nonce(&self, nonce: &str) -> Option<TaskId> {
        self.by_nonce.read().await.get(nonce).cloned()
    }

    pub async fn find_by_message_id(&self, message_id: &str) -> Option<TaskId> {
        self.by_message_id.read().await.get(message_id).cloned()
    }

    /// Bind an upstream message id to a task (first correlation).
    pub async fn bind_message_id(&self, message_id: &str, task_id: &str) {
        self.by_message_id
            .write()
            .await
            .insert(message_id.to_string(), task_id.to_string());
    }

    /// Register a nonce for correlation outside the queued path (seed flow).
    pub async fn bind_nonce(&self, nonce: &str, task_id: &str) {
        self.by_nonce
            .write()
            .await
            .insert(nonce.to_string(), task_id.to_string());
    }

    pub async fn running_task_ids(&self) -> Vec<TaskId> {
        self.running.read().await.keys().cloned().collect()
    }

    // -- submission --

    /// Accept a task into the per-mode queue.
    ///
    /// Preconditions, in order: the instance accepts new work; a speed mode
    /// acceptable to both the account and the caller's filter exists; the
    /// queue for that mode has room. Failing any leaves the task untouched.
    pub async fn submit_task(&self, mut task: Task, producer: Producer) -> SubmitResult {
        let now = Utc::now();
        if !self.is_accept_new_task(now).await {
            return SubmitResult::of(
                atelier_core::SubmitCode::NotFound,
                "Instance is not accepting new tasks",
            );
        }

        let account = self.account().await;
        let mode = match resolve_mode(&account, task.mode, &task.account_filter) {
            Ok(mode) => mode,
            Err(err) => return SubmitResult::from(&err),
        };
        task.mode = Some(mode);

        let mut queues = self.queues.lock().await;
        let queue = queues.entry(mode).or_default();
        if queue.len() >= account.queue_sizes.for_mode(mode) {
            return SubmitResult::of(atelier_core::SubmitCode::Failure, "queue full");
        }

        let ahead = queue.len() + self.running_count().await;
        task.instance_id = Some(self.channel_id.clone());
        if let Err(err) = task.transition(TaskStatus::Submitted) {
            return SubmitResult::from(&err);
        }
        task.submit_time = Some(now);
        if let Err(err) = self.store.save(&task).await {
            return SubmitResult::from(&CoreError::from(err));
        }
        if let Some(nonce) = task.runtime.nonce.clone() {
            self.by_nonce.write().await.insert(nonce, task.id.clone());
        }

        let task_id = task.id.clone();
        queue.push_back(QueuedTask {
            task_id: task_id.clone(),
            producer,
        });
        drop(queues);

        tracing::info!(
            task_id = %task_id,
            channel_id = %self.channel_id,
            mode = ?mode,
            ahead,
            "Task accepted",
        );
        if ahead < account.core_size {
            SubmitResult::success(task_id)
        } else {
            SubmitResult::in_queue(task_id, ahead)
        }
    }

    /// Wait for this instance's pacing slot.
    ///
    /// The clock mutex is held through the wait, so concurrent workers take
    /// their turns: each send is spaced from the previous one by the
    /// account's backoff bounds.
    pub async fn pace(&self, account: &Account) {
        let mut clock = self.pacing.lock().await;
        let wait = clock.next_wait(account);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        clock.last_send = Some(Instant::now());
    }

    // -- worker pool --

    async fn worker_loop(self: Arc<Self>, worker: usize) {
        tracing::debug!(channel_id = %self.channel_id, worker, "Worker started");
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.pop_next().await {
                Some(item) => self.process(item).await,
                None => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(WORKER_POLL_INTERVAL) => {}
                    }
                }
            }
        }
        tracing::debug!(channel_id = %self.channel_id, worker, "Worker exited");
    }

    async fn pop_next(&self) -> Option<QueuedTask> {
        let mut queues = self.queues.lock().await;
        for mode in MODE_PRIORITY {
            if let Some(queue) = queues.get_mut(&mode) {
                if let Some(item) = queue.pop_front() {
                    return Some(item);
                }
            }
        }
        None
    }

    async fn process(&self, item: QueuedTask) {
        let task_id = item.task_id;
        let account = self.account().await;
        // Subscribe before the send so a fast terminal event cannot be lost.
        let events = self.bus.subscribe();

        {
            let guard = self
                .locks
                .acquire(&task_lock_key(&task_id), TASK_LOCK_WAIT)
                .await;
            let _guard = match guard {
                Ok(guard) => guard,
                Err(e) => {
                    tracing::error!(task_id = %task_id, error = %e, "Task lock unavailable");
                    return;
                }
            };
            let task = match self.store.get(&task_id).await {
                Ok(Some(task)) => task,
                Ok(None) => {
                    tracing::warn!(task_id = %task_id, "Queued task vanished from the store");
                    return;
                }
                Err(e) => {
                    tracing::error!(task_id = %task_id, error = %e, "Store read failed");
                    return;
                }
            };
            if task.is_terminal() {
                // Cancelled while waiting in the queue.
                self.forget(&task_id).await;
                return;
            }
            let mut task = task;
            if let Err(e) = task.start(Utc::now()) {
                tracing::error!(task_id = %task_id, error = %e, "Cannot start task");
                return;
            }
            if let Err(e) = self.store.save(&task).await {
                tracing::error!(task_id = %task_id, error = %e, "Store write failed");
                return;
            }
            self.running.write().await.insert(task_id.clone(), ());
            self.bus.publish(TaskEvent::updated(task_id.clone()));
        }

        self.pace(&account).await;
        let ack = item.producer.await;

        let outcome = match ack {
            Ok(message) if message.is_success() || message.is_delayed() => {
                let deadline = Duration::from_secs(account.timeout_minutes.max(1) * 60);
                self.await_terminal(&task_id, events, deadline).await
            }
            Ok(message) => Err(CoreError::UpstreamRejected(message.description)),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(status) => {
                tracing::info!(task_id = %task_id, status = ?status, "Task finished");
            }
            Err(e) => {
                let reason = fail_reason(&e);
                tracing::warn!(task_id = %task_id, reason = %reason, "Task failed");
                self.fail_task(&task_id, reason).await;
            }
        }
        self.forget(&task_id).await;
    }

    /// Wait for the correlator to publish a terminal event for the task.
    async fn await_terminal(
        &self,
        task_id: &str,
        mut events: broadcast::Receiver<TaskEvent>,
        timeout: Duration,
    ) -> Result<TaskStatus, CoreError> {
        let deadline = Instant::now() + timeout;
        if let Some(status) = self.terminal_status(task_id).await {
            return Ok(status);
        }
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CoreError::Timeout("task timeout".to_string()));
            }
            match tokio::time::timeout(remaining, events.recv()).await {
                Err(_) => return Err(CoreError::Timeout("task timeout".to_string())),
                Ok(Ok(event)) if event.task_id == task_id => {
                    if let TaskEventKind::Finished { status } = event.kind {
                        return Ok(status);
                    }
                }
                Ok(Ok(_)) => {}
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => {
                    // Dropped events; fall back to the store.
                    if let Some(status) = self.terminal_status(task_id).await {
                        return Ok(status);
                    }
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(CoreError::Internal("event bus closed".to_string()));
                }
            }
        }
    }

    async fn terminal_status(&self, task_id: &str) -> Option<TaskStatus> {
        match self.store.get(task_id).await {
            Ok(Some(task)) if task.is_terminal() => Some(task.status),
            _ => None,
        }
    }

    async fn fail_task(&self, task_id: &str, reason: String) {
        let guard = self
            .locks
            .acquire(&task_lock_key(task_id), TASK_LOCK_WAIT)
            .await;
        let _guard = match guard {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Task lock unavailable");
                return;
            }
        };
        let mut task = match self.store.get(task_id).await {
            Ok(Some(task)) if !task.is_terminal() => task,
            _ => return,
        };
        if task.fail(Utc::now(), reason).is_ok() {
            if let Err(e) = self.store.save(&task).await {
                tracing::error!(task_id = %task_id, error = %e, "Store write failed");
            }
            self.bus
                .publish(TaskEvent::finished(task_id.to_string(), task.status));
        }
    }

    /// Drop a task from the running set and both correlation indexes.
    async fn forget(&self, task_id: &str) {
        self.running.write().await.remove(task_id);
        self.by_nonce
            .write()
            .await
            .retain(|_, id| id.as_str() != task_id);
        self.by_message_id
            .write()
            .await
            .retain(|_, id| id.as_str() != task_id);
    }

    /// Stop the worker pool, waiting up to 5 seconds per worker.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()),
        );
        for handle in handles {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
        tracing::info!(channel_id = %self.channel_id, "Instance shut down");
    }
}

fn task_lock_key(task_id: &str) -> String {
    format!("task:{task_id}")
}

/// Reduce an error to the reason recorded on the failed task.
fn fail_reason(err: &CoreError) -> String {
    match err {
        CoreError::Timeout(_) => "task timeout".to_string(),
        CoreError::UpstreamRejected(reason) => reason.clone(),
        other => other.to_string(),
    }
}

/// Pick the speed mode a submission will run under.
///
/// Preference order: the task's requested mode, the filter's preference,
/// the account's currently selected mode, then Fast/Relax/Turbo. The first
/// candidate allowed by both the account and the caller's filter wins.
pub fn resolve_mode(
    account: &Account,
    requested: Option<SpeedMode>,
    filter: &AccountFilter,
) -> Result<SpeedMode, CoreError> {
    let preferred = [requested, filter.speed_preference, account.current_mode]
        .into_iter()
        .flatten();
    let fallback = [SpeedMode::Fast, SpeedMode::Relax, SpeedMode::Turbo];
    preferred
        .chain(fallback)
        .find(|mode| account.allows_mode(*mode) && filter.accepts_mode(*mode))
        .ok_or_else(|| {
            CoreError::Validation(
                "No speed mode is permitted by both the account and the filter".to_string(),
            )
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account::new("chan-1", "guild-1")
    }

    // -- resolve_mode --

    #[test]
    fn resolve_mode_honors_request() {
        let account = account();
        let filter = AccountFilter::default();
        assert_eq!(
            resolve_mode(&account, Some(SpeedMode::Relax), &filter).unwrap(),
            SpeedMode::Relax
        );
    }

    #[test]
    fn resolve_mode_falls_back_when_request_not_allowed() {
        let mut account = account();
        account.allowed_modes = vec![SpeedMode::Relax];
        let filter = AccountFilter::default();
        assert_eq!(
            resolve_mode(&account, Some(SpeedMode::Fast), &filter).unwrap(),
            SpeedMode::Relax
        );
    }

    #[test]
    fn resolve_mode_respects_filter() {
        let account = account();
        let filter = AccountFilter {
            modes: vec![SpeedMode::Relax],
            ..Default::default()
        };
        assert_eq!(
            resolve_mode(&account, Some(SpeedMode::Fast), &filter).unwrap(),
            SpeedMode::Relax
        );
    }

    #[test]
    fn resolve_mode_uses_account_current_mode() {
        let mut account = account();
        account.current_mode = Some(SpeedMode::Relax);
        let filter = AccountFilter::default();
        assert_eq!(
            resolve_mode(&account, None, &filter).unwrap(),
            SpeedMode::Relax
        );
    }

    #[test]
    fn resolve_mode_fails_without_overlap() {
        let mut account = account();
        account.allowed_modes = vec![SpeedMode::Fast];
        let filter = AccountFilter {
            modes: vec![SpeedMode::Turbo],
            ..Default::default()
        };
        let err = resolve_mode(&account, None, &filter).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    // -- pacing --

    #[test]
    fn first_send_uses_interval() {
        let clock = PacingClock::default();
        let mut account = account();
        account.interval_secs = 2.0;
        assert_eq!(clock.next_wait(&account), Duration::from_secs(2));
    }

    #[test]
    fn between_sends_uses_random_bounds() {
        let clock = PacingClock {
            last_send: Some(Instant::now()),
        };
        let mut account = account();
        account.after_interval_min_secs = 1.0;
        account.after_interval_max_secs = 2.0;
        for _ in 0..32 {
            let wait = clock.next_wait(&account);
            assert!(wait >= Duration::from_secs(1), "wait {wait:?} below min");
            assert!(wait <= Duration::from_secs(2), "wait {wait:?} above max");
        }
    }

    #[test]
    fn zero_bounds_mean_no_wait() {
        let clock = PacingClock {
            last_send: Some(Instant::now()),
        };
        let mut account = account();
        account.after_interval_min_secs = 0.0;
        account.after_interval_max_secs = 0.0;
        assert_eq!(clock.next_wait(&account), Duration::ZERO);
    }
}
