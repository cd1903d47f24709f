//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`TaskBus`] is the hub between the correlator (publisher) and the
//! per-instance workers (subscribers waiting for their task to finish).
//! It is designed to be shared via `Arc<TaskBus>` across the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use atelier_core::task::TaskStatus;
use atelier_core::types::TaskId;

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// A task lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub kind: TaskEventKind,
    /// When the event was published (UTC).
    pub timestamp: DateTime<Utc>,
}

/// What happened to the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskEventKind {
    /// Progress or metadata changed (progress string, buttons, image URL).
    Updated,
    /// The modal confirm window opened for this task.
    ModalOpened,
    /// The task reached a terminal status.
    Finished { status: TaskStatus },
}

impl TaskEvent {
    pub fn updated(task_id: impl Into<TaskId>) -> Self {
        Self {
            task_id: task_id.into(),
            kind: TaskEventKind::Updated,
            timestamp: Utc::now(),
        }
    }

    pub fn modal_opened(task_id: impl Into<TaskId>) -> Self {
        Self {
            task_id: task_id.into(),
            kind: TaskEventKind::ModalOpened,
            timestamp: Utc::now(),
        }
    }

    pub fn finished(task_id: impl Into<TaskId>, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            kind: TaskEventKind::Finished { status },
            timestamp: Utc::now(),
        }
    }
}

/// In-process fan-out bus for [`TaskEvent`]s.
pub struct TaskBus {
    sender: broadcast::Sender<TaskEvent>,
}

impl TaskBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed events are dropped and
    /// slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// With zero subscribers the event is silently dropped; the store is the
    /// durable record, the bus is only a wake-up channel.
    pub fn publish(&self, event: TaskEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }
}

impl Default for TaskBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = TaskBus::default();
        let mut rx = bus.subscribe();

        bus.publish(TaskEvent::finished("42", TaskStatus::Success));

        let event = rx.recv().await.expect("should receive the event");
        assert_eq!(event.task_id, "42");
        assert_eq!(
            event.kind,
            TaskEventKind::Finished {
                status: TaskStatus::Success
            }
        );
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let bus = TaskBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(TaskEvent::updated("7"));

        assert_eq!(rx1.recv().await.unwrap().task_id, "7");
        assert_eq!(rx2.recv().await.unwrap().task_id, "7");
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = TaskBus::default();
        bus.publish(TaskEvent::modal_opened("orphan"));
    }
}
