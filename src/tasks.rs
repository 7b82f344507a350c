//! Background Task Queue
//!
//! Follow-up work (provider dispatch, compensation, notifications, bulk
//! runs) is queued as a [`Task`] instead of being spawned detached. Delivery
//! is at-least-once: a failed handler is redelivered after a delay until the
//! attempt budget runs out, so every handler must be idempotent on its key.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::core_types::{BulkId, TransactionCode};
use crate::error::LedgerError;

// ============================================================================
// Task Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Attempt the next provider of a pending bank transfer
    DispatchTransfer { code: TransactionCode },
    /// Restitution for a failed bank transfer
    Compensate { code: TransactionCode },
    /// Tell the callback collaborator about a settled transaction
    NotifyTransaction { code: TransactionCode },
    ExecuteBulkTransfer { id: BulkId },
    ExecuteBulkInquiry { id: BulkId },
    NotifyBulkTransfer { id: BulkId },
    NotifyBulkInquiry { id: BulkId },
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::DispatchTransfer { .. } => "dispatch_transfer",
            Task::Compensate { .. } => "compensate",
            Task::NotifyTransaction { .. } => "notify_transaction",
            Task::ExecuteBulkTransfer { .. } => "execute_bulk_transfer",
            Task::ExecuteBulkInquiry { .. } => "execute_bulk_inquiry",
            Task::NotifyBulkTransfer { .. } => "notify_bulk_transfer",
            Task::NotifyBulkInquiry { .. } => "notify_bulk_inquiry",
        }
    }

    /// Idempotency key
    pub fn key(&self) -> &str {
        match self {
            Task::DispatchTransfer { code }
            | Task::Compensate { code }
            | Task::NotifyTransaction { code } => code.as_str(),
            Task::ExecuteBulkTransfer { id }
            | Task::ExecuteBulkInquiry { id }
            | Task::NotifyBulkTransfer { id }
            | Task::NotifyBulkInquiry { id } => id.as_str(),
        }
    }
}

/// A task plus its delivery count (1 on first delivery)
#[derive(Debug, Clone)]
pub struct TaskEnvelope {
    pub task: Task,
    pub attempt: u32,
}

#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    pub max_attempts: u32,
    pub redelivery_delay: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            redelivery_delay: Duration::from_secs(2),
        }
    }
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, envelope: &TaskEnvelope) -> Result<(), LedgerError>;
}

// ============================================================================
// Queue
// ============================================================================

/// Producer side, cheap to clone
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<TaskEnvelope>,
    /// Queued, running or awaiting redelivery
    outstanding: Arc<AtomicUsize>,
}

pub struct TaskReceiver {
    rx: mpsc::UnboundedReceiver<TaskEnvelope>,
}

impl TaskReceiver {
    /// Next queued envelope without waiting
    pub fn try_next(&mut self) -> Option<TaskEnvelope> {
        self.rx.try_recv().ok()
    }
}

impl TaskQueue {
    pub fn channel() -> (TaskQueue, TaskReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            TaskQueue {
                tx,
                outstanding: Arc::new(AtomicUsize::new(0)),
            },
            TaskReceiver { rx },
        )
    }

    pub fn enqueue(&self, task: Task) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.send(TaskEnvelope { task, attempt: 1 });
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    fn send(&self, envelope: TaskEnvelope) {
        if let Err(e) = self.tx.send(envelope) {
            // Receiver gone: the process is shutting down
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            error!(task = e.0.task.name(), key = e.0.task.key(), "Task queue closed, task dropped");
        }
    }

    fn done(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }

    /// Send `envelope` again after `delay`. Stays outstanding meanwhile.
    fn redeliver_after(&self, mut envelope: TaskEnvelope, delay: Duration) {
        envelope.attempt += 1;
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.send(envelope);
        });
    }
}

// ============================================================================
// Runner
// ============================================================================

pub struct TaskRunner {
    queue: TaskQueue,
    receiver: TaskReceiver,
    handler: Arc<dyn TaskHandler>,
    policy: DeliveryPolicy,
}

impl TaskRunner {
    pub fn new(
        queue: TaskQueue,
        receiver: TaskReceiver,
        handler: Arc<dyn TaskHandler>,
        policy: DeliveryPolicy,
    ) -> Self {
        Self {
            queue,
            receiver,
            handler,
            policy,
        }
    }

    /// Consume tasks forever, each on its own tokio task.
    pub async fn run(mut self) {
        while let Some(envelope) = self.receiver.rx.recv().await {
            let queue = self.queue.clone();
            let handler = self.handler.clone();
            let policy = self.policy.clone();
            tokio::spawn(async move {
                deliver(&queue, handler.as_ref(), &policy, envelope).await;
            });
        }
    }

    /// Handle tasks inline until nothing is queued, running or waiting for
    /// redelivery. Returns the number of deliveries made.
    pub async fn run_until_idle(&mut self) -> usize {
        let mut delivered = 0;
        loop {
            let envelope = match self.receiver.rx.try_recv() {
                Ok(envelope) => envelope,
                Err(_) if self.queue.outstanding() == 0 => return delivered,
                // A redelivery is sleeping; wait for it
                Err(_) => match self.receiver.rx.recv().await {
                    Some(envelope) => envelope,
                    None => return delivered,
                },
            };
            delivered += 1;
            deliver(&self.queue, self.handler.as_ref(), &self.policy, envelope).await;
        }
    }
}

async fn deliver(
    queue: &TaskQueue,
    handler: &dyn TaskHandler,
    policy: &DeliveryPolicy,
    envelope: TaskEnvelope,
) {
    debug!(
        task = envelope.task.name(),
        key = envelope.task.key(),
        attempt = envelope.attempt,
        "Handling task"
    );
    match handler.handle(&envelope).await {
        Ok(()) => queue.done(),
        Err(e) if envelope.attempt < policy.max_attempts => {
            warn!(
                task = envelope.task.name(),
                key = envelope.task.key(),
                attempt = envelope.attempt,
                error = %e,
                "Task failed, scheduling redelivery"
            );
            queue.redeliver_after(envelope, policy.redelivery_delay);
        }
        Err(e) => {
            error!(
                task = envelope.task.name(),
                key = envelope.task.key(),
                attempt = envelope.attempt,
                error = %e,
                "Task failed permanently"
            );
            queue.done();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Fails the first `failures` deliveries of every task
    struct FlakyHandler {
        failures: u32,
        seen: Mutex<Vec<(Task, u32)>>,
    }

    #[async_trait]
    impl TaskHandler for FlakyHandler {
        async fn handle(&self, envelope: &TaskEnvelope) -> Result<(), LedgerError> {
            self.seen
                .lock()
                .push((envelope.task.clone(), envelope.attempt));
            if envelope.attempt <= self.failures {
                Err(LedgerError::ServiceUnavailable("flaky".into()))
            } else {
                Ok(())
            }
        }
    }

    fn policy(max_attempts: u32) -> DeliveryPolicy {
        DeliveryPolicy {
            max_attempts,
            redelivery_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_failed_task_is_redelivered() {
        let (queue, receiver) = TaskQueue::channel();
        let handler = Arc::new(FlakyHandler {
            failures: 2,
            seen: Mutex::new(Vec::new()),
        });
        let mut runner = TaskRunner::new(queue.clone(), receiver, handler.clone(), policy(5));

        let task = Task::NotifyTransaction {
            code: TransactionCode::new("TRB1"),
        };
        queue.enqueue(task.clone());
        assert_eq!(runner.run_until_idle().await, 3);

        let seen = handler.seen.lock().clone();
        assert_eq!(seen, vec![(task.clone(), 1), (task.clone(), 2), (task, 3)]);
        assert_eq!(queue.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_attempt_budget_is_respected() {
        let (queue, receiver) = TaskQueue::channel();
        let handler = Arc::new(FlakyHandler {
            failures: u32::MAX,
            seen: Mutex::new(Vec::new()),
        });
        let mut runner = TaskRunner::new(queue.clone(), receiver, handler.clone(), policy(2));

        queue.enqueue(Task::Compensate {
            code: TransactionCode::new("TRB2"),
        });
        assert_eq!(runner.run_until_idle().await, 2);
        assert_eq!(queue.outstanding(), 0);
    }

    #[test]
    fn test_task_keys() {
        let t = Task::ExecuteBulkTransfer {
            id: BulkId::new("BLK1"),
        };
        assert_eq!(t.key(), "BLK1");
        assert_eq!(t.name(), "execute_bulk_transfer");
    }
}
