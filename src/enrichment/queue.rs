// In-process task queue with retrying workers
// Delivery is at-least-once for as long as the process lives; tasks still in
// the channel at shutdown are lost. Handlers must be idempotent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub workers: usize,
    pub capacity: usize,
    /// Total attempts per task, including the first
    pub max_attempts: u32,
    /// Delay before retry `n` is `n * retry_backoff_ms`
    pub retry_backoff_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            capacity: 1024,
            max_attempts: 3,
            retry_backoff_ms: 200,
        }
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    /// Worth another attempt
    #[error("transient failure: {0}")]
    Retryable(String),

    /// Retrying cannot help
    #[error("permanent failure: {0}")]
    Permanent(String),
}

/// Executes one kind of task
#[async_trait]
pub trait TaskHandler<T>: Send + Sync {
    async fn handle(&self, task: &T) -> Result<(), TaskError>;
}

/// Producer side of the queue. Cloning shares the channel; workers stop once
/// every clone is dropped and the channel drains.
pub struct TaskQueue<T> {
    sender: mpsc::Sender<T>,
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> TaskQueue<T>
where
    T: Debug + Send + Sync + 'static,
{
    /// Spawn `config.workers` workers draining into `handler`
    pub fn start(
        handler: Arc<dyn TaskHandler<T>>,
        config: &QueueConfig,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..config.workers.max(1))
            .map(|id| {
                let receiver = receiver.clone();
                let handler = handler.clone();
                let config = config.clone();
                tokio::spawn(async move { worker_loop(id, receiver, handler, config).await })
            })
            .collect();

        (Self { sender }, workers)
    }

    /// Enqueue without waiting. Returns false when the queue is full or
    /// closed; the caller's request is never held up.
    pub fn submit(&self, task: T) -> bool {
        match self.sender.try_send(task) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(task)) => {
                warn!("Task queue full, dropping {:?}", task);
                false
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                warn!("Task queue closed, dropping {:?}", task);
                false
            }
        }
    }
}

async fn worker_loop<T: Debug>(
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<T>>>,
    handler: Arc<dyn TaskHandler<T>>,
    config: QueueConfig,
) {
    debug!("Task worker {} started", id);
    loop {
        // Hold the lock only while waiting for the next task
        let next = receiver.lock().await.recv().await;
        let Some(task) = next else {
            break;
        };
        run_with_retries(&task, handler.as_ref(), &config).await;
    }
    debug!("Task worker {} stopped", id);
}

async fn run_with_retries<T: Debug>(task: &T, handler: &dyn TaskHandler<T>, config: &QueueConfig) {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match handler.handle(task).await {
            Ok(()) => return,
            Err(TaskError::Permanent(reason)) => {
                warn!("Task {:?} failed permanently: {}", task, reason);
                return;
            }
            Err(TaskError::Retryable(reason)) if attempt < max_attempts => {
                debug!(
                    "Task {:?} failed (attempt {}/{}): {}",
                    task, attempt, max_attempts, reason
                );
                tokio::time::sleep(Duration::from_millis(
                    config.retry_backoff_ms * attempt as u64,
                ))
                .await;
                attempt += 1;
            }
            Err(TaskError::Retryable(reason)) => {
                error!(
                    "Task {:?} discarded after {} attempts: {}",
                    task, attempt, reason
                );
                return;
            }
        }
    }
}
