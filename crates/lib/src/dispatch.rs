//! Per-conversation dispatcher.
//!
//! Each conversation key gets a lazily created FIFO worker that runs one task at a time and
//! pauses `spacing` after every task before starting the next. Keys are independent: a slow
//! conversation never holds back another one. Task failures (errors or panics) are logged with
//! the key and the worker moves on.

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Unit of work queued for one conversation.
pub type DispatchTask = BoxFuture<'static, anyhow::Result<()>>;

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    /// Minimum pause between the end of one task and the start of the next, per key.
    pub spacing: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            spacing: Duration::from_millis(1000),
        }
    }
}

/// Registry of per-key queues. Queues live as long as the dispatcher.
pub struct Dispatcher {
    settings: DispatchSettings,
    queues: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<DispatchTask>>>>,
}

impl Dispatcher {
    pub fn new(settings: DispatchSettings) -> Self {
        Self {
            settings,
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Enqueue `task` behind everything already submitted for `key`. Never fails.
    pub async fn submit<F>(&self, key: &str, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut task: DispatchTask = Box::pin(task);
        let mut queues = self.queues.lock().await;
        if let Some(tx) = queues.get(key) {
            match tx.send(task) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => {
                    log::warn!("dispatch[{}]: worker gone, starting a new one", key);
                    task = returned;
                }
            }
        }
        let tx = spawn_worker(key.to_string(), self.settings.spacing);
        if tx.send(task).is_err() {
            log::error!("dispatch[{}]: new worker rejected task", key);
        }
        queues.insert(key.to_string(), tx);
    }

    /// Number of conversation queues created so far.
    pub async fn queue_count(&self) -> usize {
        self.queues.lock().await.len()
    }
}

fn spawn_worker(key: String, spacing: Duration) -> mpsc::UnboundedSender<DispatchTask> {
    let (tx, mut rx) = mpsc::unbounded_channel::<DispatchTask>();
    log::debug!("dispatch[{}]: queue created", key);
    tokio::spawn(async move {
        while let Some(task) = rx.recv().await {
            // Spawned so a panicking task is contained and reported like an error.
            match tokio::spawn(task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("dispatch[{}]: task failed: {:#}", key, e),
                Err(e) => log::error!("dispatch[{}]: task aborted: {}", key, e),
            }
            if !spacing.is_zero() {
                tokio::time::sleep(spacing).await;
            }
        }
        log::debug!("dispatch[{}]: queue closed", key);
    });
    tx
}
