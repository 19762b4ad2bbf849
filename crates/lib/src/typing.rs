//! Typing indicator: keeps "composing" visible in a conversation while work runs.
//!
//! Presence on the transport expires after a few seconds, so `begin` starts a heartbeat that
//! re-signals "composing" until `end` cancels it and signals "paused". `run_with_typing` pairs
//! the two around a task and bounds the whole call by a fail-safe deadline.

use crate::channels::{Presence, Transport};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

/// Shortest heartbeat accepted; smaller values (zero included) are raised to it.
pub const MIN_HEARTBEAT: Duration = Duration::from_millis(500);

/// Ceiling for a single presence call.
pub const PRESENCE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct TypingSettings {
    /// Interval between "composing" refreshes.
    pub heartbeat: Duration,
    /// Fail-safe ceiling for a wrapped task.
    pub max: Duration,
}

impl Default for TypingSettings {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_millis(4_500),
            max: Duration::from_millis(120_000),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TypingError {
    #[error("typing fail-safe fired after {max_ms} ms; task cancelled")]
    TimedOut { max_ms: u64 },
    #[error("wrapped task aborted: {0}")]
    Aborted(String),
}

struct Session {
    generation: u64,
    heartbeat: JoinHandle<()>,
}

/// Per-key heartbeat registry. Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct TypingController {
    transport: Arc<dyn Transport>,
    heartbeat: Duration,
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    generations: Arc<AtomicU64>,
}

impl TypingController {
    pub fn new(transport: Arc<dyn Transport>, heartbeat: Duration) -> Self {
        Self {
            transport,
            heartbeat: heartbeat.max(MIN_HEARTBEAT),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    /// Signal "composing" now and keep refreshing it every heartbeat.
    pub async fn begin(&self, key: &str) {
        let generation = self.next_generation();
        self.start_session(key, generation).await;
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Registers the heartbeat before the first signal so an interrupted start still leaves a
    /// session that `end` can tear down.
    async fn start_session(&self, key: &str, generation: u64) {
        let transport = self.transport.clone();
        let heartbeat = self.heartbeat;
        let target = key.to_string();
        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
            loop {
                ticks.tick().await;
                signal(transport.as_ref(), &target, Presence::Composing).await;
            }
        });
        let session = Session {
            generation,
            heartbeat: handle,
        };
        if let Some(previous) = self.sessions.lock().await.insert(key.to_string(), session) {
            previous.heartbeat.abort();
        }
        signal(self.transport.as_ref(), key, Presence::Composing).await;
    }

    /// Stop the heartbeat and signal "paused". Safe to call when no session is active.
    pub async fn end(&self, key: &str) {
        if let Some(session) = self.sessions.lock().await.remove(key) {
            session.heartbeat.abort();
        }
        signal(self.transport.as_ref(), key, Presence::Paused).await;
    }

    /// Stop the heartbeat of session `generation` of `key`. False when a newer session for the
    /// key has replaced it, in which case nothing is touched.
    async fn end_session(&self, key: &str, generation: u64) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(key) {
            Some(s) if s.generation != generation => false,
            Some(_) => {
                if let Some(session) = sessions.remove(key) {
                    session.heartbeat.abort();
                }
                true
            }
            None => true,
        }
    }

    /// Keys with a running heartbeat.
    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Run `task` between `begin` and `end`, all within `max`. If the task has not finished by
    /// then, it is cancelled and the call fails with `TypingError::TimedOut`. The "paused"
    /// signal is sent on every path; when the deadline is already spent it goes out in the
    /// background.
    pub async fn run_with_typing<F, T>(&self, key: &str, task: F, max: Duration) -> Result<T, TypingError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let deadline = Instant::now() + max;
        let generation = self.next_generation();
        let mut handle = tokio::spawn(task);
        let mut session = SessionGuard::new(self.clone(), key, generation, handle.abort_handle());
        if tokio::time::timeout_at(deadline, self.start_session(key, generation))
            .await
            .is_err()
        {
            log::debug!("typing[{}]: composing signal still pending at deadline", key);
        }
        let outcome = match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                log::warn!("typing[{}]: wrapped task aborted: {}", key, e);
                Err(TypingError::Aborted(e.to_string()))
            }
            Err(_) => {
                handle.abort();
                let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
                log::warn!("typing[{}]: fail-safe fired after {} ms; task cancelled", key, max_ms);
                Err(TypingError::TimedOut { max_ms })
            }
        };
        session.finish(deadline).await;
        outcome
    }

    fn send_paused_detached(&self, key: &str) -> JoinHandle<()> {
        let transport = self.transport.clone();
        let target = key.to_string();
        tokio::spawn(async move { signal(transport.as_ref(), &target, Presence::Paused).await })
    }
}

async fn signal(transport: &dyn Transport, key: &str, presence: Presence) {
    match tokio::time::timeout(PRESENCE_TIMEOUT, transport.set_presence(key, presence)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::debug!("typing[{}]: {} signal failed: {}", key, presence.as_str(), e),
        Err(_) => log::debug!("typing[{}]: {} signal timed out", key, presence.as_str()),
    }
}

/// Ends the session it started. `Drop` covers the owning future being cancelled before
/// `finish`: the task is cancelled with it.
struct SessionGuard {
    controller: TypingController,
    key: String,
    generation: u64,
    task: AbortHandle,
    finished: bool,
}

impl SessionGuard {
    fn new(controller: TypingController, key: &str, generation: u64, task: AbortHandle) -> Self {
        Self {
            controller,
            key: key.to_string(),
            generation,
            task,
            finished: false,
        }
    }

    async fn finish(&mut self, deadline: Instant) {
        self.finished = true;
        if !self.controller.end_session(&self.key, self.generation).await {
            return;
        }
        let paused = self.controller.send_paused_detached(&self.key);
        if tokio::time::timeout_at(deadline, paused).await.is_err() {
            log::debug!("typing[{}]: paused signal sent in background", self.key);
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.task.abort();
        let controller = self.controller.clone();
        let key = std::mem::take(&mut self.key);
        let generation = self.generation;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if controller.end_session(&key, generation).await {
                    signal(controller.transport.as_ref(), &key, Presence::Paused).await;
                }
            });
        }
    }
}
