//! Bounded-concurrency download manager.
//!
//! A FIFO queue feeds a fixed pool of workers. Task state lives in a table
//! behind one mutex; observers always see a consistent snapshot. Terminal
//! tasks move into a bounded history buffer.

mod task;
mod transfer;

pub use task::{
    temp_path_for, DownloadSpec, ProgressEvent, QueueStatus, TaskSnapshot, TaskStatus, TEMP_SUFFIX,
};
pub use transfer::AuthRules;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Client;
use tokio::sync::{broadcast, Notify};
use tracing::{info, warn};

use crate::cancel::CancellationToken;
use crate::config::DownloadConfig;
use crate::error::{Result, VireoError};
use crate::network::build_download_client;
use task::TaskState;
use transfer::TransferOutcome;

/// Capacity of the terminal-task history buffer.
const HISTORY_CAPACITY: usize = 100;

/// How long an idle worker waits before re-checking the shutdown signal.
const IDLE_POLL: Duration = Duration::from_millis(500);

struct Inner {
    queue: Mutex<VecDeque<u64>>,
    tasks: Mutex<HashMap<u64, TaskState>>,
    history: Mutex<VecDeque<TaskSnapshot>>,
    notify: Notify,
    next_id: AtomicU64,
    progress_tx: broadcast::Sender<ProgressEvent>,
    client: Client,
    cfg: DownloadConfig,
    auth: AuthRules,
    global_cancel: CancellationToken,
}

/// The download manager. Cheap to clone; all clones share one queue.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<Inner>,
}

impl DownloadManager {
    /// Create the manager and spawn its worker pool.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(
        cfg: DownloadConfig,
        auth: AuthRules,
        global_cancel: CancellationToken,
    ) -> Result<Self> {
        let manager = Self::build(cfg, auth, global_cancel)?;
        for worker in 0..manager.inner.cfg.concurrency.max(1) {
            let inner = manager.inner.clone();
            tokio::spawn(async move {
                worker_loop(worker, inner).await;
            });
        }
        Ok(manager)
    }

    fn build(
        cfg: DownloadConfig,
        auth: AuthRules,
        global_cancel: CancellationToken,
    ) -> Result<Self> {
        let client = build_download_client(Duration::from_secs(30))?;
        let (progress_tx, _) = broadcast::channel(64);

        let inner = Arc::new(Inner {
            queue: Mutex::new(VecDeque::new()),
            tasks: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            next_id: AtomicU64::new(0),
            progress_tx,
            client,
            cfg,
            auth,
            global_cancel,
        });

        Ok(Self { inner })
    }

    /// Manager with no worker pool: queue state machine only.
    #[cfg(test)]
    fn new_without_workers() -> Self {
        Self::build(
            DownloadConfig::default(),
            AuthRules::default(),
            CancellationToken::new(),
        )
        .unwrap()
    }

    /// Add a task to the back of the queue.
    ///
    /// Fails with `TargetBusy` while another live task owns the same target
    /// path.
    pub fn enqueue(&self, spec: DownloadSpec) -> Result<u64> {
        {
            let tasks = self.inner.tasks.lock().expect("task table poisoned");
            let busy = tasks.values().any(|t| {
                t.spec.target_path == spec.target_path && !t.status.is_terminal()
            });
            if busy {
                return Err(VireoError::TargetBusy(spec.target_path));
            }
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "Enqueued download {} for {} -> {}",
            id,
            spec.filename,
            spec.target_path.display()
        );

        self.inner
            .tasks
            .lock()
            .expect("task table poisoned")
            .insert(id, TaskState::new(id, spec));
        self.inner
            .queue
            .lock()
            .expect("queue poisoned")
            .push_back(id);
        self.inner.notify.notify_one();
        Ok(id)
    }

    /// Consistent snapshot of queued, active (including paused), and
    /// recently terminal tasks.
    pub fn status(&self) -> QueueStatus {
        let queue = self.inner.queue.lock().expect("queue poisoned");
        let tasks = self.inner.tasks.lock().expect("task table poisoned");
        let history = self.inner.history.lock().expect("history poisoned");

        let queued = queue
            .iter()
            .filter_map(|id| tasks.get(id).map(TaskState::snapshot))
            .collect();
        let active = tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Active | TaskStatus::Paused))
            .map(TaskState::snapshot)
            .collect();
        QueueStatus {
            queued,
            active,
            history: history.iter().cloned().collect(),
        }
    }

    /// Snapshot of one task, if it is still live or in history.
    pub fn task(&self, id: u64) -> Option<TaskSnapshot> {
        if let Some(state) = self.inner.tasks.lock().expect("task table poisoned").get(&id) {
            return Some(state.snapshot());
        }
        self.inner
            .history
            .lock()
            .expect("history poisoned")
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }

    /// Pause a queued or active task. Active tasks park at the next chunk
    /// boundary with their temp file preserved.
    ///
    /// Locks are always taken queue-then-tasks, matching `status`.
    pub fn pause(&self, id: u64) -> Result<bool> {
        let mut queue = self.inner.queue.lock().expect("queue poisoned");
        let mut tasks = self.inner.tasks.lock().expect("task table poisoned");
        let Some(state) = tasks.get_mut(&id) else {
            return Ok(false);
        };
        match state.status {
            TaskStatus::Active => {
                state.pause_flag.store(true, Ordering::SeqCst);
                Ok(true)
            }
            TaskStatus::Queued => {
                state.status = TaskStatus::Paused;
                queue.retain(|queued| *queued != id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Resume a paused task at the front of the queue.
    pub fn resume(&self, id: u64) -> Result<bool> {
        {
            let mut queue = self.inner.queue.lock().expect("queue poisoned");
            let mut tasks = self.inner.tasks.lock().expect("task table poisoned");
            let Some(state) = tasks.get_mut(&id) else {
                return Ok(false);
            };
            if state.status != TaskStatus::Paused {
                return Ok(false);
            }
            state.pause_flag.store(false, Ordering::SeqCst);
            state.cancel_flag.store(false, Ordering::SeqCst);
            state.status = TaskStatus::Queued;
            state.error = None;
            queue.push_front(id);
        }
        self.inner.notify.notify_one();
        Ok(true)
    }

    /// Cancel a task. Queued and paused tasks terminate immediately and
    /// their temp files are removed; active tasks stop at the next chunk.
    pub fn cancel(&self, id: u64) -> Result<bool> {
        let removed = {
            let mut queue = self.inner.queue.lock().expect("queue poisoned");
            let mut tasks = self.inner.tasks.lock().expect("task table poisoned");
            let Some(status) = tasks.get(&id).map(|s| s.status) else {
                return Ok(false);
            };
            match status {
                TaskStatus::Active => {
                    if let Some(state) = tasks.get(&id) {
                        state.cancel_flag.store(true, Ordering::SeqCst);
                    }
                    return Ok(true);
                }
                TaskStatus::Queued | TaskStatus::Paused => {
                    queue.retain(|queued| *queued != id);
                    let mut state = tasks.remove(&id).expect("checked above");
                    state.status = TaskStatus::Cancelled;
                    Some((state.temp_path(), state.snapshot()))
                }
                _ => return Ok(false),
            }
        };

        if let Some((temp, snapshot)) = removed {
            let _ = std::fs::remove_file(temp);
            push_history(&self.inner, snapshot);
        }
        Ok(true)
    }

    /// Subscribe to progress events. Slow observers may miss updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.progress_tx.subscribe()
    }

    /// True when no task is queued or running.
    pub fn is_idle(&self) -> bool {
        let queue_empty = self.inner.queue.lock().expect("queue poisoned").is_empty();
        let tasks = self.inner.tasks.lock().expect("task table poisoned");
        queue_empty && tasks.values().all(|t| t.status != TaskStatus::Active)
    }
}

fn push_history(inner: &Inner, snapshot: TaskSnapshot) {
    let mut history = inner.history.lock().expect("history poisoned");
    history.push_back(snapshot);
    while history.len() > HISTORY_CAPACITY {
        history.pop_front();
    }
}

async fn worker_loop(worker: usize, inner: Arc<Inner>) {
    loop {
        if inner.global_cancel.is_cancelled() {
            drain_cancelled(&inner);
            return;
        }

        let next = inner.queue.lock().expect("queue poisoned").pop_front();
        let Some(id) = next else {
            let _ = tokio::time::timeout(IDLE_POLL, inner.notify.notified()).await;
            continue;
        };

        // Claim the task; it may have been cancelled or paused while queued.
        let claimed = {
            let mut tasks = inner.tasks.lock().expect("task table poisoned");
            tasks.get_mut(&id).and_then(|state| {
                if state.status != TaskStatus::Queued {
                    return None;
                }
                state.status = TaskStatus::Active;
                Some((
                    state.spec.clone(),
                    state.cancel_flag.clone(),
                    state.pause_flag.clone(),
                ))
            })
        };
        let Some((spec, cancel_flag, pause_flag)) = claimed else {
            continue;
        };

        info!("Worker {} starting download {} ({})", worker, id, spec.filename);

        let progress_inner = inner.clone();
        let result = transfer::run_task(
            &inner.client,
            &spec,
            &inner.cfg,
            &inner.auth,
            &cancel_flag,
            &pause_flag,
            &inner.global_cancel,
            |bytes, total, rate| {
                if let Some(state) = progress_inner
                    .tasks
                    .lock()
                    .expect("task table poisoned")
                    .get_mut(&id)
                {
                    state.bytes_transferred = bytes;
                    state.total_bytes = total;
                    state.speed_bps = rate;
                }
                let _ = progress_inner.progress_tx.send(ProgressEvent {
                    task_id: id,
                    bytes_transferred: bytes,
                    total_bytes: total,
                    rate_bps: rate,
                });
            },
        )
        .await;

        finish_task(&inner, id, result);
    }
}

fn finish_task(
    inner: &Inner,
    id: u64,
    result: Result<TransferOutcome>,
) {
    let mut tasks = inner.tasks.lock().expect("task table poisoned");
    let Some(state) = tasks.get_mut(&id) else {
        return;
    };

    let terminal = match result {
        Ok(TransferOutcome::Completed(bytes)) => {
            state.status = TaskStatus::Succeeded;
            state.bytes_transferred = bytes;
            state.total_bytes = Some(bytes);
            true
        }
        Ok(TransferOutcome::Paused) => {
            state.status = TaskStatus::Paused;
            state.pause_flag.store(false, Ordering::SeqCst);
            info!("Download {} paused", id);
            false
        }
        Ok(TransferOutcome::Cancelled) => {
            state.status = TaskStatus::Cancelled;
            info!("Download {} cancelled", id);
            true
        }
        Err(e) => {
            warn!("Download {} failed: {}", id, e);
            state.status = TaskStatus::Failed;
            state.error = Some(e.to_string());
            true
        }
    };

    if terminal {
        let snapshot = state.snapshot();
        tasks.remove(&id);
        drop(tasks);
        push_history(inner, snapshot);
    }
}

/// On shutdown, queued tasks drain to cancelled and their temp files go.
fn drain_cancelled(inner: &Inner) {
    let drained: Vec<u64> = inner
        .queue
        .lock()
        .expect("queue poisoned")
        .drain(..)
        .collect();

    for id in drained {
        let removed = {
            let mut tasks = inner.tasks.lock().expect("task table poisoned");
            tasks.remove(&id).map(|mut state| {
                state.status = TaskStatus::Cancelled;
                (state.temp_path(), state.snapshot())
            })
        };
        if let Some((temp, snapshot)) = removed {
            let _ = std::fs::remove_file(temp);
            push_history(inner, snapshot);
        }
    }
}
