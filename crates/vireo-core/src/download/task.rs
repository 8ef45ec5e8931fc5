//! Download task types and state.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::registry::ArtifactKind;

/// Suffix for in-flight temp files next to their target.
pub const TEMP_SUFFIX: &str = ".part";

/// Temp path owned by the task downloading to `target`.
pub fn temp_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(TEMP_SUFFIX);
    target.with_file_name(name)
}

/// What to download and where to put it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSpec {
    pub filename: String,
    pub kind: ArtifactKind,
    pub source_url: String,
    pub target_path: PathBuf,
    pub expected_size: Option<u64>,
}

/// Lifecycle of a download task.
///
/// Transitions are monotone except `active <-> paused` and
/// `failed -> queued` on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Active,
    Paused,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Active => "active",
            TaskStatus::Paused => "paused",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Observer-facing view of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: u64,
    pub filename: String,
    pub source_url: String,
    pub target_path: PathBuf,
    pub status: TaskStatus,
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
    pub speed_bps: f64,
    pub error: Option<String>,
}

/// Snapshot of the whole queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queued: Vec<TaskSnapshot>,
    pub active: Vec<TaskSnapshot>,
    pub history: Vec<TaskSnapshot>,
}

/// Progress event published while a task transfers.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub task_id: u64,
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
    pub rate_bps: f64,
}

/// Internal mutable state of one task.
pub(crate) struct TaskState {
    pub id: u64,
    pub spec: DownloadSpec,
    pub status: TaskStatus,
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
    pub speed_bps: f64,
    pub error: Option<String>,
    pub cancel_flag: Arc<AtomicBool>,
    pub pause_flag: Arc<AtomicBool>,
}

impl TaskState {
    pub fn new(id: u64, spec: DownloadSpec) -> Self {
        let total_bytes = spec.expected_size;
        Self {
            id,
            spec,
            status: TaskStatus::Queued,
            bytes_transferred: 0,
            total_bytes,
            speed_bps: 0.0,
            error: None,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            pause_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn temp_path(&self) -> PathBuf {
        temp_path_for(&self.spec.target_path)
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            filename: self.spec.filename.clone(),
            source_url: self.spec.source_url.clone(),
            target_path: self.spec.target_path.clone(),
            status: self.status,
            bytes_transferred: self.bytes_transferred,
            total_bytes: self.total_bytes,
            speed_bps: self.speed_bps,
            error: self.error.clone(),
        }
    }
}
