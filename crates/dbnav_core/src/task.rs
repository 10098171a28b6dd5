use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::NodePath;

pub type LoadTaskId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Completed,
    Failed(String),
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

/// Cooperative cancellation flag shared between a caller and the work it started.
#[derive(Debug, Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

struct LoadTask {
    id: LoadTaskId,
    path: NodePath,
    label: String,
    status: TaskStatus,
    started_at: Instant,
    started_wall: DateTime<Utc>,
    completed_at: Option<Instant>,
    total_units: u64,
    worked_units: u64,
    child_count: Option<usize>,
}

impl LoadTask {
    fn elapsed(&self) -> std::time::Duration {
        match self.completed_at {
            Some(completed) => completed.duration_since(self.started_at),
            None => self.started_at.elapsed(),
        }
    }

    fn progress(&self) -> Option<f32> {
        if self.total_units == 0 {
            return None;
        }
        Some((self.worked_units as f32 / self.total_units as f32).clamp(0.0, 1.0))
    }
}

/// Point-in-time view of a load task.
#[derive(Debug, Clone)]
pub struct LoadTaskSnapshot {
    pub id: LoadTaskId,
    pub path: NodePath,
    pub label: String,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub progress: Option<f32>,
    pub worked_units: u64,
    pub child_count: Option<usize>,
}

impl From<&LoadTask> for LoadTaskSnapshot {
    fn from(task: &LoadTask) -> Self {
        Self {
            id: task.id,
            path: task.path.clone(),
            label: task.label.clone(),
            status: task.status.clone(),
            started_at: task.started_wall,
            elapsed_secs: task.elapsed().as_secs_f64(),
            progress: task.progress(),
            worked_units: task.worked_units,
            child_count: task.child_count,
        }
    }
}

/// Bookkeeping for background child loads.
///
/// The model records every load here, so failures stay attached to the task
/// that produced them and can be inspected after the fact.
#[derive(Default)]
pub struct LoadTaskManager {
    tasks: HashMap<LoadTaskId, LoadTask>,
}

impl LoadTaskManager {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    pub fn start(&mut self, path: &NodePath) -> LoadTaskId {
        let id = LoadTaskId::new_v4();

        let task = LoadTask {
            id,
            path: path.clone(),
            label: format!("Loading '{}'", path),
            status: TaskStatus::Running,
            started_at: Instant::now(),
            started_wall: Utc::now(),
            completed_at: None,
            total_units: 0,
            worked_units: 0,
            child_count: None,
        };

        self.tasks.insert(id, task);
        id
    }

    pub fn begin(&mut self, id: LoadTaskId, label: &str, total_units: u64) {
        if let Some(task) = self.tasks.get_mut(&id)
            && task.status == TaskStatus::Running
        {
            task.label = label.to_string();
            task.total_units = total_units;
            task.worked_units = 0;
        }
    }

    pub fn worked(&mut self, id: LoadTaskId, units: u64) {
        if let Some(task) = self.tasks.get_mut(&id)
            && task.status == TaskStatus::Running
        {
            task.worked_units = task.worked_units.saturating_add(units);
        }
    }

    pub fn complete(&mut self, id: LoadTaskId, child_count: usize) {
        if let Some(task) = self.tasks.get_mut(&id)
            && task.status == TaskStatus::Running
        {
            task.status = TaskStatus::Completed;
            task.child_count = Some(child_count);
            task.completed_at = Some(Instant::now());
        }
    }

    pub fn fail(&mut self, id: LoadTaskId, error: impl Into<String>) {
        if let Some(task) = self.tasks.get_mut(&id)
            && task.status == TaskStatus::Running
        {
            task.status = TaskStatus::Failed(error.into());
            task.completed_at = Some(Instant::now());
        }
    }

    pub fn cancel(&mut self, id: LoadTaskId) {
        if let Some(task) = self.tasks.get_mut(&id)
            && task.status == TaskStatus::Running
        {
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(Instant::now());
        }
    }

    pub fn get(&self, id: LoadTaskId) -> Option<LoadTaskSnapshot> {
        self.tasks.get(&id).map(LoadTaskSnapshot::from)
    }

    pub fn running_tasks(&self) -> Vec<LoadTaskSnapshot> {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .map(LoadTaskSnapshot::from)
            .collect()
    }

    pub fn recent_tasks(&self, limit: usize) -> Vec<LoadTaskSnapshot> {
        let mut tasks: Vec<_> = self.tasks.values().collect();
        tasks.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        tasks
            .into_iter()
            .take(limit)
            .map(LoadTaskSnapshot::from)
            .collect()
    }

    /// Tasks recorded for a node, oldest first.
    pub fn tasks_for(&self, path: &NodePath) -> Vec<LoadTaskSnapshot> {
        let mut tasks: Vec<_> = self.tasks.values().filter(|t| &t.path == path).collect();
        tasks.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        tasks.into_iter().map(LoadTaskSnapshot::from).collect()
    }

    /// Error of the most recent load of `path`, if that load failed.
    pub fn last_error_for(&self, path: &NodePath) -> Option<String> {
        self.tasks
            .values()
            .filter(|t| &t.path == path && t.status.is_terminal())
            .max_by_key(|t| t.started_at)
            .and_then(|t| match &t.status {
                TaskStatus::Failed(message) => Some(message.clone()),
                _ => None,
            })
    }

    pub fn active_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .count()
    }

    /// Drops terminal tasks that finished at least `max_age` ago.
    pub fn cleanup_completed(&mut self, max_age: Duration) {
        let now = Instant::now();
        self.tasks.retain(|_, task| {
            if task.status.is_terminal()
                && let Some(completed) = task.completed_at
            {
                return now.duration_since(completed) < max_age;
            }
            true
        });
    }

    pub fn current_status_message(&self) -> Option<String> {
        let running: Vec<_> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .collect();

        match running.len() {
            0 => None,
            1 => Some(running[0].label.clone()),
            n => Some(format!("{} loads running...", n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_progress_until_completion() {
        let mut tasks = LoadTaskManager::new();
        let path = NodePath::from_segments(["pg"]);
        let id = tasks.start(&path);

        tasks.begin(id, "Loading pg", 4);
        tasks.worked(id, 1);
        assert_eq!(tasks.get(id).unwrap().progress, Some(0.25));
        assert_eq!(tasks.active_count(), 1);

        tasks.complete(id, 3);
        let snapshot = tasks.get(id).unwrap();
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.child_count, Some(3));
        assert_eq!(tasks.active_count(), 0);
    }

    #[test]
    fn terminal_status_is_final() {
        let mut tasks = LoadTaskManager::new();
        let id = tasks.start(&NodePath::root());

        tasks.cancel(id);
        tasks.fail(id, "too late");
        assert_eq!(tasks.get(id).unwrap().status, TaskStatus::Cancelled);
    }

    #[test]
    fn last_error_follows_latest_load() {
        let mut tasks = LoadTaskManager::new();
        let path = NodePath::from_segments(["pg"]);

        let first = tasks.start(&path);
        tasks.fail(first, "connection refused");
        assert_eq!(
            tasks.last_error_for(&path).as_deref(),
            Some("connection refused")
        );

        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = tasks.start(&path);
        tasks.complete(second, 0);
        assert_eq!(tasks.last_error_for(&path), None);
        assert_eq!(tasks.tasks_for(&path).len(), 2);
    }

    #[test]
    fn cleanup_drops_only_finished_tasks_past_retention() {
        let mut tasks = LoadTaskManager::new();
        let path = NodePath::from_segments(["pg"]);

        let finished = tasks.start(&path);
        tasks.complete(finished, 3);
        let running = tasks.start(&path);

        tasks.cleanup_completed(Duration::from_secs(60));
        assert!(tasks.get(finished).is_some());

        tasks.cleanup_completed(Duration::ZERO);
        assert!(tasks.get(finished).is_none());
        assert_eq!(tasks.get(running).unwrap().status, TaskStatus::Running);
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
