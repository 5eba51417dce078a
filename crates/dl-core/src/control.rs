//! Task control for pause/cancel: shared abort tokens and optional IPC.
//!
//! Each running task is registered with an abort token keyed by its `Record.id`.
//! A control client (e.g. a CLI `pause <id>` command via socket) can request
//! abort for a task; the download loop checks the token and stops, persisting
//! progress and setting status to Closed rather than Complete.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Error returned when a download is stopped by user (pause/cancel).
#[derive(Debug)]
pub struct TaskAborted;

impl std::fmt::Display for TaskAborted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task aborted by user")
    }
}

impl std::error::Error for TaskAborted {}

/// Shared registry of task id -> abort token. Used by the engine to pass an
/// abort token into each running task and by the control socket to signal
/// pause/cancel.
#[derive(Default)]
pub struct TaskControl {
    tasks: RwLock<HashMap<u64, Arc<AtomicBool>>>,
}

impl TaskControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running task; returns the abort token to pass to the download phase.
    /// Call when starting a task; the token is set to true when pause/cancel is requested.
    pub fn register(&self, task_id: u64) -> Arc<AtomicBool> {
        let token = Arc::new(AtomicBool::new(false));
        self.tasks.write().unwrap().insert(task_id, Arc::clone(&token));
        token
    }

    /// Unregister a task (call when the task finishes, success or failure).
    pub fn unregister(&self, task_id: u64) {
        self.tasks.write().unwrap().remove(&task_id);
    }

    /// Request abort for a task (e.g. from control socket). The download loop
    /// will see the token set and stop; progress is persisted and state set
    /// to Paused/Closed.
    pub fn request_abort(&self, task_id: u64) {
        if let Some(token) = self.tasks.read().unwrap().get(&task_id) {
            token.store(true, Ordering::Relaxed);
        }
    }

    /// True if a task is currently registered (i.e. actively running).
    pub fn is_running(&self, task_id: u64) -> bool {
        self.tasks.read().unwrap().contains_key(&task_id)
    }
}

/// Default path for the control socket (same XDG state dir as everything else).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("dl-core")?.get_state_home();
    Ok(dir.join("control.sock"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_abort_sets_token() {
        let ctl = TaskControl::new();
        let token = ctl.register(42);
        assert!(!token.load(Ordering::Relaxed));
        ctl.request_abort(42);
        assert!(token.load(Ordering::Relaxed));
    }

    #[test]
    fn abort_on_unknown_task_is_noop() {
        let ctl = TaskControl::new();
        ctl.request_abort(999);
    }

    #[test]
    fn unregister_removes_task() {
        let ctl = TaskControl::new();
        ctl.register(1);
        assert!(ctl.is_running(1));
        ctl.unregister(1);
        assert!(!ctl.is_running(1));
    }
}
