//! `TaskEngine`: the per-task state machine tying together `Record`,
//! `RecordStore`, the direct-transfer downloader, the extractor-dispatch
//! sub-component, `NetworkGate`, `RetryPolicy`, and `TimerTicker`.
//!
//! States: `Idle -> Preparing -> Running -> {Paused, WaitingForNetwork,
//! Finalizing} -> Completed | Closed`.

mod direct;
mod extractor_path;
pub mod message;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use crate::control::TaskControl;
use crate::interfaces::{CompletionSound, CookieProcurement, Extractor, FilenameHelper, MediaProbe};
use crate::network_gate::{NetworkGate, NetworkStatusProvider};
use crate::record::{Record, Status};
use crate::store::RecordStore;
use crate::ticker::Tickable;

pub use message::UserMessage;

/// Stall threshold: if the most recent extractor status line looks like an
/// ongoing transfer (contains "left") and nothing has advanced for this
/// long, force a restart.
const STALL_THRESHOLD_MS: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Preparing,
    Running,
    Paused,
    WaitingForNetwork,
    Finalizing,
    Completed,
    Closed,
}

/// Which transfer strategy a task uses. Decided at creation time from the
/// source URL and never changes afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Plain ranged HTTP GET, handled entirely by this crate's downloader.
    DirectHttp,
    /// Delegated to an external extractor process (e.g. a video site).
    ExtractorBacked,
}

/// Outcome of one run of the transfer loop (direct or extractor-backed).
pub(crate) enum RunOutcome {
    Completed,
    /// User requested pause/cancel; record already reflects partial progress.
    Aborted,
    /// Transient failure with retry budget remaining: tear down and restart.
    ForcedRestart,
    /// No more retry budget, or a non-retryable classification: close the task.
    Fatal(UserMessage),
}

/// External collaborators a `TaskEngine` depends on but does not implement.
/// Built once at process init and shared across tasks.
pub struct Collaborators {
    pub network: Arc<dyn NetworkStatusProvider>,
    pub extractor: Option<Arc<dyn Extractor>>,
    pub cookie_procurement: Option<Arc<dyn CookieProcurement>>,
    pub filename_helper: Arc<dyn FilenameHelper>,
    pub media_probe: Option<Arc<dyn MediaProbe>>,
    pub completion_sound: Option<Arc<dyn CompletionSound>>,
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Per-task state machine. Owns the `Record` for the lifetime of the task;
/// all mutating access is serialized through `&self` methods (the `Mutex`
/// is the only sanctioned path in, matching §4.1's "writes go through the
/// owning TaskEngine" contract).
pub struct TaskEngine {
    record: Mutex<Record>,
    state: Mutex<EngineState>,
    kind: TransferKind,
    store: Arc<RecordStore>,
    control: Arc<TaskControl>,
    collaborators: Arc<Collaborators>,
    data_dir: PathBuf,
    last_progress_at: Mutex<i64>,
    cancel_reason: Mutex<Option<UserMessage>>,
    abort_token: Mutex<Option<Arc<AtomicBool>>>,
}

impl TaskEngine {
    pub fn new(
        record: Record,
        kind: TransferKind,
        store: Arc<RecordStore>,
        control: Arc<TaskControl>,
        collaborators: Arc<Collaborators>,
        data_dir: impl Into<PathBuf>,
    ) -> Arc<Self> {
        Arc::new(TaskEngine {
            record: Mutex::new(record),
            state: Mutex::new(EngineState::Idle),
            kind,
            store,
            control,
            collaborators,
            data_dir: data_dir.into(),
            last_progress_at: Mutex::new(now_ms()),
            cancel_reason: Mutex::new(None),
            abort_token: Mutex::new(None),
        })
    }

    /// The abort token for the currently running transfer, if any. Shared
    /// with `TaskControl`'s internal registry, so `pause`/`cancel` flip the
    /// same `AtomicBool` a running `downloader::download_segments` call or
    /// extractor loop is polling.
    pub(super) fn abort_token(&self) -> Option<Arc<AtomicBool>> {
        self.abort_token.lock().unwrap().clone()
    }

    pub(super) fn data_dir(&self) -> &std::path::Path {
        &self.data_dir
    }

    pub fn id(&self) -> u64 {
        self.record.lock().unwrap().id
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap()
    }

    /// A read-only copy of the current record, e.g. for CLI `status`.
    pub fn snapshot(&self) -> Record {
        self.record.lock().unwrap().clone()
    }

    fn set_state(&self, s: EngineState) {
        *self.state.lock().unwrap() = s;
    }

    fn persist(&self) {
        let mut r = self.record.lock().unwrap();
        self.store.save(&mut r);
    }

    fn with_record<T>(&self, f: impl FnOnce(&mut Record) -> T) -> T {
        let mut r = self.record.lock().unwrap();
        f(&mut r)
    }

    /// `destinationFile` pre-creation: if nothing has been downloaded yet
    /// and the destination is missing, create it with a small placeholder
    /// size so later filesystem operations are observable.
    fn ensure_destination_placeholder(&self) -> std::io::Result<()> {
        let (downloaded, dest) = {
            let r = self.record.lock().unwrap();
            (r.downloaded_byte, r.destination_path())
        };
        if downloaded >= 1 || dest.as_os_str().is_empty() || dest.exists() {
            return Ok(());
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let f = std::fs::File::create(&dest)?;
        f.set_len(crate::record::DESTINATION_PLACEHOLDER_BYTES)?;
        Ok(())
    }

    /// One-time filename/directory preparation guarded by
    /// `isSmartCategoryDirProcessed`. The "smart category" directory mapping
    /// and collision-resolution are external `FilenameHelper` calls; this
    /// method only sequences them and flips the guard.
    fn ensure_filename_prepared(&self) {
        let already = self.record.lock().unwrap().is_smart_category_dir_processed;
        if already {
            return;
        }
        let helper = &self.collaborators.filename_helper;
        self.with_record(|r| {
            if !helper.is_file_name_valid(&r.file_name) {
                r.file_name = helper.sanitize_extreme(&r.file_name);
            }
            r.file_name = helper.rename_if_exists(&r.file_directory, &r.file_name);
            r.is_smart_category_dir_processed = true;
        });
    }

    fn network_gate(&self) -> NetworkGate<'_> {
        NetworkGate::new(self.collaborators.network.as_ref())
    }

    fn wifi_only(&self) -> bool {
        self.record.lock().unwrap().global_settings.download_wifi_only
    }

    /// `Idle -> Preparing -> Running -> ...`. Drives the task to completion,
    /// a paused/waiting state, or a terminal `Closed`. Call from a spawned
    /// task; this future runs until the task stops progressing.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        loop {
            self.set_state(EngineState::Preparing);
            self.with_record(|r| {
                r.status = Status::Downloading;
                r.is_running = true;
                r.touch(now_ms());
            });
            self.persist();

            if let Err(e) = self.ensure_destination_placeholder() {
                tracing::warn!(id = self.id(), error = %e, "destination placeholder failed");
                self.with_record(|r| r.is_failed_to_access_file = true);
                self.close(UserMessage::DownloadIoFailed);
                return Ok(());
            }
            self.ensure_filename_prepared();

            let needs_cookies = {
                let r = self.record.lock().unwrap();
                crate::url_model::is_social_media_url(&r.file_url) && r.cookie_string.is_none()
            };
            if needs_cookies {
                if let Some(helper) = self.collaborators.cookie_procurement.clone() {
                    self.procure_cookies(helper.as_ref()).await;
                }
            }

            if let Some(reason) = self.network_gate().waiting_reason(self.wifi_only()) {
                self.set_state(EngineState::WaitingForNetwork);
                self.with_record(|r| r.is_waiting_for_network = true);
                self.persist();
                self.wait_for_network(reason).await;
                continue;
            }

            self.set_state(EngineState::Running);
            let token = self.control.register(self.id());
            *self.abort_token.lock().unwrap() = Some(token);
            *self.last_progress_at.lock().unwrap() = now_ms();

            let outcome = match self.kind {
                TransferKind::DirectHttp => direct::run(self).await,
                TransferKind::ExtractorBacked => extractor_path::run(self).await,
            };
            self.control.unregister(self.id());
            *self.abort_token.lock().unwrap() = None;

            match outcome {
                RunOutcome::Completed => {
                    self.set_state(EngineState::Finalizing);
                    self.with_record(|r| r.mark_completed(now_ms()));
                    self.persist();
                    if let Some(sound) = &self.collaborators.completion_sound {
                        if self.record.lock().unwrap().global_settings.download_play_notification_sound {
                            sound.play();
                        }
                    }
                    self.set_state(EngineState::Completed);
                    return Ok(());
                }
                RunOutcome::Aborted => {
                    self.set_state(EngineState::Paused);
                    self.with_record(|r| {
                        r.status = Status::Closed;
                        r.is_running = false;
                    });
                    self.persist();
                    return Ok(());
                }
                RunOutcome::ForcedRestart => {
                    self.with_record(|r| {
                        r.resume_session_retry_count += 1;
                        r.total_tracked_connection_retries += 1;
                    });
                    self.persist();
                    continue;
                }
                RunOutcome::Fatal(msg) => {
                    self.close(msg);
                    return Ok(());
                }
            }
        }
    }

    fn close(&self, msg: UserMessage) {
        self.set_state(EngineState::Closed);
        self.with_record(|r| {
            r.status = Status::Closed;
            r.is_running = false;
            r.extractor_problem = !matches!(
                msg,
                UserMessage::Paused | UserMessage::Cancelled | UserMessage::DownloadIoFailed
            );
            r.extractor_problem_msg = Some(msg.as_str().to_string());
        });
        self.persist();
    }

    async fn wait_for_network(&self, reason: crate::network_gate::WaitingReason) {
        self.with_record(|r| r.extractor_problem_msg = Some(UserMessage::from_waiting_reason(reason).as_str().to_string()));
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
            if self.network_gate().usable(self.wifi_only()) {
                self.with_record(|r| r.is_waiting_for_network = false);
                return;
            }
        }
    }

    async fn procure_cookies(&self, helper: &dyn CookieProcurement) {
        let url = self.record.lock().unwrap().file_url.clone();
        for _attempt in 0..2 {
            let fut = helper.fetch_cookie_string(&url);
            let result = tokio::time::timeout(std::time::Duration::from_secs(10), fut).await;
            match result {
                Ok(Ok(cookies)) => {
                    self.with_record(|r| r.cookie_string = Some(cookies));
                    return;
                }
                Ok(Err(e)) => tracing::debug!(id = self.id(), error = %e, "cookie procurement failed"),
                Err(_) => tracing::debug!(id = self.id(), "cookie procurement timed out"),
            }
        }
    }

    /// User-initiated pause: request abort and let the running transfer
    /// stop on its own; `start()`'s loop observes `RunOutcome::Aborted`.
    pub fn pause(&self) {
        *self.cancel_reason.lock().unwrap() = Some(UserMessage::Paused);
        self.control.request_abort(self.id());
        if let Some(extractor) = &self.collaborators.extractor {
            extractor.kill(self.id());
        }
    }

    /// User-initiated cancel: same teardown as pause but the task is
    /// expected to be explicitly restarted rather than auto-resumed.
    pub fn cancel(&self) {
        *self.cancel_reason.lock().unwrap() = Some(UserMessage::Cancelled);
        self.control.request_abort(self.id());
        if let Some(extractor) = &self.collaborators.extractor {
            extractor.kill(self.id());
        }
    }

    pub fn delete_from_disk(&self, delete_destination_file: bool) {
        self.cancel();
        let r = self.record.lock().unwrap();
        self.store.delete_from_disk(&r, delete_destination_file);
    }

    fn is_abort_requested(&self) -> bool {
        self.cancel_reason.lock().unwrap().is_some()
    }

    fn take_cancel_reason(&self) -> Option<UserMessage> {
        self.cancel_reason.lock().unwrap().take()
    }

    /// Stall check: the most recent status line looked like an in-progress
    /// transfer ("left" marker) but nothing has advanced in
    /// `STALL_THRESHOLD_MS`.
    fn is_stalled(&self) -> bool {
        let looks_ongoing = self
            .record
            .lock()
            .unwrap()
            .temp_ytdlp_status_info
            .as_deref()
            .map(|s| s.contains("left"))
            .unwrap_or(false);
        if !looks_ongoing {
            return false;
        }
        now_ms() - *self.last_progress_at.lock().unwrap() >= STALL_THRESHOLD_MS
    }

    fn mark_progress(&self) {
        *self.last_progress_at.lock().unwrap() = now_ms();
    }

    fn retry_budget_remaining(&self) -> bool {
        let r = self.record.lock().unwrap();
        r.resume_session_retry_count < r.global_settings.effective_auto_resume_max_errors()
    }
}

/// Registers this engine with the process-wide `TimerTicker` for progress
/// accounting and stall/`WaitingForNetwork` reactivation while running.
/// Implemented on `Arc<TaskEngine>` rather than `TaskEngine` directly since
/// `TimerTicker::register` stores a `Arc<dyn Tickable>`.
impl Tickable for TaskEngine {
    fn on_tick(&self, _loop_count: u64) {
        if self.state() != EngineState::Running {
            return;
        }
    }

    fn on_coarse_tick(&self, _loop_count: u64) {
        if self.state() == EngineState::WaitingForNetwork {
            if self.network_gate().usable(self.wifi_only()) {
                self.with_record(|r| r.is_waiting_for_network = false);
            }
            return;
        }
        if self.state() != EngineState::Running {
            return;
        }
        if self.is_stalled() {
            self.control.request_abort(self.id());
        }
    }
}
