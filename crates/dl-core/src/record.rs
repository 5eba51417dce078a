//! The persisted download task record and its invariants.
//!
//! `Record` is the single source of truth for a task's state. Mutators are
//! the only sanctioned way to change it; concurrent writes from outside the
//! owning `TaskEngine` are not supported (see the crate-level concurrency
//! notes on `store::RecordStore`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::SettingsSnapshot;

/// Coarse lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Closed,
    Downloading,
    Complete,
}

/// Fixed suffix used for the direct-transfer finalization temp file.
pub const TEMP_SUFFIX: &str = ".aio_download";

/// Placeholder size written to a freshly created destination file. The
/// source this was distilled from used this exact constant; whether 108 has
/// meaning beyond "small and nonzero" is unresolved (see DESIGN.md).
pub const DESTINATION_PLACEHOLDER_BYTES: u64 = 108;

/// Remote video metadata populated on the extractor-backed path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub title: Option<String>,
    pub url: Option<String>,
    pub referer: Option<String>,
    pub cookie_temp_path: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// A selected extractor format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFormat {
    pub id: String,
    pub resolution_label: String,
    pub video_codec: Option<String>,
    pub is_audio_only: bool,
    pub is_from_social_media: bool,
}

/// Sentinel format id requesting dynamic resolution-based selection.
pub const FORMAT_ID_USE_DYNAMIC: &str = "use-dynamic";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: u64,
    pub status: Status,
    pub is_running: bool,
    pub is_complete: bool,
    pub is_deleted: bool,
    pub is_removed: bool,
    pub is_waiting_for_network: bool,
    pub is_file_url_expired: bool,
    pub is_failed_to_access_file: bool,
    pub is_destination_file_missing: bool,
    pub extractor_problem: bool,
    pub extractor_problem_msg: Option<String>,

    #[serde(rename = "fileURL")]
    pub file_url: String,
    pub site_referrer: Option<String>,
    pub extra_headers: BTreeMap<String, String>,

    pub file_name: String,
    pub file_directory: String,
    pub file_mime_type: Option<String>,
    pub file_content_disposition: Option<String>,
    pub file_directory_uri: Option<String>,

    pub cookie_string: Option<String>,

    pub thumb_path: Option<String>,
    pub thumbnail_url: Option<String>,

    pub file_size: i64,
    pub is_unknown_file_size: bool,
    pub file_checksum: Option<String>,

    pub downloaded_byte: u64,
    pub progress_percentage: u8,

    pub part_starting_point: Vec<u64>,
    pub part_ending_point: Vec<u64>,
    pub part_chunk_sizes: Vec<u64>,
    pub parts_downloaded_byte: Vec<u64>,
    pub part_progress_percentage: Vec<u8>,

    pub start_time_date: i64,
    pub last_modified_time_date: i64,
    pub time_spent_in_milli_sec: i64,
    pub remaining_time_in_sec: i64,

    pub average_speed: u64,
    pub max_speed: u64,
    pub realtime_speed: u64,

    pub is_resume_supported: bool,
    pub is_multi_thread_supported: bool,

    pub resume_session_retry_count: u32,
    pub total_tracked_connection_retries: u64,

    pub video_info: Option<VideoInfo>,
    pub video_format: Option<VideoFormat>,
    pub temp_ytdlp_destination_file_path: Option<String>,
    pub temp_ytdlp_status_info: Option<String>,
    pub execution_command: Option<String>,
    pub is_basic_extractor_model_initialized: bool,

    pub is_smart_category_dir_processed: bool,
    pub media_file_playback_duration: Option<String>,

    pub global_settings: SettingsSnapshot,
}

impl Record {
    /// Create a new record for a direct-URL task with defaults derived from
    /// the settings snapshot. Part arrays are sized to
    /// `clamped_thread_connections()` and left zeroed until a probe fills in
    /// segment boundaries.
    pub fn new(id: u64, file_url: String, settings: SettingsSnapshot, now_ms: i64) -> Self {
        let n = settings.clamped_thread_connections();
        Record {
            id,
            status: Status::Closed,
            is_running: false,
            is_complete: false,
            is_deleted: false,
            is_removed: false,
            is_waiting_for_network: false,
            is_file_url_expired: false,
            is_failed_to_access_file: false,
            is_destination_file_missing: false,
            extractor_problem: false,
            extractor_problem_msg: None,
            file_url,
            site_referrer: None,
            extra_headers: BTreeMap::new(),
            file_name: String::new(),
            file_directory: String::new(),
            file_mime_type: None,
            file_content_disposition: None,
            file_directory_uri: None,
            cookie_string: None,
            thumb_path: None,
            thumbnail_url: None,
            file_size: -1,
            is_unknown_file_size: true,
            file_checksum: None,
            downloaded_byte: 0,
            progress_percentage: 0,
            part_starting_point: vec![0; n],
            part_ending_point: vec![0; n],
            part_chunk_sizes: vec![0; n],
            parts_downloaded_byte: vec![0; n],
            part_progress_percentage: vec![0; n],
            start_time_date: now_ms,
            last_modified_time_date: now_ms,
            time_spent_in_milli_sec: 0,
            remaining_time_in_sec: -1,
            average_speed: 0,
            max_speed: 0,
            realtime_speed: 0,
            is_resume_supported: false,
            is_multi_thread_supported: false,
            resume_session_retry_count: 0,
            total_tracked_connection_retries: 0,
            video_info: None,
            video_format: None,
            temp_ytdlp_destination_file_path: None,
            temp_ytdlp_status_info: None,
            execution_command: None,
            is_basic_extractor_model_initialized: false,
            is_smart_category_dir_processed: false,
            media_file_playback_duration: None,
            global_settings: settings,
        }
    }

    /// Updates `lastModifiedTimeDate`; no other fields.
    pub fn touch(&mut self, now_ms: i64) {
        self.last_modified_time_date = now_ms;
    }

    /// Applies the completion invariant atomically: 100% progress, every
    /// part fully accounted for, and zero realtime speed.
    pub fn mark_completed(&mut self, now_ms: i64) {
        self.status = Status::Complete;
        self.is_running = false;
        self.is_complete = true;
        self.progress_percentage = 100;
        self.downloaded_byte = self.file_size.max(0) as u64;
        for i in 0..self.part_progress_percentage.len() {
            self.part_progress_percentage[i] = 100;
            if let Some(chunk) = self.part_chunk_sizes.get(i).copied() {
                self.parts_downloaded_byte[i] = chunk;
            }
        }
        self.realtime_speed = 0;
        self.touch(now_ms);
    }

    /// Zeros `realtimeSpeed`; called before persistence so a stored snapshot
    /// never claims an in-flight transfer rate.
    pub fn reset_transients(&mut self) {
        self.realtime_speed = 0;
    }

    /// True iff the completion invariant currently holds.
    pub fn completion_invariant_holds(&self) -> bool {
        if self.status != Status::Complete {
            return true;
        }
        self.progress_percentage == 100
            && self.file_size >= 0
            && self.downloaded_byte == self.file_size as u64
            && self.realtime_speed == 0
            && self
                .part_progress_percentage
                .iter()
                .all(|&p| p == 100)
            && self
                .parts_downloaded_byte
                .iter()
                .zip(self.part_chunk_sizes.iter())
                .all(|(a, b)| a == b)
    }

    /// Final destination path, collapsing duplicate separators.
    pub fn destination_path(&self) -> PathBuf {
        collapse_join(&self.file_directory, &self.file_name)
    }

    /// Staging path used while the direct-transfer variant is still writing.
    pub fn temp_destination_path(&self) -> PathBuf {
        let mut p = self.destination_path().into_os_string();
        p.push(TEMP_SUFFIX);
        PathBuf::from(p)
    }

    /// Per-id cookie file path, present only if a cookie string was captured.
    pub fn cookie_file_path(&self, data_dir: &Path) -> Option<PathBuf> {
        self.cookie_string
            .as_ref()
            .filter(|s| !s.is_empty())
            .map(|_| data_dir.join(format!("{}_cookies.txt", self.id)))
    }

    pub fn json_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(format!("{}.json", self.id))
    }

    pub fn binary_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(format!("{}.dat", self.id))
    }

    pub fn thumbnail_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(format!("{}_download.jpg", self.id))
    }
}

fn collapse_join(dir: &str, name: &str) -> PathBuf {
    let dir_trimmed = dir.trim_end_matches('/');
    if dir_trimmed.is_empty() {
        return PathBuf::from(name);
    }
    PathBuf::from(format!("{}/{}", dir_trimmed, name.trim_start_matches('/')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;

    fn snap() -> SettingsSnapshot {
        EngineSettings::default().snapshot()
    }

    #[test]
    fn new_record_part_arrays_match_thread_connections() {
        let r = Record::new(1, "https://x/y".into(), snap(), 0);
        assert_eq!(r.part_starting_point.len(), 4);
        assert_eq!(r.part_ending_point.len(), 4);
    }

    #[test]
    fn mark_completed_satisfies_invariant() {
        let mut r = Record::new(1, "https://x/y".into(), snap(), 0);
        r.file_size = 400;
        r.part_chunk_sizes = vec![100, 100, 100, 100];
        r.parts_downloaded_byte = vec![0, 0, 0, 0];
        r.realtime_speed = 500;
        r.mark_completed(1000);
        assert!(r.completion_invariant_holds());
        assert_eq!(r.downloaded_byte, 400);
        assert_eq!(r.realtime_speed, 0);
        assert_eq!(r.last_modified_time_date, 1000);
    }

    #[test]
    fn touch_only_updates_last_modified() {
        let mut r = Record::new(1, "https://x/y".into(), snap(), 0);
        r.downloaded_byte = 42;
        r.touch(500);
        assert_eq!(r.last_modified_time_date, 500);
        assert_eq!(r.downloaded_byte, 42);
    }

    #[test]
    fn destination_path_collapses_separators() {
        let mut r = Record::new(1, "https://x/y".into(), snap(), 0);
        r.file_directory = "/data/downloads/".into();
        r.file_name = "/report.pdf".into();
        assert_eq!(r.destination_path(), PathBuf::from("/data/downloads/report.pdf"));
    }

    #[test]
    fn temp_destination_path_appends_suffix() {
        let mut r = Record::new(1, "https://x/y".into(), snap(), 0);
        r.file_directory = "/data".into();
        r.file_name = "f.bin".into();
        assert_eq!(
            r.temp_destination_path(),
            PathBuf::from("/data/f.bin.aio_download")
        );
    }

    #[test]
    fn cookie_file_path_absent_without_cookie_string() {
        let r = Record::new(1, "https://x/y".into(), snap(), 0);
        assert!(r.cookie_file_path(Path::new("/data")).is_none());
    }
}
