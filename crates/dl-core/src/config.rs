//! Engine settings loaded from `~/.config/<app>/config.toml`.
//!
//! `EngineSettings` is the on-disk, mutable configuration surface. A
//! `SettingsSnapshot` is an explicit structural clone taken at task-creation
//! time so that later edits to the live config never perturb a task that is
//! already running.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Where downloaded files are rooted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadLocation {
    PrivateFolder,
    SystemGallery,
}

/// Global engine configuration, persisted as TOML under the XDG config dir.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub default_download_location: DownloadLocation,
    /// Upper bound on simultaneous tasks engine-wide (not per-task).
    pub default_parallel_connections: usize,
    /// Number of segments for multi-part downloads (1..=18).
    pub default_thread_connections: usize,
    /// Per-segment read buffer size in bytes.
    pub download_buffer_size: usize,
    pub download_http_proxy_server: Option<String>,
    pub download_http_user_agent: String,
    /// Socket read timeout, seconds.
    pub download_max_http_reading_timeout: u64,
    /// Bytes/s, 0 = unlimited.
    pub download_max_network_speed: u64,
    pub auto_resume: bool,
    pub auto_resume_max_errors: u32,
    pub auto_remove_tasks: bool,
    pub auto_remove_task_after_n_days: u32,
    pub download_verify_checksum: bool,
    pub download_wifi_only: bool,
    pub download_play_notification_sound: bool,
    pub download_hide_notification: bool,
}

pub const MAX_THREAD_CONNECTIONS: usize = 18;

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_download_location: DownloadLocation::PrivateFolder,
            default_parallel_connections: 3,
            default_thread_connections: 4,
            download_buffer_size: 64 * 1024,
            download_http_proxy_server: None,
            download_http_user_agent: "dl-core/1.0".to_string(),
            download_max_http_reading_timeout: 30,
            download_max_network_speed: 0,
            auto_resume: true,
            auto_resume_max_errors: 5,
            auto_remove_tasks: false,
            auto_remove_task_after_n_days: 30,
            download_verify_checksum: false,
            download_wifi_only: false,
            download_play_notification_sound: true,
            download_hide_notification: false,
        }
    }
}

impl EngineSettings {
    /// Effective retry budget honoring `autoResume`: disabling auto-resume
    /// forces the budget to zero regardless of the configured max.
    pub fn effective_auto_resume_max_errors(&self) -> u32 {
        if self.auto_resume {
            self.auto_resume_max_errors
        } else {
            0
        }
    }

    /// Clamp `default_thread_connections` into the valid 1..=18 range.
    pub fn clamped_thread_connections(&self) -> usize {
        self.default_thread_connections.clamp(1, MAX_THREAD_CONNECTIONS)
    }

    /// Take an explicit structural clone for a newly created task. Later
    /// mutation of `self` (or the on-disk file) must never be observed by
    /// a task holding a snapshot.
    pub fn snapshot(&self) -> SettingsSnapshot {
        SettingsSnapshot(self.clone())
    }
}

/// A deep copy of `EngineSettings` taken at task-creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsSnapshot(pub EngineSettings);

impl std::ops::Deref for SettingsSnapshot {
    type Target = EngineSettings;
    fn deref(&self) -> &EngineSettings {
        &self.0
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("dl-core")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<EngineSettings> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = EngineSettings::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default settings at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: EngineSettings = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_values() {
        let cfg = EngineSettings::default();
        assert_eq!(cfg.default_thread_connections, 4);
        assert_eq!(cfg.auto_resume_max_errors, 5);
        assert!(!cfg.download_wifi_only);
    }

    #[test]
    fn settings_toml_roundtrip() {
        let cfg = EngineSettings::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: EngineSettings = toml::from_str(&toml).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn auto_resume_disabled_forces_zero_budget() {
        let mut cfg = EngineSettings::default();
        cfg.auto_resume = false;
        cfg.auto_resume_max_errors = 5;
        assert_eq!(cfg.effective_auto_resume_max_errors(), 0);
    }

    #[test]
    fn thread_connections_clamped_to_18() {
        let mut cfg = EngineSettings::default();
        cfg.default_thread_connections = 99;
        assert_eq!(cfg.clamped_thread_connections(), MAX_THREAD_CONNECTIONS);
        cfg.default_thread_connections = 0;
        assert_eq!(cfg.clamped_thread_connections(), 1);
    }

    #[test]
    fn snapshot_is_independent_of_later_mutation() {
        let mut cfg = EngineSettings::default();
        let snap = cfg.snapshot();
        cfg.download_wifi_only = true;
        assert!(!snap.download_wifi_only);
    }
}
