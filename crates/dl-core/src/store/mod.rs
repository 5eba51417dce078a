//! Dual-format Record persistence: per-record JSON (canonical, auditable)
//! and per-record binary (fast), plus cookie-file side effects and the
//! Merger that consolidates everything into one snapshot.

pub mod binary;
pub mod cookies;
pub mod merger;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::record::Record;
use binary::StoreError;

/// Default on-disk home for task records: the XDG state dir, same prefix as
/// logging and the control socket.
pub fn default_data_dir() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("dl-core")?.get_state_home();
    Ok(dir.join("tasks"))
}

/// Persists and reloads `Record`s. Writes for a given id are serialized via
/// a per-store lock; writes to different ids may proceed concurrently at
/// the filesystem level (the lock here is coarse but correctness-preserving;
/// see DESIGN.md for the single-process assumption this rests on).
pub struct RecordStore {
    data_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl RecordStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(RecordStore {
            data_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Persist `record`. I/O failures are logged and swallowed, matching
    /// the propagation policy for this layer: a failed persist must not
    /// abort an in-flight task.
    pub fn save(&self, record: &mut Record) {
        let _guard = self.write_lock.lock().unwrap();

        if let Some(cookie_string) = record.cookie_string.clone() {
            if !cookie_string.is_empty() {
                let path = self.data_dir.join(format!("{}_cookies.txt", record.id));
                if let Err(e) = cookies::write_cookie_file(&path, &cookie_string) {
                    tracing::warn!(id = record.id, error = %e, "failed to write cookie file");
                }
            }
        }

        record.reset_transients();
        if record.status == crate::record::Status::Complete {
            record.mark_completed(record.last_modified_time_date);
        }

        let bin_path = record.binary_path(&self.data_dir);
        match binary::encode_record(record) {
            Ok(bytes) => {
                if let Err(e) = fs::write(&bin_path, bytes) {
                    tracing::warn!(id = record.id, error = %e, "failed to write binary record");
                }
            }
            Err(e) => tracing::warn!(id = record.id, error = %e, "failed to encode binary record"),
        }

        let json_path = record.json_path(&self.data_dir);
        match serde_json::to_vec_pretty(record) {
            Ok(bytes) => {
                if let Err(e) = fs::write(&json_path, bytes) {
                    tracing::warn!(id = record.id, error = %e, "failed to write json record");
                }
            }
            Err(e) => tracing::warn!(id = record.id, error = %e, "failed to encode json record"),
        }
    }

    /// Load a record given its JSON path. Tries the binary mirror first;
    /// on failure or absence falls back to JSON. A successful binary load
    /// re-runs `save` to refresh the JSON mirror. A corrupted binary file
    /// is deleted on the failure path so it doesn't keep shadowing JSON.
    pub fn load(&self, json_path: &Path) -> Result<Record, StoreError> {
        let id = id_from_json_path(json_path);
        let bin_path = self.data_dir.join(format!("{}.dat", id));

        if bin_path.exists() {
            match fs::read(&bin_path).map_err(StoreError::Io).and_then(|b| binary::decode_record(&b)) {
                Ok(mut record) => {
                    self.save(&mut record);
                    return Ok(record);
                }
                Err(e) => {
                    tracing::warn!(id, error = %e, "corrupt binary record, deleting and falling back to json");
                    let _ = fs::remove_file(&bin_path);
                }
            }
        }

        let data = fs::read(json_path).map_err(StoreError::Io)?;
        let record: Record = serde_json::from_slice(&data)?;
        Ok(record)
    }

    /// Remove every on-disk trace of `record`: JSON, binary, cookies,
    /// thumbnail, any temp fragments sharing the extractor staging
    /// basename, and (if the destination is the private folder) the
    /// downloaded file itself.
    pub fn delete_from_disk(&self, record: &Record, delete_destination_file: bool) {
        let _guard = self.write_lock.lock().unwrap();

        let _ = fs::remove_file(record.json_path(&self.data_dir));
        let _ = fs::remove_file(record.binary_path(&self.data_dir));
        let _ = fs::remove_file(self.data_dir.join(format!("{}_cookies.txt", record.id)));
        let _ = fs::remove_file(record.thumbnail_path(&self.data_dir));

        if let Some(base) = record
            .temp_ytdlp_destination_file_path
            .as_deref()
            .and_then(|p| Path::new(p).file_name())
            .and_then(|n| n.to_str())
        {
            if let Ok(entries) = fs::read_dir(&self.data_dir) {
                for entry in entries.flatten() {
                    if entry
                        .file_name()
                        .to_str()
                        .map(|n| n.starts_with(base))
                        .unwrap_or(false)
                    {
                        let _ = fs::remove_file(entry.path());
                    }
                }
            }
        }

        if delete_destination_file {
            let _ = fs::remove_file(record.destination_path());
        }
    }
}

fn id_from_json_path(json_path: &Path) -> u64 {
    json_path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}
