//! Background daemon that periodically consolidates individual record JSON
//! snapshots into one merged binary file.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use crate::record::Record;
use crate::store::binary::{self, StoreError};

pub const MERGED_FILE_NAME: &str = "merged_data_binary.dat";
const TICK_PERIOD: Duration = Duration::from_secs(5);

pub struct Merger {
    data_dir: PathBuf,
    merging: AtomicBool,
}

impl Merger {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Merger {
            data_dir: data_dir.into(),
            merging: AtomicBool::new(false),
        }
    }

    fn merged_path(&self) -> PathBuf {
        self.data_dir.join(MERGED_FILE_NAME)
    }

    /// Per-record JSON files in the data dir, excluding anything whose name
    /// contains "temp" (staging artifacts, not records).
    fn record_json_paths(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(".json") && !name.contains("temp") {
                out.push(entry.path());
            }
        }
        Ok(out)
    }

    fn mtime(path: &Path) -> Option<SystemTime> {
        fs::metadata(path).ok()?.modified().ok()
    }

    /// Rebuild the merged snapshot if any record JSON is newer than the
    /// merged file (or the merged file is absent). Single-flight: a
    /// concurrent call while a rebuild is in progress is a no-op.
    pub fn maybe_rebuild(&self) -> std::io::Result<()> {
        if self
            .merging
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        let result = self.maybe_rebuild_inner();
        self.merging.store(false, Ordering::Release);
        result
    }

    fn maybe_rebuild_inner(&self) -> std::io::Result<()> {
        let json_paths = self.record_json_paths()?;
        let merged_mtime = Self::mtime(&self.merged_path());

        let stale = match merged_mtime {
            None => !json_paths.is_empty(),
            Some(merged) => json_paths
                .iter()
                .filter_map(|p| Self::mtime(p))
                .any(|m| m > merged),
        };
        if !stale {
            return Ok(());
        }

        let mut by_id: HashMap<u64, Record> = HashMap::new();
        for path in &json_paths {
            if let Ok(data) = fs::read(path) {
                if let Ok(record) = serde_json::from_slice::<Record>(&data) {
                    by_id.insert(record.id, record);
                }
            }
        }

        let mut records: Vec<&Record> = by_id.values().collect();
        records.sort_by_key(|r| r.id);

        let mut out = Vec::new();
        out.extend_from_slice(&(records.len() as u32).to_le_bytes());
        for r in &records {
            let encoded = binary::encode_record(r).unwrap_or_default();
            out.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
            out.extend_from_slice(&encoded);
        }

        let tmp_path = self.data_dir.join(format!("{}.tmp", MERGED_FILE_NAME));
        fs::write(&tmp_path, out)?;
        fs::rename(&tmp_path, self.merged_path())?;
        Ok(())
    }

    /// Returns the merged snapshot iff every individual JSON's mtime is
    /// `<=` the merged file's mtime (nothing touched since consolidation).
    pub fn load_if_fresh(&self) -> Result<Option<Vec<Record>>, StoreError> {
        let merged_path = self.merged_path();
        let Some(merged_mtime) = Self::mtime(&merged_path) else {
            return Ok(None);
        };

        let json_paths = self.record_json_paths().map_err(StoreError::Io)?;
        let any_newer = json_paths
            .iter()
            .filter_map(|p| Self::mtime(p))
            .any(|m| m > merged_mtime);
        if any_newer {
            return Ok(None);
        }

        let data = fs::read(&merged_path).map_err(StoreError::Io)?;
        let mut pos = 0usize;
        let count = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            let len = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            let record = binary::decode_record(&data[pos..pos + len])?;
            pos += len;
            records.push(record);
        }
        Ok(Some(records))
    }

    /// Runs the 5s-period consolidation loop until the process shuts down.
    pub async fn run_loop(&self) {
        loop {
            if let Err(e) = self.maybe_rebuild() {
                tracing::warn!(error = %e, "merger rebuild failed");
            }
            tokio::time::sleep(TICK_PERIOD).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;
    use crate::store::RecordStore;

    fn sample(id: u64) -> Record {
        Record::new(
            id,
            "https://example.com/a".into(),
            EngineSettings::default().snapshot(),
            1000,
        )
    }

    #[test]
    fn rebuilds_when_stale_and_loads_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path()).unwrap();
        let merger = Merger::new(dir.path());

        for id in [1, 2, 3] {
            let mut r = sample(id);
            store.save(&mut r);
        }

        merger.maybe_rebuild().unwrap();
        let loaded = merger.load_if_fresh().unwrap();
        assert!(loaded.is_some());
        assert_eq!(loaded.unwrap().len(), 3);
    }

    #[test]
    fn stale_after_touching_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path()).unwrap();
        let merger = Merger::new(dir.path());

        let mut r1 = sample(1);
        store.save(&mut r1);
        merger.maybe_rebuild().unwrap();
        assert!(merger.load_if_fresh().unwrap().is_some());

        std::thread::sleep(Duration::from_millis(20));
        let mut r2 = sample(1);
        r2.downloaded_byte = 99;
        store.save(&mut r2);

        assert!(merger.load_if_fresh().unwrap().is_none());
        merger.maybe_rebuild().unwrap();
        assert!(merger.load_if_fresh().unwrap().is_some());
    }
}
