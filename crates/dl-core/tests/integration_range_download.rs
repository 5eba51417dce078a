//! End-to-end tests driving a full `TaskEngine` against the local range
//! server: multi-segment completion, completion when the server doesn't
//! support ranges, and resuming a transfer that already finished one segment.

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use dl_core::config::EngineSettings;
use dl_core::control::TaskControl;
use dl_core::engine::{Collaborators, EngineState, TaskEngine, TransferKind};
use dl_core::interfaces::{FilenameHelper, NetworkStatusProvider};
use dl_core::network_gate::NetworkStatus;
use dl_core::record::Record;
use dl_core::segmenter::plan_segments;
use dl_core::storage::StorageWriterBuilder;
use dl_core::store::RecordStore;

use common::range_server::{start, start_with_options, RangeServerOptions};

struct AlwaysOnline;
impl NetworkStatusProvider for AlwaysOnline {
    fn status(&self) -> NetworkStatus {
        NetworkStatus {
            network_available: true,
            internet_reachable: true,
            wifi_active: true,
        }
    }
}

struct PassthroughFilenameHelper;
impl FilenameHelper for PassthroughFilenameHelper {
    fn sanitize_extreme(&self, name: &str) -> String {
        name.to_string()
    }
    fn rename_if_exists(&self, _dir: &str, name: &str) -> String {
        name.to_string()
    }
    fn validate_existed_name(&self, _dir: &str, _name: &str) -> bool {
        true
    }
    fn find_file_starting_with(&self, _dir: &str, _prefix: &str) -> Option<PathBuf> {
        None
    }
    fn is_file_name_valid(&self, _name: &str) -> bool {
        true
    }
}

fn collaborators() -> Arc<Collaborators> {
    Arc::new(Collaborators {
        network: Arc::new(AlwaysOnline),
        extractor: None,
        cookie_procurement: None,
        filename_helper: Arc::new(PassthroughFilenameHelper),
        media_probe: None,
        completion_sound: None,
    })
}

fn new_record(id: u64, url: &str, dir: &std::path::Path, name: &str) -> Record {
    let settings = EngineSettings::default().snapshot();
    let mut r = Record::new(id, url.to_string(), settings, 0);
    r.file_directory = dir.to_string_lossy().into_owned();
    r.file_name = name.to_string();
    r
}

fn body_of(len: usize) -> Vec<u8> {
    (0u8..=255).cycle().take(len).collect()
}

#[tokio::test]
async fn direct_http_multi_segment_download_completes_and_file_matches() {
    let body = body_of(200 * 1024);
    let url = start(body.clone());

    let download_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RecordStore::new(data_dir.path()).unwrap());
    let control = Arc::new(TaskControl::new());

    let record = new_record(1, &url, download_dir.path(), "out.bin");
    let engine = TaskEngine::new(record, TransferKind::DirectHttp, store, control, collaborators(), data_dir.path());

    engine.start().await.expect("engine run failed");

    assert_eq!(engine.state(), EngineState::Completed);
    let content = std::fs::read(download_dir.path().join("out.bin")).unwrap();
    assert_eq!(content.len(), body.len());
    assert_eq!(content, body);
}

#[tokio::test]
async fn direct_http_without_range_support_still_completes_via_single_segment() {
    let body = body_of(64 * 1024);
    let url = start_with_options(
        body.clone(),
        RangeServerOptions {
            head_allowed: true,
            support_ranges: false,
            advertise_ranges: false,
        },
    );

    let download_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RecordStore::new(data_dir.path()).unwrap());
    let control = Arc::new(TaskControl::new());

    let record = new_record(2, &url, download_dir.path(), "out2.bin");
    let engine = TaskEngine::new(record, TransferKind::DirectHttp, store, control, collaborators(), data_dir.path());

    engine.start().await.expect("engine run failed");

    assert_eq!(engine.state(), EngineState::Completed);
    let content = std::fs::read(download_dir.path().join("out2.bin")).unwrap();
    assert_eq!(content, body);
}

#[tokio::test]
async fn direct_http_resumes_from_one_already_completed_segment() {
    let body = body_of(256 * 1024);
    let url = start(body.clone());

    let download_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RecordStore::new(data_dir.path()).unwrap());
    let control = Arc::new(TaskControl::new());

    let mut record = new_record(3, &url, download_dir.path(), "out3.bin");
    let total = body.len() as u64;
    let segment_count = record.global_settings.clamped_thread_connections();
    let segments = plan_segments(total, segment_count);

    record.file_size = total as i64;
    record.is_unknown_file_size = false;
    record.is_resume_supported = true;
    record.is_multi_thread_supported = true;

    record.part_starting_point = segments.iter().map(|s| s.start).collect();
    record.part_ending_point = segments.iter().map(|s| s.end).collect();
    record.part_chunk_sizes = segments.iter().map(|s| s.len()).collect();
    record.parts_downloaded_byte = vec![0; segments.len()];
    record.part_progress_percentage = vec![0; segments.len()];
    // Simulate a prior run that finished the first segment before being interrupted.
    record.parts_downloaded_byte[0] = segments[0].len();
    record.part_progress_percentage[0] = 100;

    let temp_path = record.temp_destination_path();
    if let Some(parent) = temp_path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    {
        let mut builder = StorageWriterBuilder::create(&temp_path).unwrap();
        builder.preallocate(total).unwrap();
        let writer = builder.build();
        let seg0 = segments[0];
        let slice = &body[seg0.start as usize..seg0.end as usize];
        writer.write_at(seg0.start, slice).unwrap();
        writer.sync().unwrap();
    }

    let engine = TaskEngine::new(record, TransferKind::DirectHttp, store, control, collaborators(), data_dir.path());
    engine.start().await.expect("engine run failed");

    assert_eq!(engine.state(), EngineState::Completed);
    let content = std::fs::read(download_dir.path().join("out3.bin")).unwrap();
    assert_eq!(content.len(), body.len());
    assert_eq!(content, body);
}
