//! Command implementations. Each one loads or builds a `Record`, wires the
//! engine's external collaborators, and calls straight into `dl_core`'s
//! public API — no download logic lives here.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use dl_core::config;
use dl_core::control::TaskControl;
use dl_core::engine::{Collaborators, TaskEngine, TransferKind, UserMessage};
use dl_core::extractor::ProcessExtractor;
use dl_core::record::{Record, Status, VideoFormat, FORMAT_ID_USE_DYNAMIC};
use dl_core::store::{default_data_dir, RecordStore};
use dl_core::url_model;

use crate::collaborators::{LocalFilenameHelper, SystemNetwork, TerminalBell};

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn open_store() -> Result<(RecordStore, PathBuf)> {
    let dir = default_data_dir().context("resolve task data directory")?;
    let store = RecordStore::new(&dir).context("open record store")?;
    Ok((store, dir))
}

fn load_record(store: &RecordStore, data_dir: &Path, id: u64) -> Result<Record> {
    let json_path = data_dir.join(format!("{id}.json"));
    store.load(&json_path).with_context(|| format!("no such task: {id}"))
}

fn build_collaborators(extractor_backed: bool) -> Arc<Collaborators> {
    Arc::new(Collaborators {
        network: Arc::new(SystemNetwork),
        extractor: if extractor_backed {
            let bin = std::env::var("DL_CORE_EXTRACTOR_BIN").unwrap_or_else(|_| "yt-dlp".to_string());
            Some(Arc::new(ProcessExtractor::new(bin)))
        } else {
            None
        },
        cookie_procurement: None,
        filename_helper: Arc::new(LocalFilenameHelper),
        media_probe: None,
        completion_sound: Some(Arc::new(TerminalBell)),
    })
}

pub async fn start(url: &str, dir: Option<&Path>) -> Result<()> {
    let (store, data_dir) = open_store()?;
    let cfg = config::load_or_init().context("load settings")?;

    let is_extractor_backed = url_model::is_youtube_url(url) || url_model::is_social_media_url(url);

    let mut id = now_ms() as u64;
    while data_dir.join(format!("{id}.json")).exists() {
        id += 1;
    }

    let download_dir = match dir {
        Some(d) => d.to_path_buf(),
        None => std::env::current_dir().context("determine current directory")?,
    };

    let mut record = Record::new(id, url.to_string(), cfg.snapshot(), now_ms());
    record.file_directory = download_dir.to_string_lossy().into_owned();
    record.file_name = url_model::derive_filename(url, None);

    let kind = if is_extractor_backed {
        record.video_format = Some(VideoFormat {
            id: FORMAT_ID_USE_DYNAMIC.to_string(),
            resolution_label: "1080p".to_string(),
            video_codec: None,
            is_audio_only: false,
            is_from_social_media: url_model::is_social_media_url(url),
        });
        TransferKind::ExtractorBacked
    } else {
        TransferKind::DirectHttp
    };

    println!("started task {id}: {url}");
    run_engine(record, kind, store, data_dir).await
}

pub async fn resume(id: u64) -> Result<()> {
    let (store, data_dir) = open_store()?;
    let record = load_record(&store, &data_dir, id)?;
    if record.status == Status::Complete {
        println!("task {id} is already complete");
        return Ok(());
    }
    let kind = if record.video_format.is_some() {
        TransferKind::ExtractorBacked
    } else {
        TransferKind::DirectHttp
    };
    run_engine(record, kind, store, data_dir).await
}

async fn run_engine(record: Record, kind: TransferKind, store: RecordStore, data_dir: PathBuf) -> Result<()> {
    let id = record.id;
    let store = Arc::new(store);
    let control = Arc::new(TaskControl::new());
    let collaborators = build_collaborators(matches!(kind, TransferKind::ExtractorBacked));
    let engine = TaskEngine::new(record, kind, store, control, collaborators, data_dir);

    let run_handle = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.start().await })
    };

    tokio::select! {
        result = run_handle => {
            result.context("engine task panicked")?.context("engine run failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            println!("caught Ctrl-C, pausing task {id}...");
            engine.pause();
        }
    }

    println!("task {id} finished in state {:?}", engine.state());
    Ok(())
}

pub fn pause(id: u64) -> Result<()> {
    set_closed(id, UserMessage::Paused)
}

pub fn cancel(id: u64) -> Result<()> {
    set_closed(id, UserMessage::Cancelled)
}

/// Mirrors the record transition `TaskEngine::start()` applies on
/// `RunOutcome::Aborted`. There is no resident daemon to signal here, so a
/// `pause`/`cancel` invocation against a task with no engine running in this
/// process just applies that same transition to the persisted record.
fn set_closed(id: u64, reason: UserMessage) -> Result<()> {
    let (store, data_dir) = open_store()?;
    let mut record = load_record(&store, &data_dir, id)?;
    record.status = Status::Closed;
    record.is_running = false;
    record.extractor_problem_msg = Some(reason.as_str().to_string());
    store.save(&mut record);
    println!("task {id}: {}", reason.as_str());
    Ok(())
}

pub fn delete(id: u64, delete_file: bool) -> Result<()> {
    let (store, data_dir) = open_store()?;
    let record = load_record(&store, &data_dir, id)?;
    store.delete_from_disk(&record, delete_file);
    println!("deleted task {id}");
    Ok(())
}

pub fn status(id: Option<u64>) -> Result<()> {
    let (store, data_dir) = open_store()?;

    let ids: Vec<u64> = match id {
        Some(id) => vec![id],
        None => {
            let mut ids = Vec::new();
            if let Ok(entries) = std::fs::read_dir(&data_dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    if let Some(id) = path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse().ok()) {
                        ids.push(id);
                    }
                }
            }
            ids.sort_unstable();
            ids
        }
    };

    if ids.is_empty() {
        println!("no tasks.");
        return Ok(());
    }

    println!("{:<12} {:<10} {:<6} {:<10} {}", "ID", "STATUS", "PCT", "SIZE", "URL");
    for id in ids {
        let record = match load_record(&store, &data_dir, id) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(id, error = %e, "skipping unreadable task record");
                continue;
            }
        };
        let size = if record.file_size >= 0 {
            record.file_size.to_string()
        } else {
            "-".to_string()
        };
        println!(
            "{:<12} {:<10} {:<6} {:<10} {}",
            record.id,
            format!("{:?}", record.status).to_lowercase(),
            record.progress_percentage,
            size,
            record.file_url
        );
    }
    Ok(())
}
