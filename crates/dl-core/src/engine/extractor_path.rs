//! Extractor-backed (`TransferKind::ExtractorBacked`) run logic: format
//! selection, child-process dispatch through the configured `Extractor`
//! collaborator, throttled progress-callback wiring, output classification
//! on failure, and the post-success MP4 relocate-and-finalize sequence.

use std::path::Path;
use std::sync::Arc;

use crate::extractor::{build_args, relocate_moov, validate_for_relocation};
use crate::interfaces::ExtractorRequest;
use crate::retry::tags::classify_extractor_output;
use crate::url_model;

use super::{now_ms, RunOutcome, TaskEngine, UserMessage};

pub(super) async fn run(engine: &Arc<TaskEngine>) -> RunOutcome {
    let Some(extractor) = engine.collaborators.extractor.clone() else {
        tracing::error!(id = engine.id(), "extractor-backed task has no configured extractor collaborator");
        return RunOutcome::Fatal(UserMessage::DownloadFailed);
    };

    let prefix = format!("{}_ytdlp_download", engine.id());
    let temp_dest = engine.data_dir().join(format!("{prefix}.%(ext)s"));

    let (url, format, settings, file_name, cookie_path, known_platform) = {
        let r = engine.record.lock().unwrap();
        (
            r.file_url.clone(),
            r.video_format.clone().unwrap_or_default(),
            r.global_settings.clone(),
            r.file_name.clone(),
            r.cookie_file_path(engine.data_dir()).map(|p| p.to_string_lossy().into_owned()),
            url_model::is_youtube_url(&r.file_url),
        )
    };

    engine.with_record(|r| r.temp_ytdlp_destination_file_path = Some(temp_dest.to_string_lossy().into_owned()));
    // flush the record so the cookie file build_args points at actually exists on disk.
    engine.persist();

    let args = build_args(
        &format,
        &settings,
        &url,
        &temp_dest.to_string_lossy(),
        &file_name,
        cookie_path.as_deref(),
        known_platform,
    );

    let progress_engine = Arc::clone(engine);
    let mut last_update_ms = 0i64;
    let on_progress = Box::new(move |pct: f32, status: &str| {
        let now = now_ms();
        if pct >= 0.0 && now - last_update_ms < 500 {
            return;
        }
        last_update_ms = now;
        progress_engine.with_record(|r| {
            r.temp_ytdlp_status_info = Some(status.to_string());
            if pct >= 0.0 {
                r.progress_percentage = pct.clamp(0.0, 100.0) as u8;
            }
        });
        progress_engine.mark_progress();
    });

    let request = ExtractorRequest {
        url: url.clone(),
        args,
        on_progress,
    };

    let result = extractor.invoke(engine.id(), request).await;

    match result {
        Ok(res) if res.exit_code == 0 => finalize_success(engine, &prefix, cookie_path.as_deref()),
        Ok(res) => classify_failure(engine, &res.stdout_tail),
        Err(e) => {
            tracing::warn!(id = engine.id(), error = %e, "extractor invoke failed");
            if engine.is_abort_requested() {
                RunOutcome::Aborted
            } else if engine.retry_budget_remaining() {
                RunOutcome::ForcedRestart
            } else {
                RunOutcome::Fatal(UserMessage::DownloadFailed)
            }
        }
    }
}

fn classify_failure(engine: &Arc<TaskEngine>, tail: &str) -> RunOutcome {
    if engine.is_abort_requested() {
        return RunOutcome::Aborted;
    }
    if let Some(tag) = classify_extractor_output(tail) {
        return RunOutcome::Fatal(UserMessage::from_problem_tag(tag));
    }
    if engine.retry_budget_remaining() {
        RunOutcome::ForcedRestart
    } else {
        RunOutcome::Fatal(UserMessage::DownloadFailed)
    }
}

/// Locates the staged output, relocates `moov` ahead of `mdat` for mp4
/// outputs (falling back to a plain move on any relocation error), removes
/// the staging file and temp cookie file, and records the final size.
fn finalize_success(engine: &Arc<TaskEngine>, prefix: &str, cookie_path: Option<&str>) -> RunOutcome {
    let data_dir = engine.data_dir().to_path_buf();
    let helper = Arc::clone(&engine.collaborators.filename_helper);
    let staged = match helper.find_file_starting_with(&data_dir.to_string_lossy(), prefix) {
        Some(p) => p,
        None => {
            tracing::warn!(id = engine.id(), "extractor reported success but no staged output file was found");
            return RunOutcome::Fatal(UserMessage::DownloadFailed);
        }
    };

    let final_path = engine.with_record(|r| r.destination_path());
    if let Some(parent) = final_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!(id = engine.id(), error = %e, "failed to create destination directory");
            return RunOutcome::Fatal(UserMessage::DownloadIoFailed);
        }
    }

    let is_mp4 = staged
        .extension()
        .map(|e| e.eq_ignore_ascii_case("mp4"))
        .unwrap_or(false);

    let relocated = is_mp4 && try_relocate(&staged, &final_path);

    if !relocated {
        if let Err(e) = move_or_copy(&staged, &final_path) {
            tracing::warn!(id = engine.id(), error = %e, "failed to move staged extractor output to destination");
            return RunOutcome::Fatal(UserMessage::DownloadIoFailed);
        }
    }

    if let Some(cookie_path) = cookie_path {
        let _ = std::fs::remove_file(cookie_path);
    }

    let size = std::fs::metadata(&final_path).map(|m| m.len()).unwrap_or(0);
    engine.with_record(|r| {
        r.file_size = size as i64;
        r.downloaded_byte = size;
        r.part_starting_point = vec![0];
        r.part_ending_point = vec![size];
        r.part_chunk_sizes = vec![size];
        r.parts_downloaded_byte = vec![size];
        r.part_progress_percentage = vec![100];
    });

    RunOutcome::Completed
}

fn try_relocate(staged: &Path, final_path: &Path) -> bool {
    let dest_dir = final_path.parent().unwrap_or_else(|| Path::new("."));
    if validate_for_relocation(staged, dest_dir).is_err() {
        return false;
    }
    match relocate_moov(staged, final_path) {
        Ok(()) => {
            let _ = std::fs::remove_file(staged);
            true
        }
        Err(e) => {
            tracing::debug!(error = %e, "mp4 relocation skipped, falling back to a plain move");
            false
        }
    }
}

fn move_or_copy(staged: &Path, final_path: &Path) -> std::io::Result<()> {
    if std::fs::rename(staged, final_path).is_ok() {
        return Ok(());
    }
    std::fs::copy(staged, final_path)?;
    std::fs::remove_file(staged)
}
