//! Direct-transfer (`TransferKind::DirectHttp`) run logic: HEAD probe,
//! segment planning, a bounded worker pool of range-request segments (or a
//! single-stream fallback when the server doesn't support ranges), and
//! post-transfer finalize.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::downloader::{download_segments, single::download_single, CurlOptions, DownloadSummary};
use crate::fetch_head;
use crate::progress::{apply_tick, Tick};
use crate::record::Record;
use crate::retry::RetryPolicy;
use crate::segmenter::{plan_segments, Segment, SegmentBitmap};
use crate::storage::{StorageWriter, StorageWriterBuilder};
use crate::url_model;

use super::{now_ms, RunOutcome, TaskEngine, UserMessage};

pub(super) async fn run(engine: &Arc<TaskEngine>) -> RunOutcome {
    if let Some(outcome) = ensure_probed(engine).await {
        return outcome;
    }

    let (url, headers, file_size, is_multipart, thread_count, max_speed, buffer_size, temp_path, final_path) = {
        let r = engine.record.lock().unwrap();
        (
            r.file_url.clone(),
            headers_of(&r),
            r.file_size,
            r.is_multi_thread_supported,
            r.global_settings.clamped_thread_connections(),
            r.global_settings.download_max_network_speed,
            r.global_settings.download_buffer_size,
            r.temp_destination_path(),
            r.destination_path(),
        )
    };

    if file_size <= 0 {
        return run_unknown_size(engine, &url, &headers, &temp_path, &final_path, max_speed, buffer_size).await;
    }

    let segment_count = if is_multipart { thread_count } else { 1 };
    let segments = plan_segments(file_size as u64, segment_count);
    let resuming = ensure_part_arrays(engine, &segments);

    let storage = match open_or_create_storage(&temp_path, file_size as u64, resuming) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(id = engine.id(), error = %e, "failed to prepare staging file");
            engine.with_record(|r| r.is_failed_to_access_file = true);
            return RunOutcome::Fatal(UserMessage::DownloadIoFailed);
        }
    };

    let mut bitmap = bitmap_from_record(&engine.snapshot(), &segments);
    let curl = CurlOptions::per_handle(non_zero(max_speed), segments.len(), Some(buffer_size));
    let abort = engine.abort_token();
    let in_flight: Arc<Vec<AtomicU64>> = Arc::new((0..segments.len()).map(|_| AtomicU64::new(0)).collect());

    let done_flag = Arc::new(AtomicBool::new(false));
    let progress_handle = spawn_progress_ticker(engine, Arc::clone(&in_flight), Arc::clone(&done_flag));

    let policy = RetryPolicy::default();
    let blocking_storage = storage.clone();
    let blocking_segments = segments.clone();
    let blocking_headers = headers.clone();
    let blocking_url = url.clone();
    let blocking_in_flight = Arc::clone(&in_flight);
    let mut blocking_bitmap = bitmap.clone();
    let result = tokio::task::spawn_blocking(move || {
        let mut summary_out = DownloadSummary::default();
        let r = download_segments(
            &blocking_url,
            &blocking_headers,
            &blocking_segments,
            &blocking_storage,
            &mut blocking_bitmap,
            Some(blocking_segments.len()),
            Some(&policy),
            &mut summary_out,
            None,
            Some(blocking_in_flight),
            abort,
            curl,
        );
        (r, blocking_bitmap, summary_out)
    })
    .await;

    done_flag.store(true, Ordering::Relaxed);
    let _ = progress_handle.await;

    let (outcome, final_bitmap) = match result {
        Ok((Ok(()), final_bitmap, _s)) => (None, final_bitmap),
        Ok((Err(_e), final_bitmap, _s)) => {
            if engine.is_abort_requested() {
                (Some(RunOutcome::Aborted), final_bitmap)
            } else if engine.retry_budget_remaining() {
                (Some(RunOutcome::ForcedRestart), final_bitmap)
            } else {
                (Some(RunOutcome::Fatal(UserMessage::DownloadFailed)), final_bitmap)
            }
        }
        Err(_join_err) => (Some(RunOutcome::Fatal(UserMessage::DownloadFailed)), bitmap.clone()),
    };
    bitmap = final_bitmap;

    persist_part_progress(engine, &segments, &bitmap);

    if let Some(outcome) = outcome {
        return outcome;
    }

    if let Err(e) = storage.sync() {
        tracing::warn!(id = engine.id(), error = %e, "sync before finalize failed");
        return RunOutcome::Fatal(UserMessage::DownloadIoFailed);
    }

    let verify = engine.record.lock().unwrap().global_settings.download_verify_checksum;
    if verify {
        if let Some(expected) = engine.record.lock().unwrap().file_checksum.clone() {
            match crate::checksum::sha256_path(storage.temp_path()) {
                Ok(actual) if actual.eq_ignore_ascii_case(&expected) => {}
                _ => {
                    tracing::warn!(id = engine.id(), "checksum mismatch after direct transfer");
                    return RunOutcome::Fatal(UserMessage::DownloadFailed);
                }
            }
        }
    }

    if let Err(e) = storage.finalize(&final_path) {
        tracing::warn!(id = engine.id(), error = %e, "finalize rename failed");
        return RunOutcome::Fatal(UserMessage::DownloadIoFailed);
    }

    engine.with_record(|r| r.downloaded_byte = r.file_size.max(0) as u64);
    RunOutcome::Completed
}

fn headers_of(r: &Record) -> HashMap<String, String> {
    r.extra_headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

fn non_zero(v: u64) -> Option<u64> {
    if v == 0 {
        None
    } else {
        Some(v)
    }
}

/// First attempt only: fills in size/resume/checksum facts from a HEAD
/// probe. Subsequent forced restarts skip this since `fileSize` is already
/// known.
async fn ensure_probed(engine: &Arc<TaskEngine>) -> Option<RunOutcome> {
    let already_probed = engine.record.lock().unwrap().file_size >= 0;
    if already_probed {
        return None;
    }

    let (url, headers) = {
        let r = engine.record.lock().unwrap();
        (r.file_url.clone(), headers_of(&r))
    };
    let remote = tokio::task::spawn_blocking(move || fetch_head::probe_remote_file_info(&url, &headers))
        .await
        .ok()?;

    if remote.is_forbidden {
        let expired = url_model::is_url_expired(&engine.record.lock().unwrap().file_url);
        return Some(if expired {
            engine.with_record(|r| r.is_file_url_expired = true);
            RunOutcome::Fatal(UserMessage::LinkExpired)
        } else if engine.retry_budget_remaining() {
            RunOutcome::ForcedRestart
        } else {
            RunOutcome::Fatal(UserMessage::DownloadFailed)
        });
    }

    engine.with_record(|r| {
        if r.file_name.is_empty() {
            r.file_name = remote.file_name.clone();
        }
        r.file_size = remote.file_size;
        r.is_unknown_file_size = remote.file_size < 0;
        r.is_resume_supported = remote.supports_resume;
        r.is_multi_thread_supported = remote.supports_multipart;
        if remote.file_checksum.is_some() {
            r.file_checksum = remote.file_checksum.clone();
        }
    });
    None
}

/// Resizes the per-part tracking arrays to match `segments`. Returns true
/// if the arrays already matched the plan (a resume of an in-progress
/// transfer with the same segmentation), false if they were reset.
fn ensure_part_arrays(engine: &Arc<TaskEngine>, segments: &[Segment]) -> bool {
    let mut r = engine.record.lock().unwrap();
    if r.part_chunk_sizes.len() == segments.len()
        && r.part_chunk_sizes
            .iter()
            .zip(segments.iter())
            .all(|(&chunk, seg)| chunk == seg.len())
    {
        return true;
    }
    r.part_starting_point = segments.iter().map(|s| s.start).collect();
    r.part_ending_point = segments.iter().map(|s| s.end).collect();
    r.part_chunk_sizes = segments.iter().map(|s| s.len()).collect();
    r.parts_downloaded_byte = vec![0; segments.len()];
    r.part_progress_percentage = vec![0; segments.len()];
    false
}

fn bitmap_from_record(r: &Record, segments: &[Segment]) -> SegmentBitmap {
    let mut bitmap = SegmentBitmap::new(segments.len());
    for i in 0..segments.len() {
        let chunk = r.part_chunk_sizes.get(i).copied().unwrap_or(0);
        let done = r.parts_downloaded_byte.get(i).copied().unwrap_or(0);
        if chunk > 0 && done >= chunk {
            bitmap.set_completed(i);
        }
    }
    bitmap
}

fn open_or_create_storage(temp_path: &std::path::Path, total_size: u64, resuming: bool) -> anyhow::Result<StorageWriter> {
    if resuming && temp_path.exists() {
        return StorageWriter::open_existing(temp_path);
    }
    let mut builder = StorageWriterBuilder::create(temp_path)?;
    builder.preallocate(total_size)?;
    Ok(builder.build())
}

fn spawn_progress_ticker(
    engine: &Arc<TaskEngine>,
    in_flight: Arc<Vec<AtomicU64>>,
    done_flag: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    let engine = Arc::clone(engine);
    tokio::spawn(async move {
        while !done_flag.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_millis(500)).await;
            if done_flag.load(Ordering::Relaxed) {
                break;
            }
            let total: u64 = in_flight.iter().map(|c| c.load(Ordering::Relaxed)).sum();
            {
                let mut r = engine.record.lock().unwrap();
                apply_tick(
                    &mut r,
                    Tick {
                        period_ms: 500,
                        downloaded_byte: total,
                        now_ms: now_ms(),
                    },
                );
                engine.store.save(&mut r);
            }
            engine.mark_progress();
        }
    })
}

fn persist_part_progress(engine: &Arc<TaskEngine>, segments: &[Segment], bitmap: &SegmentBitmap) {
    engine.with_record(|r| {
        for (i, seg) in segments.iter().enumerate() {
            if bitmap.is_completed(i) {
                r.parts_downloaded_byte[i] = seg.len();
                r.part_progress_percentage[i] = 100;
            }
        }
    });
}

async fn run_unknown_size(
    engine: &Arc<TaskEngine>,
    url: &str,
    headers: &HashMap<String, String>,
    temp_path: &std::path::Path,
    final_path: &std::path::Path,
    max_speed: u64,
    buffer_size: usize,
) -> RunOutcome {
    let storage = match StorageWriterBuilder::create(temp_path).map(|b| b.build()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(id = engine.id(), error = %e, "failed to create staging file");
            return RunOutcome::Fatal(UserMessage::DownloadIoFailed);
        }
    };

    let curl = CurlOptions::per_handle(non_zero(max_speed), 1, Some(buffer_size));
    let url = url.to_string();
    let headers = headers.clone();
    let blocking_storage = storage.clone();
    let result = tokio::task::spawn_blocking(move || download_single(&url, &headers, &blocking_storage, None, curl)).await;

    let written = match result {
        Ok(Ok(n)) => n,
        Ok(Err(_e)) => {
            return if engine.is_abort_requested() {
                RunOutcome::Aborted
            } else if engine.retry_budget_remaining() {
                RunOutcome::ForcedRestart
            } else {
                RunOutcome::Fatal(UserMessage::DownloadFailed)
            };
        }
        Err(_) => return RunOutcome::Fatal(UserMessage::DownloadFailed),
    };

    engine.with_record(|r| {
        r.file_size = written as i64;
        r.downloaded_byte = written;
        r.part_starting_point = vec![0];
        r.part_ending_point = vec![written];
        r.part_chunk_sizes = vec![written];
        r.parts_downloaded_byte = vec![written];
        r.part_progress_percentage = vec![100];
    });

    if let Err(e) = storage.sync() {
        tracing::warn!(id = engine.id(), error = %e, "sync before finalize failed");
        return RunOutcome::Fatal(UserMessage::DownloadIoFailed);
    }
    if let Err(e) = storage.finalize(final_path) {
        tracing::warn!(id = engine.id(), error = %e, "finalize rename failed");
        return RunOutcome::Fatal(UserMessage::DownloadIoFailed);
    }

    RunOutcome::Completed
}
