//! Core segmented downloader engine.
//!
//! Consumes direct URL + headers, runs N concurrent HTTP Range GETs (bounded by
//! `max_concurrent` when set), writes each segment to storage at the correct
//! offset and updates the completion bitmap. Supports retry with backoff via
//! optional `RetryPolicy`.

mod run;
mod segment;
pub mod single;

use anyhow::Result;
use crate::retry::{RetryPolicy, SegmentError};
use crate::segmenter::{Segment, SegmentBitmap};
use crate::storage::StorageWriter;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;

/// Result of a single segment download (used for retry classification).
pub type SegmentResult = Result<(), SegmentError>;

/// Summary of a download run for adaptive policy: throttle and error counts.
#[derive(Debug, Clone, Default)]
pub struct DownloadSummary {
    pub throttle_events: u32,
    pub error_events: u32,
}

/// Per-handle curl tuning derived from engine settings: bandwidth cap split
/// across concurrent segment workers, and the per-segment read buffer size.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurlOptions {
    /// `max_recv_speed` applied to each handle (already divided across workers).
    pub max_recv_speed: Option<u64>,
    pub buffer_size: Option<usize>,
}

impl CurlOptions {
    /// Split a total bytes/s budget evenly across `n_handles` concurrent
    /// workers; `0` or `None` means unthrottled.
    pub fn per_handle(max_bytes_per_sec: Option<u64>, n_handles: usize, buffer_bytes: Option<usize>) -> Self {
        let max_recv_speed = max_bytes_per_sec
            .filter(|&b| b > 0)
            .map(|total| (total / (n_handles.max(1) as u64)).max(1));
        CurlOptions {
            max_recv_speed,
            buffer_size: buffer_bytes,
        }
    }
}

/// Downloads all segments that are not yet completed, writing to `storage` and updating `bitmap`.
/// When `max_concurrent` is `Some(n)`, at most `n` segment downloads run at once. When `None`,
/// one thread per incomplete segment (unbounded; no mid-run abort support). Fills `summary_out`
/// with throttle/error counts. If `progress_tx` is `Some`, the current bitmap is sent after each
/// completed segment (coalesced every N completions) so the caller can persist progress.
/// `in_flight_bytes`, if given, receives a live per-segment byte counter so a caller can compute
/// `downloadedByte` without waiting for a segment to finish.
#[allow(clippy::too_many_arguments)]
pub fn download_segments(
    url: &str,
    custom_headers: &HashMap<String, String>,
    segments: &[Segment],
    storage: &StorageWriter,
    bitmap: &mut SegmentBitmap,
    max_concurrent: Option<usize>,
    retry_policy: Option<&RetryPolicy>,
    summary_out: &mut DownloadSummary,
    progress_tx: Option<&tokio::sync::mpsc::Sender<Vec<u8>>>,
    in_flight_bytes: Option<Arc<Vec<AtomicU64>>>,
    abort: Option<Arc<AtomicBool>>,
    curl: CurlOptions,
) -> Result<()> {
    let incomplete: Vec<(usize, Segment)> = segments
        .iter()
        .enumerate()
        .filter(|(i, _)| !bitmap.is_completed(*i))
        .map(|(i, s)| (i, *s))
        .collect();

    if incomplete.is_empty() {
        return Ok(());
    }
    *summary_out = DownloadSummary::default();

    let url = url.to_string();
    let headers = custom_headers.clone();
    let storage = storage.clone();
    let segment_count = segments.len();
    let policy = retry_policy.copied();

    if let Some(max) = max_concurrent {
        run::run_concurrent(
            url,
            headers,
            storage,
            incomplete,
            segment_count,
            max,
            policy,
            bitmap,
            summary_out,
            progress_tx,
            in_flight_bytes,
            abort,
            curl,
        )
    } else {
        run::run_unbounded(
            url,
            headers,
            storage,
            incomplete,
            segment_count,
            policy,
            bitmap,
            summary_out,
            progress_tx,
            in_flight_bytes,
            curl,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmenter::plan_segments;

    #[test]
    fn download_segments_updates_bitmap() {
        let segments = plan_segments(1000, 4);
        let mut bitmap = SegmentBitmap::new(4);
        assert!(!bitmap.all_completed(4));
        bitmap.set_completed(0);
        bitmap.set_completed(2);
        let incomplete: Vec<_> = segments
            .iter()
            .enumerate()
            .filter(|(i, _)| !bitmap.is_completed(*i))
            .collect();
        assert_eq!(incomplete.len(), 2);
        assert!(bitmap.is_completed(0));
        assert!(!bitmap.is_completed(1));
        assert!(bitmap.is_completed(2));
        assert!(!bitmap.is_completed(3));
    }

    #[test]
    fn curl_options_per_handle_splits_bandwidth() {
        let opts = CurlOptions::per_handle(Some(1000), 4, Some(8192));
        assert_eq!(opts.max_recv_speed, Some(250));
        assert_eq!(opts.buffer_size, Some(8192));
    }

    #[test]
    fn curl_options_per_handle_zero_is_unthrottled() {
        let opts = CurlOptions::per_handle(Some(0), 4, None);
        assert_eq!(opts.max_recv_speed, None);
    }
}
