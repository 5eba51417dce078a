//! Hand-rolled binary encoding for `Record`.
//!
//! A length-prefixed field stream: each field is a fixed-width integer, a
//! `u32`-length-prefixed UTF-8 string, or a length-prefixed byte blob for
//! nested structures, written in a fixed declared order. A version byte
//! precedes the stream so a future field addition can be detected and
//! rejected (falling back to JSON) instead of silently misread. This mirrors
//! the manual byte-packing already used for the segment completion bitmap
//! rather than pulling in an external binary-serialization crate.

use crate::config::SettingsSnapshot;
use crate::record::{Record, Status, VideoFormat, VideoInfo};
use std::collections::BTreeMap;

pub const FORMAT_VERSION: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("truncated record stream (need {needed} more bytes, have {available})")]
    Truncated { needed: usize, available: usize },
    #[error("unsupported record format version {0}, expected {FORMAT_VERSION}")]
    UnsupportedVersion(u8),
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,
    #[error("invalid status tag {0}")]
    InvalidStatus(u8),
    #[error("embedded settings snapshot corrupt: {0}")]
    SettingsCorrupt(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Writer { buf: Vec::new() }
    }
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    fn bool(&mut self, v: bool) {
        self.u8(v as u8);
    }
    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn bytes(&mut self, v: &[u8]) {
        self.u32(v.len() as u32);
        self.buf.extend_from_slice(v);
    }
    fn string(&mut self, v: &str) {
        self.bytes(v.as_bytes());
    }
    fn opt_string(&mut self, v: &Option<String>) {
        match v {
            Some(s) => {
                self.bool(true);
                self.string(s);
            }
            None => self.bool(false),
        }
    }
    fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }
    fn need(&self, n: usize) -> Result<(), StoreError> {
        if self.pos + n > self.buf.len() {
            return Err(StoreError::Truncated {
                needed: n,
                available: self.buf.len() - self.pos,
            });
        }
        Ok(())
    }
    fn u8(&mut self) -> Result<u8, StoreError> {
        self.need(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }
    fn bool(&mut self) -> Result<bool, StoreError> {
        Ok(self.u8()? != 0)
    }
    fn u32(&mut self) -> Result<u32, StoreError> {
        self.need(4)?;
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }
    fn u64(&mut self) -> Result<u64, StoreError> {
        self.need(8)?;
        let v = u64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        Ok(v)
    }
    fn i64(&mut self) -> Result<i64, StoreError> {
        self.need(8)?;
        let v = i64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        Ok(v)
    }
    fn bytes(&mut self) -> Result<Vec<u8>, StoreError> {
        let len = self.u32()? as usize;
        self.need(len)?;
        let v = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(v)
    }
    fn string(&mut self) -> Result<String, StoreError> {
        String::from_utf8(self.bytes()?).map_err(|_| StoreError::InvalidUtf8)
    }
    fn opt_string(&mut self) -> Result<Option<String>, StoreError> {
        if self.bool()? {
            Ok(Some(self.string()?))
        } else {
            Ok(None)
        }
    }
    fn u64_vec(&mut self) -> Result<Vec<u64>, StoreError> {
        let n = self.u32()? as usize;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.u64()?);
        }
        Ok(out)
    }
    fn u8_vec(&mut self) -> Result<Vec<u8>, StoreError> {
        let n = self.u32()? as usize;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.u8()?);
        }
        Ok(out)
    }
}

fn write_u64_vec(w: &mut Writer, v: &[u64]) {
    w.u32(v.len() as u32);
    for &x in v {
        w.u64(x);
    }
}

fn write_u8_vec(w: &mut Writer, v: &[u8]) {
    w.u32(v.len() as u32);
    for &x in v {
        w.u8(x);
    }
}

pub fn encode_record(r: &Record) -> Result<Vec<u8>, StoreError> {
    let mut w = Writer::new();
    w.u8(FORMAT_VERSION);

    w.u64(r.id);
    w.u8(match r.status {
        Status::Closed => 0,
        Status::Downloading => 1,
        Status::Complete => 2,
    });

    let mut flags: u16 = 0;
    let mut bit = |cond: bool, pos: u16| -> u16 {
        if cond {
            1 << pos
        } else {
            0
        }
    };
    flags |= bit(r.is_running, 0);
    flags |= bit(r.is_complete, 1);
    flags |= bit(r.is_deleted, 2);
    flags |= bit(r.is_removed, 3);
    flags |= bit(r.is_waiting_for_network, 4);
    flags |= bit(r.is_file_url_expired, 5);
    flags |= bit(r.is_failed_to_access_file, 6);
    flags |= bit(r.is_destination_file_missing, 7);
    flags |= bit(r.extractor_problem, 8);
    flags |= bit(r.is_unknown_file_size, 9);
    flags |= bit(r.is_resume_supported, 10);
    flags |= bit(r.is_multi_thread_supported, 11);
    flags |= bit(r.is_basic_extractor_model_initialized, 12);
    flags |= bit(r.is_smart_category_dir_processed, 13);
    w.buf.extend_from_slice(&flags.to_le_bytes());

    w.opt_string(&r.extractor_problem_msg);
    w.string(&r.file_url);
    w.opt_string(&r.site_referrer);

    w.u32(r.extra_headers.len() as u32);
    for (k, v) in &r.extra_headers {
        w.string(k);
        w.string(v);
    }

    w.string(&r.file_name);
    w.string(&r.file_directory);
    w.opt_string(&r.file_mime_type);
    w.opt_string(&r.file_content_disposition);
    w.opt_string(&r.file_directory_uri);
    w.opt_string(&r.cookie_string);
    w.opt_string(&r.thumb_path);
    w.opt_string(&r.thumbnail_url);

    w.i64(r.file_size);
    w.opt_string(&r.file_checksum);

    w.u64(r.downloaded_byte);
    w.u8(r.progress_percentage);

    write_u64_vec(&mut w, &r.part_starting_point);
    write_u64_vec(&mut w, &r.part_ending_point);
    write_u64_vec(&mut w, &r.part_chunk_sizes);
    write_u64_vec(&mut w, &r.parts_downloaded_byte);
    write_u8_vec(&mut w, &r.part_progress_percentage);

    w.i64(r.start_time_date);
    w.i64(r.last_modified_time_date);
    w.i64(r.time_spent_in_milli_sec);
    w.i64(r.remaining_time_in_sec);

    w.u64(r.average_speed);
    w.u64(r.max_speed);
    w.u64(r.realtime_speed);

    w.u32(r.resume_session_retry_count);
    w.u64(r.total_tracked_connection_retries);

    match &r.video_info {
        Some(vi) => {
            w.bool(true);
            w.opt_string(&vi.title);
            w.opt_string(&vi.url);
            w.opt_string(&vi.referer);
            w.opt_string(&vi.cookie_temp_path);
            w.opt_string(&vi.thumbnail_url);
        }
        None => w.bool(false),
    }

    match &r.video_format {
        Some(vf) => {
            w.bool(true);
            w.string(&vf.id);
            w.string(&vf.resolution_label);
            w.opt_string(&vf.video_codec);
            w.bool(vf.is_audio_only);
            w.bool(vf.is_from_social_media);
        }
        None => w.bool(false),
    }

    w.opt_string(&r.temp_ytdlp_destination_file_path);
    w.opt_string(&r.temp_ytdlp_status_info);
    w.opt_string(&r.execution_command);
    w.opt_string(&r.media_file_playback_duration);

    let settings_json = serde_json::to_vec(&r.global_settings)?;
    w.bytes(&settings_json);

    Ok(w.into_vec())
}

pub fn decode_record(data: &[u8]) -> Result<Record, StoreError> {
    let mut rd = Reader::new(data);
    let version = rd.u8()?;
    if version != FORMAT_VERSION {
        return Err(StoreError::UnsupportedVersion(version));
    }

    let id = rd.u64()?;
    let status = match rd.u8()? {
        0 => Status::Closed,
        1 => Status::Downloading,
        2 => Status::Complete,
        other => return Err(StoreError::InvalidStatus(other)),
    };

    rd.need(2)?;
    let flags = u16::from_le_bytes(rd.buf[rd.pos..rd.pos + 2].try_into().unwrap());
    rd.pos += 2;
    let has = |pos: u16| (flags & (1 << pos)) != 0;

    let extractor_problem_msg = rd.opt_string()?;
    let file_url = rd.string()?;
    let site_referrer = rd.opt_string()?;

    let n_headers = rd.u32()? as usize;
    let mut extra_headers = BTreeMap::new();
    for _ in 0..n_headers {
        let k = rd.string()?;
        let v = rd.string()?;
        extra_headers.insert(k, v);
    }

    let file_name = rd.string()?;
    let file_directory = rd.string()?;
    let file_mime_type = rd.opt_string()?;
    let file_content_disposition = rd.opt_string()?;
    let file_directory_uri = rd.opt_string()?;
    let cookie_string = rd.opt_string()?;
    let thumb_path = rd.opt_string()?;
    let thumbnail_url = rd.opt_string()?;

    let file_size = rd.i64()?;
    let file_checksum = rd.opt_string()?;

    let downloaded_byte = rd.u64()?;
    let progress_percentage = rd.u8()?;

    let part_starting_point = rd.u64_vec()?;
    let part_ending_point = rd.u64_vec()?;
    let part_chunk_sizes = rd.u64_vec()?;
    let parts_downloaded_byte = rd.u64_vec()?;
    let part_progress_percentage = rd.u8_vec()?;

    let start_time_date = rd.i64()?;
    let last_modified_time_date = rd.i64()?;
    let time_spent_in_milli_sec = rd.i64()?;
    let remaining_time_in_sec = rd.i64()?;

    let average_speed = rd.u64()?;
    let max_speed = rd.u64()?;
    let realtime_speed = rd.u64()?;

    let resume_session_retry_count = rd.u32()?;
    let total_tracked_connection_retries = rd.u64()?;

    let video_info = if rd.bool()? {
        Some(VideoInfo {
            title: rd.opt_string()?,
            url: rd.opt_string()?,
            referer: rd.opt_string()?,
            cookie_temp_path: rd.opt_string()?,
            thumbnail_url: rd.opt_string()?,
        })
    } else {
        None
    };

    let video_format = if rd.bool()? {
        Some(VideoFormat {
            id: rd.string()?,
            resolution_label: rd.string()?,
            video_codec: rd.opt_string()?,
            is_audio_only: rd.bool()?,
            is_from_social_media: rd.bool()?,
        })
    } else {
        None
    };

    let temp_ytdlp_destination_file_path = rd.opt_string()?;
    let temp_ytdlp_status_info = rd.opt_string()?;
    let execution_command = rd.opt_string()?;
    let media_file_playback_duration = rd.opt_string()?;

    let settings_bytes = rd.bytes()?;
    let global_settings: SettingsSnapshot = serde_json::from_slice(&settings_bytes)?;

    Ok(Record {
        id,
        status,
        is_running: has(0),
        is_complete: has(1),
        is_deleted: has(2),
        is_removed: has(3),
        is_waiting_for_network: has(4),
        is_file_url_expired: has(5),
        is_failed_to_access_file: has(6),
        is_destination_file_missing: has(7),
        extractor_problem: has(8),
        extractor_problem_msg,
        file_url,
        site_referrer,
        extra_headers,
        file_name,
        file_directory,
        file_mime_type,
        file_content_disposition,
        file_directory_uri,
        cookie_string,
        thumb_path,
        thumbnail_url,
        file_size,
        is_unknown_file_size: has(9),
        file_checksum,
        downloaded_byte,
        progress_percentage,
        part_starting_point,
        part_ending_point,
        part_chunk_sizes,
        parts_downloaded_byte,
        part_progress_percentage,
        start_time_date,
        last_modified_time_date,
        time_spent_in_milli_sec,
        remaining_time_in_sec,
        average_speed,
        max_speed,
        realtime_speed,
        is_resume_supported: has(10),
        is_multi_thread_supported: has(11),
        resume_session_retry_count,
        total_tracked_connection_retries,
        video_info,
        video_format,
        temp_ytdlp_destination_file_path,
        temp_ytdlp_status_info,
        execution_command,
        is_basic_extractor_model_initialized: has(12),
        is_smart_category_dir_processed: has(13),
        media_file_playback_duration,
        global_settings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;

    fn sample() -> Record {
        let settings = EngineSettings::default().snapshot();
        let mut r = Record::new(7, "https://example.com/a.bin".into(), settings, 1000);
        r.file_size = 400;
        r.part_chunk_sizes = vec![100, 100, 100, 100];
        r.extra_headers.insert("Referer".into(), "https://x".into());
        r.cookie_string = Some("a=1; b=2".into());
        r.video_format = Some(VideoFormat {
            id: "use-dynamic".into(),
            resolution_label: "720p".into(),
            video_codec: Some("avc1".into()),
            is_audio_only: false,
            is_from_social_media: false,
        });
        r
    }

    #[test]
    fn roundtrip_preserves_all_fields() {
        let r = sample();
        let bytes = encode_record(&r).unwrap();
        let back = decode_record(&bytes).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn rejects_future_version() {
        let r = sample();
        let mut bytes = encode_record(&r).unwrap();
        bytes[0] = FORMAT_VERSION + 1;
        assert!(matches!(
            decode_record(&bytes),
            Err(StoreError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn rejects_truncated_stream() {
        let r = sample();
        let bytes = encode_record(&r).unwrap();
        let truncated = &bytes[..bytes.len() / 2];
        assert!(matches!(
            decode_record(truncated),
            Err(StoreError::Truncated { .. })
        ));
    }
}
