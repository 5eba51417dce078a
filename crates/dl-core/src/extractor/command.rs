//! Extractor command construction: fixed arguments, conditional arguments,
//! and format-selector (`executionCommand`) derivation.

use crate::config::EngineSettings;
use crate::interfaces::ExtractorArg;
use crate::record::{VideoFormat, FORMAT_ID_USE_DYNAMIC};

fn arg(flag: &str) -> ExtractorArg {
    ExtractorArg {
        flag: flag.to_string(),
        value: None,
    }
}

fn arg_val(flag: &str, value: impl Into<String>) -> ExtractorArg {
    ExtractorArg {
        flag: flag.to_string(),
        value: Some(value.into()),
    }
}

/// Classify a filename extension as video (drives `--merge-output-format mp4`).
fn looks_like_video(file_name: &str) -> bool {
    const VIDEO_EXTS: &[&str] = &["mp4", "mkv", "webm", "mov", "avi", "flv"];
    file_name
        .rsplit('.')
        .next()
        .map(|ext| VIDEO_EXTS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Format a bytes/s throttle as an extractor `--limit-rate` expression,
/// e.g. `500K` or `2M`.
fn format_limit_rate(bytes_per_sec: u64) -> Option<String> {
    if bytes_per_sec == 0 {
        return None;
    }
    const MIB: u64 = 1024 * 1024;
    const KIB: u64 = 1024;
    if bytes_per_sec >= MIB && bytes_per_sec % MIB == 0 {
        Some(format!("{}M", bytes_per_sec / MIB))
    } else if bytes_per_sec >= KIB {
        Some(format!("{}K", (bytes_per_sec / KIB).max(1)))
    } else {
        Some(format!("{}", bytes_per_sec))
    }
}

/// Parse a resolution label into a height in pixels. Accepts `WxH`,
/// `W\u{d7}H`, `Np`, `WpxHp`, or a bare integer. Returns `None` for
/// anything else (e.g. `"abc"`).
pub fn parse_resolution_height(label: &str) -> Option<u32> {
    let label = label.trim();

    if let Some((_, h)) = label.split_once(['x', '\u{d7}', 'X']) {
        let h: String = h.chars().filter(|c| c.is_ascii_digit()).collect();
        if !h.is_empty() {
            return h.parse().ok();
        }
    }

    if let Some(stripped) = label.strip_suffix(['p', 'P']) {
        let digits: String = stripped.chars().filter(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            return digits.parse().ok();
        }
    }

    if label.chars().all(|c| c.is_ascii_digit()) && !label.is_empty() {
        return label.parse().ok();
    }

    None
}

/// Derive `executionCommand`, the format selector string passed via `-f`.
pub fn execution_command(format: &VideoFormat, url_is_known_video_platform: bool) -> String {
    if format.id != FORMAT_ID_USE_DYNAMIC {
        return format.id.clone();
    }

    if format.is_from_social_media {
        return "bestvideo[height<=2400]+bestaudio/best[height<=2400]/best".to_string();
    }

    if url_is_known_video_platform && format.resolution_label.to_lowercase().contains("audio") {
        return "bestaudio".to_string();
    }

    match parse_resolution_height(&format.resolution_label) {
        Some(h) => format!("bestvideo[height<={h}]+bestaudio/best[height<={h}]/best"),
        None => "bestvideo+bestaudio/best".to_string(),
    }
}

/// Build the full argument list for one extractor invocation.
pub fn build_args(
    format: &VideoFormat,
    settings: &EngineSettings,
    file_url: &str,
    temp_destination_path: &str,
    file_name: &str,
    cookie_path: Option<&str>,
    url_is_known_video_platform: bool,
) -> Vec<ExtractorArg> {
    let mut args = vec![
        arg("--continue"),
        arg_val("-f", execution_command(format, url_is_known_video_platform)),
        arg_val("-o", temp_destination_path.to_string()),
        arg_val("--playlist-items", "1"),
        arg_val("--user-agent", settings.download_http_user_agent.clone()),
        arg_val(
            "--retries",
            settings.effective_auto_resume_max_errors().to_string(),
        ),
        arg_val(
            "--socket-timeout",
            settings.download_max_http_reading_timeout.to_string(),
        ),
        arg_val("--concurrent-fragments", "10"),
        arg_val("--fragment-retries", "10"),
        arg("--no-check-certificate"),
        arg("--force-ipv4"),
        arg_val("--source-address", "0.0.0.0"),
    ];

    if looks_like_video(file_name) {
        args.push(arg_val("--merge-output-format", "mp4"));
    }
    if let Some(path) = cookie_path {
        args.push(arg_val("--cookies", path.to_string()));
    }
    if let Some(rate) = format_limit_rate(settings.download_max_network_speed) {
        args.push(arg_val("--limit-rate", rate));
    }

    let _ = file_url;
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(id: &str, label: &str) -> VideoFormat {
        VideoFormat {
            id: id.to_string(),
            resolution_label: label.to_string(),
            video_codec: None,
            is_audio_only: false,
            is_from_social_media: false,
        }
    }

    #[test]
    fn resolution_parsing_matrix() {
        assert_eq!(parse_resolution_height("1280x720"), Some(720));
        assert_eq!(parse_resolution_height("1920\u{d7}1080"), Some(1080));
        assert_eq!(parse_resolution_height("720p"), Some(720));
        assert_eq!(parse_resolution_height("1920Px1080P"), Some(1080));
        assert_eq!(parse_resolution_height("720"), Some(720));
        assert_eq!(parse_resolution_height("abc"), None);
    }

    #[test]
    fn dynamic_social_media_format_ignores_resolution() {
        let mut f = fmt(FORMAT_ID_USE_DYNAMIC, "720p");
        f.is_from_social_media = true;
        assert_eq!(
            execution_command(&f, false),
            "bestvideo[height<=2400]+bestaudio/best[height<=2400]/best"
        );
    }

    #[test]
    fn dynamic_resolution_based_format() {
        let f = fmt(FORMAT_ID_USE_DYNAMIC, "1080p");
        assert_eq!(
            execution_command(&f, false),
            "bestvideo[height<=1080]+bestaudio/best[height<=1080]/best"
        );
    }

    #[test]
    fn dynamic_unparseable_resolution_falls_back() {
        let f = fmt(FORMAT_ID_USE_DYNAMIC, "abc");
        assert_eq!(execution_command(&f, false), "bestvideo+bestaudio/best");
    }

    #[test]
    fn dynamic_youtube_audio_only_label() {
        let f = fmt(FORMAT_ID_USE_DYNAMIC, "audio only");
        assert_eq!(execution_command(&f, true), "bestaudio");
    }

    #[test]
    fn explicit_format_id_used_verbatim() {
        let f = fmt("137+140", "1080p");
        assert_eq!(execution_command(&f, false), "137+140");
    }

    #[test]
    fn limit_rate_formats_as_k_or_m() {
        assert_eq!(format_limit_rate(0), None);
        assert_eq!(format_limit_rate(500 * 1024), Some("500K".to_string()));
        assert_eq!(format_limit_rate(2 * 1024 * 1024), Some("2M".to_string()));
    }
}
