//! Parse extractor stdout lines into (percentage, status) pairs.

/// Matches lines like `[download]  42.5% of 10.00MiB at 1.20MiB/s ETA 00:07`.
/// Non-matching lines are forwarded as the status verbatim (covers
/// muxing/post-processing status lines that carry no percentage).
pub fn parse_progress_line(line: &str) -> (Option<f32>, &str) {
    let trimmed = line.trim();
    if let Some(rest) = trimmed.strip_prefix("[download]") {
        let rest = rest.trim_start();
        if let Some(pct_str) = rest.split('%').next() {
            if let Ok(pct) = pct_str.trim().parse::<f32>() {
                return (Some(pct), trimmed);
            }
        }
    }
    (None, trimmed)
}
