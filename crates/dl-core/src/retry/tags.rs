//! Substring classification of extractor child-process output.
//!
//! The TaskEngine feeds stderr/stdout lines from an extractor invocation
//! through `classify_extractor_output` to decide whether a failure is worth
//! a forced restart (transient: the site or network is having a bad moment)
//! or should drive the task straight to CLOSED (the content or credentials
//! are the problem, retrying won't help).

/// A coarse bucket for why an extractor invocation failed, derived from
/// substrings seen in its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemTag {
    LoginRequired,
    ContentUnavailable,
    FormatUnavailable,
    SiteBanned,
    ServerIssue,
}

const LOGIN_REQUIRED: &[&str] = &[
    "sign in to confirm",
    "login required",
    "private video",
    "members-only content",
];

const CONTENT_UNAVAILABLE: &[&str] = &[
    "video unavailable",
    "this video has been removed",
    "content is not available",
    "account associated with this video has been terminated",
];

const FORMAT_UNAVAILABLE: &[&str] = &[
    "requested format is not available",
    "no video formats found",
    "unable to extract",
];

const SITE_BANNED: &[&str] = &[
    "http error 429",
    "unable to download webpage",
    "confirm you\u{2019}re not a bot",
    "403: forbidden",
];

const SERVER_ISSUE: &[&str] = &["http error 5", "connection reset", "temporary failure"];

/// Scan a line of extractor output for a known problem substring.
///
/// Matching is case-insensitive. Order matters: more specific tags are
/// checked before the broader `ServerIssue` bucket so a transient 503
/// during a login flow still classifies as `LoginRequired`.
pub fn classify_extractor_output(line: &str) -> Option<ProblemTag> {
    let lower = line.to_lowercase();
    let hit = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if hit(LOGIN_REQUIRED) {
        Some(ProblemTag::LoginRequired)
    } else if hit(CONTENT_UNAVAILABLE) {
        Some(ProblemTag::ContentUnavailable)
    } else if hit(FORMAT_UNAVAILABLE) {
        Some(ProblemTag::FormatUnavailable)
    } else if hit(SITE_BANNED) {
        Some(ProblemTag::SiteBanned)
    } else if hit(SERVER_ISSUE) {
        Some(ProblemTag::ServerIssue)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_login_required() {
        assert_eq!(
            classify_extractor_output("ERROR: [youtube] Sign in to confirm your age"),
            Some(ProblemTag::LoginRequired)
        );
    }

    #[test]
    fn detects_content_unavailable() {
        assert_eq!(
            classify_extractor_output("ERROR: Video unavailable"),
            Some(ProblemTag::ContentUnavailable)
        );
    }

    #[test]
    fn detects_format_unavailable() {
        assert_eq!(
            classify_extractor_output("ERROR: Requested format is not available"),
            Some(ProblemTag::FormatUnavailable)
        );
    }

    #[test]
    fn detects_site_banned() {
        assert_eq!(
            classify_extractor_output("HTTP Error 429: Too Many Requests"),
            Some(ProblemTag::SiteBanned)
        );
    }

    #[test]
    fn detects_server_issue() {
        assert_eq!(
            classify_extractor_output("HTTP Error 503: Service Unavailable"),
            Some(ProblemTag::ServerIssue)
        );
    }

    #[test]
    fn case_insensitive_match() {
        assert_eq!(
            classify_extractor_output("VIDEO UNAVAILABLE"),
            Some(ProblemTag::ContentUnavailable)
        );
    }

    #[test]
    fn no_match_returns_none() {
        assert_eq!(
            classify_extractor_output("[youtube] Extracting URL: https://example.com"),
            None
        );
    }
}
