//! User-facing status/close messages the engine assigns to a `Record`.
//!
//! Kept as a closed enum rather than free-form strings so callers (CLI,
//! host UI) can match on it instead of string-sniffing.

use crate::retry::tags::ProblemTag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserMessage {
    Preparing,
    Downloading,
    WaitingNoNetwork,
    WaitingWifiRequired,
    WaitingNoInternet,
    LoginRequired,
    ContentUnavailable,
    FormatUnavailable,
    SiteBanned,
    ServerIssue,
    LinkExpired,
    FileDeletedPaused,
    DownloadIoFailed,
    DownloadFailed,
    Paused,
    Cancelled,
}

impl UserMessage {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserMessage::Preparing => "preparing",
            UserMessage::Downloading => "downloading",
            UserMessage::WaitingNoNetwork => "waiting: no network",
            UserMessage::WaitingWifiRequired => "waiting: wifi required",
            UserMessage::WaitingNoInternet => "waiting: no internet",
            UserMessage::LoginRequired => "login required",
            UserMessage::ContentUnavailable => "content unavailable",
            UserMessage::FormatUnavailable => "format unavailable",
            UserMessage::SiteBanned => "site banned",
            UserMessage::ServerIssue => "server issue",
            UserMessage::LinkExpired => "link expired",
            UserMessage::FileDeletedPaused => "destination file missing",
            UserMessage::DownloadIoFailed => "download io failed",
            UserMessage::DownloadFailed => "download failed",
            UserMessage::Paused => "paused",
            UserMessage::Cancelled => "cancelled",
        }
    }

    pub fn from_problem_tag(tag: ProblemTag) -> Self {
        match tag {
            ProblemTag::LoginRequired => UserMessage::LoginRequired,
            ProblemTag::ContentUnavailable => UserMessage::ContentUnavailable,
            ProblemTag::FormatUnavailable => UserMessage::FormatUnavailable,
            ProblemTag::SiteBanned => UserMessage::SiteBanned,
            ProblemTag::ServerIssue => UserMessage::ServerIssue,
        }
    }

    pub fn from_waiting_reason(reason: crate::network_gate::WaitingReason) -> Self {
        use crate::network_gate::WaitingReason;
        match reason {
            WaitingReason::NoNetwork => UserMessage::WaitingNoNetwork,
            WaitingReason::WifiRequired => UserMessage::WaitingWifiRequired,
            WaitingReason::NoInternet => UserMessage::WaitingNoInternet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_tag_maps_to_matching_message() {
        assert_eq!(
            UserMessage::from_problem_tag(ProblemTag::SiteBanned),
            UserMessage::SiteBanned
        );
    }
}
