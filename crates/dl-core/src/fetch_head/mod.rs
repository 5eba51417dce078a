//! HTTP HEAD / metadata probing.
//!
//! Uses the curl crate (libcurl) to fetch response headers and confirm
//! `Content-Length`, `Accept-Ranges: bytes`, and capture ETag/Last-Modified
//! for resume safety. Also derives the `RemoteFileInfo` the engine copies
//! onto a `Record` at the start of a direct-transfer task.

mod parse;

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::str;
use std::time::Duration;

use crate::url_model;

/// Result of a HEAD request: key headers needed for segmented download and resume.
#[derive(Debug, Clone)]
pub struct HeadResult {
    /// Total size in bytes, if `Content-Length` is present.
    pub content_length: Option<u64>,
    /// True if server sent `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
    /// `ETag` value if present (used for resume validation).
    pub etag: Option<String>,
    /// `Last-Modified` value if present (used for resume validation).
    pub last_modified: Option<String>,
    /// `Content-Disposition` value if present (filename hint).
    pub content_disposition: Option<String>,
}

/// What `RemoteProbe` copies onto a `Record` once a HEAD probe completes.
#[derive(Debug, Clone)]
pub struct RemoteFileInfo {
    pub is_forbidden: bool,
    pub error_message: Option<String>,
    pub file_name: String,
    pub file_size: i64,
    pub file_checksum: Option<String>,
    pub supports_multipart: bool,
    pub supports_resume: bool,
}

/// If the URL's query string carries `response-content-disposition=...`,
/// decode it and return it as the value to use for a synthesized
/// `Content-Disposition: attachment; filename=<url-encoded>` header,
/// overriding whatever the server itself sends.
fn response_content_disposition_override(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let (_, v) = parsed
        .query_pairs()
        .find(|(k, _)| k == "response-content-disposition")?;
    Some(format!(
        "attachment; filename={}",
        url::form_urlencoded::byte_serialize(v.as_bytes()).collect::<String>()
    ))
}

/// Performs a HEAD request and returns parsed metadata.
///
/// Follows redirects, including protocol-change redirects (curl does this
/// natively via `follow_location`). Optional custom headers can be passed
/// (User-Agent, Host, Referer, Cookie, Range).
/// Runs in the current thread; call from `spawn_blocking` if used from async code.
pub fn probe(url: &str, custom_headers: &HashMap<String, String>) -> Result<HeadResult> {
    let mut headers: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url).context("invalid URL")?;
    easy.nobody(true)?; // HEAD request
    easy.follow_location(true)?;
    easy.connect_timeout(Duration::from_secs(15))?;
    easy.timeout(Duration::from_secs(30))?;

    let mut list = curl::easy::List::new();
    for (k, v) in custom_headers {
        list.append(&format!("{}: {}", k.trim(), v.trim()))?;
    }
    if !custom_headers.is_empty() {
        easy.http_headers(list)?;
    }

    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Ok(s) = str::from_utf8(data) {
                headers.push(s.trim_end().to_string());
            }
            true
        })?;
        transfer.perform().context("HEAD request failed")?;
    }

    let code = easy.response_code().context("no response code")?;
    if code < 200 || code >= 300 {
        anyhow::bail!("HEAD {} returned HTTP {}", url, code);
    }

    let mut result = parse::parse_headers(&headers)?;
    if let Some(override_cd) = response_content_disposition_override(url) {
        result.content_disposition = Some(override_cd);
    }
    Ok(result)
}

/// Full `RemoteProbe` contract: probe, then derive the fields a `Record`
/// copies in directly. Transport/HTTP failures are reported as
/// `is_forbidden` rather than propagated, matching the "never crash a task
/// over a probe" policy.
pub fn probe_remote_file_info(url: &str, custom_headers: &HashMap<String, String>) -> RemoteFileInfo {
    match probe(url, custom_headers) {
        Ok(head) => {
            let supports_multipart = head.accept_ranges;
            let supports_resume =
                supports_multipart || head.etag.is_some() || head.last_modified.is_some();
            let file_name = url_model::derive_filename(url, head.content_disposition.as_deref());
            RemoteFileInfo {
                is_forbidden: false,
                error_message: None,
                file_name,
                file_size: head.content_length.map(|n| n as i64).unwrap_or(-1),
                file_checksum: None,
                supports_multipart,
                supports_resume,
            }
        }
        Err(e) => RemoteFileInfo {
            is_forbidden: true,
            error_message: Some(e.to_string()),
            file_name: url_model::derive_filename(url, None),
            file_size: -1,
            file_checksum: None,
            supports_multipart: false,
            supports_resume: false,
        },
    }
}

/// Fetch a checksum from response headers, preferring, in order:
/// `X-Checksum-<algo>`, `X-Checksum`, `Content-MD5`, `ETag`. Returns the
/// first non-empty value found, trimmed and stripped of surrounding quotes.
pub fn fetch_checksum_from_headers(
    url: &str,
    algo: &str,
    custom_headers: &HashMap<String, String>,
) -> Result<Option<String>> {
    let mut headers: Vec<String> = Vec::new();
    let mut easy = curl::easy::Easy::new();
    easy.url(url).context("invalid URL")?;
    easy.nobody(true)?;
    easy.follow_location(true)?;
    easy.connect_timeout(Duration::from_secs(15))?;
    easy.timeout(Duration::from_secs(30))?;

    let mut list = curl::easy::List::new();
    for (k, v) in custom_headers {
        list.append(&format!("{}: {}", k.trim(), v.trim()))?;
    }
    if !custom_headers.is_empty() {
        easy.http_headers(list)?;
    }

    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Ok(s) = str::from_utf8(data) {
                headers.push(s.trim_end().to_string());
            }
            true
        })?;
        transfer.perform().context("HEAD request failed")?;
    }

    let wanted_specific = format!("x-checksum-{}", algo.to_lowercase());
    let mut generic = None;
    let mut content_md5 = None;
    let mut etag = None;

    for line in &headers {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim().to_lowercase();
        let value = value.trim().trim_matches('"').to_string();
        if value.is_empty() {
            continue;
        }
        if name == wanted_specific {
            return Ok(Some(value));
        } else if name == "x-checksum" {
            generic.get_or_insert(value);
        } else if name == "content-md5" {
            content_md5.get_or_insert(value);
        } else if name == "etag" {
            etag.get_or_insert(value);
        }
    }

    Ok(generic.or(content_md5).or(etag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_content_disposition_query_param_decoded() {
        let url = "https://example.com/f?response-content-disposition=attachment%3B%20filename%3D%22report.pdf%22";
        let cd = response_content_disposition_override(url).unwrap();
        assert!(cd.starts_with("attachment; filename="));
    }

    #[test]
    fn no_override_without_query_param() {
        assert!(response_content_disposition_override("https://example.com/f").is_none());
    }
}
