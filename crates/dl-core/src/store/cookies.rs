//! Netscape HTTP Cookie File format.
//!
//! No crate in this codebase's dependency stack covers this text format, so
//! it is hand-written with plain `std::fs`, matching the level of the other
//! hand-rolled on-disk formats in this module.

use std::fs;
use std::path::Path;

const HEADER: &str = "# Netscape HTTP Cookie File\n\n";

/// Parse `name=value` tokens out of a raw `"a=1; b=2; malformed; c=3"`
/// cookie string. Tokens without exactly one `=` are discarded.
pub fn parse_cookie_pairs(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|tok| {
            let tok = tok.trim();
            if tok.is_empty() {
                return None;
            }
            let mut parts = tok.splitn(2, '=');
            let name = parts.next()?;
            let value = parts.next()?;
            if name.is_empty() || value.contains('=') {
                return None;
            }
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Render a raw cookie string as a Netscape HTTP Cookie File body.
pub fn render_netscape_file(raw: &str) -> String {
    let mut out = String::from(HEADER);
    for (name, value) in parse_cookie_pairs(raw) {
        out.push_str(&format!(
            "\t\tFALSE\t/\tFALSE\t2147483647\t{}\t{}\n",
            name, value
        ));
    }
    out
}

/// Write a Netscape cookie file for `raw` at `path`.
pub fn write_cookie_file(path: &Path, raw: &str) -> std::io::Result<()> {
    fs::write(path, render_netscape_file(raw))
}
