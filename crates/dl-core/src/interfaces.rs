//! External collaborator interfaces the engine depends on but does not
//! implement: the host platform, UI layer, and embedded tools on the other
//! side of each trait. Grounded in the same "inject the collaborator"
//! pattern this codebase already used for its HTTP/resolve seam — a context
//! object built at process init and passed into components rather than a
//! global singleton (see §9 of the design notes this crate implements).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use anyhow::Result;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Read-only settings access; a deep copy is taken at task creation via
/// `EngineSettings::snapshot()`. Kept as a trait only so test doubles can
/// substitute a fixed snapshot without touching the filesystem.
pub trait SettingsProvider: Send + Sync {
    fn current(&self) -> crate::config::EngineSettings;
}

/// A configurable HTTP client: redirect following, cookie jar, and
/// request-with-headers. The core supplies Host, User-Agent, Referer,
/// Range, Cookie, and optional Content-Disposition headers; this trait
/// exists so the direct-transfer path and tests can swap transports.
pub trait HttpClient: Send + Sync {
    fn head(&self, url: &str, headers: &HashMap<String, String>) -> Result<crate::fetch_head::HeadResult>;
}

/// One `--flag value` pair passed to the extractor child process.
#[derive(Debug, Clone)]
pub struct ExtractorArg {
    pub flag: String,
    pub value: Option<String>,
}

/// A request to invoke the extractor: the target URL, its argument list,
/// and a progress callback.
pub struct ExtractorRequest<'a> {
    pub url: String,
    pub args: Vec<ExtractorArg>,
    pub on_progress: Box<dyn FnMut(f32, &str) + Send + 'a>,
}

#[derive(Debug, Clone)]
pub struct ExtractorResult {
    pub exit_code: i32,
    pub stdout_tail: String,
    pub elapsed_ms: u64,
}

/// External process invoked with (URL, flag/value pairs, progress
/// callback). Identifiable and killable by a caller-supplied id equal to
/// the owning `Record`'s id.
pub trait Extractor: Send + Sync {
    fn invoke<'a>(&'a self, id: u64, request: ExtractorRequest<'a>) -> BoxFuture<'a, Result<ExtractorResult>>;
    fn kill(&self, id: u64);
}

/// Browser-surface helper: given a URL, produces the effective cookie
/// string after page load. Invoked from the Preparing state for
/// social-media sources on the first start attempt.
pub trait CookieProcurement: Send + Sync {
    fn fetch_cookie_string<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// `getAudioPlaybackTimeIfAvailable` — human-readable duration, used only
/// to populate `mediaFilePlaybackDuration`.
pub trait MediaProbe: Send + Sync {
    fn playback_duration(&self, path: &std::path::Path) -> Option<String>;
}

/// Side effect of playing a sound on task completion.
pub trait CompletionSound: Send + Sync {
    fn play(&self);
}

/// Filename/collision helpers the engine calls but does not implement.
pub trait FilenameHelper: Send + Sync {
    fn sanitize_extreme(&self, name: &str) -> String;
    fn rename_if_exists(&self, dir: &str, name: &str) -> String;
    fn validate_existed_name(&self, dir: &str, name: &str) -> bool;
    fn find_file_starting_with(&self, dir: &str, prefix: &str) -> Option<std::path::PathBuf>;
    fn is_file_name_valid(&self, name: &str) -> bool;
}

/// Live connectivity status provider consumed by `NetworkGate`.
pub use crate::network_gate::NetworkStatusProvider;
