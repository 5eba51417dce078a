//! Extractor-dispatch sub-component: command construction, subprocess
//! invocation, progress parsing, and post-success MP4 finalize.

pub mod command;
pub mod dispatch;
pub mod mp4;
pub mod progress;

pub use command::{build_args, execution_command, parse_resolution_height};
pub use dispatch::ProcessExtractor;
pub use mp4::{relocate_moov, validate_for_relocation, Mp4RelocateError};
pub use progress::parse_progress_line;

/// Errors from one extractor invocation that the `TaskEngine` needs to
/// match on, distinct from the per-line problem-tag classification in
/// `retry::tags` (that classifier looks at *output content*; this looks at
/// *how the process itself behaved*).
#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    #[error("failed to launch extractor: {0}")]
    SpawnFailed(String),
    #[error("extractor exited with status {code}: {tail}")]
    NonZeroExit { code: i32, tail: String },
}
