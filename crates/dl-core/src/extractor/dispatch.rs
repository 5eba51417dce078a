//! Extractor child-process dispatch.
//!
//! Uses the same subprocess idiom as the rest of this ecosystem for
//! external-tool invocation: an async `Command` with piped stdout, a
//! line-oriented async reader driving the progress callback, and an
//! awaited exit status. The process is identifiable and killable by the
//! owning `Record`'s id (one extractor child at most per task).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use super::progress::parse_progress_line;
use crate::interfaces::{Extractor, ExtractorArg, ExtractorRequest, ExtractorResult};

/// Invokes a configured external binary (e.g. a `yt-dlp`-compatible tool)
/// as a child process, keyed by task id so at most one runs per task and
/// a pause/cancel can kill it by id.
pub struct ProcessExtractor {
    command: String,
    children: Mutex<HashMap<u64, tokio::process::Child>>,
}

impl ProcessExtractor {
    pub fn new(command: impl Into<String>) -> Self {
        ProcessExtractor {
            command: command.into(),
            children: Mutex::new(HashMap::new()),
        }
    }

    fn build_args(args: &[ExtractorArg]) -> Vec<String> {
        let mut out = Vec::with_capacity(args.len() * 2);
        for a in args {
            out.push(a.flag.clone());
            if let Some(v) = &a.value {
                out.push(v.clone());
            }
        }
        out
    }
}

impl Extractor for ProcessExtractor {
    fn invoke<'a>(
        &'a self,
        id: u64,
        mut request: ExtractorRequest<'a>,
    ) -> crate::interfaces::BoxFuture<'a, Result<ExtractorResult>> {
        Box::pin(async move {
            let started = Instant::now();
            let mut cmd_args = Self::build_args(&request.args);
            cmd_args.push(request.url.clone());

            let mut child: Child = Command::new(&self.command)
                .args(&cmd_args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .with_context(|| format!("spawn extractor `{}`", self.command))?;

            let stdout = child.stdout.take().context("no stdout handle")?;
            let stderr = child.stderr.take().context("no stderr handle")?;

            {
                let pid_slot = child;
                self.children.lock().unwrap().insert(id, pid_slot);
            }

            let mut last_status = String::new();
            {
                let mut reader = BufReader::new(stdout).lines();
                while let Some(line) = reader.next_line().await.unwrap_or(None) {
                    let (pct, status) = parse_progress_line(&line);
                    last_status = status.to_string();
                    if let Some(pct) = pct {
                        if pct > 0.0 {
                            (request.on_progress)(pct, status);
                        }
                    } else {
                        (request.on_progress)(-1.0, status);
                    }
                }
            }

            {
                let mut stderr_reader = BufReader::new(stderr).lines();
                while let Some(line) = stderr_reader.next_line().await.unwrap_or(None) {
                    tracing::debug!(id, line = %line, "extractor stderr");
                }
            }

            let mut guard = self.children.lock().unwrap();
            let mut child = guard.remove(&id).context("child disappeared")?;
            drop(guard);

            let status = child.wait().await.context("wait for extractor child")?;
            Ok(ExtractorResult {
                exit_code: status.code().unwrap_or(-1),
                stdout_tail: last_status,
                elapsed_ms: started.elapsed().as_millis() as u64,
            })
        })
    }

    fn kill(&self, id: u64) {
        if let Some(mut child) = self.children.lock().unwrap().remove(&id) {
            let _ = child.start_kill();
        }
    }
}
