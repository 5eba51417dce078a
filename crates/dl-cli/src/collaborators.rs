//! Concrete collaborator implementations wired into `dl_core::engine::Collaborators`
//! for this CLI process. Each implementation is intentionally minimal: the
//! CLI is a thin shell, so these exist only to satisfy the engine's external
//! interfaces, not to carry any download logic of their own.

use std::io::Write as _;
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

use dl_core::interfaces::FilenameHelper;
use dl_core::interfaces::{CompletionSound, NetworkStatusProvider};
use dl_core::network_gate::NetworkStatus;

/// Connectivity probe: a short TCP connect attempt to a well-known host.
/// Good enough for a CLI invocation; a long-lived host app would instead
/// subscribe to OS connectivity-change notifications.
pub struct SystemNetwork;

impl NetworkStatusProvider for SystemNetwork {
    fn status(&self) -> NetworkStatus {
        let reachable = TcpStream::connect_timeout(
            &"1.1.1.1:443".parse().expect("valid socket addr"),
            Duration::from_millis(800),
        )
        .is_ok();
        NetworkStatus {
            network_available: true,
            internet_reachable: reachable,
            wifi_active: true,
        }
    }
}

/// Sanitizes and de-collides filenames directly on the local filesystem.
pub struct LocalFilenameHelper;

impl FilenameHelper for LocalFilenameHelper {
    fn sanitize_extreme(&self, name: &str) -> String {
        dl_core::url_model::sanitize_filename_for_linux(name)
    }

    fn rename_if_exists(&self, dir: &str, name: &str) -> String {
        let base = Path::new(dir).join(name);
        if !base.exists() {
            return name.to_string();
        }
        let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
        let ext = base.extension().and_then(|s| s.to_str());
        for n in 1..10_000u32 {
            let candidate = match ext {
                Some(ext) => format!("{stem} ({n}).{ext}"),
                None => format!("{stem} ({n})"),
            };
            if !Path::new(dir).join(&candidate).exists() {
                return candidate;
            }
        }
        name.to_string()
    }

    fn validate_existed_name(&self, dir: &str, name: &str) -> bool {
        Path::new(dir).join(name).exists()
    }

    fn find_file_starting_with(&self, dir: &str, prefix: &str) -> Option<std::path::PathBuf> {
        std::fs::read_dir(dir).ok()?.flatten().find_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            if name.starts_with(prefix) {
                Some(entry.path())
            } else {
                None
            }
        })
    }

    fn is_file_name_valid(&self, name: &str) -> bool {
        !name.is_empty() && !name.contains('/') && !name.contains('\0')
    }
}

/// Rings the terminal bell on task completion.
pub struct TerminalBell;

impl CompletionSound for TerminalBell {
    fn play(&self) {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(b"\x07");
        let _ = stdout.flush();
    }
}
