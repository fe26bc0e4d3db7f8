//! Audio unix-socket path lifecycle.
//!
//! Audio PCM flows out-of-band through unix-domain stream sockets with
//! `chunk_len:u16-LE ‖ pcm` framing at 16 kHz s16 mono. The supervisor
//! owns only the path lifecycle: it hands fresh per-process paths to the
//! workers and unlinks stale files from crashed predecessors.

use std::path::{Path, PathBuf};

use tracing::info;

/// Per-process socket paths for both audio directions.
#[derive(Debug, Clone)]
pub struct AudioSocketPaths {
    pub mic: PathBuf,
    pub spk: PathBuf,
}

impl AudioSocketPaths {
    /// Paths for this process: `/tmp/rb-{mic,spk}-<pid>.sock`.
    pub fn for_current_process() -> Self {
        Self::for_pid(std::process::id(), Path::new("/tmp"))
    }

    pub fn for_pid(pid: u32, dir: &Path) -> Self {
        Self {
            mic: dir.join(format!("rb-mic-{pid}.sock")),
            spk: dir.join(format!("rb-spk-{pid}.sock")),
        }
    }

    /// Remove this process's socket files, ignoring absence.
    pub fn unlink(&self) {
        for path in [&self.mic, &self.spk] {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Remove leftover `rb-{mic,spk}-*.sock` files from previous crashes.
pub fn cleanup_stale_sockets(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let stale = (name.starts_with("rb-mic-") || name.starts_with("rb-spk-"))
            && name.ends_with(".sock");
        if stale && std::fs::remove_file(entry.path()).is_ok() {
            info!("cleaned up stale socket: {}", entry.path().display());
        }
    }
}
