//! Pid-file marker advertising an active worker pool.
//!
//! The file holds two lines: the owning process id and the worker count.
//! Other processes use it to report pool status and to ask the pool to stop.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::warn;

use super::pool::PoolError;

/// File name of the marker inside the data directory.
pub const MARKER_FILE: &str = "worker.pid";

/// Contents of the marker file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolMarker {
    pub pid: u32,
    pub workers: usize,
}

impl PoolMarker {
    /// Marker for the current process.
    pub fn current(workers: usize) -> Self {
        Self {
            pid: std::process::id(),
            workers,
        }
    }

    fn encode(&self) -> String {
        format!("{}\n{}\n", self.pid, self.workers)
    }

    fn decode(raw: &str) -> Option<Self> {
        let mut lines = raw.lines().map(str::trim);
        let pid = lines.next()?.parse().ok()?;
        // A pid-only marker still names a running pool of at least one worker.
        let workers = lines
            .next()
            .and_then(|l| l.parse().ok())
            .unwrap_or(1);
        Some(Self { pid, workers })
    }
}

/// Handle on the marker file at a fixed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessMarker {
    path: PathBuf,
}

impl LivenessMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Marker at `<dir>/worker.pid`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(MARKER_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, marker: PoolMarker) -> Result<(), PoolError> {
        std::fs::write(&self.path, marker.encode()).map_err(|e| {
            PoolError::Marker(format!("failed to write {}: {e}", self.path.display()))
        })
    }

    /// Read the marker regardless of whether its process is alive.
    ///
    /// A missing or unparsable file reads as `None`.
    pub fn read(&self) -> Result<Option<PoolMarker>, PoolError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => {
                let marker = PoolMarker::decode(&raw);
                if marker.is_none() {
                    warn!(path = %self.path.display(), "ignoring unparsable pid file");
                }
                Ok(marker)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PoolError::Marker(format!(
                "failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// The marker, if its process is still alive.
    pub fn active(&self) -> Result<Option<PoolMarker>, PoolError> {
        Ok(self.read()?.filter(|m| is_alive(m.pid)))
    }

    /// Remove the file; a missing file is not an error.
    pub fn remove(&self) -> Result<(), PoolError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PoolError::Marker(format!(
                "failed to remove {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Send SIGTERM to the live pool named by the marker.
    ///
    /// A stale marker is removed and reported as `NotRunning`.
    pub fn signal_stop(&self) -> Result<PoolMarker, PoolError> {
        let Some(marker) = self.read()? else {
            return Err(PoolError::NotRunning);
        };
        if !is_alive(marker.pid) {
            self.remove()?;
            return Err(PoolError::NotRunning);
        }
        kill(to_pid(marker.pid)?, Signal::SIGTERM).map_err(|e| {
            PoolError::Marker(format!("failed to signal pid {}: {e}", marker.pid))
        })?;
        Ok(marker)
    }
}

/// Whether a process with `pid` exists (signal 0 probe).
pub fn is_alive(pid: u32) -> bool {
    let Ok(pid) = to_pid(pid) else {
        return false;
    };
    // EPERM means the process exists but belongs to someone else.
    matches!(kill(pid, None), Ok(()) | Err(Errno::EPERM))
}

fn to_pid(pid: u32) -> Result<Pid, PoolError> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Ok(Pid::from_raw(raw)),
        _ => Err(PoolError::Marker(format!("invalid pid {pid}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let marker = LivenessMarker::in_dir(dir.path());
        assert_eq!(marker.read().unwrap(), None);

        marker.write(PoolMarker::current(3)).unwrap();
        let raw = std::fs::read_to_string(marker.path()).unwrap();
        assert_eq!(raw, format!("{}\n3\n", std::process::id()));

        let read = marker.active().unwrap().unwrap();
        assert_eq!(read.workers, 3);
        assert_eq!(read.pid, std::process::id());

        marker.remove().unwrap();
        marker.remove().unwrap();
        assert_eq!(marker.read().unwrap(), None);
    }

    #[test]
    fn pid_only_markers_are_accepted() {
        assert_eq!(
            PoolMarker::decode("1234\n"),
            Some(PoolMarker {
                pid: 1234,
                workers: 1
            })
        );
        assert_eq!(PoolMarker::decode("garbage"), None);
    }

    #[test]
    fn dead_pids_are_not_active() {
        let dir = tempfile::tempdir().unwrap();
        let marker = LivenessMarker::in_dir(dir.path());
        // Beyond the default pid_max on Linux.
        marker
            .write(PoolMarker {
                pid: 99_999_999,
                workers: 1,
            })
            .unwrap();

        assert!(marker.read().unwrap().is_some());
        assert_eq!(marker.active().unwrap(), None);
        assert!(matches!(marker.signal_stop(), Err(PoolError::NotRunning)));
        assert_eq!(marker.read().unwrap(), None);
    }

    #[test]
    fn current_process_is_alive() {
        assert!(is_alive(std::process::id()));
        assert!(!is_alive(0));
    }
}
