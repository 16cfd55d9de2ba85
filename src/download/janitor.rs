//! Per-request cleanup of temporary files and transcoder processes
//!
//! Every temp path a request allocates and every process it spawns is registered
//! here. `cleanup()` removes what is left and signals live processes; it is safe
//! to call any number of times, and dropping the janitor runs it once more.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

/// Prefix of every temp file name the janitor hands out.
pub const TEMP_PREFIX: &str = "ytmux_";

/// Lifecycle of a tracked process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Spawned,
    Running,
    Closed,
    Killed,
    Errored,
}

impl ProcessState {
    pub fn is_finished(&self) -> bool {
        matches!(self, ProcessState::Closed | ProcessState::Killed | ProcessState::Errored)
    }
}

/// Shared handle to a process registered with the janitor.
///
/// The supervisor of the process watches `cancelled()` and terminates the child
/// when it fires.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    label: String,
    pid: Option<u32>,
    state: Arc<Mutex<ProcessState>>,
    cancel: CancellationToken,
}

impl ProcessHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        *lock(&self.state)
    }

    /// Moves the process to `state` unless it already reached a final state.
    pub fn set_state(&self, state: ProcessState) {
        let mut current = lock(&self.state);
        if !current.is_finished() {
            *current = state;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the janitor (or anyone else) asks the process to stop.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

#[derive(Debug)]
struct TempArtifact {
    path: PathBuf,
    removed: bool,
}

/// What a `cleanup()` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub files_removed: usize,
    pub processes_signalled: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes a file, treating "already gone" as success. Returns true if a file was deleted.
fn remove_file_quietly(path: &Path) -> bool {
    match fs_err::remove_file(path) {
        Ok(()) => {
            log::debug!("Removed temp file {}", path.display());
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            log::warn!("Failed to remove temp file: {}", e);
            false
        }
    }
}

/// Tracks temp artifacts and processes for one request.
#[derive(Debug)]
pub struct Janitor {
    temp_dir: PathBuf,
    artifacts: Mutex<Vec<TempArtifact>>,
    processes: Mutex<Vec<ProcessHandle>>,
}

impl Janitor {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            artifacts: Mutex::new(Vec::new()),
            processes: Mutex::new(Vec::new()),
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Reserves a unique path `<temp_dir>/ytmux_<uuid><suffix>` and tracks it.
    ///
    /// Nothing is created on disk; the caller (or the tool it runs) writes the file.
    pub fn allocate(&self, suffix: &str) -> PathBuf {
        let path = self
            .temp_dir
            .join(format!("{}{}{}", TEMP_PREFIX, Uuid::new_v4(), suffix));
        self.track(&path);
        path
    }

    /// Tracks an externally created path. Tracking the same path twice is a no-op.
    pub fn track(&self, path: &Path) {
        let mut artifacts = lock(&self.artifacts);
        if !artifacts.iter().any(|a| a.path == path) {
            artifacts.push(TempArtifact {
                path: path.to_path_buf(),
                removed: false,
            });
        }
    }

    /// Removes one tracked artifact right away. Returns true if a file was deleted.
    ///
    /// The artifact counts as handled afterwards; later cleanups skip it.
    pub fn remove_now(&self, path: &Path) -> bool {
        let claimed = {
            let mut artifacts = lock(&self.artifacts);
            match artifacts.iter_mut().find(|a| a.path == path) {
                Some(artifact) if !artifact.removed => {
                    artifact.removed = true;
                    true
                }
                Some(_) => false,
                None => {
                    log::warn!("Refusing to remove untracked path {}", path.display());
                    false
                }
            }
        };
        claimed && remove_file_quietly(path)
    }

    /// Registers a spawned process and returns its handle.
    pub fn track_process(&self, label: &str, pid: Option<u32>) -> ProcessHandle {
        let handle = ProcessHandle {
            label: label.to_string(),
            pid,
            state: Arc::new(Mutex::new(ProcessState::Spawned)),
            cancel: CancellationToken::new(),
        };
        lock(&self.processes).push(handle.clone());
        handle
    }

    /// Asks every live process to stop. Returns how many were signalled.
    pub fn terminate_processes(&self) -> usize {
        let processes = lock(&self.processes);
        let mut signalled = 0;
        for process in processes.iter() {
            if !process.state().is_finished() && !process.is_cancelled() {
                log::info!("Terminating {} (pid {:?})", process.label, process.pid);
                process.cancel();
                signalled += 1;
            }
        }
        signalled
    }

    /// Tracked artifacts not yet removed.
    pub fn outstanding(&self) -> usize {
        lock(&self.artifacts).iter().filter(|a| !a.removed).count()
    }

    /// Removes every outstanding artifact and signals every live process.
    pub fn cleanup(&self) -> CleanupReport {
        let processes_signalled = self.terminate_processes();

        let pending: Vec<PathBuf> = {
            let mut artifacts = lock(&self.artifacts);
            artifacts
                .iter_mut()
                .filter(|a| !a.removed)
                .map(|a| {
                    a.removed = true;
                    a.path.clone()
                })
                .collect()
        };
        let files_removed = pending.iter().filter(|path| remove_file_quietly(path)).count();

        if files_removed > 0 || processes_signalled > 0 {
            log::info!(
                "🧹 Cleanup: removed {} file(s), signalled {} process(es)",
                files_removed,
                processes_signalled
            );
        }

        CleanupReport {
            files_removed,
            processes_signalled,
        }
    }
}

impl Drop for Janitor {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn allocate_names_live_in_temp_dir() {
        let dir = TempDir::new().expect("tempdir");
        let janitor = Janitor::new(dir.path());
        let a = janitor.allocate(".mp4");
        let b = janitor.allocate(".mp4");
        assert_ne!(a, b);
        assert_eq!(a.parent(), Some(dir.path()));
        let name = a.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        assert!(name.starts_with(TEMP_PREFIX));
        assert!(name.ends_with(".mp4"));
        assert!(!a.exists());
        assert_eq!(janitor.outstanding(), 2);
    }

    #[test]
    fn cleanup_is_idempotent() {
        let dir = TempDir::new().expect("tempdir");
        let janitor = Janitor::new(dir.path());
        let written = janitor.allocate("_audio.m4a");
        let _never_written = janitor.allocate("_video.mp4");
        std::fs::write(&written, b"data").expect("write");

        let first = janitor.cleanup();
        assert_eq!(first.files_removed, 1);
        assert!(!written.exists());
        assert_eq!(janitor.outstanding(), 0);

        let second = janitor.cleanup();
        assert_eq!(second, CleanupReport::default());
    }

    #[test]
    fn remove_now_handles_each_path_once() {
        let dir = TempDir::new().expect("tempdir");
        let janitor = Janitor::new(dir.path());
        let path = janitor.allocate(".mp4");
        std::fs::write(&path, b"partial").expect("write");

        assert!(janitor.remove_now(&path));
        assert!(!janitor.remove_now(&path));
        assert_eq!(janitor.cleanup().files_removed, 0);
    }

    #[test]
    fn untracked_paths_are_left_alone() {
        let dir = TempDir::new().expect("tempdir");
        let janitor = Janitor::new(dir.path());
        let foreign = dir.path().join("keep.txt");
        std::fs::write(&foreign, b"keep").expect("write");
        assert!(!janitor.remove_now(&foreign));
        janitor.cleanup();
        assert!(foreign.exists());
    }

    #[test]
    fn drop_removes_outstanding_files() {
        let dir = TempDir::new().expect("tempdir");
        let path = {
            let janitor = Janitor::new(dir.path());
            let path = janitor.allocate(".mp4");
            std::fs::write(&path, b"x").expect("write");
            path
        };
        assert!(!path.exists());
    }

    #[test]
    fn live_processes_are_signalled_once() {
        let janitor = Janitor::new(std::env::temp_dir());
        let running = janitor.track_process("ffmpeg", Some(1234));
        running.set_state(ProcessState::Running);
        let done = janitor.track_process("ffmpeg", Some(5678));
        done.set_state(ProcessState::Closed);

        assert_eq!(janitor.cleanup().processes_signalled, 1);
        assert!(running.is_cancelled());
        assert!(!done.is_cancelled());
        assert_eq!(janitor.cleanup().processes_signalled, 0);
    }

    #[test]
    fn final_process_state_sticks() {
        let janitor = Janitor::new(std::env::temp_dir());
        let handle = janitor.track_process("ffmpeg", None);
        handle.set_state(ProcessState::Killed);
        handle.set_state(ProcessState::Closed);
        assert_eq!(handle.state(), ProcessState::Killed);
    }
}
