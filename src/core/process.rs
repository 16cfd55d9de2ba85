//! Process execution utilities with timeout support
//!
//! Provides helpers for running external processes (ffmpeg, yt-dlp) with configurable
//! timeouts, plus `ChannelTable`, which maps extra numbered pipes (fd 3 and up) into a
//! child so ffmpeg can read several inputs and report progress on separate channels.

use std::collections::HashMap;
use std::process::{ExitStatus, Output};
use std::time::Duration;
use tokio::process::{Child, Command};

use crate::core::error::{AppError, AppResult};

/// First descriptor number handed out to extra channels.
pub const FIRST_CHANNEL_FD: i32 = 3;

/// Upper bound on extra channels per child.
pub const MAX_CHANNELS: usize = 8;

/// Run an async Command with a timeout.
///
/// Returns the process Output on success, or an AppError on timeout/IO failure.
/// The command is configured with `kill_on_drop`, so a timed out child is killed.
pub async fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<Output, AppError> {
    cmd.kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(AppError::Io(e)),
        Err(_) => Err(AppError::ProcessTimeout {
            program: program_name(cmd),
            after: timeout,
        }),
    }
}

fn program_name(cmd: &Command) -> String {
    cmd.as_std().get_program().to_string_lossy().into_owned()
}

/// Last `max_chars` characters of a tool's stderr, for error messages.
pub fn stderr_tail(stderr: &[u8], max_chars: usize) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - max_chars).collect()
}

/// Human-readable description of an exit status ("code 1", "signal 15").
pub fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("code {}", code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal {}", signal);
        }
    }
    "unknown status".to_string()
}

/// Asks a child to stop (SIGTERM on unix), waits up to `grace`, then kills it.
pub async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: `kill` has no memory-safety preconditions; the pid belongs to a child
        // that has not been reaped yet, because `Child::id` returns None after reaping.
        #[allow(unsafe_code)]
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
                log::debug!("Child {} exited after SIGTERM ({})", pid, describe_exit(&status));
                return;
            }
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        log::warn!("Failed to kill child process: {}", e);
    }
}

/// Direction of an extra channel, seen from the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelDirection {
    /// Child reads, parent writes
    ChildReads,
    /// Child writes, parent reads
    ChildWrites,
}

#[derive(Debug, Clone)]
struct ChannelSpec {
    name: &'static str,
    direction: ChannelDirection,
    fd: i32,
}

/// Named extra descriptors for a child process.
///
/// Channels are numbered in declaration order starting at fd 3, so a table built
/// with `output("progress").input("audio").input("video")` gives the child
/// progress on 3, audio on 4 and video on 5. The child refers to them as
/// `pipe:N` (see [`ChannelTable::pipe_arg`]).
#[derive(Debug, Clone, Default)]
pub struct ChannelTable {
    specs: Vec<ChannelSpec>,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a channel the child reads from.
    #[must_use]
    pub fn input(self, name: &'static str) -> Self {
        self.push(name, ChannelDirection::ChildReads)
    }

    /// Adds a channel the child writes to.
    #[must_use]
    pub fn output(self, name: &'static str) -> Self {
        self.push(name, ChannelDirection::ChildWrites)
    }

    fn push(mut self, name: &'static str, direction: ChannelDirection) -> Self {
        let fd = FIRST_CHANNEL_FD + self.specs.len() as i32;
        self.specs.push(ChannelSpec { name, direction, fd });
        self
    }

    /// Descriptor number the named channel gets inside the child.
    pub fn fd_of(&self, name: &str) -> Option<i32> {
        self.specs.iter().find(|s| s.name == name).map(|s| s.fd)
    }

    /// `pipe:N` argument naming the channel for ffmpeg.
    pub fn pipe_arg(&self, name: &str) -> AppResult<String> {
        self.fd_of(name)
            .map(|fd| format!("pipe:{}", fd))
            .ok_or_else(|| AppError::Merge(format!("unknown channel '{}'", name)))
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    fn validate(&self) -> AppResult<()> {
        if self.specs.len() > MAX_CHANNELS {
            return Err(AppError::Merge(format!(
                "too many channels ({}, max {})",
                self.specs.len(),
                MAX_CHANNELS
            )));
        }
        for (i, spec) in self.specs.iter().enumerate() {
            if self.specs[..i].iter().any(|other| other.name == spec.name) {
                return Err(AppError::Merge(format!("duplicate channel '{}'", spec.name)));
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
pub use unix_channels::SpawnedProcess;

#[cfg(unix)]
mod unix_channels {
    use super::*;
    use std::os::fd::{AsRawFd, OwnedFd, RawFd};
    use tokio::net::unix::pipe;

    /// A spawned child together with the parent ends of its extra channels.
    pub struct SpawnedProcess {
        pub child: Child,
        writers: HashMap<&'static str, pipe::Sender>,
        readers: HashMap<&'static str, pipe::Receiver>,
    }

    impl SpawnedProcess {
        /// Parent end of a channel the child reads from. Dropping it closes the channel.
        pub fn take_writer(&mut self, name: &str) -> AppResult<pipe::Sender> {
            self.writers
                .remove(name)
                .ok_or_else(|| AppError::Merge(format!("no input channel '{}'", name)))
        }

        /// Parent end of a channel the child writes to.
        pub fn take_reader(&mut self, name: &str) -> AppResult<pipe::Receiver> {
            self.readers
                .remove(name)
                .ok_or_else(|| AppError::Merge(format!("no output channel '{}'", name)))
        }
    }

    /// Staging area for descriptors in `pre_exec`; far above any channel target.
    const STAGING_FD_FLOOR: RawFd = 100;

    impl ChannelTable {
        /// Spawns `cmd` with every channel mapped to its descriptor number.
        pub fn spawn(&self, cmd: &mut Command) -> AppResult<SpawnedProcess> {
            self.validate()?;

            let mut child_ends: Vec<OwnedFd> = Vec::with_capacity(self.specs.len());
            let mut mapping: Vec<(RawFd, RawFd)> = Vec::with_capacity(self.specs.len());
            let mut parent_writers = Vec::new();
            let mut parent_readers = Vec::new();

            for spec in &self.specs {
                let (reader, writer) = std::io::pipe()?;
                match spec.direction {
                    ChannelDirection::ChildReads => {
                        let child_end = OwnedFd::from(reader);
                        mapping.push((child_end.as_raw_fd(), spec.fd));
                        child_ends.push(child_end);
                        parent_writers.push((spec.name, OwnedFd::from(writer)));
                    }
                    ChannelDirection::ChildWrites => {
                        let child_end = OwnedFd::from(writer);
                        mapping.push((child_end.as_raw_fd(), spec.fd));
                        child_ends.push(child_end);
                        parent_readers.push((spec.name, OwnedFd::from(reader)));
                    }
                }
            }

            // SAFETY: the hook runs in the forked child before exec and only calls
            // async-signal-safe functions (fcntl, dup2) on a stack array; `mapping`
            // was allocated before the fork and is only read.
            #[allow(unsafe_code)]
            unsafe {
                cmd.pre_exec(move || remap_descriptors(&mapping));
            }

            let child = cmd.spawn()?;
            // The child holds its own copies now.
            drop(child_ends);

            let mut writers = HashMap::new();
            for (name, fd) in parent_writers {
                writers.insert(name, pipe::Sender::from_owned_fd(fd)?);
            }
            let mut readers = HashMap::new();
            for (name, fd) in parent_readers {
                readers.insert(name, pipe::Receiver::from_owned_fd(fd)?);
            }

            Ok(SpawnedProcess {
                child,
                writers,
                readers,
            })
        }
    }

    /// Moves every source descriptor onto its target number.
    ///
    /// Sources are first duplicated above `STAGING_FD_FLOOR` so that a `dup2` onto a
    /// low target can never clobber a source that has not been mapped yet. The staged
    /// copies are close-on-exec; the `dup2` targets are not, so only they survive exec.
    fn remap_descriptors(mapping: &[(RawFd, RawFd)]) -> std::io::Result<()> {
        let mut staged: [RawFd; MAX_CHANNELS] = [-1; MAX_CHANNELS];
        for (slot, (source, _)) in staged.iter_mut().zip(mapping) {
            // SAFETY: plain descriptor syscall, no memory is touched.
            #[allow(unsafe_code)]
            let fd = unsafe { libc::fcntl(*source, libc::F_DUPFD_CLOEXEC, STAGING_FD_FLOOR) };
            if fd < 0 {
                return Err(std::io::Error::last_os_error());
            }
            *slot = fd;
        }
        for (staged_fd, (_, target)) in staged.iter().zip(mapping) {
            // SAFETY: as above.
            #[allow(unsafe_code)]
            let rc = unsafe { libc::dup2(*staged_fd, *target) };
            if rc < 0 {
                return Err(std::io::Error::last_os_error());
            }
        }
        Ok(())
    }
}

#[cfg(not(unix))]
impl ChannelTable {
    /// Extra descriptors are a unix facility.
    pub fn spawn(&self, _cmd: &mut Command) -> AppResult<std::convert::Infallible> {
        self.validate()?;
        Err(AppError::Merge("numbered pipe channels require a unix platform".to_string()))
    }
}
