use std::io::{self, ErrorKind, PipeReader, PipeWriter, Write};
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};
use thiserror::Error;
use tracing::{debug, warn};

/// Pipe capacity assumed when the platform cannot report it.
pub const FALLBACK_PIPE_CAPACITY: usize = 64 * 1024;

/// Errors raised while setting up an iteration's input channel.
///
/// `ChannelCreationFailed`, `WriteFailed` and `ModeConfigFailed` point at
/// resource exhaustion or a corrupted environment and are expected to recur,
/// so they are fatal for the whole process. The rest only spoil the current
/// iteration.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("failed to create input channel: {0}")]
    ChannelCreationFailed(#[source] io::Error),

    #[error("failed to write input into channel: {0}")]
    WriteFailed(#[source] io::Error),

    #[error("failed to configure non-blocking mode on {end} end: {source}")]
    ModeConfigFailed {
        end: ChannelEnd,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind channel read end onto standard input: {0}")]
    BindingFailed(#[source] io::Error),

    #[error("an iteration is already prepared; tear it down first")]
    AlreadyPrepared,

    #[error("input of {requested} bytes exceeds channel capacity of {capacity} bytes")]
    InputTooLarge { requested: usize, capacity: usize },
}

impl SetupError {
    /// Whether the process should stop fuzzing altogether.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SetupError::ChannelCreationFailed(_)
                | SetupError::WriteFailed(_)
                | SetupError::ModeConfigFailed { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEnd {
    Read,
    Write,
}

impl std::fmt::Display for ChannelEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelEnd::Read => f.write_str("read"),
            ChannelEnd::Write => f.write_str("write"),
        }
    }
}

/// An anonymous unidirectional pipe carrying one iteration's input.
///
/// The write end is consumed by [`ByteChannel::fill`]; after that only the
/// read end remains, and it is released either by dropping the channel or
/// through [`ByteChannel::release`].
#[derive(Debug)]
pub struct ByteChannel {
    reader: PipeReader,
    writer: Option<PipeWriter>,
    read_fd: RawFd,
    write_fd: RawFd,
}

impl ByteChannel {
    pub fn open() -> Result<Self, SetupError> {
        let (reader, writer) = io::pipe().map_err(SetupError::ChannelCreationFailed)?;
        let read_fd = reader.as_raw_fd();
        let write_fd = writer.as_raw_fd();
        debug!(read_fd, write_fd, "opened input channel");
        Ok(Self {
            reader,
            writer: Some(writer),
            read_fd,
            write_fd,
        })
    }

    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Descriptor number the write end had, even once it has been closed.
    pub fn write_fd(&self) -> RawFd {
        self.write_fd
    }

    pub fn has_write_end(&self) -> bool {
        self.writer.is_some()
    }

    pub fn reader(&mut self) -> &mut PipeReader {
        &mut self.reader
    }

    /// Current capacity of the pipe, when the platform exposes it.
    pub fn capacity(&self) -> Option<usize> {
        pipe_capacity_of(self.read_fd)
    }

    /// Tries to enlarge the pipe so that `wanted` bytes fit without a reader.
    ///
    /// Returns the resulting capacity. Only Linux supports resizing; elsewhere
    /// this reports `ErrorKind::Unsupported`.
    pub fn grow_to(&mut self, wanted: usize) -> io::Result<usize> {
        grow_pipe(self.read_fd, wanted)
    }

    /// Writes `data` once through the write end and closes it.
    ///
    /// The write end is switched to non-blocking first, so a buffer larger
    /// than the pipe yields a prefix instead of a hang. Returns how many bytes
    /// the channel accepted.
    pub fn fill(&mut self, data: &[u8]) -> Result<usize, SetupError> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| SetupError::WriteFailed(ErrorKind::BrokenPipe.into()))?;
        set_nonblocking(writer.as_raw_fd()).map_err(|source| SetupError::ModeConfigFailed {
            end: ChannelEnd::Write,
            source,
        })?;

        let mut written = 0;
        while written < data.len() {
            match writer.write(&data[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(SetupError::WriteFailed(e)),
            }
        }

        release(OwnedFd::from(writer), ChannelEnd::Write);
        Ok(written)
    }

    pub fn set_read_nonblocking(&self) -> Result<(), SetupError> {
        set_nonblocking(self.read_fd).map_err(|source| SetupError::ModeConfigFailed {
            end: ChannelEnd::Read,
            source,
        })
    }

    /// Closes whatever ends are still open, logging close failures.
    pub fn release(self) {
        if let Some(writer) = self.writer {
            release(OwnedFd::from(writer), ChannelEnd::Write);
        }
        release(OwnedFd::from(self.reader), ChannelEnd::Read);
    }
}

/// Default capacity of a fresh pipe on this platform.
pub fn default_pipe_capacity() -> io::Result<usize> {
    let (reader, _writer) = io::pipe()?;
    Ok(pipe_capacity_of(reader.as_raw_fd()).unwrap_or(FALLBACK_PIPE_CAPACITY))
}

pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn release(fd: OwnedFd, end: ChannelEnd) {
    let raw = fd.into_raw_fd();
    if unsafe { libc::close(raw) } != 0 {
        warn!(
            fd = raw,
            %end,
            error = %io::Error::last_os_error(),
            "failed to release channel descriptor"
        );
    }
}

#[cfg(target_os = "linux")]
fn pipe_capacity_of(fd: RawFd) -> Option<usize> {
    let size = unsafe { libc::fcntl(fd, libc::F_GETPIPE_SZ) };
    usize::try_from(size).ok()
}

#[cfg(not(target_os = "linux"))]
fn pipe_capacity_of(_fd: RawFd) -> Option<usize> {
    None
}

#[cfg(target_os = "linux")]
fn grow_pipe(fd: RawFd, wanted: usize) -> io::Result<usize> {
    let max = std::fs::read_to_string("/proc/sys/fs/pipe-max-size")
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .unwrap_or(1024 * 1024);
    let target = wanted.min(max);
    let target = libc::c_int::try_from(target).unwrap_or(libc::c_int::MAX);
    let size = unsafe { libc::fcntl(fd, libc::F_SETPIPE_SZ, target) };
    if size == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(size as usize)
}

#[cfg(not(target_os = "linux"))]
fn grow_pipe(_fd: RawFd, _wanted: usize) -> io::Result<usize> {
    Err(ErrorKind::Unsupported.into())
}
