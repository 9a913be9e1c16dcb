//! Process-wide standard input slot.
//!
//! Everything here mutates descriptor 0 for the whole process. Only one
//! iteration may touch it at a time.

use crate::channel::SetupError;
use std::fs::File;
use std::io::{self, Read};
use std::mem::ManuallyDrop;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::path::Path;
use tracing::{trace, warn};

pub const STDIN_FD: RawFd = libc::STDIN_FILENO;

const NULL_DEVICE: &str = "/dev/null";

/// Atomically replaces descriptor 0 with a duplicate of `fd`.
///
/// Whatever occupied slot 0 before is closed by the kernel as part of the
/// swap.
pub fn bind_stdin(fd: RawFd) -> Result<(), SetupError> {
    loop {
        if unsafe { libc::dup2(fd, STDIN_FD) } != -1 {
            trace!(fd, "bound descriptor onto standard input");
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(SetupError::BindingFailed(err));
        }
    }
}

/// Points descriptor 0 at the null device so no reference to the previous
/// iteration's channel survives teardown.
///
/// Failures are logged and swallowed; releasing must never abort a run.
pub fn release_stdin() {
    release_stdin_to(Path::new(NULL_DEVICE));
}

/// Like [`release_stdin`], rebinding slot 0 to `device` instead.
///
/// If `device` cannot be opened, slot 0 is closed outright so the previous
/// binding still goes away.
pub fn release_stdin_to(device: &Path) {
    let null = match File::open(device) {
        Ok(f) => f,
        Err(error) => {
            warn!(%error, device = %device.display(), "could not open device to release standard input, closing it instead");
            if unsafe { libc::close(STDIN_FD) } == -1 {
                warn!(
                    error = %io::Error::last_os_error(),
                    "failed to close standard input"
                );
            }
            return;
        }
    };
    if null.as_raw_fd() == STDIN_FD {
        // Slot 0 was free and the device landed there; keep it.
        let _ = null.into_raw_fd();
        return;
    }
    if unsafe { libc::dup2(null.as_raw_fd(), STDIN_FD) } == -1 {
        warn!(
            error = %io::Error::last_os_error(),
            "failed to release standard input binding"
        );
    }
}

/// Unbuffered reader over descriptor 0.
///
/// `std::io::stdin()` keeps a process-global buffer that would leak bytes
/// from one iteration into the next; this reads the slot directly instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawStdin;

impl Read for RawStdin {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // Borrowed, never closed here.
        let file = ManuallyDrop::new(unsafe { File::from_raw_fd(STDIN_FD) });
        (&*file).read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Tests that rebind descriptor 0 live in tests/stdin_rebind.rs so they
    // get their own process.

    #[test]
    fn bind_rejects_invalid_descriptor() {
        match bind_stdin(-1) {
            Err(SetupError::BindingFailed(e)) => {
                assert_eq!(e.raw_os_error(), Some(libc::EBADF));
            }
            other => panic!("expected BindingFailed, got {other:?}"),
        }
    }
}
