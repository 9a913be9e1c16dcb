//! Rebind-mode iterations. These swap descriptor 0 of the test process, so
//! every test takes `STDIN_LOCK` first.

use pipein_core::samples::{MAX_LINE, read_line_unbuffered};
use pipein_core::{
    BindingMode, FnEntry, GlobalStdinEntry, Harness, HarnessConfig, IterationOutcome,
    ProvisionerState, RawStdin,
};
use pipein_core::binding::{bind_stdin, release_stdin, release_stdin_to};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::Mutex;

static STDIN_LOCK: Mutex<()> = Mutex::new(());
static LAST_LINE: Mutex<Vec<u8>> = Mutex::new(Vec::new());

fn lock_stdin() -> std::sync::MutexGuard<'static, ()> {
    STDIN_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

fn fd_mode(fd: i32) -> libc::mode_t {
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    assert_eq!(unsafe { libc::fstat(fd, &mut stat) }, 0, "fstat({fd}) failed");
    stat.st_mode & libc::S_IFMT
}

fn record_stdin_line() -> Result<(), anyhow::Error> {
    let line = read_line_unbuffered(&mut RawStdin, MAX_LINE)?;
    *LAST_LINE.lock().unwrap() = line;
    Ok(())
}

fn rebind_harness() -> Harness {
    let config = HarnessConfig::default();
    assert_eq!(config.harness.binding, BindingMode::Rebind);
    Harness::new(&config)
}

#[test]
fn request_line_arrives_on_standard_input() {
    let _guard = lock_stdin();
    let mut harness = rebind_harness();
    harness
        .add_entry(GlobalStdinEntry::new("record-line", record_stdin_line))
        .unwrap();

    let status = harness.run_one(b"GET / HTTP/1.0\r\n\r\n");

    assert_eq!(status, 0);
    assert_eq!(*LAST_LINE.lock().unwrap(), b"GET / HTTP/1.0\r\n");
    assert_eq!(harness.state(), ProvisionerState::Idle);
    // Slot 0 no longer references the pipe.
    assert_ne!(fd_mode(libc::STDIN_FILENO), libc::S_IFIFO);
}

#[test]
fn standard_input_is_a_nonblocking_pipe_during_invocation() {
    let _guard = lock_stdin();
    let mut harness = rebind_harness();
    harness
        .add_entry(FnEntry::new("inspect", |_stdin: &mut dyn Read| {
            assert_eq!(fd_mode(libc::STDIN_FILENO), libc::S_IFIFO);
            let flags = unsafe { libc::fcntl(libc::STDIN_FILENO, libc::F_GETFL, 0) };
            assert_ne!(flags & libc::O_NONBLOCK, 0);
            Ok(())
        }))
        .unwrap();

    let outcome = harness.run_iteration(b"anything").unwrap();
    assert!(outcome.is_success());
    assert!(outcome.report().unwrap().prepared.stdin_bound);
}

#[test]
fn explicit_reader_and_descriptor_zero_share_one_stream() {
    let _guard = lock_stdin();
    let mut harness = rebind_harness();
    harness
        .add_entry(FnEntry::new("explicit", |stdin: &mut dyn Read| {
            let mut head = [0u8; 3];
            stdin.read_exact(&mut head)?;
            assert_eq!(&head, b"one");
            Ok(())
        }))
        .unwrap();
    harness
        .add_entry(FnEntry::new("global", |_stdin: &mut dyn Read| {
            let mut rest = Vec::new();
            RawStdin.read_to_end(&mut rest)?;
            assert_eq!(rest, b"two");
            Ok(())
        }))
        .unwrap();

    let outcome = harness.run_iteration(b"onetwo").unwrap();
    assert!(outcome.is_success());
}

#[test]
fn empty_input_is_end_of_input_on_standard_input() {
    let _guard = lock_stdin();
    let mut harness = rebind_harness();
    harness
        .add_entry(FnEntry::new("eof", |_stdin: &mut dyn Read| {
            let mut buf = [0u8; 16];
            assert_eq!(RawStdin.read(&mut buf)?, 0);
            Ok(())
        }))
        .unwrap();

    let outcome = harness.run_iteration(&[]).unwrap();
    assert!(outcome.is_success());
}

#[test]
fn many_iterations_do_not_leak_descriptors() {
    let _guard = lock_stdin();
    let mut harness = Harness::from_config(&HarnessConfig::default()).unwrap();

    let first = match harness.run_iteration(b"GET /a HTTP/1.1\r\n").unwrap() {
        IterationOutcome::Completed(report) => report.prepared.read_fd,
        IterationOutcome::Skipped(e) => panic!("unexpected skip: {e}"),
    };
    for _ in 0..2_000 {
        assert_eq!(harness.run_one(b"GET /b HTTP/1.1\r\n"), 0);
    }
    let last = match harness.run_iteration(b"GET /c HTTP/1.1\r\n").unwrap() {
        IterationOutcome::Completed(report) => report.prepared.read_fd,
        IterationOutcome::Skipped(e) => panic!("unexpected skip: {e}"),
    };
    // Descriptor numbers are recycled, so a leak would push them upward.
    assert!(last <= first + 4, "descriptors grew from {first} to {last}");
}

#[test]
fn release_closes_standard_input_when_device_is_missing() {
    let _guard = lock_stdin();
    let (reader, mut writer) = std::io::pipe().unwrap();
    bind_stdin(reader.as_raw_fd()).unwrap();
    drop(reader);
    assert_eq!(fd_mode(libc::STDIN_FILENO), libc::S_IFIFO);

    release_stdin_to(Path::new("/nonexistent/pipein-null"));

    let rc = unsafe { libc::fcntl(libc::STDIN_FILENO, libc::F_GETFD) };
    assert_eq!(rc, -1, "standard input still open");
    // Slot 0 held the last read reference.
    let err = writer.write(b"x").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BrokenPipe);

    release_stdin();
    assert_eq!(fd_mode(libc::STDIN_FILENO), libc::S_IFCHR);
}
