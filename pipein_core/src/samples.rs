//! Small stdin-reading targets for exercising the harness end to end.

use crate::binding::RawStdin;
use crate::entry::{EntryPoint, FnEntry, GlobalStdinEntry};
use anyhow::{anyhow, bail};
use std::io::{ErrorKind, Read};

/// Longest request line the samples accept.
pub const MAX_LINE: usize = 8 * 1024;

pub const SAMPLE_NAMES: &[&str] = &["request-line", "drain", "stdin-request-line"];

/// Reads one `\n`-terminated line a byte at a time, so nothing past the line
/// is consumed. A would-block condition counts as end of input.
pub fn read_line_unbuffered(stdin: &mut dyn Read, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    while line.len() < limit {
        match stdin.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                line.push(byte[0]);
                if byte[0] == b'\n' {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(line)
}

/// A parsed HTTP/1.x request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub target: String,
    pub version: String,
}

pub fn parse_request_line(line: &[u8]) -> Result<RequestLine, anyhow::Error> {
    let line = line
        .strip_suffix(b"\r\n")
        .ok_or_else(|| anyhow!("request line is not CRLF terminated"))?;
    let text = std::str::from_utf8(line)?;
    let mut parts = text.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        bail!("request line must have exactly three fields");
    };
    if method.is_empty() || !method.bytes().all(|b| b.is_ascii_uppercase()) {
        bail!("invalid method {method:?}");
    }
    if !target.starts_with('/') && target != "*" {
        bail!("invalid request target {target:?}");
    }
    if !matches!(version, "HTTP/1.0" | "HTTP/1.1") {
        bail!("unsupported version {version:?}");
    }
    Ok(RequestLine {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
    })
}

pub fn request_line(stdin: &mut dyn Read) -> Result<(), anyhow::Error> {
    let line = read_line_unbuffered(stdin, MAX_LINE)?;
    let parsed = parse_request_line(&line)?;
    tracing::trace!(?parsed, "parsed request line");
    Ok(())
}

/// Consumes whatever input is left.
pub fn drain(stdin: &mut dyn Read) -> Result<(), anyhow::Error> {
    let mut buf = [0u8; 4096];
    let mut total = 0usize;
    loop {
        match stdin.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    tracing::trace!(total, "drained remaining input");
    Ok(())
}

/// Same as [`request_line`], but reading descriptor 0 directly.
pub fn stdin_request_line() -> Result<(), anyhow::Error> {
    request_line(&mut RawStdin)
}

/// Looks up a sample entry point by name.
pub fn sample_entry(name: &str) -> Option<Box<dyn EntryPoint>> {
    match name {
        "request-line" => Some(Box::new(FnEntry::new(name, request_line))),
        "drain" => Some(Box::new(FnEntry::new(name, drain))),
        "stdin-request-line" => Some(Box::new(GlobalStdinEntry::new(
            name,
            stdin_request_line,
        ))),
        _ => None,
    }
}
