//! Crash log block rendering.
//!
//! Rendering is generic over [`fmt::Write`] so the same layout is produced
//! into a `String` on the panic path and into a preallocated byte buffer
//! inside a signal handler.

use std::fmt::{self, Write};

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::models::crash::FaultDescription;
use crate::tasks::TaskRegistry;

/// Opening and closing line of every crash block.
pub const DELIMITER: &str = "========================================";

/// Header prefix of every crash block.
pub const HEADER_PREFIX: &str = "Crash Report - ";

const TRUNCATION_NOTICE: &[u8] = b"\n[report truncated]\n";

/// Write one complete crash block.
///
/// # Errors
///
/// Propagates the writer's [`fmt::Error`].
pub fn write_report_block<W: Write>(
    out: &mut W,
    timestamp: DateTime<Utc>,
    fault: &FaultDescription,
    registry: &TaskRegistry,
) -> fmt::Result {
    writeln!(out, "{DELIMITER}")?;
    out.write_str(HEADER_PREFIX)?;
    write_timestamp(out, timestamp)?;
    writeln!(out)?;
    writeln!(out, "{DELIMITER}")?;
    writeln!(out, "Fault: {fault}")?;
    writeln!(out)?;
    registry.write_statistics(out)?;
    writeln!(out, "{DELIMITER}")?;
    writeln!(out)
}

/// Render one crash block into a new `String`.
#[must_use]
pub fn render_report_block(
    timestamp: DateTime<Utc>,
    fault: &FaultDescription,
    registry: &TaskRegistry,
) -> String {
    let mut out = String::with_capacity(1024);
    // Writing into a String cannot fail.
    let _ = write_report_block(&mut out, timestamp, fault, registry);
    out
}

/// RFC 3339 UTC timestamp with millisecond precision, written field by
/// field so no intermediate string is allocated.
fn write_timestamp<W: Write>(out: &mut W, ts: DateTime<Utc>) -> fmt::Result {
    write!(
        out,
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        ts.year(),
        ts.month(),
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second(),
        ts.timestamp_subsec_millis().min(999)
    )
}

/// Split a crash log into its blocks.
#[must_use]
pub fn split_blocks(log: &str) -> Vec<&str> {
    let marker = format!("{DELIMITER}\n{HEADER_PREFIX}");
    let mut starts: Vec<usize> = log.match_indices(&marker).map(|(idx, _)| idx).collect();
    starts.push(log.len());
    starts
        .windows(2)
        .map(|pair| log[pair[0]..pair[1]].trim_end())
        .collect()
}

/// A `fmt::Write` sink over a caller-provided byte slice.
///
/// Output past the end of the slice is dropped and the tail is replaced by a
/// truncation notice.
pub struct FixedBuffer<'a> {
    buf: &'a mut [u8],
    len: usize,
    truncated: bool,
}

impl<'a> FixedBuffer<'a> {
    /// Wrap `buf`, starting empty.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            len: 0,
            truncated: false,
        }
    }

    /// Whether output was dropped.
    #[must_use]
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// The bytes written so far, with the truncation notice applied.
    #[must_use]
    pub fn finish(self) -> &'a [u8] {
        let Self {
            buf,
            mut len,
            truncated,
        } = self;
        if truncated && buf.len() >= TRUNCATION_NOTICE.len() {
            let start = buf.len() - TRUNCATION_NOTICE.len();
            buf[start..].copy_from_slice(TRUNCATION_NOTICE);
            len = buf.len();
        }
        &buf[..len]
    }
}

impl Write for FixedBuffer<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let room = self.buf.len() - self.len;
        if bytes.len() > room {
            self.buf[self.len..].copy_from_slice(&bytes[..room]);
            self.len = self.buf.len();
            self.truncated = true;
            return Err(fmt::Error);
        }
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }
}
