// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Caps how much of the console stream reaches a log file. Bytes past the cap
/// are accepted and dropped so the UART model never sees an error.
pub struct SizeLimitedWriter<W: Write> {
    inner: W,
    written: Arc<AtomicU64>,
    max_bytes: u64,
    dropped: u64,
}

impl<W: Write> SizeLimitedWriter<W> {
    pub fn new(inner: W, max_bytes: u64) -> Self {
        Self {
            inner,
            written: Arc::new(AtomicU64::new(0)),
            max_bytes,
            dropped: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Shared counter, readable after the writer has been handed to a model.
    pub fn bytes_written_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.written)
    }

    pub fn truncated(&self) -> bool {
        self.dropped > 0
    }
}

impl<W: Write> Write for SizeLimitedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let current = self.written.load(Ordering::Relaxed);
        let remaining = self.max_bytes.saturating_sub(current) as usize;
        if remaining == 0 {
            if self.dropped == 0 && !buf.is_empty() {
                tracing::warn!("Console log limit of {} bytes reached", self.max_bytes);
            }
            self.dropped += buf.len() as u64;
            return Ok(buf.len());
        }

        let to_write = buf.len().min(remaining);
        let written = self.inner.write(&buf[..to_write])?;
        self.written.fetch_add(written as u64, Ordering::Relaxed);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_under_limit() {
        let mut buf = Vec::new();
        let mut writer = SizeLimitedWriter::new(&mut buf, 100);

        writer.write_all(b"Initialised!\r\n").unwrap();
        assert_eq!(writer.bytes_written(), 14);
        assert!(!writer.truncated());
        assert_eq!(buf, b"Initialised!\r\n");
    }

    #[test]
    fn test_bytes_past_limit_dropped() {
        let mut buf = Vec::new();
        let mut writer = SizeLimitedWriter::new(&mut buf, 4);
        let handle = writer.bytes_written_handle();

        for &b in b"Initialised!" {
            writer.write_all(&[b]).unwrap();
        }
        assert_eq!(handle.load(Ordering::Relaxed), 4);
        assert!(writer.truncated());
        assert_eq!(buf, b"Init");
    }
}
