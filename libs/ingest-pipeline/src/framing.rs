//! Newline framing over a per-connection buffer.

use crate::error::FramingError;

/// Splits a byte stream into `\n`-delimited records.
///
/// Bytes go in with [`push`](Self::push); complete records come out of
/// [`next_record`](Self::next_record) in arrival order. A trailing `\r` is
/// stripped and empty lines are skipped. The length bound applies to the
/// record itself, terminated or not, so chunk boundaries never change the
/// outcome.
pub struct LineFramer {
    buf: Vec<u8>,
    /// Start of the first unconsumed byte.
    start: usize,
    /// Bytes after `start` already known to contain no `\n`.
    scanned: usize,
    max_record_bytes: usize,
}

impl LineFramer {
    pub fn new(max_record_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            start: 0,
            scanned: 0,
            max_record_bytes,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete record, `Ok(None)` when more bytes are needed.
    pub fn next_record(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        loop {
            let pending = &self.buf[self.start..];
            let Some(pos) = pending[self.scanned..].iter().position(|&b| b == b'\n') else {
                self.scanned = pending.len();
                let len = strip_cr(pending).len();
                if len > self.max_record_bytes {
                    return Err(FramingError { len, max: self.max_record_bytes });
                }
                return Ok(None);
            };

            let end = self.scanned + pos;
            let line = strip_cr(&pending[..end]);
            if line.len() > self.max_record_bytes {
                return Err(FramingError { len: line.len(), max: self.max_record_bytes });
            }
            let record = line.to_vec();
            self.start += end + 1;
            self.scanned = 0;

            if !record.is_empty() {
                return Ok(Some(record));
            }
        }
    }

    /// Append `bytes` and collect every record completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, FramingError> {
        self.push(bytes);
        let mut records = Vec::new();
        while let Some(record) = self.next_record()? {
            records.push(record);
        }
        Ok(records)
    }

    /// Undelimited bytes currently held.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.start
    }

    /// End of stream: drop the undelimited tail and report its size.
    pub fn finish(self) -> usize {
        self.buffered()
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((b'\r', rest)) => rest,
        _ => line,
    }
}
