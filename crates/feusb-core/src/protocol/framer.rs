//! Reply buffering and record framing
//!
//! Bytes arrive from the transport in arbitrary chunks. [`ReplyBuffer`]
//! accumulates them and hands out complete records, each terminated by
//! [`RECORD_TERMINATOR`]. A record is never split: either all of it is
//! returned or none of it is.

use super::{ProtocolError, RECORD_TERMINATOR};

/// Growing byte buffer of not-yet-consumed reply data
#[derive(Debug, Default, Clone)]
pub struct ReplyBuffer {
    bytes: Vec<u8>,
}

impl ReplyBuffer {
    /// An empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly received bytes
    pub fn append(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Discard everything
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Number of complete records currently buffered
    pub fn pending_record_count(&self) -> usize {
        self.terminator_positions().count()
    }

    /// Remove up to `limit` bytes (all of them if `None`) from the front
    pub fn take_raw(&mut self, limit: Option<usize>) -> Vec<u8> {
        let split = limit.map_or(self.bytes.len(), |l| l.min(self.bytes.len()));
        self.bytes.drain(..split).collect()
    }

    /// Remove the first `n` complete records.
    ///
    /// The terminators are stripped; any bytes after the `n`th terminator
    /// stay buffered untouched.
    pub fn take_records(&mut self, n: usize) -> Result<Vec<String>, ProtocolError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let ends: Vec<usize> = self.terminator_positions().take(n).collect();
        if ends.len() < n {
            return Err(ProtocolError::InsufficientRecords {
                requested: n,
                available: ends.len(),
            });
        }

        let consumed = ends[n - 1] + RECORD_TERMINATOR.len();
        let head: Vec<u8> = self.bytes.drain(..consumed).collect();

        let mut records = Vec::with_capacity(n);
        let mut start = 0;
        for end in ends {
            records.push(String::from_utf8_lossy(&head[start..end]).into_owned());
            start = end + RECORD_TERMINATOR.len();
        }
        Ok(records)
    }

    /// Start offsets of every terminator, non-overlapping, front to back
    fn terminator_positions(&self) -> impl Iterator<Item = usize> + '_ {
        let term = RECORD_TERMINATOR;
        let mut pos = 0;
        std::iter::from_fn(move || {
            let found = self.bytes[pos..]
                .windows(term.len())
                .position(|w| w == term)?;
            let at = pos + found;
            pos = at + term.len();
            Some(at)
        })
    }
}
