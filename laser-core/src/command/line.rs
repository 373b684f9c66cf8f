//! Non-blocking line assembly for the host serial stream.

use alloc::string::String;
use alloc::vec::Vec;

/// Upper bound on a single buffered line, terminator excluded.
///
/// A full eight-channel configuration payload stays well below this; hitting
/// the bound means the link is feeding garbage without newlines.
pub const MAX_LINE_LEN: usize = 4_096;

/// Accumulates serial bytes and yields complete newline-terminated lines.
///
/// Partial lines are preserved across reads so the caller can feed whatever
/// bytes happen to be available each iteration without blocking.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buffer: Vec<u8>,
    dropped: usize,
}

impl LineAssembler {
    /// Creates an empty assembler.
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            dropped: 0,
        }
    }

    /// Appends newly received bytes.
    ///
    /// If the pending (newline-free) data outgrows [`MAX_LINE_LEN`] the
    /// buffer is discarded; the byte count is reported once through
    /// [`take_overflow`](Self::take_overflow).
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() > MAX_LINE_LEN && !self.buffer.contains(&b'\n') {
            self.dropped += self.buffer.len();
            self.buffer.clear();
        }
    }

    /// Pops the next complete line, without its terminator.
    ///
    /// Bytes that are not valid UTF-8 are replaced rather than dropped; the
    /// resulting line then fails command classification and is reported
    /// through the normal fault path.
    pub fn pop_line(&mut self) -> Option<String> {
        let newline = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Returns and clears the count of bytes dropped to overflow, if any.
    pub fn take_overflow(&mut self) -> Option<usize> {
        if self.dropped == 0 {
            None
        } else {
            let dropped = self.dropped;
            self.dropped = 0;
            Some(dropped)
        }
    }

    /// Number of buffered bytes still waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
