//! Incremental reader over a process's append-only output.

use crate::device::OutputBuffer;

/// Read position in one process's output.
///
/// Each call to [`read_new_lines`](Self::read_new_lines) returns only the
/// complete lines appended since the previous call; a trailing partial line
/// is held back until its newline arrives.
#[derive(Debug, Default, Clone)]
pub struct OutputCursor {
    offset: usize,
    partial: String,
}

impl OutputCursor {
    /// Cursor positioned at the start of the output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes consumed so far.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Complete lines appended since the last read.
    pub fn read_new_lines(&mut self, buffer: &OutputBuffer) -> Vec<String> {
        let chunk = buffer.read_from(self.offset);
        if chunk.is_empty() {
            return Vec::new();
        }
        self.offset += chunk.len();
        self.partial.push_str(&chunk);

        let Some(last_newline) = self.partial.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        complete
            .lines()
            .map(|line| line.trim_end_matches('\r').to_owned())
            .collect()
    }

    /// Return the held-back partial line, if any, once the stream has ended.
    pub fn flush(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            let line = std::mem::take(&mut self.partial);
            Some(line.trim_end_matches('\r').to_owned())
        }
    }

    /// Rewind to the start of a fresh stream.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.partial.clear();
    }
}
