//! Append-only output buffer shared between a process reader task and the
//! orchestrator.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Cloneable handle to the growing text output of one process.
///
/// Writers only ever append; readers track their own byte offsets (see
/// [`OutputCursor`](crate::orchestrator::output_cursor::OutputCursor)).
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<Mutex<String>>,
}

impl OutputBuffer {
    /// Empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, String> {
        // A panicked writer leaves valid UTF-8 behind, so keep reading.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one line, adding the trailing newline.
    pub fn append_line(&self, line: &str) {
        let mut guard = self.lock();
        guard.push_str(line);
        guard.push('\n');
    }

    /// Append raw text as-is.
    pub fn append(&self, text: &str) {
        self.lock().push_str(text);
    }

    /// Current length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Text appended at or after byte `offset`.
    ///
    /// Offsets past the end, or not on a character boundary, yield an
    /// empty string.
    #[must_use]
    pub fn read_from(&self, offset: usize) -> String {
        self.lock().get(offset..).unwrap_or_default().to_owned()
    }

    /// Full text captured so far.
    #[must_use]
    pub fn snapshot(&self) -> String {
        self.lock().clone()
    }
}
