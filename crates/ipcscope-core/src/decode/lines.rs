//! Line framing for child output streams.
//!
//! Bytes arrive in arbitrary chunks; a line may span several reads. The
//! splitter keeps the unterminated tail between calls and hands it out on
//! [`LineSplitter::finish`] so nothing is lost when the stream closes.

/// Upper bound for one buffered line before it is flushed unterminated.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Incremental `\n`-delimited splitter.
#[derive(Debug)]
pub struct LineSplitter {
    buf: Vec<u8>,
    max_line_bytes: usize,
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl LineSplitter {
    pub const fn new() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }

    pub const fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line_bytes,
        }
    }

    /// Feed one chunk, returning every line it completes.
    ///
    /// Blank lines are skipped. A trailing `\r` is stripped and invalid UTF-8
    /// is replaced lossily.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.buf.extend_from_slice(&rest[..pos]);
            rest = &rest[pos + 1..];
            if let Some(line) = self.take_line() {
                lines.push(line);
            }
        }

        self.buf.extend_from_slice(rest);
        if self.buf.len() >= self.max_line_bytes
            && let Some(line) = self.take_line()
        {
            lines.push(line);
        }
        lines
    }

    /// Flush the unterminated tail, if any. Call once the stream has closed.
    pub fn finish(&mut self) -> Option<String> {
        self.take_line()
    }

    /// Bytes currently held for an incomplete line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn take_line(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.buf);
        let decoded = String::from_utf8_lossy(&raw);
        let text = decoded.strip_suffix('\r').unwrap_or(&decoded);
        if text.trim().is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}
