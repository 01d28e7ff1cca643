//! Bounded retention of captured process output.
//!
//! Each service owns one `LogBuffer`: an append-only text store with a byte
//! cap. When the cap is exceeded, a fixed-size chunk is discarded from the
//! oldest end (not necessarily on a line boundary), so ordering of the
//! retained text is preserved. The buffer also provides a `tail` accessor for
//! lightweight inline display.

use strip_ansi_escapes::strip;

/// Byte-capped append-only store for one service's combined output.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    max_bytes: usize,
    trim_chunk: usize,
    text: String,
}

impl LogBuffer {
    /// Creates a buffer holding at most `max_bytes` of text, trimming
    /// `trim_chunk` bytes from the front whenever the cap is exceeded.
    pub fn new(max_bytes: usize, trim_chunk: usize) -> Self {
        Self {
            max_bytes: max_bytes.max(1),
            trim_chunk: trim_chunk.clamp(1, max_bytes.max(1)),
            text: String::new(),
        }
    }

    /// Appends one line (a trailing newline is added).
    pub fn append_line(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');
        while self.text.len() > self.max_bytes {
            let mut cut = self.trim_chunk.min(self.text.len());
            while cut < self.text.len() && !self.text.is_char_boundary(cut) {
                cut += 1;
            }
            self.text.drain(..cut);
        }
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    /// Number of retained bytes.
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// The entire retained text.
    pub fn full(&self) -> &str {
        &self.text
    }

    /// The last `n` non-empty lines, most recent last, ANSI codes stripped.
    pub fn tail(&self, n: usize) -> String {
        let mut picked: Vec<&str> = self
            .text
            .lines()
            .rev()
            .filter(|line| !line.trim().is_empty())
            .take(n)
            .collect();
        picked.reverse();
        picked
            .into_iter()
            .map(sanitize_line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Strips ANSI escape codes and replaces invalid UTF-8 sequences.
pub fn sanitize_line(text: &str) -> String {
    let stripped = strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).to_string()
}
