//! Incremental JSON object framing
//!
//! The socket hands us chunks of bytes with no relation to message
//! boundaries. [`FrameExtractor`] counts braces as the bytes go past,
//! ignoring any that sit inside string literals, and emits the buffered text
//! each time nesting returns to zero at a `}`.
//!
//! Only `{`, `}`, `"` and `\` matter to the state machine. All four are ASCII
//! and never occur inside a multi-byte UTF-8 sequence, so scanning bytes is
//! safe even when a chunk boundary splits a character.
//!
//! Input that never balances simply never emits. The connection's ping/pong
//! deadline is what notices such a stall.

use tracing::warn;

/// Resumable brace-counting framer
#[derive(Debug, Default)]
pub struct FrameExtractor {
    buffer: Vec<u8>,
    level: usize,
    in_quote: bool,
    in_escape: bool,
}

impl FrameExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Framer whose partial-frame buffer starts with `capacity` bytes reserved
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Consume `chunk`, calling `emit` once per completed frame.
    ///
    /// Returns the number of frames emitted. Bytes outside any object
    /// (whitespace, separators, stray garbage) are skipped.
    pub fn feed<F>(&mut self, chunk: &[u8], mut emit: F) -> usize
    where
        F: FnMut(String),
    {
        let mut emitted = 0;

        for &byte in chunk {
            if self.level == 0 {
                if byte == b'{' {
                    self.level = 1;
                    self.buffer.push(byte);
                }
                continue;
            }

            self.buffer.push(byte);

            if self.in_escape {
                self.in_escape = false;
                continue;
            }

            if self.in_quote {
                match byte {
                    b'\\' => self.in_escape = true,
                    b'"' => self.in_quote = false,
                    _ => {}
                }
                continue;
            }

            match byte {
                b'"' => self.in_quote = true,
                b'{' => self.level += 1,
                b'}' => {
                    self.level -= 1;
                    if self.level == 0 {
                        if let Some(frame) = self.take_frame() {
                            emit(frame);
                            emitted += 1;
                        }
                    }
                }
                _ => {}
            }
        }

        emitted
    }

    /// Consume `chunk` and collect the completed frames
    pub fn extract(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut frames = Vec::new();
        self.feed(chunk, |frame| frames.push(frame));
        frames
    }

    /// Bytes buffered for the frame in progress
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// True between frames
    pub fn is_idle(&self) -> bool {
        self.level == 0 && self.buffer.is_empty()
    }

    /// Drop any partial frame
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.level = 0;
        self.in_quote = false;
        self.in_escape = false;
    }

    fn take_frame(&mut self) -> Option<String> {
        let capacity = self.buffer.capacity();
        let bytes = std::mem::replace(&mut self.buffer, Vec::with_capacity(capacity.min(64 * 1024)));
        self.in_quote = false;
        self.in_escape = false;

        match String::from_utf8(bytes) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(len = e.as_bytes().len(), "Dropping frame that is not valid UTF-8");
                None
            }
        }
    }
}
