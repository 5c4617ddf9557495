//! Frame splitter: raw chunked bytes in, complete protocol frames out.
//!
//! The generation endpoint delivers line-delimited frames over a chunked
//! response body, and the network is free to split the body at any byte:
//! mid-line, mid-JSON, even inside a multi-byte character. A single
//! carry-over buffer of the unterminated trailing bytes bridges every call
//! to [`FrameSplitter::feed`].

use tracing::trace;

/// Every frame line starts with this prefix; anything else on the wire
/// (keepalive comments, blank separator lines) is discarded.
pub const FRAME_PREFIX: &str = "data: ";

/// One line-delimited protocol unit. Holds the full raw line including the
/// prefix; [`Frame::payload`] strips it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(pub String);

impl Frame {
    /// The frame body with the `data: ` prefix removed and surrounding
    /// whitespace trimmed. A frame constructed without the prefix yields
    /// its whole trimmed content.
    pub fn payload(&self) -> &str {
        self.0.strip_prefix(FRAME_PREFIX).unwrap_or(&self.0).trim()
    }
}

/// Stateful splitter for one stream. Streams must never share one; each has
/// its own carry-over buffer.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    carry: Vec<u8>,
    emitted: u64,
    discarded: u64,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and emit every complete line that now exists as a
    /// frame, retaining the final unterminated fragment for the next call.
    /// No frame is emitted twice and no bytes are dropped at a chunk
    /// boundary, including when a line splits exactly at the boundary.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.carry.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.carry.drain(..=pos).take(pos).collect();
            if let Some(frame) = self.line_to_frame(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a best-effort frame from any non-empty leftover. Called when
    /// the stream ends mid-fragment (connection close without a trailing
    /// newline).
    pub fn close(&mut self) -> Option<Frame> {
        let leftover = std::mem::take(&mut self.carry);
        if leftover.is_empty() {
            return None;
        }
        self.line_to_frame(&leftover)
    }

    /// Frames emitted so far on this stream.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Non-frame lines discarded so far (keepalives, comments, blanks).
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    fn line_to_frame(&mut self, line: &[u8]) -> Option<Frame> {
        // Complete lines only reach here, so a multi-byte character split
        // across chunks has already been reassembled in the carry buffer.
        let text = String::from_utf8_lossy(line);
        let text = text.strip_suffix('\r').unwrap_or(&text);
        if text.starts_with(FRAME_PREFIX) {
            self.emitted += 1;
            Some(Frame(text.to_string()))
        } else {
            if !text.is_empty() {
                trace!(line = %text, "discarding non-frame line");
            }
            self.discarded += 1;
            None
        }
    }
}
