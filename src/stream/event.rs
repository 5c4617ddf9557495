//! Event normalizer: one frame in, one canonical event out.
//!
//! Upstream providers each have their own delta schema. The "which schema is
//! this" decision lives here, in one priority-ordered match, instead of being
//! scattered across call sites: terminal sentinel first, then the primary
//! shape, then the secondary shape, and anything else is `Unrecognized`.
//! Truncated JSON is routine on a chunked wire and is absorbed silently.

use serde::Deserialize;

use super::splitter::Frame;

/// Terminal sentinel payload marking a clean end of stream.
pub const STREAM_END_SENTINEL: &str = "[DONE]";

/// Normalized meaning of a frame. Events preserve arrival order; there is no
/// reordering and no deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A piece of assistant text to append.
    TextDelta { text: String },
    /// Clean end of stream; no further deltas follow.
    StreamEnd,
    /// A payload no recognized schema could decode. Carries no effect beyond
    /// being countable for diagnostics.
    Unrecognized { raw: String },
}

/// Primary delta shape: `{"type":"delta","text":"..."}`.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PrimaryPayload {
    Delta { text: String },
    #[serde(other)]
    Other,
}

/// Secondary delta shape: `{"choices":[{"delta":{"content":"..."}}]}`.
#[derive(Deserialize)]
struct SecondaryPayload {
    choices: Vec<SecondaryChoice>,
}

#[derive(Deserialize)]
struct SecondaryChoice {
    delta: SecondaryDelta,
}

#[derive(Deserialize)]
struct SecondaryDelta {
    content: Option<String>,
}

/// Classify one frame. Never fails: a payload that defeats both schemas (or
/// decodes without carrying text, like a role-only delta) comes back as
/// `Unrecognized`.
pub fn parse(frame: &Frame) -> StreamEvent {
    let payload = frame.payload();
    if payload == STREAM_END_SENTINEL {
        return StreamEvent::StreamEnd;
    }

    if let Ok(PrimaryPayload::Delta { text }) = serde_json::from_str(payload) {
        return StreamEvent::TextDelta { text };
    }

    if let Ok(secondary) = serde_json::from_str::<SecondaryPayload>(payload) {
        let text: String = secondary
            .choices
            .into_iter()
            .filter_map(|c| c.delta.content)
            .collect();
        if !text.is_empty() {
            return StreamEvent::TextDelta { text };
        }
    }

    StreamEvent::Unrecognized {
        raw: payload.to_string(),
    }
}
