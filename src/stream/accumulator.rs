//! Accumulator: folds ordered text deltas into one growing snapshot.

use tracing::{debug, warn};

use super::event::StreamEvent;

/// Callback invoked with the full accumulated text after every delta. The
/// argument is always a complete replacement, never a delta the consumer
/// must apply itself.
pub type LiveUpdate = Box<dyn FnMut(&str) + Send>;

/// Per-stream text accumulator. The buffer only ever grows; a new stream
/// gets a new accumulator.
#[derive(Default)]
pub struct Accumulator {
    text: String,
    finished: bool,
    deltas: u64,
    unrecognized: u64,
    on_update: Option<LiveUpdate>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a live-update callback fired with the full snapshot after each
    /// delta.
    pub fn with_callback(on_update: LiveUpdate) -> Self {
        Self {
            on_update: Some(on_update),
            ..Self::default()
        }
    }

    /// Fold one event into the buffer and return the current snapshot.
    ///
    /// `TextDelta` appends and fires the callback. `StreamEnd` finalizes:
    /// no further appends are accepted after it. `Unrecognized` (and any
    /// idle/keepalive payload classified as such) leaves the buffer
    /// untouched.
    pub fn apply(&mut self, event: &StreamEvent) -> &str {
        match event {
            StreamEvent::TextDelta { text } => {
                if self.finished {
                    warn!("delta after stream end ignored");
                    return &self.text;
                }
                self.text.push_str(text);
                self.deltas += 1;
                if let Some(cb) = self.on_update.as_mut() {
                    cb(&self.text);
                }
            }
            StreamEvent::StreamEnd => {
                self.finished = true;
                debug!(
                    deltas = self.deltas,
                    unrecognized = self.unrecognized,
                    chars = self.text.len(),
                    "stream ended"
                );
            }
            StreamEvent::Unrecognized { .. } => {
                self.unrecognized += 1;
            }
        }
        &self.text
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Deltas folded so far.
    pub fn delta_count(&self) -> u64 {
        self.deltas
    }

    /// Unrecognized frames absorbed so far. Diagnostics only.
    pub fn unrecognized_count(&self) -> u64 {
        self.unrecognized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn delta(text: &str) -> StreamEvent {
        StreamEvent::TextDelta { text: text.into() }
    }

    #[test]
    fn deltas_concatenate_in_order() {
        let mut acc = Accumulator::new();
        acc.apply(&delta("Hel"));
        acc.apply(&delta("lo"));
        acc.apply(&delta(" world"));
        assert_eq!(acc.text(), "Hello world");
        assert_eq!(acc.delta_count(), 3);
    }

    #[test]
    fn empty_stream_yields_empty_text() {
        let mut acc = Accumulator::new();
        acc.apply(&StreamEvent::StreamEnd);
        assert_eq!(acc.text(), "");
        assert!(acc.is_finished());
    }

    #[test]
    fn callback_receives_full_snapshot_each_time() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let mut acc = Accumulator::with_callback(Box::new(move |snapshot| {
            seen2.lock().unwrap().push(snapshot.to_string());
        }));
        acc.apply(&delta("a"));
        acc.apply(&delta("b"));
        acc.apply(&delta("c"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["a".to_string(), "ab".to_string(), "abc".to_string()]
        );
    }

    #[test]
    fn unrecognized_has_no_effect_on_buffer() {
        let mut acc = Accumulator::new();
        acc.apply(&delta("keep"));
        acc.apply(&StreamEvent::Unrecognized {
            raw: "{not json".into(),
        });
        assert_eq!(acc.text(), "keep");
        assert_eq!(acc.unrecognized_count(), 1);
    }

    #[test]
    fn no_appends_after_stream_end() {
        let mut acc = Accumulator::new();
        acc.apply(&delta("final"));
        acc.apply(&StreamEvent::StreamEnd);
        acc.apply(&delta(" late"));
        assert_eq!(acc.text(), "final");
    }
}
