use std::collections::VecDeque;

use drover_config::LoopDetectionConfig;
use drover_core::ToolCall;

/// Result of feeding one text fragment to a [`LoopDetector`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoopCheck {
    pub is_loop: bool,
    /// The normalized fragment that repeated.
    pub pattern: Option<String>,
    /// Occurrences of the fragment inside the window, including this one.
    pub repeat_count: usize,
}

/// Sliding-window repetition detector for generated text and tool calls.
///
/// A fragment (or call signature) counts as a loop once it occurs
/// `threshold` times among the last `window` entries.
#[derive(Debug, Clone)]
pub struct LoopDetector {
    window: usize,
    threshold: usize,
    min_fragment_chars: usize,
    texts: VecDeque<String>,
    calls: VecDeque<String>,
}

impl LoopDetector {
    pub fn new(window: usize, threshold: usize, min_fragment_chars: usize) -> Self {
        Self {
            window: window.max(1),
            threshold: threshold.max(1),
            min_fragment_chars,
            texts: VecDeque::new(),
            calls: VecDeque::new(),
        }
    }

    pub fn from_config(config: &LoopDetectionConfig) -> Self {
        Self::new(config.window, config.threshold, config.min_fragment_chars)
    }

    pub fn add_text(&mut self, text: &str) -> LoopCheck {
        let fragment = normalize_fragment(text);
        if fragment.chars().count() < self.min_fragment_chars {
            return LoopCheck::default();
        }
        let repeat_count = push_and_count(&mut self.texts, fragment.clone(), self.window);
        LoopCheck {
            is_loop: repeat_count >= self.threshold,
            pattern: Some(fragment),
            repeat_count,
        }
    }

    /// Record a tool call. Returns true when the same name and arguments
    /// have been requested `threshold` times within the window.
    pub fn record_call(&mut self, call: &ToolCall) -> bool {
        push_and_count(&mut self.calls, call.signature(), self.window) >= self.threshold
    }

    pub fn reset(&mut self) {
        self.texts.clear();
        self.calls.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty() && self.calls.is_empty()
    }
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::from_config(&LoopDetectionConfig::default())
    }
}

fn push_and_count(history: &mut VecDeque<String>, entry: String, window: usize) -> usize {
    history.push_back(entry);
    while history.len() > window {
        history.pop_front();
    }
    let Some(latest) = history.back() else {
        return 0;
    };
    history.iter().filter(|e| *e == latest).count()
}

/// Collapse whitespace and drop a trailing counter, so "Retrying (3)..." and
/// "Retrying (4)..." compare equal.
fn normalize_fragment(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let is_trailer = |c: char| c.is_ascii_punctuation() || c.is_whitespace();
    let without_punct = collapsed.trim_end_matches(is_trailer);
    let without_counter = without_punct.trim_end_matches(|c: char| c.is_ascii_digit());
    if without_counter.len() == without_punct.len() {
        return collapsed;
    }
    without_counter.trim_end_matches(is_trailer).to_string()
}

/// Re-assembles streamed text deltas into sentence-sized fragments so
/// token-level streams and whole-sentence chunks are checked the same way.
#[derive(Debug, Default)]
pub struct FragmentBuffer {
    pending: String,
}

/// Flush even without a sentence end once this much text is pending.
const MAX_PENDING_CHARS: usize = 2_000;

impl FragmentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta. Returns the completed fragment if the buffer now ends a
    /// sentence or a line.
    pub fn push(&mut self, delta: &str) -> Option<String> {
        self.pending.push_str(delta);
        let ends_sentence = self.pending.ends_with('\n')
            || self
                .pending
                .trim_end()
                .ends_with(['.', '!', '?', ':']);
        if ends_sentence || self.pending.len() >= MAX_PENDING_CHARS {
            self.take()
        } else {
            None
        }
    }

    /// Whatever is left at the end of a response.
    pub fn take(&mut self) -> Option<String> {
        let fragment = std::mem::take(&mut self.pending);
        if fragment.trim().is_empty() {
            None
        } else {
            Some(fragment)
        }
    }
}
