use std::ops::Range;

use crate::timing::{TimingView, WordTiming};

/// Limits for grouping words into one on-screen caption.
///
/// With both limits unset every word is its own caption.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CaptionWindow {
    /// Maximum on-screen characters, spaces included.
    #[serde(default)]
    pub max_chars: Option<usize>,
    /// Maximum time from the first word's start to the last word's end.
    #[serde(default)]
    pub window_ms: Option<u64>,
}

impl CaptionWindow {
    /// One caption per word.
    pub fn word_by_word() -> Self {
        Self::default()
    }

    /// Chunked captions bounded by characters and duration.
    pub fn chunked(max_chars: usize, window_ms: u64) -> Self {
        Self {
            max_chars: Some(max_chars),
            window_ms: Some(window_ms),
        }
    }
}

/// One caption chunk.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct CaptionSpan {
    /// Words joined by single spaces.
    pub text: String,
    /// Start of the first word.
    pub start_ms: u64,
    /// End of the last word.
    pub end_ms: u64,
    /// Absolute word indices covered.
    pub words: Range<usize>,
}

/// Lazy iterator over the caption chunks of a run of words.
#[derive(Clone, Debug)]
pub struct CaptionSpans<'a> {
    words: &'a [WordTiming],
    pos: usize,
    window: CaptionWindow,
}

/// Caption chunks for `words`. Chunks never split a word and an over-long word stands alone.
pub fn spans_for(words: TimingView<'_>, window: CaptionWindow) -> CaptionSpans<'_> {
    CaptionSpans {
        words: words.words(),
        pos: 0,
        window,
    }
}

impl CaptionSpans<'_> {
    fn fits(&self, first: &WordTiming, chars: usize, next: &WordTiming) -> bool {
        if let Some(max) = self.window.max_chars
            && chars + 1 + next.text.chars().count() > max
        {
            return false;
        }
        if let Some(w) = self.window.window_ms
            && next.end_ms - first.start_ms > w
        {
            return false;
        }
        true
    }
}

impl Iterator for CaptionSpans<'_> {
    type Item = CaptionSpan;

    fn next(&mut self) -> Option<CaptionSpan> {
        let words = self.words;
        let first = words.get(self.pos)?;
        let chunked = self.window.max_chars.is_some() || self.window.window_ms.is_some();

        let mut end = self.pos + 1;
        let mut chars = first.text.chars().count();
        if chunked {
            while let Some(next) = words.get(end) {
                if !self.fits(first, chars, next) {
                    break;
                }
                chars += 1 + next.text.chars().count();
                end += 1;
            }
        }

        let run = &words[self.pos..end];
        self.pos = end;

        let last = &run[run.len() - 1];
        let text = run
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Some(CaptionSpan {
            text,
            start_ms: first.start_ms,
            end_ms: last.end_ms,
            words: first.index..last.index + 1,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.words.len() - self.pos;
        (usize::from(left > 0), Some(left))
    }
}

impl std::iter::FusedIterator for CaptionSpans<'_> {}

#[cfg(test)]
#[path = "../../tests/unit/captions/generator.rs"]
mod tests;
