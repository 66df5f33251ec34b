use std::path::Path;

use anyhow::Context as _;

use crate::foundation::error::{TalkreelError, TalkreelResult};

/// Unvalidated word alignment row as produced by a speech aligner.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RawWordAlignment {
    /// Word text as recognised.
    pub text: String,
    /// Start in milliseconds from the beginning of the narration.
    pub start_ms: u64,
    /// End in milliseconds (exclusive).
    pub end_ms: u64,
}

impl RawWordAlignment {
    /// Convenience constructor.
    pub fn new(text: impl Into<String>, start_ms: u64, end_ms: u64) -> Self {
        Self {
            text: text.into(),
            start_ms,
            end_ms,
        }
    }
}

/// One validated word.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct WordTiming {
    /// Absolute word index in the narration.
    pub index: usize,
    /// Word text.
    pub text: String,
    /// Start in milliseconds.
    pub start_ms: u64,
    /// End in milliseconds (exclusive).
    pub end_ms: u64,
}

impl WordTiming {
    /// `end_ms - start_ms`.
    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }

    /// Return `true` when `t_ms` lies in `[start_ms, end_ms)`.
    pub fn contains(&self, t_ms: u64) -> bool {
        self.start_ms <= t_ms && t_ms < self.end_ms
    }
}

/// Ordered, non-overlapping word timing table.
///
/// Invariants established by [`TimingIndex::build`]:
/// - at least one word;
/// - `start_ms < end_ms` for every word;
/// - `start_ms` strictly increasing;
/// - `start_ms >= previous end_ms`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimingIndex {
    words: Vec<WordTiming>,
}

impl TimingIndex {
    /// Validate raw alignments and build the index.
    #[tracing::instrument(level = "debug", skip_all, fields(words = raw.len()))]
    pub fn build(raw: Vec<RawWordAlignment>) -> TalkreelResult<Self> {
        if raw.is_empty() {
            return Err(TalkreelError::timing("timing index has no words"));
        }

        let mut words = Vec::with_capacity(raw.len());
        let mut prev: Option<(u64, u64)> = None;
        for (index, w) in raw.into_iter().enumerate() {
            if w.end_ms <= w.start_ms {
                return Err(TalkreelError::timing_at(
                    index,
                    format!(
                        "word '{}' has end_ms {} <= start_ms {}",
                        w.text, w.end_ms, w.start_ms
                    ),
                ));
            }
            if let Some((prev_start, prev_end)) = prev {
                if w.start_ms <= prev_start {
                    return Err(TalkreelError::timing_at(
                        index,
                        format!(
                            "start_ms {} is not after previous word start {}",
                            w.start_ms, prev_start
                        ),
                    ));
                }
                if w.start_ms < prev_end {
                    return Err(TalkreelError::timing_at(
                        index,
                        format!(
                            "start_ms {} overlaps previous word ending at {}",
                            w.start_ms, prev_end
                        ),
                    ));
                }
            }
            prev = Some((w.start_ms, w.end_ms));
            words.push(WordTiming {
                index,
                text: w.text,
                start_ms: w.start_ms,
                end_ms: w.end_ms,
            });
        }

        Ok(Self { words })
    }

    /// Parse a timing document and build the index.
    pub fn from_json_str(s: &str) -> TalkreelResult<Self> {
        Self::build(TimingDocument::from_json_str(s)?.into_alignments()?)
    }

    /// Read a timing document from disk and build the index.
    pub fn from_path(path: &Path) -> TalkreelResult<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read timing document '{}'", path.display()))?;
        Self::from_json_str(&text)
    }

    /// `(start_ms, end_ms)` of word `word_index`.
    pub fn lookup(&self, word_index: usize) -> Option<(u64, u64)> {
        self.words.get(word_index).map(|w| (w.start_ms, w.end_ms))
    }

    /// Full word record.
    pub fn word(&self, word_index: usize) -> Option<&WordTiming> {
        self.words.get(word_index)
    }

    /// End of the last word.
    pub fn duration_ms(&self) -> u64 {
        self.words.last().map(|w| w.end_ms).unwrap_or(0)
    }

    /// Number of words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Always `false` for a built index; present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Iterate words in order.
    pub fn iter(&self) -> std::slice::Iter<'_, WordTiming> {
        self.words.iter()
    }

    /// Word being spoken at `t_ms`, if any.
    pub fn word_at(&self, t_ms: u64) -> Option<&WordTiming> {
        let i = self.words.partition_point(|w| w.start_ms <= t_ms);
        let w = self.words.get(i.checked_sub(1)?)?;
        w.contains(t_ms).then_some(w)
    }

    /// View over every word.
    pub fn view(&self) -> TimingView<'_> {
        TimingView {
            offset: 0,
            words: &self.words,
        }
    }

    /// Borrow words `[start_index, end_index)`.
    pub fn slice(&self, start_index: usize, end_index: usize) -> TalkreelResult<TimingView<'_>> {
        if start_index > end_index {
            return Err(TalkreelError::validation(format!(
                "timing slice start {start_index} > end {end_index}"
            )));
        }
        if end_index > self.words.len() {
            return Err(TalkreelError::timing(format!(
                "script needs words up to index {} but timing has only {} words",
                end_index.saturating_sub(1),
                self.words.len()
            )));
        }
        Ok(TimingView {
            offset: start_index,
            words: &self.words[start_index..end_index],
        })
    }
}

impl<'a> IntoIterator for &'a TimingIndex {
    type Item = &'a WordTiming;
    type IntoIter = std::slice::Iter<'a, WordTiming>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Borrowed contiguous run of words, addressed with local indices.
#[derive(Clone, Copy, Debug)]
pub struct TimingView<'a> {
    offset: usize,
    words: &'a [WordTiming],
}

impl<'a> TimingView<'a> {
    /// Absolute index of local word 0.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of words in the view.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Return `true` when the view has no words.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Word at local index `i`.
    pub fn word(&self, i: usize) -> Option<&'a WordTiming> {
        self.words.get(i)
    }

    /// Borrow the underlying words.
    pub fn words(&self) -> &'a [WordTiming] {
        self.words
    }

    /// Start of the first word.
    pub fn start_ms(&self) -> Option<u64> {
        self.words.first().map(|w| w.start_ms)
    }

    /// End of the last word.
    pub fn end_ms(&self) -> Option<u64> {
        self.words.last().map(|w| w.end_ms)
    }
}

/// Timing JSON in either the flat millisecond shape or the aligner's segment shape.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(untagged)]
pub enum TimingDocument {
    /// `{"words": [{"text", "start_ms", "end_ms"}]}`
    Flat {
        /// Word rows in milliseconds.
        words: Vec<RawWordAlignment>,
    },
    /// `{"segments": [{"words": [{"word", "start", "end"}]}]}` with times in seconds.
    Segments {
        /// Aligner segments, in order.
        segments: Vec<AlignerSegment>,
    },
}

/// One aligner segment.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct AlignerSegment {
    /// Words of the segment.
    #[serde(default)]
    pub words: Vec<AlignerWord>,
}

/// One aligner word, times in seconds.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct AlignerWord {
    /// Recognised word.
    #[serde(alias = "text")]
    pub word: String,
    /// Start in seconds.
    pub start: f64,
    /// End in seconds.
    pub end: f64,
}

impl TimingDocument {
    /// Parse either document shape.
    pub fn from_json_str(s: &str) -> TalkreelResult<Self> {
        serde_json::from_str(s)
            .map_err(|e| TalkreelError::validation(format!("invalid timing JSON: {e}")))
    }

    /// Flatten into millisecond rows without validating order.
    pub fn into_alignments(self) -> TalkreelResult<Vec<RawWordAlignment>> {
        match self {
            TimingDocument::Flat { words } => Ok(words),
            TimingDocument::Segments { segments } => {
                let mut out = Vec::new();
                for w in segments.into_iter().flat_map(|s| s.words) {
                    let index = out.len();
                    out.push(RawWordAlignment {
                        start_ms: secs_to_ms(w.start, index)?,
                        end_ms: secs_to_ms(w.end, index)?,
                        text: w.word.trim().to_string(),
                    });
                }
                Ok(out)
            }
        }
    }
}

fn secs_to_ms(secs: f64, index: usize) -> TalkreelResult<u64> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(TalkreelError::timing_at(
            index,
            format!("timestamp {secs} is not a finite, non-negative number of seconds"),
        ));
    }
    Ok((secs * 1000.0).round() as u64)
}

#[cfg(test)]
#[path = "../../tests/unit/timing/index.rs"]
mod tests;
