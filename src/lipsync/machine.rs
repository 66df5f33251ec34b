use std::fmt;

use crate::script::Character;
use crate::timeline::VisualTimeline;
use crate::timing::TimingIndex;

/// Slices are never shorter than this.
pub const MIN_SYLLABLE_MS: u64 = 100;
/// Words shorter than this get a single slice.
pub const SHORT_WORD_MS: u64 = 80;

/// Binary lip-sync position.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MouthState {
    /// Lips together.
    Closed,
    /// Lips apart.
    Open,
}

impl MouthState {
    /// Both states, in table order.
    pub const ALL: [MouthState; 2] = [MouthState::Closed, MouthState::Open];

    pub(crate) fn slot(self) -> usize {
        match self {
            MouthState::Closed => 0,
            MouthState::Open => 1,
        }
    }
}

impl fmt::Display for MouthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MouthState::Closed => "closed",
            MouthState::Open => "open",
        })
    }
}

/// English syllable estimate by vowel groups, with silent-`e` and consonant-`le` rules.
pub fn count_syllables(word: &str) -> u32 {
    let lower = word.trim().to_lowercase();
    if lower.is_empty() {
        return 0;
    }
    if lower.chars().count() <= 3 {
        return 1;
    }
    let letters: Vec<u8> = lower.bytes().filter(u8::is_ascii_lowercase).collect();
    if letters.is_empty() {
        return 1;
    }

    let is_vowel = |b: u8| b"aeiouy".contains(&b);
    let mut count: i32 = i32::from(is_vowel(letters[0]));
    for pair in letters.windows(2) {
        if is_vowel(pair[1]) && !is_vowel(pair[0]) {
            count += 1;
        }
    }
    if letters.ends_with(b"e") {
        count -= 1;
    }
    if letters.ends_with(b"le") && letters.len() > 2 && !is_vowel(letters[letters.len() - 3]) {
        count += 1;
    }
    count.max(1) as u32
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct MouthWord {
    start_ms: u64,
    end_ms: u64,
    slices: u64,
}

impl MouthWord {
    fn new(start_ms: u64, end_ms: u64, text: &str) -> Self {
        let duration = end_ms - start_ms;
        let slices = if duration < SHORT_WORD_MS {
            1
        } else {
            u64::from(count_syllables(text)).clamp(1, (duration / MIN_SYLLABLE_MS).max(1))
        };
        Self {
            start_ms,
            end_ms,
            slices,
        }
    }

    fn duration(&self) -> u64 {
        self.end_ms - self.start_ms
    }

    /// Start of half-slice `m`, `0 <= m <= 2 * slices`.
    fn boundary(&self, m: u64) -> u64 {
        let n = u128::from(m) * u128::from(self.duration());
        let d = 2 * u128::from(self.slices);
        self.start_ms + n.div_ceil(d) as u64
    }

    fn phase(&self, t_ms: u64) -> u64 {
        let n = u128::from(t_ms - self.start_ms) * 2 * u128::from(self.slices);
        (n / u128::from(self.duration())) as u64
    }
}

/// Active slice at an instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MouthSlice {
    /// Absolute index of the word being spoken.
    pub word_index: usize,
    /// Slice number within the word.
    pub slice: u64,
    /// Number of slices in the word.
    pub slices: u64,
    /// Slice start.
    pub start_ms: u64,
    /// Mouth closes here.
    pub open_until_ms: u64,
    /// Slice end.
    pub end_ms: u64,
}

impl MouthSlice {
    /// `end_ms - start_ms`.
    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }
}

/// Mouth state lookup for both characters.
#[derive(Clone, Debug, Default)]
pub struct LipSync {
    words: [Vec<(usize, MouthWord)>; 2],
}

impl LipSync {
    /// Assign every line's words to its speaker.
    pub fn new(timing: &TimingIndex, timeline: &VisualTimeline) -> Self {
        let mut words: [Vec<(usize, MouthWord)>; 2] = [Vec::new(), Vec::new()];
        for line in timeline.lines() {
            let track = &mut words[line.character.index()];
            for i in line.words() {
                if let Some(w) = timing.word(i) {
                    track.push((i, MouthWord::new(w.start_ms, w.end_ms, &w.text)));
                }
            }
        }
        Self { words }
    }

    fn word_at(&self, character: Character, t_ms: u64) -> Option<&(usize, MouthWord)> {
        let track = &self.words[character.index()];
        let n = track.partition_point(|(_, w)| w.start_ms <= t_ms);
        let entry = track.get(n.checked_sub(1)?)?;
        (t_ms < entry.1.end_ms).then_some(entry)
    }

    /// Mouth state of `character` at `t_ms`. `Closed` outside its words.
    pub fn state_at(&self, character: Character, t_ms: u64) -> MouthState {
        match self.word_at(character, t_ms) {
            Some((_, w)) if w.phase(t_ms) % 2 == 0 => MouthState::Open,
            _ => MouthState::Closed,
        }
    }

    /// Slice active for `character` at `t_ms`.
    pub fn slice_at(&self, character: Character, t_ms: u64) -> Option<MouthSlice> {
        let &(word_index, w) = self.word_at(character, t_ms)?;
        let slice = w.phase(t_ms) / 2;
        Some(MouthSlice {
            word_index,
            slice,
            slices: w.slices,
            start_ms: w.boundary(2 * slice),
            open_until_ms: w.boundary(2 * slice + 1),
            end_ms: w.boundary(2 * slice + 2),
        })
    }

    /// State changes of `character` as `(t_ms, new_state)`, starting from `Closed`.
    pub fn transitions(&self, character: Character) -> Vec<(u64, MouthState)> {
        let mut out: Vec<(u64, MouthState)> = Vec::new();
        let mut current = MouthState::Closed;
        for (_, w) in &self.words[character.index()] {
            for m in 0..2 * w.slices {
                let state = if m % 2 == 0 {
                    MouthState::Open
                } else {
                    MouthState::Closed
                };
                let at = w.boundary(m);
                if let Some(last) = out.last_mut()
                    && last.0 == at
                {
                    last.1 = state;
                } else if state != current {
                    out.push((at, state));
                }
                current = state;
            }
        }
        out.dedup_by(|b, a| a.1 == b.1);
        out
    }
}

#[cfg(test)]
#[path = "../../tests/unit/lipsync/machine.rs"]
mod tests;
