use std::collections::BTreeMap;

use crate::captions::{CaptionSpan, CaptionWindow, spans_for};
use crate::foundation::error::{TalkreelError, TalkreelResult};
use crate::script::{Character, DialogueLine};
use crate::timing::TimingIndex;

/// Where the pose of a [`EventPayload::PoseChange`] came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseSource {
    /// A pose span in the script.
    Declared,
    /// Fill that keeps the character's last declared pose.
    Carried,
    /// Fill before the character declares any pose.
    Default,
}

impl PoseSource {
    /// Return `true` for gap fills.
    pub fn is_fill(self) -> bool {
        !matches!(self, PoseSource::Declared)
    }
}

/// Payload of a [`VisualEvent`].
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// Character pose for the event interval.
    PoseChange {
        /// Character whose pose changes.
        character: Character,
        /// Pose identifier.
        pose_id: String,
        /// Declared or fill.
        source: PoseSource,
    },
    /// Overlay image anchored at the event start (zero-duration event).
    AssetAppearance {
        /// Visual asset id.
        asset_id: String,
        /// Time at which the overlay is removed.
        visible_until_ms: u64,
        /// Full-screen or side presentation.
        fullscreen: bool,
        /// Speaker of the owning line, which picks the side.
        character: Character,
    },
    /// Caption chunk shown for the event interval.
    CaptionSpan(CaptionSpan),
    /// Opening visual shown before the first speaker appears.
    OpeningVisual {
        /// Visual asset id.
        asset_id: String,
    },
}

/// One time-stamped entry of the timeline, half-open `[start_ms, end_ms)`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct VisualEvent {
    /// Inclusive start.
    pub start_ms: u64,
    /// Exclusive end (equal to `start_ms` for anchors).
    pub end_ms: u64,
    /// What happens.
    pub payload: EventPayload,
}

/// Resolved timing of one dialogue line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct LineSpan {
    /// Position of the line in the script.
    pub line_index: usize,
    /// Speaker.
    pub character: Character,
    /// Absolute index of the line's first word.
    pub first_word: usize,
    /// Number of spoken words.
    pub word_count: usize,
    /// Start of the first word.
    pub start_ms: u64,
    /// End of the last word.
    pub end_ms: u64,
}

impl LineSpan {
    /// `(start_ms + end_ms) / 2`, rounded down.
    pub fn midpoint_ms(&self) -> u64 {
        midpoint(self.start_ms, self.end_ms)
    }

    /// Absolute word index range.
    pub fn words(&self) -> std::ops::Range<usize> {
        self.first_word..self.first_word + self.word_count
    }
}

/// Overlay visible at a given instant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveVisual<'a> {
    /// Visual asset id.
    pub asset_id: &'a str,
    /// When the overlay appeared.
    pub since_ms: u64,
    /// Full-screen or side presentation.
    pub fullscreen: bool,
    /// Side owner for side overlays; `None` for the opening visual.
    pub character: Option<Character>,
}

/// Builder knobs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimelineOptions {
    /// Per-character default pose overriding `<character>_front`.
    pub default_poses: BTreeMap<Character, String>,
    /// Caption chunking.
    pub caption_window: CaptionWindow,
    /// Extra time after the last timing word.
    pub tail_ms: u64,
}

impl TimelineOptions {
    fn default_pose(&self, c: Character) -> String {
        self.default_poses
            .get(&c)
            .cloned()
            .unwrap_or_else(|| c.fallback_pose_id())
    }
}

/// Ordered visual events plus per-kind indices for frame-time queries.
#[derive(Clone, Debug, serde::Serialize)]
pub struct VisualTimeline {
    duration_ms: u64,
    events: Vec<VisualEvent>,
    lines: Vec<LineSpan>,
    #[serde(skip)]
    poses: [Vec<usize>; 2],
    #[serde(skip)]
    appearances: Vec<usize>,
    #[serde(skip)]
    captions: Vec<usize>,
    #[serde(skip)]
    opening: Option<usize>,
    first_speaker_hidden_until_ms: u64,
    warnings: Vec<String>,
}

fn midpoint(start: u64, end: u64) -> u64 {
    start + (end - start) / 2
}

struct DeclaredPose {
    start_ms: u64,
    end_ms: u64,
    pose_id: String,
}

struct Appearance {
    anchor_ms: u64,
    interval_end_ms: u64,
    asset_id: String,
    fullscreen: bool,
    character: Character,
}

/// Build the visual timeline for `dialogue` against `timing`.
#[tracing::instrument(level = "debug", skip_all, fields(lines = dialogue.len(), words = timing.len()))]
pub fn build(
    dialogue: &[DialogueLine],
    timing: &TimingIndex,
    opening_visual: Option<&str>,
    opts: &TimelineOptions,
) -> TalkreelResult<VisualTimeline> {
    if dialogue.is_empty() {
        return Err(TalkreelError::EmptyScript);
    }

    let mut warnings = Vec::new();
    let mut lines = Vec::with_capacity(dialogue.len());
    let mut declared: [Vec<DeclaredPose>; 2] = [Vec::new(), Vec::new()];
    let mut appearances = Vec::new();
    let mut captions = Vec::new();

    let mut offset = 0usize;
    for (line_index, line) in dialogue.iter().enumerate() {
        let word_count = line.spoken_words().len();
        if word_count == 0 {
            return Err(TalkreelError::validation(format!(
                "dialogue line {line_index} has no spoken words"
            )));
        }
        let view = timing.slice(offset, offset + word_count)?;
        let span = LineSpan {
            line_index,
            character: line.character,
            first_word: offset,
            word_count,
            start_ms: view.start_ms().unwrap_or(0),
            end_ms: view.end_ms().unwrap_or(0),
        };

        let word_time = |local: usize| -> (u64, u64) {
            let w = &view.words()[local.min(word_count - 1)];
            (w.start_ms, w.end_ms)
        };

        let track = &mut declared[line.character.index()];
        for (span_index, p) in line.poses.iter().enumerate() {
            if p.start_word_index > p.end_word_index {
                return Err(TalkreelError::validation(format!(
                    "line {line_index} pose span {span_index} has start_word_index {} > end_word_index {}",
                    p.start_word_index, p.end_word_index
                )));
            }
            if p.start_word_index >= word_count {
                warnings.push(format!(
                    "line {line_index} pose span {span_index} ('{}') starts past the last word; skipped",
                    p.pose_id
                ));
                continue;
            }
            let (mut start_ms, _) = word_time(p.start_word_index);
            let (_, end_ms) = word_time(p.end_word_index);
            if let Some(prev) = track.last()
                && start_ms < prev.end_ms
            {
                start_ms = prev.end_ms;
            }
            if start_ms >= end_ms {
                warnings.push(format!(
                    "line {line_index} pose span {span_index} ('{}') is fully covered by the previous span; skipped",
                    p.pose_id
                ));
                continue;
            }
            track.push(DeclaredPose {
                start_ms,
                end_ms,
                pose_id: p.pose_id.clone(),
            });
        }

        for (span_index, va) in line.visual_assets.iter().enumerate() {
            if let (Some(s), Some(e)) = (va.start_word_index, va.end_word_index)
                && s > e
            {
                return Err(TalkreelError::validation(format!(
                    "line {line_index} visual asset span {span_index} has start_word_index {s} > end_word_index {e}"
                )));
            }
            if opening_visual == Some(va.asset_id.as_str()) {
                warnings.push(format!(
                    "line {line_index} repeats opening visual '{}'; skipped",
                    va.asset_id
                ));
                continue;
            }
            let (start_ms, end_ms) = match (va.start_word_index, va.end_word_index) {
                (None, None) => (span.start_ms, span.end_ms),
                (s, e) => {
                    let s = s.unwrap_or(0).min(word_count - 1);
                    let e = e.unwrap_or(s).clamp(s, word_count - 1);
                    (word_time(s).0, word_time(e).1)
                }
            };
            appearances.push(Appearance {
                anchor_ms: midpoint(start_ms, end_ms),
                interval_end_ms: end_ms,
                asset_id: va.asset_id.clone(),
                fullscreen: va.fullscreen,
                character: line.character,
            });
        }

        captions.extend(spans_for(view, opts.caption_window));
        lines.push(span);
        offset += word_count;
    }

    if offset < timing.len() {
        let msg = format!(
            "timing has {} words but the script speaks {offset}; trailing words are unassigned",
            timing.len()
        );
        tracing::warn!("{msg}");
        warnings.push(msg);
    }

    let duration_ms = timing.duration_ms() + opts.tail_ms;
    let mut events = Vec::new();

    for c in Character::ALL {
        let track = std::mem::take(&mut declared[c.index()]);
        partition_poses(c, track, duration_ms, &opts.default_pose(c), &mut events);
    }

    appearances.sort_by_key(|a| a.anchor_ms);
    for i in 0..appearances.len() {
        let next = appearances.get(i + 1);
        let a = &appearances[i];
        let until = next.map_or(a.interval_end_ms, |n| n.anchor_ms.min(a.interval_end_ms));
        if let Some(n) = next
            && until <= a.anchor_ms
        {
            warnings.push(format!(
                "visual asset '{}' at {} ms is replaced by '{}' at the same instant; skipped",
                a.asset_id, a.anchor_ms, n.asset_id
            ));
            continue;
        }
        events.push(VisualEvent {
            start_ms: a.anchor_ms,
            end_ms: a.anchor_ms,
            payload: EventPayload::AssetAppearance {
                asset_id: a.asset_id.clone(),
                visible_until_ms: until.max(a.anchor_ms),
                fullscreen: a.fullscreen,
                character: a.character,
            },
        });
    }

    let mut first_speaker_hidden_until_ms = 0;
    if let Some(id) = opening_visual {
        let until = lines[0].midpoint_ms();
        first_speaker_hidden_until_ms = until;
        events.push(VisualEvent {
            start_ms: 0,
            end_ms: until,
            payload: EventPayload::OpeningVisual {
                asset_id: id.to_string(),
            },
        });
    }

    for cap in captions {
        events.push(VisualEvent {
            start_ms: cap.start_ms,
            end_ms: cap.end_ms,
            payload: EventPayload::CaptionSpan(cap),
        });
    }

    events.sort_by_key(|e| e.start_ms);

    let mut tl = VisualTimeline {
        duration_ms,
        events,
        lines,
        poses: [Vec::new(), Vec::new()],
        appearances: Vec::new(),
        captions: Vec::new(),
        opening: None,
        first_speaker_hidden_until_ms,
        warnings,
    };
    tl.index_events();

    tracing::debug!(
        events = tl.events.len(),
        duration_ms = tl.duration_ms,
        "visual timeline built"
    );
    Ok(tl)
}

fn partition_poses(
    character: Character,
    declared: Vec<DeclaredPose>,
    duration_ms: u64,
    default_pose: &str,
    out: &mut Vec<VisualEvent>,
) {
    let mut track: Vec<VisualEvent> = Vec::new();
    let mut cursor = 0u64;
    let mut last: Option<String> = None;

    let fill = |track: &mut Vec<VisualEvent>, start: u64, end: u64, last: &Option<String>| {
        if start >= end {
            return;
        }
        let (pose_id, source) = match last {
            Some(p) => (p.clone(), PoseSource::Carried),
            None => (default_pose.to_string(), PoseSource::Default),
        };
        push_merged(
            track,
            VisualEvent {
                start_ms: start,
                end_ms: end,
                payload: EventPayload::PoseChange {
                    character,
                    pose_id,
                    source,
                },
            },
        );
    };

    for d in declared {
        let start = d.start_ms.min(duration_ms);
        let end = d.end_ms.min(duration_ms);
        fill(&mut track, cursor, start, &last);
        if start < end {
            track.push(VisualEvent {
                start_ms: start,
                end_ms: end,
                payload: EventPayload::PoseChange {
                    character,
                    pose_id: d.pose_id.clone(),
                    source: PoseSource::Declared,
                },
            });
            cursor = end;
        }
        last = Some(d.pose_id);
    }
    fill(&mut track, cursor, duration_ms, &last);

    out.extend(track);
}

fn push_merged(track: &mut Vec<VisualEvent>, ev: VisualEvent) {
    if let Some(prev) = track.last_mut()
        && prev.end_ms == ev.start_ms
        && let (
            EventPayload::PoseChange {
                pose_id: a,
                source: sa,
                ..
            },
            EventPayload::PoseChange {
                pose_id: b,
                source: sb,
                ..
            },
        ) = (&prev.payload, &ev.payload)
        && sa.is_fill()
        && sb.is_fill()
        && a == b
    {
        prev.end_ms = ev.end_ms;
        return;
    }
    track.push(ev);
}

impl VisualTimeline {
    fn index_events(&mut self) {
        for (i, ev) in self.events.iter().enumerate() {
            match &ev.payload {
                EventPayload::PoseChange { character, .. } => self.poses[character.index()].push(i),
                EventPayload::AssetAppearance { .. } => self.appearances.push(i),
                EventPayload::CaptionSpan(_) => self.captions.push(i),
                EventPayload::OpeningVisual { .. } => self.opening = Some(i),
            }
        }
    }

    /// Video length: end of the last timing word plus the configured tail.
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// All events ordered by `start_ms`.
    pub fn events(&self) -> &[VisualEvent] {
        &self.events
    }

    /// Resolved line intervals in script order.
    pub fn lines(&self) -> &[LineSpan] {
        &self.lines
    }

    /// Anomalies tolerated during construction.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Pose change events of `character`, in time order.
    pub fn pose_changes(&self, character: Character) -> impl Iterator<Item = &VisualEvent> + '_ {
        self.poses[character.index()].iter().map(|&i| &self.events[i])
    }

    /// Pose of `character` at `t_ms`; `None` at or after `duration_ms`.
    pub fn pose_at(&self, character: Character, t_ms: u64) -> Option<&str> {
        let idx = &self.poses[character.index()];
        let n = idx.partition_point(|&i| self.events[i].start_ms <= t_ms);
        let ev = &self.events[*idx.get(n.checked_sub(1)?)?];
        if t_ms >= ev.end_ms {
            return None;
        }
        match &ev.payload {
            EventPayload::PoseChange { pose_id, .. } => Some(pose_id),
            _ => None,
        }
    }

    /// Whether `character` is drawn at `t_ms`. The first speaker waits for the opening visual.
    pub fn character_visible(&self, character: Character, t_ms: u64) -> bool {
        if t_ms >= self.duration_ms {
            return false;
        }
        !(self.lines[0].character == character && t_ms < self.first_speaker_hidden_until_ms)
    }

    /// Overlays on screen at `t_ms`, opening visual first, then in anchor order.
    pub fn assets_at(&self, t_ms: u64) -> Vec<ActiveVisual<'_>> {
        let mut out = Vec::new();
        if let Some(i) = self.opening {
            let ev = &self.events[i];
            if let EventPayload::OpeningVisual { asset_id } = &ev.payload
                && t_ms < ev.end_ms
            {
                out.push(ActiveVisual {
                    asset_id,
                    since_ms: ev.start_ms,
                    fullscreen: true,
                    character: None,
                });
            }
        }
        for &i in &self.appearances {
            let ev = &self.events[i];
            if ev.start_ms > t_ms {
                break;
            }
            if let EventPayload::AssetAppearance {
                asset_id,
                visible_until_ms,
                fullscreen,
                character,
            } = &ev.payload
                && t_ms < *visible_until_ms
            {
                out.push(ActiveVisual {
                    asset_id,
                    since_ms: ev.start_ms,
                    fullscreen: *fullscreen,
                    character: Some(*character),
                });
            }
        }
        out
    }

    /// Caption chunk covering `t_ms`.
    pub fn caption_at(&self, t_ms: u64) -> Option<&CaptionSpan> {
        let n = self
            .captions
            .partition_point(|&i| self.events[i].start_ms <= t_ms);
        let ev = &self.events[*self.captions.get(n.checked_sub(1)?)?];
        match &ev.payload {
            EventPayload::CaptionSpan(c) if t_ms < c.end_ms => Some(c),
            _ => None,
        }
    }

    /// Every asset id the timeline can put on screen.
    pub fn referenced_assets(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for ev in &self.events {
            let id = match &ev.payload {
                EventPayload::AssetAppearance { asset_id, .. }
                | EventPayload::OpeningVisual { asset_id } => asset_id.as_str(),
                _ => continue,
            };
            if !out.contains(&id) {
                out.push(id);
            }
        }
        out
    }
}

#[cfg(test)]
#[path = "../../tests/unit/timeline/builder.rs"]
mod tests;
