use std::fmt;
use std::path::Path;

use anyhow::Context as _;

use crate::foundation::error::{TalkreelError, TalkreelResult};

/// One of the two on-screen speakers.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum Character {
    /// Questioning voice, drawn on the left.
    #[serde(
        rename = "skeptic",
        alias = "Skeptic",
        alias = "character_a",
        alias = "A",
        alias = "Brother Marcus"
    )]
    Skeptic,
    /// Answering voice, drawn on the right.
    #[serde(
        rename = "analyst",
        alias = "Analyst",
        alias = "character_b",
        alias = "B",
        alias = "Sister Faith"
    )]
    Analyst,
}

impl Character {
    /// Every character, in slot order.
    pub const ALL: [Character; 2] = [Character::Skeptic, Character::Analyst];

    /// Dense index used by per-character tables.
    pub fn index(self) -> usize {
        match self {
            Character::Skeptic => 0,
            Character::Analyst => 1,
        }
    }

    /// Lowercase name used in pose ids and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Character::Skeptic => "skeptic",
            Character::Analyst => "analyst",
        }
    }

    /// Pose used when neither the script nor the catalog declares one.
    pub fn fallback_pose_id(self) -> String {
        format!("{}_front", self.as_str())
    }
}

impl fmt::Display for Character {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pose used for the inclusive local word range `[start_word_index, end_word_index]`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PoseSpan {
    /// Pose identifier, e.g. `analyst_close`.
    pub pose_id: String,
    /// First word covered, local to the line.
    pub start_word_index: usize,
    /// Last word covered (inclusive), local to the line.
    pub end_word_index: usize,
}

/// Overlay image shown while a line (or part of it) is spoken.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VisualAssetSpan {
    /// Key into the job's visual asset map.
    #[serde(alias = "visual_asset_id")]
    pub asset_id: String,
    /// Optional first word of a narrower anchor range.
    #[serde(default)]
    pub start_word_index: Option<usize>,
    /// Optional last word (inclusive) of a narrower anchor range.
    #[serde(default)]
    pub end_word_index: Option<usize>,
    /// Centred full-screen presentation instead of a side panel.
    #[serde(default = "default_fullscreen", alias = "is_fullscreen")]
    pub fullscreen: bool,
}

fn default_fullscreen() -> bool {
    true
}

/// One spoken line of dialogue.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DialogueLine {
    /// Speaker.
    pub character: Character,
    /// Line text, possibly containing `[performance]` and `<markup/>` tags.
    pub text: String,
    /// Pose placements in line order.
    #[serde(default, alias = "character_poses", deserialize_with = "null_as_empty")]
    pub poses: Vec<PoseSpan>,
    /// Overlay images for this line.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub visual_assets: Vec<VisualAssetSpan>,
}

impl DialogueLine {
    /// Words actually spoken, in order. Tags are removed and punctuation-only tokens dropped.
    pub fn spoken_words(&self) -> Vec<&str> {
        spoken_words(&self.text)
    }
}

fn null_as_empty<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::Deserialize<'de>,
{
    let v: Option<Vec<T>> = serde::Deserialize::deserialize(d)?;
    Ok(v.unwrap_or_default())
}

/// Finished dialogue script.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Script {
    /// Optional overlay text shown at the top of the frame.
    #[serde(default)]
    pub hook_text: Option<String>,
    /// Ordered dialogue lines.
    #[serde(default)]
    pub dialogue: Vec<DialogueLine>,
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum ScriptDocument {
    Wrapped { script: Script },
    Bare(Script),
}

impl Script {
    /// Parse a script document. Both `{"dialogue": [...]}` and `{"script": {"dialogue": [...]}}`
    /// are accepted.
    pub fn from_json_str(s: &str) -> TalkreelResult<Self> {
        let doc: ScriptDocument = serde_json::from_str(s)
            .map_err(|e| TalkreelError::validation(format!("invalid script JSON: {e}")))?;
        Ok(match doc {
            ScriptDocument::Wrapped { script } => script,
            ScriptDocument::Bare(script) => script,
        })
    }

    /// Read and parse a script file.
    pub fn from_path(path: &Path) -> TalkreelResult<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read script '{}'", path.display()))?;
        Self::from_json_str(&text)
    }

    /// Total number of spoken words across all lines.
    pub fn word_count(&self) -> usize {
        self.dialogue.iter().map(|l| l.spoken_words().len()).sum()
    }

    /// Every asset id the script references, in first-use order without duplicates.
    pub fn referenced_asset_ids(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for line in &self.dialogue {
            for va in &line.visual_assets {
                if !out.contains(&va.asset_id.as_str()) {
                    out.push(&va.asset_id);
                }
            }
        }
        out
    }
}

/// Split `text` into spoken words.
pub fn spoken_words<'a>(text: &'a str) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut depth_square = 0usize;
    let mut depth_angle = 0usize;
    let mut word_start: Option<usize> = None;

    let flush = |start: Option<usize>, end: usize, out: &mut Vec<&'a str>| {
        if let Some(s) = start {
            let w = &text[s..end];
            if w.chars().any(char::is_alphanumeric) {
                out.push(w);
            }
        }
    };

    for (i, ch) in text.char_indices() {
        match ch {
            '[' => {
                flush(word_start.take(), i, &mut out);
                depth_square += 1;
            }
            ']' if depth_square > 0 => depth_square -= 1,
            '<' => {
                flush(word_start.take(), i, &mut out);
                depth_angle += 1;
            }
            '>' if depth_angle > 0 => depth_angle -= 1,
            _ if depth_square > 0 || depth_angle > 0 => {}
            c if c.is_whitespace() => flush(word_start.take(), i, &mut out),
            _ => {
                if word_start.is_none() {
                    word_start = Some(i);
                }
            }
        }
    }
    flush(word_start.take(), text.len(), &mut out);
    out
}

#[cfg(test)]
#[path = "../../tests/unit/script/model.rs"]
mod tests;
