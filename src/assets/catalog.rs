use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::foundation::error::{TalkreelError, TalkreelResult};
use crate::script::Character;

/// Camera framing of a pose.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseView {
    /// Medium shot.
    #[default]
    Front,
    /// Close-up.
    Close,
    /// Side profile.
    Side,
    /// Point-of-view shot.
    Pov,
}

/// One pose and its two mouth images.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PoseEntry {
    /// Pose identifier used by scripts.
    pub pose_id: String,
    /// Framing.
    #[serde(default)]
    pub view: PoseView,
    /// Open-mouth image.
    #[serde(default)]
    pub open: Option<PathBuf>,
    /// Closed-mouth image.
    #[serde(default)]
    pub closed: Option<PathBuf>,
}

/// Poses available for one character.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CharacterPoses {
    /// Pose used before the script declares one.
    #[serde(default)]
    pub default_pose: Option<String>,
    /// Pose list.
    #[serde(default)]
    pub poses: Vec<PoseEntry>,
}

/// Image assets shared by all jobs.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AssetCatalog {
    /// Poses per character.
    #[serde(default)]
    pub characters: BTreeMap<Character, CharacterPoses>,
    /// TrueType/OpenType font for hook text and captions.
    #[serde(default)]
    pub caption_font: Option<PathBuf>,
    /// Cover-fitted background image.
    #[serde(default)]
    pub background_image: Option<PathBuf>,
    /// Base for relative paths; set by [`AssetCatalog::from_path`].
    #[serde(skip)]
    pub root: PathBuf,
}

impl AssetCatalog {
    /// Parse a catalog whose relative paths resolve against `root`.
    pub fn from_json_str(s: &str, root: impl Into<PathBuf>) -> TalkreelResult<Self> {
        let mut catalog: AssetCatalog = serde_json::from_str(s)
            .map_err(|e| TalkreelError::validation(format!("invalid asset catalog JSON: {e}")))?;
        catalog.root = root.into();
        catalog.validate()?;
        Ok(catalog)
    }

    /// Read a catalog file; relative paths resolve against its directory.
    pub fn from_path(path: &Path) -> TalkreelResult<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read asset catalog '{}'", path.display()))?;
        let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_json_str(&text, root)
    }

    /// Reject duplicate pose ids and defaults that name unknown poses.
    pub fn validate(&self) -> TalkreelResult<()> {
        for (character, entry) in &self.characters {
            for (i, p) in entry.poses.iter().enumerate() {
                if p.pose_id.is_empty() {
                    return Err(TalkreelError::validation(format!(
                        "{character} pose {i} has an empty pose_id"
                    )));
                }
                if entry.poses[..i].iter().any(|q| q.pose_id == p.pose_id) {
                    return Err(TalkreelError::validation(format!(
                        "{character} pose '{}' is listed twice",
                        p.pose_id
                    )));
                }
            }
            if let Some(d) = &entry.default_pose
                && !entry.poses.iter().any(|p| &p.pose_id == d)
            {
                return Err(TalkreelError::validation(format!(
                    "{character} default_pose '{d}' is not in its pose list"
                )));
            }
        }
        Ok(())
    }

    /// Catalog default pose per character.
    pub fn default_poses(&self) -> BTreeMap<Character, String> {
        self.characters
            .iter()
            .filter_map(|(c, e)| e.default_pose.clone().map(|p| (*c, p)))
            .collect()
    }

    /// Resolve `path` against [`AssetCatalog::root`].
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/assets/catalog.rs"]
mod tests;
