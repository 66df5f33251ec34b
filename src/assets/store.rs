use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;

use crate::assets::catalog::AssetCatalog;
use crate::assets::decode::{PreparedImage, load_image_file};
use crate::foundation::error::{AssetRef, TalkreelError, TalkreelResult};
use crate::lipsync::MouthState;
use crate::script::Character;

/// Per-file loading limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadOptions {
    /// Maximum time to read and decode one file.
    pub timeout: Duration,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

/// Dense per-character pose number assigned at load time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoseSlot(pub u16);

/// Flat `(Character, PoseSlot, MouthState)` image table.
#[derive(Clone, Debug, Default)]
pub struct PoseTable {
    names: [Vec<String>; 2],
    slots_per_character: usize,
    images: Vec<Option<Arc<PreparedImage>>>,
}

impl PoseTable {
    fn with_names(names: [Vec<String>; 2]) -> Self {
        let slots_per_character = names.iter().map(Vec::len).max().unwrap_or(0);
        Self {
            names,
            slots_per_character,
            images: vec![None; 2 * slots_per_character * MouthState::ALL.len()],
        }
    }

    fn offset(&self, character: Character, slot: PoseSlot, mouth: MouthState) -> usize {
        (character.index() * self.slots_per_character + usize::from(slot.0)) * 2 + mouth.slot()
    }

    fn insert(
        &mut self,
        character: Character,
        slot: PoseSlot,
        mouth: MouthState,
        image: Arc<PreparedImage>,
    ) {
        let i = self.offset(character, slot, mouth);
        self.images[i] = Some(image);
    }

    /// Slot of `pose_id` for `character`.
    pub fn slot(&self, character: Character, pose_id: &str) -> Option<PoseSlot> {
        self.names[character.index()]
            .iter()
            .position(|n| n == pose_id)
            .map(|i| PoseSlot(i as u16))
    }

    /// Pose id of a slot.
    pub fn pose_id(&self, character: Character, slot: PoseSlot) -> Option<&str> {
        self.names[character.index()]
            .get(usize::from(slot.0))
            .map(String::as_str)
    }

    /// Image for a resolved key.
    pub fn get(
        &self,
        character: Character,
        slot: PoseSlot,
        mouth: MouthState,
    ) -> Option<&Arc<PreparedImage>> {
        if usize::from(slot.0) >= self.names[character.index()].len() {
            return None;
        }
        self.images[self.offset(character, slot, mouth)].as_ref()
    }

    /// Slot of `(character, pose_id)` after checking an image exists for `mouth`.
    pub fn resolve_slot(
        &self,
        character: Character,
        pose_id: &str,
        mouth: MouthState,
    ) -> TalkreelResult<PoseSlot> {
        let missing = |reason: &str| {
            TalkreelError::asset(
                AssetRef::Pose {
                    character,
                    pose_id: pose_id.to_string(),
                    mouth,
                },
                reason,
            )
        };
        let slot = self
            .slot(character, pose_id)
            .ok_or_else(|| missing("pose is not in the asset catalog"))?;
        match self.get(character, slot, mouth) {
            Some(_) => Ok(slot),
            None => Err(missing("no image loaded for this mouth state")),
        }
    }

    /// Image for `(character, pose_id, mouth)`, or an error naming that combination.
    pub fn resolve(
        &self,
        character: Character,
        pose_id: &str,
        mouth: MouthState,
    ) -> TalkreelResult<&Arc<PreparedImage>> {
        let slot = self.resolve_slot(character, pose_id, mouth)?;
        self.get(character, slot, mouth).ok_or_else(|| {
            TalkreelError::asset(
                AssetRef::Pose {
                    character,
                    pose_id: pose_id.to_string(),
                    mouth,
                },
                "no image loaded for this mouth state",
            )
        })
    }
}

/// Immutable, shareable images and font shared by every job.
#[derive(Debug, Default)]
pub struct AssetCache {
    poses: PoseTable,
    default_poses: BTreeMap<Character, String>,
    background: Option<Arc<PreparedImage>>,
    caption_font: Option<Arc<Vec<u8>>>,
}

struct PoseLoad {
    character: Character,
    slot: PoseSlot,
    mouth: MouthState,
    path: PathBuf,
}

impl AssetCache {
    /// Load every catalog file, each bounded by `opts.timeout`.
    #[tracing::instrument(level = "info", skip_all, fields(root = %catalog.root.display()))]
    pub fn warm_up(catalog: &AssetCatalog, opts: LoadOptions) -> TalkreelResult<Self> {
        catalog.validate()?;

        let mut names: [Vec<String>; 2] = [Vec::new(), Vec::new()];
        let mut loads = Vec::new();
        for (character, entry) in &catalog.characters {
            for p in &entry.poses {
                let slot = PoseSlot(names[character.index()].len() as u16);
                names[character.index()].push(p.pose_id.clone());
                for (mouth, path) in [(MouthState::Closed, &p.closed), (MouthState::Open, &p.open)] {
                    if let Some(path) = path {
                        loads.push(PoseLoad {
                            character: *character,
                            slot,
                            mouth,
                            path: catalog.resolve(path),
                        });
                    }
                }
            }
        }

        let mut poses = PoseTable::with_names(names);
        let loaded = loads
            .par_iter()
            .map(|l| {
                load_with_timeout(&l.path, opts.timeout).map_err(|reason| {
                    TalkreelError::asset(
                        AssetRef::Pose {
                            character: l.character,
                            pose_id: poses_name(&catalog.characters, l.character, l.slot),
                            mouth: l.mouth,
                        },
                        reason,
                    )
                })
            })
            .collect::<TalkreelResult<Vec<_>>>()?;
        for (l, img) in loads.iter().zip(loaded) {
            poses.insert(l.character, l.slot, l.mouth, Arc::new(img));
        }

        let background = match &catalog.background_image {
            Some(p) => Some(Arc::new(load_file(catalog, "background image", p, opts)?)),
            None => None,
        };
        let caption_font = match &catalog.caption_font {
            Some(p) => Some(Arc::new(read_font(catalog, p, opts)?)),
            None => None,
        };

        tracing::info!(
            images = loads.len(),
            background = background.is_some(),
            caption_font = caption_font.is_some(),
            "asset cache warmed up"
        );
        Ok(Self {
            poses,
            default_poses: catalog.default_poses(),
            background,
            caption_font,
        })
    }

    /// Assemble a cache from already decoded parts.
    pub fn from_parts(
        poses: impl IntoIterator<Item = (Character, String, MouthState, PreparedImage)>,
        background: Option<PreparedImage>,
        caption_font: Option<Vec<u8>>,
    ) -> Self {
        let entries: Vec<_> = poses.into_iter().collect();
        let mut names: [Vec<String>; 2] = [Vec::new(), Vec::new()];
        for (c, pose_id, _, _) in &entries {
            if !names[c.index()].contains(pose_id) {
                names[c.index()].push(pose_id.clone());
            }
        }
        let mut table = PoseTable::with_names(names);
        for (c, pose_id, mouth, img) in entries {
            if let Some(slot) = table.slot(c, &pose_id) {
                table.insert(c, slot, mouth, Arc::new(img));
            }
        }
        Self {
            poses: table,
            default_poses: BTreeMap::new(),
            background: background.map(Arc::new),
            caption_font: caption_font.map(Arc::new),
        }
    }

    /// Pose image table.
    pub fn poses(&self) -> &PoseTable {
        &self.poses
    }

    /// Catalog default poses.
    pub fn default_poses(&self) -> &BTreeMap<Character, String> {
        &self.default_poses
    }

    /// Background image, when configured.
    pub fn background(&self) -> Option<&Arc<PreparedImage>> {
        self.background.as_ref()
    }

    /// Caption font bytes, when configured.
    pub fn caption_font(&self) -> Option<&Arc<Vec<u8>>> {
        self.caption_font.as_ref()
    }
}

fn poses_name(
    characters: &BTreeMap<Character, crate::assets::catalog::CharacterPoses>,
    character: Character,
    slot: PoseSlot,
) -> String {
    characters
        .get(&character)
        .and_then(|e| e.poses.get(usize::from(slot.0)))
        .map(|p| p.pose_id.clone())
        .unwrap_or_default()
}

fn load_file(
    catalog: &AssetCatalog,
    role: &'static str,
    path: &Path,
    opts: LoadOptions,
) -> TalkreelResult<PreparedImage> {
    load_with_timeout(&catalog.resolve(path), opts.timeout).map_err(|reason| {
        TalkreelError::asset(
            AssetRef::File {
                role,
                path: path.display().to_string(),
            },
            reason,
        )
    })
}

fn read_font(catalog: &AssetCatalog, path: &Path, opts: LoadOptions) -> TalkreelResult<Vec<u8>> {
    let full = catalog.resolve(path);
    run_with_timeout(opts.timeout, move || {
        std::fs::read(&full).map_err(|e| format!("read '{}': {e}", full.display()))
    })
    .map_err(|reason| {
        TalkreelError::asset(
            AssetRef::File {
                role: "caption font",
                path: path.display().to_string(),
            },
            reason,
        )
    })
}

/// Decode `path` on a helper thread, giving up after `timeout`.
pub(crate) fn load_with_timeout(path: &Path, timeout: Duration) -> Result<PreparedImage, String> {
    let owned = path.to_path_buf();
    run_with_timeout(timeout, move || {
        load_image_file(&owned).map_err(|e| e.to_string())
    })
}

fn run_with_timeout<T, F>(timeout: Duration, f: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, String> + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(1);
    std::thread::Builder::new()
        .name("talkreel-asset-load".to_string())
        .spawn(move || {
            let _ = tx.send(f());
        })
        .map_err(|e| format!("failed to spawn loader thread: {e}"))?;
    match rx.recv_timeout(timeout) {
        Ok(res) => res,
        Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
            Err(format!("timed out after {} ms", timeout.as_millis()))
        }
        Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
            Err("loader thread exited without a result".to_string())
        }
    }
}

/// Assets for one job: the shared cache plus the job's overlay images.
#[derive(Clone, Debug)]
pub struct FrameAssets {
    cache: Arc<AssetCache>,
    visuals: BTreeMap<String, Arc<PreparedImage>>,
}

impl FrameAssets {
    /// Load the overlay images named in `needed` from `paths`.
    pub fn load(
        cache: Arc<AssetCache>,
        paths: &BTreeMap<String, PathBuf>,
        needed: &[&str],
        opts: LoadOptions,
    ) -> TalkreelResult<Self> {
        let loaded = needed
            .par_iter()
            .map(|&id| {
                let visual = || AssetRef::Visual {
                    asset_id: id.to_string(),
                };
                let path = paths.get(id).ok_or_else(|| {
                    TalkreelError::asset(visual(), "asset id is not in the job's visual asset map")
                })?;
                let img = load_with_timeout(path, opts.timeout)
                    .map_err(|reason| TalkreelError::asset(visual(), reason))?;
                Ok((id.to_string(), Arc::new(img)))
            })
            .collect::<TalkreelResult<Vec<_>>>()?;
        Ok(Self {
            cache,
            visuals: loaded.into_iter().collect(),
        })
    }

    /// Build from already decoded overlays.
    pub fn from_parts(
        cache: Arc<AssetCache>,
        visuals: impl IntoIterator<Item = (String, PreparedImage)>,
    ) -> Self {
        Self {
            cache,
            visuals: visuals
                .into_iter()
                .map(|(k, v)| (k, Arc::new(v)))
                .collect(),
        }
    }

    /// Shared cache.
    pub fn cache(&self) -> &AssetCache {
        &self.cache
    }

    /// Overlay image for `asset_id`.
    pub fn visual(&self, asset_id: &str) -> TalkreelResult<&Arc<PreparedImage>> {
        self.visuals.get(asset_id).ok_or_else(|| {
            TalkreelError::asset(
                AssetRef::Visual {
                    asset_id: asset_id.to_string(),
                },
                "visual asset was not loaded",
            )
        })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/assets/store.rs"]
mod tests;
