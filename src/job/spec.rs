use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::config::RenderConfig;
use crate::foundation::error::{TalkreelError, TalkreelResult};
use crate::script::{Character, Script};
use crate::timeline::{TimelineOptions, VisualTimeline};
use crate::timing::TimingIndex;

/// Where the dialogue script comes from.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ScriptSource {
    /// Path to a script JSON file.
    Path(PathBuf),
    /// Script embedded in the job.
    Inline(Script),
}

/// One render request.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct JobSpec {
    /// Dialogue script.
    pub script: ScriptSource,
    /// Word timing document.
    pub timing_path: PathBuf,
    /// Narration audio muxed into the output; video only when absent.
    #[serde(default)]
    pub audio_path: Option<PathBuf>,
    /// Final MP4 path.
    pub output_path: PathBuf,
    /// `asset_id -> image path` for overlays.
    #[serde(default)]
    pub visual_assets: BTreeMap<String, PathBuf>,
    /// Asset shown full-screen while the first line is spoken.
    #[serde(default)]
    pub opening_visual: Option<String>,
    /// Overrides the script's hook text.
    #[serde(default)]
    pub hook_text: Option<String>,
    /// Rendering knobs.
    #[serde(default)]
    pub config: RenderConfig,
}

/// Parsed script and timing of a job.
#[derive(Clone, Debug)]
pub struct JobInputs {
    /// Dialogue script.
    pub script: Script,
    /// Word timing.
    pub timing: TimingIndex,
}

impl JobSpec {
    /// Parse and validate a job; relative paths resolve against `root`.
    pub fn from_json_str(s: &str, root: &Path) -> TalkreelResult<Self> {
        let mut spec: JobSpec = serde_json::from_str(s)
            .map_err(|e| TalkreelError::validation(format!("invalid job JSON: {e}")))?;
        spec.rebase(root);
        spec.validate()?;
        Ok(spec)
    }

    /// Read a job file; relative paths resolve against its directory.
    pub fn from_path(path: &Path) -> TalkreelResult<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read job spec '{}'", path.display()))?;
        let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_json_str(&text, &root)
    }

    fn rebase(&mut self, root: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = root.join(&*p);
            }
        };
        if let ScriptSource::Path(p) = &mut self.script {
            join(p);
        }
        join(&mut self.timing_path);
        join(&mut self.output_path);
        if let Some(p) = &mut self.audio_path {
            join(p);
        }
        self.visual_assets.values_mut().for_each(join);
    }

    /// Check fields that do not need the filesystem.
    pub fn validate(&self) -> TalkreelResult<()> {
        if self.output_path.file_name().is_none() {
            return Err(TalkreelError::validation(format!(
                "output_path '{}' does not name a file",
                self.output_path.display()
            )));
        }
        if let Some(id) = &self.opening_visual
            && !self.visual_assets.contains_key(id)
        {
            return Err(TalkreelError::validation(format!(
                "opening_visual '{id}' is not in visual_assets"
            )));
        }
        self.config.validate()
    }

    /// Load the script and word timing.
    pub fn load_inputs(&self) -> TalkreelResult<JobInputs> {
        let script = match &self.script {
            ScriptSource::Path(p) => Script::from_path(p)?,
            ScriptSource::Inline(s) => s.clone(),
        };
        let timing = TimingIndex::from_path(&self.timing_path)?;
        Ok(JobInputs { script, timing })
    }

    /// Hook text to draw: the job's override, else the script's.
    pub fn effective_hook_text<'a>(&'a self, inputs: &'a JobInputs) -> Option<&'a str> {
        self.hook_text
            .as_deref()
            .or(inputs.script.hook_text.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Build the visual timeline with catalog default poses.
    pub fn timeline(
        &self,
        inputs: &JobInputs,
        default_poses: &BTreeMap<Character, String>,
    ) -> TalkreelResult<VisualTimeline> {
        let opts = TimelineOptions {
            default_poses: default_poses.clone(),
            caption_window: self.config.caption_window,
            tail_ms: self.config.tail_ms,
        };
        crate::timeline::build(
            &inputs.script.dialogue,
            &inputs.timing,
            self.opening_visual.as_deref(),
            &opts,
        )
    }
}

#[cfg(test)]
#[path = "../../tests/unit/job/spec.rs"]
mod tests;
