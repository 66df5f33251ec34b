use std::path::Path;

use anyhow::Context as _;

use crate::captions::CaptionWindow;
use crate::foundation::core::{Canvas, Fps};
use crate::foundation::error::{TalkreelError, TalkreelResult};
use crate::script::Character;

/// Rectangle in canvas fractions (`0.0..=1.0`).
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SlotRect {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub w: f64,
    /// Height.
    pub h: f64,
}

impl SlotRect {
    fn is_valid(&self) -> bool {
        [self.x, self.y, self.w, self.h]
            .iter()
            .all(|v| v.is_finite() && (0.0..=1.0).contains(v))
            && self.w > 0.0
            && self.h > 0.0
    }
}

/// Where each character is drawn.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CharacterSlots {
    /// Left half of the character band.
    pub skeptic: SlotRect,
    /// Right half of the character band.
    pub analyst: SlotRect,
}

impl Default for CharacterSlots {
    fn default() -> Self {
        Self {
            skeptic: SlotRect {
                x: 0.05,
                y: 0.35,
                w: 0.45,
                h: 0.50,
            },
            analyst: SlotRect {
                x: 0.50,
                y: 0.35,
                w: 0.45,
                h: 0.50,
            },
        }
    }
}

impl CharacterSlots {
    /// Slot of `character`.
    pub fn get(&self, character: Character) -> SlotRect {
        match character {
            Character::Skeptic => self.skeptic,
            Character::Analyst => self.analyst,
        }
    }
}

/// Caption text appearance.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CaptionStyle {
    /// Font size in pixels.
    pub font_size_px: f32,
    /// Straight RGBA8 text colour.
    pub text_rgba: [u8; 4],
    /// Colour of the word being spoken.
    pub highlight_rgba: [u8; 4],
    /// Long-shadow colour.
    pub shadow_rgba: [u8; 4],
    /// Distance from the canvas bottom to the caption block.
    pub bottom_margin_px: u32,
    /// Wrap width as a fraction of the canvas width.
    pub max_width_ratio: f64,
    /// Number of shadow copies.
    pub shadow_steps: u32,
    /// Diagonal offset per shadow copy.
    pub shadow_step_px: f64,
}

impl Default for CaptionStyle {
    fn default() -> Self {
        Self {
            font_size_px: 77.0,
            text_rgba: [255, 255, 255, 255],
            highlight_rgba: [255, 214, 10, 255],
            shadow_rgba: [0, 0, 0, 255],
            bottom_margin_px: 154,
            max_width_ratio: 0.9,
            shadow_steps: 10,
            shadow_step_px: 2.0,
        }
    }
}

/// Hook text appearance.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct HookStyle {
    /// Font size in pixels.
    pub font_size_px: f32,
    /// Straight RGBA8 text colour.
    pub text_rgba: [u8; 4],
    /// Shadow colour.
    pub shadow_rgba: [u8; 4],
    /// Distance from the canvas top to the text box.
    pub top_px: u32,
    /// Wrap width as a fraction of the canvas width.
    pub max_width_ratio: f64,
}

impl Default for HookStyle {
    fn default() -> Self {
        Self {
            font_size_px: 67.0,
            text_rgba: [255, 255, 255, 255],
            shadow_rgba: [0, 0, 0, 255],
            top_px: 154,
            max_width_ratio: 0.85,
        }
    }
}

/// Overlay placement and motion.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct VisualLayout {
    /// Width of side overlays.
    pub side_width_px: u32,
    /// Horizontal centre of the Skeptic's overlays, as a canvas fraction.
    pub skeptic_center_ratio: f64,
    /// Horizontal centre of the Analyst's overlays, as a canvas fraction.
    pub analyst_center_ratio: f64,
    /// Width of full-screen overlays as a canvas fraction.
    pub fullscreen_width_ratio: f64,
    /// Slide-in duration of side overlays.
    pub slide_ms: u64,
    /// Vertical bob amplitude.
    pub bob_amplitude_px: f64,
    /// Bob angular frequency in radians per second.
    pub bob_frequency: f64,
}

impl Default for VisualLayout {
    fn default() -> Self {
        Self {
            side_width_px: 800,
            skeptic_center_ratio: 0.25,
            analyst_center_ratio: 0.75,
            fullscreen_width_ratio: 0.9,
            slide_ms: 800,
            bob_amplitude_px: 10.0,
            bob_frequency: 2.0,
        }
    }
}

/// Bounds on blocking operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Reading and decoding one asset file.
    pub load_timeout_ms: u64,
    /// Handing one frame to the encoder.
    pub write_timeout_ms: u64,
    /// Waiting for the encoder to finalize the container.
    pub finish_timeout_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            load_timeout_ms: 10_000,
            write_timeout_ms: 30_000,
            finish_timeout_ms: 120_000,
        }
    }
}

/// Everything that shapes the rendered video. Every field has a default.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Output size.
    pub canvas: Canvas,
    /// Output frame rate.
    pub fps: Fps,
    /// Straight RGBA8 background colour.
    pub background_rgba: [u8; 4],
    /// Character placement.
    pub slots: CharacterSlots,
    /// Caption appearance.
    pub captions: CaptionStyle,
    /// Caption chunking.
    pub caption_window: CaptionWindow,
    /// Hook text appearance.
    pub hook: HookStyle,
    /// Overlay placement and motion.
    pub visuals: VisualLayout,
    /// Compose frames on a rayon pool.
    pub parallel: bool,
    /// Worker count; `None` uses rayon's default.
    pub threads: Option<usize>,
    /// Frames per parallel batch.
    pub chunk_size: usize,
    /// Blocking-operation limits.
    pub timeouts: Timeouts,
    /// Silence kept after the last word.
    pub tail_ms: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            canvas: Canvas::default(),
            fps: Fps::default(),
            background_rgba: [15, 15, 20, 255],
            slots: CharacterSlots::default(),
            captions: CaptionStyle::default(),
            caption_window: CaptionWindow::default(),
            hook: HookStyle::default(),
            visuals: VisualLayout::default(),
            parallel: false,
            threads: None,
            chunk_size: 32,
            timeouts: Timeouts::default(),
            tail_ms: 0,
        }
    }
}

impl RenderConfig {
    /// Parse and validate.
    pub fn from_json_str(s: &str) -> TalkreelResult<Self> {
        let cfg: RenderConfig = serde_json::from_str(s)
            .map_err(|e| TalkreelError::validation(format!("invalid render config JSON: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate.
    pub fn from_path(path: &Path) -> TalkreelResult<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read render config '{}'", path.display()))?;
        Self::from_json_str(&text)
    }

    /// Reject values the pipeline cannot honour.
    pub fn validate(&self) -> TalkreelResult<()> {
        if self.canvas.width == 0 || self.canvas.height == 0 {
            return Err(TalkreelError::validation("canvas width/height must be non-zero"));
        }
        if !self.canvas.width.is_multiple_of(2) || !self.canvas.height.is_multiple_of(2) {
            return Err(TalkreelError::validation(
                "canvas width/height must be even (required for yuv420p output)",
            ));
        }
        if self.canvas.width > u32::from(u16::MAX) || self.canvas.height > u32::from(u16::MAX) {
            return Err(TalkreelError::validation("canvas width/height must fit in u16"));
        }
        Fps::new(self.fps.num, self.fps.den)?;
        if self.threads == Some(0) {
            return Err(TalkreelError::validation("'threads' must be >= 1 when set"));
        }
        let t = &self.timeouts;
        if t.load_timeout_ms == 0 || t.write_timeout_ms == 0 || t.finish_timeout_ms == 0 {
            return Err(TalkreelError::validation("timeouts must be non-zero"));
        }
        if !self.slots.skeptic.is_valid() || !self.slots.analyst.is_valid() {
            return Err(TalkreelError::validation(
                "character slots must be fractions in 0..=1 with positive size",
            ));
        }
        for (name, size) in [
            ("captions.font_size_px", self.captions.font_size_px),
            ("hook.font_size_px", self.hook.font_size_px),
        ] {
            if !size.is_finite() || size <= 0.0 {
                return Err(TalkreelError::validation(format!(
                    "{name} must be finite and > 0"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../tests/unit/config.rs"]
mod tests;
