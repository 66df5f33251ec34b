use std::fmt;

use crate::lipsync::MouthState;
use crate::script::model::Character;

/// Convenience result type used across talkreel.
pub type TalkreelResult<T> = Result<T, TalkreelError>;

/// Identifies the asset that failed to resolve.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssetRef {
    /// A character pose image for one mouth state.
    Pose {
        /// Character the pose belongs to.
        character: Character,
        /// Pose identifier as written in the script or catalog.
        pose_id: String,
        /// Requested mouth state.
        mouth: MouthState,
    },
    /// A floating or opening visual referenced by asset id.
    Visual {
        /// Asset identifier from the script.
        asset_id: String,
    },
    /// Any other file the renderer needs (background, caption font).
    File {
        /// What the file is used for.
        role: &'static str,
        /// Path as given by the caller.
        path: String,
    },
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetRef::Pose {
                character,
                pose_id,
                mouth,
            } => write!(f, "pose ({character}, {pose_id}, {mouth})"),
            AssetRef::Visual { asset_id } => write!(f, "visual asset '{asset_id}'"),
            AssetRef::File { role, path } => write!(f, "{role} file '{path}'"),
        }
    }
}

/// Where in the render an error surfaced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderPosition {
    /// Presentation time in milliseconds.
    pub t_ms: Option<u64>,
    /// Output frame index.
    pub frame: Option<u64>,
}

impl fmt::Display for RenderPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.frame, self.t_ms) {
            (Some(frame), Some(t)) => write!(f, " at frame {frame} (t={t}ms)"),
            (None, Some(t)) => write!(f, " at t={t}ms"),
            (Some(frame), None) => write!(f, " at frame {frame}"),
            (None, None) => Ok(()),
        }
    }
}

/// Top-level error taxonomy used by the render pipeline.
#[derive(thiserror::Error, Debug)]
pub enum TalkreelError {
    /// Malformed, non-monotonic or insufficient word timing.
    #[error("timing error{}: {message}", word_suffix(.word_index))]
    Timing {
        /// Offending word index, when one word is to blame.
        word_index: Option<usize>,
        /// Human-readable description.
        message: String,
    },

    /// The dialogue script has no lines.
    #[error("empty script: dialogue has no lines")]
    EmptyScript,

    /// A pose/mouth image, visual asset, or auxiliary file could not be resolved or loaded.
    #[error("asset resolution error: {asset}{position}: {reason}")]
    AssetResolution {
        /// The missing asset.
        asset: AssetRef,
        /// Time/frame context, when known.
        position: RenderPosition,
        /// Cause (not loaded, decode failure, timeout).
        reason: String,
    },

    /// Encoder I/O or codec failure.
    #[error("encoder error{position}: {message}")]
    Encoder {
        /// Frame context, when known.
        position: RenderPosition,
        /// Human-readable description.
        message: String,
    },

    /// The caller asked the job to stop. Not a failure.
    #[error("cancellation requested")]
    Cancelled,

    /// Invalid caller-provided data (script shape, config, job spec).
    #[error("validation error: {0}")]
    Validation(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn word_suffix(word_index: &Option<usize>) -> String {
    word_index
        .map(|i| format!(" at word {i}"))
        .unwrap_or_default()
}

impl TalkreelError {
    /// Build a [`TalkreelError::Timing`] value for a specific word.
    pub fn timing_at(word_index: usize, msg: impl Into<String>) -> Self {
        Self::Timing {
            word_index: Some(word_index),
            message: msg.into(),
        }
    }

    /// Build a [`TalkreelError::Timing`] value not tied to one word.
    pub fn timing(msg: impl Into<String>) -> Self {
        Self::Timing {
            word_index: None,
            message: msg.into(),
        }
    }

    /// Build a [`TalkreelError::AssetResolution`] value.
    pub fn asset(asset: AssetRef, reason: impl Into<String>) -> Self {
        Self::AssetResolution {
            asset,
            position: RenderPosition::default(),
            reason: reason.into(),
        }
    }

    /// Build a [`TalkreelError::Encoder`] value.
    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder {
            position: RenderPosition::default(),
            message: msg.into(),
        }
    }

    /// Build a [`TalkreelError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Attach frame/time context to asset and encoder errors; other variants pass through.
    pub fn at(mut self, frame: Option<u64>, t_ms: Option<u64>) -> Self {
        match &mut self {
            Self::AssetResolution { position, .. } | Self::Encoder { position, .. } => {
                if position.frame.is_none() {
                    position.frame = frame;
                }
                if position.t_ms.is_none() {
                    position.t_ms = t_ms;
                }
            }
            _ => {}
        }
        self
    }

    /// Return `true` for [`TalkreelError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short, stable name of the error kind, recorded in job logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timing { .. } => "TimingError",
            Self::EmptyScript => "EmptyScriptError",
            Self::AssetResolution { .. } => "AssetResolutionError",
            Self::Encoder { .. } => "EncoderError",
            Self::Cancelled => "CancellationRequested",
            Self::Validation(_) => "ValidationError",
            Self::Other(_) => "Error",
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
