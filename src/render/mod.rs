//! Frame composition.
//!
//! [`FrameCompositor`] turns a presentation time into one premultiplied RGBA8 frame. Composition
//! is split into [`FrameCompositor::resolve`], which decides what is on screen, and
//! [`FrameCompositor::paint`], which rasterizes that decision with `vello_cpu`.

/// Timeline/asset resolution and painting.
pub mod compositor;
/// Rendered frame buffer.
pub mod frame;
/// Parley text layout into owned glyph runs.
pub mod text;

pub use compositor::{CharacterDraw, FrameCompositor, FrameState, Painter, VisualDraw};
pub use frame::FrameRGBA;
