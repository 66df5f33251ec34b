use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;

use crate::foundation::error::{TalkreelError, TalkreelResult};
use crate::foundation::math::premultiply_rgba8_in_place;

const MAX_DIM: u32 = 8_192;

/// Decoded image ready to be used as a `vello_cpu` paint.
#[derive(Clone)]
pub struct PreparedImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    pub(crate) paint: vello_cpu::Image,
}

impl fmt::Debug for PreparedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl PreparedImage {
    /// Wrap premultiplied RGBA8 bytes.
    pub fn from_premul_rgba8(bytes: &[u8], width: u32, height: u32) -> TalkreelResult<Self> {
        let pixmap = pixmap_from_premul_bytes(bytes, width, height)?;
        Ok(Self {
            width,
            height,
            paint: vello_cpu::Image {
                image: vello_cpu::ImageSource::Pixmap(Arc::new(pixmap)),
                sampler: vello_cpu::peniko::ImageSampler::default(),
            },
        })
    }
}

#[cfg(test)]
impl PreparedImage {
    pub(crate) fn premul_bytes(&self) -> Option<&[u8]> {
        match &self.paint.image {
            vello_cpu::ImageSource::Pixmap(p) => Some(p.data_as_u8_slice()),
            _ => None,
        }
    }
}

/// Decode raster bytes (PNG, JPEG, WebP, ...) into a premultiplied image.
pub fn decode_image(bytes: &[u8]) -> TalkreelResult<PreparedImage> {
    let dyn_img = image::load_from_memory(bytes).context("decode image from memory")?;
    let rgba = dyn_img.to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut rgba8_premul = rgba.into_raw();
    premultiply_rgba8_in_place(&mut rgba8_premul);
    PreparedImage::from_premul_rgba8(&rgba8_premul, width, height)
}

/// Parse and rasterize an SVG document at its intrinsic size.
pub fn decode_svg(bytes: &[u8]) -> TalkreelResult<PreparedImage> {
    let opts = usvg::Options::default();
    let tree = usvg::Tree::from_data(bytes, &opts).context("parse svg tree")?;

    let size = tree.size();
    let to_px = |v: f32| -> TalkreelResult<u32> {
        if !v.is_finite() || v <= 0.0 {
            return Err(TalkreelError::validation("svg has invalid width/height"));
        }
        Ok((v.ceil() as u32).clamp(1, MAX_DIM))
    };
    let width = to_px(size.width())?;
    let height = to_px(size.height())?;

    let mut pixmap = resvg::tiny_skia::Pixmap::new(width, height)
        .ok_or_else(|| anyhow::anyhow!("failed to allocate {width}x{height} svg pixmap"))?;
    let sx = (width as f32) / size.width();
    let sy = (height as f32) / size.height();
    resvg::render(
        &tree,
        resvg::tiny_skia::Transform::from_scale(sx, sy),
        &mut pixmap.as_mut(),
    );
    PreparedImage::from_premul_rgba8(pixmap.data(), width, height)
}

/// Read and decode `path`, choosing the SVG path by extension.
pub fn load_image_file(path: &Path) -> TalkreelResult<PreparedImage> {
    let bytes = std::fs::read(path).with_context(|| format!("read '{}'", path.display()))?;
    let is_svg = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("svg"));
    if is_svg {
        decode_svg(&bytes)
    } else {
        decode_image(&bytes)
    }
}

fn pixmap_from_premul_bytes(
    bytes: &[u8],
    width: u32,
    height: u32,
) -> TalkreelResult<vello_cpu::Pixmap> {
    let w: u16 = width
        .try_into()
        .map_err(|_| TalkreelError::validation("image width exceeds u16"))?;
    let h: u16 = height
        .try_into()
        .map_err(|_| TalkreelError::validation("image height exceeds u16"))?;
    if w == 0 || h == 0 {
        return Err(TalkreelError::validation("image has zero width or height"));
    }
    if bytes.len()
        != (width as usize)
            .saturating_mul(height as usize)
            .saturating_mul(4)
    {
        return Err(TalkreelError::validation("image byte length mismatch"));
    }
    // Pixmap stores PremulRgba8; our bytes are already premultiplied.
    let pixels = bytes
        .chunks_exact(4)
        .map(|px| vello_cpu::peniko::color::PremulRgba8::from_u8_array([px[0], px[1], px[2], px[3]]))
        .collect::<Vec<_>>();
    Ok(vello_cpu::Pixmap::from_parts_with_opacity(pixels, w, h, true))
}

#[cfg(test)]
#[path = "../../tests/unit/assets/decode.rs"]
mod tests;
