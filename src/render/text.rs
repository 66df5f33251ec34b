use std::ops::Range;

use crate::foundation::error::{TalkreelError, TalkreelResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// RGBA8 brush color used by Parley text layout.
pub(crate) struct TextBrushRgba8 {
    pub(crate) r: u8,
    pub(crate) g: u8,
    pub(crate) b: u8,
    pub(crate) a: u8,
}

impl From<[u8; 4]> for TextBrushRgba8 {
    fn from([r, g, b, a]: [u8; 4]) -> Self {
        Self { r, g, b, a }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct PlacedGlyph {
    pub(crate) id: u32,
    pub(crate) x: f32,
    pub(crate) y: f32,
}

/// Shaped glyphs sharing one brush and size.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct TextRun {
    pub(crate) brush: TextBrushRgba8,
    pub(crate) font_size: f32,
    pub(crate) glyphs: Vec<PlacedGlyph>,
}

/// Laid-out, centre-aligned text block with its own origin at the top-left.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct TextBlock {
    pub(crate) runs: Vec<TextRun>,
    pub(crate) width: f32,
    pub(crate) height: f32,
}

/// Stateful helper for building Parley layouts from raw font bytes.
pub(crate) struct TextLayoutEngine {
    font_ctx: parley::FontContext,
    layout_ctx: parley::LayoutContext<TextBrushRgba8>,
    family_name: String,
}

impl TextLayoutEngine {
    /// Register `font_bytes` as the only font family.
    pub(crate) fn new(font_bytes: &[u8]) -> TalkreelResult<Self> {
        let mut font_ctx = parley::FontContext::default();
        let families = font_ctx
            .collection
            .register_fonts(parley::fontique::Blob::from(font_bytes.to_vec()), None);
        let family_id = families.first().map(|(id, _)| *id).ok_or_else(|| {
            TalkreelError::validation("no font families registered from font bytes")
        })?;
        let family_name = font_ctx
            .collection
            .family_name(family_id)
            .ok_or_else(|| TalkreelError::validation("registered font family has no name"))?
            .to_string();
        Ok(Self {
            font_ctx,
            layout_ctx: parley::LayoutContext::new(),
            family_name,
        })
    }

    /// Shape `text`, wrap it at `max_width_px`, centre every line and flatten to glyph runs.
    /// `highlight` recolours one byte range.
    pub(crate) fn layout_centered(
        &mut self,
        text: &str,
        size_px: f32,
        brush: TextBrushRgba8,
        highlight: Option<(Range<usize>, TextBrushRgba8)>,
        max_width_px: f32,
    ) -> TalkreelResult<TextBlock> {
        if !size_px.is_finite() || size_px <= 0.0 {
            return Err(TalkreelError::validation(
                "text size_px must be finite and > 0",
            ));
        }

        let mut builder = self
            .layout_ctx
            .ranged_builder(&mut self.font_ctx, text, 1.0, true);
        builder.push_default(parley::style::StyleProperty::FontStack(
            parley::style::FontStack::Source(std::borrow::Cow::Owned(self.family_name.clone())),
        ));
        builder.push_default(parley::style::StyleProperty::FontSize(size_px));
        builder.push_default(parley::style::StyleProperty::Brush(brush));
        if let Some((range, hl)) = highlight {
            builder.push(parley::style::StyleProperty::Brush(hl), range);
        }

        let mut layout: parley::Layout<TextBrushRgba8> = builder.build(text);
        layout.break_all_lines(Some(max_width_px));
        layout.align(
            Some(max_width_px),
            parley::Alignment::Start,
            parley::AlignmentOptions::default(),
        );

        let mut block = TextBlock {
            width: max_width_px,
            ..TextBlock::default()
        };
        for line in layout.lines() {
            let m = line.metrics();
            block.height += m.ascent + m.descent + m.leading;
            let dx = ((max_width_px - m.advance) * 0.5).max(0.0);
            for item in line.items() {
                let parley::layout::PositionedLayoutItem::GlyphRun(run) = item else {
                    continue;
                };
                block.runs.push(TextRun {
                    brush: run.style().brush,
                    font_size: run.run().font_size(),
                    glyphs: run
                        .glyphs()
                        .map(|g| PlacedGlyph {
                            id: g.id,
                            x: g.x + dx,
                            y: g.y,
                        })
                        .collect(),
                });
            }
        }
        Ok(block)
    }
}

/// Byte range of the `n`th space-separated word of `text`.
pub(crate) fn word_byte_range(text: &str, n: usize) -> Option<Range<usize>> {
    let mut start = 0;
    for (i, w) in text.split(' ').enumerate() {
        if i == n {
            return Some(start..start + w.len());
        }
        start += w.len() + 1;
    }
    None
}

#[cfg(test)]
#[path = "../../tests/unit/render/text.rs"]
mod tests;
