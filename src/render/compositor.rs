use std::ops::Range;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::assets::{FrameAssets, PoseSlot, PreparedImage};
use crate::config::RenderConfig;
use crate::foundation::core::{Affine, Canvas, Rgba8Premul};
use crate::foundation::error::{AssetRef, TalkreelError, TalkreelResult};
use crate::foundation::math::{FrameFingerprint, StableHasher};
use crate::lipsync::{LipSync, MouthState};
use crate::render::frame::FrameRGBA;
use crate::render::text::{TextBlock, TextLayoutEngine, TextRun, word_byte_range};
use crate::script::Character;
use crate::timeline::{EventPayload, VisualTimeline};
use crate::timing::TimingIndex;

/// A character drawn in its slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CharacterDraw {
    /// Who.
    pub character: Character,
    /// Resolved pose.
    pub slot: PoseSlot,
    /// Mouth image variant.
    pub mouth: MouthState,
}

/// An overlay placed on the canvas, in pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct VisualDraw {
    /// Visual asset id.
    pub asset_id: String,
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Drawn width; height follows the image aspect ratio.
    pub width: f64,
    /// Full-screen presentation.
    pub fullscreen: bool,
}

/// Everything on screen at one instant, before rasterization.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameState {
    /// Presentation time the state was resolved for.
    pub t_ms: u64,
    /// Characters in draw order.
    pub characters: SmallVec<[CharacterDraw; 2]>,
    /// Overlays in draw order.
    pub visuals: SmallVec<[VisualDraw; 2]>,
    /// Whether the hook text is drawn.
    pub hook: bool,
    /// Caption chunk index and highlighted word within it.
    pub caption: Option<(usize, Option<usize>)>,
}

impl FrameState {
    /// Hash of everything that affects pixels. `t_ms` is excluded, so held frames match.
    pub fn fingerprint(&self) -> FrameFingerprint {
        let mut h = StableHasher::new();
        h.write_u32(self.characters.len() as u32);
        for c in &self.characters {
            h.write_u8(c.character.index() as u8);
            h.write_u32(u32::from(c.slot.0));
            h.write_u8(c.mouth.slot() as u8);
        }
        h.write_u32(self.visuals.len() as u32);
        for v in &self.visuals {
            h.write_str(&v.asset_id);
            h.write_f64(v.x);
            h.write_f64(v.y);
            h.write_f64(v.width);
            h.write_bool(v.fullscreen);
        }
        h.write_bool(self.hook);
        match self.caption {
            None => h.write_u8(0),
            Some((chunk, word)) => {
                h.write_u8(1);
                h.write_u64(chunk as u64);
                h.write_u64(word.map_or(u64::MAX, |w| w as u64));
            }
        }
        h.finish()
    }
}

struct CaptionLayouts {
    start_ms: u64,
    words: Range<usize>,
    plain: TextBlock,
    highlighted: Vec<TextBlock>,
}

struct TextAssets {
    font: vello_cpu::peniko::FontData,
    hook: Option<TextBlock>,
    captions: Vec<CaptionLayouts>,
}

/// Reusable raster surface; one per worker thread.
pub struct Painter {
    ctx: vello_cpu::RenderContext,
    pixmap: vello_cpu::Pixmap,
}

impl Painter {
    fn new((w, h): (u16, u16)) -> Self {
        Self {
            ctx: vello_cpu::RenderContext::new(w, h),
            pixmap: vello_cpu::Pixmap::new(w, h),
        }
    }
}

fn canvas_u16(canvas: Canvas) -> TalkreelResult<(u16, u16)> {
    let w = u16::try_from(canvas.width)
        .map_err(|_| TalkreelError::validation("canvas width exceeds u16"))?;
    let h = u16::try_from(canvas.height)
        .map_err(|_| TalkreelError::validation("canvas height exceeds u16"))?;
    Ok((w, h))
}

/// Composes frames of one job.
///
/// Built once per job; every method takes `&self` and depends only on its arguments, so frames
/// can be composed in any order and on any thread.
pub struct FrameCompositor {
    timeline: Arc<VisualTimeline>,
    timing: Arc<TimingIndex>,
    lipsync: Arc<LipSync>,
    assets: FrameAssets,
    config: Arc<RenderConfig>,
    size: (u16, u16),
    text: Option<TextAssets>,
}

impl FrameCompositor {
    /// Lay out hook and caption text up front. Text layers are skipped without a caption font.
    pub fn new(
        timeline: Arc<VisualTimeline>,
        timing: Arc<TimingIndex>,
        lipsync: Arc<LipSync>,
        assets: FrameAssets,
        config: Arc<RenderConfig>,
        hook_text: Option<&str>,
    ) -> TalkreelResult<Self> {
        let size = canvas_u16(config.canvas)?;
        let text = match assets.cache().caption_font() {
            Some(font_bytes) => Some(layout_text(font_bytes, &timeline, &config, hook_text)?),
            None => {
                tracing::warn!("no caption font configured; captions and hook text are skipped");
                None
            }
        };
        Ok(Self {
            timeline,
            timing,
            lipsync,
            assets,
            config,
            size,
            text,
        })
    }

    /// Render configuration.
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Timeline being rendered.
    pub fn timeline(&self) -> &VisualTimeline {
        &self.timeline
    }

    /// Decide what is on screen at `t_ms`.
    pub fn resolve(&self, t_ms: u64) -> TalkreelResult<FrameState> {
        let poses = self.assets.cache().poses();
        let mut characters: SmallVec<[CharacterDraw; 2]> = SmallVec::new();
        for character in Character::ALL {
            if !self.timeline.character_visible(character, t_ms) {
                continue;
            }
            let Some(pose_id) = self.timeline.pose_at(character, t_ms) else {
                continue;
            };
            let mouth = self.lipsync.state_at(character, t_ms);
            let slot = poses
                .resolve_slot(character, pose_id, mouth)
                .map_err(|e| e.at(None, Some(t_ms)))?;
            characters.push(CharacterDraw {
                character,
                slot,
                mouth,
            });
        }

        let mut visuals: SmallVec<[VisualDraw; 2]> = SmallVec::new();
        for active in self.timeline.assets_at(t_ms) {
            let img = self
                .assets
                .visual(active.asset_id)
                .map_err(|e| e.at(None, Some(t_ms)))?;
            visuals.push(self.place_visual(
                active.asset_id,
                img,
                active.fullscreen,
                active.character,
                active.since_ms,
                t_ms,
            ));
        }
        let fullscreen = visuals.iter().any(|v| v.fullscreen);

        let (hook, caption) = match &self.text {
            Some(text) if t_ms < self.timeline.duration_ms() => {
                let caption = if fullscreen {
                    None
                } else {
                    self.caption_key(text, t_ms)
                };
                (text.hook.is_some(), caption)
            }
            _ => (false, None),
        };

        Ok(FrameState {
            t_ms,
            characters,
            visuals,
            hook,
            caption,
        })
    }

    fn caption_key(&self, text: &TextAssets, t_ms: u64) -> Option<(usize, Option<usize>)> {
        let span = self.timeline.caption_at(t_ms)?;
        let n = text
            .captions
            .partition_point(|c| c.start_ms <= span.start_ms);
        let chunk = n.checked_sub(1)?;
        let layouts = &text.captions[chunk];
        let word = self
            .timing
            .word_at(t_ms)
            .map(|w| w.index)
            .filter(|i| layouts.words.contains(i))
            .map(|i| i - layouts.words.start)
            .filter(|&i| i < layouts.highlighted.len());
        Some((chunk, word))
    }

    fn place_visual(
        &self,
        asset_id: &str,
        img: &PreparedImage,
        fullscreen: bool,
        character: Option<Character>,
        since_ms: u64,
        t_ms: u64,
    ) -> VisualDraw {
        let layout = &self.config.visuals;
        let cw = f64::from(self.config.canvas.width);
        let ch = f64::from(self.config.canvas.height);
        let aspect = f64::from(img.height) / f64::from(img.width.max(1));

        let t_s = t_ms as f64 / 1000.0;
        let bob = (t_s * layout.bob_frequency).sin() * layout.bob_amplitude_px;

        let (x, width) = match (fullscreen, character) {
            (false, Some(c)) => {
                let width = f64::from(layout.side_width_px);
                let center = match c {
                    Character::Skeptic => layout.skeptic_center_ratio,
                    Character::Analyst => layout.analyst_center_ratio,
                };
                let target = cw * center - width / 2.0;
                let from = match c {
                    Character::Skeptic => -width,
                    Character::Analyst => cw,
                };
                let elapsed = t_ms.saturating_sub(since_ms);
                let x = if layout.slide_ms > 0 && elapsed < layout.slide_ms {
                    from + (target - from) * ease_out_cubic(elapsed as f64 / layout.slide_ms as f64)
                } else {
                    target
                };
                (x, width)
            }
            _ => {
                let width = cw * layout.fullscreen_width_ratio;
                ((cw - width) / 2.0, width)
            }
        };
        let height = width * aspect;
        VisualDraw {
            asset_id: asset_id.to_string(),
            x: x.round(),
            y: ((ch - height) / 2.0 + bob).round(),
            width,
            fullscreen,
        }
    }

    /// Fresh raster surface sized for this compositor.
    pub fn painter(&self) -> Painter {
        Painter::new(self.size)
    }

    /// Rasterize `state` on a fresh surface.
    pub fn paint(&self, state: &FrameState) -> TalkreelResult<FrameRGBA> {
        let mut painter = self.painter();
        self.paint_with(&mut painter, state)
    }

    /// Rasterize `state` reusing `painter`'s buffers.
    pub fn paint_with(&self, painter: &mut Painter, state: &FrameState) -> TalkreelResult<FrameRGBA> {
        let canvas = self.config.canvas;
        let cw = f64::from(canvas.width);
        let ch = f64::from(canvas.height);
        let bg = Rgba8Premul::from_straight_array(self.config.background_rgba);

        clear_pixmap(&mut painter.pixmap, bg.to_array());
        let ctx = &mut painter.ctx;
        ctx.reset();
        ctx.set_transform(vello_cpu::kurbo::Affine::IDENTITY);
        let [r, g, b, a] = self.config.background_rgba;
        ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(r, g, b, a));
        ctx.fill_rect(&vello_cpu::kurbo::Rect::new(0.0, 0.0, cw, ch));

        if let Some(bg_img) = self.assets.cache().background() {
            let (iw, ih) = (f64::from(bg_img.width), f64::from(bg_img.height));
            let s = (cw / iw).max(ch / ih);
            let transform = Affine::translate(((cw - iw * s) / 2.0, (ch - ih * s) / 2.0))
                * Affine::scale(s);
            draw_image(ctx, bg_img, transform);
        }

        let poses = self.assets.cache().poses();
        for draw in &state.characters {
            let img = poses
                .get(draw.character, draw.slot, draw.mouth)
                .ok_or_else(|| {
                    TalkreelError::asset(
                        AssetRef::Pose {
                            character: draw.character,
                            pose_id: poses
                                .pose_id(draw.character, draw.slot)
                                .unwrap_or_default()
                                .to_string(),
                            mouth: draw.mouth,
                        },
                        "no image loaded for this mouth state",
                    )
                    .at(None, Some(state.t_ms))
                })?;
            let slot = self.config.slots.get(draw.character);
            let (sx, sy, sw, sh) = (slot.x * cw, slot.y * ch, slot.w * cw, slot.h * ch);
            let (iw, ih) = (f64::from(img.width), f64::from(img.height));
            let s = (sw / iw).min(sh / ih);
            let transform =
                Affine::translate((sx + (sw - iw * s) / 2.0, sy + sh - ih * s)) * Affine::scale(s);
            draw_image(ctx, img, transform);
        }

        for v in &state.visuals {
            let img = self
                .assets
                .visual(&v.asset_id)
                .map_err(|e| e.at(None, Some(state.t_ms)))?;
            let s = v.width / f64::from(img.width.max(1));
            draw_image(ctx, img, Affine::translate((v.x, v.y)) * Affine::scale(s));
        }

        if let Some(text) = &self.text {
            if state.hook
                && let Some(block) = &text.hook
            {
                let style = &self.config.hook;
                let x = (cw - f64::from(block.width)) / 2.0;
                let y = f64::from(style.top_px);
                draw_text_block(ctx, &text.font, block, x, y, Some((style.shadow_rgba, 1, 3.0)));
            }
            if let Some((chunk, word)) = state.caption {
                let layouts = text.captions.get(chunk).ok_or_else(|| {
                    TalkreelError::validation(format!("caption chunk {chunk} out of range"))
                })?;
                let block = word
                    .and_then(|w| layouts.highlighted.get(w))
                    .unwrap_or(&layouts.plain);
                let style = &self.config.captions;
                let x = (cw - f64::from(block.width)) / 2.0;
                let y = ch - f64::from(style.bottom_margin_px) - f64::from(block.height);
                draw_text_block(
                    ctx,
                    &text.font,
                    block,
                    x,
                    y,
                    Some((
                        style.shadow_rgba,
                        style.shadow_steps,
                        style.shadow_step_px,
                    )),
                );
            }
        }

        ctx.flush();
        ctx.render_to_pixmap(&mut painter.pixmap);
        Ok(FrameRGBA {
            width: canvas.width,
            height: canvas.height,
            data: painter.pixmap.data_as_u8_slice().to_vec(),
            premultiplied: true,
        })
    }

    /// `resolve` followed by `paint`.
    pub fn compose(&self, t_ms: u64) -> TalkreelResult<FrameRGBA> {
        let state = self.resolve(t_ms)?;
        self.paint(&state)
    }
}

fn ease_out_cubic(p: f64) -> f64 {
    let p = p.clamp(0.0, 1.0);
    1.0 - (1.0 - p).powi(3)
}

fn layout_text(
    font_bytes: &Arc<Vec<u8>>,
    timeline: &VisualTimeline,
    config: &RenderConfig,
    hook_text: Option<&str>,
) -> TalkreelResult<TextAssets> {
    let mut engine = TextLayoutEngine::new(font_bytes)?;
    let cw = config.canvas.width as f32;

    let hook = match hook_text.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => {
            let style = &config.hook;
            Some(engine.layout_centered(
                s,
                style.font_size_px,
                style.text_rgba.into(),
                None,
                cw * style.max_width_ratio as f32,
            )?)
        }
        None => None,
    };

    let style = &config.captions;
    let size = style.font_size_px;
    let max_w = cw * style.max_width_ratio as f32;
    let mut captions = Vec::new();
    for ev in timeline.events() {
        let EventPayload::CaptionSpan(span) = &ev.payload else {
            continue;
        };
        let plain = engine.layout_centered(&span.text, size, style.text_rgba.into(), None, max_w)?;
        let mut highlighted = Vec::new();
        for w in 0..span.words.len() {
            let Some(range) = word_byte_range(&span.text, w) else {
                break;
            };
            highlighted.push(engine.layout_centered(
                &span.text,
                size,
                style.text_rgba.into(),
                Some((range, style.highlight_rgba.into())),
                max_w,
            )?);
        }
        captions.push(CaptionLayouts {
            start_ms: span.start_ms,
            words: span.words.clone(),
            plain,
            highlighted,
        });
    }
    tracing::debug!(captions = captions.len(), hook = hook.is_some(), "laid out text");

    Ok(TextAssets {
        font: vello_cpu::peniko::FontData::new(
            vello_cpu::peniko::Blob::from(font_bytes.as_ref().clone()),
            0,
        ),
        hook,
        captions,
    })
}

fn clear_pixmap(pixmap: &mut vello_cpu::Pixmap, rgba: [u8; 4]) {
    let data = pixmap.data_as_u8_slice_mut();
    for px in data.chunks_exact_mut(4) {
        px.copy_from_slice(&rgba);
    }
}

fn affine_to_cpu(a: Affine) -> vello_cpu::kurbo::Affine {
    vello_cpu::kurbo::Affine::new(a.as_coeffs())
}

fn draw_image(ctx: &mut vello_cpu::RenderContext, img: &PreparedImage, transform: Affine) {
    ctx.set_transform(affine_to_cpu(transform));
    ctx.set_paint(img.paint.clone());
    ctx.fill_rect(&vello_cpu::kurbo::Rect::new(
        0.0,
        0.0,
        f64::from(img.width),
        f64::from(img.height),
    ));
}

fn fill_runs(
    ctx: &mut vello_cpu::RenderContext,
    font: &vello_cpu::peniko::FontData,
    runs: &[TextRun],
    color: Option<[u8; 4]>,
) {
    for run in runs {
        let [r, g, b, a] = color.unwrap_or([run.brush.r, run.brush.g, run.brush.b, run.brush.a]);
        ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(r, g, b, a));
        let glyphs = run.glyphs.iter().map(|g| vello_cpu::Glyph {
            id: g.id,
            x: g.x,
            y: g.y,
        });
        ctx.glyph_run(font)
            .font_size(run.font_size)
            .fill_glyphs(glyphs);
    }
}

/// Draw a text block at `(x, y)`, preceded by a stepped diagonal shadow.
fn draw_text_block(
    ctx: &mut vello_cpu::RenderContext,
    font: &vello_cpu::peniko::FontData,
    block: &TextBlock,
    x: f64,
    y: f64,
    shadow: Option<([u8; 4], u32, f64)>,
) {
    if let Some((color, steps, step_px)) = shadow {
        for i in (1..=steps).rev() {
            let d = f64::from(i) * step_px;
            ctx.set_transform(affine_to_cpu(Affine::translate((x + d, y + d))));
            fill_runs(ctx, font, &block.runs, Some(color));
        }
    }
    ctx.set_transform(affine_to_cpu(Affine::translate((x, y))));
    fill_runs(ctx, font, &block.runs, None);
}

#[cfg(test)]
#[path = "../../tests/unit/render/compositor.rs"]
mod tests;
