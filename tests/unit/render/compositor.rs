use super::*;
use crate::assets::AssetCache;
use crate::foundation::error::RenderPosition;
use crate::render::text::TextBrushRgba8;
use crate::script::{DialogueLine, VisualAssetSpan};
use crate::timeline::{TimelineOptions, build};
use crate::timing::RawWordAlignment;

const RED: [u8; 4] = [255, 0, 0, 255];
const GREEN: [u8; 4] = [0, 255, 0, 255];
const BLUE: [u8; 4] = [0, 0, 255, 255];

fn solid(rgba: [u8; 4]) -> PreparedImage {
    let px: Vec<u8> = rgba.iter().copied().cycle().take(4 * 4 * 4).collect();
    PreparedImage::from_premul_rgba8(&px, 4, 4).unwrap()
}

fn timing() -> TimingIndex {
    let raw = (0..10)
        .map(|i| {
            let (start, step) = if i < 5 {
                (i * 240, 240)
            } else {
                (1200 + (i - 5) * 280, 280)
            };
            RawWordAlignment::new(format!("w{i}"), start, start + step)
        })
        .collect();
    TimingIndex::build(raw).unwrap()
}

fn dialogue(with_visual: bool) -> Vec<DialogueLine> {
    let mut analyst = DialogueLine {
        character: Character::Analyst,
        text: "w5 w6 w7 w8 w9".to_string(),
        poses: Vec::new(),
        visual_assets: Vec::new(),
    };
    if with_visual {
        analyst.visual_assets.push(VisualAssetSpan {
            asset_id: "1a".to_string(),
            start_word_index: None,
            end_word_index: None,
            fullscreen: false,
        });
    }
    vec![
        DialogueLine {
            character: Character::Skeptic,
            text: "w0 w1 w2 w3 w4".to_string(),
            poses: Vec::new(),
            visual_assets: Vec::new(),
        },
        analyst,
    ]
}

fn full_cache() -> AssetCache {
    AssetCache::from_parts(
        [
            (Character::Skeptic, "skeptic_front".to_string(), MouthState::Open, solid(RED)),
            (Character::Skeptic, "skeptic_front".to_string(), MouthState::Closed, solid(GREEN)),
            (Character::Analyst, "analyst_front".to_string(), MouthState::Open, solid(RED)),
            (Character::Analyst, "analyst_front".to_string(), MouthState::Closed, solid(GREEN)),
        ],
        None,
        None,
    )
}

fn config() -> RenderConfig {
    let mut cfg = RenderConfig::default();
    cfg.canvas = Canvas {
        width: 64,
        height: 64,
    };
    cfg.visuals.side_width_px = 20;
    cfg
}

fn compositor(cache: AssetCache, with_visual: bool) -> FrameCompositor {
    let timing = Arc::new(timing());
    let timeline = Arc::new(
        build(&dialogue(with_visual), &timing, None, &TimelineOptions::default()).unwrap(),
    );
    let lipsync = Arc::new(LipSync::new(&timing, &timeline));
    let visuals = if with_visual {
        vec![("1a".to_string(), solid(BLUE))]
    } else {
        Vec::new()
    };
    let assets = FrameAssets::from_parts(Arc::new(cache), visuals);
    FrameCompositor::new(timeline, timing, lipsync, assets, Arc::new(config()), None).unwrap()
}

#[test]
fn resolve_picks_pose_and_mouth() {
    let c = compositor(full_cache(), false);
    let st = c.resolve(10).unwrap();
    assert_eq!(st.characters.len(), 2);
    assert_eq!(st.characters[0].character, Character::Skeptic);
    assert_eq!(st.characters[0].mouth, MouthState::Open);
    assert_eq!(st.characters[1].mouth, MouthState::Closed);
    assert!(!st.hook);
    assert_eq!(st.caption, None);

    let st = c.resolve(130).unwrap();
    assert_eq!(st.characters[0].mouth, MouthState::Closed);
}

#[test]
fn compose_is_pure_and_order_independent() {
    let c = compositor(full_cache(), true);
    let late = c.compose(2300).unwrap();
    let early = c.compose(10).unwrap();
    assert_eq!(c.compose(10).unwrap(), early);
    assert_eq!(c.compose(2300).unwrap(), late);
    assert_ne!(early, late);
    assert_eq!(early.data.len(), 64 * 64 * 4);
    assert!(early.premultiplied);
}

#[test]
fn layers_land_where_configured() {
    let c = compositor(full_cache(), false);
    let f = c.compose(10).unwrap();
    assert_eq!(f.pixel(0, 0), Some([15, 15, 20, 255]));

    let speaking = f.pixel(17, 45).unwrap();
    assert!(speaking[0] > 200 && speaking[1] < 40, "{speaking:?}");
    let listening = f.pixel(46, 45).unwrap();
    assert!(listening[1] > 200 && listening[0] < 40, "{listening:?}");
}

#[test]
fn missing_mouth_image_names_combination_and_time() {
    let cache = AssetCache::from_parts(
        [
            (Character::Skeptic, "skeptic_front".to_string(), MouthState::Closed, solid(GREEN)),
            (Character::Analyst, "analyst_front".to_string(), MouthState::Open, solid(RED)),
            (Character::Analyst, "analyst_front".to_string(), MouthState::Closed, solid(GREEN)),
        ],
        None,
        None,
    );
    let c = compositor(cache, false);
    assert!(c.compose(130).is_ok());
    let err = c.compose(10).unwrap_err();
    match err {
        TalkreelError::AssetResolution {
            asset: AssetRef::Pose { character, pose_id, mouth },
            position,
            ..
        } => {
            assert_eq!(character, Character::Skeptic);
            assert_eq!(pose_id, "skeptic_front");
            assert_eq!(mouth, MouthState::Open);
            assert_eq!(
                position,
                RenderPosition {
                    t_ms: Some(10),
                    frame: None
                }
            );
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn side_visual_slides_in_from_its_speaker_side() {
    let c = compositor(full_cache(), true);
    assert!(c.resolve(1899).unwrap().visuals.is_empty());

    let at = |t| c.resolve(t).unwrap().visuals[0].x;
    let start = at(1900);
    let mid = at(2300);
    assert_eq!(start, 64.0);
    assert!(mid < start && mid > 38.0, "{mid}");
    assert_eq!(c.resolve(2300).unwrap().visuals[0].width, 20.0);
    assert!(!c.resolve(2300).unwrap().visuals[0].fullscreen);
}

#[test]
fn fingerprint_ignores_time_but_not_content() {
    let c = compositor(full_cache(), false);
    let a = c.resolve(130).unwrap();
    let b = c.resolve(200).unwrap();
    assert_ne!(a.t_ms, b.t_ms);
    assert_eq!(a.fingerprint(), b.fingerprint());
    assert_ne!(a.fingerprint(), c.resolve(10).unwrap().fingerprint());
}

#[test]
fn nothing_is_drawn_past_the_end() {
    let c = compositor(full_cache(), false);
    let st = c.resolve(2600).unwrap();
    assert!(st.characters.is_empty());
    assert!(st.visuals.is_empty());
}

#[test]
fn ease_out_cubic_is_clamped() {
    assert_eq!(ease_out_cubic(0.0), 0.0);
    assert_eq!(ease_out_cubic(1.0), 1.0);
    assert_eq!(ease_out_cubic(2.0), 1.0);
    assert!((ease_out_cubic(0.5) - 0.875).abs() < 1e-12);
}

fn caption_font() -> Option<Vec<u8>> {
    let mut candidates: Vec<std::path::PathBuf> = std::env::var_os("TALKREEL_TEST_FONT")
        .map(Into::into)
        .into_iter()
        .collect();
    candidates.extend(
        [
            "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
            "/usr/share/fonts/truetype/dejavu/DejaVuSerif.ttf",
            "/usr/share/fonts/TTF/DejaVuSans.ttf",
            "/usr/share/fonts/dejavu/DejaVuSans.ttf",
            "/System/Library/Fonts/Supplemental/Arial.ttf",
            "C:\\Windows\\Fonts\\arial.ttf",
        ]
        .map(std::path::PathBuf::from),
    );
    candidates.iter().find_map(|p| std::fs::read(p).ok())
}

#[test]
fn single_word_captions_highlight_the_spoken_word() {
    let Some(font) = caption_font() else {
        eprintln!("skipping: no caption font found (set TALKREEL_TEST_FONT)");
        return;
    };
    let cache = AssetCache::from_parts(
        [
            (Character::Skeptic, "skeptic_front".to_string(), MouthState::Open, solid(RED)),
            (Character::Skeptic, "skeptic_front".to_string(), MouthState::Closed, solid(GREEN)),
            (Character::Analyst, "analyst_front".to_string(), MouthState::Open, solid(RED)),
            (Character::Analyst, "analyst_front".to_string(), MouthState::Closed, solid(GREEN)),
        ],
        None,
        Some(font),
    );
    let timing = Arc::new(timing());
    let timeline =
        Arc::new(build(&dialogue(false), &timing, None, &TimelineOptions::default()).unwrap());
    let lipsync = Arc::new(LipSync::new(&timing, &timeline));
    let assets = FrameAssets::from_parts(Arc::new(cache), Vec::new());
    let mut cfg = config();
    cfg.captions.font_size_px = 20.0;
    cfg.captions.bottom_margin_px = 4;
    cfg.captions.shadow_steps = 0;
    let c = FrameCompositor::new(
        timeline,
        timing,
        lipsync,
        assets,
        Arc::new(cfg.clone()),
        Some("Hook"),
    )
    .unwrap();

    let st = c.resolve(100).unwrap();
    assert!(st.hook);
    assert_eq!(st.caption, Some((0, Some(0))));
    assert_eq!(c.resolve(300).unwrap().caption, Some((1, Some(0))));
    assert_eq!(c.resolve(1300).unwrap().caption, Some((5, Some(0))));

    let text = c.text.as_ref().unwrap();
    let first = &text.captions[0];
    assert_eq!(first.highlighted.len(), 1);
    let highlight = TextBrushRgba8::from(cfg.captions.highlight_rgba);
    assert!(!first.highlighted[0].runs.is_empty());
    assert!(first.highlighted[0].runs.iter().all(|r| r.brush == highlight));
    assert!(first.plain.runs.iter().all(|r| r.brush != highlight));

    let plain_frame = c.paint(&FrameState {
        caption: Some((0, None)),
        ..st.clone()
    });
    assert_ne!(c.compose(100).unwrap(), plain_frame.unwrap());
}
