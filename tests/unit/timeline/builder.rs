use super::*;
use crate::script::{PoseSpan, VisualAssetSpan};
use crate::timing::RawWordAlignment;

fn even_words(n: usize, start: u64, end: u64) -> Vec<RawWordAlignment> {
    let step = (end - start) / n as u64;
    (0..n)
        .map(|i| {
            let s = start + i as u64 * step;
            RawWordAlignment::new(format!("w{i}"), s, s + step)
        })
        .collect()
}

fn two_line_timing() -> TimingIndex {
    let mut raw = even_words(5, 0, 1200);
    raw.extend(even_words(5, 1200, 2600));
    TimingIndex::build(raw).unwrap()
}

fn line(character: Character, text: &str, poses: &[(&str, usize, usize)]) -> DialogueLine {
    DialogueLine {
        character,
        text: text.to_string(),
        poses: poses
            .iter()
            .map(|&(p, s, e)| PoseSpan {
                pose_id: p.to_string(),
                start_word_index: s,
                end_word_index: e,
            })
            .collect(),
        visual_assets: Vec::new(),
    }
}

fn asset(id: &str, range: Option<(usize, usize)>) -> VisualAssetSpan {
    VisualAssetSpan {
        asset_id: id.to_string(),
        start_word_index: range.map(|r| r.0),
        end_word_index: range.map(|r| r.1),
        fullscreen: false,
    }
}

fn poses_of(tl: &VisualTimeline, c: Character) -> Vec<(u64, u64, String, PoseSource)> {
    tl.pose_changes(c)
        .map(|e| match &e.payload {
            EventPayload::PoseChange {
                pose_id, source, ..
            } => (e.start_ms, e.end_ms, pose_id.clone(), *source),
            _ => unreachable!(),
        })
        .collect()
}

#[test]
fn two_line_scenario() {
    let timing = two_line_timing();
    let mut analyst = line(
        Character::Analyst,
        "one two three four five",
        &[("analyst_close", 0, 4)],
    );
    analyst.visual_assets.push(asset("1a", None));
    let dialogue = vec![
        line(
            Character::Skeptic,
            "one two three four five",
            &[("skeptic_side", 0, 4)],
        ),
        analyst,
    ];
    let tl = build(&dialogue, &timing, None, &TimelineOptions::default()).unwrap();
    assert_eq!(tl.duration_ms(), 2600);

    let sk = poses_of(&tl, Character::Skeptic);
    assert_eq!(
        sk,
        vec![
            (0, 1200, "skeptic_side".to_string(), PoseSource::Declared),
            (1200, 2600, "skeptic_side".to_string(), PoseSource::Carried),
        ]
    );
    let an = poses_of(&tl, Character::Analyst);
    assert_eq!(
        an,
        vec![
            (0, 1200, "analyst_front".to_string(), PoseSource::Default),
            (1200, 2600, "analyst_close".to_string(), PoseSource::Declared),
        ]
    );

    let anchors: Vec<_> = tl
        .events()
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::AssetAppearance {
                asset_id,
                visible_until_ms,
                character,
                ..
            } => Some((e.start_ms, e.end_ms, asset_id.as_str(), *visible_until_ms, *character)),
            _ => None,
        })
        .collect();
    assert_eq!(anchors, vec![(1900, 1900, "1a", 2600, Character::Analyst)]);

    assert!(tl.assets_at(1899).is_empty());
    assert_eq!(tl.assets_at(1900)[0].asset_id, "1a");
    assert!(tl.assets_at(2600).is_empty());
    assert!(tl.events().windows(2).all(|p| p[0].start_ms <= p[1].start_ms));
    assert!(tl.warnings().is_empty());
}

#[test]
fn pose_at_follows_partition() {
    let timing = two_line_timing();
    let dialogue = vec![
        line(
            Character::Skeptic,
            "a b c d e",
            &[("skeptic_front", 0, 1), ("skeptic_close", 3, 4)],
        ),
        line(Character::Analyst, "a b c d e", &[]),
    ];
    let tl = build(&dialogue, &timing, None, &TimelineOptions::default()).unwrap();
    assert_eq!(tl.pose_at(Character::Skeptic, 0), Some("skeptic_front"));
    // word 2 is uncovered and carries the last declared pose
    assert_eq!(tl.pose_at(Character::Skeptic, 500), Some("skeptic_front"));
    assert_eq!(tl.pose_at(Character::Skeptic, 720), Some("skeptic_close"));
    assert_eq!(tl.pose_at(Character::Skeptic, 2599), Some("skeptic_close"));
    assert_eq!(tl.pose_at(Character::Skeptic, 2600), None);
    assert_eq!(tl.pose_at(Character::Analyst, 2000), Some("analyst_front"));
    assert_eq!(poses_of(&tl, Character::Analyst).len(), 1);
}

#[test]
fn overlapping_spans_are_clipped() {
    let timing = two_line_timing();
    let dialogue = vec![line(
        Character::Skeptic,
        "a b c d e",
        &[("skeptic_front", 0, 3), ("skeptic_close", 2, 4)],
    )];
    let timing_short = TimingIndex::build(even_words(5, 0, 1200)).unwrap();
    let tl = build(&dialogue, &timing_short, None, &TimelineOptions::default()).unwrap();
    let sk = poses_of(&tl, Character::Skeptic);
    assert_eq!(sk[0], (0, 960, "skeptic_front".to_string(), PoseSource::Declared));
    assert_eq!(sk[1], (960, 1200, "skeptic_close".to_string(), PoseSource::Declared));

    // Extra trailing words are tolerated with a warning.
    let tl = build(&dialogue, &timing, None, &TimelineOptions::default()).unwrap();
    assert_eq!(tl.warnings().len(), 1);
    assert_eq!(tl.duration_ms(), 2600);
}

#[test]
fn catalog_default_pose_and_tail() {
    let timing = TimingIndex::build(even_words(5, 0, 1200)).unwrap();
    let mut opts = TimelineOptions {
        tail_ms: 500,
        ..TimelineOptions::default()
    };
    opts.default_poses
        .insert(Character::Analyst, "analyst_pov".to_string());
    let dialogue = vec![line(Character::Skeptic, "a b c d e", &[])];
    let tl = build(&dialogue, &timing, None, &opts).unwrap();
    assert_eq!(tl.duration_ms(), 1700);
    assert_eq!(
        poses_of(&tl, Character::Analyst),
        vec![(0, 1700, "analyst_pov".to_string(), PoseSource::Default)]
    );
    assert_eq!(
        poses_of(&tl, Character::Skeptic),
        vec![(0, 1700, "skeptic_front".to_string(), PoseSource::Default)]
    );
}

#[test]
fn opening_visual_hides_first_speaker_until_midpoint() {
    let timing = two_line_timing();
    let mut first = line(Character::Skeptic, "a b c d e", &[]);
    first.visual_assets.push(asset("open", None));
    first.visual_assets.push(asset("side", Some((1, 9))));
    let dialogue = vec![first, line(Character::Analyst, "a b c d e", &[])];
    let tl = build(&dialogue, &timing, Some("open"), &TimelineOptions::default()).unwrap();

    assert!(!tl.character_visible(Character::Skeptic, 599));
    assert!(tl.character_visible(Character::Skeptic, 600));
    assert!(tl.character_visible(Character::Analyst, 0));

    let at_0 = tl.assets_at(0);
    assert_eq!(at_0.len(), 1);
    assert_eq!(at_0[0].asset_id, "open");
    assert!(at_0[0].fullscreen);
    assert!(tl.assets_at(600).iter().all(|a| a.asset_id != "open"));

    // repeated opening id is skipped; the side span is clamped to word 4 (240..1200 -> 720)
    assert_eq!(tl.referenced_assets(), vec!["open", "side"]);
    let side = tl.assets_at(720);
    assert_eq!(side.len(), 1);
    assert_eq!(side[0].since_ms, 720);
    assert_eq!(side[0].character, Some(Character::Skeptic));
    assert_eq!(tl.warnings().len(), 1);
}

#[test]
fn next_anchor_cuts_visibility() {
    let timing = two_line_timing();
    let mut first = line(Character::Skeptic, "a b c d e", &[]);
    first.visual_assets.push(asset("x", None));
    first.visual_assets.push(asset("y", Some((3, 4))));
    let tl = build(&[first], &timing, None, &TimelineOptions::default()).unwrap();
    // x anchored at 600, y at (720 + 1200) / 2 = 960
    let ids: Vec<_> = tl.assets_at(959).iter().map(|a| a.asset_id).collect();
    assert_eq!(ids, vec!["x"]);
    let ids: Vec<_> = tl.assets_at(960).iter().map(|a| a.asset_id).collect();
    assert_eq!(ids, vec!["y"]);
}

#[test]
fn shadowed_appearance_is_skipped_with_warning() {
    let timing = two_line_timing();
    let mut first = line(Character::Skeptic, "a b c d e", &[]);
    first.visual_assets.push(asset("x", None));
    first.visual_assets.push(asset("y", None));
    let second = line(Character::Analyst, "f g h i j", &[]);
    let tl = build(&[first, second], &timing, None, &TimelineOptions::default()).unwrap();

    let appearances = tl
        .events()
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::AssetAppearance { .. }))
        .count();
    assert_eq!(appearances, 1);
    let ids: Vec<_> = tl.assets_at(600).iter().map(|a| a.asset_id).collect();
    assert_eq!(ids, vec!["y"]);
    assert_eq!(tl.referenced_assets(), vec!["y"]);
    assert_eq!(tl.warnings().len(), 1);
    assert!(tl.warnings()[0].contains("'x'"), "{:?}", tl.warnings());
}

#[test]
fn captions_are_generated_per_line() {
    let timing = two_line_timing();
    let opts = TimelineOptions {
        caption_window: CaptionWindow::chunked(100, 100_000),
        ..TimelineOptions::default()
    };
    let dialogue = vec![
        line(Character::Skeptic, "a b c d e", &[]),
        line(Character::Analyst, "a b c d e", &[]),
    ];
    let tl = build(&dialogue, &timing, None, &opts).unwrap();
    let c = tl.caption_at(100).unwrap();
    assert_eq!(c.words, 0..5);
    assert_eq!(tl.caption_at(1200).unwrap().words, 5..10);
    assert!(tl.caption_at(2600).is_none());
}

#[test]
fn errors() {
    let timing = two_line_timing();
    let opts = TimelineOptions::default();
    assert!(matches!(
        build(&[], &timing, None, &opts),
        Err(TalkreelError::EmptyScript)
    ));
    assert!(matches!(
        build(&[line(Character::Skeptic, "[sighs]", &[])], &timing, None, &opts),
        Err(TalkreelError::Validation(_))
    ));
    assert!(matches!(
        build(
            &[line(Character::Skeptic, "a b", &[("skeptic_front", 1, 0)])],
            &timing,
            None,
            &opts
        ),
        Err(TalkreelError::Validation(_))
    ));
    let long = "w ".repeat(11);
    assert!(matches!(
        build(&[line(Character::Skeptic, &long, &[])], &timing, None, &opts),
        Err(TalkreelError::Timing { .. })
    ));
}
