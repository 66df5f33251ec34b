use std::path::PathBuf;

use super::*;
use crate::assets::PreparedImage;
use crate::config::RenderConfig;
use crate::encode::InMemorySink;
use crate::foundation::core::{Canvas, Fps};
use crate::foundation::error::AssetRef;
use crate::job::spec::ScriptSource;
use crate::script::{Character, Script};

fn temp_dir(tag: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let dir = std::env::temp_dir().join(format!(
        "talkreel_worker_{tag}_{}_{nanos}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn solid(rgba: [u8; 4]) -> PreparedImage {
    let px: Vec<u8> = rgba.iter().copied().cycle().take(2 * 2 * 4).collect();
    PreparedImage::from_premul_rgba8(&px, 2, 2).unwrap()
}

fn cache(with_open: bool) -> Arc<AssetCache> {
    let mut poses = vec![
        (Character::Skeptic, "skeptic_front".to_string(), MouthState::Closed, solid([0, 255, 0, 255])),
        (Character::Analyst, "analyst_front".to_string(), MouthState::Open, solid([255, 0, 0, 255])),
        (Character::Analyst, "analyst_front".to_string(), MouthState::Closed, solid([0, 255, 0, 255])),
    ];
    if with_open {
        poses.push((
            Character::Skeptic,
            "skeptic_front".to_string(),
            MouthState::Open,
            solid([255, 0, 0, 255]),
        ));
    }
    Arc::new(AssetCache::from_parts(poses, None, None))
}

fn spec(tag: &str, parallel: bool) -> JobSpec {
    let dir = temp_dir(tag);
    let timing = dir.join("timing.json");
    std::fs::write(
        &timing,
        r#"{"words": [
            {"text": "so", "start_ms": 0, "end_ms": 150},
            {"text": "really", "start_ms": 150, "end_ms": 300},
            {"text": "yes", "start_ms": 300, "end_ms": 450},
            {"text": "indeed", "start_ms": 450, "end_ms": 600}
        ]}"#,
    )
    .unwrap();
    let script = Script::from_json_str(
        r#"{"dialogue": [
            {"character": "skeptic", "text": "so really"},
            {"character": "analyst", "text": "yes indeed"}
        ]}"#,
    )
    .unwrap();
    let mut config = RenderConfig::default();
    config.canvas = Canvas {
        width: 32,
        height: 32,
    };
    config.fps = Fps::new(10, 1).unwrap();
    config.parallel = parallel;
    config.threads = Some(2);
    config.chunk_size = 4;
    JobSpec {
        script: ScriptSource::Inline(script),
        timing_path: timing,
        audio_path: None,
        output_path: dir.join("out.mp4"),
        visual_assets: Default::default(),
        opening_visual: None,
        hook_text: None,
        config,
    }
}

#[test]
fn prepare_counts_frames() {
    let job = prepare(&spec("count", false), cache(true)).unwrap();
    assert_eq!(job.total_frames(), 6);
    assert_eq!(job.timeline().duration_ms(), 600);
    assert!(job.warnings().is_empty());
}

#[test]
fn preflight_rejects_missing_mouth_image() {
    let err = prepare(&spec("missing", false), cache(false))
        .err()
        .expect("pre-flight must fail");
    assert_eq!(err.kind(), "AssetResolutionError");
    match err {
        TalkreelError::AssetResolution {
            asset: AssetRef::Pose { character, mouth, .. },
            ..
        } => {
            assert_eq!(character, Character::Skeptic);
            assert_eq!(mouth, MouthState::Open);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn silent_character_needs_only_a_closed_mouth() {
    let mut silent = spec("silent", false);
    silent.script = ScriptSource::Inline(
        Script::from_json_str(
            r#"{"dialogue": [
                {"character": "analyst", "text": "so really"},
                {"character": "analyst", "text": "yes indeed"}
            ]}"#,
        )
        .unwrap(),
    );
    let job = prepare(&silent, cache(false)).unwrap();
    assert_eq!(job.total_frames(), 6);
    assert!(job.timeline().pose_changes(Character::Skeptic).next().is_some());

    let mut sink = InMemorySink::new();
    render_to_sink(&job, &mut sink, None, &CancelToken::new(), &mut |_| {}).unwrap();
    assert_eq!(sink.frames().len(), 6);
}

#[test]
fn sequential_and_parallel_emit_identical_frames_in_order() {
    let render = |parallel: bool| {
        let job = prepare(&spec("order", parallel), cache(true)).unwrap();
        let mut sink = InMemorySink::new();
        let mut seen = Vec::new();
        let stats = render_to_sink(&job, &mut sink, None, &CancelToken::new(), &mut |n| {
            seen.push(n)
        })
        .unwrap();
        assert!(sink.is_finished());
        assert_eq!(seen, (1..=6).collect::<Vec<_>>());
        assert_eq!(stats.frames_total, 6);
        assert_eq!(stats.frames_painted + stats.frames_reused, 6);
        sink.frames().to_vec()
    };
    let seq = render(false);
    let par = render(true);
    assert_eq!(seq.len(), 6);
    for (i, (idx, _)) in seq.iter().enumerate() {
        assert_eq!(idx.0, i as u64);
    }
    assert_eq!(seq, par);
}

#[test]
fn cancellation_aborts_the_sink() {
    let job = prepare(&spec("cancel", false), cache(true)).unwrap();
    let cancel = CancelToken::new();
    let mut sink = InMemorySink::new();
    let token = cancel.clone();
    let err = render_to_sink(&job, &mut sink, None, &cancel, &mut |n| {
        if n == 2 {
            token.cancel();
        }
    })
    .unwrap_err();
    assert!(err.is_cancelled());
    assert!(sink.is_aborted());
    assert!(!sink.is_finished());
    assert!(sink.frames().is_empty());
}

#[test]
fn cancelled_before_start_never_begins() {
    let job = prepare(&spec("early", true), cache(true)).unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut sink = InMemorySink::new();
    let err = render_to_sink(&job, &mut sink, None, &cancel, &mut |_| {}).unwrap_err();
    assert!(err.is_cancelled());
    assert!(sink.config().is_none());
}
