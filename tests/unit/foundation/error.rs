use super::*;

#[test]
fn timing_error_names_word_index() {
    let e = TalkreelError::timing_at(3, "start_ms 500 precedes previous start 600");
    let s = e.to_string();
    assert!(s.contains("at word 3"), "{s}");
    assert_eq!(e.kind(), "TimingError");

    let e = TalkreelError::timing("no words");
    assert_eq!(e.to_string(), "timing error: no words");
}

#[test]
fn asset_error_carries_combination_and_position() {
    let e = TalkreelError::asset(
        AssetRef::Pose {
            character: Character::Analyst,
            pose_id: "analyst_close".to_string(),
            mouth: MouthState::Open,
        },
        "no image loaded",
    )
    .at(Some(12), Some(400));
    let s = e.to_string();
    assert!(s.contains("pose (analyst, analyst_close, open)"), "{s}");
    assert!(s.contains("frame 12"), "{s}");
    assert!(s.contains("t=400ms"), "{s}");
    assert_eq!(e.kind(), "AssetResolutionError");
}

#[test]
fn at_keeps_existing_position() {
    let e = TalkreelError::encoder("pipe closed")
        .at(Some(1), None)
        .at(Some(9), Some(33));
    match e {
        TalkreelError::Encoder { position, .. } => {
            assert_eq!(position.frame, Some(1));
            assert_eq!(position.t_ms, Some(33));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn cancelled_is_not_a_failure_kind() {
    assert!(TalkreelError::Cancelled.is_cancelled());
    assert!(!TalkreelError::EmptyScript.is_cancelled());
    assert_eq!(TalkreelError::Cancelled.kind(), "CancellationRequested");
}

#[test]
fn anyhow_errors_convert() {
    let e: TalkreelError = anyhow::anyhow!("disk full").into();
    assert_eq!(e.to_string(), "disk full");
    assert_eq!(e.kind(), "Error");
}
