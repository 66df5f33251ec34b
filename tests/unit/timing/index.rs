use super::*;

fn raw(rows: &[(u64, u64)]) -> Vec<RawWordAlignment> {
    rows.iter()
        .enumerate()
        .map(|(i, &(s, e))| RawWordAlignment::new(format!("w{i}"), s, e))
        .collect()
}

fn assert_timing_error_at(err: TalkreelError, want: usize) {
    match err {
        TalkreelError::Timing { word_index, .. } => assert_eq!(word_index, Some(want)),
        other => panic!("expected timing error, got {other:?}"),
    }
}

#[test]
fn build_and_lookup_preserve_input_order() {
    let idx = TimingIndex::build(raw(&[(0, 200), (200, 450), (500, 900)])).unwrap();
    assert_eq!(idx.len(), 3);
    assert_eq!(idx.lookup(0), Some((0, 200)));
    assert_eq!(idx.lookup(2), Some((500, 900)));
    assert_eq!(idx.lookup(3), None);
    assert_eq!(idx.duration_ms(), 900);

    let starts: Vec<u64> = idx.iter().map(|w| w.start_ms).collect();
    assert!(starts.windows(2).all(|p| p[0] < p[1]));
    assert_eq!(idx.word(1).map(|w| w.text.as_str()), Some("w1"));
}

#[test]
fn build_rejects_empty_input() {
    assert!(matches!(
        TimingIndex::build(Vec::new()),
        Err(TalkreelError::Timing { word_index: None, .. })
    ));
}

#[test]
fn build_rejects_out_of_order_start() {
    let err = TimingIndex::build(raw(&[(0, 100), (200, 300), (600, 700), (500, 550)])).unwrap_err();
    assert_timing_error_at(err, 3);
}

#[test]
fn build_rejects_overlap_and_degenerate_words() {
    let err = TimingIndex::build(raw(&[(0, 300), (250, 400)])).unwrap_err();
    assert_timing_error_at(err, 1);

    let err = TimingIndex::build(raw(&[(0, 300), (300, 300)])).unwrap_err();
    assert_timing_error_at(err, 1);

    let err = TimingIndex::build(raw(&[(0, 300), (0, 400)])).unwrap_err();
    assert_timing_error_at(err, 1);
}

#[test]
fn word_at_uses_half_open_intervals() {
    let idx = TimingIndex::build(raw(&[(0, 200), (300, 450)])).unwrap();
    assert_eq!(idx.word_at(0).map(|w| w.index), Some(0));
    assert_eq!(idx.word_at(199).map(|w| w.index), Some(0));
    assert!(idx.word_at(200).is_none());
    assert!(idx.word_at(250).is_none());
    assert_eq!(idx.word_at(300).map(|w| w.index), Some(1));
    assert!(idx.word_at(450).is_none());
}

#[test]
fn slice_maps_local_indices() {
    let idx = TimingIndex::build(raw(&[(0, 100), (100, 200), (200, 300), (300, 400)])).unwrap();
    let v = idx.slice(1, 3).unwrap();
    assert_eq!(v.offset(), 1);
    assert_eq!(v.len(), 2);
    assert_eq!(v.word(0).map(|w| w.index), Some(1));
    assert_eq!(v.start_ms(), Some(100));
    assert_eq!(v.end_ms(), Some(300));

    assert!(matches!(
        idx.slice(2, 5),
        Err(TalkreelError::Timing { .. })
    ));
    assert!(matches!(
        idx.slice(3, 2),
        Err(TalkreelError::Validation(_))
    ));
}

#[test]
fn flat_document_loads() {
    let json = r#"{"words":[{"text":"Hello","start_ms":0,"end_ms":250},{"text":"there","start_ms":260,"end_ms":600}]}"#;
    let idx = TimingIndex::from_json_str(json).unwrap();
    assert_eq!(idx.lookup(1), Some((260, 600)));
}

#[test]
fn segment_document_converts_seconds_with_rounding() {
    let json = r#"{
        "segments": [
            {"character": "Skeptic", "words": [
                {"word": " Why", "start": 0.0, "end": 0.2494},
                {"word": " not?", "start": 0.3, "end": 0.6006}
            ]},
            {"words": [{"word": "Because", "start": 1.0, "end": 1.5}]}
        ]
    }"#;
    let idx = TimingIndex::from_json_str(json).unwrap();
    assert_eq!(idx.len(), 3);
    assert_eq!(idx.lookup(0), Some((0, 249)));
    assert_eq!(idx.lookup(1), Some((300, 601)));
    assert_eq!(idx.word(0).map(|w| w.text.as_str()), Some("Why"));
    assert_eq!(idx.duration_ms(), 1500);
}

#[test]
fn negative_seconds_are_rejected() {
    let json = r#"{"segments":[{"words":[{"word":"x","start":-0.5,"end":0.1}]}]}"#;
    let err = TimingIndex::from_json_str(json).unwrap_err();
    assert_timing_error_at(err, 0);
}
