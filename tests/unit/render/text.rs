use super::*;

#[test]
fn word_ranges_follow_single_spaces() {
    let t = "It is about";
    assert_eq!(word_byte_range(t, 0), Some(0..2));
    assert_eq!(word_byte_range(t, 1), Some(3..5));
    assert_eq!(word_byte_range(t, 2), Some(6..11));
    assert_eq!(word_byte_range(t, 3), None);
    assert_eq!(&t[word_byte_range(t, 2).unwrap()], "about");
}

#[test]
fn brush_from_array() {
    let b = TextBrushRgba8::from([1, 2, 3, 4]);
    assert_eq!((b.r, b.g, b.b, b.a), (1, 2, 3, 4));
}

#[test]
fn garbage_font_bytes_are_rejected() {
    assert!(TextLayoutEngine::new(b"definitely not a font").is_err());
}
