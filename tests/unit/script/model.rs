use super::*;

#[test]
fn spoken_words_strip_tags_and_punctuation() {
    assert_eq!(
        spoken_words("[curious] ...but I have always wondered, why?"),
        vec!["...but", "I", "have", "always", "wondered,", "why?"]
    );
    assert_eq!(
        spoken_words("Exactly. <break time=\"1s\"/> And that... — that."),
        vec!["Exactly.", "And", "that...", "that."]
    );
    assert!(spoken_words("[softly] <break/>").is_empty());
}

#[test]
fn spoken_words_borrow_from_the_line_text() {
    let line = DialogueLine {
        character: Character::Analyst,
        text: format!("{} <break/> {}", "[calm] first", "second"),
        poses: Vec::new(),
        visual_assets: Vec::new(),
    };
    let words: Vec<&str> = spoken_words(&line.text);
    assert_eq!(words, vec!["first", "second"]);
    assert!(line.text.as_ptr() <= words[0].as_ptr());
}

#[test]
fn character_aliases_deserialize() {
    for (json, want) in [
        ("\"Skeptic\"", Character::Skeptic),
        ("\"character_a\"", Character::Skeptic),
        ("\"Brother Marcus\"", Character::Skeptic),
        ("\"analyst\"", Character::Analyst),
        ("\"B\"", Character::Analyst),
        ("\"Sister Faith\"", Character::Analyst),
    ] {
        let c: Character = serde_json::from_str(json).unwrap();
        assert_eq!(c, want, "{json}");
    }
    assert!(serde_json::from_str::<Character>("\"Narrator\"").is_err());
}

#[test]
fn wrapped_script_document_with_aliased_field_names() {
    let json = r#"{
        "script": {
            "hook_text": "Why does it matter?",
            "dialogue": [
                {
                    "character": "Skeptic",
                    "text": "[curious] Why does this matter?",
                    "character_poses": [
                        {"pose_id": "skeptic_front", "start_word_index": 0, "end_word_index": 3}
                    ],
                    "visual_assets": null
                },
                {
                    "character": "Analyst",
                    "text": "Let me share.",
                    "visual_assets": [
                        {"visual_asset_id": "1a", "is_fullscreen": false}
                    ]
                }
            ]
        }
    }"#;
    let s = Script::from_json_str(json).unwrap();
    assert_eq!(s.hook_text.as_deref(), Some("Why does it matter?"));
    assert_eq!(s.dialogue.len(), 2);
    assert_eq!(s.dialogue[0].poses[0].pose_id, "skeptic_front");
    assert!(s.dialogue[0].visual_assets.is_empty());
    assert_eq!(s.dialogue[1].visual_assets[0].asset_id, "1a");
    assert!(!s.dialogue[1].visual_assets[0].fullscreen);
    assert_eq!(s.word_count(), 7);
    assert_eq!(s.referenced_asset_ids(), vec!["1a"]);
}

#[test]
fn bare_script_and_fullscreen_default() {
    let json = r#"{"dialogue":[{"character":"A","text":"hi","visual_assets":[{"asset_id":"x"}]}]}"#;
    let s = Script::from_json_str(json).unwrap();
    assert!(s.dialogue[0].visual_assets[0].fullscreen);
    assert_eq!(s.dialogue[0].character, Character::Skeptic);
}

#[test]
fn invalid_json_is_validation_error() {
    let err = Script::from_json_str("{").unwrap_err();
    assert_eq!(err.kind(), "ValidationError");
}

#[test]
fn fallback_pose_follows_character_name() {
    assert_eq!(Character::Analyst.fallback_pose_id(), "analyst_front");
    assert_eq!(Character::Skeptic.to_string(), "skeptic");
}
