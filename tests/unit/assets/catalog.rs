use super::*;

const CATALOG: &str = r#"{
    "characters": {
        "Skeptic": {
            "default_pose": "skeptic_front",
            "poses": [
                {"pose_id": "skeptic_front", "view": "front", "open": "sk/front_open.png", "closed": "sk/front_closed.png"},
                {"pose_id": "skeptic_side", "view": "side", "open": "sk/side_open.png", "closed": "sk/side_closed.png"}
            ]
        },
        "analyst": {
            "poses": [
                {"pose_id": "analyst_pov", "view": "pov", "closed": "/abs/pov_closed.png"}
            ]
        }
    },
    "caption_font": "fonts/caption.ttf"
}"#;

#[test]
fn parses_and_resolves_relative_paths() {
    let c = AssetCatalog::from_json_str(CATALOG, "/data/assets").unwrap();
    let sk = &c.characters[&Character::Skeptic];
    assert_eq!(sk.poses.len(), 2);
    assert_eq!(sk.poses[1].view, PoseView::Side);
    assert_eq!(
        c.resolve(sk.poses[0].open.as_deref().unwrap()),
        PathBuf::from("/data/assets/sk/front_open.png")
    );
    let an = &c.characters[&Character::Analyst];
    assert!(an.poses[0].open.is_none());
    assert_eq!(
        c.resolve(an.poses[0].closed.as_deref().unwrap()),
        PathBuf::from("/abs/pov_closed.png")
    );
    assert_eq!(
        c.default_poses().get(&Character::Skeptic).map(String::as_str),
        Some("skeptic_front")
    );
    assert!(!c.default_poses().contains_key(&Character::Analyst));
}

#[test]
fn rejects_duplicate_and_unknown_default() {
    let dup = r#"{"characters":{"skeptic":{"poses":[{"pose_id":"a"},{"pose_id":"a"}]}}}"#;
    assert!(AssetCatalog::from_json_str(dup, ".").is_err());

    let bad_default = r#"{"characters":{"skeptic":{"default_pose":"zzz","poses":[{"pose_id":"a"}]}}}"#;
    let err = AssetCatalog::from_json_str(bad_default, ".").unwrap_err();
    assert!(err.to_string().contains("zzz"));
}
