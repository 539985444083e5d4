//! End-to-end checks over a realistic editor document: parse, validate,
//! group, and map to frames.

use timeline::{frames_for, group_track_items, total_frames, TimelineDocument};

const DOC: &str = r##"{
    "trackItemIds": ["intro", "main", "logo", "music"],
    "trackItemsMap": {
        "intro": {
            "id": "intro",
            "type": "video",
            "display": {"from": 0, "to": 3000},
            "trim": {"from": 500, "to": 3500},
            "details": {"src": "/uploads/intro.mp4", "width": 1920, "height": 1080}
        },
        "main": {
            "id": "main",
            "type": "video",
            "display": {"from": 3000, "to": 10000},
            "playbackRate": 2.0,
            "details": {"src": "/uploads/main.mp4", "volume": 80}
        },
        "logo": {
            "id": "logo",
            "type": "image",
            "display": {"from": 0, "to": 10000},
            "details": {"src": "/uploads/logo.png", "top": 20, "left": 20, "opacity": 90}
        },
        "music": {
            "id": "music",
            "type": "audio",
            "display": {"from": 0, "to": 10000},
            "details": {"src": "/uploads/theme.mp3", "volume": 40}
        }
    },
    "transitionsMap": {
        "t1": {"id": "t1", "fromId": "intro", "toId": "main", "kind": "fade", "duration": 500},
        "t2": {"id": "t2", "fromId": "logo", "toId": "music", "kind": "none"}
    },
    "size": {"width": 1920, "height": 1080},
    "fps": 30,
    "duration": 10000,
    "background": {"type": "color", "value": "#101010"}
}"##;

#[test]
fn editor_document_parses_and_validates() {
    let doc: TimelineDocument = serde_json::from_str(DOC).unwrap();
    doc.validate().unwrap();

    let main = doc.item("main").unwrap();
    assert_eq!(main.playback_rate, 2.0);
    assert_eq!(main.details.volume_or_default(), 80.0);
    // defaulted fields
    let logo = doc.item("logo").unwrap();
    assert_eq!(logo.playback_rate, 1.0);
    assert!(logo.trim.is_none());
}

#[test]
fn grouping_respects_enabled_transitions_only() {
    let doc: TimelineDocument = serde_json::from_str(DOC).unwrap();
    let groups = group_track_items(&doc);
    let ids: Vec<Vec<String>> = groups.iter().map(|g| g.item_ids.clone()).collect();
    // intro->main chain via t1; t2 is "none" so logo and music stay singletons
    assert_eq!(
        ids,
        vec![
            vec!["intro".to_string(), "main".to_string()],
            vec!["logo".to_string()],
            vec!["music".to_string()],
        ]
    );
}

#[test]
fn frame_arithmetic_matches_document_timing() {
    let doc: TimelineDocument = serde_json::from_str(DOC).unwrap();
    assert_eq!(total_frames(doc.duration, doc.fps), 300);

    let main = doc.item("main").unwrap();
    let window = frames_for(&main.display, doc.fps);
    assert_eq!(window.from, 90);
    assert_eq!(window.duration_in_frames, 210);
    assert_eq!(window.end(), 300);

    // playback-rate doubling maps 1s into the display to 2s into the source
    assert_eq!(main.source_time_ms(4000.0), 2000.0);
}

#[test]
fn single_clip_timeline_yields_one_group_and_exact_frame_count() {
    let doc: TimelineDocument = serde_json::from_str(
        r#"{
            "trackItemIds": ["clip"],
            "trackItemsMap": {
                "clip": {
                    "id": "clip",
                    "type": "video",
                    "display": {"from": 0, "to": 5000},
                    "trim": {"from": 0, "to": 5000},
                    "details": {"src": "/uploads/clip.mp4"}
                }
            },
            "transitionIds": [],
            "transitionsMap": {},
            "size": {"width": 1920, "height": 1080},
            "fps": 30,
            "duration": 5000
        }"#,
    )
    .unwrap();
    doc.validate().unwrap();

    let groups = group_track_items(&doc);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].item_ids, vec!["clip".to_string()]);

    let window = frames_for(&doc.item("clip").unwrap().display, doc.fps);
    assert_eq!(window.from, 0);
    assert_eq!(window.duration_in_frames, 150);
    assert_eq!(total_frames(doc.duration, doc.fps), 150);
}

#[test]
fn duration_shorter_than_content_is_rejected() {
    let mut doc: TimelineDocument = serde_json::from_str(DOC).unwrap();
    doc.duration = 5000;
    assert!(doc.validate().is_err());
}
