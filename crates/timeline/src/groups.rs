use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::TimelineDocument;

/// A maximal chain of track items connected end-to-end by enabled
/// transitions, in render order. Items untouched by any transition form
/// singleton groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderGroup {
    pub item_ids: Vec<String>,
    pub transition_ids: Vec<String>,
}

impl RenderGroup {
    fn singleton(id: &str) -> Self {
        Self {
            item_ids: vec![id.to_string()],
            transition_ids: Vec::new(),
        }
    }
}

/// Partition the document's items into ordered transition chains.
///
/// Chain starts are items that are not the target of any enabled transition;
/// from each start the walk follows `from_id -> to_id` edges. Within a group
/// members are stable-sorted by `display.from`, so two items starting at the
/// same millisecond keep their chain-relative order.
pub fn group_track_items(doc: &TimelineDocument) -> Vec<RenderGroup> {
    // transition id keyed by its source item, skipping disabled links
    let mut outgoing: HashMap<&str, &crate::Transition> = HashMap::new();
    let mut targets: HashSet<&str> = HashSet::new();
    for tr in doc.transitions_map.values() {
        if tr.is_disabled() {
            continue;
        }
        outgoing.insert(tr.from_id.as_str(), tr);
        targets.insert(tr.to_id.as_str());
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut groups = Vec::new();

    for id in &doc.track_item_ids {
        let id = id.as_str();
        if visited.contains(id) || targets.contains(id) {
            continue;
        }
        let mut group = RenderGroup {
            item_ids: Vec::new(),
            transition_ids: Vec::new(),
        };
        let mut cursor = id;
        loop {
            if !visited.insert(cursor) {
                break; // malformed cycle; stop rather than loop forever
            }
            group.item_ids.push(cursor.to_string());
            match outgoing.get(cursor) {
                Some(tr) if doc.track_items_map.contains_key(&tr.to_id) => {
                    group.transition_ids.push(tr.id.clone());
                    cursor = tr.to_id.as_str();
                }
                _ => break,
            }
        }
        groups.push(group);
    }

    // Anything still unvisited is a transition target whose chain start was
    // missing from trackItemIds; emit singletons so no item is dropped.
    for id in &doc.track_item_ids {
        if visited.insert(id.as_str()) {
            groups.push(RenderGroup::singleton(id));
        }
    }

    for group in &mut groups {
        group.item_ids.sort_by_key(|id| {
            doc.track_items_map
                .get(id)
                .map(|it| it.display.from)
                .unwrap_or(u64::MAX)
        });
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Background, CanvasSize, ItemDetails, ItemMetadata, ItemType, TimeRange, TrackItem,
        Transition,
    };

    fn item(id: &str, from: u64, to: u64) -> TrackItem {
        TrackItem {
            id: id.into(),
            item_type: ItemType::Image,
            display: TimeRange { from, to },
            trim: None,
            playback_rate: 1.0,
            details: ItemDetails::default(),
            metadata: ItemMetadata::default(),
        }
    }

    fn transition(id: &str, from: &str, to: &str, kind: &str) -> Transition {
        Transition {
            id: id.into(),
            from_id: from.into(),
            to_id: to.into(),
            kind: kind.into(),
            duration: Some(500),
        }
    }

    fn doc(items: Vec<TrackItem>, transitions: Vec<Transition>) -> TimelineDocument {
        TimelineDocument {
            track_item_ids: items.iter().map(|i| i.id.clone()).collect(),
            track_items_map: items.into_iter().map(|i| (i.id.clone(), i)).collect(),
            transitions_map: transitions
                .into_iter()
                .map(|t| (t.id.clone(), t))
                .collect(),
            size: CanvasSize { width: 1920, height: 1080 },
            fps: 30,
            duration: 10_000,
            background: Background::default(),
        }
    }

    #[test]
    fn links_enabled_chain_and_ignores_none_kind() {
        let d = doc(
            vec![
                item("a", 0, 1000),
                item("b", 1000, 2000),
                item("c", 2000, 3000),
                item("d", 3000, 4000),
            ],
            vec![
                transition("t1", "a", "b", "fade"),
                transition("t2", "c", "d", "none"),
            ],
        );
        let groups = group_track_items(&d);
        let ids: Vec<Vec<String>> = groups.iter().map(|g| g.item_ids.clone()).collect();
        assert_eq!(
            ids,
            vec![
                vec!["a".to_string(), "b".to_string()],
                vec!["c".to_string()],
                vec!["d".to_string()],
            ]
        );
        assert_eq!(groups[0].transition_ids, vec!["t1".to_string()]);
    }

    #[test]
    fn chains_of_three_collect_both_transitions() {
        let d = doc(
            vec![item("a", 0, 1000), item("b", 1000, 2000), item("c", 2000, 3000)],
            vec![
                transition("t1", "a", "b", "slide"),
                transition("t2", "b", "c", "fade"),
            ],
        );
        let groups = group_track_items(&d);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].item_ids, vec!["a", "b", "c"]);
        assert_eq!(groups[0].transition_ids, vec!["t1", "t2"]);
    }

    #[test]
    fn groups_sort_by_display_from_independent_of_id_order() {
        // z-order lists b before a, but a starts earlier
        let mut d = doc(
            vec![item("b", 5000, 6000), item("a", 0, 1000)],
            vec![transition("t1", "b", "a", "fade")],
        );
        d.track_item_ids = vec!["b".into(), "a".into()];
        let groups = group_track_items(&d);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].item_ids, vec!["a", "b"]);
    }

    #[test]
    fn equal_start_keeps_relative_order() {
        let d = doc(
            vec![item("x", 0, 1000), item("y", 0, 1000)],
            vec![transition("t1", "x", "y", "fade")],
        );
        let groups = group_track_items(&d);
        // stable sort: chain order x -> y survives the tie
        assert_eq!(groups[0].item_ids, vec!["x", "y"]);
    }

    #[test]
    fn untouched_items_become_singletons() {
        let d = doc(vec![item("solo", 0, 1000)], vec![]);
        let groups = group_track_items(&d);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].item_ids, vec!["solo"]);
        assert!(groups[0].transition_ids.is_empty());
    }
}
