use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::calc::AssessmentItem;

/// Per-item slice of a persisted score snapshot, keyed by the item's stable
/// ordinal. `collapsed` is UI card state carried through untouched; the
/// engine only ever consumes score/enabled/weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSnapshot {
    #[serde(default)]
    pub score: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub collapsed: bool,
}

/// One course's persisted state: the item map plus course-level target grade
/// and collapse flag. `updated_at` stamps the last completed save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSnapshot {
    pub course_code: String,
    pub semester_id: String,
    #[serde(default)]
    pub semester_label: String,
    pub results: BTreeMap<String, ItemSnapshot>,
    pub target_grade: i64,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl CourseSnapshot {
    /// Applies the stored per-item state onto a fresh item list. Indexes
    /// that no longer exist (items removed since the save) are dropped
    /// silently; items without a stored entry keep their current state.
    pub fn apply_to_items(&self, items: &mut [AssessmentItem]) {
        for item in items.iter_mut() {
            let Some(stored) = self.results.get(&item.idx.to_string()) else {
                continue;
            };
            item.score = stored.score.clone();
            item.enabled = !stored.disabled;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<AssessmentItem> {
        vec![
            AssessmentItem {
                idx: 0,
                label: "Assignment 1".to_string(),
                weight: "50%".to_string(),
                score: String::new(),
                enabled: true,
            },
            AssessmentItem {
                idx: 1,
                label: "Final".to_string(),
                weight: "50%".to_string(),
                score: String::new(),
                enabled: true,
            },
        ]
    }

    #[test]
    fn apply_restores_scores_and_enabled_flags() {
        let mut snapshot = CourseSnapshot {
            course_code: "MATH1051".to_string(),
            semester_id: "S1".to_string(),
            semester_label: String::new(),
            results: BTreeMap::new(),
            target_grade: 5,
            collapsed: false,
            updated_at: None,
        };
        snapshot.results.insert(
            "0".to_string(),
            ItemSnapshot {
                score: "8/10".to_string(),
                disabled: false,
                collapsed: false,
            },
        );
        snapshot.results.insert(
            "1".to_string(),
            ItemSnapshot {
                score: String::new(),
                disabled: true,
                collapsed: true,
            },
        );

        let mut restored = items();
        snapshot.apply_to_items(&mut restored);
        assert_eq!(restored[0].score, "8/10");
        assert!(restored[0].enabled);
        assert!(!restored[1].enabled);
    }

    #[test]
    fn apply_ignores_stale_indexes() {
        let mut snapshot = CourseSnapshot {
            course_code: "MATH1051".to_string(),
            semester_id: "S1".to_string(),
            semester_label: String::new(),
            results: BTreeMap::new(),
            target_grade: 4,
            collapsed: false,
            updated_at: None,
        };
        snapshot.results.insert(
            "7".to_string(),
            ItemSnapshot {
                score: "100%".to_string(),
                disabled: false,
                collapsed: false,
            },
        );

        let mut restored = items();
        snapshot.apply_to_items(&mut restored);
        assert_eq!(restored[0].score, "");
        assert_eq!(restored[1].score, "");
    }

    #[test]
    fn snapshot_wire_shape_round_trips() {
        let json = serde_json::json!({
            "courseCode": "CSSE2310",
            "semesterId": "S2",
            "results": {
                "0": { "score": "75%", "disabled": false, "collapsed": false }
            },
            "targetGrade": 6
        });
        let snapshot: CourseSnapshot = serde_json::from_value(json).expect("deserialize");
        assert_eq!(snapshot.course_code, "CSSE2310");
        assert_eq!(snapshot.results["0"].score, "75%");
        assert!(!snapshot.collapsed);

        let back = serde_json::to_value(&snapshot).expect("serialize");
        assert_eq!(back["results"]["0"]["score"], "75%");
        assert_eq!(back["targetGrade"], 6);
    }
}
