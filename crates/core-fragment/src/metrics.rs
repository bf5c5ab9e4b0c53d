//! Metric values collected against record-category execution spans.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metrics finalized onto a leaf block's execution record. All fields are
/// optional; `custom` carries ad-hoc named values without schema changes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricValues {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calories: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, f64>,
}

impl MetricValues {
    pub fn is_empty(&self) -> bool {
        self.reps.is_none()
            && self.weight.is_none()
            && self.distance.is_none()
            && self.duration_ms.is_none()
            && self.calories.is_none()
            && self.custom.is_empty()
    }

    /// Fold `other` into `self`. Counters add, point values prefer the
    /// later sample. Used when a group span aggregates its children.
    pub fn merge(&mut self, other: &MetricValues) {
        if let Some(reps) = other.reps {
            self.reps = Some(self.reps.unwrap_or(0) + reps);
        }
        if other.weight.is_some() {
            self.weight = other.weight;
        }
        if let Some(distance) = other.distance {
            self.distance = Some(self.distance.unwrap_or(0.0) + distance);
        }
        if let Some(ms) = other.duration_ms {
            self.duration_ms = Some(self.duration_ms.unwrap_or(0) + ms);
        }
        if let Some(cal) = other.calories {
            self.calories = Some(self.calories.unwrap_or(0.0) + cal);
        }
        for (key, value) in &other.custom {
            *self.custom.entry(key.clone()).or_insert(0.0) += value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_empty() {
        assert!(MetricValues::default().is_empty());
    }

    #[test]
    fn merge_adds_counters_and_replaces_points() {
        let mut base = MetricValues {
            reps: Some(21),
            weight: Some(95.0),
            duration_ms: Some(30_000),
            ..Default::default()
        };
        let next = MetricValues {
            reps: Some(15),
            weight: Some(65.0),
            duration_ms: Some(20_000),
            ..Default::default()
        };
        base.merge(&next);
        assert_eq!(base.reps, Some(36));
        assert_eq!(base.weight, Some(65.0));
        assert_eq!(base.duration_ms, Some(50_000));
    }

    #[test]
    fn merge_custom_accumulates_by_key() {
        let mut base = MetricValues::default();
        let mut other = MetricValues::default();
        other.custom.insert("height_in".into(), 24.0);
        base.merge(&other);
        base.merge(&other);
        assert_eq!(base.custom.get("height_in"), Some(&48.0));
    }
}
