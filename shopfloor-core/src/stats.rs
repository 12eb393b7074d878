//! Aggregate statistics over a set of events.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::Event;

/// Count and mean/min/max of event durations, in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DurationStats {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl DurationStats {
    pub fn from_durations<I: IntoIterator<Item = f64>>(durations: I) -> Option<Self> {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for d in durations {
            count += 1;
            sum += d;
            min = min.min(d);
            max = max.max(d);
        }

        if count == 0 {
            return None;
        }

        Some(Self {
            count,
            mean: sum / count as f64,
            min,
            max,
        })
    }
}

/// Statistics for one category or one source.
///
/// `distinct` counts sources for a category group and categories for a
/// source group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStats {
    pub count: usize,
    pub distinct: usize,
    pub durations: DurationStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventSummary {
    pub total: usize,
    pub distinct_categories: usize,
    pub distinct_sources: usize,
    pub durations: Option<DurationStats>,
    pub by_category: BTreeMap<String, GroupStats>,
    pub by_source: BTreeMap<String, GroupStats>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl EventSummary {
    pub fn from_events(events: &[Event]) -> Self {
        let by_category = group_by(events, |e| &e.category, |e| &e.source);
        let by_source = group_by(events, |e| &e.source, |e| &e.category);

        Self {
            total: events.len(),
            distinct_categories: by_category.len(),
            distinct_sources: by_source.len(),
            durations: DurationStats::from_durations(events.iter().map(|e| e.duration_minutes)),
            by_category,
            by_source,
            first_seen: events.iter().map(|e| e.timestamp).min(),
            last_seen: events.iter().map(|e| e.timestamp).max(),
        }
    }

    /// Categories by descending count, then name.
    pub fn categories_by_frequency(&self) -> Vec<(&str, &GroupStats)> {
        by_frequency(&self.by_category)
    }

    /// Sources by descending count, then name.
    pub fn sources_by_frequency(&self) -> Vec<(&str, &GroupStats)> {
        by_frequency(&self.by_source)
    }
}

fn group_by<'a, K, D>(events: &'a [Event], key: K, distinct: D) -> BTreeMap<String, GroupStats>
where
    K: Fn(&'a Event) -> &'a String,
    D: Fn(&'a Event) -> &'a String,
{
    let mut groups: BTreeMap<&'a String, Vec<&'a Event>> = BTreeMap::new();
    for e in events {
        groups.entry(key(e)).or_default().push(e);
    }

    groups
        .into_iter()
        .filter_map(|(name, members)| {
            let durations = DurationStats::from_durations(members.iter().map(|e| e.duration_minutes))?;
            let distinct = members.iter().map(|e| distinct(*e)).collect::<BTreeSet<_>>().len();
            Some((
                name.clone(),
                GroupStats {
                    count: members.len(),
                    distinct,
                    durations,
                },
            ))
        })
        .collect()
}

fn by_frequency(groups: &BTreeMap<String, GroupStats>) -> Vec<(&str, &GroupStats)> {
    let mut sorted: Vec<(&str, &GroupStats)> =
        groups.iter().map(|(k, v)| (k.as_str(), v)).collect();
    sorted.sort_by(|a, b| b.1.count.cmp(&a.1.count).then_with(|| a.0.cmp(b.0)));
    sorted
}
