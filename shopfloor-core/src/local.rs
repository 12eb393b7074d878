//! Local-only answers: deterministic text built from event arithmetic, with
//! no generation backend involved.

use std::fmt::Write;

use crate::models::Event;
use crate::similarity::similarity_band;
use crate::stats::EventSummary;

/// Categories listed in a local summary.
const TOP_CATEGORIES: usize = 3;

pub fn explain_similarity(score: f64) -> String {
    format!(
        "Events have a similarity score of {:.4}. These events are {}.",
        score,
        similarity_band(score)
    )
}

/// Band sentence for one event and its closest stored neighbour.
pub fn explain_neighbour(id: i64, neighbour_id: i64, score: f64) -> String {
    format!(
        "The closest event to event {} is event {}. {}",
        id,
        neighbour_id,
        explain_similarity(score)
    )
}

pub fn summarize_events(events: &[Event]) -> String {
    let summary = EventSummary::from_events(events);
    let mut out = format!(
        "Found {} events with {} different types.\nMost common event types:\n",
        summary.total, summary.distinct_categories
    );
    for (category, stats) in summary.categories_by_frequency().iter().take(TOP_CATEGORIES) {
        let _ = writeln!(out, "- {}: {} events", category, stats.count);
    }
    out
}

pub fn event_report(events: &[Event]) -> String {
    let summary = EventSummary::from_events(events);
    let mut out = String::from("Event Report Summary:\n");
    let _ = writeln!(out, "Total Events: {}", summary.total);
    if let (Some(first), Some(last)) = (summary.first_seen, summary.last_seen) {
        let _ = writeln!(out, "Date Range: {} to {}", first.to_rfc3339(), last.to_rfc3339());
    }
    let _ = writeln!(out, "Unique Event Types: {}", summary.distinct_categories);
    let _ = writeln!(out, "Machines: {}", summary.distinct_sources);
    if let Some(d) = summary.durations {
        let _ = writeln!(
            out,
            "Duration (minutes): mean {:.2}, min {:.2}, max {:.2}",
            d.mean, d.min, d.max
        );
    }
    out
}

/// Summary followed by the report; the local answer to a general question.
pub fn overview(events: &[Event]) -> String {
    format!("{}\n{}", summarize_events(events), event_report(events))
}
