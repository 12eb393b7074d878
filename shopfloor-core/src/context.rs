//! Prompt context assembly
//!
//! Turns events into the bounded text block that precedes a question in a
//! generation prompt. Pure and deterministic: identical input in identical
//! order yields identical output.

use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::config::ContextConfig;
use crate::models::Event;
use crate::stats::{DurationStats, EventSummary, GroupStats};

const TRUNCATION_MARKER: &str = "\n[context truncated]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    /// A few named events, every field rendered.
    Focused,
    /// The recent event set, rendered as statistics.
    Aggregate,
}

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    summarize_threshold: usize,
    max_groups: usize,
    max_chars: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::from_config(&ContextConfig::default())
    }
}

impl ContextAssembler {
    pub fn from_config(config: &ContextConfig) -> Self {
        Self {
            summarize_threshold: config.summarize_threshold,
            max_groups: config.max_groups.max(1),
            max_chars: config.max_chars,
        }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn assemble(&self, events: &[Event], mode: ContextMode) -> String {
        let text = match mode {
            ContextMode::Focused => render_focused(events),
            ContextMode::Aggregate => self.render_aggregate(events),
        };
        truncate(text, self.max_chars)
    }

    fn render_aggregate(&self, events: &[Event]) -> String {
        let summary = EventSummary::from_events(events);
        let mut out = String::new();

        let _ = writeln!(
            out,
            "Manufacturing events: {} total, {} categories, {} machines",
            summary.total, summary.distinct_categories, summary.distinct_sources
        );
        if let (Some(first), Some(last)) = (summary.first_seen, summary.last_seen) {
            let _ = writeln!(out, "Time range: {} to {}", first.to_rfc3339(), last.to_rfc3339());
        }
        if let Some(d) = summary.durations {
            let _ = writeln!(out, "Duration (minutes): {}", describe_durations(&d));
        }

        self.render_groups(&mut out, "By category", "machines", summary.categories_by_frequency());
        self.render_groups(&mut out, "By machine", "categories", summary.sources_by_frequency());

        if events.len() <= self.summarize_threshold {
            out.push_str("\nEvents:\n");
            for e in events {
                let _ = writeln!(out, "{}", event_line(e));
            }
        }

        out
    }

    fn render_groups(
        &self,
        out: &mut String,
        heading: &str,
        distinct_label: &str,
        groups: Vec<(&str, &GroupStats)>,
    ) {
        if groups.is_empty() {
            return;
        }

        let _ = writeln!(out, "\n{}:", heading);
        for (name, stats) in groups.iter().take(self.max_groups) {
            let _ = writeln!(
                out,
                "- {}: {} events across {} {}; duration {}",
                name,
                stats.count,
                stats.distinct,
                distinct_label,
                describe_durations(&stats.durations)
            );
        }
        if groups.len() > self.max_groups {
            let _ = writeln!(out, "- ... and {} more", groups.len() - self.max_groups);
        }
    }
}

/// One line per event, the format used for listed events in prompts.
pub fn event_line(e: &Event) -> String {
    format!(
        "Event {}: {} on machine {}. {} (Duration: {} minutes, Time: {})",
        e.id,
        e.category,
        e.source,
        e.notes,
        e.duration_minutes,
        e.timestamp.to_rfc3339()
    )
}

fn render_focused(events: &[Event]) -> String {
    let mut out = String::new();
    for e in events {
        let embedding = match e.embedding_slice() {
            Some(v) => format!("{} dimensions", v.len()),
            None => "none".to_string(),
        };
        let _ = writeln!(out, "Event {}", e.id);
        let _ = writeln!(out, "  category: {}", e.category);
        let _ = writeln!(out, "  machine: {}", e.source);
        let _ = writeln!(out, "  duration_minutes: {}", e.duration_minutes);
        let _ = writeln!(out, "  timestamp: {}", e.timestamp.to_rfc3339());
        let _ = writeln!(out, "  notes: {}", e.notes);
        let _ = writeln!(out, "  embedding: {}", embedding);
    }
    out
}

fn describe_durations(d: &DurationStats) -> String {
    format!("mean {:.2}, min {:.2}, max {:.2}", d.mean, d.min, d.max)
}

/// Cap `text` at `max_chars` characters, marking the cut.
fn truncate(text: String, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text;
    }

    let keep = max_chars.saturating_sub(TRUNCATION_MARKER.chars().count());
    let cut = text
        .char_indices()
        .nth(keep)
        .map(|(i, _)| i)
        .unwrap_or(text.len());

    let mut out = text[..cut].to_string();
    out.push_str(TRUNCATION_MARKER);
    out
}
