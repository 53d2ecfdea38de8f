//! Simulated experts.
//!
//! An [`Expert`] is active while at least one processing token targets it.
//! Separately it runs at most one batch at a time. The batch duration is
//! fixed when the batch starts; tokens that arrive while it runs ride along
//! and are settled with it. A batch can end while the expert stays active,
//! because a token it settled may still be waiting on a slower expert.

use crate::config::LayoutSection;
use crate::layout::{circle_position, Position};
use serde::{Deserialize, Serialize};

/// Display labels, cycled by expert index.
pub const SPECIALIZATIONS: [&str; 16] = [
    "Punctuation",
    "Verbs",
    "Conjunctions",
    "Visual Descriptions",
    "Nouns",
    "Adjectives",
    "Prepositions",
    "Numbers & Digits",
    "Articles",
    "Pronouns",
    "Adverbs",
    "Proper Nouns",
    "Auxiliary Verbs",
    "Determiners",
    "Prefixes & Suffixes",
    "Special Characters",
];

/// Display colors, cycled by expert index.
pub const EXPERT_COLORS: [&str; 16] = [
    "#6366f1", "#8b5cf6", "#ec4899", "#f43f5e", "#f59e0b", "#10b981", "#06b6d4", "#3b82f6",
    "#14b8a6", "#84cc16", "#a855f7", "#ef4444", "#22c55e", "#eab308", "#0ea5e9", "#f97316",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expert {
    pub id: usize,
    pub name: String,
    pub specialization: String,
    pub color: String,
    pub position: Position,
    /// Tokens this expert has finished processing. Never decreases within a run.
    pub load_count: u64,
    /// True while any processing token targets this expert.
    pub is_active: bool,
    pub batch_start_ms: Option<u64>,
    pub batch_processing_ms: Option<u64>,
    /// Identifies the in-flight batch so a late timer cannot finish a newer one.
    #[serde(default)]
    pub batch_id: Option<u64>,
}

impl Expert {
    pub fn new(id: usize, position: Position) -> Self {
        Self {
            id,
            name: format!("Expert {}", id + 1),
            specialization: SPECIALIZATIONS[id % SPECIALIZATIONS.len()].to_string(),
            color: EXPERT_COLORS[id % EXPERT_COLORS.len()].to_string(),
            position,
            load_count: 0,
            is_active: false,
            batch_start_ms: None,
            batch_processing_ms: None,
            batch_id: None,
        }
    }

    pub(crate) fn start_batch(&mut self, now_ms: u64, duration_ms: u64, batch_id: u64) {
        self.is_active = true;
        self.batch_start_ms = Some(now_ms);
        self.batch_processing_ms = Some(duration_ms);
        self.batch_id = Some(batch_id);
    }

    /// Credit `completed` tokens and drop the batch. Activity is left to the
    /// engine, which knows whether any processing token still targets us.
    pub(crate) fn finish_batch(&mut self, completed: u64) {
        self.load_count += completed;
        self.clear_batch();
    }

    pub(crate) fn has_batch_in_flight(&self) -> bool {
        self.batch_id.is_some()
    }

    /// Zero the load and drop any in-flight batch; identity and position stay.
    pub(crate) fn reset_load(&mut self) {
        self.load_count = 0;
        self.is_active = false;
        self.clear_batch();
    }

    fn clear_batch(&mut self) {
        self.batch_start_ms = None;
        self.batch_processing_ms = None;
        self.batch_id = None;
    }

    /// Fraction of the current batch elapsed at `now_ms`, in `[0, 1]`.
    /// `None` while idle.
    pub fn batch_progress(&self, now_ms: u64) -> Option<f64> {
        let start = self.batch_start_ms?;
        let duration = self.batch_processing_ms?;
        if duration == 0 {
            return Some(1.0);
        }
        Some((now_ms.saturating_sub(start) as f64 / duration as f64).min(1.0))
    }
}

/// Lay out `count` fresh experts evenly on the expert circle.
pub fn layout_experts(count: usize, layout: &LayoutSection) -> Vec<Expert> {
    (0..count)
        .map(|i| Expert::new(i, circle_position(i, count, layout)))
        .collect()
}
