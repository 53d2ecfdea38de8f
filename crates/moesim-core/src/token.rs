//! Token model and routing records.
//!
//! A [`Token`] is one unit of simulated work. Its lifecycle only moves
//! forward:
//!
//! ```text
//! idle -> routing -> processing -> complete -> (removed)
//! ```
//!
//! While processing, `ffn_stage` walks `input -> ffn1 -> relu -> ffn2 ->
//! output` for display purposes. Neither sequence ever regresses.

use crate::layout::Position;
use serde::{Deserialize, Serialize};

/// Longest accepted token content, in characters.
pub const MAX_CONTENT_CHARS: usize = 100;

/// Contents used when a token is added without any.
pub const SAMPLE_CONTENTS: [&str; 8] = [
    "Calculate 2+2",
    "Translate text",
    "Analyze data",
    "Generate code",
    "Summarize article",
    "Solve equation",
    "Parse JSON",
    "Optimize query",
];

pub type TokenId = String;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    #[default]
    Idle,
    Routing,
    Processing,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FfnStage {
    Input,
    Ffn1,
    Relu,
    Ffn2,
    Output,
}

impl FfnStage {
    /// The four timed steps after `Input`, in order.
    pub const TIMELINE: [FfnStage; 4] = [
        FfnStage::Ffn1,
        FfnStage::Relu,
        FfnStage::Ffn2,
        FfnStage::Output,
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    pub content: String,
    pub position: Position,
    pub target_experts: Vec<usize>,
    pub routing_weights: Vec<f64>,
    /// Softmax over all experts at routing time.
    pub gating_probabilities: Vec<f64>,
    pub status: TokenStatus,
    pub ffn_stage: Option<FfnStage>,
    pub created_ms: u64,
    /// Target experts whose batch containing this token has not finished yet.
    pub pending_experts: Vec<usize>,
}

impl Token {
    pub fn new(id: TokenId, content: String, position: Position, created_ms: u64) -> Self {
        Self {
            id,
            content,
            position,
            target_experts: Vec::new(),
            routing_weights: Vec::new(),
            gating_probabilities: Vec::new(),
            status: TokenStatus::Idle,
            ffn_stage: None,
            created_ms,
            pending_experts: Vec::new(),
        }
    }

    /// Move to `next` if it is strictly later in the lifecycle.
    pub fn advance_status(&mut self, next: TokenStatus) -> bool {
        if next <= self.status {
            return false;
        }
        self.status = next;
        if next == TokenStatus::Complete {
            self.ffn_stage = Some(FfnStage::Output);
        }
        true
    }

    /// Move the FFN sub-stage forward. Only applies while processing.
    pub fn advance_ffn_stage(&mut self, stage: FfnStage) -> bool {
        if self.status != TokenStatus::Processing {
            return false;
        }
        match self.ffn_stage {
            Some(current) if stage <= current => false,
            _ => {
                self.ffn_stage = Some(stage);
                true
            }
        }
    }

    pub fn targets(&self, expert_id: usize) -> bool {
        self.target_experts.contains(&expert_id)
    }

    pub fn is_awaiting(&self, expert_id: usize) -> bool {
        self.pending_experts.contains(&expert_id)
    }

    /// Record that `expert_id` finished its batch containing this token.
    /// Returns true when that was the last expert owed.
    pub(crate) fn settle_expert(&mut self, expert_id: usize) -> bool {
        self.pending_experts.retain(|&e| e != expert_id);
        self.pending_experts.is_empty()
    }

    /// Routing or processing: the states that count toward an expert's batch size.
    pub fn is_in_flight(&self) -> bool {
        matches!(self.status, TokenStatus::Routing | TokenStatus::Processing)
    }
}

/// Immutable record of one (token, selected expert) routing choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub token_id: TokenId,
    pub expert_id: usize,
    pub weight: f64,
    pub timestamp_ms: u64,
    pub gating_probabilities: Vec<f64>,
}

/// Strip angle brackets and cap the length at [`MAX_CONTENT_CHARS`].
pub fn sanitize_content(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '<' && *c != '>')
        .take(MAX_CONTENT_CHARS)
        .collect()
}
