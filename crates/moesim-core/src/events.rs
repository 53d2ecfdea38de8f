//! Scheduled events and change notifications.
//!
//! [`SimEvent`]s are what the engine puts on its own queue: each one is a
//! delayed action against a token or expert that may no longer exist by the
//! time it fires. [`EngineEvent`]s are what the engine tells observers after
//! a state change has been applied.

use crate::metrics::MoeStats;
use crate::pipeline::AnimationStep;
use crate::token::{FfnStage, TokenId};
use serde::{Deserialize, Serialize};

/// Delayed actions driving the token and expert lifecycles.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// Routing hold elapsed: the token starts processing.
    EnterProcessing { token_id: TokenId },
    /// Display-only FFN sub-stage step.
    AdvanceFfnStage { token_id: TokenId, stage: FfnStage },
    /// An expert's batch timer expired.
    ExpertBatchComplete { expert_id: usize, batch_id: u64 },
    /// Display hold elapsed for a completed token.
    RemoveCompleted { token_id: TokenId },
    /// Next step of the tokenize-and-route walkthrough.
    Pipeline(PipelineStep),
}

/// Walkthrough steps, each for the word at `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Score { index: usize },
    Select { index: usize },
    Route { index: usize },
    Dispatch { index: usize },
    Finish,
}

/// Notification sent to observers after every state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Initialized { num_experts: usize },
    Reset,
    ConfigChanged,
    PlaybackChanged { is_playing: bool },
    TokenAdded { token_id: TokenId },
    TokenProcessing { token_id: TokenId },
    FfnStageAdvanced { token_id: TokenId, stage: FfnStage },
    ExpertBatchStarted {
        expert_id: usize,
        batch_size: usize,
        duration_ms: u64,
    },
    ExpertBatchCompleted {
        expert_id: usize,
        tokens_completed: u64,
    },
    TokenCompleted { token_id: TokenId },
    TokenRemoved { token_id: TokenId },
    PipelineStepChanged { step: AnimationStep },
}

/// Receives every engine change, e.g. a presentation layer redrawing.
pub trait EngineObserver: Send {
    fn on_event(&mut self, event: &EngineEvent, now_ms: u64, stats: &MoeStats);
}
