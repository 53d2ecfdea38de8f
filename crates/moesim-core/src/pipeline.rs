//! Tokenize-and-route walkthrough state.
//!
//! The walkthrough slows the routing of a sentence down into visible steps:
//!
//! ```text
//! idle -> tokenizing -> [scoring -> selecting -> routing] per word -> complete -> idle
//! ```
//!
//! This module holds the state and its transitions; the engine decides
//! when each transition happens.

use crate::token::sanitize_content;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimationStep {
    #[default]
    Idle,
    Tokenizing,
    Scoring,
    Selecting,
    Routing,
    Complete,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationState {
    pub current_step: AnimationStep,
    /// Word currently being walked through.
    pub current_token_index: Option<usize>,
    pub words: Vec<String>,
    /// Preview scores for the current word.
    pub expert_scores: Vec<f64>,
    /// Preview selection for the current word.
    pub selected_experts: Vec<usize>,
    /// Every expert selected so far in this walkthrough, in first-seen order.
    pub all_selected_experts: Vec<usize>,
    pub is_running: bool,
}

impl AnimationState {
    pub(crate) fn begin(&mut self, words: Vec<String>) {
        *self = AnimationState {
            current_step: AnimationStep::Tokenizing,
            words,
            is_running: true,
            ..AnimationState::default()
        };
    }

    pub(crate) fn enter_scoring(&mut self, index: usize, scores: Vec<f64>) {
        self.current_step = AnimationStep::Scoring;
        self.current_token_index = Some(index);
        self.expert_scores = scores;
        self.selected_experts.clear();
    }

    pub(crate) fn enter_selecting(&mut self, selected: Vec<usize>) {
        self.current_step = AnimationStep::Selecting;
        for &e in &selected {
            if !self.all_selected_experts.contains(&e) {
                self.all_selected_experts.push(e);
            }
        }
        self.selected_experts = selected;
    }

    pub(crate) fn enter_routing(&mut self) {
        self.current_step = AnimationStep::Routing;
    }

    pub(crate) fn complete(&mut self) {
        self.current_step = AnimationStep::Complete;
        self.current_token_index = None;
    }

    pub fn word(&self, index: usize) -> Option<&str> {
        self.words.get(index).map(String::as_str)
    }

    /// Human-readable description of the current step.
    pub fn describe(&self, top_k: usize) -> String {
        match self.current_step {
            AnimationStep::Idle => {
                "Enter text to tokenize and route through the MoE network".to_string()
            }
            AnimationStep::Tokenizing => {
                format!("Tokenizing: split input into {} word(s)", self.words.len())
            }
            AnimationStep::Scoring => format!(
                "Scoring: computing gating scores for token \"{}\"",
                self.current_token_index
                    .and_then(|i| self.word(i))
                    .unwrap_or_default()
            ),
            AnimationStep::Selecting => {
                format!("Selecting: choosing top-{} experts with highest scores", top_k)
            }
            AnimationStep::Routing => {
                "Routing: normalizing weights and routing token to selected experts".to_string()
            }
            AnimationStep::Complete => "Complete! Tokens have been routed to experts".to_string(),
        }
    }
}

/// Split input text into word tokens.
///
/// The whole input is sanitized first (angle brackets removed, length
/// capped) and then split on whitespace.
pub fn tokenize(text: &str) -> Vec<String> {
    sanitize_content(text)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}
