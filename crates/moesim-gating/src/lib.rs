//! Gating for MoESim: scoring, softmax and top-K selection.
//!
//! This crate holds the pure, side-effect-free half of the simulator:
//!
//! | Step | Function | Output |
//! |------|----------|--------|
//! | Score | [`GatingNetwork::score`] | one raw score per expert |
//! | Confidence | [`softmax`] | probability per expert |
//! | Select | [`select_top_k`] | K expert indices |
//! | Weight | [`normalize_weights`] | K weights summing to 1.0 |
//!
//! [`route_token`] chains all four for a single token.

pub mod scoring;
pub mod top_k;
pub mod traits;

pub use scoring::{compute_gating_scores, content_factor, softmax, NoisyLengthGate};
pub use top_k::{clamp_top_k, normalize_weights, select_top_k};
pub use traits::*;

use rand::RngCore;

/// Build a [`GatingDecision`] from an already computed score vector.
///
/// `top_k` is clamped to `[1, scores.len()]` here, so callers may pass the
/// raw configured value.
pub fn decide_from_scores(scores: Vec<f64>, top_k: usize) -> GatingDecision {
    let k = clamp_top_k(top_k, scores.len());
    let selected = select_top_k(&scores, k);
    decide_with_selection(scores, selected)
}

/// Build a [`GatingDecision`] for experts that were already selected from
/// `scores`, e.g. a selection shown to the user before the token is routed.
pub fn decide_with_selection(scores: Vec<f64>, target_experts: Vec<usize>) -> GatingDecision {
    let gating_probabilities = softmax(&scores);
    let routing_weights = normalize_weights(&scores, &target_experts);
    GatingDecision {
        scores,
        gating_probabilities,
        target_experts,
        routing_weights,
    }
}

/// Score a token with `gate` and pick its experts.
pub fn route_token(
    gate: &dyn GatingNetwork,
    content: &str,
    num_experts: usize,
    top_k: usize,
    rng: &mut dyn RngCore,
) -> GatingDecision {
    let scores = gate.score(content, num_experts, rng);
    decide_from_scores(scores, top_k)
}
