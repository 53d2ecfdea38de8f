//! Gating network trait definitions.
//!
//! A [`GatingNetwork`] turns a token's content into one raw score per expert.
//! The simulator never trains a gate; implementations are free to be
//! stochastic, which is why the random source is passed in by the caller.

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Outcome of gating a single token against the full expert set.
///
/// `target_experts` and `routing_weights` are parallel arrays of length K.
/// `gating_probabilities` covers every expert, not just the selected ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatingDecision {
    /// Raw (pre-softmax) score per expert.
    pub scores: Vec<f64>,
    /// Softmax over `scores`.
    pub gating_probabilities: Vec<f64>,
    /// Selected expert indices, highest score first.
    pub target_experts: Vec<usize>,
    /// Normalized weights of the selected experts; sums to 1.0.
    pub routing_weights: Vec<f64>,
}

/// The gate that scores tokens against experts.
///
/// Implementations must not keep random state of their own: every draw goes
/// through the `rng` argument so that callers can inject a deterministic
/// source in tests and so that two tokens never share hidden state.
pub trait GatingNetwork: Send + Sync {
    /// Produce one raw score per expert for `content`.
    fn score(&self, content: &str, num_experts: usize, rng: &mut dyn RngCore) -> Vec<f64>;

    /// Human-readable name for reports.
    fn name(&self) -> &str;
}
