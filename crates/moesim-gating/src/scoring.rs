//! Simulated gating scores.
//!
//! There is no learned gate. Each (token, expert) pair gets a fresh uniform
//! draw, blended with a small bias derived from the token's length:
//!
//! ```text
//! raw = U[0,1) * 0.7 + ((len(content) mod 10) / 10) * 0.3
//! ```
//!
//! The softmax of the raw vector is what the metrics treat as the gate's
//! confidence (`P_e` in the auxiliary loss).

use crate::traits::GatingNetwork;
use rand::{Rng, RngCore};

/// Weight of the random component in a raw score.
pub const NOISE_WEIGHT: f64 = 0.7;
/// Weight of the content-length component in a raw score.
pub const CONTENT_WEIGHT: f64 = 0.3;

/// Untrained gate: uniform noise plus a content-length bias.
#[derive(Debug, Clone)]
pub struct NoisyLengthGate {
    noise_weight: f64,
    content_weight: f64,
}

impl NoisyLengthGate {
    pub fn new() -> Self {
        Self {
            noise_weight: NOISE_WEIGHT,
            content_weight: CONTENT_WEIGHT,
        }
    }
}

impl Default for NoisyLengthGate {
    fn default() -> Self {
        Self::new()
    }
}

impl GatingNetwork for NoisyLengthGate {
    fn score(&self, content: &str, num_experts: usize, rng: &mut dyn RngCore) -> Vec<f64> {
        let bias = content_factor(content) * self.content_weight;
        (0..num_experts)
            .map(|_| rng.gen::<f64>() * self.noise_weight + bias)
            .collect()
    }

    fn name(&self) -> &str {
        "noisy_length"
    }
}

/// `(character count mod 10) / 10`, in `[0.0, 0.9]`.
pub fn content_factor(content: &str) -> f64 {
    (content.chars().count() % 10) as f64 / 10.0
}

/// Score `content` against `num_experts` experts with the default gate.
pub fn compute_gating_scores(content: &str, num_experts: usize, rng: &mut dyn RngCore) -> Vec<f64> {
    NoisyLengthGate::new().score(content, num_experts, rng)
}

/// Numerically stable softmax (max-subtracted).
///
/// Returns an empty vector for empty input.
pub fn softmax(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}
