//! Load-balance statistics over the expert fleet.
//!
//! [`compute_stats`] is recomputed from scratch on every engine state
//! change. It reads expert load counts (what was actually dispatched and
//! finished) and the full routing history (what the gate believed), and
//! derives the auxiliary loss and the coefficient of variation of loads.

use crate::expert::Expert;
use crate::token::{RoutingDecision, TokenId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Loads within this fraction of the mean count as balanced.
const BALANCE_TOLERANCE: f64 = 0.2;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricsError {
    #[error("Token {token_id} has {found} gating probabilities, expected {expected}")]
    GatingDimensionMismatch {
        token_id: TokenId,
        expected: usize,
        found: usize,
    },
}

/// Derived fleet statistics. Never mutated independently of its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoeStats {
    /// Number of routing decisions recorded (one per token-expert pair).
    pub total_tokens_processed: usize,
    /// Mean `load_count` across experts.
    pub avg_expert_utilization: f64,
    pub max_expert_load: u64,
    pub min_expert_load: u64,
    /// Every expert load within 20% of the mean.
    pub is_balanced: bool,
    /// `N * sum(f_e * P_e)`. 1.0 is ideal.
    pub auxiliary_loss: f64,
    /// Coefficient of variation of expert loads. 0.0 is ideal.
    pub load_imbalance_factor: f64,
    /// Percentage share of total load per expert.
    pub expert_utilization: Vec<f64>,
    pub tokens_per_expert: Vec<u64>,
}

impl Default for MoeStats {
    fn default() -> Self {
        Self {
            total_tokens_processed: 0,
            avg_expert_utilization: 0.0,
            max_expert_load: 0,
            min_expert_load: 0,
            is_balanced: true,
            auxiliary_loss: 0.0,
            load_imbalance_factor: 0.0,
            expert_utilization: Vec::new(),
            tokens_per_expert: Vec::new(),
        }
    }
}

/// Coarse rating of a metric for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Health {
    Excellent,
    Moderate,
    Poor,
}

impl Health {
    fn from_thresholds(value: f64, excellent_below: f64, moderate_below: f64) -> Self {
        if value < excellent_below {
            Health::Excellent
        } else if value < moderate_below {
            Health::Moderate
        } else {
            Health::Poor
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Health::Excellent => "Excellent",
            Health::Moderate => "Moderate",
            Health::Poor => "Poor",
        }
    }
}

impl MoeStats {
    pub fn auxiliary_loss_health(&self) -> Health {
        Health::from_thresholds(self.auxiliary_loss, 1.2, 1.5)
    }

    pub fn load_imbalance_health(&self) -> Health {
        Health::from_thresholds(self.load_imbalance_factor, 0.3, 0.6)
    }
}

/// Compute fleet statistics from expert loads and the routing history.
///
/// Empty inputs give zero metrics. A history entry whose probability vector
/// does not cover exactly one value per expert is an error.
pub fn compute_stats(
    experts: &[Expert],
    history: &[RoutingDecision],
) -> Result<MoeStats, MetricsError> {
    let loads: Vec<u64> = experts.iter().map(|e| e.load_count).collect();
    let n = loads.len();
    if n == 0 {
        return Ok(MoeStats {
            total_tokens_processed: history.len(),
            ..MoeStats::default()
        });
    }

    let total_load: u64 = loads.iter().sum();
    let avg = total_load as f64 / n as f64;
    let is_balanced = loads
        .iter()
        .all(|&l| (l as f64 - avg).abs() <= avg * BALANCE_TOLERANCE);

    let dispatch_share: Vec<f64> = loads
        .iter()
        .map(|&l| {
            if total_load == 0 {
                0.0
            } else {
                l as f64 / total_load as f64
            }
        })
        .collect();

    let mean_probs = mean_gating_probabilities(history, n)?;
    let auxiliary_loss = n as f64
        * dispatch_share
            .iter()
            .zip(mean_probs.iter())
            .map(|(f, p)| f * p)
            .sum::<f64>();

    Ok(MoeStats {
        total_tokens_processed: history.len(),
        avg_expert_utilization: avg,
        max_expert_load: loads.iter().copied().max().unwrap_or(0),
        min_expert_load: loads.iter().copied().min().unwrap_or(0),
        is_balanced,
        auxiliary_loss,
        load_imbalance_factor: coefficient_of_variation(&loads),
        expert_utilization: dispatch_share.iter().map(|f| f * 100.0).collect(),
        tokens_per_expert: loads,
    })
}

/// Average softmax probability per expert over the distinct tokens in
/// `history`. A token routed to K experts appears K times in the history
/// but is counted once.
fn mean_gating_probabilities(
    history: &[RoutingDecision],
    num_experts: usize,
) -> Result<Vec<f64>, MetricsError> {
    let mut sums = vec![0.0; num_experts];
    let mut seen: HashSet<&str> = HashSet::new();
    for decision in history {
        if !seen.insert(decision.token_id.as_str()) {
            continue;
        }
        if decision.gating_probabilities.len() != num_experts {
            return Err(MetricsError::GatingDimensionMismatch {
                token_id: decision.token_id.clone(),
                expected: num_experts,
                found: decision.gating_probabilities.len(),
            });
        }
        for (sum, p) in sums.iter_mut().zip(&decision.gating_probabilities) {
            *sum += p;
        }
    }
    if seen.is_empty() {
        return Ok(sums);
    }
    let count = seen.len() as f64;
    Ok(sums.into_iter().map(|s| s / count).collect())
}

/// Coefficient of variation (std / mean).
pub fn coefficient_of_variation(values: &[u64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<u64>() as f64 / n;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    variance.sqrt() / mean
}

/// Format stats as a pretty-printed table string.
pub fn format_stats_table(name: &str, stats: &MoeStats, experts: &[Expert]) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n{:=<70}\n", format!("  {} Results  ", name)));
    out.push_str(&format!(
        "  Routing decisions: {} | Experts: {}\n",
        stats.total_tokens_processed,
        experts.len()
    ));
    out.push_str(&format!("{:-<70}\n", "  Load Balancing  "));
    out.push_str(&format!(
        "  Auxiliary loss:        {:>8.4}  ({})\n",
        stats.auxiliary_loss,
        stats.auxiliary_loss_health().label()
    ));
    out.push_str(&format!(
        "  Load imbalance (CV):   {:>8.3}  ({})\n",
        stats.load_imbalance_factor,
        stats.load_imbalance_health().label()
    ));
    out.push_str(&format!(
        "  Load avg/min/max:      {:>8.2} / {} / {}  balanced={}\n",
        stats.avg_expert_utilization,
        stats.min_expert_load,
        stats.max_expert_load,
        stats.is_balanced
    ));
    out.push_str(&format!("{:-<70}\n", "  Expert Utilization  "));
    for (i, expert) in experts.iter().enumerate() {
        let pct = stats.expert_utilization.get(i).copied().unwrap_or(0.0);
        let bar = "#".repeat((pct / 2.5).round() as usize);
        out.push_str(&format!(
            "  E{:<2} {:<20} {:>4} {:>6.1}% {}\n",
            expert.id, expert.specialization, expert.load_count, pct, bar
        ));
    }
    out.push_str(&format!("{:=<70}\n", ""));
    out
}

/// Format a comparison of stats across top-K settings.
pub fn format_comparison_table(results: &[(usize, MoeStats)]) -> String {
    if results.is_empty() {
        return String::from("No results to compare.\n");
    }

    let mut out = String::new();
    out.push_str(&format!("\n{:=<70}\n", "  Top-K Comparison  "));
    out.push_str(&format!(
        "{:<8} {:>10} {:>12} {:>10} {:>10} {:>10}\n",
        "Top-K", "Decisions", "Aux loss", "CV", "Max load", "Balanced"
    ));
    out.push_str(&format!("{:-<70}\n", ""));
    for (k, s) in results {
        out.push_str(&format!(
            "{:<8} {:>10} {:>12.4} {:>10.3} {:>10} {:>10}\n",
            k,
            s.total_tokens_processed,
            s.auxiliary_loss,
            s.load_imbalance_factor,
            s.max_expert_load,
            s.is_balanced,
        ));
    }
    out.push_str(&format!("{:=<70}\n", ""));
    out
}
