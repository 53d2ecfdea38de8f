//! MoE Sim — Discrete-event simulator for Mixture-of-Experts token routing.
//!
//! This crate models a pool of experts, the tokens routed to them, and the
//! batching of those tokens on each expert. Gating (scoring and top-K
//! selection) comes from `moesim-gating`; everything time-dependent runs on
//! a virtual clock so a whole session can be replayed deterministically.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐     ┌───────────┐     ┌──────────────┐
//! │   Text   │────▶│  Engine   │────▶│   Metrics    │
//! │  Input   │     │ (Events)  │     │ aux loss, CV │
//! └──────────┘     └─────┬─────┘     └──────────────┘
//!                        │
//!                ┌───────┴───────┐
//!                │    Gating     │
//!                │ (score, top-K)│
//!                └───────┬───────┘
//!                        │
//!          ┌─────────────┼─────────────┐
//!          ▼             ▼             ▼
//!    ┌──────────┐  ┌──────────┐  ┌──────────┐
//!    │ Expert 0 │  │ Expert 1 │  │ Expert N │
//!    │  batch   │  │  batch   │  │  batch   │
//!    └──────────┘  └──────────┘  └──────────┘
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod events;
pub mod expert;
pub mod layout;
pub mod metrics;
pub mod pipeline;
pub mod scheduler;
pub mod token;

// Re-export key types for convenience.
pub use clock::SimClock;
pub use config::{ConfigError, SimConfig};
pub use engine::{EngineError, EngineSnapshot, SimulationEngine};
pub use events::{EngineEvent, EngineObserver};
pub use expert::Expert;
pub use layout::Position;
pub use metrics::{compute_stats, Health, MetricsError, MoeStats};
pub use pipeline::{AnimationState, AnimationStep};
pub use token::{FfnStage, RoutingDecision, Token, TokenStatus};

/// Seed used for comparisons when the config does not pin one.
pub const DEFAULT_COMPARE_SEED: u64 = 42;

/// Walk `text` through the tokenize-and-route pipeline and run the
/// simulation until nothing is left scheduled.
pub fn run_text(config: SimConfig, text: &str) -> Result<EngineSnapshot, EngineError> {
    let mut engine = SimulationEngine::new(config);
    engine.submit_text(text)?;
    engine.run_until_idle();
    Ok(engine.snapshot())
}

/// Run the same text under each top-K setting, with the same seed, and
/// return the final stats per K.
pub fn compare_top_k(
    config: &SimConfig,
    text: &str,
    top_ks: &[usize],
) -> Result<Vec<(usize, MoeStats)>, EngineError> {
    top_ks
        .iter()
        .map(|&k| {
            let mut cfg = config.clone();
            cfg.simulation.seed = Some(cfg.simulation.seed.unwrap_or(DEFAULT_COMPARE_SEED));
            cfg.moe.top_k = k.clamp(1, cfg.moe.num_experts);
            let snapshot = run_text(cfg, text)?;
            Ok((snapshot.config.moe.top_k, snapshot.stats))
        })
        .collect()
}
