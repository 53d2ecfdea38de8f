//! TOML configuration parsing for MoESim.
//!
//! Defines the configuration schema for a simulation session: the expert
//! fleet and top-K rule, the animation timings that drive the lifecycle,
//! and the cosmetic layout of experts and tokens.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Fewest experts a session may have.
pub const MIN_EXPERTS: usize = 2;
/// Most experts a session may have.
pub const MAX_EXPERTS: usize = 16;
/// Slowest animation speed.
pub const MIN_ANIMATION_SPEED: f64 = 1.0;
/// Fastest animation speed.
pub const MAX_ANIMATION_SPEED: f64 = 10.0;
/// Animation speed at which virtual time runs at wall-clock pace.
pub const REAL_TIME_SPEED: f64 = 5.0;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Top-level simulation configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub simulation: SimulationSection,
    #[serde(default)]
    pub moe: MoeSection,
    #[serde(default)]
    pub timing: TimingSection,
    #[serde(default)]
    pub layout: LayoutSection,
}

/// General session parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSection {
    /// Human-readable name for this session.
    #[serde(default = "default_sim_name")]
    pub name: String,
    /// Random seed. Without one the gate draws from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Ceiling on concurrently live tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

fn default_sim_name() -> String {
    "moe-playground".to_string()
}
fn default_max_tokens() -> usize {
    18
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            name: default_sim_name(),
            seed: None,
            max_tokens: default_max_tokens(),
        }
    }
}

/// Mixture-of-experts parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoeSection {
    /// Number of experts, in `[MIN_EXPERTS, MAX_EXPERTS]`.
    #[serde(default = "default_num_experts")]
    pub num_experts: usize,
    /// Experts selected per token. Clamped to `[1, num_experts]`.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Playback speed, in `[MIN_ANIMATION_SPEED, MAX_ANIMATION_SPEED]`.
    #[serde(default = "default_animation_speed")]
    pub animation_speed: f64,
}

fn default_num_experts() -> usize {
    8
}
fn default_top_k() -> usize {
    2
}
fn default_animation_speed() -> f64 {
    REAL_TIME_SPEED
}

impl Default for MoeSection {
    fn default() -> Self {
        Self {
            num_experts: default_num_experts(),
            top_k: default_top_k(),
            animation_speed: default_animation_speed(),
        }
    }
}

/// Durations of every scheduled delay, in virtual milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSection {
    /// Hold in `routing` before a token starts processing.
    #[serde(default = "default_routing_delay")]
    pub routing_delay_ms: u64,
    /// Batch duration for a single token.
    #[serde(default = "default_base_processing")]
    pub base_processing_ms: u64,
    /// Extra batch duration per additional token sharing the expert.
    #[serde(default = "default_per_token_processing")]
    pub per_token_processing_ms: u64,
    /// Spacing of the four FFN sub-stage steps.
    #[serde(default = "default_ffn_stage_interval")]
    pub ffn_stage_interval_ms: u64,
    /// How long a completed token stays visible before removal.
    #[serde(default = "default_display_hold")]
    pub display_hold_ms: u64,
    /// Walkthrough: time spent in the tokenizing step.
    #[serde(default = "default_tokenize_step")]
    pub tokenize_step_ms: u64,
    /// Walkthrough: time spent in each scoring/selecting/routing step.
    #[serde(default = "default_pipeline_step")]
    pub pipeline_step_ms: u64,
}

fn default_routing_delay() -> u64 {
    100
}
fn default_base_processing() -> u64 {
    3000
}
fn default_per_token_processing() -> u64 {
    500
}
fn default_ffn_stage_interval() -> u64 {
    600
}
fn default_display_hold() -> u64 {
    1000
}
fn default_tokenize_step() -> u64 {
    1000
}
fn default_pipeline_step() -> u64 {
    1500
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            routing_delay_ms: default_routing_delay(),
            base_processing_ms: default_base_processing(),
            per_token_processing_ms: default_per_token_processing(),
            ffn_stage_interval_ms: default_ffn_stage_interval(),
            display_hold_ms: default_display_hold(),
            tokenize_step_ms: default_tokenize_step(),
            pipeline_step_ms: default_pipeline_step(),
        }
    }
}

impl TimingSection {
    /// Batch duration for `batch_size` tokens sharing one expert.
    pub fn batch_processing_ms(&self, batch_size: usize) -> u64 {
        let extra = batch_size.saturating_sub(1) as u64;
        self.base_processing_ms + extra * self.per_token_processing_ms
    }
}

/// Visual layout. Cosmetic only; nothing in the lifecycle depends on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutSection {
    #[serde(default = "default_center_x")]
    pub center_x: f64,
    #[serde(default = "default_center_y")]
    pub center_y: f64,
    /// Radius of the expert circle.
    #[serde(default = "default_expert_radius")]
    pub expert_radius: f64,
    /// Minimum distance between two live tokens.
    #[serde(default = "default_token_min_distance")]
    pub token_min_distance: f64,
    /// Random placement attempts before falling back to the center.
    #[serde(default = "default_max_placement_attempts")]
    pub max_placement_attempts: u32,
}

fn default_center_x() -> f64 {
    450.0
}
fn default_center_y() -> f64 {
    325.0
}
fn default_expert_radius() -> f64 {
    230.0
}
fn default_token_min_distance() -> f64 {
    32.0
}
fn default_max_placement_attempts() -> u32 {
    100
}

impl Default for LayoutSection {
    fn default() -> Self {
        Self {
            center_x: default_center_x(),
            center_y: default_center_y(),
            expert_radius: default_expert_radius(),
            token_min_distance: default_token_min_distance(),
            max_placement_attempts: default_max_placement_attempts(),
        }
    }
}

impl SimConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        let mut config: SimConfig = toml::from_str(s)?;
        config.validate()?;
        config.moe.top_k = config.moe.top_k.clamp(1, config.moe.num_experts);
        Ok(config)
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_EXPERTS..=MAX_EXPERTS).contains(&self.moe.num_experts) {
            return Err(ConfigError::Validation(format!(
                "num_experts must be in [{}, {}], got {}",
                MIN_EXPERTS, MAX_EXPERTS, self.moe.num_experts
            )));
        }
        if !(MIN_ANIMATION_SPEED..=MAX_ANIMATION_SPEED).contains(&self.moe.animation_speed) {
            return Err(ConfigError::Validation(format!(
                "animation_speed must be in [{}, {}], got {}",
                MIN_ANIMATION_SPEED, MAX_ANIMATION_SPEED, self.moe.animation_speed
            )));
        }
        if self.simulation.max_tokens == 0 {
            return Err(ConfigError::Validation(
                "max_tokens must be > 0".to_string(),
            ));
        }
        if self.timing.base_processing_ms == 0 {
            return Err(ConfigError::Validation(
                "base_processing_ms must be > 0".to_string(),
            ));
        }
        if self.layout.expert_radius <= 0.0 {
            return Err(ConfigError::Validation(
                "expert_radius must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
