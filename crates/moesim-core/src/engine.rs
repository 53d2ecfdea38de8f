//! Discrete-event simulation engine for MoE token routing.
//!
//! The engine owns every expert, token and routing record, and is the only
//! thing allowed to mutate them. Time-driven lifecycle steps are scheduled
//! on an [`EventQueue`] over a virtual [`SimClock`]; callers move time
//! forward with [`SimulationEngine::advance_by`], [`SimulationEngine::tick`]
//! or [`SimulationEngine::run_until_idle`].
//!
//! Scheduled events cannot be cancelled. Each is tagged with the epoch it
//! was scheduled in, and every handler re-checks that its token or expert
//! still exists and is still in the expected state before touching it.

use crate::clock::SimClock;
use crate::config::{
    SimConfig, MAX_ANIMATION_SPEED, MAX_EXPERTS, MIN_ANIMATION_SPEED, MIN_EXPERTS,
    REAL_TIME_SPEED,
};
use crate::events::{EngineEvent, EngineObserver, PipelineStep, SimEvent};
use crate::expert::{layout_experts, Expert};
use crate::layout::{place_token, Position};
use crate::metrics::{compute_stats, MoeStats};
use crate::pipeline::{tokenize, AnimationState};
use crate::scheduler::EventQueue;
use crate::token::{
    sanitize_content, FfnStage, RoutingDecision, Token, TokenId, TokenStatus, SAMPLE_CONTENTS,
};
use moesim_gating::{
    clamp_top_k, decide_from_scores, decide_with_selection, select_top_k, GatingDecision,
    GatingNetwork, NoisyLengthGate,
};
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Token capacity exceeded: {live}/{max} live, {requested} requested")]
    CapacityExceeded {
        live: usize,
        max: usize,
        requested: usize,
    },
    #[error("A tokenize-and-route walkthrough is already running")]
    PipelineBusy,
    #[error("Input contains no words")]
    EmptyInput,
    #[error("Expert count {requested} outside [{min}, {max}]")]
    InvalidExpertCount {
        requested: usize,
        min: usize,
        max: usize,
    },
    #[error("Animation speed {0} outside [1, 10]")]
    InvalidAnimationSpeed(f64),
}

/// Read-only copy of everything a presentation layer draws.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub now_ms: u64,
    pub is_playing: bool,
    pub config: SimConfig,
    pub experts: Vec<Expert>,
    pub tokens: Vec<Token>,
    pub routing_history: Vec<RoutingDecision>,
    pub stats: MoeStats,
    pub animation: AnimationState,
}

/// The main simulation engine.
pub struct SimulationEngine {
    config: SimConfig,
    clock: SimClock,
    queue: EventQueue<SimEvent>,
    /// Bumped on initialize and reset; older scheduled events are stale.
    epoch: u64,
    experts: Vec<Expert>,
    /// Live tokens in creation order.
    tokens: Vec<Token>,
    routing_history: Vec<RoutingDecision>,
    stats: MoeStats,
    animation: AnimationState,
    is_playing: bool,
    gate: Box<dyn GatingNetwork>,
    rng: Box<dyn RngCore + Send>,
    observers: Vec<Box<dyn EngineObserver>>,
    token_sequence: u64,
    batch_sequence: u64,
    /// Sub-millisecond remainder carried between scaled ticks.
    tick_carry_ms: f64,
    /// Total scheduled events delivered, stale ones included.
    pub events_processed: u64,
}

impl SimulationEngine {
    /// Create an engine from config. Uses the configured seed, or OS entropy
    /// when none is set.
    pub fn new(config: SimConfig) -> Self {
        let rng: Box<dyn RngCore + Send> = match config.simulation.seed {
            Some(seed) => Box::new(ChaCha8Rng::seed_from_u64(seed)),
            None => Box::new(ChaCha8Rng::from_entropy()),
        };
        Self::with_rng(config, rng)
    }

    /// Create an engine drawing all randomness from `rng`.
    pub fn with_rng(config: SimConfig, rng: Box<dyn RngCore + Send>) -> Self {
        let num_experts = config.moe.num_experts.clamp(MIN_EXPERTS, MAX_EXPERTS);
        let mut engine = Self {
            config,
            clock: SimClock::new(),
            queue: EventQueue::new(),
            epoch: 0,
            experts: Vec::new(),
            tokens: Vec::new(),
            routing_history: Vec::new(),
            stats: MoeStats::default(),
            animation: AnimationState::default(),
            is_playing: true,
            gate: Box::new(NoisyLengthGate::new()),
            rng,
            observers: Vec::new(),
            token_sequence: 0,
            batch_sequence: 0,
            tick_carry_ms: 0.0,
            events_processed: 0,
        };
        engine.rebuild(num_experts);
        engine
    }

    /// Replace the gating network.
    pub fn with_gate(mut self, gate: Box<dyn GatingNetwork>) -> Self {
        self.gate = gate;
        self
    }

    /// Register an observer notified after every state change.
    pub fn subscribe(&mut self, observer: Box<dyn EngineObserver>) {
        self.observers.push(observer);
    }

    // --- Lifecycle operations ---

    /// Lay out `num_experts` fresh experts and clear all tokens and history.
    pub fn initialize(&mut self, num_experts: usize) -> Result<(), EngineError> {
        check_expert_count(num_experts)?;
        self.rebuild(num_experts);
        Ok(())
    }

    fn rebuild(&mut self, num_experts: usize) {
        self.config.moe.num_experts = num_experts;
        self.config.moe.top_k = clamp_top_k(self.config.moe.top_k, num_experts);
        self.experts = layout_experts(num_experts, &self.config.layout);
        self.clear_run_state();
        info!(num_experts, top_k = self.config.moe.top_k, "Initialized simulation");
        self.commit(EngineEvent::Initialized { num_experts });
    }

    /// Clear tokens and history and zero expert loads. Experts keep their
    /// identity and position.
    pub fn reset(&mut self) {
        for expert in &mut self.experts {
            expert.reset_load();
        }
        self.clear_run_state();
        info!("Reset simulation");
        self.commit(EngineEvent::Reset);
    }

    fn clear_run_state(&mut self) {
        self.tokens.clear();
        self.routing_history.clear();
        self.animation = AnimationState::default();
        self.epoch += 1;
    }

    /// Add one token and route it immediately.
    ///
    /// Without content (or with content that sanitizes to nothing) a sample
    /// string is used. Fails with [`EngineError::CapacityExceeded`] when the
    /// live-token ceiling is reached; state is unchanged in that case.
    pub fn add_token(&mut self, content: Option<&str>) -> Result<TokenId, EngineError> {
        self.ensure_capacity(1)?;
        let content = match content.map(sanitize_content) {
            Some(c) if !c.is_empty() => c,
            _ => SAMPLE_CONTENTS
                .choose(&mut *self.rng)
                .copied()
                .unwrap_or(SAMPLE_CONTENTS[0])
                .to_string(),
        };
        let scores = self
            .gate
            .score(&content, self.experts.len(), &mut *self.rng);
        let decision = decide_from_scores(scores, self.config.moe.top_k);
        Ok(self.admit_token(content, decision))
    }

    /// Create and schedule a token whose routing is already decided.
    fn admit_token(&mut self, content: String, decision: GatingDecision) -> TokenId {
        let now = self.clock.now_ms();
        let token_id = format!("token-{}-{}", now, self.token_sequence);
        self.token_sequence += 1;

        let occupied: Vec<Position> = self.tokens.iter().map(|t| t.position).collect();
        let position = place_token(&occupied, &self.config.layout, &mut *self.rng);

        let mut token = Token::new(token_id.clone(), content, position, now);
        token.target_experts = decision.target_experts;
        token.routing_weights = decision.routing_weights;
        token.gating_probabilities = decision.gating_probabilities;
        token.pending_experts = token.target_experts.clone();
        token.advance_status(TokenStatus::Routing);

        for (&expert_id, &weight) in token.target_experts.iter().zip(&token.routing_weights) {
            self.routing_history.push(RoutingDecision {
                token_id: token_id.clone(),
                expert_id,
                weight,
                timestamp_ms: now,
                gating_probabilities: token.gating_probabilities.clone(),
            });
        }
        debug!(
            token_id = %token_id,
            content = %token.content,
            experts = ?token.target_experts,
            "Routed token"
        );
        self.tokens.push(token);

        self.schedule_after(
            self.config.timing.routing_delay_ms,
            SimEvent::EnterProcessing {
                token_id: token_id.clone(),
            },
        );
        self.commit(EngineEvent::TokenAdded {
            token_id: token_id.clone(),
        });
        token_id
    }

    /// Remove a live token immediately. Its pending callbacks become no-ops;
    /// an expert batch that included it finishes without counting it.
    pub fn remove_token(&mut self, token_id: &str) -> bool {
        let before = self.tokens.len();
        self.tokens.retain(|t| t.id != token_id);
        if self.tokens.len() == before {
            return false;
        }
        debug!(token_id = %token_id, "Removed token externally");
        self.commit(EngineEvent::TokenRemoved {
            token_id: token_id.to_string(),
        });
        true
    }

    /// Start the tokenize-and-route walkthrough for `text`.
    ///
    /// Returns the number of words that will be routed.
    pub fn submit_text(&mut self, text: &str) -> Result<usize, EngineError> {
        if self.animation.is_running {
            warn!("Rejected text: walkthrough already running");
            return Err(EngineError::PipelineBusy);
        }
        let words = tokenize(text);
        if words.is_empty() {
            return Err(EngineError::EmptyInput);
        }
        self.ensure_capacity(words.len())?;

        let count = words.len();
        self.animation.begin(words);
        self.schedule_after(
            self.config.timing.tokenize_step_ms,
            SimEvent::Pipeline(PipelineStep::Score { index: 0 }),
        );
        debug!(words = count, "Started walkthrough");
        self.commit(EngineEvent::PipelineStepChanged {
            step: self.animation.current_step,
        });
        Ok(count)
    }

    fn ensure_capacity(&self, requested: usize) -> Result<(), EngineError> {
        if requested > self.remaining_capacity() {
            warn!(
                live = self.tokens.len(),
                max = self.config.simulation.max_tokens,
                requested,
                "Rejected tokens: capacity exceeded"
            );
            return Err(EngineError::CapacityExceeded {
                live: self.tokens.len(),
                max: self.config.simulation.max_tokens,
                requested,
            });
        }
        Ok(())
    }

    // --- Configuration ---

    /// Set top-K, clamped to `[1, num_experts]`.
    pub fn set_top_k(&mut self, k: usize) {
        self.config.moe.top_k = clamp_top_k(k, self.experts.len());
        info!(top_k = self.config.moe.top_k, "Set top-k");
        self.commit(EngineEvent::ConfigChanged);
    }

    /// Change the expert count. Re-initializes the whole simulation.
    pub fn set_num_experts(&mut self, n: usize) -> Result<(), EngineError> {
        self.initialize(n)
    }

    pub fn set_animation_speed(&mut self, speed: f64) -> Result<(), EngineError> {
        if !(MIN_ANIMATION_SPEED..=MAX_ANIMATION_SPEED).contains(&speed) {
            return Err(EngineError::InvalidAnimationSpeed(speed));
        }
        self.config.moe.animation_speed = speed;
        self.commit(EngineEvent::ConfigChanged);
        Ok(())
    }

    pub fn play(&mut self) {
        self.set_playing(true);
    }

    pub fn pause(&mut self) {
        self.set_playing(false);
    }

    pub fn toggle_playback(&mut self) {
        self.set_playing(!self.is_playing);
    }

    fn set_playing(&mut self, is_playing: bool) {
        if self.is_playing == is_playing {
            return;
        }
        self.is_playing = is_playing;
        self.commit(EngineEvent::PlaybackChanged { is_playing });
    }

    // --- Time ---

    /// Advance virtual time by `delta_ms`, delivering every event due.
    pub fn advance_by(&mut self, delta_ms: u64) {
        let target = self.clock.now_ms().saturating_add(delta_ms);
        self.advance_to(target);
    }

    /// Advance virtual time to `target_ms`, delivering every event due.
    /// A target in the past is ignored.
    pub fn advance_to(&mut self, target_ms: u64) {
        if target_ms < self.clock.now_ms() {
            return;
        }
        while let Some(scheduled) = self.queue.pop_due(target_ms) {
            self.clock.advance_to_ms(scheduled.time_ms);
            self.deliver(scheduled.epoch, scheduled.event);
        }
        self.clock.advance_to_ms(target_ms);
    }

    /// Deliver events until the queue is empty. Returns the final time.
    pub fn run_until_idle(&mut self) -> u64 {
        while let Some(scheduled) = self.queue.pop_next() {
            self.clock.advance_to_ms(scheduled.time_ms);
            self.deliver(scheduled.epoch, scheduled.event);
        }
        self.clock.now_ms()
    }

    /// Advance by wall-clock time scaled by the animation speed.
    /// Does nothing while paused.
    pub fn tick(&mut self, wall_elapsed_ms: u64) {
        if !self.is_playing {
            return;
        }
        let scaled = wall_elapsed_ms as f64 * self.config.moe.animation_speed / REAL_TIME_SPEED
            + self.tick_carry_ms;
        let whole = scaled.floor();
        self.tick_carry_ms = scaled - whole;
        self.advance_by(whole as u64);
    }

    fn schedule_after(&mut self, delay_ms: u64, event: SimEvent) {
        self.queue
            .schedule_after(self.clock.now_ms(), delay_ms, self.epoch, event);
    }

    fn deliver(&mut self, epoch: u64, event: SimEvent) {
        self.events_processed += 1;
        if epoch != self.epoch {
            trace!(?event, "Dropped event from before reset");
            return;
        }
        match event {
            SimEvent::EnterProcessing { token_id } => self.handle_enter_processing(&token_id),
            SimEvent::AdvanceFfnStage { token_id, stage } => {
                self.handle_ffn_stage(&token_id, stage)
            }
            SimEvent::ExpertBatchComplete {
                expert_id,
                batch_id,
            } => self.complete_expert_batch(expert_id, batch_id),
            SimEvent::RemoveCompleted { token_id } => self.handle_remove_completed(&token_id),
            SimEvent::Pipeline(step) => self.handle_pipeline_step(step),
        }
    }

    // --- Event handlers ---

    fn handle_enter_processing(&mut self, token_id: &str) {
        let now = self.clock.now_ms();
        let targets = match self.token_mut(token_id) {
            Some(token) if token.status == TokenStatus::Routing => {
                token.advance_status(TokenStatus::Processing);
                token.advance_ffn_stage(FfnStage::Input);
                token.target_experts.clone()
            }
            _ => {
                trace!(token_id = %token_id, "Stale processing event");
                return;
            }
        };
        debug!(token_id = %token_id, "Token processing");

        let interval = self.config.timing.ffn_stage_interval_ms;
        for (i, stage) in FfnStage::TIMELINE.iter().enumerate() {
            self.schedule_after(
                interval * (i as u64 + 1),
                SimEvent::AdvanceFfnStage {
                    token_id: token_id.to_string(),
                    stage: *stage,
                },
            );
        }

        let mut started = Vec::new();
        for expert_id in targets {
            if self.experts[expert_id].has_batch_in_flight() {
                continue;
            }
            let batch_size = self
                .tokens
                .iter()
                .filter(|t| t.is_in_flight() && t.is_awaiting(expert_id))
                .count();
            let duration = self.config.timing.batch_processing_ms(batch_size);
            self.batch_sequence += 1;
            let batch_id = self.batch_sequence;
            self.experts[expert_id].start_batch(now, duration, batch_id);
            self.schedule_after(
                duration,
                SimEvent::ExpertBatchComplete {
                    expert_id,
                    batch_id,
                },
            );
            debug!(expert_id, batch_size, duration_ms = duration, "Expert batch started");
            started.push(EngineEvent::ExpertBatchStarted {
                expert_id,
                batch_size,
                duration_ms: duration,
            });
        }

        self.commit(EngineEvent::TokenProcessing {
            token_id: token_id.to_string(),
        });
        for event in started {
            self.emit(&event);
        }
    }

    fn handle_ffn_stage(&mut self, token_id: &str, stage: FfnStage) {
        let advanced = self
            .token_mut(token_id)
            .map(|t| t.advance_ffn_stage(stage))
            .unwrap_or(false);
        if advanced {
            self.commit(EngineEvent::FfnStageAdvanced {
                token_id: token_id.to_string(),
                stage,
            });
        }
    }

    /// Finish an expert's in-flight batch.
    ///
    /// Every processing token still waiting on this expert is credited to it.
    /// Tokens with no experts left owing move to `complete` and are scheduled
    /// for removal after the display hold. The expert stays active while a
    /// token it settled is still processing on another expert.
    fn complete_expert_batch(&mut self, expert_id: usize, batch_id: u64) {
        let current = self
            .experts
            .get(expert_id)
            .and_then(|e| e.batch_id);
        if current != Some(batch_id) {
            trace!(expert_id, batch_id, "Stale batch completion");
            return;
        }

        let mut credited = 0u64;
        let mut finished: Vec<TokenId> = Vec::new();
        for token in &mut self.tokens {
            if token.status != TokenStatus::Processing || !token.is_awaiting(expert_id) {
                continue;
            }
            credited += 1;
            if token.settle_expert(expert_id) {
                token.advance_status(TokenStatus::Complete);
                finished.push(token.id.clone());
            }
        }
        self.experts[expert_id].finish_batch(credited);
        debug!(expert_id, tokens_completed = credited, "Expert batch completed");

        for token_id in &finished {
            self.schedule_after(
                self.config.timing.display_hold_ms,
                SimEvent::RemoveCompleted {
                    token_id: token_id.clone(),
                },
            );
        }

        self.commit(EngineEvent::ExpertBatchCompleted {
            expert_id,
            tokens_completed: credited,
        });
        for token_id in finished {
            self.emit(&EngineEvent::TokenCompleted { token_id });
        }
    }

    fn handle_remove_completed(&mut self, token_id: &str) {
        let ready = self
            .token(token_id)
            .map(|t| t.status == TokenStatus::Complete && t.pending_experts.is_empty())
            .unwrap_or(false);
        if !ready {
            trace!(token_id = %token_id, "Stale removal event");
            return;
        }
        self.tokens.retain(|t| t.id != token_id);
        debug!(token_id = %token_id, "Removed completed token");
        self.commit(EngineEvent::TokenRemoved {
            token_id: token_id.to_string(),
        });
    }

    fn handle_pipeline_step(&mut self, step: PipelineStep) {
        if !self.animation.is_running {
            return;
        }
        let step_ms = self.config.timing.pipeline_step_ms;
        match step {
            PipelineStep::Score { index } => {
                let Some(word) = self.animation.word(index).map(str::to_string) else {
                    return;
                };
                let scores = self.gate.score(&word, self.experts.len(), &mut *self.rng);
                self.animation.enter_scoring(index, scores);
                self.schedule_after(step_ms, SimEvent::Pipeline(PipelineStep::Select { index }));
            }
            PipelineStep::Select { index } => {
                let k = clamp_top_k(self.config.moe.top_k, self.animation.expert_scores.len());
                let selected = select_top_k(&self.animation.expert_scores, k);
                self.animation.enter_selecting(selected);
                self.schedule_after(step_ms, SimEvent::Pipeline(PipelineStep::Route { index }));
            }
            PipelineStep::Route { index } => {
                self.animation.enter_routing();
                self.schedule_after(
                    step_ms,
                    SimEvent::Pipeline(PipelineStep::Dispatch { index }),
                );
            }
            PipelineStep::Dispatch { index } => {
                if let Some(word) = self.animation.word(index).map(str::to_string) {
                    match self.ensure_capacity(1) {
                        Ok(()) => {
                            let decision = decide_with_selection(
                                self.animation.expert_scores.clone(),
                                self.animation.selected_experts.clone(),
                            );
                            self.admit_token(word, decision);
                        }
                        Err(e) => warn!(word = %word, error = %e, "Walkthrough token dropped"),
                    }
                }
                if index + 1 < self.animation.words.len() {
                    self.schedule_after(
                        0,
                        SimEvent::Pipeline(PipelineStep::Score { index: index + 1 }),
                    );
                } else {
                    self.animation.complete();
                    self.schedule_after(step_ms, SimEvent::Pipeline(PipelineStep::Finish));
                }
            }
            PipelineStep::Finish => {
                self.animation = AnimationState::default();
            }
        }
        self.commit(EngineEvent::PipelineStepChanged {
            step: self.animation.current_step,
        });
    }

    // --- Stats and notification ---

    /// Resync expert activity and stats, then notify observers.
    fn commit(&mut self, event: EngineEvent) {
        self.sync_expert_activity();
        self.refresh_stats();
        self.emit(&event);
    }

    /// An expert is active iff some processing token targets it.
    fn sync_expert_activity(&mut self) {
        for expert in &mut self.experts {
            let active = self
                .tokens
                .iter()
                .any(|t| t.status == TokenStatus::Processing && t.targets(expert.id));
            if expert.is_active && !active {
                debug!(expert_id = expert.id, "Expert idle");
            }
            expert.is_active = active;
        }
    }

    fn refresh_stats(&mut self) {
        match compute_stats(&self.experts, &self.routing_history) {
            Ok(stats) => self.stats = stats,
            Err(e) => error!(error = %e, "Failed to compute stats; keeping previous values"),
        }
    }

    fn emit(&mut self, event: &EngineEvent) {
        let now = self.clock.now_ms();
        for observer in self.observers.iter_mut() {
            observer.on_event(event, now, &self.stats);
        }
    }

    // --- Accessors ---

    fn token_mut(&mut self, token_id: &str) -> Option<&mut Token> {
        self.tokens.iter_mut().find(|t| t.id == token_id)
    }

    pub fn token(&self, token_id: &str) -> Option<&Token> {
        self.tokens.iter().find(|t| t.id == token_id)
    }

    pub fn experts(&self) -> &[Expert] {
        &self.experts
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn routing_history(&self) -> &[RoutingDecision] {
        &self.routing_history
    }

    pub fn stats(&self) -> &MoeStats {
        &self.stats
    }

    pub fn animation(&self) -> &AnimationState {
        &self.animation
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn top_k(&self) -> usize {
        self.config.moe.top_k
    }

    pub fn num_experts(&self) -> usize {
        self.experts.len()
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    /// How many more tokens may be added right now.
    pub fn remaining_capacity(&self) -> usize {
        self.config
            .simulation
            .max_tokens
            .saturating_sub(self.tokens.len())
    }

    /// Number of scheduled events not yet delivered, stale ones included.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            now_ms: self.clock.now_ms(),
            is_playing: self.is_playing,
            config: self.config.clone(),
            experts: self.experts.clone(),
            tokens: self.tokens.clone(),
            routing_history: self.routing_history.clone(),
            stats: self.stats.clone(),
            animation: self.animation.clone(),
        }
    }
}

fn check_expert_count(n: usize) -> Result<(), EngineError> {
    if !(MIN_EXPERTS..=MAX_EXPERTS).contains(&n) {
        return Err(EngineError::InvalidExpertCount {
            requested: n,
            min: MIN_EXPERTS,
            max: MAX_EXPERTS,
        });
    }
    Ok(())
}
