/// Integration tests for the simulation engine.
use moesim_core::config::SimConfig;
use moesim_core::{
    EngineError, EngineEvent, EngineObserver, FfnStage, MoeStats, SimulationEngine, TokenStatus,
};
use moesim_gating::GatingNetwork;
use rand::rngs::mock::StepRng;
use rand::RngCore;
use std::sync::{Arc, Mutex};

fn config(num_experts: usize, top_k: usize) -> SimConfig {
    SimConfig::from_str(&format!(
        r#"
[simulation]
name = "integration-test"
seed = 42

[moe]
num_experts = {}
top_k = {}
"#,
        num_experts, top_k
    ))
    .unwrap()
}

/// Every random draw is zero: all experts tie and routing picks the
/// lowest indices.
fn flat_engine(num_experts: usize, top_k: usize) -> SimulationEngine {
    SimulationEngine::with_rng(config(num_experts, top_k), Box::new(StepRng::new(0, 0)))
}

/// Gate with fixed scores per content string.
struct ScriptedGate;

impl GatingNetwork for ScriptedGate {
    fn score(&self, content: &str, num_experts: usize, _rng: &mut dyn RngCore) -> Vec<f64> {
        let mut scores = vec![0.0; num_experts];
        match content {
            "a" => {
                scores[0] = 1.0;
                scores[1] = 0.9;
            }
            "b" => {
                scores[0] = 1.0;
                scores[3] = 0.9;
            }
            "d" => {
                scores[1] = 1.0;
                scores[2] = 0.9;
            }
            _ => scores[2] = 1.0,
        }
        scores
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Experts whose `is_active` flag disagrees with "some processing token
/// targets this expert".
fn activity_mismatches(engine: &SimulationEngine) -> Vec<usize> {
    engine
        .experts()
        .iter()
        .filter(|e| {
            let busy = engine
                .tokens()
                .iter()
                .any(|t| t.status == TokenStatus::Processing && t.target_experts.contains(&e.id));
            e.is_active != busy
        })
        .map(|e| e.id)
        .collect()
}

#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<(u64, EngineEvent)>>>,
}

impl EngineObserver for Recorder {
    fn on_event(&mut self, event: &EngineEvent, now_ms: u64, _stats: &MoeStats) {
        self.events.lock().unwrap().push((now_ms, event.clone()));
    }
}

#[test]
fn test_hello_with_four_experts() {
    let mut engine = SimulationEngine::new(config(4, 2));
    let id = engine.add_token(Some("hello")).unwrap();

    let token = engine.token(&id).unwrap().clone();
    assert_eq!(token.target_experts.len(), 2);
    assert!(token.target_experts.iter().all(|&e| e < 4));
    assert_ne!(token.target_experts[0], token.target_experts[1]);
    let weight_sum: f64 = token.routing_weights.iter().sum();
    assert!((weight_sum - 1.0).abs() < 1e-9);
    assert_eq!(token.gating_probabilities.len(), 4);
    let prob_sum: f64 = token.gating_probabilities.iter().sum();
    assert!((prob_sum - 1.0).abs() < 1e-9);

    // routing delay + single-token batch
    engine.advance_by(100 + 3000);
    for &e in &token.target_experts {
        assert_eq!(engine.experts()[e].load_count, 1);
        assert!(!engine.experts()[e].is_active);
    }
    let untouched: u64 = engine
        .experts()
        .iter()
        .filter(|e| !token.target_experts.contains(&e.id))
        .map(|e| e.load_count)
        .sum();
    assert_eq!(untouched, 0);
    assert_eq!(engine.token(&id).unwrap().status, TokenStatus::Complete);
}

#[test]
fn test_quick_tokens_share_one_batch() {
    let mut engine = flat_engine(4, 2);
    let ids: Vec<String> = (0..3)
        .map(|i| {
            let id = engine.add_token(Some(&format!("tok{}", i))).unwrap();
            engine.advance_by(10);
            id
        })
        .collect();
    for id in &ids {
        assert_eq!(engine.token(id).unwrap().target_experts, vec![0, 1]);
    }

    // First token enters processing at 100; by then three tokens are in flight.
    engine.advance_to(100);
    assert_eq!(engine.experts()[0].batch_processing_ms, Some(3000 + 2 * 500));
    assert_eq!(engine.experts()[1].batch_processing_ms, Some(4000));
    let batch_id = engine.experts()[0].batch_id;

    // Later tokens ride the same batch.
    engine.advance_to(120);
    assert_eq!(engine.experts()[0].batch_id, batch_id);
    assert!(ids
        .iter()
        .all(|id| engine.token(id).unwrap().status == TokenStatus::Processing));

    engine.advance_to(4099);
    assert!(engine.experts()[0].is_active);
    engine.advance_to(4100);
    assert!(!engine.experts()[0].is_active);
    assert_eq!(engine.experts()[0].load_count, 3);
    assert_eq!(engine.experts()[1].load_count, 3);
    assert!(ids
        .iter()
        .all(|id| engine.token(id).unwrap().status == TokenStatus::Complete));
}

#[test]
fn test_removal_waits_for_slowest_expert() {
    let mut engine = flat_engine(4, 2).with_gate(Box::new(ScriptedGate));
    let b = engine.add_token(Some("b")).unwrap();
    let a = engine.add_token(Some("a")).unwrap();
    assert_eq!(engine.token(&b).unwrap().target_experts, vec![0, 3]);
    assert_eq!(engine.token(&a).unwrap().target_experts, vec![0, 1]);

    engine.advance_to(100);
    // Expert 0 batches both tokens; experts 1 and 3 batch one each.
    assert_eq!(engine.experts()[0].batch_processing_ms, Some(3500));
    assert_eq!(engine.experts()[1].batch_processing_ms, Some(3000));
    assert_eq!(engine.experts()[3].batch_processing_ms, Some(3000));

    engine.advance_to(3100);
    // Experts 1 and 3 finished their batches but their tokens still wait on 0.
    assert_eq!(engine.experts()[1].load_count, 1);
    assert_eq!(engine.experts()[1].batch_id, None);
    assert!(engine.experts()[1].is_active);
    assert!(engine.experts()[3].is_active);
    let token_a = engine.token(&a).unwrap();
    assert_eq!(token_a.status, TokenStatus::Processing);
    assert_eq!(token_a.pending_experts, vec![0]);

    engine.advance_to(3599);
    assert_eq!(engine.token(&a).unwrap().status, TokenStatus::Processing);
    engine.advance_to(3600);
    assert_eq!(engine.token(&a).unwrap().status, TokenStatus::Complete);
    assert_eq!(engine.experts()[0].load_count, 2);
    assert!(engine.experts().iter().all(|e| !e.is_active));

    // Not removed at the faster expert's completion plus the hold.
    engine.advance_to(4100);
    assert!(engine.token(&a).is_some());
    engine.advance_to(4599);
    assert!(engine.token(&a).is_some());
    engine.advance_to(4600);
    assert!(engine.token(&a).is_none());
    assert!(engine.token(&b).is_none());
}

#[test]
fn test_expert_stays_active_until_its_tokens_complete() {
    let mut engine = flat_engine(4, 2).with_gate(Box::new(ScriptedGate));
    let b = engine.add_token(Some("b")).unwrap();
    let a = engine.add_token(Some("a")).unwrap();

    while engine.token(&a).is_some() || engine.token(&b).is_some() {
        assert_eq!(
            activity_mismatches(&engine),
            Vec::<usize>::new(),
            "at {}ms",
            engine.now_ms()
        );
        for expert in engine.experts().iter().filter(|e| !e.is_active) {
            assert!(engine
                .tokens()
                .iter()
                .filter(|t| t.target_experts.contains(&expert.id))
                .all(|t| t.status != TokenStatus::Processing));
        }
        engine.advance_by(50);
    }
}

#[test]
fn test_draining_expert_starts_fresh_batch() {
    let mut engine = flat_engine(4, 2).with_gate(Box::new(ScriptedGate));
    engine.add_token(Some("b")).unwrap();
    let a = engine.add_token(Some("a")).unwrap();
    engine.advance_to(3100);
    // Expert 1 is active only because token a still waits on expert 0.
    assert!(engine.experts()[1].is_active);
    assert_eq!(engine.experts()[1].batch_id, None);

    let d = engine.add_token(Some("d")).unwrap();
    assert_eq!(engine.token(&d).unwrap().target_experts, vec![1, 2]);
    engine.advance_to(3200);
    let expert = &engine.experts()[1];
    assert!(expert.batch_id.is_some());
    assert_eq!(expert.batch_start_ms, Some(3200));
    // Token a was already settled by expert 1, so only d is batched.
    assert_eq!(expert.batch_processing_ms, Some(3000));

    engine.advance_to(3600);
    assert_eq!(engine.token(&a).unwrap().status, TokenStatus::Complete);
    assert!(engine.experts()[1].is_active);
    engine.advance_to(6200);
    assert_eq!(engine.token(&d).unwrap().status, TokenStatus::Complete);
    assert_eq!(engine.experts()[1].load_count, 2);
    assert!(!engine.experts()[1].is_active);
}

#[test]
fn test_expert_batch_credits_only_processing_tokens() {
    let mut engine = flat_engine(4, 2);
    let first = engine.add_token(Some("x")).unwrap();
    engine.advance_to(100);
    // Arrives after the batch started; the batch is still in flight when
    // it enters processing, so it rides along.
    let late = engine.add_token(Some("y")).unwrap();
    assert_eq!(engine.experts()[0].batch_processing_ms, Some(3000));

    engine.advance_to(3100);
    assert_eq!(engine.experts()[0].load_count, 2);
    assert_eq!(engine.token(&first).unwrap().status, TokenStatus::Complete);
    assert_eq!(engine.token(&late).unwrap().status, TokenStatus::Complete);

    // A token still routing when a batch ends starts a fresh batch later.
    let routing = engine.add_token(Some("z")).unwrap();
    engine.advance_to(3150);
    assert_eq!(engine.token(&routing).unwrap().status, TokenStatus::Routing);
    engine.advance_to(3200);
    assert!(engine.experts()[0].is_active);
    assert_eq!(engine.experts()[0].batch_start_ms, Some(3200));
}

#[test]
fn test_status_and_stage_monotonic() {
    let mut engine = flat_engine(4, 2);
    let id = engine.add_token(Some("mono")).unwrap();
    let mut last_status = TokenStatus::Idle;
    let mut last_stage: Option<FfnStage> = None;

    while engine.token(&id).is_some() && engine.now_ms() < 10_000 {
        let token = engine.token(&id).unwrap();
        assert!(token.status >= last_status);
        assert!(token.ffn_stage >= last_stage);
        last_status = token.status;
        last_stage = token.ffn_stage;
        engine.advance_by(50);
    }
    assert_eq!(last_status, TokenStatus::Complete);
    assert_eq!(last_stage, Some(FfnStage::Output));
}

#[test]
fn test_ffn_stage_stops_after_completion() {
    let mut config = config(4, 2);
    config.timing.base_processing_ms = 1000;
    config.timing.display_hold_ms = 5000;
    let mut engine = SimulationEngine::with_rng(config, Box::new(StepRng::new(0, 0)));
    let id = engine.add_token(Some("fast")).unwrap();

    // Completes at 1100, before the Ffn2 step at 1900.
    engine.advance_to(1100);
    assert_eq!(engine.token(&id).unwrap().status, TokenStatus::Complete);
    engine.advance_to(3000);
    let token = engine.token(&id).unwrap();
    assert_eq!(token.status, TokenStatus::Complete);
    assert_eq!(token.ffn_stage, Some(FfnStage::Output));
}

#[test]
fn test_set_num_experts_clears_and_clamps() {
    let mut engine = SimulationEngine::new(config(8, 2));
    engine.add_token(Some("one")).unwrap();
    engine.add_token(Some("two")).unwrap();
    engine.advance_by(200);
    assert!(!engine.routing_history().is_empty());

    engine.set_num_experts(4).unwrap();
    assert_eq!(engine.num_experts(), 4);
    assert!(engine.top_k() <= 4);
    assert!(engine.tokens().is_empty());
    assert!(engine.routing_history().is_empty());
    assert_eq!(engine.stats().total_tokens_processed, 0);

    // Pending timers from before re-initialization are inert.
    engine.run_until_idle();
    assert!(engine.experts().iter().all(|e| e.load_count == 0 && !e.is_active));

    engine.set_top_k(8);
    engine.set_num_experts(2).unwrap();
    assert_eq!(engine.top_k(), 2);
}

#[test]
fn test_target_count_matches_clamped_top_k() {
    let mut engine = SimulationEngine::new(config(6, 3));
    for k in [1, 3, 6, 9] {
        engine.set_top_k(k);
        let id = engine.add_token(Some("sample")).unwrap();
        assert_eq!(engine.token(&id).unwrap().target_experts.len(), k.min(6));
        engine.remove_token(&id);
    }
}

#[test]
fn test_capacity_error_reports_counts() {
    let mut engine = SimulationEngine::new(config(4, 2));
    for _ in 0..18 {
        engine.add_token(None).unwrap();
    }
    assert_eq!(engine.remaining_capacity(), 0);
    assert_eq!(
        engine.add_token(Some("overflow")),
        Err(EngineError::CapacityExceeded {
            live: 18,
            max: 18,
            requested: 1
        })
    );
    assert_eq!(engine.tokens().len(), 18);

    // Capacity frees up once tokens finish and are removed.
    engine.run_until_idle();
    assert_eq!(engine.remaining_capacity(), 18);
}

#[test]
fn test_reset_preserves_expert_identity() {
    let mut engine = SimulationEngine::new(config(5, 2));
    let before: Vec<_> = engine
        .experts()
        .iter()
        .map(|e| (e.id, e.position, e.specialization.clone()))
        .collect();
    engine.add_token(Some("a")).unwrap();
    engine.run_until_idle();
    assert!(engine.experts().iter().any(|e| e.load_count > 0));

    engine.reset();
    let after: Vec<_> = engine
        .experts()
        .iter()
        .map(|e| (e.id, e.position, e.specialization.clone()))
        .collect();
    assert_eq!(before, after);
    assert!(engine.experts().iter().all(|e| e.load_count == 0));
    assert_eq!(engine.stats().avg_expert_utilization, 0.0);
}

#[test]
fn test_observer_sees_full_lifecycle() {
    let recorder = Recorder::default();
    let mut engine = flat_engine(4, 2);
    engine.subscribe(Box::new(recorder.clone()));
    let id = engine.add_token(Some("watch")).unwrap();
    engine.run_until_idle();

    let events = recorder.events.lock().unwrap();
    let kinds: Vec<&EngineEvent> = events.iter().map(|(_, e)| e).collect();
    assert!(kinds.contains(&&EngineEvent::TokenAdded {
        token_id: id.clone()
    }));
    assert!(kinds.contains(&&EngineEvent::TokenProcessing {
        token_id: id.clone()
    }));
    assert!(kinds.contains(&&EngineEvent::ExpertBatchStarted {
        expert_id: 0,
        batch_size: 1,
        duration_ms: 3000
    }));
    assert!(kinds.contains(&&EngineEvent::ExpertBatchCompleted {
        expert_id: 1,
        tokens_completed: 1
    }));
    let completed_at = events
        .iter()
        .find(|(_, e)| matches!(e, EngineEvent::TokenCompleted { .. }))
        .map(|(t, _)| *t);
    let removed_at = events
        .iter()
        .find(|(_, e)| matches!(e, EngineEvent::TokenRemoved { .. }))
        .map(|(t, _)| *t);
    assert_eq!(completed_at, Some(3100));
    assert_eq!(removed_at, Some(4100));

    let times: Vec<u64> = events.iter().map(|(t, _)| *t).collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_seeded_runs_are_reproducible() {
    let run = || {
        let mut engine = SimulationEngine::new(config(8, 2));
        for _ in 0..10 {
            engine.add_token(None).unwrap();
            engine.advance_by(250);
        }
        engine.run_until_idle();
        engine.snapshot()
    };
    let a = run();
    let b = run();
    assert_eq!(a.routing_history, b.routing_history);
    assert_eq!(a.stats, b.stats);
    assert_eq!(a.now_ms, b.now_ms);
}

#[test]
fn test_shipped_config_matches_defaults() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../configs/default.toml");
    let loaded = SimConfig::from_file(&path).unwrap();
    let defaults = SimConfig::default();
    assert_eq!(loaded.moe.num_experts, defaults.moe.num_experts);
    assert_eq!(loaded.moe.top_k, defaults.moe.top_k);
    assert_eq!(loaded.simulation.max_tokens, defaults.simulation.max_tokens);
    assert_eq!(
        loaded.timing.batch_processing_ms(3),
        defaults.timing.batch_processing_ms(3)
    );
    assert_eq!(loaded.simulation.seed, None);
}
