/// Integration tests for the tokenize-and-route walkthrough.
use moesim_core::config::SimConfig;
use moesim_core::{AnimationStep, EngineError, SimulationEngine, TokenStatus};
use moesim_gating::softmax;

fn config(max_tokens: usize) -> SimConfig {
    SimConfig::from_str(&format!(
        r#"
[simulation]
name = "walkthrough"
seed = 7
max_tokens = {}

[moe]
num_experts = 6
top_k = 2
"#,
        max_tokens
    ))
    .unwrap()
}

#[test]
fn test_walkthrough_step_timeline() {
    let mut engine = SimulationEngine::new(config(18));
    assert_eq!(engine.submit_text("hello world").unwrap(), 2);
    assert_eq!(engine.animation().current_step, AnimationStep::Tokenizing);
    assert_eq!(engine.animation().words, vec!["hello", "world"]);

    engine.advance_to(1000);
    assert_eq!(engine.animation().current_step, AnimationStep::Scoring);
    assert_eq!(engine.animation().current_token_index, Some(0));
    assert_eq!(engine.animation().expert_scores.len(), 6);

    engine.advance_to(2500);
    assert_eq!(engine.animation().current_step, AnimationStep::Selecting);
    assert_eq!(engine.animation().selected_experts.len(), 2);

    engine.advance_to(4000);
    assert_eq!(engine.animation().current_step, AnimationStep::Routing);
    assert!(engine.tokens().is_empty());

    // Dispatch of word 0 and scoring of word 1 happen at the same instant.
    engine.advance_to(5500);
    assert_eq!(engine.tokens().len(), 1);
    assert_eq!(engine.animation().current_step, AnimationStep::Scoring);
    assert_eq!(engine.animation().current_token_index, Some(1));

    engine.advance_to(10_000);
    assert_eq!(engine.tokens().len(), 2);
    assert_eq!(engine.animation().current_step, AnimationStep::Complete);
    assert!(engine.animation().is_running);

    engine.advance_to(11_500);
    assert_eq!(engine.animation().current_step, AnimationStep::Idle);
    assert!(!engine.animation().is_running);
    assert!(engine.animation().words.is_empty());
}

#[test]
fn test_preview_matches_routed_token() {
    let mut engine = SimulationEngine::new(config(18));
    engine.submit_text("preview").unwrap();
    engine.advance_to(4000);
    let scores = engine.animation().expert_scores.clone();
    let selected = engine.animation().selected_experts.clone();

    engine.advance_to(5500);
    let token = &engine.tokens()[0];
    assert_eq!(token.content, "preview");
    assert_eq!(token.status, TokenStatus::Routing);
    assert_eq!(token.target_experts, selected);
    assert_eq!(token.gating_probabilities, softmax(&scores));
    assert_eq!(engine.animation().all_selected_experts, selected);
}

#[test]
fn test_top_k_change_after_select_keeps_selection() {
    let mut engine = SimulationEngine::new(config(18));
    engine.submit_text("preview").unwrap();
    engine.advance_to(2500);
    assert_eq!(engine.animation().current_step, AnimationStep::Selecting);
    let selected = engine.animation().selected_experts.clone();
    assert_eq!(selected.len(), 2);

    engine.set_top_k(4);
    engine.advance_to(5500);
    let token = &engine.tokens()[0];
    assert_eq!(token.target_experts, selected);
    assert_eq!(token.routing_weights.len(), 2);
    let weight_sum: f64 = token.routing_weights.iter().sum();
    assert!((weight_sum - 1.0).abs() < 1e-9);
}

#[test]
fn test_all_selected_experts_accumulates() {
    let mut engine = SimulationEngine::new(config(18));
    engine.submit_text("one two three four").unwrap();
    engine.advance_to(19_000);
    assert_eq!(engine.animation().current_step, AnimationStep::Complete);

    let mut routed: Vec<usize> = Vec::new();
    for d in engine.routing_history() {
        if !routed.contains(&d.expert_id) {
            routed.push(d.expert_id);
        }
    }
    let mut accumulated = engine.animation().all_selected_experts.clone();
    accumulated.sort_unstable();
    routed.sort_unstable();
    assert_eq!(accumulated, routed);
}

#[test]
fn test_rejections() {
    let mut engine = SimulationEngine::new(config(3));
    assert_eq!(engine.submit_text("   "), Err(EngineError::EmptyInput));
    assert_eq!(
        engine.submit_text("a b c d"),
        Err(EngineError::CapacityExceeded {
            live: 0,
            max: 3,
            requested: 4
        })
    );
    assert_eq!(engine.animation().current_step, AnimationStep::Idle);

    engine.submit_text("a b").unwrap();
    assert_eq!(engine.submit_text("c"), Err(EngineError::PipelineBusy));
}

#[test]
fn test_walkthrough_drops_word_when_capacity_runs_out() {
    let mut config = config(2);
    config.timing.display_hold_ms = 60_000;
    let mut engine = SimulationEngine::new(config);
    engine.submit_text("first second").unwrap();
    engine.add_token(Some("manual")).unwrap();
    engine.advance_to(5500);
    assert_eq!(engine.tokens().len(), 2);

    // Capacity is full at the second dispatch; the walkthrough still finishes.
    engine.advance_to(10_000);
    assert_eq!(engine.tokens().len(), 2);
    assert!(engine.tokens().iter().all(|t| t.content != "second"));
    assert_eq!(engine.animation().current_step, AnimationStep::Complete);
}

#[test]
fn test_reset_aborts_walkthrough() {
    let mut engine = SimulationEngine::new(config(18));
    engine.submit_text("stop me").unwrap();
    engine.advance_to(2500);
    engine.reset();
    assert_eq!(engine.animation().current_step, AnimationStep::Idle);
    engine.run_until_idle();
    assert!(engine.tokens().is_empty());
    assert!(engine.routing_history().is_empty());

    // A new walkthrough can start right away.
    assert_eq!(engine.submit_text("again").unwrap(), 1);
}

#[test]
fn test_run_text_end_to_end() {
    let snapshot = moesim_core::run_text(config(18), "the quick brown fox").unwrap();
    assert!(snapshot.tokens.is_empty());
    assert_eq!(snapshot.routing_history.len(), 8);
    assert_eq!(snapshot.stats.total_tokens_processed, 8);
    assert_eq!(snapshot.experts.iter().map(|e| e.load_count).sum::<u64>(), 8);
    assert_eq!(snapshot.animation.current_step, AnimationStep::Idle);

    let json = serde_json::to_string(&snapshot).unwrap();
    let back: moesim_core::EngineSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(back.stats, snapshot.stats);
}
