//! Top-K expert selection and routing-weight normalization.

/// Clamp a requested K into `[1, num_experts]`.
///
/// With zero experts the result is 0, since there is nothing to select.
pub fn clamp_top_k(k: usize, num_experts: usize) -> usize {
    if num_experts == 0 {
        return 0;
    }
    k.clamp(1, num_experts)
}

/// Indices of the `k` highest scores, highest first.
///
/// The sort is stable, so equal scores keep their original order and the
/// lower index wins a tie. `k` must already be clamped by the caller; a `k`
/// larger than `scores.len()` simply returns every index.
pub fn select_top_k(scores: &[f64], k: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..scores.len()).collect();
    indices.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    indices.truncate(k);
    indices
}

/// Weights of the selected experts, normalized to sum to 1.0.
///
/// `weight_i = score_i / sum(selected scores)`. If the selected scores sum to
/// exactly zero every selected expert gets `1/k`. Negative scores are not
/// produced by the simulated gate; they are floored at zero here so the
/// weights stay non-negative regardless.
pub fn normalize_weights(scores: &[f64], selected: &[usize]) -> Vec<f64> {
    if selected.is_empty() {
        return Vec::new();
    }
    let picked: Vec<f64> = selected.iter().map(|&i| scores[i].max(0.0)).collect();
    let sum: f64 = picked.iter().sum();
    if sum == 0.0 {
        let uniform = 1.0 / picked.len() as f64;
        return vec![uniform; picked.len()];
    }
    picked.iter().map(|s| s / sum).collect()
}
