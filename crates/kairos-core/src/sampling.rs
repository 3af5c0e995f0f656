//! Softmax phrase sampling.
//!
//! Choice is always weighted: scores are tempered by a regime-dependent
//! temperature, which a crisis collapses to its minimum so the most-weighted
//! phrase dominates.

use rand::Rng;

use crate::config::{CrisisConfig, RegimeConfig};
use crate::constants::{EPSILON, MIN_TEMPERATURE};
use crate::organ::FieldBreakdown;
use crate::phrases::WeightedPhrase;
use crate::regime::Regime;

/// Tempered softmax with max-subtraction for stability. Falls back to an
/// even split if every exponent underflows.
pub fn softmax(scores: &[f64], temperature: f64) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let temperature = temperature.max(MIN_TEMPERATURE);
    let max_score = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exp_scores: Vec<f64> = scores
        .iter()
        .map(|s| ((s - max_score) / temperature).exp())
        .collect();
    let sum: f64 = exp_scores.iter().sum();
    if sum > EPSILON && sum.is_finite() {
        exp_scores.iter().map(|s| s / sum).collect()
    } else {
        vec![1.0 / scores.len() as f64; scores.len()]
    }
}

/// Draw an index from the tempered softmax of `scores`.
pub fn sample_index(scores: &[f64], temperature: f64, rng: &mut impl Rng) -> Option<usize> {
    let probs = softmax(scores, temperature);
    if probs.is_empty() {
        return None;
    }
    let mut roll: f64 = rng.random();
    for (i, p) in probs.iter().enumerate() {
        if roll < *p {
            return Some(i);
        }
        roll -= p;
    }
    Some(probs.len() - 1)
}

/// Whether urgency or the crisis-zone indicator calls for peaked sampling.
pub fn is_crisis(urgency: f64, crisis_zone: Option<u8>, config: &CrisisConfig) -> bool {
    urgency > config.urgency_threshold || crisis_zone.is_some_and(|z| z >= config.zone_threshold)
}

/// Regime temperature, unless a crisis forces the minimum.
pub fn resolve_temperature(
    regime: Option<Regime>,
    crisis: bool,
    regime_config: &RegimeConfig,
    crisis_config: &CrisisConfig,
) -> f64 {
    if crisis {
        crisis_config.min_temperature
    } else {
        regime_config.temperature(regime)
    }
}

/// Weight scaled by how well the phrase's field lines up with the felt one.
pub fn effective_weight(phrase: &WeightedPhrase, felt: Option<&FieldBreakdown>) -> f64 {
    match (phrase.field.as_ref(), felt) {
        (Some(field), Some(felt)) => phrase.weight * (0.5 + 0.5 * field.alignment(felt)),
        _ => phrase.weight,
    }
}

/// Sample one phrase. Phrases whose text is in `exclude` are skipped unless
/// that would leave nothing to choose from.
pub fn sample_phrase<'a>(
    phrases: &'a [WeightedPhrase],
    felt: Option<&FieldBreakdown>,
    temperature: f64,
    exclude: &[String],
    rng: &mut impl Rng,
) -> Option<&'a WeightedPhrase> {
    let fresh: Vec<&WeightedPhrase> = phrases
        .iter()
        .filter(|p| !exclude.contains(&p.text))
        .collect();
    let pool: Vec<&WeightedPhrase> = if fresh.is_empty() {
        phrases.iter().collect()
    } else {
        fresh
    };
    let scores: Vec<f64> = pool.iter().map(|p| effective_weight(p, felt)).collect();
    let idx = sample_index(&scores, temperature, rng)?;
    Some(pool[idx])
}
