//! Matured propositions → ranked semantic nexuses.
//!
//! Readiness is seeded from emission priority and then only rescaled:
//! first by proximity to a learned family energy target, then by learned
//! organ weights. Both boosts are optional and clamp after applying.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::NexusConfig;
use crate::constants::{clamp_unit, is_bridge_atom};
use crate::convergence::AtomActivations;
use crate::occasion::MaturedProposition;
use crate::organ::Organ;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SemanticNexus {
    pub atom: String,
    pub participants: Vec<Organ>,
    pub activations: BTreeMap<Organ, f64>,
    pub emission_readiness: f64,
    pub coherence: f64,
    pub field_strength: f64,
}

impl SemanticNexus {
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn is_bridge(&self) -> bool {
        is_bridge_atom(&self.atom)
    }

    /// Multiply readiness by `factor`, clamped. Readiness is never re-derived.
    pub fn rescale(&mut self, factor: f64) {
        self.emission_readiness = clamp_unit(self.emission_readiness * factor);
    }

    /// Participant with the highest activation; ties go to the earlier organ.
    pub fn dominant_organ(&self) -> Option<Organ> {
        self.participants.iter().copied().reduce(|best, organ| {
            let a = self.activations.get(&best).copied().unwrap_or(0.0);
            let b = self.activations.get(&organ).copied().unwrap_or(0.0);
            if b > a { organ } else { best }
        })
    }
}

/// Externally learned guidance. Both parts are optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnedGuidance {
    /// Energy at which this conversation family historically converges.
    pub family_target: Option<f64>,
    /// Learned per-organ weights; organs without an entry weigh 1.0.
    pub organ_weights: Option<BTreeMap<Organ, f64>>,
}

impl LearnedGuidance {
    pub fn is_empty(&self) -> bool {
        self.family_target.is_none() && self.organ_weights.is_none()
    }
}

/// 0.6 + 0.4·exp(-d² / 2σ²) with the floor and σ from config.
pub fn proximity_boost(current_energy: f64, target: f64, config: &NexusConfig) -> f64 {
    let distance = (current_energy - target).abs();
    let sigma = config.family_sigma.max(f64::EPSILON);
    let floor = config.proximity_floor;
    floor + (1.0 - floor) * (-(distance * distance) / (2.0 * sigma * sigma)).exp()
}

/// Build and rank nexuses. Ties in readiness go to more participants, then
/// to the alphabetically earlier atom, so identical inputs always give an
/// identical order.
pub fn aggregate(
    propositions: &[MaturedProposition],
    activations: &AtomActivations,
    current_energy: f64,
    guidance: &LearnedGuidance,
    config: &NexusConfig,
) -> Vec<SemanticNexus> {
    let proximity = guidance
        .family_target
        .filter(|t| t.is_finite())
        .map(|target| proximity_boost(current_energy, target, config));

    let mut nexuses: Vec<SemanticNexus> = propositions
        .iter()
        .filter(|p| !p.organs.is_empty())
        .map(|p| {
            let reported = activations.get(&p.atom);
            let even = 1.0 / p.organs.len() as f64;
            let organ_activations = p
                .organs
                .iter()
                .map(|organ| {
                    let value = reported
                        .and_then(|r| r.get(organ))
                        .copied()
                        .map_or(even, clamp_unit);
                    (*organ, value)
                })
                .collect();

            let mut nexus = SemanticNexus {
                atom: p.atom.clone(),
                participants: p.organs.clone(),
                activations: organ_activations,
                emission_readiness: clamp_unit(p.emission_priority),
                coherence: clamp_unit(p.mean_confidence),
                field_strength: clamp_unit(p.peak_lure),
            };

            if let Some(boost) = proximity {
                nexus.rescale(boost);
            }
            if let Some(weights) = &guidance.organ_weights {
                let mean = nexus
                    .participants
                    .iter()
                    .map(|o| weights.get(o).copied().filter(|w| w.is_finite()).unwrap_or(1.0))
                    .sum::<f64>()
                    / nexus.participant_count() as f64;
                nexus.rescale(mean);
            }
            nexus
        })
        .collect();

    nexuses.sort_by(rank_order);
    nexuses
}

fn rank_order(a: &SemanticNexus, b: &SemanticNexus) -> Ordering {
    b.emission_readiness
        .partial_cmp(&a.emission_readiness)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.participant_count().cmp(&a.participant_count()))
        .then_with(|| a.atom.cmp(&b.atom))
}
