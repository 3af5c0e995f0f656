//! Pipeline configuration.
//!
//! All tunables in one immutable object handed to the pipeline at
//! construction. Every section defaults to the canonical values, so a
//! partial TOML file only overrides what it names. Differently tuned
//! pipelines can run side by side without sharing any global state.

use serde::{Deserialize, Serialize};

use crate::organ::Organ;
use crate::regime::{Regime, RegimeTable};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub descent: DescentConfig,
    pub kairos: KairosConfig,
    pub convergence: ConvergenceConfig,
    pub nexus: NexusConfig,
    pub selector: SelectorConfig,
    pub regime: RegimeConfig,
    pub crisis: CrisisConfig,
    pub safety: SafetyConfig,
    pub transduction: TransductionConfig,
}

impl PipelineConfig {
    /// Top-level section names, in declaration order.
    pub const SECTIONS: [&'static str; 9] = [
        "descent",
        "kairos",
        "convergence",
        "nexus",
        "selector",
        "regime",
        "crisis",
        "safety",
        "transduction",
    ];
}

/// Which sixth term drives energy descent.
///
/// The lure and uncertainty formulations use incompatible coefficient
/// sets, so exactly one is active; the other signal is ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescentVariant {
    #[default]
    Lure,
    Uncertainty,
}

/// Weights of the six energy terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescentCoefficients {
    /// Weight on (1 - satisfaction).
    pub satisfaction_gap: f64,
    /// Weight on |energy delta| from the previous cycle.
    pub energy_delta: f64,
    /// Weight on (1 - organ agreement).
    pub disagreement: f64,
    /// Weight on (1 - mean coherence).
    pub incoherence: f64,
    /// Weight on max coherence.
    pub peak_coherence: f64,
    /// Weight on the variant term (lure sum or generation uncertainty).
    pub variant_term: f64,
}

impl DescentCoefficients {
    pub fn canonical_lure() -> Self {
        Self {
            satisfaction_gap: 0.40,
            energy_delta: 0.25,
            disagreement: 0.15,
            incoherence: 0.10,
            peak_coherence: 0.10,
            variant_term: 0.20,
        }
    }

    pub fn canonical_uncertainty() -> Self {
        Self {
            satisfaction_gap: 0.35,
            energy_delta: 0.25,
            disagreement: 0.12,
            incoherence: 0.10,
            peak_coherence: 0.10,
            variant_term: 0.08,
        }
    }

    pub fn is_finite(&self) -> bool {
        [
            self.satisfaction_gap,
            self.energy_delta,
            self.disagreement,
            self.incoherence,
            self.peak_coherence,
            self.variant_term,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// One organ in the lure attractor set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttractorWeight {
    pub organ: Organ,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescentConfig {
    pub variant: DescentVariant,
    pub lure: DescentCoefficients,
    pub uncertainty: DescentCoefficients,
    /// Organs whose lure pulls energy; only read in the lure variant.
    pub attractors: Vec<AttractorWeight>,
}

impl Default for DescentConfig {
    fn default() -> Self {
        Self {
            variant: DescentVariant::Lure,
            lure: DescentCoefficients::canonical_lure(),
            uncertainty: DescentCoefficients::canonical_uncertainty(),
            attractors: vec![
                AttractorWeight {
                    organ: Organ::Empathy,
                    weight: 0.4,
                },
                AttractorWeight {
                    organ: Organ::Wisdom,
                    weight: 0.3,
                },
                AttractorWeight {
                    organ: Organ::Presence,
                    weight: 0.3,
                },
            ],
        }
    }
}

impl DescentConfig {
    /// Coefficients of the active variant.
    pub fn coefficients(&self) -> &DescentCoefficients {
        match self.variant {
            DescentVariant::Lure => &self.lure,
            DescentVariant::Uncertainty => &self.uncertainty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KairosConfig {
    /// Earliest cycle at which Kairos may fire.
    pub min_cycle: u32,
    /// Inclusive lower bound of the energy window.
    pub energy_min: f64,
    /// Inclusive upper bound of the energy window.
    pub energy_max: f64,
    /// Satisfaction must be strictly above this.
    pub satisfaction_threshold: f64,
    /// Stricter gate: satisfaction must also have risen since the last cycle.
    pub require_rising_satisfaction: bool,
    /// Confidence multiplier applied to candidates when Kairos is set.
    pub confidence_boost: f64,
    /// Multiplier stamped on affordances recorded after Kairos fired.
    pub affordance_multiplier: f64,
}

impl Default for KairosConfig {
    fn default() -> Self {
        Self {
            min_cycle: 2,
            energy_min: 0.15,
            energy_max: 0.75,
            satisfaction_threshold: 0.70,
            require_rising_satisfaction: false,
            confidence_boost: 1.5,
            affordance_multiplier: 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    pub max_cycles: u32,
    /// Stop cycling at the instant Kairos is detected.
    pub stop_on_kairos: bool,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            max_cycles: 5,
            stop_on_kairos: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NexusConfig {
    /// Width of the gaussian around a learned family energy target.
    pub family_sigma: f64,
    /// Boost floor far from the target; the gaussian fills the rest up to 1.
    pub proximity_floor: f64,
}

impl Default for NexusConfig {
    fn default() -> Self {
        Self {
            family_sigma: 0.15,
            proximity_floor: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Candidate slots filled per turn.
    pub slots: usize,
    pub direct_threshold: f64,
    pub direct_min_participants: usize,
    pub bridge_threshold: f64,
    pub bridge_min_participants: usize,
    pub fusion_threshold: f64,
    pub fusion_min_participants: usize,
    pub learned_fallback_confidence: f64,
    pub builtin_fallback_confidence: f64,
    pub generation_max_tokens: u32,
    pub generation_timeout_ms: u64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            slots: 3,
            direct_threshold: 0.65,
            direct_min_participants: 3,
            bridge_threshold: 0.30,
            bridge_min_participants: 2,
            fusion_threshold: 0.50,
            fusion_min_participants: 2,
            learned_fallback_confidence: 0.35,
            builtin_fallback_confidence: 0.30,
            generation_max_tokens: 160,
            generation_timeout_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub multipliers: RegimeTable,
    pub temperatures: RegimeTable,
    /// Temperature when no regime label is available.
    pub unknown_temperature: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            multipliers: RegimeTable::canonical_multipliers(),
            temperatures: RegimeTable::canonical_temperatures(),
            unknown_temperature: 1.0,
        }
    }
}

impl RegimeConfig {
    /// Confidence multiplier; identity when the regime is unknown.
    pub fn multiplier(&self, regime: Option<Regime>) -> f64 {
        regime.map_or(1.0, |r| self.multipliers.get(r))
    }

    pub fn temperature(&self, regime: Option<Regime>) -> f64 {
        regime.map_or(self.unknown_temperature, |r| self.temperatures.get(r))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrisisConfig {
    /// Urgency strictly above this is a crisis.
    pub urgency_threshold: f64,
    /// Crisis-zone indicator at or above this is a crisis.
    pub zone_threshold: u8,
    /// Temperature forced during a crisis.
    pub min_temperature: f64,
}

impl Default for CrisisConfig {
    fn default() -> Self {
        Self {
            urgency_threshold: 0.8,
            zone_threshold: 4,
            min_temperature: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub inflation_max: f64,
    pub temporal_collapse_max: f64,
    pub safety_gradient_min: f64,
    /// Energy above this reads as high intensity.
    pub high_energy: f64,
    /// Energy below this reads as low intensity.
    pub low_energy: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            inflation_max: 0.7,
            temporal_collapse_max: 0.7,
            safety_gradient_min: 0.4,
            high_energy: 0.7,
            low_energy: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransductionConfig {
    /// Transition probability must be strictly above this.
    pub min_transition_probability: f64,
    pub healing_base: f64,
    pub protective_base: f64,
    pub other_base: f64,
}

impl Default for TransductionConfig {
    fn default() -> Self {
        Self {
            min_transition_probability: 0.3,
            healing_base: 0.70,
            protective_base: 0.60,
            other_base: 0.50,
        }
    }
}
