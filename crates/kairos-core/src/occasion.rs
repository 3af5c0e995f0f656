//! One turn-level unit undergoing felt convergence.
//!
//! An occasion starts at full energy, collects affordances from organs while
//! descending cycle by cycle, watches for the Kairos window, and is matured
//! exactly once into per-atom propositions. After maturation every mutating
//! call fails with `InvalidSequence`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{DescentConfig, DescentVariant, KairosConfig};
use crate::constants::{EMBEDDING_DIM, INITIAL_ENERGY, INITIAL_SATISFACTION, clamp_unit};
use crate::organ::{OccasionView, Organ};

/// Lifecycle phase of an occasion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Open,
    Matured,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Open => f.write_str("open"),
            Phase::Matured => f.write_str("matured"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OccasionError {
    /// Operation invoked out of the occasion's valid order.
    InvalidSequence {
        operation: &'static str,
        phase: Phase,
    },
    EmptyAtom,
    EmbeddingWidth {
        expected: usize,
        actual: usize,
    },
}

impl fmt::Display for OccasionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OccasionError::InvalidSequence { operation, phase } => {
                write!(f, "invalid sequence: {operation} called on {phase} occasion")
            }
            OccasionError::EmptyAtom => write!(f, "affordance atom must not be empty"),
            OccasionError::EmbeddingWidth { expected, actual } => {
                write!(f, "embedding width {actual}, expected {expected}")
            }
        }
    }
}

impl std::error::Error for OccasionError {}

pub type Result<T> = std::result::Result<T, OccasionError>;

/// What the occasion is leaning toward, if anything.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubjectiveAim {
    pub atom: String,
    #[serde(default)]
    pub intensity: f64,
}

/// One provisional signal fragment captured during a cycle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FeltAffordance {
    pub position: usize,
    pub atom: String,
    pub organ: Organ,
    pub confidence: f64,
    pub lure: f64,
    pub cycle: u32,
    pub energy: f64,
    pub satisfaction: f64,
    pub kairos_multiplier: f64,
    /// Set once, at maturation.
    pub felt_energy: Option<f64>,
}

/// Cross-cycle, cross-organ aggregate of all affordances sharing one atom.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MaturedProposition {
    pub atom: String,
    /// Mean confidence times mean Kairos multiplier, clamped.
    pub confidence: f64,
    /// Mean contributing confidence, before the Kairos multiplier.
    pub mean_confidence: f64,
    pub felt_energy: f64,
    /// Contributing organs in first-seen order, no repeats.
    pub organs: Vec<Organ>,
    /// Σ confidence × lure.
    pub intersection_strength: f64,
    /// max confidence × lure.
    pub peak_lure: f64,
    /// confidence × (1 - felt energy), clamped.
    pub emission_priority: f64,
}

pub struct Occasion {
    pub id: Uuid,
    pub datum: String,
    pub position: usize,
    embedding: Option<Vec<f32>>,
    cycle: u32,
    energy: f64,
    satisfaction: f64,
    prior_energy: f64,
    prior_satisfaction: f64,
    affordances: Vec<FeltAffordance>,
    propositions: Vec<MaturedProposition>,
    kairos: bool,
    kairos_cycle: Option<u32>,
    subjective_aim: Option<SubjectiveAim>,
    affordance_multiplier: f64,
    phase: Phase,
}

impl Occasion {
    pub fn new(datum: &str, position: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            datum: datum.to_string(),
            position,
            embedding: None,
            cycle: 0,
            energy: INITIAL_ENERGY,
            satisfaction: INITIAL_SATISFACTION,
            prior_energy: INITIAL_ENERGY,
            prior_satisfaction: INITIAL_SATISFACTION,
            affordances: Vec::new(),
            propositions: Vec::new(),
            kairos: false,
            kairos_cycle: None,
            subjective_aim: None,
            affordance_multiplier: KairosConfig::default().affordance_multiplier,
            phase: Phase::Open,
        }
    }

    /// Multiplier stamped on affordances recorded once Kairos has fired.
    pub fn with_affordance_multiplier(mut self, multiplier: f64) -> Self {
        if multiplier.is_finite() && multiplier > 0.0 {
            self.affordance_multiplier = multiplier;
        }
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Result<Self> {
        if embedding.len() != EMBEDDING_DIM {
            return Err(OccasionError::EmbeddingWidth {
                expected: EMBEDDING_DIM,
                actual: embedding.len(),
            });
        }
        self.embedding = Some(embedding);
        Ok(self)
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }

    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    pub fn energy(&self) -> f64 {
        self.energy
    }

    pub fn satisfaction(&self) -> f64 {
        self.satisfaction
    }

    pub fn kairos(&self) -> bool {
        self.kairos
    }

    /// Cycle at which Kairos first fired.
    pub fn kairos_cycle(&self) -> Option<u32> {
        self.kairos_cycle
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn affordances(&self) -> &[FeltAffordance] {
        &self.affordances
    }

    pub fn propositions(&self) -> &[MaturedProposition] {
        &self.propositions
    }

    pub fn subjective_aim(&self) -> Option<&SubjectiveAim> {
        self.subjective_aim.as_ref()
    }

    pub fn view(&self) -> OccasionView<'_> {
        OccasionView {
            datum: &self.datum,
            cycle: self.cycle,
            energy: self.energy,
            satisfaction: self.satisfaction,
            kairos: self.kairos,
        }
    }

    fn ensure_open(&self, operation: &'static str) -> Result<()> {
        if self.phase == Phase::Open {
            Ok(())
        } else {
            Err(OccasionError::InvalidSequence {
                operation,
                phase: self.phase,
            })
        }
    }

    pub fn set_subjective_aim(&mut self, aim: SubjectiveAim) -> Result<()> {
        self.ensure_open("set_subjective_aim")?;
        if aim.atom.trim().is_empty() {
            return Err(OccasionError::EmptyAtom);
        }
        self.subjective_aim = Some(SubjectiveAim {
            intensity: clamp_unit(aim.intensity),
            ..aim
        });
        Ok(())
    }

    /// Append one affordance tagged with the current cycle, energy and
    /// satisfaction. Non-finite confidence or lure is recorded as 0.
    pub fn record_affordance(
        &mut self,
        atom: &str,
        organ: Organ,
        confidence: f64,
        lure: f64,
    ) -> Result<()> {
        self.ensure_open("record_affordance")?;
        if atom.trim().is_empty() {
            return Err(OccasionError::EmptyAtom);
        }
        let kairos_multiplier = if self.kairos {
            self.affordance_multiplier
        } else {
            1.0
        };
        self.affordances.push(FeltAffordance {
            position: self.position,
            atom: atom.to_string(),
            organ,
            confidence: sanitize(confidence),
            lure: sanitize(lure),
            cycle: self.cycle,
            energy: self.energy,
            satisfaction: self.satisfaction,
            kairos_multiplier,
            felt_energy: None,
        });
        Ok(())
    }

    /// One energy-descent cycle.
    ///
    /// `lures` is read only by the lure variant and `uncertainty` only by the
    /// uncertainty variant. Non-finite coherences are dropped; the rest are
    /// clamped to [0, 1]. Returns the new energy.
    pub fn descend(
        &mut self,
        coherences: &BTreeMap<Organ, f64>,
        lures: Option<&BTreeMap<Organ, f64>>,
        uncertainty: Option<f64>,
        config: &DescentConfig,
    ) -> Result<f64> {
        self.ensure_open("descend")?;

        let values: Vec<f64> = coherences
            .values()
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(0.0, 1.0))
            .collect();
        let stats = CoherenceStats::from_values(&values);

        let variant_term = match config.variant {
            DescentVariant::Lure => {
                if uncertainty.is_some() {
                    tracing::debug!("lure descent ignores generation uncertainty");
                }
                lures.map_or(0.0, |lures| {
                    config
                        .attractors
                        .iter()
                        .map(|a| a.weight * lures.get(&a.organ).copied().map_or(0.0, sanitize))
                        .sum()
                })
            }
            DescentVariant::Uncertainty => {
                if lures.is_some() {
                    tracing::debug!("uncertainty descent ignores organ lures");
                }
                uncertainty.map_or(0.0, sanitize)
            }
        };

        let c = config.coefficients();
        let delta = (self.energy - self.prior_energy).abs();
        let raw = c.satisfaction_gap * (1.0 - self.satisfaction)
            + c.energy_delta * delta
            + c.disagreement * (1.0 - stats.agreement)
            + c.incoherence * (1.0 - stats.mean)
            + c.peak_coherence * stats.max
            + c.variant_term * variant_term;

        self.prior_energy = self.energy;
        self.prior_satisfaction = self.satisfaction;
        self.energy = clamp_unit(raw);
        self.cycle += 1;
        self.satisfaction = clamp_unit(1.0 - self.energy * (1.0 - stats.mean));

        tracing::debug!(
            cycle = self.cycle,
            energy = self.energy,
            satisfaction = self.satisfaction,
            organs = values.len(),
            "descend"
        );
        Ok(self.energy)
    }

    /// Check the Kairos gate for this cycle.
    ///
    /// Returns whether the gate is open *now*; the sticky flag (`kairos()`)
    /// stays set once any call has returned true.
    pub fn detect_kairos(&mut self, config: &KairosConfig) -> Result<bool> {
        self.ensure_open("detect_kairos")?;

        let in_window = self.energy >= config.energy_min && self.energy <= config.energy_max;
        let satisfied = self.satisfaction > config.satisfaction_threshold;
        let rising =
            !config.require_rising_satisfaction || self.satisfaction > self.prior_satisfaction;
        let open = self.cycle >= config.min_cycle && in_window && satisfied && rising;

        if open && !self.kairos {
            self.kairos = true;
            self.kairos_cycle = Some(self.cycle);
            tracing::debug!(cycle = self.cycle, energy = self.energy, "kairos detected");
        }
        Ok(open)
    }

    /// Fold affordances into one proposition per atom. Callable once.
    pub fn mature(&mut self) -> Result<&[MaturedProposition]> {
        self.ensure_open("mature")?;

        let felt_energy = self.energy;
        let mut order: Vec<&str> = Vec::new();
        let mut groups: HashMap<&str, Vec<&FeltAffordance>> = HashMap::new();
        for aff in &self.affordances {
            let group = groups.entry(aff.atom.as_str()).or_default();
            if group.is_empty() {
                order.push(aff.atom.as_str());
            }
            group.push(aff);
        }

        let mut propositions = Vec::with_capacity(order.len());
        for atom in order {
            let group = &groups[atom];
            let n = group.len() as f64;
            let mean_confidence = group.iter().map(|a| a.confidence).sum::<f64>() / n;
            let mean_multiplier = group.iter().map(|a| a.kairos_multiplier).sum::<f64>() / n;

            let mut organs: Vec<Organ> = Vec::new();
            for aff in group {
                if !organs.contains(&aff.organ) {
                    organs.push(aff.organ);
                }
            }

            let intersection_strength = group.iter().map(|a| a.confidence * a.lure).sum();
            let peak_lure = group
                .iter()
                .map(|a| a.confidence * a.lure)
                .fold(0.0f64, f64::max);

            let confidence = clamp_unit(mean_confidence * mean_multiplier);
            propositions.push(MaturedProposition {
                atom: atom.to_string(),
                confidence,
                mean_confidence: clamp_unit(mean_confidence),
                felt_energy,
                organs,
                intersection_strength,
                peak_lure,
                emission_priority: clamp_unit(confidence * (1.0 - felt_energy)),
            });
        }

        for aff in &mut self.affordances {
            aff.felt_energy = Some(felt_energy);
        }
        self.propositions = propositions;
        self.phase = Phase::Matured;

        tracing::debug!(
            propositions = self.propositions.len(),
            affordances = self.affordances.len(),
            "occasion matured"
        );
        Ok(&self.propositions)
    }
}

fn sanitize(x: f64) -> f64 {
    if x.is_finite() { x.clamp(0.0, 1.0) } else { 0.0 }
}

/// Summary statistics over one cycle's organ coherences.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoherenceStats {
    pub mean: f64,
    /// 1 - population standard deviation; 1 with fewer than two values.
    pub agreement: f64,
    pub max: f64,
}

impl CoherenceStats {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                mean: 0.0,
                agreement: 1.0,
                max: 0.0,
            };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let agreement = if values.len() < 2 {
            1.0
        } else {
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            clamp_unit(1.0 - variance.sqrt())
        };
        let max = values.iter().copied().fold(0.0f64, f64::max);
        Self {
            mean,
            agreement,
            max,
        }
    }
}
