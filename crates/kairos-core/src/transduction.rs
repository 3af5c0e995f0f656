//! Externally detected state-transition mechanisms.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::TransductionConfig;
use crate::constants::clamp_unit;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mechanism {
    NoOp,
    Soothing,
    Reconnecting,
    Integrating,
    Bracing,
    Withdrawing,
    Shifting,
    Oscillating,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MechanismCategory {
    Healing,
    Protective,
    Other,
}

impl Mechanism {
    pub const ALL: [Mechanism; 8] = [
        Mechanism::NoOp,
        Mechanism::Soothing,
        Mechanism::Reconnecting,
        Mechanism::Integrating,
        Mechanism::Bracing,
        Mechanism::Withdrawing,
        Mechanism::Shifting,
        Mechanism::Oscillating,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mechanism::NoOp => "no_op",
            Mechanism::Soothing => "soothing",
            Mechanism::Reconnecting => "reconnecting",
            Mechanism::Integrating => "integrating",
            Mechanism::Bracing => "bracing",
            Mechanism::Withdrawing => "withdrawing",
            Mechanism::Shifting => "shifting",
            Mechanism::Oscillating => "oscillating",
        }
    }

    pub fn from_name(name: &str) -> Option<Mechanism> {
        Mechanism::ALL.into_iter().find(|m| m.as_str() == name)
    }

    pub fn category(&self) -> MechanismCategory {
        match self {
            Mechanism::Soothing | Mechanism::Reconnecting | Mechanism::Integrating => {
                MechanismCategory::Healing
            }
            Mechanism::Bracing | Mechanism::Withdrawing => MechanismCategory::Protective,
            Mechanism::NoOp | Mechanism::Shifting | Mechanism::Oscillating => {
                MechanismCategory::Other
            }
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition signal from an external detector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransductionSignal {
    pub mechanism: Mechanism,
    pub transition_probability: f64,
    #[serde(default)]
    pub mutual_satisfaction: f64,
}

impl TransductionSignal {
    /// Whether this signal pre-empts direct composition and fusion.
    pub fn is_active(&self, config: &TransductionConfig) -> bool {
        self.mechanism != Mechanism::NoOp
            && self.transition_probability.is_finite()
            && self.transition_probability > config.min_transition_probability
    }

    /// base(category) × (0.7 + 0.3·p) × (0.7 + 0.3·mutual satisfaction)
    pub fn confidence(&self, config: &TransductionConfig) -> f64 {
        let base = match self.mechanism.category() {
            MechanismCategory::Healing => config.healing_base,
            MechanismCategory::Protective => config.protective_base,
            MechanismCategory::Other => config.other_base,
        };
        let p = clamp_unit(self.transition_probability);
        let m = clamp_unit(self.mutual_satisfaction);
        clamp_unit(base * (0.7 + 0.3 * p) * (0.7 + 0.3 * m))
    }
}
