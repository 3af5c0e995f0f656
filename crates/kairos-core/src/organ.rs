//! Organ signal interface.
//!
//! Organs are opaque per-cycle signal producers. The core only sees what
//! they report: a coherence value, optional confidence and lure, the atoms
//! they felt with an activation for each, and an optional fixed-shape
//! field breakdown used for phrase alignment.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::EPSILON;

/// The fixed set of parallel feature-extraction organs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Organ {
    Listening,
    Empathy,
    Wisdom,
    Authenticity,
    Presence,
    Bond,
    Sans,
    Ndam,
    Rnx,
    Eo,
    Card,
}

impl Organ {
    pub const ALL: [Organ; 11] = [
        Organ::Listening,
        Organ::Empathy,
        Organ::Wisdom,
        Organ::Authenticity,
        Organ::Presence,
        Organ::Bond,
        Organ::Sans,
        Organ::Ndam,
        Organ::Rnx,
        Organ::Eo,
        Organ::Card,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Organ::Listening => "LISTENING",
            Organ::Empathy => "EMPATHY",
            Organ::Wisdom => "WISDOM",
            Organ::Authenticity => "AUTHENTICITY",
            Organ::Presence => "PRESENCE",
            Organ::Bond => "BOND",
            Organ::Sans => "SANS",
            Organ::Ndam => "NDAM",
            Organ::Rnx => "RNX",
            Organ::Eo => "EO",
            Organ::Card => "CARD",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<Organ> {
        Organ::ALL
            .into_iter()
            .find(|o| o.as_str().eq_ignore_ascii_case(name.trim()))
    }

    /// Field type this organ speaks for when a direct-composition template
    /// is chosen.
    pub fn field_type(&self) -> FieldType {
        match self {
            Organ::Listening => FieldType::Attention,
            Organ::Empathy => FieldType::Emotional,
            Organ::Wisdom => FieldType::Pattern,
            Organ::Authenticity => FieldType::Truth,
            Organ::Presence => FieldType::Temporal,
            Organ::Bond => FieldType::Relational,
            Organ::Sans => FieldType::Semantic,
            Organ::Ndam => FieldType::Urgency,
            Organ::Rnx => FieldType::Rhythm,
            Organ::Eo => FieldType::Polyvagal,
            Organ::Card => FieldType::Scale,
        }
    }
}

impl fmt::Display for Organ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse kind of felt field an organ contributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Attention,
    Emotional,
    Pattern,
    Truth,
    Temporal,
    Relational,
    Semantic,
    Urgency,
    Rhythm,
    Polyvagal,
    Scale,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Attention => "attention",
            FieldType::Emotional => "emotional",
            FieldType::Pattern => "pattern",
            FieldType::Truth => "truth",
            FieldType::Temporal => "temporal",
            FieldType::Relational => "relational",
            FieldType::Semantic => "semantic",
            FieldType::Urgency => "urgency",
            FieldType::Rhythm => "rhythm",
            FieldType::Polyvagal => "polyvagal",
            FieldType::Scale => "scale",
        }
    }
}

/// Fixed-shape field breakdown hint reported by an organ.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldBreakdown {
    pub emotional: f64,
    pub pattern: f64,
    pub vulnerability: f64,
}

impl FieldBreakdown {
    pub fn new(emotional: f64, pattern: f64, vulnerability: f64) -> Self {
        Self {
            emotional,
            pattern,
            vulnerability,
        }
    }

    fn as_array(&self) -> [f64; 3] {
        [self.emotional, self.pattern, self.vulnerability]
    }

    pub fn norm(&self) -> f64 {
        self.as_array().iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.as_array().iter().all(|v| v.is_finite())
    }

    /// Cosine similarity rescaled to [0, 1]. A zero-length side gives the
    /// neutral 0.5.
    pub fn alignment(&self, other: &FieldBreakdown) -> f64 {
        let (na, nb) = (self.norm(), other.norm());
        if na < EPSILON || nb < EPSILON || !self.is_finite() || !other.is_finite() {
            return 0.5;
        }
        let dot: f64 = self
            .as_array()
            .iter()
            .zip(other.as_array().iter())
            .map(|(a, b)| a * b)
            .sum();
        let cosine = (dot / (na * nb)).clamp(-1.0, 1.0);
        (cosine + 1.0) / 2.0
    }

    /// Component-wise mean of the finite breakdowns, or `None` if there are none.
    pub fn mean<'a>(fields: impl IntoIterator<Item = &'a FieldBreakdown>) -> Option<FieldBreakdown> {
        let mut sum = [0.0f64; 3];
        let mut n = 0usize;
        for field in fields.into_iter().filter(|f| f.is_finite()) {
            for (s, v) in sum.iter_mut().zip(field.as_array()) {
                *s += v;
            }
            n += 1;
        }
        if n == 0 {
            return None;
        }
        let n = n as f64;
        Some(FieldBreakdown::new(sum[0] / n, sum[1] / n, sum[2] / n))
    }

    /// Name of the largest component.
    pub fn dominant(&self) -> &'static str {
        let [e, p, v] = self.as_array();
        if e >= p && e >= v {
            "emotional"
        } else if p >= v {
            "pattern"
        } else {
            "vulnerability"
        }
    }
}

/// One atom an organ felt this cycle, with the organ's own activation for it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AtomActivation {
    pub atom: String,
    #[serde(default = "default_activation")]
    pub activation: f64,
}

fn default_activation() -> f64 {
    1.0
}

/// Everything one organ reports for one cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrganSignal {
    pub organ: Organ,
    pub coherence: f64,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub lure: Option<f64>,
    #[serde(default)]
    pub atoms: Vec<AtomActivation>,
    #[serde(default)]
    pub field: Option<FieldBreakdown>,
}

impl OrganSignal {
    pub fn new(organ: Organ, coherence: f64) -> Self {
        Self {
            organ,
            coherence,
            confidence: None,
            lure: None,
            atoms: Vec::new(),
            field: None,
        }
    }

    pub fn with_atom(mut self, atom: &str, activation: f64) -> Self {
        self.atoms.push(AtomActivation {
            atom: atom.to_string(),
            activation,
        });
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_lure(mut self, lure: f64) -> Self {
        self.lure = Some(lure);
        self
    }

    pub fn with_field(mut self, field: FieldBreakdown) -> Self {
        self.field = Some(field);
        self
    }

    /// Confidence for affordances: the reported confidence, else coherence.
    pub fn affordance_confidence(&self) -> f64 {
        self.confidence.unwrap_or(self.coherence)
    }
}

/// Read-only view of an occasion handed to organs each cycle.
#[derive(Clone, Copy, Debug)]
pub struct OccasionView<'a> {
    pub datum: &'a str,
    pub cycle: u32,
    pub energy: f64,
    pub satisfaction: f64,
    pub kairos: bool,
}

/// A per-cycle signal producer.
///
/// Returning `None` means the organ had nothing to say this cycle; the
/// occasion carries on with whatever the other organs reported.
pub trait OrganSensor {
    fn organ(&self) -> Organ;
    fn sense(&self, view: &OccasionView<'_>) -> Option<OrganSignal>;
}
