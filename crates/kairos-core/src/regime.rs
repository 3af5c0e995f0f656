//! Trajectory-phase labels supplied by an external regime classifier.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    WarmingUp,
    Exploring,
    Converging,
    Stable,
    Committed,
    Plateaued,
}

impl Regime {
    pub const ALL: [Regime; 6] = [
        Regime::WarmingUp,
        Regime::Exploring,
        Regime::Converging,
        Regime::Stable,
        Regime::Committed,
        Regime::Plateaued,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::WarmingUp => "warming_up",
            Regime::Exploring => "exploring",
            Regime::Converging => "converging",
            Regime::Stable => "stable",
            Regime::Committed => "committed",
            Regime::Plateaued => "plateaued",
        }
    }

    /// Accepts `warming-up`, `warming_up`, `WARMING_UP`. Unknown labels map
    /// to `None`, which downstream treats as the identity regime.
    pub fn from_label(label: &str) -> Option<Regime> {
        let normalized = label.trim().to_ascii_lowercase().replace('-', "_");
        Regime::ALL.into_iter().find(|r| r.as_str() == normalized)
    }

    /// Human phrasing used in qualitative generation guidance.
    pub fn describe(&self) -> &'static str {
        match self {
            Regime::WarmingUp => "the conversation is still warming up",
            Regime::Exploring => "the conversation is exploring",
            Regime::Converging => "the conversation is converging",
            Regime::Stable => "the conversation has found a steady footing",
            Regime::Committed => "the conversation is committed to a direction",
            Regime::Plateaued => "the conversation has plateaued",
        }
    }
}

/// Deserialize an optional regime label through [`Regime::from_label`].
/// Unknown labels become `None` so the turn runs with the identity
/// multiplier instead of failing.
pub fn deserialize_label<'de, D>(deserializer: D) -> Result<Option<Regime>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(label) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let regime = Regime::from_label(&label);
    if regime.is_none() {
        tracing::warn!(label = %label, "unknown regime label, using identity multiplier");
    }
    Ok(regime)
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value per regime. Named fields keep the table statically complete.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegimeTable {
    pub warming_up: f64,
    pub exploring: f64,
    pub converging: f64,
    pub stable: f64,
    pub committed: f64,
    pub plateaued: f64,
}

impl RegimeTable {
    pub fn get(&self, regime: Regime) -> f64 {
        match regime {
            Regime::WarmingUp => self.warming_up,
            Regime::Exploring => self.exploring,
            Regime::Converging => self.converging,
            Regime::Stable => self.stable,
            Regime::Committed => self.committed,
            Regime::Plateaued => self.plateaued,
        }
    }

    pub fn values(&self) -> [f64; 6] {
        Regime::ALL.map(|r| self.get(r))
    }

    /// Canonical confidence multipliers.
    pub fn canonical_multipliers() -> Self {
        Self {
            warming_up: 0.80,
            exploring: 0.90,
            converging: 1.00,
            stable: 1.15,
            committed: 1.10,
            plateaued: 0.85,
        }
    }

    /// Sampling temperatures: wide while exploring, narrow once committed.
    pub fn canonical_temperatures() -> Self {
        Self {
            warming_up: 1.2,
            exploring: 1.4,
            converging: 1.0,
            stable: 0.8,
            committed: 0.6,
            plateaued: 1.1,
        }
    }
}
