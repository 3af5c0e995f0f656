//! Scripted turns for the CLI.
//!
//! A scenario is a `TurnRequest` plus a list of organs, each replaying one
//! reading per cycle and holding its last reading once the script runs out.
//!
//! ```json
//! {
//!   "datum": "I keep going back and forth",
//!   "regime": "exploring",
//!   "organs": [
//!     { "organ": "NDAM", "cycles": [{ "coherence": 0.9, "atoms": { "pressure": 0.9 } }] },
//!     { "organ": "EO", "cycles": [{ "coherence": 0.2 }, { "coherence": 0.35 }] }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use kairos_core::{FieldBreakdown, OccasionView, Organ, OrganSensor, OrganSignal, TurnRequest};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(flatten)]
    pub turn: TurnRequest,
    #[serde(default)]
    pub organs: Vec<ScriptedOrgan>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse scenario {}", path.display()))
    }

    pub fn sensors(&self) -> Vec<&dyn OrganSensor> {
        self.organs.iter().map(|o| o as &dyn OrganSensor).collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrganReading {
    pub coherence: f64,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub lure: Option<f64>,
    #[serde(default)]
    pub atoms: BTreeMap<String, f64>,
    #[serde(default)]
    pub field: Option<FieldBreakdown>,
}

#[derive(Debug, Deserialize)]
pub struct ScriptedOrgan {
    pub organ: Organ,
    #[serde(default)]
    pub cycles: Vec<OrganReading>,
}

impl OrganSensor for ScriptedOrgan {
    fn organ(&self) -> Organ {
        self.organ
    }

    fn sense(&self, view: &OccasionView<'_>) -> Option<OrganSignal> {
        let last = self.cycles.len().checked_sub(1)?;
        let reading = &self.cycles[(view.cycle as usize).min(last)];

        let mut signal = OrganSignal::new(self.organ, reading.coherence);
        if let Some(confidence) = reading.confidence {
            signal = signal.with_confidence(confidence);
        }
        if let Some(lure) = reading.lure {
            signal = signal.with_lure(lure);
        }
        if let Some(field) = reading.field {
            signal = signal.with_field(field);
        }
        for (atom, activation) in &reading.atoms {
            signal = signal.with_atom(atom, *activation);
        }
        Some(signal)
    }
}
