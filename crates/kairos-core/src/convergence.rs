//! Multi-cycle convergence loop: organs → occasion, until Kairos or the
//! cycle budget, then maturation.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::PipelineConfig;
use crate::occasion::{Occasion, Result};
use crate::organ::{FieldBreakdown, Organ, OrganSensor};

/// Organ-reported activation per atom: atom → organ → activation.
pub type AtomActivations = BTreeMap<String, BTreeMap<Organ, f64>>;

/// State after one cycle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CycleTrace {
    pub cycle: u32,
    pub energy: f64,
    pub satisfaction: f64,
    /// Whether the Kairos gate was open on this cycle.
    pub kairos: bool,
    /// Organs that reported this cycle.
    pub signals: usize,
}

pub struct ConvergenceResult {
    pub trace: Vec<CycleTrace>,
    /// Highest activation each organ reported for each atom across cycles.
    pub activations: AtomActivations,
    /// Mean field breakdown over every reported breakdown.
    pub field: Option<FieldBreakdown>,
}

/// Run the occasion through up to `convergence.max_cycles` cycles and mature it.
///
/// `uncertainty` feeds the uncertainty descent variant; the lure variant
/// reads organ lures instead.
pub fn converge(
    occasion: &mut Occasion,
    organs: &[&dyn OrganSensor],
    uncertainty: Option<f64>,
    config: &PipelineConfig,
) -> Result<ConvergenceResult> {
    let mut trace = Vec::new();
    let mut activations: AtomActivations = BTreeMap::new();
    let mut fields: Vec<FieldBreakdown> = Vec::new();

    for _ in 0..config.convergence.max_cycles {
        let view = occasion.view();
        let signals: Vec<_> = organs.iter().filter_map(|o| o.sense(&view)).collect();

        let mut coherences = BTreeMap::new();
        let mut lures = BTreeMap::new();
        for signal in &signals {
            coherences.insert(signal.organ, signal.coherence);
            if let Some(lure) = signal.lure {
                lures.insert(signal.organ, lure);
            }
            if let Some(field) = signal.field {
                fields.push(field);
            }
            for atom in &signal.atoms {
                if atom.atom.trim().is_empty() {
                    tracing::debug!(organ = %signal.organ, "skipping empty atom");
                    continue;
                }
                occasion.record_affordance(
                    &atom.atom,
                    signal.organ,
                    signal.affordance_confidence(),
                    signal.lure.unwrap_or(0.0),
                )?;
                if atom.activation.is_finite() {
                    let slot = activations
                        .entry(atom.atom.clone())
                        .or_default()
                        .entry(signal.organ)
                        .or_insert(0.0);
                    *slot = slot.max(atom.activation.clamp(0.0, 1.0));
                }
            }
        }

        let lures = (!lures.is_empty()).then_some(&lures);
        occasion.descend(&coherences, lures, uncertainty, &config.descent)?;
        let open = occasion.detect_kairos(&config.kairos)?;

        trace.push(CycleTrace {
            cycle: occasion.cycle(),
            energy: occasion.energy(),
            satisfaction: occasion.satisfaction(),
            kairos: open,
            signals: signals.len(),
        });

        if open && config.convergence.stop_on_kairos {
            break;
        }
    }

    occasion.mature()?;

    Ok(ConvergenceResult {
        trace,
        activations,
        field: FieldBreakdown::mean(&fields),
    })
}
