//! Pipeline configuration from TOML.
//!
//! Absent sections and invalid values are not errors: each falls back to
//! the canonical default with a warning, so a half-written file still
//! yields a usable pipeline. Only unreadable files and malformed TOML fail.

use std::path::Path;

use kairos_core::config::DescentCoefficients;
use kairos_core::regime::RegimeTable;
use kairos_core::{
    ConvergenceConfig, CrisisConfig, KairosConfig, NexusConfig, PipelineConfig, SafetyConfig,
    SelectorConfig, TransductionConfig,
};

use crate::error::Result;

/// Load a config file. A missing file yields defaults.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        tracing::warn!("no config at {}, using defaults", path.display());
        return Ok(PipelineConfig::default());
    }
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    tracing::info!("loaded config from {}", path.display());
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<PipelineConfig> {
    let table: toml::Table = toml::from_str(content)?;
    for section in PipelineConfig::SECTIONS {
        if !table.contains_key(section) {
            tracing::warn!(section, "config section missing, using defaults");
        }
    }
    for key in table.keys() {
        if !PipelineConfig::SECTIONS.contains(&key.as_str()) {
            tracing::warn!(section = %key, "unknown config section ignored");
        }
    }

    let mut config: PipelineConfig = toml::from_str(content)?;
    sanitize(&mut config);
    Ok(config)
}

/// Encode a config as TOML.
pub fn to_toml(config: &PipelineConfig) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}

/// Revert invalid values to their defaults. Returns the dotted names of the
/// reverted fields.
pub fn sanitize(config: &mut PipelineConfig) -> Vec<String> {
    let mut reverted = Vec::new();
    let mut revert = |name: &str| {
        tracing::warn!(field = name, "invalid config value, using default");
        reverted.push(name.to_string());
    };

    let descent = &mut config.descent;
    if !valid_coefficients(&descent.lure) {
        descent.lure = DescentCoefficients::canonical_lure();
        revert("descent.lure");
    }
    if !valid_coefficients(&descent.uncertainty) {
        descent.uncertainty = DescentCoefficients::canonical_uncertainty();
        revert("descent.uncertainty");
    }
    let attractors = descent.attractors.len();
    descent
        .attractors
        .retain(|a| a.weight.is_finite() && a.weight >= 0.0);
    if descent.attractors.len() != attractors {
        revert("descent.attractors");
    }

    let kairos = &mut config.kairos;
    let defaults = KairosConfig::default();
    if !unit(kairos.energy_min) || !unit(kairos.energy_max) || kairos.energy_min > kairos.energy_max
    {
        kairos.energy_min = defaults.energy_min;
        kairos.energy_max = defaults.energy_max;
        revert("kairos.energy_window");
    }
    if !unit(kairos.satisfaction_threshold) {
        kairos.satisfaction_threshold = defaults.satisfaction_threshold;
        revert("kairos.satisfaction_threshold");
    }
    if !positive(kairos.confidence_boost) {
        kairos.confidence_boost = defaults.confidence_boost;
        revert("kairos.confidence_boost");
    }
    if !positive(kairos.affordance_multiplier) {
        kairos.affordance_multiplier = defaults.affordance_multiplier;
        revert("kairos.affordance_multiplier");
    }

    if config.convergence.max_cycles == 0 {
        config.convergence.max_cycles = ConvergenceConfig::default().max_cycles;
        revert("convergence.max_cycles");
    }

    let nexus = &mut config.nexus;
    let defaults = NexusConfig::default();
    if !positive(nexus.family_sigma) {
        nexus.family_sigma = defaults.family_sigma;
        revert("nexus.family_sigma");
    }
    if !unit(nexus.proximity_floor) {
        nexus.proximity_floor = defaults.proximity_floor;
        revert("nexus.proximity_floor");
    }

    let selector = &mut config.selector;
    let defaults = SelectorConfig::default();
    if selector.slots == 0 {
        selector.slots = defaults.slots;
        revert("selector.slots");
    }
    for (name, value, default) in [
        (
            "selector.direct_threshold",
            &mut selector.direct_threshold,
            defaults.direct_threshold,
        ),
        (
            "selector.bridge_threshold",
            &mut selector.bridge_threshold,
            defaults.bridge_threshold,
        ),
        (
            "selector.fusion_threshold",
            &mut selector.fusion_threshold,
            defaults.fusion_threshold,
        ),
        (
            "selector.learned_fallback_confidence",
            &mut selector.learned_fallback_confidence,
            defaults.learned_fallback_confidence,
        ),
        (
            "selector.builtin_fallback_confidence",
            &mut selector.builtin_fallback_confidence,
            defaults.builtin_fallback_confidence,
        ),
    ] {
        if !unit(*value) {
            *value = default;
            revert(name);
        }
    }
    if selector.generation_timeout_ms == 0 {
        selector.generation_timeout_ms = defaults.generation_timeout_ms;
        revert("selector.generation_timeout_ms");
    }

    let regime = &mut config.regime;
    if !regime.multipliers.values().iter().all(|v| v.is_finite() && *v >= 0.0) {
        regime.multipliers = RegimeTable::canonical_multipliers();
        revert("regime.multipliers");
    }
    if !regime.temperatures.values().iter().all(|v| positive(*v)) {
        regime.temperatures = RegimeTable::canonical_temperatures();
        revert("regime.temperatures");
    }
    if !positive(regime.unknown_temperature) {
        regime.unknown_temperature = 1.0;
        revert("regime.unknown_temperature");
    }

    let crisis = &mut config.crisis;
    let defaults = CrisisConfig::default();
    if !positive(crisis.min_temperature) {
        crisis.min_temperature = defaults.min_temperature;
        revert("crisis.min_temperature");
    }
    if !crisis.urgency_threshold.is_finite() {
        crisis.urgency_threshold = defaults.urgency_threshold;
        revert("crisis.urgency_threshold");
    }

    let safety = &mut config.safety;
    let defaults = SafetyConfig::default();
    if !unit(safety.low_energy) || !unit(safety.high_energy) || safety.low_energy > safety.high_energy
    {
        safety.low_energy = defaults.low_energy;
        safety.high_energy = defaults.high_energy;
        revert("safety.energy_bands");
    }

    let transduction = &mut config.transduction;
    let defaults = TransductionConfig::default();
    for (name, value, default) in [
        (
            "transduction.min_transition_probability",
            &mut transduction.min_transition_probability,
            defaults.min_transition_probability,
        ),
        (
            "transduction.healing_base",
            &mut transduction.healing_base,
            defaults.healing_base,
        ),
        (
            "transduction.protective_base",
            &mut transduction.protective_base,
            defaults.protective_base,
        ),
        (
            "transduction.other_base",
            &mut transduction.other_base,
            defaults.other_base,
        ),
    ] {
        if !unit(*value) {
            *value = default;
            revert(name);
        }
    }

    reverted
}

fn unit(x: f64) -> bool {
    (0.0..=1.0).contains(&x)
}

fn positive(x: f64) -> bool {
    x.is_finite() && x > 0.0
}

fn valid_coefficients(c: &DescentCoefficients) -> bool {
    c.is_finite()
        && [
            c.satisfaction_gap,
            c.energy_delta,
            c.disagreement,
            c.incoherence,
            c.peak_coherence,
            c.variant_term,
        ]
        .iter()
        .all(|v| *v >= 0.0)
}
