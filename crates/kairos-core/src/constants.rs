/// Width of an occasion embedding, when one is attached.
pub const EMBEDDING_DIM: usize = 384;

/// Numerical epsilon for near-zero comparisons
pub const EPSILON: f64 = 1e-10;

/// Starting energy of a fresh occasion (maximal unresolved tension).
pub const INITIAL_ENERGY: f64 = 1.0;

/// Starting satisfaction of a fresh occasion.
pub const INITIAL_SATISFACTION: f64 = 0.0;

/// Atoms with their own phrase banks and relaxed participation thresholds.
/// Never fused with another atom.
pub const BRIDGE_ATOMS: &[&str] = &["holding", "grounding", "witnessing", "pacing"];

/// Floor applied to sampling temperature before dividing by it.
pub const MIN_TEMPERATURE: f64 = 1e-3;

/// Whether `atom` belongs to the bridge vocabulary.
pub fn is_bridge_atom(atom: &str) -> bool {
    BRIDGE_ATOMS.contains(&atom)
}

/// Clamp to the unit interval. NaN collapses to 0.
pub fn clamp_unit(x: f64) -> f64 {
    if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) }
}
