//! Learned guidance as JSON.
//!
//! ```json
//! { "family_target": 0.35, "organ_weights": { "EMPATHY": 1.2, "NDAM": 0.8 } }
//! ```

use std::path::Path;

use kairos_core::LearnedGuidance;

use crate::error::Result;

/// Parse guidance. Out-of-range values are dropped with a warning rather
/// than failing the load.
pub fn parse_guidance(content: &str) -> Result<LearnedGuidance> {
    let mut guidance: LearnedGuidance = serde_json::from_str(content)?;

    if let Some(target) = guidance.family_target
        && !(target.is_finite() && (0.0..=1.0).contains(&target))
    {
        tracing::warn!(target, "family target outside [0, 1], ignoring");
        guidance.family_target = None;
    }
    if let Some(weights) = &mut guidance.organ_weights {
        weights.retain(|organ, weight| {
            let ok = weight.is_finite() && *weight >= 0.0;
            if !ok {
                tracing::warn!(organ = %organ, "invalid organ weight, ignoring");
            }
            ok
        });
    }
    Ok(guidance)
}

pub fn load_guidance(path: &Path) -> Result<LearnedGuidance> {
    let content = std::fs::read_to_string(path)?;
    let guidance = parse_guidance(&content)?;
    tracing::info!("loaded guidance from {}", path.display());
    Ok(guidance)
}
