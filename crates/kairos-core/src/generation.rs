//! External text-generation boundary.
//!
//! The generator only ever sees qualitative guidance: words for how settled,
//! how integrated, which atoms are present. Raw organ scores never leave the
//! core.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::nexus::SemanticNexus;
use crate::occasion::SubjectiveAim;
use crate::organ::FieldBreakdown;
use crate::phrases::humanize_atom;
use crate::regime::Regime;

/// How many nexus atoms are named in the guidance.
const GUIDANCE_ATOMS: usize = 3;

#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GeneratedText {
    pub text: String,
    /// The backend's own confidence estimate.
    pub confidence: f64,
    /// Which route inside the backend produced the text.
    pub path: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationError {
    Timeout,
    Unavailable(String),
    EmptyReply,
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationError::Timeout => write!(f, "generation timed out"),
            GenerationError::Unavailable(msg) => write!(f, "generator unavailable: {msg}"),
            GenerationError::EmptyReply => write!(f, "generator returned empty text"),
        }
    }
}

impl std::error::Error for GenerationError {}

/// An optional external backend. Implementations must honor
/// `request.timeout`; late replies are discarded by the caller anyway.
/// Retries, if any, belong inside the implementation.
pub trait ExternalGenerator: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &GenerationRequest) -> Result<GeneratedText, GenerationError>;
}

/// Felt state rendered into words for the generator.
pub struct FeltGuidance<'a> {
    pub energy: f64,
    pub satisfaction: f64,
    pub kairos: bool,
    pub regime: Option<Regime>,
    pub nexuses: &'a [SemanticNexus],
    pub field: Option<&'a FieldBreakdown>,
    pub aim: Option<&'a SubjectiveAim>,
    pub gentle: bool,
}

impl FeltGuidance<'_> {
    fn energy_words(&self) -> &'static str {
        if self.energy > 0.7 {
            "still unsettled"
        } else if self.energy >= 0.3 {
            "beginning to settle"
        } else {
            "settled"
        }
    }

    fn satisfaction_words(&self) -> &'static str {
        if self.satisfaction > 0.7 {
            "well integrated"
        } else if self.satisfaction >= 0.4 {
            "coming together"
        } else {
            "loosely held"
        }
    }

    /// Qualitative prompt. Contains no digits.
    pub fn prompt(&self) -> String {
        let mut lines = vec![
            "Respond to the person with warmth and brevity.".to_string(),
            format!(
                "The felt sense is {} and {}.",
                self.energy_words(),
                self.satisfaction_words()
            ),
        ];
        lines.push(if self.kairos {
            "The moment feels ripe to offer something.".to_string()
        } else {
            "The moment is still forming; offer rather than conclude.".to_string()
        });
        if let Some(regime) = self.regime {
            lines.push(format!("Overall, {}.", regime.describe()));
        }
        let atoms: Vec<String> = self
            .nexuses
            .iter()
            .take(GUIDANCE_ATOMS)
            .map(|n| strip_digits(&humanize_atom(&n.atom)))
            .filter(|a| !a.is_empty())
            .collect();
        if !atoms.is_empty() {
            lines.push(format!("Present in the field: {}.", atoms.join(", ")));
        }
        if let Some(field) = self.field {
            lines.push(format!("The {} tone leads.", field.dominant()));
        }
        if let Some(aim) = self.aim {
            let atom = strip_digits(&humanize_atom(&aim.atom));
            if !atom.is_empty() {
                lines.push(format!("The exchange is leaning toward {atom}."));
            }
        }
        if self.gentle {
            lines.push("Keep it gentle, slow, and low in intensity.".to_string());
        }
        lines.join("\n")
    }
}

fn strip_digits(s: &str) -> String {
    s.chars().filter(|c| !c.is_ascii_digit()).collect::<String>().trim().to_string()
}
