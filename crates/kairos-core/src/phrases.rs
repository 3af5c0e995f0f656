//! Phrase banks, built-in templates, and the always-available fallback list.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::organ::{FieldBreakdown, FieldType};
use crate::transduction::Mechanism;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(\w+)\}").unwrap());

/// Coarse intensity used to key bridge and mechanism banks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    Low,
    Medium,
    High,
}

impl Intensity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intensity::Low => "low",
            Intensity::Medium => "medium",
            Intensity::High => "high",
        }
    }

    pub fn from_name(name: &str) -> Option<Intensity> {
        match name {
            "low" => Some(Intensity::Low),
            "medium" => Some(Intensity::Medium),
            "high" => Some(Intensity::High),
            _ => None,
        }
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key into a phrase source.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum BankKey {
    /// Phrases learned for one meta-atom.
    MetaAtom(String),
    /// Bridge-atom bank at one intensity.
    Bridge { atom: String, intensity: Intensity },
    /// Transduction mechanism bank at one intensity.
    Mechanism {
        mechanism: Mechanism,
        intensity: Intensity,
    },
    Fallback,
}

impl BankKey {
    /// Parse the textual form produced by `Display`.
    pub fn parse(key: &str) -> Option<BankKey> {
        let parts: Vec<&str> = key.trim().split(':').collect();
        match parts.as_slice() {
            ["fallback"] => Some(BankKey::Fallback),
            ["atom", atom] if !atom.is_empty() => Some(BankKey::MetaAtom(atom.to_string())),
            ["bridge", atom, intensity] if !atom.is_empty() => Some(BankKey::Bridge {
                atom: atom.to_string(),
                intensity: Intensity::from_name(intensity)?,
            }),
            ["mechanism", mechanism, intensity] => Some(BankKey::Mechanism {
                mechanism: Mechanism::from_name(mechanism)?,
                intensity: Intensity::from_name(intensity)?,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for BankKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BankKey::MetaAtom(atom) => write!(f, "atom:{atom}"),
            BankKey::Bridge { atom, intensity } => write!(f, "bridge:{atom}:{intensity}"),
            BankKey::Mechanism {
                mechanism,
                intensity,
            } => write!(f, "mechanism:{mechanism}:{intensity}"),
            BankKey::Fallback => write!(f, "fallback"),
        }
    }
}

/// One candidate string with its learned weight and optional field alignment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightedPhrase {
    pub text: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub field: Option<FieldBreakdown>,
}

fn default_weight() -> f64 {
    1.0
}

impl WeightedPhrase {
    pub fn new(text: &str, weight: f64) -> Self {
        Self {
            text: text.to_string(),
            weight,
            field: None,
        }
    }
}

/// Read-only phrase store seen by the selector. A missing bank is an empty
/// list, never an error.
pub trait PhraseSource: Send + Sync {
    fn phrases(&self, key: &BankKey) -> Vec<WeightedPhrase>;
}

/// A source with no banks at all.
pub struct EmptyPhraseSource;

impl PhraseSource for EmptyPhraseSource {
    fn phrases(&self, _key: &BankKey) -> Vec<WeightedPhrase> {
        Vec::new()
    }
}

/// In-memory phrase banks.
#[derive(Clone, Debug, Default)]
pub struct PhraseBook {
    banks: HashMap<BankKey, Vec<WeightedPhrase>>,
}

impl PhraseBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append phrases to a bank. Non-finite or non-positive weights are dropped.
    pub fn insert(&mut self, key: BankKey, phrases: impl IntoIterator<Item = WeightedPhrase>) {
        let valid: Vec<WeightedPhrase> = phrases
            .into_iter()
            .filter(|p| p.weight.is_finite() && p.weight > 0.0 && !p.text.trim().is_empty())
            .collect();
        if !valid.is_empty() {
            self.banks.entry(key).or_default().extend(valid);
        }
    }

    pub fn with(mut self, key: BankKey, phrases: &[(&str, f64)]) -> Self {
        self.insert(key, phrases.iter().map(|(t, w)| WeightedPhrase::new(t, *w)));
        self
    }

    pub fn bank_count(&self) -> usize {
        self.banks.len()
    }

    pub fn phrase_count(&self) -> usize {
        self.banks.values().map(|b| b.len()).sum()
    }
}

impl PhraseSource for PhraseBook {
    fn phrases(&self, key: &BankKey) -> Vec<WeightedPhrase> {
        self.banks.get(key).cloned().unwrap_or_default()
    }
}

/// Always non-empty; guarantees a candidate for every slot.
pub const BUILTIN_FALLBACK: &[&str] = &[
    "I'm here with you.",
    "Tell me more about what's happening for you.",
    "I'm listening. Take whatever time you need.",
    "That sounds like a lot to hold. What feels most present right now?",
];

/// Direct-composition templates per field type. `{atom}` is filled with the
/// humanized atom.
pub fn direct_templates(field: FieldType) -> &'static [&'static str] {
    match field {
        FieldType::Attention => &[
            "I'm hearing {atom} underneath what you're saying.",
            "Something about {atom} keeps drawing my attention.",
        ],
        FieldType::Emotional => &[
            "There's a feeling of {atom} moving through this.",
            "I sense {atom} in how this lands for you.",
        ],
        FieldType::Pattern => &[
            "There seems to be a pattern of {atom} here.",
            "{atom} keeps showing up, as if it's asking to be seen.",
        ],
        FieldType::Truth => &[
            "It sounds like {atom} is what's most true right now.",
            "Underneath it all, {atom} feels honest.",
        ],
        FieldType::Temporal => &[
            "Right now, in this moment, there's {atom}.",
            "Let's stay with {atom} for a moment, without rushing.",
        ],
        FieldType::Relational => &[
            "{atom} seems to live between you and the people around you.",
            "I notice {atom} in how you're connecting with this.",
        ],
        FieldType::Semantic => &[
            "The word that keeps coming back is {atom}.",
            "What you're describing sounds a lot like {atom}.",
        ],
        FieldType::Urgency => &[
            "There's something pressing here around {atom}.",
            "{atom} feels like it needs attention now.",
        ],
        FieldType::Rhythm => &[
            "There's a rhythm to this, and {atom} is part of it.",
            "{atom} seems to come and go in waves.",
        ],
        FieldType::Polyvagal => &[
            "Your body might be holding {atom} right now.",
            "I wonder how {atom} feels in your body.",
        ],
        FieldType::Scale => &[
            "{atom} feels bigger than just this one moment.",
            "Zooming out a little, {atom} seems to run through all of it.",
        ],
    }
}

/// Two-slot fusion templates.
pub const FUSION_TEMPLATES: &[&str] = &[
    "I'm sensing both {first} and {second} here.",
    "There's {first}, and alongside it, {second}.",
    "{first} and {second} seem to be meeting in this.",
];

/// Fill `{name}` placeholders from `values`. Unknown names are left as-is.
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let filled = PLACEHOLDER.replace_all(template, |caps: &regex::Captures| {
        let name = &caps[1];
        values
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.to_string())
            .unwrap_or_else(|| caps[0].to_string())
    });
    capitalize_first(&filled)
}

/// `sense_of_self` → `sense of self`.
pub fn humanize_atom(atom: &str) -> String {
    atom.replace(['_', '-'], " ").trim().to_string()
}

fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bank_key_display_and_parse() {
        let keys = [
            BankKey::Fallback,
            BankKey::MetaAtom("sense".to_string()),
            BankKey::Bridge {
                atom: "holding".to_string(),
                intensity: Intensity::Low,
            },
            BankKey::Mechanism {
                mechanism: Mechanism::Soothing,
                intensity: Intensity::High,
            },
        ];
        for key in keys {
            assert_eq!(BankKey::parse(&key.to_string()), Some(key));
        }
        assert_eq!(BankKey::parse("bridge:holding:extreme"), None);
        assert_eq!(BankKey::parse("atom:"), None);
        assert_eq!(BankKey::parse("nonsense"), None);
    }

    #[test]
    fn test_phrase_book_missing_bank_is_empty() {
        let book = PhraseBook::new().with(BankKey::Fallback, &[("hi", 1.0)]);
        assert!(book.phrases(&BankKey::MetaAtom("x".to_string())).is_empty());
        assert_eq!(book.phrases(&BankKey::Fallback).len(), 1);
    }

    #[test]
    fn test_phrase_book_drops_bad_weights() {
        let book = PhraseBook::new().with(
            BankKey::Fallback,
            &[("ok", 1.0), ("zero", 0.0), ("nan", f64::NAN), ("  ", 1.0)],
        );
        assert_eq!(book.phrase_count(), 1);
    }

    #[test]
    fn test_fill_template() {
        let out = fill_template("{atom} feels big, {other}.", &[("atom", "grief")]);
        assert_eq!(out, "Grief feels big, {other}.");
    }

    #[test]
    fn test_humanize_atom() {
        assert_eq!(humanize_atom("sense_of_self"), "sense of self");
        assert_eq!(humanize_atom("self-doubt"), "self doubt");
    }

    #[test]
    fn test_builtin_fallback_non_empty() {
        assert!(!BUILTIN_FALLBACK.is_empty());
        assert!(!FUSION_TEMPLATES.is_empty());
        assert!(!direct_templates(FieldType::Scale).is_empty());
    }
}
