//! Tiered strategy selection.
//!
//! Each slot walks an ordered list of tiers, taking the first that yields a
//! draft. Tiers not yet used this turn are tried before repeats, and the
//! fallback tier always answers, so every slot gets a candidate even when
//! every collaborator is down. All confidences pass through the same
//! modulation: regime multiplier, then Kairos boost, then clamp.

use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{PipelineConfig, SafetyConfig};
use crate::constants::clamp_unit;
use crate::generation::{ExternalGenerator, FeltGuidance, GenerationError, GenerationRequest};
use crate::nexus::SemanticNexus;
use crate::occasion::{Occasion, SubjectiveAim};
use crate::organ::{FieldBreakdown, FieldType, Organ};
use crate::phrases::{
    BUILTIN_FALLBACK, BankKey, FUSION_TEMPLATES, Intensity, PhraseSource, WeightedPhrase,
    direct_templates, fill_template, humanize_atom,
};
use crate::regime::Regime;
use crate::sampling::{is_crisis, resolve_temperature, sample_phrase};
use crate::transduction::TransductionSignal;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyTag {
    ExternalGeneration,
    DirectComposition,
    Fusion,
    Transduction,
    Fallback,
}

impl StrategyTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyTag::ExternalGeneration => "external_generation",
            StrategyTag::DirectComposition => "direct_composition",
            StrategyTag::Fusion => "fusion",
            StrategyTag::Transduction => "transduction",
            StrategyTag::Fallback => "fallback",
        }
    }
}

impl fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Turn metrics carried on every candidate.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CandidateMetrics {
    pub energy: f64,
    pub satisfaction: f64,
    pub cycle: u32,
    pub readiness: Option<f64>,
    pub coherence: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EmittedCandidate {
    pub text: String,
    pub strategy: StrategyTag,
    pub atoms: Vec<String>,
    pub organs: Vec<Organ>,
    pub metrics: CandidateMetrics,
    /// Always within [0, 1].
    pub confidence: f64,
    pub classification: String,
}

/// Safety readings from external detectors.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetySignals {
    pub inflation: f64,
    pub temporal_collapse: f64,
    pub safety_gradient: f64,
}

impl Default for SafetySignals {
    fn default() -> Self {
        Self {
            inflation: 0.0,
            temporal_collapse: 0.0,
            safety_gradient: 1.0,
        }
    }
}

impl SafetySignals {
    pub fn requires_low_intensity(&self, config: &SafetyConfig) -> bool {
        self.inflation > config.inflation_max
            || self.temporal_collapse > config.temporal_collapse_max
            || self.safety_gradient < config.safety_gradient_min
    }
}

/// Coarse intensity from energy, forced low whenever a safety condition holds.
pub fn resolve_intensity(energy: f64, safety: &SafetySignals, config: &SafetyConfig) -> Intensity {
    if safety.requires_low_intensity(config) {
        Intensity::Low
    } else if energy > config.high_energy {
        Intensity::High
    } else if energy < config.low_energy {
        Intensity::Low
    } else {
        Intensity::Medium
    }
}

/// Everything about the turn the selector needs besides the nexuses.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnContext {
    pub energy: f64,
    pub satisfaction: f64,
    pub cycle: u32,
    pub kairos: bool,
    pub regime: Option<Regime>,
    pub safety: SafetySignals,
    pub transduction: Option<TransductionSignal>,
    pub urgency: f64,
    pub crisis_zone: Option<u8>,
    pub field: Option<FieldBreakdown>,
    pub aim: Option<SubjectiveAim>,
}

impl TurnContext {
    pub fn new(energy: f64, satisfaction: f64, cycle: u32, kairos: bool) -> Self {
        Self {
            energy,
            satisfaction,
            cycle,
            kairos,
            regime: None,
            safety: SafetySignals::default(),
            transduction: None,
            urgency: 0.0,
            crisis_zone: None,
            field: None,
            aim: None,
        }
    }

    pub fn from_occasion(occasion: &Occasion) -> Self {
        let mut ctx = Self::new(
            occasion.energy(),
            occasion.satisfaction(),
            occasion.cycle(),
            occasion.kairos(),
        );
        ctx.aim = occasion.subjective_aim().cloned();
        ctx
    }

    /// Felt context exists once the occasion has run at least one cycle.
    pub fn has_felt_context(&self) -> bool {
        self.cycle > 0
    }
}

struct Draft {
    text: String,
    atoms: Vec<String>,
    organs: Vec<Organ>,
    readiness: Option<f64>,
    coherence: Option<f64>,
    confidence: f64,
    classification: String,
}

#[derive(Default)]
struct SlotState {
    used_tiers: Vec<StrategyTag>,
    consumed_atoms: HashSet<String>,
    emitted: Vec<String>,
    generator_down: bool,
}

pub struct Selector<'a> {
    config: &'a PipelineConfig,
    phrases: &'a dyn PhraseSource,
    generator: Option<&'a dyn ExternalGenerator>,
}

impl<'a> Selector<'a> {
    pub fn new(config: &'a PipelineConfig, phrases: &'a dyn PhraseSource) -> Self {
        Self {
            config,
            phrases,
            generator: None,
        }
    }

    pub fn with_generator(mut self, generator: &'a dyn ExternalGenerator) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Sampling temperature for this turn.
    pub fn temperature(&self, ctx: &TurnContext) -> f64 {
        let crisis = is_crisis(ctx.urgency, ctx.crisis_zone, &self.config.crisis);
        resolve_temperature(ctx.regime, crisis, &self.config.regime, &self.config.crisis)
    }

    /// Fill `slots` candidates, ranked in slot order.
    pub fn select(
        &self,
        nexuses: &[SemanticNexus],
        ctx: &TurnContext,
        slots: usize,
        rng: &mut impl Rng,
    ) -> Vec<EmittedCandidate> {
        let temperature = self.temperature(ctx);
        let order = self.tier_order(ctx);
        let mut state = SlotState::default();
        let mut candidates = Vec::with_capacity(slots);

        for slot in 0..slots {
            let sequence: Vec<StrategyTag> = order
                .iter()
                .copied()
                .filter(|t| !state.used_tiers.contains(t))
                .chain(order.iter().copied().filter(|t| state.used_tiers.contains(t)))
                .collect();

            let mut picked = None;
            for tier in sequence {
                if let Some(draft) = self.attempt(tier, nexuses, ctx, &mut state, temperature, rng)
                {
                    picked = Some((tier, draft));
                    break;
                }
            }
            let (tier, draft) = picked.unwrap_or_else(|| {
                (
                    StrategyTag::Fallback,
                    self.fallback(&state, ctx, temperature, rng),
                )
            });

            if !state.used_tiers.contains(&tier) {
                state.used_tiers.push(tier);
            }
            if matches!(tier, StrategyTag::DirectComposition | StrategyTag::Fusion) {
                state.consumed_atoms.extend(draft.atoms.iter().cloned());
            }
            state.emitted.push(draft.text.clone());

            let candidate = self.emit(tier, draft, ctx);
            tracing::info!(
                slot,
                strategy = %candidate.strategy,
                confidence = candidate.confidence,
                "candidate selected"
            );
            candidates.push(candidate);
        }
        candidates
    }

    /// Tiers in priority order, fallback excluded.
    fn tier_order(&self, ctx: &TurnContext) -> Vec<StrategyTag> {
        let mut order = Vec::with_capacity(4);
        if self.generator.is_some() && ctx.has_felt_context() {
            order.push(StrategyTag::ExternalGeneration);
        }
        if ctx
            .transduction
            .is_some_and(|s| s.is_active(&self.config.transduction))
        {
            order.push(StrategyTag::Transduction);
        }
        order.push(StrategyTag::DirectComposition);
        order.push(StrategyTag::Fusion);
        order
    }

    fn attempt(
        &self,
        tier: StrategyTag,
        nexuses: &[SemanticNexus],
        ctx: &TurnContext,
        state: &mut SlotState,
        temperature: f64,
        rng: &mut impl Rng,
    ) -> Option<Draft> {
        match tier {
            StrategyTag::ExternalGeneration => self.attempt_external(nexuses, ctx, state),
            StrategyTag::Transduction => self.attempt_transduction(ctx, state, temperature, rng),
            StrategyTag::DirectComposition => {
                self.attempt_direct(nexuses, ctx, state, temperature, rng)
            }
            StrategyTag::Fusion => self.attempt_fusion(nexuses, state, temperature, rng),
            StrategyTag::Fallback => Some(self.fallback(state, ctx, temperature, rng)),
        }
    }

    fn attempt_external(
        &self,
        nexuses: &[SemanticNexus],
        ctx: &TurnContext,
        state: &mut SlotState,
    ) -> Option<Draft> {
        let generator = self.generator?;
        if state.generator_down {
            return None;
        }

        let crisis = is_crisis(ctx.urgency, ctx.crisis_zone, &self.config.crisis);
        let guidance = FeltGuidance {
            energy: ctx.energy,
            satisfaction: ctx.satisfaction,
            kairos: ctx.kairos,
            regime: ctx.regime,
            nexuses,
            field: ctx.field.as_ref(),
            aim: ctx.aim.as_ref(),
            gentle: crisis || ctx.safety.requires_low_intensity(&self.config.safety),
        };
        let timeout = Duration::from_millis(self.config.selector.generation_timeout_ms);
        let request = GenerationRequest {
            prompt: guidance.prompt(),
            max_tokens: self.config.selector.generation_max_tokens,
            timeout,
        };

        let started = Instant::now();
        let result = generator.generate(&request).and_then(|generated| {
            if started.elapsed() > timeout {
                Err(GenerationError::Timeout)
            } else if generated.text.trim().is_empty() {
                Err(GenerationError::EmptyReply)
            } else {
                Ok(generated)
            }
        });

        match result {
            Ok(generated) if state.emitted.iter().any(|t| t == generated.text.trim()) => {
                tracing::debug!(generator = generator.name(), "generated reply repeats a slot");
                None
            }
            Ok(generated) => {
                let top: Vec<&SemanticNexus> = nexuses.iter().take(3).collect();
                let mut organs: Vec<Organ> = Vec::new();
                for organ in top.iter().flat_map(|n| n.participants.iter()) {
                    if !organs.contains(organ) {
                        organs.push(*organ);
                    }
                }
                Some(Draft {
                    text: generated.text.trim().to_string(),
                    atoms: top.iter().map(|n| n.atom.clone()).collect(),
                    organs,
                    readiness: top.first().map(|n| n.emission_readiness),
                    coherence: top.first().map(|n| n.coherence),
                    confidence: clamp_unit(generated.confidence),
                    classification: format!("generated:{}", generated.path),
                })
            }
            Err(e) => {
                tracing::warn!(generator = generator.name(), "external generation failed: {e}");
                state.generator_down = true;
                None
            }
        }
    }

    fn attempt_transduction(
        &self,
        ctx: &TurnContext,
        state: &SlotState,
        temperature: f64,
        rng: &mut impl Rng,
    ) -> Option<Draft> {
        let cfg = &self.config.transduction;
        let signal = ctx.transduction.filter(|s| s.is_active(cfg))?;
        let intensity = resolve_intensity(ctx.energy, &ctx.safety, &self.config.safety);
        let bank = self.phrases.phrases(&BankKey::Mechanism {
            mechanism: signal.mechanism,
            intensity,
        });
        let phrase = sample_phrase(&bank, ctx.field.as_ref(), temperature, &state.emitted, rng)?;
        Some(Draft {
            text: phrase.text.clone(),
            atoms: Vec::new(),
            organs: Vec::new(),
            readiness: None,
            coherence: None,
            confidence: signal.confidence(cfg),
            classification: format!("mechanism:{}:{}", signal.mechanism, intensity),
        })
    }

    fn attempt_direct(
        &self,
        nexuses: &[SemanticNexus],
        ctx: &TurnContext,
        state: &SlotState,
        temperature: f64,
        rng: &mut impl Rng,
    ) -> Option<Draft> {
        let sel = &self.config.selector;
        let top = nexuses
            .iter()
            .find(|n| !state.consumed_atoms.contains(&n.atom))?;

        let (text, classification) = if top.is_bridge() {
            if top.participant_count() < sel.bridge_min_participants
                || top.emission_readiness < sel.bridge_threshold
            {
                return None;
            }
            let intensity = resolve_intensity(ctx.energy, &ctx.safety, &self.config.safety);
            let bank = self.phrases.phrases(&BankKey::Bridge {
                atom: top.atom.clone(),
                intensity,
            });
            let phrase =
                sample_phrase(&bank, ctx.field.as_ref(), temperature, &state.emitted, rng)?;
            (phrase.text.clone(), format!("bridge:{intensity}"))
        } else {
            if top.participant_count() < sel.direct_min_participants
                || top.emission_readiness < sel.direct_threshold
            {
                return None;
            }
            let atom_text = humanize_atom(&top.atom);
            let learned = self.phrases.phrases(&BankKey::MetaAtom(top.atom.clone()));
            match sample_phrase(&learned, ctx.field.as_ref(), temperature, &state.emitted, rng) {
                Some(phrase) => (
                    fill_template(&phrase.text, &[("atom", atom_text.as_str())]),
                    "direct:learned".to_string(),
                ),
                None => {
                    let field = top
                        .dominant_organ()
                        .map_or(FieldType::Semantic, |o| o.field_type());
                    let templates = as_phrases(direct_templates(field));
                    let template = sample_phrase(&templates, None, temperature, &[], rng)?;
                    (
                        fill_template(&template.text, &[("atom", atom_text.as_str())]),
                        format!("direct:{}", field.as_str()),
                    )
                }
            }
        };

        Some(Draft {
            text,
            atoms: vec![top.atom.clone()],
            organs: top.participants.clone(),
            readiness: Some(top.emission_readiness),
            coherence: Some(top.coherence),
            confidence: top.emission_readiness,
            classification,
        })
    }

    fn attempt_fusion(
        &self,
        nexuses: &[SemanticNexus],
        state: &SlotState,
        temperature: f64,
        rng: &mut impl Rng,
    ) -> Option<Draft> {
        let sel = &self.config.selector;
        let ready: Vec<&SemanticNexus> = nexuses
            .iter()
            .filter(|n| !state.consumed_atoms.contains(&n.atom))
            .take(3)
            .filter(|n| n.emission_readiness >= sel.fusion_threshold)
            .collect();
        let [first, second, ..] = ready.as_slice() else {
            return None;
        };
        if first.participant_count() < sel.fusion_min_participants
            && second.participant_count() < sel.fusion_min_participants
        {
            return None;
        }
        if first.is_bridge() || second.is_bridge() {
            tracing::debug!(first = %first.atom, second = %second.atom, "bridge atoms never fuse");
            return None;
        }

        let templates = as_phrases(FUSION_TEMPLATES);
        let template = sample_phrase(&templates, None, temperature, &[], rng)?;
        let (first_text, second_text) = (humanize_atom(&first.atom), humanize_atom(&second.atom));
        let text = fill_template(
            &template.text,
            &[("first", first_text.as_str()), ("second", second_text.as_str())],
        );

        let mut organs = first.participants.clone();
        for organ in &second.participants {
            if !organs.contains(organ) {
                organs.push(*organ);
            }
        }
        let readiness = (first.emission_readiness + second.emission_readiness) / 2.0;
        Some(Draft {
            text,
            atoms: vec![first.atom.clone(), second.atom.clone()],
            organs,
            readiness: Some(readiness),
            coherence: Some((first.coherence + second.coherence) / 2.0),
            confidence: readiness,
            classification: "fusion".to_string(),
        })
    }

    fn fallback(
        &self,
        state: &SlotState,
        ctx: &TurnContext,
        temperature: f64,
        rng: &mut impl Rng,
    ) -> Draft {
        let sel = &self.config.selector;
        let learned = self.phrases.phrases(&BankKey::Fallback);
        let (text, confidence, classification) =
            match sample_phrase(&learned, ctx.field.as_ref(), temperature, &state.emitted, rng) {
                Some(phrase) => (
                    phrase.text.clone(),
                    sel.learned_fallback_confidence,
                    "fallback:learned",
                ),
                None => {
                    let builtin = as_phrases(BUILTIN_FALLBACK);
                    let text = sample_phrase(&builtin, None, temperature, &state.emitted, rng)
                        .map(|p| p.text.clone())
                        .unwrap_or_else(|| BUILTIN_FALLBACK[0].to_string());
                    (text, sel.builtin_fallback_confidence, "fallback:builtin")
                }
            };
        Draft {
            text,
            atoms: Vec::new(),
            organs: Vec::new(),
            readiness: None,
            coherence: None,
            confidence,
            classification: classification.to_string(),
        }
    }

    /// Regime multiplier, then Kairos boost, then clamp.
    pub fn modulate(&self, confidence: f64, ctx: &TurnContext) -> f64 {
        let mut c = confidence * self.config.regime.multiplier(ctx.regime);
        if ctx.kairos {
            c *= self.config.kairos.confidence_boost;
        }
        clamp_unit(c)
    }

    fn emit(&self, strategy: StrategyTag, draft: Draft, ctx: &TurnContext) -> EmittedCandidate {
        EmittedCandidate {
            confidence: self.modulate(draft.confidence, ctx),
            text: draft.text,
            strategy,
            atoms: draft.atoms,
            organs: draft.organs,
            metrics: CandidateMetrics {
                energy: ctx.energy,
                satisfaction: ctx.satisfaction,
                cycle: ctx.cycle,
                readiness: draft.readiness,
                coherence: draft.coherence,
            },
            classification: draft.classification,
        }
    }
}

fn as_phrases(texts: &[&str]) -> Vec<WeightedPhrase> {
    texts.iter().map(|t| WeightedPhrase::new(t, 1.0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::GeneratedText;
    use crate::phrases::{EmptyPhraseSource, PhraseBook};
    use crate::transduction::Mechanism;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(42)
    }

    fn nexus(atom: &str, organs: &[Organ], readiness: f64) -> SemanticNexus {
        let even = 1.0 / organs.len() as f64;
        SemanticNexus {
            atom: atom.to_string(),
            participants: organs.to_vec(),
            activations: organs.iter().map(|o| (*o, even)).collect::<BTreeMap<_, _>>(),
            emission_readiness: readiness,
            coherence: 0.8,
            field_strength: 0.1,
        }
    }

    const FOUR: &[Organ] = &[Organ::Empathy, Organ::Wisdom, Organ::Bond, Organ::Sans];
    const TWO: &[Organ] = &[Organ::Empathy, Organ::Presence];

    fn ctx() -> TurnContext {
        TurnContext::new(0.4, 0.8, 3, false)
    }

    struct FixedGenerator {
        calls: AtomicUsize,
    }

    impl ExternalGenerator for FixedGenerator {
        fn name(&self) -> &str {
            "fixed"
        }

        fn generate(&self, request: &GenerationRequest) -> Result<GeneratedText, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(!request.prompt.chars().any(|c| c.is_ascii_digit()));
            Ok(GeneratedText {
                text: "generated reply".to_string(),
                confidence: 0.9,
                path: "fast".to_string(),
                metadata: BTreeMap::new(),
            })
        }
    }

    struct DownGenerator {
        calls: AtomicUsize,
    }

    impl ExternalGenerator for DownGenerator {
        fn name(&self) -> &str {
            "down"
        }

        fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedText, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(GenerationError::Unavailable("connection refused".to_string()))
        }
    }

    struct SlowGenerator;

    impl ExternalGenerator for SlowGenerator {
        fn name(&self) -> &str {
            "slow"
        }

        fn generate(&self, request: &GenerationRequest) -> Result<GeneratedText, GenerationError> {
            std::thread::sleep(request.timeout + Duration::from_millis(20));
            Ok(GeneratedText {
                text: "too late".to_string(),
                confidence: 1.0,
                path: "slow".to_string(),
                metadata: BTreeMap::new(),
            })
        }
    }

    #[test]
    fn test_empty_nexuses_fall_back_to_builtin() {
        let config = PipelineConfig::default();
        let selector = Selector::new(&config, &EmptyPhraseSource);
        let out = selector.select(&[], &ctx(), 1, &mut rng());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].strategy, StrategyTag::Fallback);
        assert_relative_eq!(out[0].confidence, 0.3, epsilon = 1e-12);
        assert!(BUILTIN_FALLBACK.contains(&out[0].text.as_str()));
    }

    #[test]
    fn test_learned_fallback_preferred() {
        let config = PipelineConfig::default();
        let book = PhraseBook::new().with(BankKey::Fallback, &[("learned hello", 2.0)]);
        let selector = Selector::new(&config, &book);
        let out = selector.select(&[], &ctx(), 1, &mut rng());
        assert_eq!(out[0].text, "learned hello");
        assert_relative_eq!(out[0].confidence, 0.35, epsilon = 1e-12);
        assert_eq!(out[0].classification, "fallback:learned");
    }

    #[test]
    fn test_direct_composition_uses_field_template() {
        let config = PipelineConfig::default();
        let selector = Selector::new(&config, &EmptyPhraseSource);
        let nexuses = [nexus("sense", FOUR, 0.72)];
        let out = selector.select(&nexuses, &ctx(), 1, &mut rng());
        assert_eq!(out[0].strategy, StrategyTag::DirectComposition);
        assert!(out[0].text.to_lowercase().contains("sense"), "{}", out[0].text);
        // all activations equal → first participant (EMPATHY) dominates
        assert_eq!(out[0].classification, "direct:emotional");
        assert_relative_eq!(out[0].confidence, 0.72, epsilon = 1e-12);
        assert_eq!(out[0].organs, FOUR.to_vec());
    }

    #[test]
    fn test_direct_composition_prefers_learned_atom_bank() {
        let config = PipelineConfig::default();
        let book = PhraseBook::new().with(
            BankKey::MetaAtom("sense".to_string()),
            &[("I can feel the {atom} in this.", 1.0)],
        );
        let selector = Selector::new(&config, &book);
        let out = selector.select(&[nexus("sense", FOUR, 0.9)], &ctx(), 1, &mut rng());
        assert_eq!(out[0].text, "I can feel the sense in this.");
        assert_eq!(out[0].classification, "direct:learned");
    }

    #[test]
    fn test_direct_needs_three_participants() {
        let config = PipelineConfig::default();
        let selector = Selector::new(&config, &EmptyPhraseSource);
        let out = selector.select(&[nexus("feel", TWO, 0.9)], &ctx(), 1, &mut rng());
        assert_eq!(out[0].strategy, StrategyTag::Fallback);
    }

    #[test]
    fn test_bridge_atom_uses_lower_threshold_and_bank() {
        let config = PipelineConfig::default();
        let book = PhraseBook::new().with(
            BankKey::Bridge {
                atom: "holding".to_string(),
                intensity: Intensity::Medium,
            },
            &[("Let's just hold this together for a moment.", 1.0)],
        );
        let selector = Selector::new(&config, &book);
        let out = selector.select(&[nexus("holding", TWO, 0.35)], &ctx(), 1, &mut rng());
        assert_eq!(out[0].strategy, StrategyTag::DirectComposition);
        assert_eq!(out[0].classification, "bridge:medium");
    }

    #[test]
    fn test_bridge_safety_override_selects_low_bank() {
        let config = PipelineConfig::default();
        let book = PhraseBook::new()
            .with(
                BankKey::Bridge {
                    atom: "grounding".to_string(),
                    intensity: Intensity::High,
                },
                &[("high", 1.0)],
            )
            .with(
                BankKey::Bridge {
                    atom: "grounding".to_string(),
                    intensity: Intensity::Low,
                },
                &[("low", 1.0)],
            );
        let selector = Selector::new(&config, &book);
        let mut c = TurnContext::new(0.9, 0.8, 3, false);
        c.safety.inflation = 0.75;
        let out = selector.select(&[nexus("grounding", TWO, 0.5)], &c, 1, &mut rng());
        assert_eq!(out[0].text, "low");
    }

    #[test]
    fn test_bridge_without_bank_falls_through() {
        let config = PipelineConfig::default();
        let selector = Selector::new(&config, &EmptyPhraseSource);
        let out = selector.select(&[nexus("holding", TWO, 0.9)], &ctx(), 1, &mut rng());
        assert_eq!(out[0].strategy, StrategyTag::Fallback);
    }

    #[test]
    fn test_resolve_intensity() {
        let cfg = SafetyConfig::default();
        let calm = SafetySignals::default();
        assert_eq!(resolve_intensity(0.8, &calm, &cfg), Intensity::High);
        assert_eq!(resolve_intensity(0.2, &calm, &cfg), Intensity::Low);
        assert_eq!(resolve_intensity(0.5, &calm, &cfg), Intensity::Medium);
        for energy in [0.0, 0.5, 0.95, 1.0] {
            let inflated = SafetySignals {
                inflation: 0.71,
                ..Default::default()
            };
            assert_eq!(resolve_intensity(energy, &inflated, &cfg), Intensity::Low);
            let collapsed = SafetySignals {
                temporal_collapse: 0.8,
                ..Default::default()
            };
            assert_eq!(resolve_intensity(energy, &collapsed, &cfg), Intensity::Low);
            let unsafe_gradient = SafetySignals {
                safety_gradient: 0.3,
                ..Default::default()
            };
            assert_eq!(resolve_intensity(energy, &unsafe_gradient, &cfg), Intensity::Low);
        }
    }

    #[test]
    fn test_fusion_of_two_ready_nexuses() {
        let config = PipelineConfig::default();
        let selector = Selector::new(&config, &EmptyPhraseSource);
        let nexuses = [nexus("longing", TWO, 0.6), nexus("hope", &[Organ::Bond], 0.55)];
        let out = selector.select(&nexuses, &ctx(), 1, &mut rng());
        assert_eq!(out[0].strategy, StrategyTag::Fusion);
        assert_eq!(out[0].atoms, vec!["longing".to_string(), "hope".to_string()]);
        assert_relative_eq!(out[0].confidence, 0.575, epsilon = 1e-12);
        let lower = out[0].text.to_lowercase();
        assert!(lower.contains("longing") && lower.contains("hope"), "{lower}");
    }

    #[test]
    fn test_fusion_needs_a_multi_organ_nexus() {
        let config = PipelineConfig::default();
        let selector = Selector::new(&config, &EmptyPhraseSource);
        let nexuses = [
            nexus("a", &[Organ::Bond], 0.6),
            nexus("b", &[Organ::Sans], 0.55),
        ];
        let out = selector.select(&nexuses, &ctx(), 1, &mut rng());
        assert_eq!(out[0].strategy, StrategyTag::Fallback);
    }

    #[test]
    fn test_fusion_never_uses_bridge_atoms() {
        let config = PipelineConfig::default();
        let selector = Selector::new(&config, &EmptyPhraseSource);
        let nexuses = [nexus("longing", TWO, 0.6), nexus("pacing", &[Organ::Rnx], 0.55)];
        let out = selector.select(&nexuses, &ctx(), 3, &mut rng());
        assert!(out.iter().all(|c| c.strategy != StrategyTag::Fusion));
    }

    #[test]
    fn test_slots_prefer_unused_tiers_and_fresh_atoms() {
        let config = PipelineConfig::default();
        let selector = Selector::new(&config, &EmptyPhraseSource);
        let nexuses = [
            nexus("sense", FOUR, 0.9),
            nexus("clarity", FOUR, 0.8),
            nexus("trust", TWO, 0.7),
        ];
        let out = selector.select(&nexuses, &ctx(), 3, &mut rng());
        let tags: Vec<StrategyTag> = out.iter().map(|c| c.strategy).collect();
        // slot 1 direct on "sense"; slot 2 fusion on "clarity"+"trust";
        // slot 3 nothing fresh left → fallback
        assert_eq!(
            tags,
            vec![
                StrategyTag::DirectComposition,
                StrategyTag::Fusion,
                StrategyTag::Fallback
            ]
        );
        assert_eq!(out[0].atoms, vec!["sense".to_string()]);
        assert_eq!(out[1].atoms, vec!["clarity".to_string(), "trust".to_string()]);
    }

    #[test]
    fn test_tier_repeats_when_nothing_else_viable() {
        let config = PipelineConfig::default();
        let selector = Selector::new(&config, &EmptyPhraseSource);
        let nexuses = [nexus("sense", FOUR, 0.9), nexus("clarity", FOUR, 0.8)];
        let out = selector.select(&nexuses, &ctx(), 2, &mut rng());
        // fusion is tried first for slot 2 but only one atom is left
        assert_eq!(out[1].strategy, StrategyTag::DirectComposition);
        assert_eq!(out[1].atoms, vec!["clarity".to_string()]);
    }

    #[test]
    fn test_fallback_slots_avoid_duplicate_text() {
        let config = PipelineConfig::default();
        let selector = Selector::new(&config, &EmptyPhraseSource);
        let out = selector.select(&[], &ctx(), 3, &mut rng());
        let texts: HashSet<&str> = out.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts.len(), 3);
    }

    #[test]
    fn test_transduction_preempts_direct() {
        let config = PipelineConfig::default();
        let book = PhraseBook::new().with(
            BankKey::Mechanism {
                mechanism: Mechanism::Soothing,
                intensity: Intensity::Medium,
            },
            &[("Something is softening here.", 1.0)],
        );
        let selector = Selector::new(&config, &book);
        let mut c = ctx();
        c.transduction = Some(TransductionSignal {
            mechanism: Mechanism::Soothing,
            transition_probability: 0.5,
            mutual_satisfaction: 0.5,
        });
        let out = selector.select(&[nexus("sense", FOUR, 0.9)], &c, 2, &mut rng());
        assert_eq!(out[0].strategy, StrategyTag::Transduction);
        assert_relative_eq!(out[0].confidence, 0.70 * 0.85 * 0.85, epsilon = 1e-12);
        assert_eq!(out[1].strategy, StrategyTag::DirectComposition);
    }

    #[test]
    fn test_transduction_ignored_below_probability() {
        let config = PipelineConfig::default();
        let selector = Selector::new(&config, &EmptyPhraseSource);
        let mut c = ctx();
        c.transduction = Some(TransductionSignal {
            mechanism: Mechanism::Bracing,
            transition_probability: 0.2,
            mutual_satisfaction: 0.9,
        });
        let out = selector.select(&[nexus("sense", FOUR, 0.9)], &c, 1, &mut rng());
        assert_eq!(out[0].strategy, StrategyTag::DirectComposition);
    }

    #[test]
    fn test_external_generation_wins_outright() {
        let config = PipelineConfig::default();
        let generator = FixedGenerator {
            calls: AtomicUsize::new(0),
        };
        let selector = Selector::new(&config, &EmptyPhraseSource).with_generator(&generator);
        let out = selector.select(&[nexus("sense", FOUR, 0.9)], &ctx(), 2, &mut rng());
        assert_eq!(out[0].strategy, StrategyTag::ExternalGeneration);
        assert_eq!(out[0].text, "generated reply");
        assert_eq!(out[0].classification, "generated:fast");
        assert_relative_eq!(out[0].confidence, 0.9, epsilon = 1e-12);
        // external generation does not consume atoms
        assert_eq!(out[1].strategy, StrategyTag::DirectComposition);
    }

    #[test]
    fn test_repeated_generated_reply_is_skipped() {
        let config = PipelineConfig::default();
        let generator = FixedGenerator {
            calls: AtomicUsize::new(0),
        };
        let selector = Selector::new(&config, &EmptyPhraseSource).with_generator(&generator);
        let out = selector.select(&[nexus("sense", FOUR, 0.9)], &ctx(), 3, &mut rng());
        let strategies: Vec<StrategyTag> = out.iter().map(|c| c.strategy).collect();
        assert_eq!(
            strategies,
            vec![
                StrategyTag::ExternalGeneration,
                StrategyTag::DirectComposition,
                StrategyTag::Fallback,
            ]
        );
        let texts: HashSet<&str> = out.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts.len(), 3);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_external_generation_needs_felt_context() {
        let config = PipelineConfig::default();
        let generator = FixedGenerator {
            calls: AtomicUsize::new(0),
        };
        let selector = Selector::new(&config, &EmptyPhraseSource).with_generator(&generator);
        let out = selector.select(&[], &TurnContext::new(1.0, 0.0, 0, false), 1, &mut rng());
        assert_eq!(out[0].strategy, StrategyTag::Fallback);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_generator_failure_falls_through_once() {
        let config = PipelineConfig::default();
        let generator = DownGenerator {
            calls: AtomicUsize::new(0),
        };
        let selector = Selector::new(&config, &EmptyPhraseSource).with_generator(&generator);
        let out = selector.select(&[nexus("sense", FOUR, 0.9)], &ctx(), 3, &mut rng());
        assert_eq!(out[0].strategy, StrategyTag::DirectComposition);
        assert_eq!(out.len(), 3);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_generation_is_discarded() {
        let mut config = PipelineConfig::default();
        config.selector.generation_timeout_ms = 5;
        let generator = SlowGenerator;
        let selector = Selector::new(&config, &EmptyPhraseSource).with_generator(&generator);
        let out = selector.select(&[], &ctx(), 1, &mut rng());
        assert_eq!(out[0].strategy, StrategyTag::Fallback);
    }

    #[test]
    fn test_modulation_order_and_clamp() {
        let config = PipelineConfig::default();
        let selector = Selector::new(&config, &EmptyPhraseSource);
        let mut c = ctx();
        c.regime = Some(Regime::WarmingUp);
        assert_relative_eq!(selector.modulate(0.5, &c), 0.4, epsilon = 1e-12);
        c.kairos = true;
        assert_relative_eq!(selector.modulate(0.5, &c), 0.6, epsilon = 1e-12);
        c.regime = Some(Regime::Stable);
        assert_eq!(selector.modulate(0.9, &c), 1.0);
        c.regime = None;
        c.kairos = false;
        assert_eq!(selector.modulate(0.5, &c), 0.5);
    }

    #[test]
    fn test_confidence_bounded_for_all_regimes() {
        let config = PipelineConfig::default();
        let generator = FixedGenerator {
            calls: AtomicUsize::new(0),
        };
        let nexuses = [
            nexus("sense", FOUR, 1.0),
            nexus("clarity", TWO, 0.95),
            nexus("trust", FOUR, 0.9),
        ];
        let regimes = Regime::ALL.map(Some).into_iter().chain([None]);
        for regime in regimes {
            for kairos in [false, true] {
                let mut c = ctx();
                c.regime = regime;
                c.kairos = kairos;
                for selector in [
                    Selector::new(&config, &EmptyPhraseSource),
                    Selector::new(&config, &EmptyPhraseSource).with_generator(&generator),
                ] {
                    for cand in selector.select(&nexuses, &c, 4, &mut rng()) {
                        assert!((0.0..=1.0).contains(&cand.confidence), "{cand:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_crisis_forces_min_temperature() {
        let config = PipelineConfig::default();
        let selector = Selector::new(&config, &EmptyPhraseSource);
        let mut c = ctx();
        c.regime = Some(Regime::Exploring);
        assert_eq!(selector.temperature(&c), 1.4);
        c.urgency = 0.95;
        assert_eq!(selector.temperature(&c), config.crisis.min_temperature);
        c.urgency = 0.0;
        c.crisis_zone = Some(5);
        assert_eq!(selector.temperature(&c), config.crisis.min_temperature);
    }

    #[test]
    fn test_crisis_sampling_is_peaked() {
        let config = PipelineConfig::default();
        let book = PhraseBook::new().with(
            BankKey::Fallback,
            &[("steady", 3.0), ("wander", 1.0)],
        );
        let selector = Selector::new(&config, &book);
        let mut c = ctx();
        c.regime = Some(Regime::Exploring);
        c.crisis_zone = Some(4);
        let mut rng = rng();
        let steady = (0..200)
            .filter(|_| selector.select(&[], &c, 1, &mut rng)[0].text == "steady")
            .count();
        // e^(2/0.25) odds ≈ 2980:1
        assert!(steady >= 195, "steady = {steady}");
    }
}
