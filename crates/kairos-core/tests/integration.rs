//! End-to-end turns across the public API:
//! organs → occasion → maturation → nexuses → candidates.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use approx::assert_relative_eq;
use kairos_core::phrases::BUILTIN_FALLBACK;
use kairos_core::{
    BankKey, DescentVariant, EmptyPhraseSource, ExternalGenerator, GeneratedText, GenerationError,
    GenerationRequest, LearnedGuidance, Occasion, OccasionError, OccasionView, Organ, OrganSensor,
    OrganSignal, Phase, PhraseBook, Pipeline, PipelineConfig, Regime, SemanticNexus, Selector,
    StrategyTag, TurnContext, TurnRequest, aggregate, converge,
};
use rand::SeedableRng;
use rand::rngs::SmallRng;

fn rng() -> SmallRng {
    SmallRng::seed_from_u64(42)
}

/// Reports the same reading every cycle.
struct Fixed {
    organ: Organ,
    coherence: f64,
    confidence: Option<f64>,
    lure: Option<f64>,
    atoms: Vec<(&'static str, f64)>,
}

impl Fixed {
    fn new(organ: Organ, coherence: f64) -> Self {
        Self {
            organ,
            coherence,
            confidence: None,
            lure: None,
            atoms: Vec::new(),
        }
    }

    fn atom(mut self, atom: &'static str, activation: f64) -> Self {
        self.atoms.push((atom, activation));
        self
    }

    fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    fn lure(mut self, lure: f64) -> Self {
        self.lure = Some(lure);
        self
    }
}

impl OrganSensor for Fixed {
    fn organ(&self) -> Organ {
        self.organ
    }

    fn sense(&self, _view: &OccasionView<'_>) -> Option<OrganSignal> {
        let mut signal = OrganSignal::new(self.organ, self.coherence);
        if let Some(c) = self.confidence {
            signal = signal.with_confidence(c);
        }
        if let Some(l) = self.lure {
            signal = signal.with_lure(l);
        }
        for (atom, activation) in &self.atoms {
            signal = signal.with_atom(atom, *activation);
        }
        Some(signal)
    }
}

fn nexus(atom: &str, organs: &[Organ], readiness: f64) -> SemanticNexus {
    SemanticNexus {
        atom: atom.to_string(),
        participants: organs.to_vec(),
        activations: organs.iter().map(|o| (*o, 0.5)).collect(),
        emission_readiness: readiness,
        coherence: 0.7,
        field_strength: 0.1,
    }
}

/// Canonical coefficients, {NDAM 0.9, EO 0.2} for three cycles.
#[test]
fn scenario_a_energy_trends_down_and_matures() {
    let mut config = PipelineConfig::default();
    config.convergence.max_cycles = 3;
    config.convergence.stop_on_kairos = false;

    let ndam = Fixed::new(Organ::Ndam, 0.9).atom("pressure", 0.9);
    let eo = Fixed::new(Organ::Eo, 0.2).atom("pressure", 0.3).atom("bracing_body", 0.6);
    let mut occasion = Occasion::new("everything is happening at once", 0);

    let result = converge(&mut occasion, &[&ndam, &eo], None, &config).unwrap();

    let energies: Vec<f64> = result.trace.iter().map(|t| t.energy).collect();
    assert_eq!(energies.len(), 3);
    assert!(energies.windows(2).all(|w| w[1] < w[0]), "{energies:?}");
    assert_relative_eq!(energies[0], 0.5875, epsilon = 1e-9);
    assert_relative_eq!(energies[1], 0.396375, epsilon = 1e-6);
    assert_eq!(occasion.kairos_cycle(), Some(2));

    assert_eq!(occasion.phase(), Phase::Matured);
    let props = occasion.propositions();
    assert!(!props.is_empty());
    let pressure = props.iter().find(|p| p.atom == "pressure").unwrap();
    assert_eq!(pressure.organs, vec![Organ::Ndam, Organ::Eo]);
    assert_eq!(result.activations["pressure"][&Organ::Ndam], 0.9);
}

#[test]
fn scenario_b_empty_nexuses_fall_back() {
    let config = PipelineConfig::default();
    let selector = Selector::new(&config, &EmptyPhraseSource);
    let ctx = TurnContext::new(0.6, 0.4, 2, false);
    let out = selector.select(&[], &ctx, 1, &mut rng());

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].strategy, StrategyTag::Fallback);
    assert_eq!(out[0].strategy.as_str(), "fallback");
    assert_relative_eq!(out[0].confidence, 0.3, epsilon = 1e-12);
    assert!(BUILTIN_FALLBACK.contains(&out[0].text.as_str()));
}

#[test]
fn scenario_c_direct_composition_first() {
    let config = PipelineConfig::default();
    let selector = Selector::new(&config, &EmptyPhraseSource);
    let nexuses = [
        nexus(
            "sense",
            &[Organ::Empathy, Organ::Wisdom, Organ::Presence, Organ::Sans],
            0.72,
        ),
        nexus("feel", &[Organ::Empathy, Organ::Bond], 0.58),
    ];
    let ctx = TurnContext::new(0.35, 0.8, 3, false);
    let out = selector.select(&nexuses, &ctx, 3, &mut rng());

    assert_eq!(out[0].strategy, StrategyTag::DirectComposition);
    assert_eq!(out[0].atoms, vec!["sense".to_string()]);
    assert_relative_eq!(out[0].confidence, 0.72, epsilon = 1e-12);
    assert_eq!(out.len(), 3);
}

#[test]
fn full_turn_composes_from_shared_atom() {
    let organs: Vec<Fixed> = [Organ::Empathy, Organ::Wisdom, Organ::Presence, Organ::Bond]
        .into_iter()
        .map(|o| {
            Fixed::new(o, 0.9)
                .confidence(1.0)
                .lure(0.3)
                .atom("sense", 0.9)
        })
        .collect();
    let sensors: Vec<&dyn OrganSensor> = organs.iter().map(|o| o as &dyn OrganSensor).collect();

    let pipeline = Pipeline::new(PipelineConfig::default());
    let outcome = pipeline
        .process_turn(&TurnRequest::new("I sense something"), &sensors, &mut rng())
        .unwrap();

    assert_eq!(outcome.kairos_cycle, Some(2));
    assert_eq!(outcome.cycles.len(), 2);
    assert_eq!(outcome.nexuses.len(), 1);
    let top = &outcome.nexuses[0];
    assert_eq!(top.participant_count(), 4);
    assert_relative_eq!(top.emission_readiness, 1.0 - 0.2924, epsilon = 1e-9);

    let best = outcome.best().unwrap();
    assert_eq!(best.strategy, StrategyTag::DirectComposition);
    assert!(best.text.to_lowercase().contains("sense"));
    // readiness × 1.5 Kairos boost, clamped
    assert_eq!(best.confidence, 1.0);
}

#[test]
fn bridge_atoms_never_fuse() {
    let config = PipelineConfig::default();
    let book = PhraseBook::new().with(
        BankKey::Bridge {
            atom: "holding".to_string(),
            intensity: kairos_core::Intensity::Medium,
        },
        &[("We can hold this together.", 1.0)],
    );
    let selector = Selector::new(&config, &book);
    let nexuses = [
        nexus("holding", &[Organ::Empathy, Organ::Bond], 0.9),
        nexus("witnessing", &[Organ::Presence, Organ::Listening], 0.85),
        nexus("grief", &[Organ::Empathy, Organ::Eo], 0.8),
    ];
    let ctx = TurnContext::new(0.5, 0.8, 3, true);
    let out = selector.select(&nexuses, &ctx, 4, &mut rng());

    assert_eq!(out[0].classification, "bridge:medium");
    for cand in &out {
        if cand.strategy == StrategyTag::Fusion {
            assert!(cand.atoms.iter().all(|a| !kairos_core::is_bridge_atom(a)));
        }
    }
}

struct Refusing {
    calls: AtomicUsize,
}

impl ExternalGenerator for Refusing {
    fn name(&self) -> &str {
        "refusing"
    }

    fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedText, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(GenerationError::Unavailable("503".to_string()))
    }
}

struct Echo;

impl ExternalGenerator for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<GeneratedText, GenerationError> {
        assert!(!request.prompt.chars().any(|c| c.is_ascii_digit()));
        Ok(GeneratedText {
            text: "  I'm with you in this.  ".to_string(),
            confidence: 1.7,
            path: "echo".to_string(),
            metadata: BTreeMap::from([("model".to_string(), "echo".to_string())]),
        })
    }
}

#[test]
fn failing_generator_falls_through() {
    let generator = Arc::new(Refusing {
        calls: AtomicUsize::new(0),
    });
    let pipeline = Pipeline::new(PipelineConfig::default()).with_generator(generator.clone());
    let organ = Fixed::new(Organ::Listening, 0.5);
    let outcome = pipeline
        .process_turn(&TurnRequest::new("hello"), &[&organ], &mut rng())
        .unwrap();

    assert_eq!(outcome.candidates.len(), 3);
    assert!(
        outcome
            .candidates
            .iter()
            .all(|c| c.strategy != StrategyTag::ExternalGeneration)
    );
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn generated_reply_is_trimmed_and_clamped() {
    let pipeline = Pipeline::new(PipelineConfig::default()).with_generator(Arc::new(Echo));
    let request = TurnRequest {
        regime: Some(Regime::Committed),
        urgency: 0.9,
        ..TurnRequest::new("it's 3am and I can't sleep")
    };
    let outcome = pipeline.process_turn(&request, &[], &mut rng()).unwrap();
    let best = outcome.best().unwrap();
    assert_eq!(best.strategy, StrategyTag::ExternalGeneration);
    assert_eq!(best.text, "I'm with you in this.");
    assert!(best.confidence <= 1.0);
}

#[test]
fn matured_occasion_rejects_further_work() {
    let mut occasion = Occasion::new("x", 0);
    occasion
        .record_affordance("a", Organ::Empathy, 0.5, 0.1)
        .unwrap();
    occasion.mature().unwrap();

    assert!(matches!(
        occasion.mature(),
        Err(OccasionError::InvalidSequence { .. })
    ));
    let config = PipelineConfig::default();
    assert!(matches!(
        occasion.descend(&BTreeMap::new(), None, None, &config.descent),
        Err(OccasionError::InvalidSequence { .. })
    ));
    assert!(matches!(
        occasion.record_affordance("b", Organ::Bond, 0.5, 0.1),
        Err(OccasionError::InvalidSequence { .. })
    ));
    assert_eq!(occasion.propositions().len(), 1);
}

#[test]
fn uncertainty_variant_ignores_lures() {
    let mut config = PipelineConfig::default();
    config.descent.variant = DescentVariant::Uncertainty;
    config.convergence.max_cycles = 1;

    let lured = Fixed::new(Organ::Empathy, 0.6).lure(1.0);
    let plain = Fixed::new(Organ::Empathy, 0.6);

    let mut a = Occasion::new("a", 0);
    let mut b = Occasion::new("b", 0);
    converge(&mut a, &[&lured], Some(0.5), &config).unwrap();
    converge(&mut b, &[&plain], Some(0.5), &config).unwrap();
    assert_eq!(a.energy(), b.energy());

    let mut c = Occasion::new("c", 0);
    converge(&mut c, &[&plain], Some(0.0), &config).unwrap();
    assert!(a.energy() > c.energy());
}

#[test]
fn organ_weights_reorder_nexuses() {
    let config = PipelineConfig::default();
    let mut occasion = Occasion::new("x", 0);
    occasion
        .record_affordance("calm", Organ::Presence, 0.6, 0.0)
        .unwrap();
    occasion
        .record_affordance("fear", Organ::Ndam, 0.62, 0.0)
        .unwrap();
    let coherences = BTreeMap::from([(Organ::Presence, 0.9), (Organ::Ndam, 0.9)]);
    occasion
        .descend(&coherences, None, None, &config.descent)
        .unwrap();
    occasion.mature().unwrap();

    let plain = aggregate(
        occasion.propositions(),
        &BTreeMap::new(),
        occasion.energy(),
        &LearnedGuidance::default(),
        &config.nexus,
    );
    assert_eq!(plain[0].atom, "fear");

    let guidance = LearnedGuidance {
        family_target: None,
        organ_weights: Some(BTreeMap::from([(Organ::Ndam, 0.5)])),
    };
    let weighted = aggregate(
        occasion.propositions(),
        &BTreeMap::new(),
        occasion.energy(),
        &guidance,
        &config.nexus,
    );
    assert_eq!(weighted[0].atom, "calm");
}
