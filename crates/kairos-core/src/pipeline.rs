//! One conversational turn, end to end.
//!
//! `Pipeline` holds only immutable, shareable parts; every turn builds its
//! own `Occasion`, so one pipeline can serve concurrent turns.

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::convergence::{CycleTrace, converge};
use crate::generation::ExternalGenerator;
use crate::nexus::{LearnedGuidance, SemanticNexus, aggregate};
use crate::occasion::{MaturedProposition, Occasion, Result, SubjectiveAim};
use crate::organ::OrganSensor;
use crate::phrases::{EmptyPhraseSource, PhraseSource};
use crate::regime::Regime;
use crate::select::{EmittedCandidate, SafetySignals, Selector, TurnContext};
use crate::transduction::TransductionSignal;

pub const OUTCOME_VERSION: &str = "1";

/// Per-turn inputs from the host. Everything but the datum is optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnRequest {
    pub datum: String,
    pub position: usize,
    pub embedding: Option<Vec<f32>>,
    #[serde(deserialize_with = "crate::regime::deserialize_label")]
    pub regime: Option<Regime>,
    pub safety: SafetySignals,
    pub transduction: Option<TransductionSignal>,
    pub urgency: f64,
    pub crisis_zone: Option<u8>,
    /// Only read by the uncertainty descent variant.
    pub uncertainty: Option<f64>,
    pub subjective_aim: Option<SubjectiveAim>,
    /// Overrides `selector.slots`.
    pub slots: Option<usize>,
}

impl TurnRequest {
    pub fn new(datum: &str) -> Self {
        Self {
            datum: datum.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub occasion_id: Uuid,
    pub cycles: Vec<CycleTrace>,
    pub kairos_cycle: Option<u32>,
    pub energy: f64,
    pub satisfaction: f64,
    pub propositions: Vec<MaturedProposition>,
    pub nexuses: Vec<SemanticNexus>,
    /// Ranked, best first.
    pub candidates: Vec<EmittedCandidate>,
}

impl TurnOutcome {
    pub fn best(&self) -> Option<&EmittedCandidate> {
        self.candidates.first()
    }
}

#[derive(Serialize)]
struct OutcomeEnvelope<'a> {
    version: &'static str,
    outcome: &'a TurnOutcome,
}

pub fn export_outcome_json(outcome: &TurnOutcome) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&OutcomeEnvelope {
        version: OUTCOME_VERSION,
        outcome,
    })
}

#[derive(Clone)]
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    phrases: Arc<dyn PhraseSource>,
    generator: Option<Arc<dyn ExternalGenerator>>,
    guidance: LearnedGuidance,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config: Arc::new(config),
            phrases: Arc::new(EmptyPhraseSource),
            generator: None,
            guidance: LearnedGuidance::default(),
        }
    }

    pub fn with_phrases(mut self, phrases: Arc<dyn PhraseSource>) -> Self {
        self.phrases = phrases;
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn ExternalGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_guidance(mut self, guidance: LearnedGuidance) -> Self {
        self.guidance = guidance;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Converge, mature, aggregate and select for one turn.
    pub fn process_turn(
        &self,
        request: &TurnRequest,
        organs: &[&dyn OrganSensor],
        rng: &mut impl Rng,
    ) -> Result<TurnOutcome> {
        let mut occasion = Occasion::new(&request.datum, request.position)
            .with_affordance_multiplier(self.config.kairos.affordance_multiplier);
        if let Some(embedding) = &request.embedding {
            occasion = occasion.with_embedding(embedding.clone())?;
        }
        if let Some(aim) = &request.subjective_aim {
            occasion.set_subjective_aim(aim.clone())?;
        }

        let convergence = converge(&mut occasion, organs, request.uncertainty, &self.config)?;
        let nexuses = aggregate(
            occasion.propositions(),
            &convergence.activations,
            occasion.energy(),
            &self.guidance,
            &self.config.nexus,
        );

        let ctx = TurnContext {
            regime: request.regime,
            safety: request.safety,
            transduction: request.transduction,
            urgency: request.urgency,
            crisis_zone: request.crisis_zone,
            field: convergence.field,
            ..TurnContext::from_occasion(&occasion)
        };

        let mut selector = Selector::new(&self.config, self.phrases.as_ref());
        if let Some(generator) = &self.generator {
            selector = selector.with_generator(generator.as_ref());
        }
        let slots = request.slots.unwrap_or(self.config.selector.slots);
        let candidates = selector.select(&nexuses, &ctx, slots, rng);

        tracing::info!(
            occasion = %occasion.id,
            cycles = convergence.trace.len(),
            kairos = occasion.kairos(),
            nexuses = nexuses.len(),
            "turn complete"
        );

        Ok(TurnOutcome {
            occasion_id: occasion.id,
            cycles: convergence.trace,
            kairos_cycle: occasion.kairos_cycle(),
            energy: occasion.energy(),
            satisfaction: occasion.satisfaction(),
            propositions: occasion.propositions().to_vec(),
            nexuses,
            candidates,
        })
    }
}
