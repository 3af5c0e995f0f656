//! Felt-convergence engine.
//!
//! An occasion descends in energy across organ cycles until its Kairos
//! window opens, matures its affordances into propositions, and hands them
//! to the nexus aggregator. The strategy selector turns the ranked nexuses
//! into text candidates through a fixed tier cascade.
//!
//! Zero I/O: organs, phrase banks and text generators are traits supplied
//! by the host.

pub mod config;
pub mod constants;
pub mod convergence;
pub mod generation;
pub mod nexus;
pub mod occasion;
pub mod organ;
pub mod phrases;
pub mod pipeline;
pub mod regime;
pub mod sampling;
pub mod select;
pub mod transduction;

pub use config::{
    ConvergenceConfig, CrisisConfig, DescentConfig, DescentVariant, KairosConfig, NexusConfig,
    PipelineConfig, RegimeConfig, SafetyConfig, SelectorConfig, TransductionConfig,
};
pub use constants::{BRIDGE_ATOMS, EMBEDDING_DIM, INITIAL_ENERGY, is_bridge_atom};
pub use convergence::{ConvergenceResult, CycleTrace, converge};
pub use generation::{ExternalGenerator, GeneratedText, GenerationError, GenerationRequest};
pub use nexus::{LearnedGuidance, SemanticNexus, aggregate};
pub use occasion::{
    FeltAffordance, MaturedProposition, Occasion, OccasionError, Phase, SubjectiveAim,
};
pub use organ::{FieldBreakdown, FieldType, OccasionView, Organ, OrganSensor, OrganSignal};
pub use phrases::{BankKey, EmptyPhraseSource, Intensity, PhraseBook, PhraseSource, WeightedPhrase};
pub use pipeline::{Pipeline, TurnOutcome, TurnRequest, export_outcome_json};
pub use regime::Regime;
pub use select::{
    EmittedCandidate, SafetySignals, Selector, StrategyTag, TurnContext, resolve_intensity,
};
pub use transduction::{Mechanism, TransductionSignal};
