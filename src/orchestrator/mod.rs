//! Wizard orchestration: the caller contract over the core.
//!
//! Sequences session snapshots, healthy-instance acquisition, and
//! retry-wrapped generation calls. The concrete backend protocol lives
//! behind [`GenerationClient`]; this module only needs success/failure and
//! an opaque response payload.

mod engine;

pub use engine::{
    GenerationClient, GenerationRequest, GenerationResponse, StepOutcome, WizardOrchestrator,
    WizardStep,
};
