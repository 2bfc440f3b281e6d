//! # st-search
//!
//! Feedback-driven search over serving configurations for ServeTune.
//!
//! Two independently steppable generators, one over server-side model
//! configs and one over client-side load parameters, are composed by a
//! [`SearchOrchestrator`] into a stream of [`Trial`]s. The driver runs each
//! trial and reports its measurements back; plateau detection on those
//! measurements decides when each dimension stops sweeping.

mod context;
mod generator;
mod load;
mod namer;
mod orchestrator;
mod plateau;
mod server;
mod strategy;
mod trial;

pub use context::{fetch_server_config, ConfigLoader, InMemoryLoader, SearchContext, ServerClient};
pub use generator::{ConfigGenerator, SweepPhase};
pub use load::LoadConfigGenerator;
pub use namer::VariantNamer;
pub use orchestrator::{LoadFactory, ModelSearch, SearchOrchestrator};
pub use plateau::{PlateauTracker, StepOutcome};
pub use server::{make_config, ServerConfigGenerator};
pub use strategy::{doubling_ladder, GridWalk, LadderWalk, SweepStrategy, MAX_BATCH_SIZE_KEY};
pub use trial::{SearchReport, SearchRunId, Trial, TrialStatus};
