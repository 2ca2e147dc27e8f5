//! Decision graph leveling for branching-dialogue simulations.
//!
//! Authoring XML is parsed into a dialogue graph ([`extract`]), its decision
//! nodes are grouped into numbered decision levels ([`levels`]), optional
//! manual corrections are applied ([`overrides`]) and the levels are turned
//! into labelled, choice-numbered rows ([`assemble`]). [`pipeline`] runs
//! the whole chain per simulation and across batches.

pub mod assemble;
pub mod error;
pub mod extract;
pub mod graph;
pub mod levels;
pub mod overrides;
pub mod pipeline;

pub use assemble::{assemble_levels, LevelRow};
pub use error::ParseError;
pub use extract::extract_graph;
pub use graph::{DecisionType, DialogueNode, NodeId, NodeRow, SimGraph, SkillScore, Transition};
pub use levels::{compute_levels, DecisionLevel, LevelKey, LevelTable};
pub use overrides::{LevelOverride, OverrideSet};
pub use pipeline::{
    process_simulation, run_batch, BatchReport, EngineConfig, SimulationFailure,
    SimulationOutput, SimulationSource,
};
