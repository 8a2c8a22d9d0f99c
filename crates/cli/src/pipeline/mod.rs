//! Simulation pipeline.

mod orchestrator;
mod producer;
mod stats;

pub use orchestrator::{Simulation, SimulationConfig};
pub use stats::{Outcome, SimulationStats, SubscriptionReport};
