//! Map-equation community detection for weighted directed and undirected
//! networks.
//!
//! The crate computes a stationary visit distribution over a network under
//! one of five flow models, then searches for the partition of nodes into
//! modules minimizing the map equation, the expected per-step description
//! length of a random walker's trajectory.
//!
//! The typical pipeline:
//!
//! 1. feed a [`network::NetworkSource`] into [`graph::GraphModel`],
//! 2. run [`flow::calculate_flow`],
//! 3. run [`optimizer::run_trials`] for the best partition found.
//!
//! Finer-grained building blocks (the [`objective::CodelengthObjective`]
//! evaluators and [`partition::PartitionState`]) are public for callers
//! that drive their own search.

pub mod cli;
pub mod config;
pub mod error;
pub mod flow;
pub mod graph;
pub mod memory;
pub mod network;
pub mod objective;
pub mod optimizer;
pub mod output;
pub mod parser;
pub mod partition;

pub use config::{Config, FlowModel};
pub use error::CoreError;
pub use flow::{calculate_flow, FlowOutcome, FlowResult, FlowSummary};
pub use graph::{FlowData, GraphModel};
pub use objective::{CodelengthObjective, MapEquation};
pub use optimizer::{run_trials, TrialResult};
