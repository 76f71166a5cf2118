use thiserror::Error;

/// Errors surfaced at the operation boundaries of the core.
///
/// Inner-loop arithmetic never fails; everything that can go wrong does so
/// when a graph is built, flow is calculated, or a partition is initialized.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The network has no links with positive weight, so no flow
    /// distribution exists and the optimizer must not be run.
    #[error("network has no links with positive weight")]
    EmptyFlow,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A link referenced a node id that was never added.
    #[error("link references unknown node id {0}")]
    UnknownNode(u32),

    /// The incremental codelength terms drifted away from a from-scratch
    /// recomputation. Raised by the invariant probe, not by normal moves.
    #[error("codelength term '{term}' drifted by {drift:.3e} from a fresh recomputation")]
    InvariantViolation { term: &'static str, drift: f64 },

    /// The caller-supplied abort flag was observed before the operation
    /// produced a usable partial result.
    #[error("aborted by caller")]
    Aborted,
}
