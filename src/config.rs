use crate::error::CoreError;

/// How link weights become node and link flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowModel {
    /// Undirected random walk; link weights symmetrized.
    #[default]
    Undirected,
    /// Undirected steady state, then one directed power step.
    Undirdir,
    /// Full PageRank with teleportation.
    Directed,
    /// Link weights used as flow directly after global normalization.
    Rawdir,
    /// Like `Undirdir` but node flow seeded from outgoing links only.
    Outdirdir,
}

impl FlowModel {
    /// Whether links are symmetrized when seeding node flow and degrees.
    pub fn is_undirected(self) -> bool {
        matches!(self, FlowModel::Undirected)
    }

    /// Whether link flow ends up directed (affects module enter/exit
    /// accounting downstream).
    pub fn directed_flow(self) -> bool {
        !matches!(self, FlowModel::Undirected)
    }

    pub fn name(self) -> &'static str {
        match self {
            FlowModel::Undirected => "undirected",
            FlowModel::Undirdir => "undirdir",
            FlowModel::Directed => "directed",
            FlowModel::Rawdir => "rawdir",
            FlowModel::Outdirdir => "outdirdir",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub flow_model: FlowModel,
    /// PageRank damping: probability of a teleport jump per step.
    pub teleportation_probability: f64,
    /// Whether teleport jumps contribute to recorded link flow. When false,
    /// a final correction step subtracts them out.
    pub recorded_teleportation: bool,
    /// Teleport to nodes proportionally to node weight instead of to links.
    pub teleport_to_nodes: bool,
    /// Reserved. Bipartite flow adjustment is not performed.
    pub skip_adjust_bipartite_flow: bool,
    /// Reserved. Not used by the core arithmetic.
    pub entropy_bias_correction: bool,
    pub seed: u64,
    pub num_trials: u32,
    /// Worker threads for parallel trials; `None` picks from the environment.
    pub trial_threads: Option<usize>,
    pub max_power_iterations: u32,
    pub power_convergence_tol: f64,
    pub normalization_tol: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            flow_model: FlowModel::Undirected,
            teleportation_probability: 0.15,
            recorded_teleportation: true,
            teleport_to_nodes: false,
            skip_adjust_bipartite_flow: true,
            entropy_bias_correction: false,
            seed: 123,
            num_trials: 1,
            trial_threads: None,
            max_power_iterations: 200,
            power_convergence_tol: 1.0e-15,
            normalization_tol: 1.0e-10,
        }
    }
}

impl Config {
    /// Shortcut mirroring the `--undirdir` flag.
    pub fn with_undirdir(mut self) -> Self {
        self.flow_model = FlowModel::Undirdir;
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let alpha = self.teleportation_probability;
        if !(0.0..=1.0).contains(&alpha) || !alpha.is_finite() {
            return Err(CoreError::InvalidConfig(format!(
                "teleportation probability {} outside [0, 1]",
                alpha
            )));
        }
        if self.power_convergence_tol <= 0.0 || !self.power_convergence_tol.is_finite() {
            return Err(CoreError::InvalidConfig(format!(
                "power convergence tolerance {} must be positive",
                self.power_convergence_tol
            )));
        }
        if self.normalization_tol <= 0.0 || !self.normalization_tol.is_finite() {
            return Err(CoreError::InvalidConfig(format!(
                "normalization tolerance {} must be positive",
                self.normalization_tol
            )));
        }
        if self.max_power_iterations == 0 {
            return Err(CoreError::InvalidConfig(
                "max power iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
