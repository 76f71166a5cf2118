use crate::config::{Config, FlowModel};
use crate::error::CoreError;
use crate::output::OutputSelection;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FlowModelArg {
    Undirected,
    Undirdir,
    Directed,
    Rawdir,
    Outdirdir,
}

impl From<FlowModelArg> for FlowModel {
    fn from(arg: FlowModelArg) -> Self {
        match arg {
            FlowModelArg::Undirected => FlowModel::Undirected,
            FlowModelArg::Undirdir => FlowModel::Undirdir,
            FlowModelArg::Directed => FlowModel::Directed,
            FlowModelArg::Rawdir => FlowModel::Rawdir,
            FlowModelArg::Outdirdir => FlowModel::Outdirdir,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "mapflow",
    about = "Map-equation community detection for weighted networks"
)]
pub struct Cli {
    /// Network file in Pajek format, optionally with a *States section.
    pub network_file: PathBuf,

    /// Directory the result files are written to.
    pub out_dir: PathBuf,

    /// Flow model turning link weights into flow.
    #[arg(long, value_enum, default_value = "undirected")]
    pub flow_model: FlowModelArg,

    /// Shortcut for --flow-model directed.
    #[arg(long)]
    pub directed: bool,

    /// Shortcut for --flow-model undirdir.
    #[arg(long)]
    pub undirdir: bool,

    /// Teleportation probability per step for the directed flow model.
    #[arg(long, default_value_t = 0.15)]
    pub teleportation_probability: f64,

    /// Subtract teleportation steps from the recorded flow.
    #[arg(long)]
    pub unrecorded_teleportation: bool,

    /// Teleport to nodes proportionally to node weight instead of to links.
    #[arg(long)]
    pub to_nodes: bool,

    #[arg(long, default_value_t = 123)]
    pub seed: u64,

    /// Number of independent search trials; the best one wins.
    #[arg(long, default_value_t = 1)]
    pub num_trials: u32,

    /// Worker threads for parallel trials.
    #[arg(long)]
    pub threads: Option<usize>,

    /// Write a .tree file (default when nothing else is selected).
    #[arg(long)]
    pub tree: bool,

    /// Write a .clu file.
    #[arg(long)]
    pub clu: bool,

    /// Basename for the output files; defaults to the network file stem.
    #[arg(long)]
    pub out_name: Option<String>,

    #[arg(long)]
    pub silent: bool,
}

impl Cli {
    pub fn to_config(&self) -> Result<Config, CoreError> {
        let mut flow_model = FlowModel::from(self.flow_model);
        if self.directed {
            flow_model = FlowModel::Directed;
        }
        if self.undirdir {
            flow_model = FlowModel::Undirdir;
        }

        let cfg = Config {
            flow_model,
            teleportation_probability: self.teleportation_probability,
            recorded_teleportation: !self.unrecorded_teleportation,
            teleport_to_nodes: self.to_nodes,
            seed: self.seed,
            num_trials: self.num_trials.max(1),
            trial_threads: self.threads.filter(|&n| n > 0),
            ..Config::default()
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn output_selection(&self) -> OutputSelection {
        let mut selection = OutputSelection {
            tree: self.tree,
            clu: self.clu,
        };
        if !selection.tree && !selection.clu {
            selection.tree = true;
        }
        selection
    }

    pub fn resolved_out_name(&self) -> String {
        match &self.out_name {
            Some(name) => name.clone(),
            None => self
                .network_file
                .file_stem()
                .and_then(|stem| stem.to_str())
                .filter(|stem| !stem.is_empty())
                .unwrap_or("network")
                .to_string(),
        }
    }
}
