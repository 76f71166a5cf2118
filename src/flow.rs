//! Turns link weights into stationary node and link flow under the
//! selected flow model.

use crate::config::{Config, FlowModel};
use crate::error::CoreError;
use crate::graph::GraphModel;
use crate::network::NetworkSource;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Power iterations always run at least this many rounds before the
/// convergence tolerance is consulted.
const MIN_POWER_ITERATIONS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOutcome {
    Converged,
    /// Convergence tolerance not reached within the iteration cap; node
    /// flow holds the best estimate.
    Diverged,
    /// Abort flag observed between iterations; node flow holds a partial
    /// result.
    Aborted,
}

#[derive(Debug, Clone, Copy)]
pub struct FlowSummary {
    pub iterations: u32,
    /// L1 change of the last power iteration; zero for closed-form models.
    pub residual: f64,
    pub outcome: FlowOutcome,
}

impl FlowSummary {
    fn closed_form() -> Self {
        Self {
            iterations: 0,
            residual: 0.0,
            outcome: FlowOutcome::Converged,
        }
    }
}

/// Flow vectors extracted from a finalized graph, for callers that do not
/// want to keep the graph itself.
#[derive(Debug, Clone)]
pub struct FlowResult {
    pub node_flow: Vec<f64>,
    pub link_flow: Vec<(u32, u32, f64)>,
}

impl FlowResult {
    pub fn from_graph(graph: &GraphModel) -> Self {
        Self {
            node_flow: graph.nodes.iter().map(|n| n.data.flow).collect(),
            link_flow: (0..graph.edge_count())
                .map(|e| {
                    (
                        graph.edge_source[e],
                        graph.edge_target[e],
                        graph.edge_flow[e],
                    )
                })
                .collect(),
        }
    }
}

/// Builds a graph from `src` and calculates its flow in one call.
pub fn calculate_flow_from_source(
    src: &dyn NetworkSource,
    cfg: &Config,
    abort: Option<&AtomicBool>,
) -> Result<(GraphModel, FlowSummary), CoreError> {
    let mut graph = GraphModel::from_source(src)?;
    let summary = calculate_flow(&mut graph, cfg, abort)?;
    Ok((graph, summary))
}

/// Computes per-node and per-link flow for the configured flow model and
/// writes the results back into `graph`.
///
/// An empty graph succeeds with no work; a graph whose links carry zero
/// total weight is an [`CoreError::EmptyFlow`] error. Non-convergence of
/// the power iteration is reported through [`FlowSummary::outcome`], not as
/// an error.
pub fn calculate_flow(
    graph: &mut GraphModel,
    cfg: &Config,
    abort: Option<&AtomicBool>,
) -> Result<FlowSummary, CoreError> {
    cfg.validate()?;

    let n = graph.node_count();
    let m = graph.edge_count();

    if n == 0 {
        return Ok(FlowSummary::closed_form());
    }
    if graph.sum_link_weight <= 0.0 {
        return Err(CoreError::EmptyFlow);
    }

    debug!(
        model = cfg.flow_model.name(),
        nodes = n,
        links = m,
        "calculating network flow"
    );

    let mut node_flow = vec![0.0f64; n];
    let mut node_teleport_rates = vec![0.0f64; n];
    let mut node_out_degree = vec![0u32; n];
    let mut sum_link_out_weight = vec![0.0f64; n];
    let mut link_flow: Vec<f64> = graph.edge_weight.clone();

    let sum_undir = graph.sum_undir_link_weight;

    for e in 0..m {
        let s = graph.edge_source[e] as usize;
        let t = graph.edge_target[e] as usize;
        let w = graph.edge_weight[e];

        node_out_degree[s] += 1;
        sum_link_out_weight[s] += w;
        node_flow[s] += w / sum_undir;

        if s != t {
            if cfg.flow_model.is_undirected() {
                node_out_degree[t] += 1;
                sum_link_out_weight[t] += w;
            }
            if cfg.flow_model != FlowModel::Outdirdir {
                node_flow[t] += w / sum_undir;
            }
        }
    }

    let summary = match cfg.flow_model {
        FlowModel::Rawdir => {
            // Link weights are the flow; one power step sets node flow.
            for f in node_flow.iter_mut() {
                *f = 0.0;
            }
            for e in 0..m {
                link_flow[e] /= graph.sum_link_weight;
                node_flow[graph.edge_target[e] as usize] += link_flow[e];
            }
            debug!(total_weight = graph.sum_link_weight, "using raw directed flow");
            finalize(graph, cfg, &mut node_flow, &link_flow, &node_teleport_rates, &node_out_degree, true);
            FlowSummary::closed_form()
        }
        FlowModel::Undirected => {
            for e in 0..m {
                link_flow[e] = graph.edge_weight[e] / (sum_undir / 2.0);
            }
            finalize(graph, cfg, &mut node_flow, &link_flow, &node_teleport_rates, &node_out_degree, false);
            FlowSummary::closed_form()
        }
        FlowModel::Undirdir | FlowModel::Outdirdir => {
            // One directed power step from the undirected steady state.
            let steady = node_flow.clone();
            for f in node_flow.iter_mut() {
                *f = 0.0;
            }
            for e in 0..m {
                let s = graph.edge_source[e] as usize;
                let t = graph.edge_target[e] as usize;
                node_flow[t] += steady[s] * link_flow[e] / sum_link_out_weight[s];
            }
            let sum_node_flow: f64 = node_flow.iter().sum();
            for e in 0..m {
                let s = graph.edge_source[e] as usize;
                link_flow[e] *= steady[s] / sum_link_out_weight[s] / sum_node_flow;
            }
            finalize(graph, cfg, &mut node_flow, &link_flow, &node_teleport_rates, &node_out_degree, true);
            FlowSummary::closed_form()
        }
        FlowModel::Directed => {
            let summary = page_rank(
                graph,
                cfg,
                abort,
                &mut node_flow,
                &mut link_flow,
                &mut node_teleport_rates,
                &node_out_degree,
                &sum_link_out_weight,
            )?;
            finalize(graph, cfg, &mut node_flow, &link_flow, &node_teleport_rates, &node_out_degree, false);
            summary
        }
    };

    Ok(summary)
}

#[allow(clippy::too_many_arguments)]
fn page_rank(
    graph: &GraphModel,
    cfg: &Config,
    abort: Option<&AtomicBool>,
    node_flow: &mut [f64],
    link_flow: &mut [f64],
    node_teleport_rates: &mut [f64],
    node_out_degree: &[u32],
    sum_link_out_weight: &[f64],
) -> Result<FlowSummary, CoreError> {
    let n = graph.node_count();
    let m = graph.edge_count();

    debug!(
        recorded = cfg.recorded_teleportation,
        to_nodes = cfg.teleport_to_nodes,
        "teleportation setup"
    );

    if cfg.teleport_to_nodes {
        let sum_node_weights: f64 = graph.nodes.iter().map(|node| node.input_weight).sum();
        if sum_node_weights <= 0.0 {
            return Err(CoreError::InvalidConfig(
                "teleportation to nodes requires positive total node weight".to_string(),
            ));
        }
        for (rate, node) in node_teleport_rates.iter_mut().zip(graph.nodes.iter()) {
            *rate = node.input_weight / sum_node_weights;
        }
    } else {
        // Teleport to links: proportionally to in-weight with recorded
        // teleportation, out-weight otherwise. Link flow still equals
        // weight at this point.
        for e in 0..m {
            let to = if cfg.recorded_teleportation {
                graph.edge_target[e]
            } else {
                graph.edge_source[e]
            } as usize;
            node_teleport_rates[to] += link_flow[e] / graph.sum_link_weight;
        }
    }
    normalize(node_teleport_rates);

    // Normalize link weights against their source node's total out-weight.
    for e in 0..m {
        let s = graph.edge_source[e] as usize;
        if sum_link_out_weight[s] > 0.0 {
            link_flow[e] /= sum_link_out_weight[s];
        }
    }

    let danglings: Vec<u32> = (0..n as u32)
        .filter(|&i| node_out_degree[i as usize] == 0)
        .collect();

    let mut node_flow_tmp = vec![0.0f64; n];
    let mut alpha = cfg.teleportation_probability;
    let mut beta = 1.0 - alpha;
    let mut iterations = 0u32;
    let mut sqdiff = 1.0f64;
    let mut dangling_rank = 0.0f64;
    let mut aborted = false;

    loop {
        if abort.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            aborted = true;
            break;
        }

        dangling_rank = 0.0;
        for &d in &danglings {
            dangling_rank += node_flow[d as usize];
        }

        // Flow from teleportation, with the dangling mass redistributed
        // over the teleport distribution.
        let tele_flow = alpha + beta * dangling_rank;
        for i in 0..n {
            node_flow_tmp[i] = tele_flow * node_teleport_rates[i];
        }

        // Flow along links.
        for e in 0..m {
            let s = graph.edge_source[e] as usize;
            let t = graph.edge_target[e] as usize;
            node_flow_tmp[t] += beta * link_flow[e] * node_flow[s];
        }

        let mut sum = 0.0;
        let sqdiff_old = sqdiff;
        sqdiff = 0.0;
        for i in 0..n {
            sum += node_flow_tmp[i];
            sqdiff += (node_flow_tmp[i] - node_flow[i]).abs();
            node_flow[i] = node_flow_tmp[i];
        }

        if (sum - 1.0).abs() > cfg.normalization_tol {
            debug!(iterations, error = sum - 1.0, "normalizing ranks");
            for f in node_flow.iter_mut() {
                *f /= sum;
            }
        }

        // Perturb the system on exact equilibrium so the iteration cannot
        // stall on a cyclic attractor.
        if sqdiff == sqdiff_old {
            alpha += 1.0e-10;
            beta = 1.0 - alpha;
        }

        iterations += 1;
        if iterations >= cfg.max_power_iterations
            || (sqdiff <= cfg.power_convergence_tol && iterations >= MIN_POWER_ITERATIONS)
        {
            break;
        }
    }

    let mut sum_node_rank = 1.0;

    if !cfg.recorded_teleportation {
        // One last power step excluding teleportation, renormalized by the
        // non-dangling rank.
        sum_node_rank = 1.0 - dangling_rank;
        if sum_node_rank <= 0.0 {
            sum_node_rank = 1.0;
        }
        for f in node_flow.iter_mut() {
            *f = 0.0;
        }
        for e in 0..m {
            let s = graph.edge_source[e] as usize;
            let t = graph.edge_target[e] as usize;
            node_flow[t] += link_flow[e] * node_flow_tmp[s] / sum_node_rank;
        }
        beta = 1.0;
    }

    // Scale link flow to global flow. With unrecorded teleportation beta
    // has been reset to one above.
    for e in 0..m {
        let s = graph.edge_source[e] as usize;
        link_flow[e] *= beta * node_flow_tmp[s] / sum_node_rank;
    }

    let outcome = if aborted {
        FlowOutcome::Aborted
    } else if sqdiff > cfg.power_convergence_tol {
        warn!(
            iterations,
            residual = sqdiff,
            "power iteration did not converge, returning best estimate"
        );
        FlowOutcome::Diverged
    } else {
        debug!(iterations, "power iteration done");
        FlowOutcome::Converged
    };

    Ok(FlowSummary {
        iterations,
        residual: sqdiff,
        outcome,
    })
}

fn finalize(
    graph: &mut GraphModel,
    cfg: &Config,
    node_flow: &mut [f64],
    link_flow: &[f64],
    node_teleport_rates: &[f64],
    node_out_degree: &[u32],
    normalize_node_flow: bool,
) {
    let n = graph.node_count();
    let m = graph.edge_count();

    if normalize_node_flow {
        normalize(node_flow);
    }

    let alpha = cfg.teleportation_probability;
    let teleporting = cfg.flow_model == FlowModel::Directed;

    for i in 0..n {
        let data = &mut graph.nodes[i].data;
        data.flow = node_flow[i];
        data.teleport_weight = if teleporting { node_teleport_rates[i] } else { 0.0 };
        data.teleport_flow = if teleporting {
            node_flow[i] * if node_out_degree[i] == 0 { 1.0 } else { alpha }
        } else {
            0.0
        };
        data.dangling_flow = if node_out_degree[i] == 0 { node_flow[i] } else { 0.0 };
    }

    if cfg.flow_model.directed_flow() {
        let mut enter = vec![0.0f64; n];
        let mut exit = vec![0.0f64; n];
        for e in 0..m {
            let s = graph.edge_source[e] as usize;
            let t = graph.edge_target[e] as usize;
            if s != t {
                exit[s] += link_flow[e];
                enter[t] += link_flow[e];
            }
        }
        for i in 0..n {
            graph.nodes[i].data.enter_flow = enter[i];
            graph.nodes[i].data.exit_flow = exit[i];
        }
    } else {
        // For undirected flow a node's boundary flow is its stationary
        // flow less the mass bound in self-links.
        for i in 0..n {
            let mut self_flow = 0.0;
            for e in graph.out_edges(i) {
                if graph.edge_target[e] as usize == i {
                    self_flow += link_flow[e];
                }
            }
            let data = &mut graph.nodes[i].data;
            data.enter_flow = data.flow - self_flow / 2.0;
            data.exit_flow = data.flow - self_flow / 2.0;
        }
    }

    graph.edge_flow.copy_from_slice(link_flow);

    let sum_node_flow: f64 = node_flow.iter().sum();
    let sum_link_flow: f64 = link_flow.iter().sum();
    debug!(sum_node_flow, sum_link_flow, "flow finalized");
}

fn normalize(v: &mut [f64]) {
    let sum: f64 = v.iter().sum();
    if sum > 0.0 {
        for x in v.iter_mut() {
            *x /= sum;
        }
    }
}
