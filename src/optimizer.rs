//! Greedy agglomerative search over partitions: randomized node sweeps,
//! module consolidation into super-nodes, fine-tuning back at the leaf
//! level, and repeated independent trials.

use crate::config::Config;
use crate::error::CoreError;
use crate::graph::{FlowData, GraphModel};
use crate::memory::MemoryMapEquation;
use crate::objective::{plogp, CodelengthObjective, DeltaFlow, DeltaFlowBuffer, MapEquation};
use crate::partition::{module_flow_data, PartitionState};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

const CORE_LOOP_LIMIT: usize = 10;
const AGGREGATE_LOOP_LIMIT: usize = 20;
const MIN_CODELENGTH_IMPROVEMENT: f64 = 1e-10;
const MIN_SINGLE_NODE_IMPROVEMENT: f64 = 1e-16;
const MIN_RELATIVE_TUNE_ITERATION_IMPROVEMENT: f64 = 1e-5;

/// One node of the network being optimized at the current aggregation
/// level: a leaf node at first, a super-node after consolidation.
#[derive(Debug, Clone)]
struct LevelNode {
    data: FlowData,
    out_edges: Vec<(u32, f64)>,
    in_edges: Vec<(u32, f64)>,
    /// Leaf node indices collapsed into this node.
    members: Vec<u32>,
}

impl LevelNode {
    #[inline]
    fn degree(&self) -> usize {
        self.out_edges.len() + self.in_edges.len()
    }
}

#[derive(Debug, Clone)]
struct LevelNetwork {
    nodes: Vec<LevelNode>,
}

#[derive(Debug, Clone, Copy, Default)]
struct LevelStats {
    effective_loops: u32,
    aborted: bool,
}

/// Best partition found by [`run_trials`].
#[derive(Debug, Clone)]
pub struct TrialResult {
    pub node_to_module: Vec<u32>,
    pub num_modules: u32,
    pub codelength: f64,
    pub index_codelength: f64,
    pub module_codelength: f64,
    pub one_level_codelength: f64,
    pub module_data: Vec<FlowData>,
    /// Set when the abort flag cut the search short; the partition is the
    /// best one reached.
    pub aborted: bool,
}

impl LevelNetwork {
    fn from_graph(graph: &GraphModel) -> Self {
        let n = graph.node_count();
        let mut nodes: Vec<LevelNode> = (0..n)
            .map(|i| LevelNode {
                data: graph.nodes[i].data,
                out_edges: Vec::new(),
                in_edges: Vec::new(),
                members: vec![i as u32],
            })
            .collect();

        for s in 0..n {
            for e in graph.out_edges(s) {
                let t = graph.edge_target[e] as usize;
                if s == t {
                    continue;
                }
                let f = graph.edge_flow[e];
                nodes[s].out_edges.push((t as u32, f));
                nodes[t].in_edges.push((s as u32, f));
            }
        }

        Self { nodes }
    }

    /// Collapses the partition's modules into super-nodes. Returns the new
    /// network and the current-node → super-node assignment.
    fn consolidate(&self, partition: &PartitionState) -> (Self, Vec<u32>) {
        let n = self.nodes.len();
        let remap = partition.consolidation_remap();

        let mut new_nodes: Vec<LevelNode> = remap
            .ordered_old
            .iter()
            .map(|&old| LevelNode {
                data: partition.module_flow()[old as usize],
                out_edges: Vec::new(),
                in_edges: Vec::new(),
                members: Vec::new(),
            })
            .collect();

        let node_to_super: Vec<u32> = (0..n)
            .map(|i| remap.old_to_new[partition.module(i) as usize])
            .collect();

        for i in 0..n {
            new_nodes[node_to_super[i] as usize]
                .members
                .extend_from_slice(&self.nodes[i].members);
        }

        // Inter-module link flow becomes super-link flow; intra-module
        // flow is absorbed into the super-node.
        let mut edge_map: FxHashMap<u64, f64> = FxHashMap::default();
        for i in 0..n {
            let src = node_to_super[i];
            for &(t, f) in &self.nodes[i].out_edges {
                let dst = node_to_super[t as usize];
                if src == dst {
                    continue;
                }
                *edge_map.entry(((src as u64) << 32) | dst as u64).or_insert(0.0) += f;
            }
        }

        let mut edges: Vec<(u32, u32, f64)> = edge_map
            .into_iter()
            .map(|(key, f)| ((key >> 32) as u32, key as u32, f))
            .collect();
        edges.sort_unstable_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        for (s, t, f) in edges {
            new_nodes[s as usize].out_edges.push((t, f));
            new_nodes[t as usize].in_edges.push((s, f));
        }

        (Self { nodes: new_nodes }, node_to_super)
    }

    fn assignment_to_leaves(&self, leaf_count: usize) -> Vec<u32> {
        let mut out = vec![0u32; leaf_count];
        for (module, node) in self.nodes.iter().enumerate() {
            for &leaf in &node.members {
                out[leaf as usize] = module as u32;
            }
        }
        out
    }
}

/// Fisher–Yates over `0..len`, reusing the output buffer.
fn randomized_index_vector(rng: &mut SmallRng, out: &mut Vec<u32>, len: usize) {
    out.clear();
    out.extend(0..len as u32);
    for i in 0..len {
        let j = rng.gen_range(i..len);
        out.swap(i, j);
    }
}

/// Link-flow deltas between `node` and each neighboring module. Flow
/// toward the node's own module accumulates in `old_delta`; everything
/// else becomes a candidate entry.
fn collect_link_deltas(
    level: &LevelNetwork,
    node: usize,
    partition: &PartitionState,
    old_delta: &mut DeltaFlow,
    candidates: &mut DeltaFlowBuffer,
) {
    let current = old_delta.module;
    for &(nbr, flow) in &level.nodes[node].out_edges {
        let m = partition.module(nbr as usize);
        if m == current {
            old_delta.delta_exit += flow;
        } else {
            candidates.add(m, flow, 0.0);
        }
    }
    for &(nbr, flow) in &level.nodes[node].in_edges {
        let m = partition.module(nbr as usize);
        if m == current {
            old_delta.delta_enter += flow;
        } else {
            candidates.add(m, 0.0, flow);
        }
    }
}

/// Moves one node into a fixed target module, bypassing candidate search.
/// Used when seeding a predefined partition and for companion pull-ins.
fn move_node_to_module<O: CodelengthObjective>(
    level: &LevelNetwork,
    node: usize,
    new_module: u32,
    objective: &mut O,
    partition: &mut PartitionState,
    candidates: &mut DeltaFlowBuffer,
) -> bool {
    let old_module = partition.module(node);
    if old_module == new_module {
        return false;
    }

    candidates.reset(partition.module_flow().len());
    let mut old_delta = DeltaFlow::new(old_module);
    collect_link_deltas(level, node, partition, &mut old_delta, candidates);
    objective.add_memory_contributions(node as u32, &mut old_delta, candidates);

    let new_delta = candidates
        .get(new_module)
        .unwrap_or(DeltaFlow::new(new_module));

    objective.update_on_move(
        node as u32,
        &level.nodes[node].data,
        &old_delta,
        &new_delta,
        partition.module_flow_mut(),
    );
    partition.apply_move(node, new_module);
    true
}

/// One randomized sweep trying to move every dirty node into its best
/// neighboring module. Returns the number of moves committed.
#[allow(clippy::too_many_arguments)]
fn try_move_each_node_into_best_module<O: CodelengthObjective>(
    level: &LevelNetwork,
    rng: &mut SmallRng,
    objective: &mut O,
    partition: &mut PartitionState,
    dirty: &mut [bool],
    candidates: &mut DeltaFlowBuffer,
    lock_merged_nodes: bool,
) -> u32 {
    let n = level.nodes.len();

    let mut node_order: Vec<u32> = Vec::with_capacity(n);
    randomized_index_vector(rng, &mut node_order, n);

    let mut candidate_order: Vec<u32> = Vec::with_capacity(64);
    let mut moved = 0u32;

    for &node_u32 in &node_order {
        let node = node_u32 as usize;

        if !dirty[node] {
            continue;
        }

        let current_module = partition.module(node);

        // On the first full sweep of a level, nodes that already share a
        // module stay put so early merges are not torn apart.
        if lock_merged_nodes && partition.members(current_module) > 1 {
            continue;
        }

        candidates.reset(partition.module_flow().len());
        let mut old_delta = DeltaFlow::new(current_module);
        collect_link_deltas(level, node, partition, &mut old_delta, candidates);
        objective.add_memory_contributions(node_u32, &mut old_delta, candidates);

        // A fresh module is always on offer unless the node is alone.
        if partition.members(current_module) > 1 {
            if let Some(empty_module) = partition.empty_module_candidate() {
                candidates.add(empty_module, 0.0, 0.0);
            }
        }

        randomized_index_vector(rng, &mut candidate_order, candidates.entries().len());

        let mut best_module = current_module;
        let mut best_delta = old_delta;
        let mut best_delta_codelength = 0.0f64;

        let mut strongest_module = current_module;
        let mut strongest_delta = old_delta;
        let mut strongest_delta_codelength = 0.0f64;

        for &cand_idx in &candidate_order {
            let cand_delta = candidates.entries()[cand_idx as usize];

            let delta = objective.delta_on_move(
                node_u32,
                &level.nodes[node].data,
                &old_delta,
                &cand_delta,
                partition.module_flow(),
            );

            if delta < best_delta_codelength - MIN_SINGLE_NODE_IMPROVEMENT {
                best_module = cand_delta.module;
                best_delta = cand_delta;
                best_delta_codelength = delta;
            }

            // Prefer the module with the strongest outgoing flow on ties.
            if cand_delta.delta_exit > strongest_delta.delta_exit {
                strongest_module = cand_delta.module;
                strongest_delta = cand_delta;
                strongest_delta_codelength = delta;
            }
        }

        if strongest_module != best_module
            && strongest_delta_codelength <= best_delta_codelength + MIN_SINGLE_NODE_IMPROVEMENT
        {
            best_module = strongest_module;
            best_delta = strongest_delta;
        }

        if best_module != current_module {
            objective.update_on_move(
                node_u32,
                &level.nodes[node].data,
                &old_delta,
                &best_delta,
                partition.module_flow_mut(),
            );
            partition.apply_move(node, best_module);
            moved += 1;

            let mut node_in_old_module = node_u32;
            let mut num_linked_in_old_module = 0u32;

            for &(nbr, _) in &level.nodes[node].out_edges {
                dirty[nbr as usize] = true;
                if partition.module(nbr as usize) == current_module {
                    node_in_old_module = nbr;
                    num_linked_in_old_module += 1;
                }
            }
            for &(nbr, _) in &level.nodes[node].in_edges {
                dirty[nbr as usize] = true;
                if partition.module(nbr as usize) == current_module {
                    node_in_old_module = nbr;
                    num_linked_in_old_module += 1;
                }
            }

            // A single connected node left behind follows its neighbor.
            if num_linked_in_old_module == 1 && partition.members(current_module) == 1 {
                let companion = node_in_old_module as usize;
                if move_node_to_module(
                    level,
                    companion,
                    best_module,
                    objective,
                    partition,
                    candidates,
                ) {
                    moved += 1;

                    if level.nodes[companion].degree() > 1 {
                        for &(nbr, _) in &level.nodes[companion].out_edges {
                            dirty[nbr as usize] = true;
                        }
                        for &(nbr, _) in &level.nodes[companion].in_edges {
                            dirty[nbr as usize] = true;
                        }
                    }
                }
            }
        } else {
            dirty[node] = false;
        }
    }

    moved
}

/// Optimizes one aggregation level from singletons (or a predefined
/// partition) until the sweeps stop paying.
fn optimize_level<O: CodelengthObjective>(
    level: &LevelNetwork,
    rng: &mut SmallRng,
    objective: &mut O,
    predefined: Option<&[u32]>,
    lock_merged_nodes: bool,
    loop_limit: usize,
    abort: Option<&AtomicBool>,
) -> Result<(PartitionState, LevelStats), CoreError> {
    let n = level.nodes.len();
    let node_data: Vec<FlowData> = level.nodes.iter().map(|node| node.data).collect();

    let mut partition = PartitionState::one_module_per_node(&node_data);
    let alive: Vec<u32> = (0..n as u32).collect();
    objective.init_partition(partition.module_flow(), &alive, partition.module_of());

    let mut candidates = DeltaFlowBuffer::with_capacity(n);

    if let Some(modules) = predefined {
        assert_eq!(
            modules.len(),
            n,
            "predefined module assignment does not match the level size"
        );
        for (node, &target) in modules.iter().enumerate() {
            let _ = move_node_to_module(
                level,
                node,
                target,
                objective,
                &mut partition,
                &mut candidates,
            );
        }
    }

    let mut dirty = vec![true; n];
    let mut stats = LevelStats::default();
    let mut core_loops = 0usize;
    let mut old_codelength = objective.codelength();

    loop {
        if abort.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            stats.aborted = true;
            break;
        }

        core_loops += 1;
        let moved = try_move_each_node_into_best_module(
            level,
            rng,
            objective,
            &mut partition,
            &mut dirty,
            &mut candidates,
            lock_merged_nodes,
        );

        if moved == 0 || objective.codelength() >= old_codelength - MIN_CODELENGTH_IMPROVEMENT {
            break;
        }

        stats.effective_loops += 1;
        old_codelength = objective.codelength();

        if core_loops == loop_limit {
            break;
        }
    }

    let alive_now = partition.alive_modules();
    if let Err(err) = objective.verify(partition.module_flow(), &alive_now) {
        if cfg!(debug_assertions) {
            return Err(err);
        }
        warn!(error = %err, "incremental codelength terms drifted");
    }

    Ok((partition, stats))
}

/// Codelength of the trivial partition of `top` where every node is its
/// own module. Leaves `objective` initialized at that partition.
fn partition_codelength<O: CodelengthObjective>(objective: &mut O, top: &LevelNetwork) -> f64 {
    let module_data: Vec<FlowData> = top.nodes.iter().map(|node| node.data).collect();
    let indices: Vec<u32> = (0..top.nodes.len() as u32).collect();
    objective.init_partition(&module_data, &indices, &indices);
    objective.codelength()
}

/// Optimize-consolidate cycles from the leaf network up, stopping when a
/// level no longer improves on the consolidated codelength.
fn find_top_modules_repeatedly<O: CodelengthObjective>(
    start: &LevelNetwork,
    objective: &mut O,
    rng: &mut SmallRng,
    from_leaf: bool,
    mut consolidated_codelength: f64,
    abort: Option<&AtomicBool>,
) -> Result<(LevelNetwork, bool), CoreError> {
    let mut active = start.clone();
    let mut have_modules = !from_leaf;
    let mut aggregation_level = 0usize;

    loop {
        if active.nodes.len() <= 1 {
            break;
        }
        if abort.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return Ok((active, true));
        }

        let loop_limit = if aggregation_level > 0 {
            AGGREGATE_LOOP_LIMIT
        } else {
            CORE_LOOP_LIMIT
        };
        let lock = from_leaf && aggregation_level == 0;
        let (partition, stats) =
            optimize_level(&active, rng, objective, None, lock, loop_limit, abort)?;
        if stats.aborted {
            return Ok((active, true));
        }

        let level_codelength = objective.codelength();
        if have_modules
            && level_codelength >= consolidated_codelength - MIN_SINGLE_NODE_IMPROVEMENT
        {
            break;
        }

        let (next, node_to_super) = active.consolidate(&partition);
        objective.consolidate(&node_to_super, next.nodes.len());
        consolidated_codelength = level_codelength;
        have_modules = true;
        aggregation_level += 1;

        debug!(
            level = aggregation_level,
            modules = next.nodes.len(),
            codelength = level_codelength,
            "consolidated level"
        );

        active = next;
        if active.nodes.len() <= 1 {
            break;
        }
    }

    Ok((active, false))
}

/// Re-optimizes leaf nodes inside the consolidated partition. On
/// improvement, replaces `top` and `working` with the re-consolidated
/// network and objective.
fn fine_tune<O: CodelengthObjective + Clone>(
    leaf: &LevelNetwork,
    top: &mut LevelNetwork,
    leaf_objective: &O,
    working: &mut O,
    rng: &mut SmallRng,
    abort: Option<&AtomicBool>,
) -> Result<u32, CoreError> {
    if top.nodes.len() <= 1 {
        return Ok(0);
    }

    let predefined = top.assignment_to_leaves(leaf.nodes.len());
    let mut objective = leaf_objective.clone();
    let (partition, stats) = optimize_level(
        leaf,
        rng,
        &mut objective,
        Some(&predefined),
        false,
        CORE_LOOP_LIMIT,
        abort,
    )?;

    if stats.aborted || stats.effective_loops == 0 {
        return Ok(0);
    }

    let (new_top, node_to_super) = leaf.consolidate(&partition);
    objective.consolidate(&node_to_super, new_top.nodes.len());
    *top = new_top;
    *working = objective;
    Ok(stats.effective_loops)
}

fn one_level_codelength(graph: &GraphModel) -> f64 {
    -graph.nodes.iter().map(|node| plogp(node.data.flow)).sum::<f64>()
}

fn single_trial<O: CodelengthObjective + Clone>(
    graph: &GraphModel,
    leaf_objective: &O,
    rng: &mut SmallRng,
    directed: bool,
    abort: Option<&AtomicBool>,
) -> Result<TrialResult, CoreError> {
    let leaf = LevelNetwork::from_graph(graph);
    let mut working = leaf_objective.clone();

    let (mut top, mut aborted) =
        find_top_modules_repeatedly(&leaf, &mut working, rng, true, f64::INFINITY, abort)?;

    let one_level = one_level_codelength(graph);
    let mut old_codelength = partition_codelength(&mut working, &top);

    let mut do_fine_tune = true;
    let mut coarse_tuned = false;

    while top.nodes.len() > 1 && !aborted {
        if do_fine_tune {
            let effective_loops =
                fine_tune(&leaf, &mut top, leaf_objective, &mut working, rng, abort)?;
            if effective_loops > 0 {
                let base = partition_codelength(&mut working, &top);
                let (next_top, was_aborted) = find_top_modules_repeatedly(
                    &top,
                    &mut working,
                    rng,
                    false,
                    base,
                    abort,
                )?;
                top = next_top;
                aborted = was_aborted;
            }
        } else {
            coarse_tuned = true;
        }

        let new_codelength = partition_codelength(&mut working, &top);
        let is_improvement = new_codelength <= old_codelength - MIN_CODELENGTH_IMPROVEMENT
            && new_codelength
                < old_codelength - one_level * MIN_RELATIVE_TUNE_ITERATION_IMPROVEMENT;

        if !is_improvement {
            if coarse_tuned {
                break;
            }
        } else {
            old_codelength = new_codelength;
        }

        do_fine_tune = !do_fine_tune;
    }

    Ok(assemble_result(graph, leaf_objective, &top, directed, aborted))
}

/// Flattens a top-level network into a leaf assignment and re-derives the
/// codelength from a fresh objective over recomputed module aggregates.
fn assemble_result<O: CodelengthObjective + Clone>(
    graph: &GraphModel,
    leaf_objective: &O,
    top: &LevelNetwork,
    directed: bool,
    aborted: bool,
) -> TrialResult {
    let node_to_module = top.assignment_to_leaves(graph.node_count());
    let num_modules = top.nodes.len() as u32;
    let module_data = module_flow_data(graph, &node_to_module, num_modules, directed);

    let mut final_objective = leaf_objective.clone();
    let indices: Vec<u32> = (0..num_modules).collect();
    final_objective.init_partition(&module_data, &indices, &node_to_module);

    TrialResult {
        node_to_module,
        num_modules,
        codelength: final_objective.codelength(),
        index_codelength: final_objective.index_codelength(),
        module_codelength: final_objective.module_codelength(),
        one_level_codelength: one_level_codelength(graph),
        module_data,
        aborted,
    }
}

/// Re-optimizes starting from an existing node→module assignment. A
/// converged assignment comes back unchanged; anything else only
/// improves.
pub fn refine(
    graph: &GraphModel,
    cfg: &Config,
    assignment: &[u32],
    abort: Option<&AtomicBool>,
) -> Result<TrialResult, CoreError> {
    let directed = cfg.flow_model.directed_flow();
    if graph.has_state_nodes() {
        let objective = MemoryMapEquation::new(graph);
        refine_with(graph, &objective, cfg, assignment, directed, abort)
    } else {
        let objective = MapEquation::new(&graph.node_flow_data());
        refine_with(graph, &objective, cfg, assignment, directed, abort)
    }
}

fn refine_with<O: CodelengthObjective + Clone>(
    graph: &GraphModel,
    leaf_objective: &O,
    cfg: &Config,
    assignment: &[u32],
    directed: bool,
    abort: Option<&AtomicBool>,
) -> Result<TrialResult, CoreError> {
    let leaf = LevelNetwork::from_graph(graph);
    let mut rng = SmallRng::seed_from_u64(cfg.seed);
    let mut working = leaf_objective.clone();

    let (partition, stats) = optimize_level(
        &leaf,
        &mut rng,
        &mut working,
        Some(assignment),
        false,
        CORE_LOOP_LIMIT,
        abort,
    )?;

    let (mut top, node_to_super) = leaf.consolidate(&partition);
    working.consolidate(&node_to_super, top.nodes.len());
    let mut aborted = stats.aborted;

    if !aborted {
        let base = partition_codelength(&mut working, &top);
        let (next, was_aborted) =
            find_top_modules_repeatedly(&top, &mut working, &mut rng, false, base, abort)?;
        top = next;
        aborted = was_aborted;
    }

    Ok(assemble_result(graph, leaf_objective, &top, directed, aborted))
}

/// SplitMix64 mixing for independent, reproducible per-trial seeds.
#[inline]
fn seed_for_trial(base_seed: u64, trial_index: u32) -> u64 {
    if trial_index == 0 {
        return base_seed;
    }
    let mut z = base_seed ^ (trial_index as u64).wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[inline]
fn env_trial_threads() -> Option<usize> {
    for var in ["MAPFLOW_TRIAL_THREADS", "RAYON_NUM_THREADS"] {
        if let Some(value) = std::env::var_os(var) {
            if let Some(n) = value.into_string().ok().and_then(|s| s.parse::<usize>().ok()) {
                if n > 0 {
                    return Some(n);
                }
            }
        }
    }
    None
}

#[inline]
fn resolve_trial_threads(trials: u32, requested: Option<usize>) -> usize {
    let default_threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    requested
        .or_else(env_trial_threads)
        .unwrap_or(default_threads)
        .clamp(1, trials.max(1) as usize)
}

/// Runs the configured number of independent search trials and returns the
/// partition with the shortest codelength. Trial outcomes are independent
/// of worker scheduling.
pub fn run_trials(
    graph: &GraphModel,
    cfg: &Config,
    abort: Option<&AtomicBool>,
) -> Result<TrialResult, CoreError> {
    let directed = cfg.flow_model.directed_flow();
    if graph.has_state_nodes() {
        let objective = MemoryMapEquation::new(graph);
        run_trials_with(graph, &objective, cfg, directed, abort)
    } else {
        let objective = MapEquation::new(&graph.node_flow_data());
        run_trials_with(graph, &objective, cfg, directed, abort)
    }
}

fn run_trials_with<O: CodelengthObjective + Clone + Send + Sync>(
    graph: &GraphModel,
    leaf_objective: &O,
    cfg: &Config,
    directed: bool,
    abort: Option<&AtomicBool>,
) -> Result<TrialResult, CoreError> {
    if graph.node_count() == 0 {
        return Ok(TrialResult {
            node_to_module: Vec::new(),
            num_modules: 0,
            codelength: 0.0,
            index_codelength: 0.0,
            module_codelength: 0.0,
            one_level_codelength: 0.0,
            module_data: Vec::new(),
            aborted: false,
        });
    }

    let trials = cfg.num_trials.max(1);

    if trials == 1 {
        let mut rng = SmallRng::seed_from_u64(cfg.seed);
        return single_trial(graph, leaf_objective, &mut rng, directed, abort);
    }

    let worker_threads = resolve_trial_threads(trials, cfg.trial_threads);

    let mut results: Vec<(u32, Result<TrialResult, CoreError>)> = if worker_threads == 1 {
        (0..trials)
            .map(|trial| {
                let mut rng = SmallRng::seed_from_u64(seed_for_trial(cfg.seed, trial));
                (trial, single_trial(graph, leaf_objective, &mut rng, directed, abort))
            })
            .collect()
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads)
            .build()
            .map_err(|e| CoreError::InvalidConfig(format!("trial thread pool: {e}")))?;
        debug!(threads = worker_threads, trials, "running parallel trials");

        pool.install(|| {
            (0..trials)
                .into_par_iter()
                .map(|trial| {
                    let mut rng = SmallRng::seed_from_u64(seed_for_trial(cfg.seed, trial));
                    (trial, single_trial(graph, leaf_objective, &mut rng, directed, abort))
                })
                .collect()
        })
    };

    // Deterministic best-trial selection regardless of scheduling.
    results.sort_unstable_by_key(|(trial, _)| *trial);

    let mut best: Option<TrialResult> = None;
    for (_, result) in results {
        let trial = result?;
        best = match best {
            None => Some(trial),
            Some(current) => {
                if trial.codelength < current.codelength - MIN_CODELENGTH_IMPROVEMENT {
                    Some(trial)
                } else {
                    Some(current)
                }
            }
        };
    }

    Ok(best.expect("at least one trial"))
}
