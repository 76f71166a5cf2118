//! Module assignment and per-module aggregates, maintained incrementally
//! under node moves and collapsed on consolidation.

use crate::graph::{FlowData, GraphModel};

/// Dense renumbering of surviving modules, in first-use order of the
/// assignment scan.
#[derive(Debug, Clone)]
pub struct ModuleRemap {
    /// old module index → new dense index (`u32::MAX` for dead modules).
    pub old_to_new: Vec<u32>,
    /// new dense index → old module index.
    pub ordered_old: Vec<u32>,
}

/// One level's partition: node→module assignment, member counts, module
/// flow aggregates, and the stack of currently empty module slots.
///
/// The aggregates themselves are mutated by the codelength objective when
/// a move is committed; this type keeps the bookkeeping around them.
#[derive(Debug, Clone)]
pub struct PartitionState {
    module_of: Vec<u32>,
    member_counts: Vec<u32>,
    module_flow: Vec<FlowData>,
    empty_modules: Vec<u32>,
    alive: u32,
}

impl PartitionState {
    /// The canonical starting point: every node alone in its own module.
    pub fn one_module_per_node(node_data: &[FlowData]) -> Self {
        let n = node_data.len();
        Self {
            module_of: (0..n as u32).collect(),
            member_counts: vec![1; n],
            module_flow: node_data.to_vec(),
            empty_modules: Vec::with_capacity(n),
            alive: n as u32,
        }
    }

    #[inline]
    pub fn module_of(&self) -> &[u32] {
        &self.module_of
    }

    #[inline]
    pub fn module(&self, node: usize) -> u32 {
        self.module_of[node]
    }

    #[inline]
    pub fn module_flow(&self) -> &[FlowData] {
        &self.module_flow
    }

    #[inline]
    pub fn module_flow_mut(&mut self) -> &mut [FlowData] {
        &mut self.module_flow
    }

    #[inline]
    pub fn members(&self, module: u32) -> u32 {
        self.member_counts[module as usize]
    }

    #[inline]
    pub fn modules_alive(&self) -> u32 {
        self.alive
    }

    /// Ascending indices of the non-empty modules.
    pub fn alive_modules(&self) -> Vec<u32> {
        (0..self.member_counts.len() as u32)
            .filter(|&m| self.member_counts[m as usize] > 0)
            .collect()
    }

    /// The empty slot a node may open a fresh module in, if any.
    #[inline]
    pub fn empty_module_candidate(&self) -> Option<u32> {
        self.empty_modules.last().copied()
    }

    /// −1 if the source module empties, +1 if the target was empty, else 0.
    pub fn delta_num_modules_if_moving(&self, from: u32, to: u32) -> i32 {
        if from == to {
            return 0;
        }
        let mut delta = 0;
        if self.member_counts[from as usize] == 1 {
            delta -= 1;
        }
        if self.member_counts[to as usize] == 0 {
            delta += 1;
        }
        delta
    }

    /// Commits the assignment change. The caller must already have applied
    /// the flow arithmetic through the objective. Filling any empty module
    /// pops one slot off the stack; the stack tracks the count of empty
    /// modules, not their identity.
    pub fn apply_move(&mut self, node: usize, to: u32) {
        let from = self.module_of[node];
        debug_assert_ne!(from, to, "move must change the module");

        if self.member_counts[to as usize] == 0 {
            let _ = self.empty_modules.pop();
            self.alive += 1;
        }
        if self.member_counts[from as usize] == 1 {
            self.empty_modules.push(from);
            self.alive -= 1;
        }

        self.member_counts[from as usize] -= 1;
        self.member_counts[to as usize] += 1;
        self.module_of[node] = to;
    }

    /// Member lists per module, built on demand.
    pub fn members_of(&self) -> Vec<Vec<u32>> {
        let mut members: Vec<Vec<u32>> = vec![Vec::new(); self.member_counts.len()];
        for (node, &m) in self.module_of.iter().enumerate() {
            members[m as usize].push(node as u32);
        }
        members
    }

    /// Dense renumbering of the surviving modules for building the next
    /// level. First-use order keeps consolidation deterministic.
    pub fn consolidation_remap(&self) -> ModuleRemap {
        let mut old_to_new = vec![u32::MAX; self.module_flow.len()];
        let mut ordered_old = Vec::with_capacity(self.alive as usize);
        for &m in &self.module_of {
            if old_to_new[m as usize] == u32::MAX {
                old_to_new[m as usize] = ordered_old.len() as u32;
                ordered_old.push(m);
            }
        }
        ModuleRemap {
            old_to_new,
            ordered_old,
        }
    }
}

/// From-scratch module aggregates for an arbitrary leaf assignment:
/// flow summed over members, enter/exit from inter-module link flow.
/// Used to seed final results and by the invariant probes in tests.
pub fn module_flow_data(
    graph: &GraphModel,
    module_of: &[u32],
    num_modules: u32,
    directed: bool,
) -> Vec<FlowData> {
    let mut modules = vec![FlowData::default(); num_modules as usize];

    for (node, record) in graph.nodes.iter().enumerate() {
        modules[module_of[node] as usize].flow += record.data.flow;
    }

    for e in 0..graph.edge_count() {
        let s = graph.edge_source[e] as usize;
        let t = graph.edge_target[e] as usize;
        let ms = module_of[s] as usize;
        let mt = module_of[t] as usize;
        if ms == mt {
            continue;
        }
        let f = graph.edge_flow[e];
        if directed {
            modules[ms].exit_flow += f;
            modules[mt].enter_flow += f;
        } else {
            let half = f / 2.0;
            modules[ms].exit_flow += half;
            modules[ms].enter_flow += half;
            modules[mt].exit_flow += half;
            modules[mt].enter_flow += half;
        }
    }

    modules
}
