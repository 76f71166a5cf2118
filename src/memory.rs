//! Memory (Grassberger) variant of the codelength objective.
//!
//! State nodes that share a physical node are coded together when they sit
//! in the same module, so the node-flow entropy term runs over per-module
//! physical occupancies instead of individual state nodes. The occupancy
//! maps are maintained incrementally under moves.

use crate::error::CoreError;
use crate::graph::{FlowData, GraphModel};
use crate::objective::{
    plogp, CodelengthObjective, CodelengthTerms, DeltaFlow, DeltaFlowBuffer, TERM_DRIFT_TOLERANCE,
};
use rustc_hash::FxHashMap;

/// One physical node's share of a (super-)node's flow.
#[derive(Debug, Clone, Copy)]
struct PhysData {
    phys: u32,
    sum_flow: f64,
}

/// Aggregate of the state nodes of one physical node inside one module.
#[derive(Debug, Clone, Copy, Default)]
struct ModuleOccupancy {
    sum_flow: f64,
    states: u32,
}

#[derive(Debug, Clone)]
pub struct MemoryMapEquation {
    terms: CodelengthTerms,
    /// Physical contributions per current-level node. A leaf state node
    /// has exactly one entry; a consolidated super-node aggregates the
    /// physical nodes of its members.
    node_phys: Vec<Vec<PhysData>>,
    /// Per physical node: module index → occupancy. Rebuilt by
    /// `init_partition`, maintained incrementally by `update_on_move`.
    phys_module_flow: Vec<FxHashMap<u32, ModuleOccupancy>>,
}

impl MemoryMapEquation {
    pub fn new(graph: &GraphModel) -> Self {
        let node_phys = graph
            .nodes
            .iter()
            .map(|node| {
                vec![PhysData {
                    phys: node.physical,
                    sum_flow: node.data.flow,
                }]
            })
            .collect();

        Self {
            terms: CodelengthTerms::default(),
            node_phys,
            phys_module_flow: vec![FxHashMap::default(); graph.physical_count()],
        }
    }

    pub fn terms(&self) -> &CodelengthTerms {
        &self.terms
    }

    /// Total flow of a physical node summed across the modules it
    /// occupies. Must equal the physical node's stationary flow.
    pub fn physical_flow(&self, phys: u32) -> f64 {
        self.phys_module_flow[phys as usize]
            .values()
            .map(|occ| occ.sum_flow)
            .sum()
    }

    fn rebuild_occupancies(&mut self, module_of: &[u32]) {
        for map in &mut self.phys_module_flow {
            map.clear();
        }
        for (node, phys_list) in self.node_phys.iter().enumerate() {
            let module = module_of[node];
            for pd in phys_list {
                let occ = self.phys_module_flow[pd.phys as usize]
                    .entry(module)
                    .or_default();
                occ.sum_flow += pd.sum_flow;
                occ.states += 1;
            }
        }
    }

    /// Σ over physical nodes and modules of plogp(occupancy flow); replaces
    /// the per-state-node entropy term of the plain equation.
    fn physical_node_flow_term(&self) -> f64 {
        let mut sum = 0.0;
        for map in &self.phys_module_flow {
            for occ in map.values() {
                sum += plogp(occ.sum_flow);
            }
        }
        sum
    }

    fn memory_delta(old_delta: &DeltaFlow, new_delta: &DeltaFlow) -> f64 {
        old_delta.sum_delta_plogp_phys_flow + new_delta.sum_delta_plogp_phys_flow
            + old_delta.sum_plogp_phys_flow
            - new_delta.sum_plogp_phys_flow
    }

    fn update_physical_nodes(&mut self, node: u32, old_module: u32, new_module: u32) {
        let Self {
            node_phys,
            phys_module_flow,
            ..
        } = self;

        for pd in &node_phys[node as usize] {
            let map = &mut phys_module_flow[pd.phys as usize];
            if let Some(occ) = map.get_mut(&old_module) {
                occ.sum_flow -= pd.sum_flow;
                occ.states -= 1;
                if occ.states == 0 {
                    map.remove(&old_module);
                }
            }
            let occ = map.entry(new_module).or_default();
            occ.sum_flow += pd.sum_flow;
            occ.states += 1;
        }
    }
}

impl CodelengthObjective for MemoryMapEquation {
    fn codelength(&self) -> f64 {
        self.terms.codelength
    }

    fn index_codelength(&self) -> f64 {
        self.terms.index_codelength
    }

    fn module_codelength(&self) -> f64 {
        self.terms.module_codelength
    }

    fn init_partition(&mut self, module_data: &[FlowData], alive: &[u32], module_of: &[u32]) {
        self.rebuild_occupancies(module_of);
        self.terms.node_flow_log_node_flow = self.physical_node_flow_term();
        self.terms.init_from_modules(module_data, alive);
    }

    fn add_memory_contributions(
        &self,
        node: u32,
        old_delta: &mut DeltaFlow,
        candidates: &mut DeltaFlowBuffer,
    ) {
        for pd in &self.node_phys[node as usize] {
            let map = &self.phys_module_flow[pd.phys as usize];
            for (&module, occ) in map {
                if module == old_delta.module {
                    // Leaving: the occupancy loses this node's share.
                    let new_flow = occ.sum_flow - pd.sum_flow;
                    old_delta.sum_delta_plogp_phys_flow += plogp(new_flow) - plogp(occ.sum_flow);
                    old_delta.sum_plogp_phys_flow += plogp(pd.sum_flow);
                } else {
                    // Arriving: the occupancy absorbs this node's share.
                    let new_flow = occ.sum_flow + pd.sum_flow;
                    candidates.add_memory(
                        module,
                        plogp(new_flow) - plogp(occ.sum_flow),
                        plogp(pd.sum_flow),
                    );
                }
            }
        }
    }

    fn delta_on_move(
        &self,
        _node: u32,
        node_data: &FlowData,
        old_delta: &DeltaFlow,
        new_delta: &DeltaFlow,
        module_data: &[FlowData],
    ) -> f64 {
        if old_delta.module == new_delta.module {
            return 0.0;
        }
        let base = self
            .terms
            .delta_on_move(node_data, old_delta, new_delta, module_data);
        base - Self::memory_delta(old_delta, new_delta)
    }

    fn update_on_move(
        &mut self,
        node: u32,
        node_data: &FlowData,
        old_delta: &DeltaFlow,
        new_delta: &DeltaFlow,
        module_data: &mut [FlowData],
    ) {
        self.terms
            .apply_move(node_data, old_delta, new_delta, module_data);
        self.terms.node_flow_log_node_flow += Self::memory_delta(old_delta, new_delta);
        self.terms.derive_codelengths();
        self.update_physical_nodes(node, old_delta.module, new_delta.module);
    }

    fn consolidate(&mut self, node_to_super: &[u32], num_super_nodes: usize) {
        let mut merged: Vec<FxHashMap<u32, f64>> =
            vec![FxHashMap::default(); num_super_nodes];
        for (node, phys_list) in self.node_phys.iter().enumerate() {
            let target = &mut merged[node_to_super[node] as usize];
            for pd in phys_list {
                *target.entry(pd.phys).or_insert(0.0) += pd.sum_flow;
            }
        }

        self.node_phys = merged
            .into_iter()
            .map(|map| {
                let mut list: Vec<PhysData> = map
                    .into_iter()
                    .map(|(phys, sum_flow)| PhysData { phys, sum_flow })
                    .collect();
                list.sort_unstable_by_key(|pd| pd.phys);
                list
            })
            .collect();
        // Occupancies refer to the old level; the next init_partition
        // rebuilds them.
        for map in &mut self.phys_module_flow {
            map.clear();
        }
    }

    fn verify(&self, module_data: &[FlowData], alive: &[u32]) -> Result<(), CoreError> {
        self.terms
            .verify_against(module_data, alive, TERM_DRIFT_TOLERANCE)?;

        let fresh = self.physical_node_flow_term();
        let drift = (fresh - self.terms.node_flow_log_node_flow).abs();
        if drift >= TERM_DRIFT_TOLERANCE {
            return Err(CoreError::InvariantViolation {
                term: "node_flow_log_node_flow",
                drift,
            });
        }
        Ok(())
    }
}
