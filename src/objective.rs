//! Codelength bookkeeping: evaluates the description length of a partition
//! and the change a single node move would cause, in O(1) per candidate.

use crate::error::CoreError;
use crate::graph::FlowData;

/// `x log2 x`, with the 0 log 0 = 0 convention. The guard keeps every
/// downstream term free of `log(0)`.
#[inline]
pub fn plogp(p: f64) -> f64 {
    if p > 0.0 {
        p * p.log2()
    } else {
        0.0
    }
}

/// Flow crossing between a moving node and one candidate module.
///
/// `delta_exit` sums the node's out-link flow into the module,
/// `delta_enter` its in-link flow from the module. The two physical-flow
/// sums stay zero except under the memory objective.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaFlow {
    pub module: u32,
    pub delta_exit: f64,
    pub delta_enter: f64,
    pub sum_delta_plogp_phys_flow: f64,
    pub sum_plogp_phys_flow: f64,
}

impl DeltaFlow {
    pub fn new(module: u32) -> Self {
        Self {
            module,
            ..Self::default()
        }
    }

    #[inline]
    pub fn delta_enter_exit(&self) -> f64 {
        self.delta_enter + self.delta_exit
    }
}

/// Sparse accumulator of candidate-module deltas for one node move,
/// merging repeated contributions to the same module.
///
/// Backed by a dense redirect table so clearing touches only the modules
/// that were actually hit.
#[derive(Debug, Clone, Default)]
pub struct DeltaFlowBuffer {
    redirect: Vec<u32>,
    entries: Vec<DeltaFlow>,
}

impl DeltaFlowBuffer {
    pub fn with_capacity(num_modules: usize) -> Self {
        Self {
            redirect: vec![u32::MAX; num_modules],
            entries: Vec::with_capacity(64),
        }
    }

    pub fn reset(&mut self, num_modules: usize) {
        for entry in &self.entries {
            self.redirect[entry.module as usize] = u32::MAX;
        }
        self.entries.clear();
        if self.redirect.len() < num_modules {
            self.redirect.resize(num_modules, u32::MAX);
        }
    }

    #[inline]
    fn slot(&mut self, module: u32) -> &mut DeltaFlow {
        let m = module as usize;
        if self.redirect[m] == u32::MAX {
            self.redirect[m] = self.entries.len() as u32;
            self.entries.push(DeltaFlow::new(module));
        }
        let idx = self.redirect[m] as usize;
        &mut self.entries[idx]
    }

    pub fn add(&mut self, module: u32, delta_exit: f64, delta_enter: f64) {
        let entry = self.slot(module);
        entry.delta_exit += delta_exit;
        entry.delta_enter += delta_enter;
    }

    pub fn add_memory(&mut self, module: u32, delta_plogp: f64, plogp_node_flow: f64) {
        let entry = self.slot(module);
        entry.sum_delta_plogp_phys_flow += delta_plogp;
        entry.sum_plogp_phys_flow += plogp_node_flow;
    }

    pub fn entries(&self) -> &[DeltaFlow] {
        &self.entries
    }

    pub fn get(&self, module: u32) -> Option<DeltaFlow> {
        let slot = self.redirect[module as usize];
        (slot != u32::MAX).then(|| self.entries[slot as usize])
    }
}

/// The running sums the map equation is made of, together with the derived
/// codelengths. Shared by both objective implementations.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodelengthTerms {
    /// Σᵢ pᵢ log pᵢ over node flow. Constant for a given network level.
    pub node_flow_log_node_flow: f64,
    /// Σₘ plogp(pₘ + qₘ↷) over modules.
    pub flow_log_flow: f64,
    pub exit_log_exit: f64,
    pub enter_log_enter: f64,
    pub enter_flow: f64,
    pub enter_flow_log_enter_flow: f64,
    /// Boundary flow of an enclosing module. Zero at the root.
    pub exit_network_flow: f64,
    pub exit_network_flow_log_exit_network_flow: f64,
    pub index_codelength: f64,
    pub module_codelength: f64,
    pub codelength: f64,
}

impl CodelengthTerms {
    pub fn set_node_flow_term(&mut self, node_data: &[FlowData]) {
        self.node_flow_log_node_flow = node_data.iter().map(|d| plogp(d.flow)).sum();
    }

    /// From-scratch recomputation over the live modules. The only path
    /// that touches every module.
    pub fn init_from_modules(&mut self, module_data: &[FlowData], alive: &[u32]) {
        self.flow_log_flow = 0.0;
        self.exit_log_exit = 0.0;
        self.enter_log_enter = 0.0;
        self.enter_flow = 0.0;

        for &m in alive {
            let d = module_data[m as usize];
            self.flow_log_flow += plogp(d.flow + d.exit_flow);
            self.enter_log_enter += plogp(d.enter_flow);
            self.exit_log_exit += plogp(d.exit_flow);
            self.enter_flow += d.enter_flow;
        }

        self.enter_flow += self.exit_network_flow;
        self.enter_flow_log_enter_flow = plogp(self.enter_flow);
        self.derive_codelengths();
    }

    /// Change in codelength if the node moved, leaving all state untouched.
    /// Only the four terms indexed by the two involved modules change.
    pub fn delta_on_move(
        &self,
        current: &FlowData,
        old_delta: &DeltaFlow,
        new_delta: &DeltaFlow,
        module_data: &[FlowData],
    ) -> f64 {
        if old_delta.module == new_delta.module {
            return 0.0;
        }

        let old_m = old_delta.module as usize;
        let new_m = new_delta.module as usize;

        let de_old = old_delta.delta_enter_exit();
        let de_new = new_delta.delta_enter_exit();

        let delta_enter =
            plogp(self.enter_flow + de_old - de_new) - self.enter_flow_log_enter_flow;

        let delta_enter_log_enter = -plogp(module_data[old_m].enter_flow)
            - plogp(module_data[new_m].enter_flow)
            + plogp(module_data[old_m].enter_flow - current.enter_flow + de_old)
            + plogp(module_data[new_m].enter_flow + current.enter_flow - de_new);

        let delta_exit_log_exit = -plogp(module_data[old_m].exit_flow)
            - plogp(module_data[new_m].exit_flow)
            + plogp(module_data[old_m].exit_flow - current.exit_flow + de_old)
            + plogp(module_data[new_m].exit_flow + current.exit_flow - de_new);

        let delta_flow_log_flow = -plogp(module_data[old_m].exit_flow + module_data[old_m].flow)
            - plogp(module_data[new_m].exit_flow + module_data[new_m].flow)
            + plogp(
                module_data[old_m].exit_flow + module_data[old_m].flow
                    - current.exit_flow
                    - current.flow
                    + de_old,
            )
            + plogp(
                module_data[new_m].exit_flow + module_data[new_m].flow
                    + current.exit_flow
                    + current.flow
                    - de_new,
            );

        delta_enter - delta_enter_log_enter - delta_exit_log_exit + delta_flow_log_flow
    }

    /// Commits the move: same arithmetic as [`Self::delta_on_move`], applied
    /// to the running sums and the two module aggregates in place.
    pub fn apply_move(
        &mut self,
        current: &FlowData,
        old_delta: &DeltaFlow,
        new_delta: &DeltaFlow,
        module_data: &mut [FlowData],
    ) {
        let old_m = old_delta.module as usize;
        let new_m = new_delta.module as usize;

        let de_old = old_delta.delta_enter_exit();
        let de_new = new_delta.delta_enter_exit();

        self.enter_flow -= module_data[old_m].enter_flow + module_data[new_m].enter_flow;
        self.enter_log_enter -=
            plogp(module_data[old_m].enter_flow) + plogp(module_data[new_m].enter_flow);
        self.exit_log_exit -=
            plogp(module_data[old_m].exit_flow) + plogp(module_data[new_m].exit_flow);
        self.flow_log_flow -= plogp(module_data[old_m].exit_flow + module_data[old_m].flow)
            + plogp(module_data[new_m].exit_flow + module_data[new_m].flow);

        module_data[old_m].sub_assign(current);
        module_data[new_m].add_assign(current);

        // Links between the node and its old module turn into boundary
        // flow; links into the new module stop being boundary flow.
        module_data[old_m].enter_flow += de_old;
        module_data[old_m].exit_flow += de_old;
        module_data[new_m].enter_flow -= de_new;
        module_data[new_m].exit_flow -= de_new;

        self.enter_flow += module_data[old_m].enter_flow + module_data[new_m].enter_flow;
        self.enter_log_enter +=
            plogp(module_data[old_m].enter_flow) + plogp(module_data[new_m].enter_flow);
        self.exit_log_exit +=
            plogp(module_data[old_m].exit_flow) + plogp(module_data[new_m].exit_flow);
        self.flow_log_flow += plogp(module_data[old_m].exit_flow + module_data[old_m].flow)
            + plogp(module_data[new_m].exit_flow + module_data[new_m].flow);

        self.enter_flow_log_enter_flow = plogp(self.enter_flow);
        self.derive_codelengths();
    }

    pub fn derive_codelengths(&mut self) {
        self.index_codelength = self.enter_flow_log_enter_flow
            - self.enter_log_enter
            - self.exit_network_flow_log_exit_network_flow;
        self.module_codelength =
            -self.exit_log_exit + self.flow_log_flow - self.node_flow_log_node_flow;
        self.codelength = self.index_codelength + self.module_codelength;
    }

    /// Invariant probe: compares the running sums against a fresh
    /// recomputation and reports the worst drifting term.
    pub fn verify_against(
        &self,
        module_data: &[FlowData],
        alive: &[u32],
        tolerance: f64,
    ) -> Result<(), CoreError> {
        let mut fresh = *self;
        fresh.init_from_modules(module_data, alive);

        let checks: [(&'static str, f64, f64); 5] = [
            ("flow_log_flow", self.flow_log_flow, fresh.flow_log_flow),
            ("exit_log_exit", self.exit_log_exit, fresh.exit_log_exit),
            ("enter_log_enter", self.enter_log_enter, fresh.enter_log_enter),
            ("enter_flow", self.enter_flow, fresh.enter_flow),
            ("codelength", self.codelength, fresh.codelength),
        ];

        for (term, incremental, recomputed) in checks {
            let drift = (incremental - recomputed).abs();
            if drift >= tolerance {
                return Err(CoreError::InvariantViolation { term, drift });
            }
        }
        Ok(())
    }
}

/// What the optimizer needs from a codelength evaluator. Implemented by
/// [`MapEquation`] and [`crate::memory::MemoryMapEquation`], which share
/// [`CodelengthTerms`] by composition.
pub trait CodelengthObjective {
    fn codelength(&self) -> f64;
    fn index_codelength(&self) -> f64;
    fn module_codelength(&self) -> f64;

    /// Recomputes all terms for the given partition from scratch.
    fn init_partition(&mut self, module_data: &[FlowData], alive: &[u32], module_of: &[u32]);

    /// Extends the candidate deltas with contributions invisible to plain
    /// link counting. The base equation has none.
    fn add_memory_contributions(
        &self,
        node: u32,
        old_delta: &mut DeltaFlow,
        candidates: &mut DeltaFlowBuffer,
    ) {
        let _ = (node, old_delta, candidates);
    }

    /// Codelength change if `node` moved, without committing.
    fn delta_on_move(
        &self,
        node: u32,
        node_data: &FlowData,
        old_delta: &DeltaFlow,
        new_delta: &DeltaFlow,
        module_data: &[FlowData],
    ) -> f64;

    /// Commits the move into the terms and module aggregates.
    fn update_on_move(
        &mut self,
        node: u32,
        node_data: &FlowData,
        old_delta: &DeltaFlow,
        new_delta: &DeltaFlow,
        module_data: &mut [FlowData],
    );

    /// Collapses per-node bookkeeping onto a consolidated level, where
    /// current node `i` becomes super-node `node_to_super[i]`.
    fn consolidate(&mut self, node_to_super: &[u32], num_super_nodes: usize) {
        let _ = (node_to_super, num_super_nodes);
    }

    /// Compares incremental state against a fresh recomputation.
    fn verify(&self, module_data: &[FlowData], alive: &[u32]) -> Result<(), CoreError>;
}

/// The two-level map equation over plain (first-order) flow.
#[derive(Debug, Clone)]
pub struct MapEquation {
    terms: CodelengthTerms,
}

/// Term drift at or above this magnitude fails the invariant probe.
pub const TERM_DRIFT_TOLERANCE: f64 = 1.0e-8;

impl MapEquation {
    pub fn new(node_data: &[FlowData]) -> Self {
        let mut terms = CodelengthTerms::default();
        terms.set_node_flow_term(node_data);
        Self { terms }
    }

    pub fn terms(&self) -> &CodelengthTerms {
        &self.terms
    }
}

impl CodelengthObjective for MapEquation {
    fn codelength(&self) -> f64 {
        self.terms.codelength
    }

    fn index_codelength(&self) -> f64 {
        self.terms.index_codelength
    }

    fn module_codelength(&self) -> f64 {
        self.terms.module_codelength
    }

    fn init_partition(&mut self, module_data: &[FlowData], alive: &[u32], _module_of: &[u32]) {
        self.terms.init_from_modules(module_data, alive);
    }

    fn delta_on_move(
        &self,
        _node: u32,
        node_data: &FlowData,
        old_delta: &DeltaFlow,
        new_delta: &DeltaFlow,
        module_data: &[FlowData],
    ) -> f64 {
        self.terms
            .delta_on_move(node_data, old_delta, new_delta, module_data)
    }

    fn update_on_move(
        &mut self,
        _node: u32,
        node_data: &FlowData,
        old_delta: &DeltaFlow,
        new_delta: &DeltaFlow,
        module_data: &mut [FlowData],
    ) {
        self.terms
            .apply_move(node_data, old_delta, new_delta, module_data);
    }

    fn verify(&self, module_data: &[FlowData], alive: &[u32]) -> Result<(), CoreError> {
        self.terms
            .verify_against(module_data, alive, TERM_DRIFT_TOLERANCE)
    }
}
