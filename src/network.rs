//! Abstract network input consumed by [`crate::graph::GraphModel`].
//!
//! The I/O layer (file parser, programmatic construction) produces a
//! [`NetworkSource`]; the graph model turns it into dense indexing and the
//! flow calculator never sees external ids again.

use rustc_hash::FxHashMap;

/// A node as supplied by the input layer, keyed by its external id.
#[derive(Debug, Clone, Default)]
pub struct NodeSpec {
    pub ext_id: u32,
    pub name: Option<String>,
    /// Teleportation weight when teleporting to nodes.
    pub weight: f64,
    /// Physical node this state node belongs to, for memory networks.
    /// Plain networks leave it unset.
    pub physical: Option<u32>,
}

/// Weighted-link view of an upstream network.
///
/// Multi-edges must already be aggregated; iteration order must be stable
/// between calls because downstream floating-point summation follows it.
pub trait NetworkSource {
    fn num_nodes(&self) -> u32;
    fn num_links(&self) -> u32;
    fn sum_link_weight(&self) -> f64;
    fn sum_self_link_weight(&self) -> f64;
    fn iter_nodes(&self) -> Box<dyn Iterator<Item = NodeSpec> + '_>;
    /// `(source_ext, target_ext, weight)` in insertion order.
    fn iter_links(&self) -> Box<dyn Iterator<Item = (u32, u32, f64)> + '_>;
}

/// In-memory [`NetworkSource`] used by the parser and by tests.
///
/// Plain networks address nodes by vertex id. Once a state node is
/// declared, the network becomes a memory network: links address state
/// ids, and vertex entries only carry name and weight metadata for the
/// physical nodes behind the states.
///
/// Links with non-positive weight are dropped on insertion and duplicate
/// links are summed, so consumers see an aggregated multigraph-free view.
#[derive(Debug, Clone, Default)]
pub struct NetworkBuilder {
    vertices: Vec<NodeSpec>,
    vertex_pos: FxHashMap<u32, usize>,
    states: Vec<NodeSpec>,
    state_pos: FxHashMap<u32, usize>,
    links: Vec<(u32, u32, f64)>,
    link_pos: FxHashMap<(u32, u32), usize>,
    sum_link_weight: f64,
    sum_self_link_weight: f64,
}

impl NetworkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve_nodes(&mut self, n: usize) {
        self.vertices.reserve(n);
        self.vertex_pos.reserve(n);
    }

    pub fn reserve_links(&mut self, n: usize) {
        self.links.reserve(n);
        self.link_pos.reserve(n);
    }

    /// Adds or updates a vertex. Re-adding an id refines name and weight,
    /// which lets a `*Vertices` section enrich nodes first seen in links.
    pub fn add_node(&mut self, ext_id: u32, name: Option<String>, weight: f64) {
        match self.vertex_pos.get(&ext_id) {
            Some(&pos) => {
                let node = &mut self.vertices[pos];
                if name.is_some() {
                    node.name = name;
                }
                node.weight = weight;
            }
            None => {
                self.vertex_pos.insert(ext_id, self.vertices.len());
                self.vertices.push(NodeSpec {
                    ext_id,
                    name,
                    weight,
                    physical: None,
                });
            }
        }
    }

    /// Declares a state node of the given physical node. The first state
    /// declaration switches the whole network into memory mode.
    pub fn add_state(&mut self, state_id: u32, physical: u32, name: Option<String>) {
        match self.state_pos.get(&state_id) {
            Some(&pos) => {
                let state = &mut self.states[pos];
                state.physical = Some(physical);
                if name.is_some() {
                    state.name = name;
                }
            }
            None => {
                self.state_pos.insert(state_id, self.states.len());
                self.states.push(NodeSpec {
                    ext_id: state_id,
                    name,
                    weight: 1.0,
                    physical: Some(physical),
                });
            }
        }
    }

    pub fn add_link(&mut self, source: u32, target: u32, weight: f64) {
        if weight <= 0.0 {
            return;
        }
        // In plain networks link endpoints materialize nodes; in memory
        // networks endpoints must match declared states, checked when the
        // graph is built.
        if self.states.is_empty() {
            self.touch_vertex(source);
            self.touch_vertex(target);
        }

        self.sum_link_weight += weight;
        if source == target {
            self.sum_self_link_weight += weight;
        }

        match self.link_pos.get(&(source, target)) {
            Some(&pos) => self.links[pos].2 += weight,
            None => {
                self.link_pos.insert((source, target), self.links.len());
                self.links.push((source, target, weight));
            }
        }
    }

    pub fn is_memory_network(&self) -> bool {
        !self.states.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() && self.states.is_empty()
    }

    fn touch_vertex(&mut self, ext_id: u32) {
        if !self.vertex_pos.contains_key(&ext_id) {
            self.add_node(ext_id, None, 1.0);
        }
    }

    /// A state node inherits name and weight from its physical vertex
    /// unless it carries its own.
    fn resolve_state(&self, state: &NodeSpec) -> NodeSpec {
        let mut resolved = state.clone();
        if let Some(&pos) = state.physical.as_ref().and_then(|p| self.vertex_pos.get(p)) {
            let vertex = &self.vertices[pos];
            if resolved.name.is_none() {
                resolved.name = vertex.name.clone();
            }
            resolved.weight = vertex.weight;
        }
        resolved
    }
}

impl NetworkSource for NetworkBuilder {
    fn num_nodes(&self) -> u32 {
        if self.is_memory_network() {
            self.states.len() as u32
        } else {
            self.vertices.len() as u32
        }
    }

    fn num_links(&self) -> u32 {
        self.links.len() as u32
    }

    fn sum_link_weight(&self) -> f64 {
        self.sum_link_weight
    }

    fn sum_self_link_weight(&self) -> f64 {
        self.sum_self_link_weight
    }

    fn iter_nodes(&self) -> Box<dyn Iterator<Item = NodeSpec> + '_> {
        if self.is_memory_network() {
            Box::new(self.states.iter().map(|state| self.resolve_state(state)))
        } else {
            Box::new(self.vertices.iter().cloned())
        }
    }

    fn iter_links(&self) -> Box<dyn Iterator<Item = (u32, u32, f64)> + '_> {
        Box::new(self.links.iter().copied())
    }
}
