use crate::error::CoreError;
use crate::network::NetworkSource;
use rustc_hash::FxHashMap;

/// Per-node flow aggregates filled in by the flow calculator and summed
/// per module during optimization.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlowData {
    pub flow: f64,
    pub enter_flow: f64,
    pub exit_flow: f64,
    pub teleport_flow: f64,
    pub teleport_weight: f64,
    pub dangling_flow: f64,
}

impl FlowData {
    pub fn add_assign(&mut self, other: &FlowData) {
        self.flow += other.flow;
        self.enter_flow += other.enter_flow;
        self.exit_flow += other.exit_flow;
        self.teleport_flow += other.teleport_flow;
        self.teleport_weight += other.teleport_weight;
        self.dangling_flow += other.dangling_flow;
    }

    pub fn sub_assign(&mut self, other: &FlowData) {
        self.flow -= other.flow;
        self.enter_flow -= other.enter_flow;
        self.exit_flow -= other.exit_flow;
        self.teleport_flow -= other.teleport_flow;
        self.teleport_weight -= other.teleport_weight;
        self.dangling_flow -= other.dangling_flow;
    }
}

#[derive(Debug, Clone)]
pub struct NodeRecord {
    /// External id from the input layer.
    pub id: u32,
    pub name: Option<String>,
    /// Teleportation weight supplied on input.
    pub input_weight: f64,
    /// Dense physical-node index for state nodes; equals the node's own
    /// index in plain networks.
    pub physical: u32,
    pub data: FlowData,
}

/// Dense-indexed node table and link list, immutable after the flow
/// calculator has written its results back.
///
/// Links keep the insertion order of the source network. Both adjacency
/// directions are index vectors over the link arrays, so every iteration
/// path visits links in a deterministic order and floating-point sums are
/// reproducible bit for bit.
#[derive(Debug, Clone)]
pub struct GraphModel {
    pub nodes: Vec<NodeRecord>,
    pub edge_source: Vec<u32>,
    pub edge_target: Vec<u32>,
    pub edge_weight: Vec<f64>,
    pub edge_flow: Vec<f64>,
    out_offsets: Vec<u32>,
    out_edge_idx: Vec<u32>,
    in_offsets: Vec<u32>,
    in_edge_idx: Vec<u32>,
    pub sum_link_weight: f64,
    pub sum_self_link_weight: f64,
    /// `2·ΣW − ΣW_self`, the undirected symmetrization denominator.
    pub sum_undir_link_weight: f64,
    num_physical: u32,
    has_states: bool,
}

impl GraphModel {
    /// Builds dense indexing from an abstract source. The external→internal
    /// map lives only inside this constructor.
    pub fn from_source(src: &dyn NetworkSource) -> Result<Self, CoreError> {
        let n = src.num_nodes() as usize;
        let m = src.num_links() as usize;

        let mut nodes = Vec::with_capacity(n);
        let mut ext_to_idx: FxHashMap<u32, u32> = FxHashMap::default();
        ext_to_idx.reserve(n);
        let mut phys_to_idx: FxHashMap<u32, u32> = FxHashMap::default();
        let mut any_physical = false;

        for spec in src.iter_nodes() {
            let idx = nodes.len() as u32;
            ext_to_idx.insert(spec.ext_id, idx);
            let physical = match spec.physical {
                Some(ext_phys) => {
                    any_physical = true;
                    let next = phys_to_idx.len() as u32;
                    *phys_to_idx.entry(ext_phys).or_insert(next)
                }
                None => idx,
            };
            nodes.push(NodeRecord {
                id: spec.ext_id,
                name: spec.name,
                input_weight: spec.weight,
                physical,
                data: FlowData::default(),
            });
        }

        let mut edge_source = Vec::with_capacity(m);
        let mut edge_target = Vec::with_capacity(m);
        let mut edge_weight = Vec::with_capacity(m);

        for (s_ext, t_ext, w) in src.iter_links() {
            let s = *ext_to_idx
                .get(&s_ext)
                .ok_or(CoreError::UnknownNode(s_ext))?;
            let t = *ext_to_idx
                .get(&t_ext)
                .ok_or(CoreError::UnknownNode(t_ext))?;
            edge_source.push(s);
            edge_target.push(t);
            edge_weight.push(w);
        }

        let (out_offsets, out_edge_idx) = index_by(&edge_source, n);
        let (in_offsets, in_edge_idx) = index_by(&edge_target, n);

        let sum_link_weight = src.sum_link_weight();
        let sum_self_link_weight = src.sum_self_link_weight();

        let num_physical = if any_physical {
            phys_to_idx.len() as u32
        } else {
            n as u32
        };

        Ok(Self {
            nodes,
            edge_flow: vec![0.0; edge_source.len()],
            edge_source,
            edge_target,
            edge_weight,
            out_offsets,
            out_edge_idx,
            in_offsets,
            in_edge_idx,
            sum_link_weight,
            sum_self_link_weight,
            sum_undir_link_weight: 2.0 * sum_link_weight - sum_self_link_weight,
            num_physical,
            has_states: any_physical,
        })
    }

    /// Whether the source declared state nodes mapped onto physical nodes,
    /// which selects the memory codelength variant downstream.
    #[inline]
    pub fn has_state_nodes(&self) -> bool {
        self.has_states
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edge_source.len()
    }

    /// Physical-node index space size; equals the node count when the
    /// network carries no state nodes.
    #[inline]
    pub fn physical_count(&self) -> usize {
        self.num_physical as usize
    }

    /// Link indices leaving `node`, in link insertion order.
    #[inline]
    pub fn out_edges(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        let range = self.out_offsets[node] as usize..self.out_offsets[node + 1] as usize;
        self.out_edge_idx[range].iter().map(|&e| e as usize)
    }

    /// Link indices entering `node`, in link insertion order.
    #[inline]
    pub fn in_edges(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        let range = self.in_offsets[node] as usize..self.in_offsets[node + 1] as usize;
        self.in_edge_idx[range].iter().map(|&e| e as usize)
    }

    #[inline]
    pub fn out_degree(&self, node: usize) -> usize {
        (self.out_offsets[node + 1] - self.out_offsets[node]) as usize
    }

    pub fn node_flow_data(&self) -> Vec<FlowData> {
        self.nodes.iter().map(|n| n.data).collect()
    }

    pub fn node_name_or_id(&self, node: usize) -> String {
        self.nodes[node]
            .name
            .clone()
            .unwrap_or_else(|| self.nodes[node].id.to_string())
    }
}

/// Stable counting sort of link indices keyed by endpoint, preserving
/// insertion order within each bucket.
fn index_by(keys: &[u32], n: usize) -> (Vec<u32>, Vec<u32>) {
    let mut counts = vec![0u32; n];
    for &k in keys {
        counts[k as usize] += 1;
    }

    let mut offsets = vec![0u32; n + 1];
    for i in 0..n {
        offsets[i + 1] = offsets[i] + counts[i];
    }

    let mut fill = vec![0u32; n];
    let mut edge_idx = vec![0u32; keys.len()];
    for (e, &k) in keys.iter().enumerate() {
        let pos = offsets[k as usize] + fill[k as usize];
        edge_idx[pos as usize] = e as u32;
        fill[k as usize] += 1;
    }

    (offsets, edge_idx)
}
