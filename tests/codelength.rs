use approx::assert_abs_diff_eq;
use mapflow::config::{Config, FlowModel};
use mapflow::flow::calculate_flow;
use mapflow::graph::GraphModel;
use mapflow::memory::MemoryMapEquation;
use mapflow::network::NetworkBuilder;
use mapflow::objective::{CodelengthObjective, DeltaFlow, DeltaFlowBuffer, MapEquation};
use mapflow::partition::{module_flow_data, PartitionState};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Ring plus random chords, so the graph is connected and reproducible.
fn random_graph(n: u32, extra_edge_prob: f64, seed: u64) -> GraphModel {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut network = NetworkBuilder::new();
    for i in 0..n {
        network.add_link(i, (i + 1) % n, 1.0);
    }
    for i in 0..n {
        for j in (i + 2)..n {
            if rng.gen::<f64>() < extra_edge_prob {
                network.add_link(i, j, rng.gen_range(0.5..1.5));
            }
        }
    }
    let mut graph = GraphModel::from_source(&network).unwrap();
    calculate_flow(&mut graph, &Config::default(), None).unwrap();
    graph
}

/// Link-flow deltas between `node` and its current/target modules,
/// mirroring what the optimizer hands the objective.
fn link_deltas(
    graph: &GraphModel,
    module_of: &[u32],
    node: usize,
    to: u32,
) -> (DeltaFlow, DeltaFlow) {
    let from = module_of[node];
    let mut old = DeltaFlow::new(from);
    let mut new = DeltaFlow::new(to);

    for e in graph.out_edges(node) {
        let t = graph.edge_target[e] as usize;
        if t == node {
            continue;
        }
        let m = module_of[t];
        if m == from {
            old.delta_exit += graph.edge_flow[e];
        } else if m == to {
            new.delta_exit += graph.edge_flow[e];
        }
    }
    for e in graph.in_edges(node) {
        let s = graph.edge_source[e] as usize;
        if s == node {
            continue;
        }
        let m = module_of[s];
        if m == from {
            old.delta_enter += graph.edge_flow[e];
        } else if m == to {
            new.delta_enter += graph.edge_flow[e];
        }
    }

    (old, new)
}

fn fresh_codelength(graph: &GraphModel, partition: &PartitionState, directed: bool) -> f64 {
    let modules = module_flow_data(
        graph,
        partition.module_of(),
        partition.module_flow().len() as u32,
        directed,
    );
    let mut objective = MapEquation::new(&graph.node_flow_data());
    objective.init_partition(&modules, &partition.alive_modules(), partition.module_of());
    objective.codelength()
}

#[test]
fn single_module_codelength_is_node_entropy() {
    let mut network = NetworkBuilder::new();
    network.add_link(0, 1, 1.0);
    let mut graph = GraphModel::from_source(&network).unwrap();
    calculate_flow(&mut graph, &Config::default(), None).unwrap();

    let all_in_one = vec![0u32, 0u32];
    let modules = module_flow_data(&graph, &all_in_one, 1, false);
    let mut objective = MapEquation::new(&graph.node_flow_data());
    objective.init_partition(&modules, &[0], &all_in_one);

    // Two equal-flow nodes in one module cost exactly one bit per step.
    assert_abs_diff_eq!(objective.codelength(), 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(objective.index_codelength(), 0.0, epsilon = 1e-12);
}

#[test]
fn moving_a_node_to_its_own_module_is_free() {
    let graph = random_graph(8, 0.3, 7);
    let node_data = graph.node_flow_data();
    let mut objective = MapEquation::new(&node_data);
    let partition = PartitionState::one_module_per_node(&node_data);
    objective.init_partition(
        partition.module_flow(),
        &partition.alive_modules(),
        partition.module_of(),
    );

    let (old_delta, _) = link_deltas(&graph, partition.module_of(), 3, 3);
    let same = DeltaFlow {
        module: 3,
        ..old_delta
    };
    let delta = objective.delta_on_move(3, &node_data[3], &old_delta, &same, partition.module_flow());
    assert_eq!(delta, 0.0);
}

#[test]
fn delta_prediction_matches_commit() {
    let graph = random_graph(10, 0.3, 11);
    let node_data = graph.node_flow_data();
    let mut objective = MapEquation::new(&node_data);
    let mut partition = PartitionState::one_module_per_node(&node_data);
    objective.init_partition(
        partition.module_flow(),
        &partition.alive_modules(),
        partition.module_of(),
    );

    let node = 4usize;
    let target = 7u32;
    let (old_delta, new_delta) = link_deltas(&graph, partition.module_of(), node, target);

    let before = objective.codelength();
    let predicted = objective.delta_on_move(
        node as u32,
        &node_data[node],
        &old_delta,
        &new_delta,
        partition.module_flow(),
    );
    objective.update_on_move(
        node as u32,
        &node_data[node],
        &old_delta,
        &new_delta,
        partition.module_flow_mut(),
    );
    partition.apply_move(node, target);

    assert_abs_diff_eq!(before + predicted, objective.codelength(), epsilon = 1e-13);
}

#[test]
fn random_move_sequence_stays_consistent_with_recomputation() {
    let graph = random_graph(10, 0.3, 42);
    let n = graph.node_count();
    let node_data = graph.node_flow_data();

    let mut objective = MapEquation::new(&node_data);
    let mut partition = PartitionState::one_module_per_node(&node_data);
    objective.init_partition(
        partition.module_flow(),
        &partition.alive_modules(),
        partition.module_of(),
    );

    let mut rng = SmallRng::seed_from_u64(42);
    let mut commits = 0u32;

    for step in 0..1000 {
        let node = rng.gen_range(0..n);
        let target = rng.gen_range(0..n as u32);
        if partition.module(node) == target {
            continue;
        }

        let (old_delta, new_delta) = link_deltas(&graph, partition.module_of(), node, target);
        let before = objective.codelength();
        let predicted = objective.delta_on_move(
            node as u32,
            &node_data[node],
            &old_delta,
            &new_delta,
            partition.module_flow(),
        );
        objective.update_on_move(
            node as u32,
            &node_data[node],
            &old_delta,
            &new_delta,
            partition.module_flow_mut(),
        );
        partition.apply_move(node, target);
        commits += 1;

        assert_abs_diff_eq!(before + predicted, objective.codelength(), epsilon = 1e-12);
        assert_abs_diff_eq!(
            objective.codelength(),
            fresh_codelength(&graph, &partition, false),
            epsilon = 1e-10
        );

        if step % 100 == 0 {
            objective
                .verify(partition.module_flow(), &partition.alive_modules())
                .unwrap();
        }
    }

    assert!(commits > 500, "move sequence degenerated: {} commits", commits);

    // Partition bookkeeping survived the churn.
    let total_flow: f64 = partition
        .alive_modules()
        .iter()
        .map(|&m| partition.module_flow()[m as usize].flow)
        .sum();
    assert_abs_diff_eq!(total_flow, 1.0, epsilon = 1e-10);
}

#[test]
fn module_count_delta_tracks_emptying_and_filling() {
    let node_data = vec![mapflow::graph::FlowData::default(); 3];
    let mut partition = PartitionState::one_module_per_node(&node_data);

    assert_eq!(partition.modules_alive(), 3);
    assert_eq!(partition.delta_num_modules_if_moving(0, 0), 0);
    assert_eq!(partition.delta_num_modules_if_moving(0, 1), -1);

    partition.apply_move(0, 1);
    assert_eq!(partition.modules_alive(), 2);
    // Module 0 is empty now: moving node 0 back both empties 1's loss and
    // revives 0.
    assert_eq!(partition.delta_num_modules_if_moving(1, 0), 1);
    partition.apply_move(1, 2);
    assert_eq!(partition.modules_alive(), 2);
    assert_eq!(partition.members(2), 2);
}

fn state_network_graph() -> GraphModel {
    let mut network = NetworkBuilder::new();
    network.add_node(1, Some("a".to_string()), 1.0);
    network.add_node(2, Some("b".to_string()), 1.0);
    network.add_state(10, 1, None);
    network.add_state(11, 1, None);
    network.add_state(20, 2, None);
    network.add_state(21, 2, None);
    network.add_link(10, 11, 1.0);
    network.add_link(11, 20, 0.5);
    network.add_link(20, 21, 1.0);
    network.add_link(21, 10, 0.5);

    let mut graph = GraphModel::from_source(&network).unwrap();
    let cfg = Config {
        flow_model: FlowModel::Rawdir,
        ..Config::default()
    };
    calculate_flow(&mut graph, &cfg, None).unwrap();
    graph
}

#[test]
fn state_nodes_map_onto_physical_indices() {
    let graph = state_network_graph();
    assert!(graph.has_state_nodes());
    assert_eq!(graph.node_count(), 4);
    assert_eq!(graph.physical_count(), 2);
    assert_eq!(graph.nodes[0].physical, graph.nodes[1].physical);
    assert_ne!(graph.nodes[0].physical, graph.nodes[2].physical);
    // State nodes inherit the physical vertex name.
    assert_eq!(graph.nodes[0].name.as_deref(), Some("a"));
}

#[test]
fn memory_objective_conserves_physical_flow() {
    let graph = state_network_graph();
    let node_data = graph.node_flow_data();
    let mut objective = MemoryMapEquation::new(&graph);
    let mut partition = PartitionState::one_module_per_node(&node_data);
    objective.init_partition(
        partition.module_flow(),
        &partition.alive_modules(),
        partition.module_of(),
    );

    let state_total = |phys: u32| -> f64 {
        graph
            .nodes
            .iter()
            .filter(|n| n.physical == phys)
            .map(|n| n.data.flow)
            .sum()
    };
    assert_abs_diff_eq!(objective.physical_flow(0), state_total(0), epsilon = 1e-12);
    assert_abs_diff_eq!(objective.physical_flow(1), state_total(1), epsilon = 1e-12);

    // Move state 1 (same physical node as state 0) into state 0's module;
    // physical totals must be unaffected.
    let node = 1usize;
    let target = 0u32;
    let mut candidates = DeltaFlowBuffer::with_capacity(graph.node_count());
    candidates.reset(graph.node_count());
    let (mut old_delta, link_new) = link_deltas(&graph, partition.module_of(), node, target);
    candidates.add(target, link_new.delta_exit, link_new.delta_enter);
    objective.add_memory_contributions(node as u32, &mut old_delta, &mut candidates);
    let new_delta = candidates.get(target).unwrap();

    objective.update_on_move(
        node as u32,
        &node_data[node],
        &old_delta,
        &new_delta,
        partition.module_flow_mut(),
    );
    partition.apply_move(node, target);

    assert_abs_diff_eq!(objective.physical_flow(0), state_total(0), epsilon = 1e-12);
    objective
        .verify(partition.module_flow(), &partition.alive_modules())
        .unwrap();
}

#[test]
fn memory_delta_matches_commit_and_recomputation() {
    let graph = state_network_graph();
    let n = graph.node_count();
    let node_data = graph.node_flow_data();

    let mut objective = MemoryMapEquation::new(&graph);
    let mut partition = PartitionState::one_module_per_node(&node_data);
    objective.init_partition(
        partition.module_flow(),
        &partition.alive_modules(),
        partition.module_of(),
    );

    let node = 1usize;
    let target = 0u32;
    let mut candidates = DeltaFlowBuffer::with_capacity(n);
    candidates.reset(n);
    let (mut old_delta, link_new) = link_deltas(&graph, partition.module_of(), node, target);
    candidates.add(target, link_new.delta_exit, link_new.delta_enter);
    objective.add_memory_contributions(node as u32, &mut old_delta, &mut candidates);
    let new_delta = candidates.get(target).unwrap();

    let before = objective.codelength();
    let predicted = objective.delta_on_move(
        node as u32,
        &node_data[node],
        &old_delta,
        &new_delta,
        partition.module_flow(),
    );
    objective.update_on_move(
        node as u32,
        &node_data[node],
        &old_delta,
        &new_delta,
        partition.module_flow_mut(),
    );
    partition.apply_move(node, target);

    assert_abs_diff_eq!(before + predicted, objective.codelength(), epsilon = 1e-12);

    // From-scratch evaluation of the same partition agrees.
    let modules = module_flow_data(&graph, partition.module_of(), n as u32, true);
    let mut fresh = MemoryMapEquation::new(&graph);
    fresh.init_partition(&modules, &partition.alive_modules(), partition.module_of());
    assert_abs_diff_eq!(objective.codelength(), fresh.codelength(), epsilon = 1e-10);
}

#[test]
fn grouping_states_of_one_physical_node_is_rewarded() {
    let graph = state_network_graph();
    let node_data = graph.node_flow_data();

    // Partition A: states of the same physical node share a module.
    // Partition B: physical nodes split across modules.
    let grouped = vec![0u32, 0, 1, 1];
    let split = vec![0u32, 1, 0, 1];

    let codelength = |assignment: &[u32]| -> f64 {
        let modules = module_flow_data(&graph, assignment, 2, true);
        let mut objective = MemoryMapEquation::new(&graph);
        objective.init_partition(&modules, &[0, 1], assignment);
        objective.codelength()
    };

    assert!(
        codelength(&grouped) < codelength(&split),
        "memory coding should prefer keeping a physical node's states together"
    );
}
