use approx::assert_abs_diff_eq;
use mapflow::config::{Config, FlowModel};
use mapflow::flow::calculate_flow;
use mapflow::graph::GraphModel;
use mapflow::network::NetworkBuilder;
use mapflow::objective::{CodelengthObjective, MapEquation};
use mapflow::optimizer::{refine, run_trials};
use mapflow::partition::module_flow_data;
use std::sync::atomic::AtomicBool;

/// Two triangles joined by one weak link; the textbook two-module network.
fn two_triangles() -> GraphModel {
    let mut network = NetworkBuilder::new();
    for &(s, t) in &[(0, 1), (1, 2), (2, 0), (3, 4), (4, 5), (5, 3)] {
        network.add_link(s, t, 1.0);
    }
    network.add_link(2, 3, 0.1);
    let mut graph = GraphModel::from_source(&network).unwrap();
    calculate_flow(&mut graph, &Config::default(), None).unwrap();
    graph
}

#[test]
fn two_triangles_partition_into_two_modules() {
    let graph = two_triangles();
    let cfg = Config::default();
    let trial = run_trials(&graph, &cfg, None).unwrap();

    assert!(!trial.aborted);
    assert_eq!(trial.num_modules, 2);
    assert_eq!(trial.node_to_module.len(), 6);
    assert!(trial.node_to_module.iter().all(|&m| m < trial.num_modules));

    // The triangles stay intact.
    assert_eq!(trial.node_to_module[0], trial.node_to_module[1]);
    assert_eq!(trial.node_to_module[1], trial.node_to_module[2]);
    assert_eq!(trial.node_to_module[3], trial.node_to_module[4]);
    assert_eq!(trial.node_to_module[4], trial.node_to_module[5]);
    assert_ne!(trial.node_to_module[0], trial.node_to_module[3]);

    // Two modules must beat coding the network as one big module.
    assert!(trial.codelength < trial.one_level_codelength);

    let total_module_flow: f64 = trial.module_data.iter().map(|m| m.flow).sum();
    assert_abs_diff_eq!(total_module_flow, 1.0, epsilon = 1e-10);
}

#[test]
fn reported_codelength_matches_fresh_evaluation() {
    let graph = two_triangles();
    let trial = run_trials(&graph, &Config::default(), None).unwrap();

    let modules = module_flow_data(&graph, &trial.node_to_module, trial.num_modules, false);
    let mut objective = MapEquation::new(&graph.node_flow_data());
    let alive: Vec<u32> = (0..trial.num_modules).collect();
    objective.init_partition(&modules, &alive, &trial.node_to_module);

    assert_abs_diff_eq!(trial.codelength, objective.codelength(), epsilon = 1e-12);
    assert_abs_diff_eq!(
        trial.codelength,
        trial.index_codelength + trial.module_codelength,
        epsilon = 1e-12
    );
}

#[test]
fn search_is_deterministic_for_a_fixed_seed() {
    let graph = two_triangles();
    let cfg = Config {
        seed: 42,
        ..Config::default()
    };

    let a = run_trials(&graph, &cfg, None).unwrap();
    let b = run_trials(&graph, &cfg, None).unwrap();

    assert_eq!(a.codelength.to_bits(), b.codelength.to_bits());
    assert_eq!(a.node_to_module, b.node_to_module);
}

#[test]
fn parallel_trials_are_deterministic() {
    let graph = two_triangles();
    let cfg = Config {
        num_trials: 4,
        trial_threads: Some(2),
        ..Config::default()
    };

    let a = run_trials(&graph, &cfg, None).unwrap();
    let b = run_trials(&graph, &cfg, None).unwrap();

    assert_eq!(a.codelength.to_bits(), b.codelength.to_bits());
    assert_eq!(a.node_to_module, b.node_to_module);
}

#[test]
fn refining_a_converged_partition_changes_nothing() {
    let graph = two_triangles();
    let cfg = Config {
        num_trials: 3,
        ..Config::default()
    };

    let first = run_trials(&graph, &cfg, None).unwrap();
    let second = refine(&graph, &cfg, &first.node_to_module, None).unwrap();

    // Re-optimizing from the optimum must not move the codelength.
    assert_abs_diff_eq!(second.codelength, first.codelength, epsilon = 1e-9);
    assert_eq!(second.num_modules, first.num_modules);
}

#[test]
fn refine_improves_a_deliberately_bad_partition() {
    let graph = two_triangles();
    let cfg = Config::default();

    // Interleave the triangles across two modules.
    let bad = vec![0u32, 1, 0, 1, 0, 1];
    let modules = module_flow_data(&graph, &bad, 2, false);
    let mut objective = MapEquation::new(&graph.node_flow_data());
    objective.init_partition(&modules, &[0, 1], &bad);
    let bad_codelength = objective.codelength();

    let refined = refine(&graph, &cfg, &bad, None).unwrap();
    assert!(refined.codelength < bad_codelength);
    assert_eq!(refined.num_modules, 2);
}

#[test]
fn aborted_search_returns_partial_result() {
    let graph = two_triangles();
    let abort = AtomicBool::new(true);
    let trial = run_trials(&graph, &Config::default(), Some(&abort)).unwrap();

    assert!(trial.aborted);
    assert_eq!(trial.node_to_module.len(), graph.node_count());
}

#[test]
fn directed_cycle_collapses_to_one_module() {
    let mut network = NetworkBuilder::new();
    for &(s, t) in &[(0, 1), (1, 2), (2, 3), (3, 0)] {
        network.add_link(s, t, 1.0);
    }
    let mut graph = GraphModel::from_source(&network).unwrap();
    let cfg = Config {
        flow_model: FlowModel::Directed,
        ..Config::default()
    };
    calculate_flow(&mut graph, &cfg, None).unwrap();
    let trial = run_trials(&graph, &cfg, None).unwrap();

    // A uniform cycle has no module structure worth paying an index for.
    assert_eq!(trial.num_modules, 1);
    assert_abs_diff_eq!(trial.codelength, trial.one_level_codelength, epsilon = 1e-9);
}

#[test]
fn memory_network_groups_states_of_shared_physical_nodes() {
    let mut network = NetworkBuilder::new();
    network.add_node(1, Some("a".to_string()), 1.0);
    network.add_node(2, Some("b".to_string()), 1.0);
    network.add_state(10, 1, None);
    network.add_state(11, 1, None);
    network.add_state(20, 2, None);
    network.add_state(21, 2, None);
    network.add_link(10, 11, 1.0);
    network.add_link(11, 10, 1.0);
    network.add_link(20, 21, 1.0);
    network.add_link(21, 20, 1.0);
    network.add_link(11, 20, 0.2);
    network.add_link(21, 10, 0.2);

    let mut graph = GraphModel::from_source(&network).unwrap();
    let cfg = Config {
        flow_model: FlowModel::Rawdir,
        ..Config::default()
    };
    calculate_flow(&mut graph, &cfg, None).unwrap();
    let trial = run_trials(&graph, &cfg, None).unwrap();

    assert!(!trial.aborted);
    assert_eq!(trial.num_modules, 2);
    assert_eq!(trial.node_to_module[0], trial.node_to_module[1]);
    assert_eq!(trial.node_to_module[2], trial.node_to_module[3]);
    assert_ne!(trial.node_to_module[0], trial.node_to_module[2]);
}

#[test]
fn empty_graph_yields_empty_result() {
    let network = NetworkBuilder::new();
    let graph = GraphModel::from_source(&network).unwrap();
    let trial = run_trials(&graph, &Config::default(), None).unwrap();
    assert_eq!(trial.num_modules, 0);
    assert_eq!(trial.codelength, 0.0);
}
