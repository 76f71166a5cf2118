use clap::Parser;
use mapflow::cli::Cli;
use mapflow::config::{Config, FlowModel};
use mapflow::flow::calculate_flow;
use mapflow::graph::GraphModel;
use mapflow::network::NetworkSource;
use mapflow::optimizer::run_trials;
use mapflow::output::{write_outputs, OutputSelection};
use mapflow::parser::{parse_network_file, ParseError};
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

fn write_net(lines: &[&str]) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("g.net");
    let mut f = File::create(&path).unwrap();
    for line in lines {
        writeln!(f, "{line}").unwrap();
    }
    (dir, path)
}

#[test]
fn parses_vertices_and_aggregates_duplicate_links() {
    let (_dir, path) = write_net(&[
        "# a comment",
        "*Vertices 2",
        "1 \"A\" 1",
        "2 \"B\" 2.5",
        "*Links",
        "1 2 2.5",
        "1 2 0.5",
    ]);

    let network = parse_network_file(&path).unwrap();
    assert_eq!(network.num_nodes(), 2);
    assert_eq!(network.num_links(), 1);
    assert!((network.sum_link_weight() - 3.0).abs() < 1e-12);

    let graph = GraphModel::from_source(&network).unwrap();
    assert_eq!(graph.node_name_or_id(0), "A");
    assert!((graph.nodes[1].input_weight - 2.5).abs() < 1e-12);
}

#[test]
fn link_lines_default_to_unit_weight_and_create_nodes() {
    let (_dir, path) = write_net(&["*Edges", "1 2", "2 3 2.0", "3 1"]);

    let network = parse_network_file(&path).unwrap();
    assert_eq!(network.num_nodes(), 3);
    assert!((network.sum_link_weight() - 4.0).abs() < 1e-12);
}

#[test]
fn skips_unknown_sections_and_blank_lines() {
    let (_dir, path) = write_net(&[
        "*Vertices",
        "1 \"A\"",
        "2 \"B\"",
        "",
        "*Garbage",
        "this is ignored",
        "*Arcs",
        "1 2 1.0",
    ]);

    let network = parse_network_file(&path).unwrap();
    assert_eq!(network.num_nodes(), 2);
    assert_eq!(network.num_links(), 1);
}

#[test]
fn non_positive_link_weights_are_dropped() {
    let (_dir, path) = write_net(&["*Links", "1 2 0", "1 2 -3", "2 3 1.0"]);

    let network = parse_network_file(&path).unwrap();
    assert_eq!(network.num_links(), 1);
    assert_eq!(network.num_nodes(), 2);
}

#[test]
fn state_sections_build_memory_networks() {
    let (_dir, path) = write_net(&[
        "*Vertices",
        "1 \"alpha\"",
        "2 \"beta\"",
        "*States",
        "# state_id physical_id",
        "10 1",
        "11 1 \"alpha-return\"",
        "20 2",
        "*Links",
        "10 11 1.0",
        "11 20 0.5",
        "20 10 0.5",
    ]);

    let network = parse_network_file(&path).unwrap();
    assert!(network.is_memory_network());
    assert_eq!(network.num_nodes(), 3);

    let graph = GraphModel::from_source(&network).unwrap();
    assert!(graph.has_state_nodes());
    assert_eq!(graph.physical_count(), 2);
    assert_eq!(graph.nodes[0].physical, graph.nodes[1].physical);
    // Inherited and explicit state names.
    assert_eq!(graph.nodes[0].name.as_deref(), Some("alpha"));
    assert_eq!(graph.nodes[1].name.as_deref(), Some("alpha-return"));
}

#[test]
fn malformed_lines_and_empty_files_are_errors() {
    let (_dir, path) = write_net(&["*Links", "1 two 1.0"]);
    assert!(matches!(
        parse_network_file(&path),
        Err(ParseError::BadLine { .. })
    ));

    let (_dir2, path2) = write_net(&["# nothing but comments"]);
    assert!(matches!(parse_network_file(&path2), Err(ParseError::Empty)));

    let (_dir3, path3) = write_net(&["*Vertices", "1 \"A\" -2.0"]);
    assert!(matches!(
        parse_network_file(&path3),
        Err(ParseError::NegativeWeight { .. })
    ));
}

#[test]
fn writes_tree_and_clu_files() {
    let (_dir, path) = write_net(&[
        "*Vertices",
        "1 \"A\"",
        "2 \"B\"",
        "3 \"C\"",
        "4 \"D\"",
        "*Links",
        "1 2 1.0",
        "2 1 1.0",
        "3 4 1.0",
        "4 3 1.0",
        "2 3 0.1",
    ]);

    let network = parse_network_file(&path).unwrap();
    let mut graph = GraphModel::from_source(&network).unwrap();
    let cfg = Config::default();
    calculate_flow(&mut graph, &cfg, None).unwrap();
    let trial = run_trials(&graph, &cfg, None).unwrap();

    let out_dir = tempfile::tempdir().unwrap();
    let written = write_outputs(
        &cfg,
        OutputSelection { tree: true, clu: true },
        out_dir.path(),
        "g",
        &graph,
        &trial,
    )
    .unwrap();

    assert_eq!(written.len(), 2);

    let tree = fs::read_to_string(out_dir.path().join("g.tree")).unwrap();
    assert!(tree.starts_with("# partitioned into"));
    assert_eq!(
        tree.lines().filter(|l| !l.starts_with('#')).count(),
        graph.node_count()
    );
    // Every node id appears with a module:rank path.
    for id in 1..=4 {
        assert!(tree.lines().any(|l| l.ends_with(&format!(" {id}"))));
    }

    let clu = fs::read_to_string(out_dir.path().join("g.clu")).unwrap();
    assert_eq!(
        clu.lines().filter(|l| !l.starts_with('#')).count(),
        graph.node_count()
    );
}

#[test]
fn cli_maps_flags_onto_config() {
    let cli = Cli::try_parse_from([
        "mapflow",
        "net.net",
        "out",
        "--directed",
        "--seed",
        "7",
        "--num-trials",
        "3",
        "--unrecorded-teleportation",
        "--to-nodes",
    ])
    .unwrap();

    let cfg = cli.to_config().unwrap();
    assert_eq!(cfg.flow_model, FlowModel::Directed);
    assert_eq!(cfg.seed, 7);
    assert_eq!(cfg.num_trials, 3);
    assert!(!cfg.recorded_teleportation);
    assert!(cfg.teleport_to_nodes);

    let selection = cli.output_selection();
    assert!(selection.tree);
    assert!(!selection.clu);
    assert_eq!(cli.resolved_out_name(), "net");
}

#[test]
fn cli_rejects_invalid_teleportation_probability() {
    let cli = Cli::try_parse_from([
        "mapflow",
        "net.net",
        "out",
        "--teleportation-probability",
        "1.5",
    ])
    .unwrap();
    assert!(cli.to_config().is_err());
}
