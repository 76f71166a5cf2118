//! Clustering result writers: `.tree` (flow-ordered module paths) and
//! `.clu` (node-to-module table).

use crate::config::Config;
use crate::graph::GraphModel;
use crate::optimizer::TrialResult;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Formats with `sig` significant digits, trailing zeros trimmed, matching
/// the compact style of the result files.
fn fmt_sig(value: f64, sig: usize) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }

    let digits_before = value.abs().log10().floor() as i32 + 1;
    let decimals = (sig as i32 - digits_before).max(0) as usize;

    let mut s = format!("{:.*}", decimals, value);
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    if s == "-0" {
        s = "0".to_string();
    }
    s
}

/// Modules reordered by descending flow, members by descending flow
/// within each module.
#[derive(Debug)]
struct OrderedModules {
    module_nodes: Vec<Vec<usize>>,
}

fn build_ordered_modules(graph: &GraphModel, trial: &TrialResult) -> OrderedModules {
    let k = trial.num_modules as usize;
    let mut modules: Vec<u32> = (0..trial.num_modules).collect();
    modules.sort_unstable_by(|&a, &b| {
        let fa = trial.module_data[a as usize].flow;
        let fb = trial.module_data[b as usize].flow;
        fb.partial_cmp(&fa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut old_to_new = vec![0u32; k];
    for (new_idx, &old_idx) in modules.iter().enumerate() {
        old_to_new[old_idx as usize] = new_idx as u32;
    }

    let mut module_nodes: Vec<Vec<usize>> = vec![Vec::new(); k];
    for (node, &old_m) in trial.node_to_module.iter().enumerate() {
        module_nodes[old_to_new[old_m as usize] as usize].push(node);
    }

    for nodes in &mut module_nodes {
        nodes.sort_unstable_by(|&a, &b| {
            let fa = graph.nodes[a].data.flow;
            let fb = graph.nodes[b].data.flow;
            fb.partial_cmp(&fa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(graph.nodes[a].id.cmp(&graph.nodes[b].id))
        });
    }

    OrderedModules { module_nodes }
}

fn write_header(
    w: &mut BufWriter<File>,
    cfg: &Config,
    trial: &TrialResult,
) -> io::Result<()> {
    let savings = if trial.one_level_codelength.abs() < 1e-16 {
        0.0
    } else {
        (1.0 - trial.codelength / trial.one_level_codelength) * 100.0
    };

    writeln!(w, "# partitioned into {} top modules", trial.num_modules)?;
    writeln!(w, "# codelength {} bits", fmt_sig(trial.codelength, 6))?;
    writeln!(w, "# relative codelength savings {}%", fmt_sig(savings, 6))?;
    writeln!(w, "# flow model {}", cfg.flow_model.name())?;
    Ok(())
}

fn write_tree_file(
    path: &Path,
    cfg: &Config,
    graph: &GraphModel,
    trial: &TrialResult,
    ordered: &OrderedModules,
) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);

    write_header(&mut w, cfg, trial)?;
    writeln!(w, "# path flow name node_id")?;

    for (module_zero, nodes) in ordered.module_nodes.iter().enumerate() {
        for (pos, &node) in nodes.iter().enumerate() {
            writeln!(
                w,
                "{}:{} {} \"{}\" {}",
                module_zero + 1,
                pos + 1,
                fmt_sig(graph.nodes[node].data.flow, 6),
                graph.node_name_or_id(node),
                graph.nodes[node].id
            )?;
        }
    }

    w.flush()
}

fn write_clu_file(
    path: &Path,
    cfg: &Config,
    graph: &GraphModel,
    trial: &TrialResult,
    ordered: &OrderedModules,
) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);

    write_header(&mut w, cfg, trial)?;
    writeln!(w, "# node_id module flow")?;

    for (module_zero, nodes) in ordered.module_nodes.iter().enumerate() {
        for &node in nodes {
            writeln!(
                w,
                "{} {} {}",
                graph.nodes[node].id,
                module_zero + 1,
                fmt_sig(graph.nodes[node].data.flow, 6)
            )?;
        }
    }

    w.flush()
}

#[derive(Debug, Clone, Copy)]
pub struct OutputSelection {
    pub tree: bool,
    pub clu: bool,
}

pub fn write_outputs(
    cfg: &Config,
    selection: OutputSelection,
    out_dir: &Path,
    out_name: &str,
    graph: &GraphModel,
    trial: &TrialResult,
) -> io::Result<Vec<PathBuf>> {
    if !selection.tree && !selection.clu {
        return Ok(Vec::new());
    }

    fs::create_dir_all(out_dir)?;
    let ordered = build_ordered_modules(graph, trial);
    let base = out_dir.join(out_name);
    let mut written = Vec::new();

    if selection.tree {
        let path = base.with_extension("tree");
        write_tree_file(&path, cfg, graph, trial, &ordered)?;
        written.push(path);
    }
    if selection.clu {
        let path = base.with_extension("clu");
        write_clu_file(&path, cfg, graph, trial, &ordered)?;
        written.push(path);
    }

    Ok(written)
}
