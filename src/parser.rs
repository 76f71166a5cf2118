//! Pajek-style network file parser.
//!
//! Recognized sections: `*Vertices`, `*Edges` / `*Arcs` / `*Links`, and
//! `*States` for memory networks. Lines starting with `#` and blank lines
//! are skipped; unknown `*` sections are ignored wholesale. Links default
//! to weight 1, duplicate links are summed, and non-positive weights are
//! dropped.

use crate::network::NetworkBuilder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("error opening file '{path}': {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("error reading file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("can't parse {what} from line '{line}'")]
    BadLine { what: &'static str, line: String },
    #[error("negative node weight ({weight}) from line '{line}'")]
    NegativeWeight { weight: f64, line: String },
    #[error("network is empty")]
    Empty,
}

fn bad_line(what: &'static str, line: &str) -> ParseError {
    ParseError::BadLine {
        what,
        line: line.to_string(),
    }
}

enum Section {
    Links,
    Vertices,
    States,
    Ignore,
}

fn first_word_lower(line: &str) -> String {
    line.split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn parse_link_line(line: &str) -> Result<(u32, u32, f64), ParseError> {
    let mut parts = line.split_whitespace();
    let source = parts
        .next()
        .and_then(|tok| tok.parse::<u32>().ok())
        .ok_or_else(|| bad_line("link data", line))?;
    let target = parts
        .next()
        .and_then(|tok| tok.parse::<u32>().ok())
        .ok_or_else(|| bad_line("link data", line))?;
    let weight = match parts.next() {
        Some(tok) => tok
            .parse::<f64>()
            .map_err(|_| bad_line("link weight", line))?,
        None => 1.0,
    };
    Ok((source, target, weight))
}

/// `state_id physical_id ["name"]`.
fn parse_state_line(line: &str) -> Result<(u32, u32, Option<String>), ParseError> {
    let mut parts = line.split_whitespace();
    let state_id = parts
        .next()
        .and_then(|tok| tok.parse::<u32>().ok())
        .ok_or_else(|| bad_line("state id", line))?;
    let physical_id = parts
        .next()
        .and_then(|tok| tok.parse::<u32>().ok())
        .ok_or_else(|| bad_line("physical id", line))?;
    let name = quoted_name(line);
    Ok((state_id, physical_id, name))
}

fn quoted_name(line: &str) -> Option<String> {
    let start = line.find('"')?;
    let end = line.rfind('"')?;
    (start < end).then(|| line[start + 1..end].to_string())
}

/// `id ["name"] [weight]`, with the name optionally unquoted.
fn parse_vertex_line(line: &str) -> Result<(u32, Option<String>, f64), ParseError> {
    let mut parts = line.split_whitespace();
    let id = parts
        .next()
        .and_then(|tok| tok.parse::<u32>().ok())
        .ok_or_else(|| bad_line("node id", line))?;

    let mut name = None;
    let mut weight = 1.0;

    if let Some(quoted) = quoted_name(line) {
        name = Some(quoted);
        let rest = line[line.rfind('"').unwrap() + 1..].trim();
        if let Some(tok) = rest.split_whitespace().next() {
            weight = tok
                .parse::<f64>()
                .map_err(|_| bad_line("vertex weight", line))?;
        }
    } else {
        if let Some(tok) = parts.next() {
            name = Some(tok.to_string());
        }
        if let Some(tok) = parts.next() {
            weight = tok
                .parse::<f64>()
                .map_err(|_| bad_line("vertex weight", line))?;
        }
    }

    if weight < 0.0 {
        return Err(ParseError::NegativeWeight {
            weight,
            line: line.to_string(),
        });
    }
    Ok((id, name, weight))
}

pub fn parse_network_file(path: &Path) -> Result<NetworkBuilder, ParseError> {
    let file = File::open(path).map_err(|source| ParseError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let reader = BufReader::new(file);

    let mut network = NetworkBuilder::new();
    let mut section = Section::Links;
    let mut num_states = 0usize;

    for line_result in reader.lines() {
        let line = line_result.map_err(|source| ParseError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with('*') {
            let heading = first_word_lower(line);
            section = match heading.as_str() {
                "*vertices" => Section::Vertices,
                "*states" => Section::States,
                "*edges" | "*arcs" | "*links" => Section::Links,
                _ => Section::Ignore,
            };
            // Section headers may carry a count worth reserving for.
            if let Some(count) = line
                .split_whitespace()
                .nth(1)
                .and_then(|tok| tok.parse::<usize>().ok())
            {
                match section {
                    Section::Vertices | Section::States => network.reserve_nodes(count),
                    Section::Links => network.reserve_links(count),
                    Section::Ignore => {}
                }
            }
            continue;
        }

        match section {
            Section::Ignore => {}
            Section::Vertices => {
                let (id, name, weight) = parse_vertex_line(line)?;
                network.add_node(id, name, weight);
            }
            Section::States => {
                let (state_id, physical_id, name) = parse_state_line(line)?;
                network.add_state(state_id, physical_id, name);
                num_states += 1;
            }
            Section::Links => {
                let (source, target, weight) = parse_link_line(line)?;
                network.add_link(source, target, weight);
            }
        }
    }

    if network.is_empty() {
        return Err(ParseError::Empty);
    }

    debug!(
        nodes = network_size(&network),
        states = num_states,
        path = %path.display(),
        "parsed network"
    );
    Ok(network)
}

fn network_size(network: &NetworkBuilder) -> u32 {
    use crate::network::NetworkSource;
    network.num_nodes()
}
