//! Stable textual dumps of a graph.
//!
//! [`view`] emits a deterministic, human-readable listing of nodes and edges:
//! region arguments as `a<i>`, node outputs as `o<i>` in topological order, one
//! line per node, subregions indented. Two graphs produce equal output iff they
//! are structurally equivalent, which makes the dump usable for golden
//! assertions in tests. The output is not a load format.

use std::fmt::Write as _;

use rustc_hash::FxHashMap;

use crate::rvsdg::graph::Graph;
use crate::rvsdg::node::{NodeKind, Origin, RegionId};

/// Renders the whole graph, starting at the root region.
#[must_use]
pub fn view(graph: &Graph) -> String {
    let mut out = String::new();
    view_region(graph, graph.root(), 0, &mut out);
    out
}

/// Renders a single region subtree.
#[must_use]
pub fn view_region_at(graph: &Graph, region: RegionId) -> String {
    let mut out = String::new();
    view_region(graph, region, 0, &mut out);
    out
}

fn view_region(graph: &Graph, region: RegionId, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    let mut names: FxHashMap<Origin, String> = FxHashMap::default();
    let is_root = region == graph.root();

    for (index, argument) in graph.region(region).arguments().iter().enumerate() {
        let name = format!("a{index}");
        names.insert(Origin::Argument(region, index), name.clone());
        if is_root {
            let import = graph
                .imports()
                .get(index)
                .map(String::as_str)
                .unwrap_or("");
            let _ = writeln!(out, "{pad}{name} : {} import \"{import}\"", argument.ty());
        } else {
            let _ = writeln!(out, "{pad}{name} : {}", argument.ty());
        }
    }

    let mut counter = 0usize;
    for node in graph.topological_order(region) {
        let mut outs = Vec::new();
        for index in 0..graph.node(node).noutputs() {
            let name = format!("o{counter}");
            counter += 1;
            names.insert(Origin::Output(node, index), name.clone());
            let ty = graph.node(node).outputs()[index].ty();
            outs.push(format!("{name} : {ty}"));
        }
        let label = match graph.node(node).kind() {
            NodeKind::Simple(op) => op.debug_string(),
            NodeKind::Gamma => "gamma".to_string(),
            NodeKind::Theta => "theta".to_string(),
            NodeKind::Lambda(sig) => format!("lambda {} : {}", sig.name, sig.ty),
            NodeKind::Delta(sig) => format!("delta {} : {}", sig.name, sig.value_type),
            NodeKind::Phi => "phi".to_string(),
        };
        let operands: Vec<String> = graph
            .node(node)
            .inputs()
            .iter()
            .map(|input| {
                names
                    .get(&input.origin())
                    .cloned()
                    .unwrap_or_else(|| "?".to_string())
            })
            .collect();

        let lhs = if outs.is_empty() {
            String::new()
        } else {
            format!("{} := ", outs.join(", "))
        };
        let rhs = if operands.is_empty() {
            label
        } else {
            format!("{label} {}", operands.join(", "))
        };

        if graph.node(node).is_structural() {
            let _ = writeln!(out, "{pad}{lhs}{rhs} {{");
            for (index, &sub) in graph.node(node).subregions().iter().enumerate() {
                let _ = writeln!(out, "{pad}  region {index}:");
                view_region(graph, sub, indent + 2, out);
            }
            let _ = writeln!(out, "{pad}}}");
        } else {
            let _ = writeln!(out, "{pad}{lhs}{rhs}");
        }
    }

    let results: Vec<String> = graph
        .region(region)
        .results()
        .iter()
        .enumerate()
        .map(|(index, result)| {
            let name = names
                .get(&result.origin())
                .cloned()
                .unwrap_or_else(|| "?".to_string());
            if is_root {
                let export = graph
                    .exports()
                    .get(index)
                    .map(String::as_str)
                    .unwrap_or("");
                format!("{name} export \"{export}\"")
            } else {
                name
            }
        })
        .collect();
    if !results.is_empty() {
        let _ = writeln!(out, "{pad}-> {}", results.join(", "));
    }
}
