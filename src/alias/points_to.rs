//! Flow-insensitive, context-insensitive points-to analysis.
//!
//! One walk of the graph applies the transfer rules below; walks repeat until no
//! fact grows. Both the register map and the edge set only grow and the location
//! set is finite, so the analysis is monotone and terminates.
//!
//! | operation | effect |
//! |---|---|
//! | `alloca`, `malloc`, δ, λ | result points to a fresh location |
//! | `load p` | result may point to anything a target of `p` contains |
//! | `store p, v` | every target of `p` may contain what `v` points to |
//! | `gep`, `bitcast` | pass-through |
//! | `call f` | per-callee unification of arguments and results |
//! | call through external | arguments escape, results point to external |
//! | import, export | the symbol's location joins external memory |
//!
//! Structural nodes are transparent: routing variables forward facts between
//! their outer and inner ports.

use crate::alias::ptg::{LocationId, MemoryLocation, PointsToGraph};
use crate::pass::RvsdgModule;
use crate::rvsdg::graph::Graph;
use crate::rvsdg::lambda::LambdaNode;
use crate::rvsdg::node::{NodeId, NodeKind, Origin};
use crate::rvsdg::operation::{AggregateOp, CastOp, MemoryOp, MiscOp, Operation};
use crate::types::Type;
use crate::Result;

/// The analysis entry point.
#[derive(Debug, Default)]
pub struct PointsToAnalysis;

fn pointerish(ty: &Type) -> bool {
    ty.is_pointer() || matches!(ty, Type::Function(_))
}

impl PointsToAnalysis {
    /// Computes the points-to graph of a module.
    ///
    /// # Errors
    ///
    /// Currently infallible in practice; the `Result` is part of the pass
    /// contract.
    pub fn run(module: &RvsdgModule) -> Result<PointsToGraph> {
        let graph = module.graph();
        let mut ptg = PointsToGraph::new();

        // Allocation sites, functions, globals, imports.
        for region in graph.regions_pre_order() {
            for &node in graph.region(region).nodes() {
                match graph.node(node).kind() {
                    NodeKind::Simple(Operation::Memory(MemoryOp::Alloca { .. })) => {
                        ptg.add_location(MemoryLocation::Alloca(node));
                    }
                    NodeKind::Simple(Operation::Memory(MemoryOp::Malloc)) => {
                        ptg.add_location(MemoryLocation::Malloc(node));
                    }
                    NodeKind::Lambda(_) => {
                        ptg.add_location(MemoryLocation::Function(node));
                    }
                    NodeKind::Delta(_) => {
                        ptg.add_location(MemoryLocation::Global(node));
                    }
                    _ => {}
                }
            }
        }
        let root = graph.root();
        for index in 0..graph.region(root).narguments() {
            let id = ptg.add_location(MemoryLocation::Import(index));
            ptg.mark_escaped(id);
            let origin = Origin::Argument(root, index);
            if pointerish(graph.region(root).arguments()[index].ty()) {
                ptg.add_points_to(origin, [id]);
            }
        }

        let mut iterations = 0;
        while visit(graph, &mut ptg) {
            iterations += 1;
        }
        ptg.set_iterations(iterations);
        log::debug!(
            "points-to analysis of '{}' converged after {iterations} iterations over {} locations",
            module.name,
            ptg.nlocations()
        );
        Ok(ptg)
    }
}

/// One monotone walk over every region; returns `true` if any fact grew.
fn visit(graph: &Graph, ptg: &mut PointsToGraph) -> bool {
    let mut changed = false;
    for region in graph.regions_pre_order() {
        for node in graph.topological_order(region) {
            changed |= visit_node(graph, ptg, node);
        }
    }

    // Exported definitions escape; exported functions may be called from
    // anywhere, so their pointer parameters point to external memory.
    let root = graph.root();
    for index in 0..graph.region(root).nresults() {
        let origin = graph.result_origin(root, index);
        for id in ptg.points_to(origin) {
            changed |= ptg.mark_escaped(id);
            if let MemoryLocation::Function(lambda_node) = ptg.location(id) {
                if let Some(lambda) = LambdaNode::from_node(graph, lambda_node) {
                    let external = ptg.external();
                    let unknown = ptg.unknown();
                    for p in 0..lambda.nparameters(graph) {
                        let argument = lambda.argument(graph, p);
                        if pointerish(graph.origin_type(argument)) {
                            changed |= ptg.add_points_to(argument, [external, unknown]);
                        }
                    }
                }
            }
        }
    }

    // Escape is transitive through may-contain edges.
    loop {
        let mut grew = false;
        let escaped: Vec<LocationId> = ptg.escaped().iter().copied().collect();
        for id in escaped {
            let targets: Vec<LocationId> = ptg.targets(id).iter().copied().collect();
            for target in targets {
                grew |= ptg.mark_escaped(target);
            }
        }
        if !grew {
            break;
        }
        changed = true;
    }
    changed
}

fn visit_node(graph: &Graph, ptg: &mut PointsToGraph, node: NodeId) -> bool {
    match graph.node(node).kind() {
        NodeKind::Simple(op) => visit_simple(graph, ptg, node, &op.clone()),
        NodeKind::Gamma => {
            let mut changed = false;
            let subregions = graph.node(node).subregions().to_vec();
            let nentry = graph.node(node).ninputs() - 1;
            for entry in 0..nentry {
                let outer = ptg.points_to(graph.input_origin(node, entry + 1));
                for &sub in &subregions {
                    changed |= ptg.add_points_to(
                        Origin::Argument(sub, entry),
                        outer.iter().copied(),
                    );
                }
            }
            for output in 0..graph.node(node).noutputs() {
                for &sub in &subregions {
                    let inner = ptg.points_to(graph.result_origin(sub, output));
                    changed |= ptg.add_points_to(Origin::Output(node, output), inner);
                }
            }
            changed
        }
        NodeKind::Theta => {
            let mut changed = false;
            let sub = graph.node(node).subregions()[0];
            for index in 0..graph.node(node).ninputs() {
                let mut incoming = ptg.points_to(graph.input_origin(node, index));
                incoming.extend(ptg.points_to(graph.result_origin(sub, index + 1)));
                changed |=
                    ptg.add_points_to(Origin::Argument(sub, index), incoming.iter().copied());
                changed |= ptg.add_points_to(Origin::Output(node, index), incoming);
            }
            changed
        }
        NodeKind::Lambda(_) => {
            let mut changed = false;
            if let Some(id) = ptg.find(MemoryLocation::Function(node)) {
                if graph.node(node).noutputs() > 0 {
                    changed |= ptg.add_points_to(Origin::Output(node, 0), [id]);
                }
            }
            changed |= route_context_vars(graph, ptg, node);
            changed
        }
        NodeKind::Delta(_) => {
            let mut changed = false;
            if let Some(id) = ptg.find(MemoryLocation::Global(node)) {
                if graph.node(node).noutputs() > 0 {
                    changed |= ptg.add_points_to(Origin::Output(node, 0), [id]);
                }
                let sub = graph.node(node).subregions()[0];
                if graph.region(sub).nresults() > 0 {
                    let initializer = graph.result_origin(sub, 0);
                    if pointerish(graph.origin_type(initializer)) {
                        for target in ptg.points_to(initializer) {
                            changed |= ptg.add_edge(id, target);
                        }
                    }
                }
            }
            changed |= route_context_vars(graph, ptg, node);
            changed
        }
        NodeKind::Phi => {
            let mut changed = false;
            let sub = graph.node(node).subregions()[0];
            for output in 0..graph.node(node).noutputs() {
                let definition = ptg.points_to(graph.result_origin(sub, output));
                changed |= ptg.add_points_to(
                    Origin::Argument(sub, output),
                    definition.iter().copied(),
                );
                changed |= ptg.add_points_to(Origin::Output(node, output), definition);
            }
            changed |= route_context_vars(graph, ptg, node);
            changed
        }
    }
}

/// Forwards facts from a structural node's inputs to the context arguments they
/// are routed to.
fn route_context_vars(graph: &Graph, ptg: &mut PointsToGraph, node: NodeId) -> bool {
    let mut changed = false;
    for &sub in graph.node(node).subregions() {
        for index in 0..graph.region(sub).narguments() {
            let Some(input) = graph.region(sub).arguments()[index].input() else {
                continue;
            };
            let outer = ptg.points_to(graph.input_origin(node, input));
            changed |= ptg.add_points_to(Origin::Argument(sub, index), outer);
        }
    }
    changed
}

fn visit_simple(graph: &Graph, ptg: &mut PointsToGraph, node: NodeId, op: &Operation) -> bool {
    let mut changed = false;
    match op {
        Operation::Memory(MemoryOp::Alloca { .. }) => {
            if let Some(id) = ptg.find(MemoryLocation::Alloca(node)) {
                changed |= ptg.add_points_to(Origin::Output(node, 0), [id]);
            }
        }
        Operation::Memory(MemoryOp::Malloc) => {
            if let Some(id) = ptg.find(MemoryLocation::Malloc(node)) {
                changed |= ptg.add_points_to(Origin::Output(node, 0), [id]);
            }
        }
        Operation::Memory(MemoryOp::Load { loaded, .. }) => {
            if pointerish(loaded) {
                let address = ptg.points_to(graph.input_origin(node, 0));
                let result = Origin::Output(node, 0);
                let mut reaches_external = false;
                for id in &address {
                    reaches_external |= ptg.is_escaped(*id) || *id == ptg.unknown();
                    let targets: Vec<LocationId> = ptg.targets(*id).iter().copied().collect();
                    changed |= ptg.add_points_to(result, targets);
                }
                if reaches_external {
                    let external = ptg.external();
                    let unknown = ptg.unknown();
                    changed |= ptg.add_points_to(result, [external, unknown]);
                }
            }
        }
        Operation::Memory(MemoryOp::Store { stored, .. }) => {
            if pointerish(stored) {
                let address = ptg.points_to(graph.input_origin(node, 0));
                let value = ptg.points_to(graph.input_origin(node, 1));
                for id in &address {
                    for target in &value {
                        changed |= ptg.add_edge(*id, *target);
                    }
                    if ptg.is_escaped(*id) {
                        for target in &value {
                            changed |= ptg.mark_escaped(*target);
                        }
                    }
                }
            }
        }
        Operation::Aggregate(AggregateOp::GetElementPtr { .. }) => {
            let base = ptg.points_to(graph.input_origin(node, 0));
            changed |= ptg.add_points_to(Origin::Output(node, 0), base);
        }
        Operation::Cast(CastOp::Bitcast { from, to }) => {
            if pointerish(from) && pointerish(to) {
                let base = ptg.points_to(graph.input_origin(node, 0));
                changed |= ptg.add_points_to(Origin::Output(node, 0), base);
            }
        }
        Operation::Misc(MiscOp::Undef { ty }) => {
            if pointerish(ty) {
                let unknown = ptg.unknown();
                changed |= ptg.add_points_to(Origin::Output(node, 0), [unknown]);
            }
        }
        Operation::Call { ty } => {
            let callees = ptg.points_to(graph.input_origin(node, 0));
            for callee in callees {
                match ptg.location(callee) {
                    MemoryLocation::Function(lambda_node) => {
                        let Some(lambda) = LambdaNode::from_node(graph, lambda_node) else {
                            continue;
                        };
                        let body = lambda.subregion(graph);
                        for (index, param) in ty.parameters().iter().enumerate() {
                            if pointerish(param) {
                                let fact = ptg.points_to(graph.input_origin(node, index + 1));
                                changed |=
                                    ptg.add_points_to(lambda.argument(graph, index), fact);
                            }
                        }
                        for (index, result) in ty.results().iter().enumerate() {
                            if pointerish(result) && index < graph.region(body).nresults() {
                                let fact = ptg.points_to(graph.result_origin(body, index));
                                changed |= ptg.add_points_to(Origin::Output(node, index), fact);
                            }
                        }
                    }
                    _ => {
                        // A call into external code: arguments escape, pointer
                        // results may point anywhere.
                        for (index, param) in ty.parameters().iter().enumerate() {
                            if pointerish(param) {
                                for id in ptg.points_to(graph.input_origin(node, index + 1)) {
                                    changed |= ptg.mark_escaped(id);
                                }
                            }
                        }
                        let external = ptg.external();
                        let unknown = ptg.unknown();
                        for (index, result) in ty.results().iter().enumerate() {
                            if pointerish(result) {
                                changed |= ptg.add_points_to(
                                    Origin::Output(node, index),
                                    [external, unknown],
                                );
                            }
                        }
                    }
                }
            }
        }
        _ => {}
    }
    changed
}
