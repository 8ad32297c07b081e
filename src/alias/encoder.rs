//! The memory-state encoder.
//!
//! Given a points-to graph, rewrites every memory-observing node so that it
//! threads one explicit memory state per abstract location **partition** it may
//! touch. Structural nodes grow (or reuse) state-typed routing variables for the
//! partitions their bodies touch; function entry splits the single incoming
//! memory state into per-partition states and function exit merges them back, so
//! the λ boundary keeps its single `mem` port.
//!
//! After encoding, loads and stores on disjoint partitions are independent: the
//! store normal forms of [`crate::normalize`] can reorder and eliminate across
//! them. Merges appear only where control flow joins (γ exits, θ back edges),
//! and un-encoding (merging all partitions back into one) recovers the
//! original single-state behavior.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use crate::alias::ptg::{LocationId, MemoryLocation, PointsToGraph};
use crate::alias::points_to::PointsToAnalysis;
use crate::pass::{EventKind, EventLog, RvsdgModule, RvsdgPass};
use crate::rvsdg::gamma::GammaNode;
use crate::rvsdg::graph::Graph;
use crate::rvsdg::lambda::LambdaNode;
use crate::rvsdg::node::{NodeId, NodeKind, Origin, RegionId};
use crate::rvsdg::operation::{MemoryOp, Operation};
use crate::rvsdg::simple;
use crate::rvsdg::theta::ThetaNode;
use crate::types::Type;
use crate::{Error, Result};

/// Assignment of abstract locations to state partitions.
///
/// Every partition gets exactly one state edge through the encoded graph.
#[derive(Debug, Clone)]
pub struct Partitioning {
    partition_of: Vec<usize>,
    npartitions: usize,
}

impl Partitioning {
    /// One partition per non-escaped location; everything escaped (plus the
    /// external and unknown locations) collapses into partition 0.
    #[must_use]
    pub fn per_location(ptg: &PointsToGraph) -> Self {
        let mut partition_of = vec![0usize; ptg.nlocations()];
        let mut next = 1usize;
        for id in ptg.location_ids() {
            if id == ptg.external() || id == ptg.unknown() || ptg.is_escaped(id) {
                partition_of[id.index()] = 0;
            } else {
                partition_of[id.index()] = next;
                next += 1;
            }
        }
        Self {
            partition_of,
            npartitions: next,
        }
    }

    /// A single partition covering every location (the un-encoded view).
    #[must_use]
    pub fn unified(ptg: &PointsToGraph) -> Self {
        Self {
            partition_of: vec![0; ptg.nlocations()],
            npartitions: 1,
        }
    }

    /// Returns the partition of a location.
    #[must_use]
    pub fn partition(&self, id: LocationId) -> usize {
        self.partition_of[id.index()]
    }

    /// Returns the number of partitions.
    #[must_use]
    pub fn npartitions(&self) -> usize {
        self.npartitions
    }
}

/// The encoder: one points-to graph, one partitioning, one rewrite over a module.
#[derive(Debug)]
pub struct BasicEncoder<'a> {
    ptg: &'a PointsToGraph,
    partitioning: Partitioning,
}

/// Per-region rewrite state: the current state origin of each partition, plus
/// the alias map resolving rewritten value origins back to the origins the
/// points-to graph was computed over.
#[derive(Default)]
struct EncodeContext {
    states: BTreeMap<usize, Origin>,
    alias: FxHashMap<Origin, Origin>,
}

impl<'a> BasicEncoder<'a> {
    /// Creates an encoder with per-location partitioning.
    #[must_use]
    pub fn new(ptg: &'a PointsToGraph) -> Self {
        Self {
            partitioning: Partitioning::per_location(ptg),
            ptg,
        }
    }

    /// Creates an encoder with an explicit partitioning.
    #[must_use]
    pub fn with_partitioning(ptg: &'a PointsToGraph, partitioning: Partitioning) -> Self {
        Self { ptg, partitioning }
    }

    /// Returns the points-to graph the encoder works from.
    #[must_use]
    pub fn ptg(&self) -> &PointsToGraph {
        self.ptg
    }

    /// Encodes every function of the module in place, then prunes.
    ///
    /// # Errors
    ///
    /// Surfaces wiring errors; the module must be considered stale if one
    /// occurs.
    pub fn encode(&self, module: &mut RvsdgModule) -> Result<()> {
        let graph = module.graph_mut();
        let root = graph.root();
        for node in graph.topological_order(root) {
            match graph.node(node).kind() {
                NodeKind::Lambda(_) => {
                    if let Some(lambda) = LambdaNode::from_node(graph, node) {
                        self.encode_lambda(graph, &lambda)?;
                    }
                }
                NodeKind::Phi => {
                    let subregion = graph.node(node).subregions()[0];
                    for inner in graph.topological_order(subregion) {
                        if let Some(lambda) = LambdaNode::from_node(graph, inner) {
                            self.encode_lambda(graph, &lambda)?;
                        }
                    }
                }
                _ => {}
            }
        }
        graph.prune();
        Ok(())
    }

    fn encode_lambda(&self, graph: &mut Graph, lambda: &LambdaNode) -> Result<()> {
        let body = lambda.subregion(graph);
        let touched = self.touched_partitions(graph, body);
        if touched.is_empty() {
            return Ok(());
        }

        // Partitions born inside this function (local allocation sites only)
        // do not flow in through the entry.
        let mut inside: BTreeSet<usize> = BTreeSet::new();
        for partition in &touched {
            let locations: Vec<LocationId> = self
                .ptg
                .location_ids()
                .filter(|id| self.partitioning.partition(*id) == *partition)
                .collect();
            let local = !locations.is_empty()
                && locations.iter().all(|id| match self.ptg.location(*id) {
                    MemoryLocation::Alloca(node) | MemoryLocation::Malloc(node) => {
                        region_within(graph, graph.node(node).region(), body)
                    }
                    _ => false,
                });
            if local {
                inside.insert(*partition);
            }
        }
        let entry_parts: Vec<usize> = touched.difference(&inside).copied().collect();

        let mut ctx = EncodeContext::default();
        if !entry_parts.is_empty() {
            let sig = lambda.sig(graph);
            let mem_param = sig
                .ty
                .parameters()
                .iter()
                .position(|ty| *ty == Type::MemState)
                .ok_or_else(|| {
                    Error::UnsupportedOperation(format!(
                        "function '{}' touches memory but has no memory state parameter",
                        sig.name
                    ))
                })?;
            let state_argument = lambda.argument(graph, mem_param);
            if entry_parts.len() == 1 {
                ctx.states.insert(entry_parts[0], state_argument);
            } else {
                let split = simple::create_node(
                    graph,
                    body,
                    Operation::Memory(MemoryOp::StateSplit {
                        nresults: entry_parts.len(),
                    }),
                    &[state_argument],
                )?;
                for (index, partition) in entry_parts.iter().enumerate() {
                    ctx.states.insert(*partition, Origin::Output(split, index));
                }
            }
        }

        self.encode_region(graph, body, &mut ctx)?;

        // Function exit: merge the partition states back into the single
        // memory state the signature exposes.
        let states: Vec<Origin> = ctx.states.values().copied().collect();
        if !states.is_empty() {
            let merged = if states.len() == 1 {
                states[0]
            } else {
                let merge = simple::create_node(
                    graph,
                    body,
                    Operation::Memory(MemoryOp::StateMerge {
                        noperands: states.len(),
                    }),
                    &states,
                )?;
                Origin::Output(merge, 0)
            };
            for index in 0..graph.region(body).nresults() {
                if *graph.region(body).results()[index].ty() == Type::MemState {
                    graph.redirect_result(body, index, merged)?;
                }
            }
        }
        Ok(())
    }

    /// Partitions any memory operation under `region` may touch.
    fn touched_partitions(&self, graph: &Graph, region: RegionId) -> BTreeSet<usize> {
        let mut touched = BTreeSet::new();
        self.collect_touched(graph, region, &mut touched);
        touched
    }

    fn collect_touched(&self, graph: &Graph, region: RegionId, touched: &mut BTreeSet<usize>) {
        for &node in graph.region(region).nodes() {
            match graph.node(node).kind() {
                NodeKind::Simple(op) => match op {
                    Operation::Memory(MemoryOp::Alloca { .. })
                    | Operation::Memory(MemoryOp::Malloc) => {
                        if let Some(id) = self.site_location(node) {
                            touched.insert(self.partitioning.partition(id));
                        }
                    }
                    Operation::Memory(
                        MemoryOp::Load { .. } | MemoryOp::Store { .. } | MemoryOp::Free { .. },
                    ) => {
                        let address = graph.input_origin(node, 0);
                        touched.extend(self.address_partitions(address));
                    }
                    Operation::Call { ty } => {
                        if ty.parameters().contains(&Type::MemState) {
                            touched.extend(0..self.partitioning.npartitions());
                        }
                    }
                    _ => {}
                },
                _ => {
                    for &sub in graph.node(node).subregions() {
                        self.collect_touched(graph, sub, touched);
                    }
                }
            }
        }
    }

    fn site_location(&self, node: NodeId) -> Option<LocationId> {
        self.ptg
            .find(MemoryLocation::Alloca(node))
            .or_else(|| self.ptg.find(MemoryLocation::Malloc(node)))
    }

    fn address_partitions(&self, address: Origin) -> BTreeSet<usize> {
        let targets = self.ptg.points_to(address);
        if targets.is_empty() {
            let mut set = BTreeSet::new();
            set.insert(self.partitioning.partition(self.ptg.unknown()));
            return set;
        }
        targets
            .into_iter()
            .map(|id| self.partitioning.partition(id))
            .collect()
    }

    fn resolve_address(&self, ctx: &EncodeContext, mut origin: Origin) -> Origin {
        while let Some(prior) = ctx.alias.get(&origin) {
            origin = *prior;
        }
        origin
    }

    fn state_for(&self, ctx: &EncodeContext, partition: usize) -> Result<Origin> {
        ctx.states.get(&partition).copied().ok_or_else(|| {
            unreachable_error!("no state edge for partition {partition} at this point")
        })
    }

    fn encode_region(
        &self,
        graph: &mut Graph,
        region: RegionId,
        ctx: &mut EncodeContext,
    ) -> Result<()> {
        for node in graph.topological_order(region) {
            if !graph.is_alive(node) {
                continue;
            }
            match graph.node(node).kind().clone() {
                NodeKind::Simple(op) => self.encode_simple(graph, region, node, &op, ctx)?,
                NodeKind::Gamma => self.encode_gamma(graph, node, ctx)?,
                NodeKind::Theta => self.encode_theta(graph, node, ctx)?,
                NodeKind::Lambda(_) | NodeKind::Delta(_) | NodeKind::Phi => {
                    return Err(Error::UnsupportedOperation(
                        "definition nested inside a function body".into(),
                    ))
                }
            }
        }
        Ok(())
    }

    fn encode_simple(
        &self,
        graph: &mut Graph,
        region: RegionId,
        node: NodeId,
        op: &Operation,
        ctx: &mut EncodeContext,
    ) -> Result<()> {
        match op {
            Operation::Memory(MemoryOp::Alloca { .. }) | Operation::Memory(MemoryOp::Malloc) => {
                let Some(id) = self.site_location(node) else {
                    return Ok(());
                };
                let partition = self.partitioning.partition(id);
                let seed = Origin::Output(node, 1);
                let state = match ctx.states.get(&partition) {
                    // A shared partition: the fresh state joins the incoming one.
                    Some(current) => {
                        let merge = simple::create_node(
                            graph,
                            region,
                            Operation::Memory(MemoryOp::StateMerge { noperands: 2 }),
                            &[*current, seed],
                        )?;
                        Origin::Output(merge, 0)
                    }
                    None => seed,
                };
                ctx.states.insert(partition, state);
            }
            Operation::Memory(MemoryOp::Load {
                loaded,
                nstates,
                alignment,
            }) => {
                let address = graph.input_origin(node, 0);
                let parts = self.address_partitions(self.resolve_address(ctx, address));
                let old_states: Vec<Origin> =
                    (0..*nstates).map(|i| graph.input_origin(node, 1 + i)).collect();
                let mut operands = vec![address];
                for partition in &parts {
                    operands.push(self.state_for(ctx, *partition)?);
                }
                let replacement = simple::create_node(
                    graph,
                    region,
                    Operation::Memory(MemoryOp::Load {
                        loaded: loaded.clone(),
                        nstates: parts.len(),
                        alignment: *alignment,
                    }),
                    &operands,
                )?;
                graph.divert_users(Origin::Output(node, 0), Origin::Output(replacement, 0))?;
                ctx.alias
                    .insert(Origin::Output(replacement, 0), Origin::Output(node, 0));
                for (index, partition) in parts.iter().enumerate() {
                    ctx.states
                        .insert(*partition, Origin::Output(replacement, 1 + index));
                }
                for (index, old) in old_states.iter().enumerate() {
                    graph.divert_users(Origin::Output(node, 1 + index), *old)?;
                }
            }
            Operation::Memory(MemoryOp::Store {
                stored,
                nstates,
                alignment,
            }) => {
                let address = graph.input_origin(node, 0);
                let value = graph.input_origin(node, 1);
                let parts = self.address_partitions(self.resolve_address(ctx, address));
                let old_states: Vec<Origin> =
                    (0..*nstates).map(|i| graph.input_origin(node, 2 + i)).collect();
                let mut operands = vec![address, value];
                for partition in &parts {
                    operands.push(self.state_for(ctx, *partition)?);
                }
                let replacement = simple::create_node(
                    graph,
                    region,
                    Operation::Memory(MemoryOp::Store {
                        stored: stored.clone(),
                        nstates: parts.len(),
                        alignment: *alignment,
                    }),
                    &operands,
                )?;
                for (index, partition) in parts.iter().enumerate() {
                    ctx.states
                        .insert(*partition, Origin::Output(replacement, index));
                }
                for (index, old) in old_states.iter().enumerate() {
                    graph.divert_users(Origin::Output(node, index), *old)?;
                }
            }
            Operation::Memory(MemoryOp::Free { nstates }) => {
                let pointer = graph.input_origin(node, 0);
                let parts = self.address_partitions(self.resolve_address(ctx, pointer));
                let old_states: Vec<Origin> =
                    (0..*nstates).map(|i| graph.input_origin(node, 1 + i)).collect();
                let mut operands = vec![pointer];
                for partition in &parts {
                    operands.push(self.state_for(ctx, *partition)?);
                }
                let replacement = simple::create_node(
                    graph,
                    region,
                    Operation::Memory(MemoryOp::Free {
                        nstates: parts.len(),
                    }),
                    &operands,
                )?;
                for (index, partition) in parts.iter().enumerate() {
                    ctx.states
                        .insert(*partition, Origin::Output(replacement, index));
                }
                for (index, old) in old_states.iter().enumerate() {
                    graph.divert_users(Origin::Output(node, index), *old)?;
                }
            }
            Operation::Call { ty } => {
                let Some(state_param) = ty
                    .parameters()
                    .iter()
                    .position(|param| *param == Type::MemState)
                else {
                    return Ok(());
                };
                // Calls conservatively touch every partition: collapse the
                // current states around the callee's single memory port.
                let states: Vec<Origin> = ctx.states.values().copied().collect();
                let merged = if states.len() == 1 {
                    states[0]
                } else {
                    let merge = simple::create_node(
                        graph,
                        region,
                        Operation::Memory(MemoryOp::StateMerge {
                            noperands: states.len(),
                        }),
                        &states,
                    )?;
                    Origin::Output(merge, 0)
                };
                let mut operands: Vec<Origin> = graph
                    .node(node)
                    .inputs()
                    .iter()
                    .map(|input| input.origin())
                    .collect();
                operands[state_param + 1] = merged;
                let replacement =
                    simple::create_node(graph, region, Operation::Call { ty: ty.clone() }, &operands)?;

                let state_result = ty.results().iter().position(|r| *r == Type::MemState);
                let old_state_in = graph.input_origin(node, state_param + 1);
                for index in 0..graph.node(node).noutputs() {
                    let old = Origin::Output(node, index);
                    if Some(index) == state_result {
                        graph.divert_users(old, old_state_in)?;
                    } else {
                        graph.divert_users(old, Origin::Output(replacement, index))?;
                        ctx.alias
                            .insert(Origin::Output(replacement, index), old);
                    }
                }
                if let Some(state_result) = state_result {
                    let partitions: Vec<usize> = ctx.states.keys().copied().collect();
                    let out_state = Origin::Output(replacement, state_result);
                    if partitions.len() == 1 {
                        ctx.states.insert(partitions[0], out_state);
                    } else {
                        let split = simple::create_node(
                            graph,
                            region,
                            Operation::Memory(MemoryOp::StateSplit {
                                nresults: partitions.len(),
                            }),
                            &[out_state],
                        )?;
                        for (index, partition) in partitions.iter().enumerate() {
                            ctx.states.insert(*partition, Origin::Output(split, index));
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn encode_gamma(&self, graph: &mut Graph, node: NodeId, ctx: &mut EncodeContext) -> Result<()> {
        let gamma = GammaNode::from_node(graph, node)
            .ok_or_else(|| unreachable_error!("gamma handle mismatch on {node}"))?;
        let subregions = graph.node(node).subregions().to_vec();
        let mut touched = BTreeSet::new();
        for &sub in &subregions {
            self.collect_touched(graph, sub, &mut touched);
        }
        // Partitions born inside a subregion seed themselves there; only states
        // that exist outside are routed through.
        touched.retain(|partition| ctx.states.contains_key(partition));
        if touched.is_empty() {
            return Ok(());
        }

        // Reuse the state routing variables construction already threaded.
        let existing_entries: Vec<usize> = (1..graph.node(node).ninputs())
            .filter(|&input| *graph.node(node).inputs()[input].ty() == Type::MemState)
            .map(|input| input - 1)
            .collect();
        let existing_exits: Vec<usize> = (0..graph.node(node).noutputs())
            .filter(|&output| *graph.node(node).outputs()[output].ty() == Type::MemState)
            .collect();

        let mut routed: Vec<(usize, Vec<Origin>)> = Vec::new();
        for (index, partition) in touched.iter().enumerate() {
            let state = self.state_for(ctx, *partition)?;
            let arguments = match existing_entries.get(index) {
                Some(&entry) => {
                    graph.redirect_input(node, entry + 1, state)?;
                    gamma.entry_var(graph, entry).arguments
                }
                None => gamma.add_entry_var(graph, state)?.arguments,
            };
            routed.push((*partition, arguments));
        }

        let mut finals: Vec<Vec<Origin>> = vec![Vec::new(); touched.len()];
        for (sub_index, &sub) in subregions.iter().enumerate() {
            let mut inner = EncodeContext::default();
            for (partition, arguments) in &routed {
                inner.states.insert(*partition, arguments[sub_index]);
            }
            self.encode_region(graph, sub, &mut inner)?;
            for (index, (partition, _)) in routed.iter().enumerate() {
                finals[index].push(self.state_for(&inner, *partition)?);
            }
        }

        for (index, (partition, _)) in routed.iter().enumerate() {
            let output = match existing_exits.get(index) {
                Some(&exit) => {
                    for (sub_index, &sub) in subregions.iter().enumerate() {
                        graph.redirect_result(sub, exit, finals[index][sub_index])?;
                    }
                    Origin::Output(node, exit)
                }
                None => gamma.add_exit_var(graph, &finals[index])?.output,
            };
            ctx.states.insert(*partition, output);
        }
        Ok(())
    }

    fn encode_theta(&self, graph: &mut Graph, node: NodeId, ctx: &mut EncodeContext) -> Result<()> {
        let theta = ThetaNode::from_node(graph, node)
            .ok_or_else(|| unreachable_error!("theta handle mismatch on {node}"))?;
        let subregion = theta.subregion(graph);
        let mut touched = self.touched_partitions(graph, subregion);
        touched.retain(|partition| ctx.states.contains_key(partition));
        if touched.is_empty() {
            return Ok(());
        }

        let existing: Vec<usize> = (0..graph.node(node).ninputs())
            .filter(|&input| *graph.node(node).inputs()[input].ty() == Type::MemState)
            .collect();

        let mut inner = EncodeContext::default();
        let mut vars = Vec::new();
        for (index, partition) in touched.iter().enumerate() {
            let state = self.state_for(ctx, *partition)?;
            let lv = match existing.get(index) {
                Some(&input) => {
                    graph.redirect_input(node, input, state)?;
                    theta.loop_var(graph, input)
                }
                None => theta.add_loop_var(graph, state)?,
            };
            inner.states.insert(*partition, lv.argument);
            vars.push((*partition, lv));
        }

        self.encode_region(graph, subregion, &mut inner)?;

        for (partition, lv) in &vars {
            let updated = self.state_for(&inner, *partition)?;
            theta.set_loop_var_result(graph, lv, updated)?;
            ctx.states.insert(*partition, lv.output);
        }
        Ok(())
    }
}

/// Returns `true` if `region` is `ancestor` or nested below it.
fn region_within(graph: &Graph, mut region: RegionId, ancestor: RegionId) -> bool {
    loop {
        if region == ancestor {
            return true;
        }
        match graph.region(region).owner() {
            Some(owner) => region = graph.node(owner).region(),
            None => return false,
        }
    }
}

/// The encoder as a pass: computes the points-to graph, then encodes with
/// per-location partitioning.
#[derive(Debug, Default)]
pub struct MemoryStateEncoderPass;

impl MemoryStateEncoderPass {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl RvsdgPass for MemoryStateEncoderPass {
    fn name(&self) -> &'static str {
        "memory-state-encoder"
    }

    fn description(&self) -> &'static str {
        "Thread one memory state per points-to partition through all memory operations"
    }

    fn run(&self, module: &mut RvsdgModule, events: &mut EventLog) -> Result<bool> {
        let ptg = PointsToAnalysis::run(module)?;
        let encoder = BasicEncoder::new(&ptg);
        encoder.encode(module)?;
        events.record(
            EventKind::StateEncoded,
            format!(
                "{} locations in {} partitions",
                ptg.nlocations(),
                encoder.partitioning.npartitions()
            ),
        );
        Ok(true)
    }
}
