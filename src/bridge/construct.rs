//! CFG → RVSDG construction.
//!
//! Each function body is first classified by the structural analysis into a tree
//! of linear, branch, and loop regions, then converted recursively:
//!
//! - linear regions concatenate into a straight data-flow chain;
//! - branches become γ nodes — the branch selector is the predicate, live-ins
//!   become entry variables, and the join block's phis become exit variables;
//! - tail-controlled loops become θ nodes — header phis and live-through values
//!   become loop variables, the latch test becomes the predicate.
//!
//! Module-level symbols are resolved through context variables; mutually
//! recursive function groups (strongly connected components of the call graph)
//! are wrapped in φ nodes with one recursion variable per member.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;

use crate::ir::cfg::{BlockId, Cfg, PhiInstr, Tac, Terminator, VarId};
use crate::ir::structure::{self, RegionTree};
use crate::ir::{IrFunction, IrGlobal, IrModule};
use crate::pass::RvsdgModule;
use crate::rvsdg::gamma::GammaNode;
use crate::rvsdg::graph::Graph;
use crate::rvsdg::lambda::LambdaNode;
use crate::rvsdg::node::{Origin, RegionId};
use crate::rvsdg::operation::{ControlOp, MiscOp, Operation};
use crate::rvsdg::phi::PhiBuilder;
use crate::rvsdg::simple;
use crate::rvsdg::theta::ThetaNode;
use crate::rvsdg::DeltaNode;
use crate::types::Type;
use crate::{Error, Result};

/// Converts an LLVM-like module into an RVSDG module.
///
/// Declarations become imports; definitions with exported linkage become
/// exports. Function bodies must be reducible with tail-controlled loops and a
/// single return block.
///
/// # Errors
///
/// Returns [`Error::IrreducibleCfg`] when the structural analysis fails and
/// [`Error::UnsupportedOperation`] for constructs outside the model (recursive
/// global initializers, multi-return bodies, undefined symbols).
pub fn construct(module: &IrModule) -> Result<RvsdgModule> {
    let mut result = RvsdgModule::new(&module.name);
    let graph = result.graph_mut();
    let root = graph.root();
    let mut symbols: FxHashMap<String, Origin> = FxHashMap::default();

    // Declarations first: they become imports of the translation unit.
    for function in &module.functions {
        if function.cfg.is_none() {
            let origin = graph.add_import(
                Type::Function(Box::new(function.ty.clone())),
                &function.name,
            );
            symbols.insert(function.name.clone(), origin);
        }
    }
    for global in &module.globals {
        if global.initializer.is_none() {
            let origin = graph.add_import(Type::Pointer, &global.name);
            symbols.insert(global.name.clone(), origin);
        }
    }

    // Definitions in dependency order, recursion groups as φ nodes.
    enum Def<'a> {
        Function(&'a IrFunction),
        Global(&'a IrGlobal),
    }
    let defs: Vec<Def> = module
        .functions
        .iter()
        .filter(|f| f.cfg.is_some())
        .map(Def::Function)
        .chain(
            module
                .globals
                .iter()
                .filter(|g| g.initializer.is_some())
                .map(Def::Global),
        )
        .collect();
    let def_names: Vec<&str> = defs
        .iter()
        .map(|def| match def {
            Def::Function(f) => f.name.as_str(),
            Def::Global(g) => g.name.as_str(),
        })
        .collect();
    let def_index: FxHashMap<&str, usize> = def_names
        .iter()
        .enumerate()
        .map(|(index, name)| (*name, index))
        .collect();
    let deps: Vec<Vec<usize>> = defs
        .iter()
        .map(|def| {
            let referenced = match def {
                Def::Function(f) => referenced_symbols(f.cfg.as_ref()),
                Def::Global(g) => referenced_symbols(g.initializer.as_ref()),
            };
            let mut edges: Vec<usize> = referenced
                .iter()
                .filter_map(|name| def_index.get(name.as_str()).copied())
                .collect();
            edges.sort_unstable();
            edges.dedup();
            edges
        })
        .collect();

    for component in strongly_connected_components(defs.len(), &deps) {
        let recursive = component.len() > 1
            || deps[component[0]].contains(&component[0]);
        if !recursive {
            match &defs[component[0]] {
                Def::Function(f) => {
                    let origin = build_lambda(graph, root, f, &symbols)?;
                    symbols.insert(f.name.clone(), origin);
                }
                Def::Global(g) => {
                    let origin = build_delta(graph, g, &symbols)?;
                    symbols.insert(g.name.clone(), origin);
                }
            }
            continue;
        }

        // A recursion group: every member must be a function.
        let members: Vec<&IrFunction> = component
            .iter()
            .map(|&index| match &defs[index] {
                Def::Function(f) => Ok(*f),
                Def::Global(g) => Err(Error::UnsupportedOperation(format!(
                    "recursive global initializer '{}'",
                    g.name
                ))),
            })
            .collect::<Result<_>>()?;

        let mut builder = PhiBuilder::begin(graph, root)?;
        let mut inner_symbols: FxHashMap<String, Origin> = FxHashMap::default();
        for function in &members {
            let recvar = builder.add_recvar(
                graph,
                Type::Function(Box::new(function.ty.clone())),
            );
            inner_symbols.insert(function.name.clone(), recvar.argument);
        }
        // External symbols the group references are routed in once.
        let mut external: BTreeSet<String> = BTreeSet::new();
        for function in &members {
            for name in referenced_symbols(function.cfg.as_ref()) {
                if !inner_symbols.contains_key(&name) {
                    external.insert(name);
                }
            }
        }
        for name in external {
            let origin = *symbols.get(&name).ok_or_else(|| {
                Error::UnsupportedOperation(format!("undefined symbol '{name}'"))
            })?;
            let routed = builder.add_context_var(graph, origin)?;
            inner_symbols.insert(name, routed);
        }

        let subregion = builder.subregion(graph);
        let mut definitions = Vec::with_capacity(members.len());
        for function in &members {
            definitions.push(build_lambda(graph, subregion, function, &inner_symbols)?);
        }
        let phi = builder.end(graph, &definitions)?;
        for (index, function) in members.iter().enumerate() {
            symbols.insert(function.name.clone(), phi.output(index));
        }
    }

    // Exported definitions become ω results.
    for function in &module.functions {
        if function.cfg.is_some() && function.linkage.is_exported() {
            let origin = symbols[function.name.as_str()];
            graph.add_export(origin, &function.name)?;
        }
    }
    for global in &module.globals {
        if global.initializer.is_some() && global.linkage.is_exported() {
            let origin = symbols[global.name.as_str()];
            graph.add_export(origin, &global.name)?;
        }
    }

    Ok(result)
}

/// Collects the names referenced through `symbolref` instructions.
fn referenced_symbols(cfg: Option<&Cfg>) -> Vec<String> {
    let mut names = Vec::new();
    let Some(cfg) = cfg else {
        return names;
    };
    for block in cfg.block_ids() {
        for tac in &cfg.block(block).tacs {
            if let Operation::Misc(MiscOp::SymbolRef { name, .. }) = &tac.op {
                names.push(name.clone());
            }
        }
    }
    names
}

/// Iterative Tarjan; components come out in dependency order (callees first).
fn strongly_connected_components(n: usize, deps: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut index: Vec<Option<usize>> = vec![None; n];
    let mut low = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next = 0usize;
    let mut components = Vec::new();

    for start in 0..n {
        if index[start].is_some() {
            continue;
        }
        let mut frames: Vec<(usize, usize)> = vec![(start, 0)];
        index[start] = Some(next);
        low[start] = next;
        next += 1;
        stack.push(start);
        on_stack[start] = true;

        while let Some(&(v, child)) = frames.last() {
            if child < deps[v].len() {
                if let Some(frame) = frames.last_mut() {
                    frame.1 += 1;
                }
                let w = deps[v][child];
                if index[w].is_none() {
                    index[w] = Some(next);
                    low[w] = next;
                    next += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    frames.push((w, 0));
                } else if on_stack[w] {
                    low[v] = low[v].min(index[w].unwrap_or(usize::MAX));
                }
            } else {
                frames.pop();
                if low[v] == index[v].unwrap_or(usize::MAX) {
                    let mut component = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    component.sort_unstable();
                    components.push(component);
                }
                if let Some(frame) = frames.last_mut() {
                    let parent = frame.0;
                    low[parent] = low[parent].min(low[v]);
                }
            }
        }
    }
    components
}

/// Per-function conversion state.
struct FnConverter<'a> {
    cfg: &'a Cfg,
    env: FxHashMap<VarId, Origin>,
    returns: Option<Vec<VarId>>,
}

fn build_lambda(
    graph: &mut Graph,
    region: RegionId,
    function: &IrFunction,
    symbols: &FxHashMap<String, Origin>,
) -> Result<Origin> {
    let cfg = function
        .cfg
        .as_ref()
        .ok_or_else(|| unreachable_error!("declaration '{}' has no body", function.name))?;
    let tree = structure::analyze(cfg)?;

    let lambda = LambdaNode::create(
        graph,
        region,
        function.ty.clone(),
        &function.name,
        function.linkage,
    )?;
    let body = lambda.subregion(graph);

    let mut converter = FnConverter {
        cfg,
        env: FxHashMap::default(),
        returns: None,
    };
    for (index, param) in cfg.params().iter().enumerate() {
        converter.env.insert(*param, lambda.argument(graph, index));
    }

    // Symbol references resolve to context variables once per symbol; the tacs
    // themselves are skipped during conversion.
    let mut routed: FxHashMap<String, Origin> = FxHashMap::default();
    for block in cfg.block_ids() {
        for tac in &cfg.block(block).tacs {
            let Operation::Misc(MiscOp::SymbolRef { name, .. }) = &tac.op else {
                continue;
            };
            let origin = match routed.get(name) {
                Some(origin) => *origin,
                None => {
                    let outer = *symbols.get(name).ok_or_else(|| {
                        Error::UnsupportedOperation(format!("undefined symbol '{name}'"))
                    })?;
                    let origin = lambda.add_context_var(graph, outer)?;
                    routed.insert(name.clone(), origin);
                    origin
                }
            };
            converter.env.insert(tac.results[0], origin);
        }
    }

    converter.convert_tree(graph, body, &tree)?;

    let returns = converter
        .returns
        .take()
        .ok_or_else(|| Error::UnsupportedOperation("function body without a return".into()))?;
    let origins: Vec<Origin> = returns
        .iter()
        .map(|var| converter.lookup(*var))
        .collect::<Result<_>>()?;
    lambda.finalize(graph, &origins)
}

fn build_delta(
    graph: &mut Graph,
    global: &IrGlobal,
    symbols: &FxHashMap<String, Origin>,
) -> Result<Origin> {
    let cfg = global
        .initializer
        .as_ref()
        .ok_or_else(|| unreachable_error!("declaration '{}' has no initializer", global.name))?;
    if cfg.nblocks() != 1 {
        return Err(Error::UnsupportedOperation(format!(
            "global initializer '{}' with control flow",
            global.name
        )));
    }
    let root = graph.root();
    let delta = DeltaNode::create(
        graph,
        root,
        global.value_type.clone(),
        &global.name,
        global.linkage,
        global.constant,
    )?;
    let subregion = delta.subregion(graph);

    let mut env: FxHashMap<VarId, Origin> = FxHashMap::default();
    let block = cfg.block(cfg.entry());
    for tac in &block.tacs {
        if let Operation::Misc(MiscOp::SymbolRef { name, .. }) = &tac.op {
            let outer = *symbols.get(name).ok_or_else(|| {
                Error::UnsupportedOperation(format!("undefined symbol '{name}'"))
            })?;
            let origin = delta.add_context_var(graph, outer)?;
            env.insert(tac.results[0], origin);
            continue;
        }
        let operands: Vec<Origin> = tac
            .operands
            .iter()
            .map(|var| {
                env.get(var)
                    .copied()
                    .ok_or_else(|| unreachable_error!("use of unconverted variable {var}"))
            })
            .collect::<Result<_>>()?;
        let outputs = simple::create(graph, subregion, tac.op.clone(), &operands)?;
        for (var, origin) in tac.results.iter().zip(outputs) {
            env.insert(*var, origin);
        }
    }
    let Some(Terminator::Return(values)) = &block.terminator else {
        return Err(Error::UnsupportedOperation(format!(
            "global initializer '{}' without a return",
            global.name
        )));
    };
    if values.len() != 1 {
        return Err(Error::UnsupportedOperation(format!(
            "global initializer '{}' must produce one value",
            global.name
        )));
    }
    let value = *env
        .get(&values[0])
        .ok_or_else(|| unreachable_error!("use of unconverted variable {}", values[0]))?;
    delta.finalize(graph, value)
}

impl FnConverter<'_> {
    fn lookup(&self, var: VarId) -> Result<Origin> {
        self.env
            .get(&var)
            .copied()
            .ok_or_else(|| unreachable_error!("use of unconverted variable {var}"))
    }

    fn convert_tree(&mut self, graph: &mut Graph, region: RegionId, tree: &RegionTree) -> Result<()> {
        match tree {
            RegionTree::Block(block) => self.convert_block(graph, region, *block),
            RegionTree::Linear(children) => {
                for child in children {
                    self.convert_tree(graph, region, child)?;
                }
                Ok(())
            }
            RegionTree::Branch { header, arms, join } => {
                self.convert_branch(graph, region, header, arms, *join)
            }
            RegionTree::Loop { body } => self.convert_loop(graph, region, body),
        }
    }

    fn convert_block(&mut self, graph: &mut Graph, region: RegionId, block: BlockId) -> Result<()> {
        let data = self.cfg.block(block);
        for phi in &data.phis {
            if !self.env.contains_key(&phi.dest) {
                return Err(unreachable_error!(
                    "phi {} was not bound by the enclosing region",
                    phi.dest
                ));
            }
        }
        for tac in &data.tacs {
            if matches!(tac.op, Operation::Misc(MiscOp::SymbolRef { .. })) {
                continue;
            }
            self.convert_tac(graph, region, tac)?;
        }
        if let Some(Terminator::Return(values)) = &data.terminator {
            self.returns = Some(values.clone());
        }
        Ok(())
    }

    fn convert_tac(&mut self, graph: &mut Graph, region: RegionId, tac: &Tac) -> Result<()> {
        let operands: Vec<Origin> = tac
            .operands
            .iter()
            .map(|var| self.lookup(*var))
            .collect::<Result<_>>()?;
        let outputs = simple::create(graph, region, tac.op.clone(), &operands)?;
        if outputs.len() != tac.results.len() {
            return Err(unreachable_error!(
                "operation produced {} results for {} destinations",
                outputs.len(),
                tac.results.len()
            ));
        }
        for (var, origin) in tac.results.iter().zip(outputs) {
            self.env.insert(*var, origin);
        }
        Ok(())
    }

    fn convert_branch(
        &mut self,
        graph: &mut Graph,
        region: RegionId,
        header: &RegionTree,
        arms: &[Option<RegionTree>],
        join: BlockId,
    ) -> Result<()> {
        self.convert_tree(graph, region, header)?;
        let branch_block = header.last_block();
        let Some(Terminator::Branch { operand, targets }) =
            &self.cfg.block(branch_block).terminator
        else {
            return Err(unreachable_error!(
                "branch region without a branch terminator in {branch_block}"
            ));
        };
        debug_assert_eq!(targets.len(), arms.len());
        let predicate = self.lookup(*operand)?;
        let gamma = GammaNode::create(graph, region, predicate, arms.len())?;

        // The phi operand of arm `i` arrives from the arm's last block, or from
        // the branch block itself when the edge goes straight to the join.
        let join_phis: Vec<PhiInstr> = self.cfg.block(join).phis.clone();
        let arm_sources: Vec<BlockId> = arms
            .iter()
            .map(|arm| arm.as_ref().map_or(branch_block, RegionTree::last_block))
            .collect();

        // Everything an arm reads but does not define is routed in once.
        let mut route: BTreeSet<VarId> = BTreeSet::new();
        for (index, arm) in arms.iter().enumerate() {
            let (used, defined) = match arm {
                Some(tree) => {
                    let blocks = tree_blocks(tree);
                    (self.vars_used(&blocks, None), self.vars_defined(&blocks))
                }
                None => (FxHashSet::default(), FxHashSet::default()),
            };
            for var in used {
                if !defined.contains(&var) && self.env.contains_key(&var) {
                    route.insert(var);
                }
            }
            for phi in &join_phis {
                let var = phi_operand(phi, arm_sources[index])?;
                if !defined.contains(&var) {
                    route.insert(var);
                }
            }
        }

        let mut entry_map: FxHashMap<VarId, Vec<Origin>> = FxHashMap::default();
        for var in &route {
            let origin = self.lookup(*var)?;
            let entry = gamma.add_entry_var(graph, origin)?;
            entry_map.insert(*var, entry.arguments);
        }

        let mut arm_envs: Vec<FxHashMap<VarId, Origin>> = Vec::with_capacity(arms.len());
        for (index, arm) in arms.iter().enumerate() {
            let saved = std::mem::take(&mut self.env);
            for (var, arguments) in &entry_map {
                self.env.insert(*var, arguments[index]);
            }
            if let Some(tree) = arm {
                self.convert_tree(graph, gamma.subregion(graph, index), tree)?;
            }
            arm_envs.push(std::mem::replace(&mut self.env, saved));
        }

        for phi in &join_phis {
            let origins: Vec<Origin> = (0..arms.len())
                .map(|index| {
                    let var = phi_operand(phi, arm_sources[index])?;
                    arm_envs[index].get(&var).copied().ok_or_else(|| {
                        unreachable_error!("phi operand {var} is not available in arm {index}")
                    })
                })
                .collect::<Result<_>>()?;
            let exit = gamma.add_exit_var(graph, &origins)?;
            self.env.insert(phi.dest, exit.output);
        }
        Ok(())
    }

    fn convert_loop(
        &mut self,
        graph: &mut Graph,
        region: RegionId,
        body: &RegionTree,
    ) -> Result<()> {
        let blocks = tree_blocks(body);
        let block_set: FxHashSet<BlockId> = blocks.iter().copied().collect();
        let header = body.first_block();
        let latch = body.last_block();
        let Some(Terminator::Branch { operand, targets }) = &self.cfg.block(latch).terminator
        else {
            return Err(Error::IrreducibleCfg);
        };
        if targets.len() != 2 {
            return Err(Error::UnsupportedOperation(
                "loop latch with a non-binary branch".into(),
            ));
        }
        let continue_index = targets
            .iter()
            .position(|target| *target == header)
            .ok_or(Error::IrreducibleCfg)?;

        let theta = ThetaNode::create(graph, region)?;
        let subregion = theta.subregion(graph);
        let mut inner_env: FxHashMap<VarId, Origin> = FxHashMap::default();

        // Values defined outside and read inside become loop variables with
        // invariant routing.
        let header_phis: Vec<PhiInstr> = self.cfg.block(header).phis.clone();
        let used = self.vars_used(&blocks, Some(header));
        let defined = self.vars_defined(&blocks);
        let live_in: BTreeSet<VarId> = used
            .into_iter()
            .filter(|var| !defined.contains(var) && self.env.contains_key(var))
            .collect();
        for var in &live_in {
            let origin = self.lookup(*var)?;
            let lv = theta.add_loop_var(graph, origin)?;
            inner_env.insert(*var, lv.argument);
        }

        // Header phis carry the loop-variant values.
        let mut variant = Vec::with_capacity(header_phis.len());
        for phi in &header_phis {
            let mut init = None;
            let mut update = None;
            for (block, var) in &phi.operands {
                if block_set.contains(block) {
                    update = Some(*var);
                } else {
                    init = Some(*var);
                }
            }
            let (Some(init), Some(update)) = (init, update) else {
                return Err(unreachable_error!(
                    "header phi {} lacks an init or update operand",
                    phi.dest
                ));
            };
            let origin = self.lookup(init)?;
            let lv = theta.add_loop_var(graph, origin)?;
            inner_env.insert(phi.dest, lv.argument);
            variant.push((update, lv));
        }

        let saved = std::mem::replace(&mut self.env, inner_env);
        self.convert_tree(graph, subregion, body)?;
        let inner_env = std::mem::replace(&mut self.env, saved);

        for (update, lv) in &variant {
            let origin = *inner_env.get(update).ok_or_else(|| {
                unreachable_error!("loop update {update} is not defined in the body")
            })?;
            theta.set_loop_var_result(graph, lv, origin)?;
        }

        let inner_predicate = *inner_env.get(operand).ok_or_else(|| {
            unreachable_error!("loop predicate {operand} is not defined in the body")
        })?;
        let predicate = if continue_index == 1 {
            inner_predicate
        } else {
            invert_control2(graph, subregion, inner_predicate)?
        };
        theta.set_predicate(graph, predicate)?;

        // After the loop only the final results are visible.
        for (update, lv) in &variant {
            self.env.insert(*update, lv.output);
        }
        Ok(())
    }

    fn vars_used(&self, blocks: &[BlockId], skip_phis_of: Option<BlockId>) -> FxHashSet<VarId> {
        let mut used = FxHashSet::default();
        for &block in blocks {
            let data = self.cfg.block(block);
            if Some(block) != skip_phis_of {
                for phi in &data.phis {
                    for (_, var) in &phi.operands {
                        used.insert(*var);
                    }
                }
            }
            for tac in &data.tacs {
                if matches!(tac.op, Operation::Misc(MiscOp::SymbolRef { .. })) {
                    continue;
                }
                used.extend(tac.operands.iter().copied());
            }
            match &data.terminator {
                Some(Terminator::Branch { operand, .. }) => {
                    used.insert(*operand);
                }
                Some(Terminator::Return(values)) => used.extend(values.iter().copied()),
                _ => {}
            }
        }
        used
    }

    fn vars_defined(&self, blocks: &[BlockId]) -> FxHashSet<VarId> {
        let mut defined = FxHashSet::default();
        for &block in blocks {
            let data = self.cfg.block(block);
            for phi in &data.phis {
                defined.insert(phi.dest);
            }
            for tac in &data.tacs {
                if matches!(tac.op, Operation::Misc(MiscOp::SymbolRef { .. })) {
                    continue;
                }
                defined.extend(tac.results.iter().copied());
            }
        }
        defined
    }
}

fn phi_operand(phi: &PhiInstr, source: BlockId) -> Result<VarId> {
    phi.operands
        .iter()
        .find(|(block, _)| *block == source)
        .map(|(_, var)| *var)
        .ok_or_else(|| {
            unreachable_error!("phi {} has no operand for predecessor {source}", phi.dest)
        })
}

fn tree_blocks(tree: &RegionTree) -> Vec<BlockId> {
    let mut blocks = Vec::new();
    collect_blocks(tree, &mut blocks);
    blocks
}

fn collect_blocks(tree: &RegionTree, out: &mut Vec<BlockId>) {
    match tree {
        RegionTree::Block(block) => out.push(*block),
        RegionTree::Linear(children) => {
            for child in children {
                collect_blocks(child, out);
            }
        }
        RegionTree::Branch { header, arms, .. } => {
            collect_blocks(header, out);
            for arm in arms.iter().flatten() {
                collect_blocks(arm, out);
            }
        }
        RegionTree::Loop { body } => collect_blocks(body, out),
    }
}

/// Builds the complement of a binary control predicate.
///
/// The producing node must be a `match` or a control constant; anything else is
/// outside the shapes construction emits.
fn invert_control2(graph: &mut Graph, region: RegionId, origin: Origin) -> Result<Origin> {
    let Origin::Output(node, 0) = origin else {
        return Err(Error::UnsupportedOperation(
            "loop predicate is not produced by a match".into(),
        ));
    };
    let op = graph.node(node).operation().cloned();
    match op {
        Some(Operation::Control(ControlOp::Match {
            nbits,
            mapping,
            default_alternative,
            nalternatives: 2,
        })) => {
            let input = graph.input_origin(node, 0);
            let flipped = mapping.into_iter().map(|(v, alt)| (v, 1 - alt)).collect();
            simple::match_op(graph, region, nbits, flipped, 1 - default_alternative, 2, input)
        }
        Some(Operation::Control(ControlOp::Constant {
            nalternatives: 2,
            alternative,
        })) => simple::control_constant(graph, region, 2, 1 - alternative),
        _ => Err(Error::UnsupportedOperation(
            "loop predicate is not produced by a match".into(),
        )),
    }
}
