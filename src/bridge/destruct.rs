//! RVSDG → CFG destructuring.
//!
//! Each λ becomes a function whose entry block projects the arguments; the body
//! region is emitted into basic blocks:
//!
//! - a γ becomes a branch on its predicate with one block sequence per
//!   subregion and a join block whose phis pair each exit variable with its
//!   originating subregion's result;
//! - a θ becomes a header block with one phi per loop variable, the body, and a
//!   back edge driven by the predicate (continue at target 1);
//! - context variables surface as `symbolref` instructions at function entry.

use rustc_hash::FxHashMap;

use crate::ir::cfg::{BlockId, Cfg, PhiInstr, Tac, Terminator, VarId};
use crate::ir::{IrFunction, IrGlobal, IrModule};
use crate::pass::RvsdgModule;
use crate::rvsdg::gamma::GammaNode;
use crate::rvsdg::graph::Graph;
use crate::rvsdg::lambda::LambdaNode;
use crate::rvsdg::node::{NodeId, NodeKind, Origin, RegionId};
use crate::rvsdg::operation::{MiscOp, Operation};
use crate::rvsdg::theta::ThetaNode;
use crate::types::Type;
use crate::{Error, Result};

/// Converts an RVSDG module back into an LLVM-like module.
///
/// # Errors
///
/// Returns [`Error::UnsupportedOperation`] for graphs outside the model emitted
/// by construction (nested function definitions, non-function imports).
pub fn destruct(module: &RvsdgModule) -> Result<IrModule> {
    let graph = module.graph();
    let mut result = IrModule::new(&module.name);
    let root = graph.root();

    // Imports become declarations.
    for (index, argument) in graph.region(root).arguments().iter().enumerate() {
        let name = graph
            .imports()
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("import{index}"));
        match argument.ty() {
            Type::Function(ty) => result.functions.push(IrFunction {
                name,
                linkage: crate::types::Linkage::External,
                ty: (**ty).clone(),
                cfg: None,
            }),
            _ => {
                return Err(Error::UnsupportedOperation(format!(
                    "cannot destructure import '{name}' of type {}",
                    argument.ty()
                )))
            }
        }
    }

    for node in graph.topological_order(root) {
        match graph.node(node).kind() {
            NodeKind::Lambda(_) => {
                let lambda = LambdaNode::from_node(graph, node)
                    .ok_or_else(|| unreachable_error!("lambda handle mismatch on {node}"))?;
                result.functions.push(emit_function(graph, &lambda)?);
            }
            NodeKind::Delta(_) => {
                result.globals.push(emit_global(graph, node)?);
            }
            NodeKind::Phi => {
                let subregion = graph.node(node).subregions()[0];
                for inner in graph.topological_order(subregion) {
                    if let Some(lambda) = LambdaNode::from_node(graph, inner) {
                        result.functions.push(emit_function(graph, &lambda)?);
                    }
                }
            }
            NodeKind::Simple(_) | NodeKind::Gamma | NodeKind::Theta => {
                return Err(Error::UnsupportedOperation(
                    "computation at translation-unit level".into(),
                ))
            }
        }
    }

    Ok(result)
}

/// Resolves the symbol name behind an origin feeding a context variable.
fn symbol_name(graph: &Graph, origin: Origin) -> Result<String> {
    match origin {
        Origin::Output(node, index) => match graph.node(node).kind() {
            NodeKind::Lambda(sig) => Ok(sig.name.clone()),
            NodeKind::Delta(sig) => Ok(sig.name.clone()),
            NodeKind::Phi => {
                // Output k of a φ is recursion variable k, defined by result k.
                let subregion = graph.node(node).subregions()[0];
                let definition = graph.result_origin(subregion, index);
                symbol_name(graph, definition)
            }
            _ => Err(Error::UnsupportedOperation(
                "context variable does not name a symbol".into(),
            )),
        },
        Origin::Argument(region, index) => {
            if region == graph.root() {
                graph
                    .imports()
                    .get(index)
                    .cloned()
                    .ok_or_else(|| unreachable_error!("import {index} has no name"))
            } else if let Some(owner) = graph.region(region).owner() {
                match graph.node(owner).kind() {
                    NodeKind::Phi => match graph.region(region).argument(index) {
                        // A recursion variable names its own definition.
                        Some(argument) if argument.input().is_none() => {
                            let definition = graph.result_origin(region, index);
                            symbol_name(graph, definition)
                        }
                        // A context variable of the φ resolves outside.
                        Some(argument) => {
                            let input = argument.input().unwrap_or(0);
                            symbol_name(graph, graph.input_origin(owner, input))
                        }
                        None => Err(unreachable_error!("argument {index} missing on {region}")),
                    },
                    _ => Err(Error::UnsupportedOperation(
                        "context variable does not name a symbol".into(),
                    )),
                }
            } else {
                Err(unreachable_error!("argument region {region} has no owner"))
            }
        }
    }
}

struct FnEmitter<'a> {
    graph: &'a Graph,
    cfg: Cfg,
    env: FxHashMap<Origin, VarId>,
}

fn emit_function(graph: &Graph, lambda: &LambdaNode) -> Result<IrFunction> {
    let sig = lambda.sig(graph).clone();
    let body = lambda.subregion(graph);
    let mut emitter = FnEmitter {
        graph,
        cfg: Cfg::new(sig.ty.parameters()),
        env: FxHashMap::default(),
    };

    for index in 0..sig.ty.parameters().len() {
        let param = emitter.cfg.params()[index];
        emitter.env.insert(lambda.argument(graph, index), param);
    }

    // Context variables become symbolref instructions in the entry block.
    let entry = emitter.cfg.entry();
    let nparameters = sig.ty.parameters().len();
    for (offset, context) in lambda.context_vars(graph).iter().enumerate() {
        let input = offset; // context var i is input i of the λ
        let outer = graph.input_origin(lambda.node(), input);
        let name = symbol_name(graph, outer)?;
        let ty = graph
            .region(body)
            .argument(nparameters + offset)
            .map(|argument| argument.ty().clone())
            .ok_or_else(|| unreachable_error!("context argument missing on {body}"))?;
        let var = emitter.cfg.add_var(ty.clone());
        emitter.cfg.block_mut(entry).tacs.push(Tac {
            op: Operation::Misc(MiscOp::SymbolRef { name, ty }),
            operands: Vec::new(),
            results: vec![var],
        });
        emitter.env.insert(*context, var);
    }

    let last = emitter.emit_region(body, entry)?;
    let returns: Vec<VarId> = graph
        .region(body)
        .results()
        .iter()
        .map(|r| emitter.lookup(r.origin()))
        .collect::<Result<_>>()?;
    emitter.cfg.block_mut(last).terminator = Some(Terminator::Return(returns));

    Ok(IrFunction {
        name: sig.name,
        linkage: sig.linkage,
        ty: sig.ty,
        cfg: Some(emitter.cfg),
    })
}

fn emit_global(graph: &Graph, node: NodeId) -> Result<IrGlobal> {
    let delta = crate::rvsdg::DeltaNode::from_node(graph, node)
        .ok_or_else(|| unreachable_error!("delta handle mismatch on {node}"))?;
    let sig = delta.sig(graph).clone();
    let subregion = delta.subregion(graph);

    let mut emitter = FnEmitter {
        graph,
        cfg: Cfg::new(&[]),
        env: FxHashMap::default(),
    };
    let entry = emitter.cfg.entry();
    for (index, argument) in graph.region(subregion).arguments().iter().enumerate() {
        let input = argument
            .input()
            .ok_or_else(|| unreachable_error!("delta argument without routing on {node}"))?;
        let outer = graph.input_origin(node, input);
        let name = symbol_name(graph, outer)?;
        let ty = argument.ty().clone();
        let var = emitter.cfg.add_var(ty.clone());
        emitter.cfg.block_mut(entry).tacs.push(Tac {
            op: Operation::Misc(MiscOp::SymbolRef { name, ty }),
            operands: Vec::new(),
            results: vec![var],
        });
        emitter.env.insert(Origin::Argument(subregion, index), var);
    }
    let last = emitter.emit_region(subregion, entry)?;
    let value = emitter.lookup(graph.result_origin(subregion, 0))?;
    emitter.cfg.block_mut(last).terminator = Some(Terminator::Return(vec![value]));

    Ok(IrGlobal {
        name: sig.name,
        linkage: sig.linkage,
        value_type: sig.value_type,
        constant: sig.constant,
        initializer: Some(emitter.cfg),
    })
}

impl FnEmitter<'_> {
    fn lookup(&self, origin: Origin) -> Result<VarId> {
        self.env
            .get(&origin)
            .copied()
            .ok_or_else(|| unreachable_error!("origin {origin:?} was not emitted"))
    }

    fn define(&mut self, origin: Origin, ty: Type) -> VarId {
        let var = self.cfg.add_var(ty);
        self.env.insert(origin, var);
        var
    }

    /// Emits a region into blocks starting at `block`; returns the last block.
    fn emit_region(&mut self, region: RegionId, block: BlockId) -> Result<BlockId> {
        let mut current = block;
        for node in self.graph.topological_order(region) {
            current = match self.graph.node(node).kind() {
                NodeKind::Simple(op) => {
                    let op = op.clone();
                    self.emit_simple(node, &op, current)?
                }
                NodeKind::Gamma => self.emit_gamma(node, current)?,
                NodeKind::Theta => self.emit_theta(node, current)?,
                NodeKind::Lambda(_) | NodeKind::Delta(_) | NodeKind::Phi => {
                    return Err(Error::UnsupportedOperation(
                        "nested function or global definition".into(),
                    ))
                }
            };
        }
        Ok(current)
    }

    fn emit_simple(&mut self, node: NodeId, op: &Operation, current: BlockId) -> Result<BlockId> {
        let operands: Vec<VarId> = self
            .graph
            .node(node)
            .inputs()
            .iter()
            .map(|input| self.lookup(input.origin()))
            .collect::<Result<_>>()?;
        let results: Vec<VarId> = op
            .result_types()
            .into_iter()
            .enumerate()
            .map(|(index, ty)| self.define(Origin::Output(node, index), ty))
            .collect();
        self.cfg.block_mut(current).tacs.push(Tac {
            op: op.clone(),
            operands,
            results,
        });
        Ok(current)
    }

    fn emit_gamma(&mut self, node: NodeId, current: BlockId) -> Result<BlockId> {
        let gamma = GammaNode::from_node(self.graph, node)
            .ok_or_else(|| unreachable_error!("gamma handle mismatch on {node}"))?;
        let predicate = self.lookup(gamma.predicate(self.graph))?;
        let nsubregions = gamma.nsubregions(self.graph);

        // Empty subregions become direct edges to the join; the result is
        // structured but not proper structured.
        let mut arm_entries: Vec<Option<BlockId>> = Vec::with_capacity(nsubregions);
        let mut arm_exits: Vec<Option<BlockId>> = Vec::with_capacity(nsubregions);
        for index in 0..nsubregions {
            // Entry variables project straight through: same variable, new scope.
            let subregion = gamma.subregion(self.graph, index);
            for entry_index in 0..gamma.nentry_vars(self.graph) {
                let outer = self.graph.input_origin(node, entry_index + 1);
                let var = self.lookup(outer)?;
                self.env
                    .insert(Origin::Argument(subregion, entry_index), var);
            }
            if self.graph.region(subregion).nodes().is_empty() {
                arm_entries.push(None);
                arm_exits.push(None);
            } else {
                let entry = self.cfg.add_block();
                let exit = self.emit_region(subregion, entry)?;
                arm_entries.push(Some(entry));
                arm_exits.push(Some(exit));
            }
        }

        let join = self.cfg.add_block();
        for exit in arm_exits.iter().flatten() {
            self.cfg.block_mut(*exit).terminator = Some(Terminator::Jump(join));
        }
        self.cfg.block_mut(current).terminator = Some(Terminator::Branch {
            operand: predicate,
            targets: arm_entries
                .iter()
                .map(|entry| entry.unwrap_or(join))
                .collect(),
        });

        // One phi per exit variable, pairing each arm's result.
        for index in 0..gamma.nexit_vars(self.graph) {
            let origins = gamma.exit_var_origins(self.graph, index);
            let operands: Vec<(BlockId, VarId)> = origins
                .iter()
                .zip(&arm_exits)
                .map(|(origin, exit)| Ok((exit.unwrap_or(current), self.lookup(*origin)?)))
                .collect::<Result<_>>()?;
            let ty = self
                .graph
                .origin_type(Origin::Output(node, index))
                .clone();
            let dest = self.define(Origin::Output(node, index), ty);
            self.cfg
                .block_mut(join)
                .phis
                .push(PhiInstr { dest, operands });
        }
        Ok(join)
    }

    fn emit_theta(&mut self, node: NodeId, current: BlockId) -> Result<BlockId> {
        let theta = ThetaNode::from_node(self.graph, node)
            .ok_or_else(|| unreachable_error!("theta handle mismatch on {node}"))?;
        let subregion = theta.subregion(self.graph);
        let nloop_vars = theta.nloop_vars(self.graph);

        let header = self.cfg.add_block();
        self.cfg.block_mut(current).terminator = Some(Terminator::Jump(header));

        // Header phis: initial value from the predecessor, update patched in
        // once the body is emitted.
        let mut phi_inits = Vec::with_capacity(nloop_vars);
        for index in 0..nloop_vars {
            let init = self.lookup(self.graph.input_origin(node, index))?;
            let ty = self
                .graph
                .origin_type(Origin::Argument(subregion, index))
                .clone();
            let dest = self.cfg.add_var(ty);
            self.env.insert(Origin::Argument(subregion, index), dest);
            phi_inits.push((dest, init));
        }

        let latch = self.emit_region(subregion, header)?;
        let exit = self.cfg.add_block();

        let predicate = self.lookup(self.graph.result_origin(subregion, 0))?;
        self.cfg.block_mut(latch).terminator = Some(Terminator::Branch {
            operand: predicate,
            targets: vec![exit, header],
        });

        for (index, (dest, init)) in phi_inits.into_iter().enumerate() {
            let update = self.lookup(self.graph.result_origin(subregion, index + 1))?;
            self.cfg.block_mut(header).phis.push(PhiInstr {
                dest,
                operands: vec![(current, init), (latch, update)],
            });
            // The final result is the update value of the last iteration.
            self.env.insert(Origin::Output(node, index), update);
        }
        Ok(exit)
    }
}
