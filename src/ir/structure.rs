//! Structural analysis of control flow graphs.
//!
//! The analysis classifies a reducible CFG into a tree of regions (linear
//! sequences, branches, and tail-controlled loops) by repeatedly collapsing
//! patterns on an abstract graph, in the manner of interval analysis:
//!
//! - a node with a self edge collapses into a **loop**;
//! - a node whose single successor has a single predecessor collapses into a
//!   **linear** sequence;
//! - a multi-way branch whose arms (possibly empty) meet at one join collapses
//!   into a **branch**.
//!
//! A CFG that collapses to a single node is *structured*; if the collapse also
//! succeeds with empty branch arms forbidden it is *proper structured*. A CFG
//! where no rule applies is irreducible from this analysis's point of view,
//! notably multi-entry loops and loops whose exit test is not at the latch.

use rustc_hash::FxHashMap;

use crate::ir::cfg::{BlockId, Cfg};
use crate::{Error, Result};

/// A region tree produced by the structural analysis.
#[derive(Debug, Clone)]
pub enum RegionTree {
    /// A single basic block
    Block(BlockId),
    /// A sequence of regions executed in order
    Linear(Vec<RegionTree>),
    /// A multi-way branch: header, one arm per target (`None` when the edge
    /// goes straight to the join), and the join block
    Branch {
        /// The region ending in the branch terminator
        header: Box<RegionTree>,
        /// One arm per branch target, in target order
        arms: Vec<Option<RegionTree>>,
        /// The block where the arms meet
        join: BlockId,
    },
    /// A tail-controlled loop around its body
    Loop {
        /// The loop body; its last block holds the exit test
        body: Box<RegionTree>,
    },
}

impl RegionTree {
    /// Returns the first basic block executed in this region.
    #[must_use]
    pub fn first_block(&self) -> BlockId {
        match self {
            RegionTree::Block(block) => *block,
            RegionTree::Linear(children) => children[0].first_block(),
            RegionTree::Branch { header, .. } => header.first_block(),
            RegionTree::Loop { body } => body.first_block(),
        }
    }

    /// Returns the last basic block executed in this region.
    #[must_use]
    pub fn last_block(&self) -> BlockId {
        match self {
            RegionTree::Block(block) => *block,
            RegionTree::Linear(children) => children[children.len() - 1].last_block(),
            RegionTree::Branch { join, .. } => *join,
            RegionTree::Loop { body } => body.last_block(),
        }
    }
}

struct AbstractNode {
    tree: RegionTree,
    succs: Vec<usize>,
}

/// Runs the structural analysis, allowing empty branch arms.
///
/// # Errors
///
/// Returns [`Error::IrreducibleCfg`] when the CFG does not collapse.
pub fn analyze(cfg: &Cfg) -> Result<RegionTree> {
    collapse(cfg, false)
}

/// Returns `true` if the CFG collapses with empty branch arms allowed.
#[must_use]
pub fn is_structured(cfg: &Cfg) -> bool {
    collapse(cfg, false).is_ok()
}

/// Returns `true` if the CFG collapses with every branch arm non-empty.
#[must_use]
pub fn is_proper_structured(cfg: &Cfg) -> bool {
    collapse(cfg, true).is_ok()
}

fn collapse(cfg: &Cfg, proper: bool) -> Result<RegionTree> {
    // Seed one abstract node per reachable block.
    let mut block_to_abstract: FxHashMap<BlockId, usize> = FxHashMap::default();
    let mut reachable = Vec::new();
    let mut stack = vec![cfg.entry()];
    while let Some(block) = stack.pop() {
        if block_to_abstract.contains_key(&block) {
            continue;
        }
        block_to_abstract.insert(block, reachable.len());
        reachable.push(block);
        for &succ in cfg.successors(block) {
            stack.push(succ);
        }
    }

    let mut nodes: Vec<Option<AbstractNode>> = reachable
        .iter()
        .map(|&block| {
            let succs = cfg
                .successors(block)
                .iter()
                .map(|succ| block_to_abstract[succ])
                .collect();
            Some(AbstractNode {
                tree: RegionTree::Block(block),
                succs,
            })
        })
        .collect();
    let entry = 0usize;

    loop {
        let live = nodes.iter().filter(|slot| slot.is_some()).count();
        if live == 1 {
            let root = nodes
                .iter_mut()
                .find_map(Option::take)
                .ok_or(Error::IrreducibleCfg)?;
            if root.succs.is_empty() {
                return Ok(root.tree);
            }
            return Err(Error::IrreducibleCfg);
        }
        if !reduce_once(&mut nodes, entry, proper) {
            return Err(Error::IrreducibleCfg);
        }
    }
}

fn pred_counts(nodes: &[Option<AbstractNode>]) -> Vec<usize> {
    let mut counts = vec![0usize; nodes.len()];
    for slot in nodes.iter().flatten() {
        for &succ in &slot.succs {
            counts[succ] += 1;
        }
    }
    counts
}

fn reduce_once(nodes: &mut Vec<Option<AbstractNode>>, entry: usize, proper: bool) -> bool {
    // Loop rule: collapse self edges first so latches become ordinary nodes.
    for id in 0..nodes.len() {
        let Some(node) = nodes[id].take() else {
            continue;
        };
        if !node.succs.contains(&id) {
            nodes[id] = Some(node);
            continue;
        }
        let succs = node.succs.into_iter().filter(|&s| s != id).collect();
        nodes[id] = Some(AbstractNode {
            tree: RegionTree::Loop {
                body: Box::new(node.tree),
            },
            succs,
        });
        return true;
    }

    // Linear rule: merge a single successor with a single predecessor.
    let counts = pred_counts(nodes);
    for id in 0..nodes.len() {
        let Some(node) = &nodes[id] else { continue };
        if node.succs.len() != 1 {
            continue;
        }
        let succ = node.succs[0];
        if succ == id || succ == entry || counts[succ] != 1 {
            continue;
        }
        let (Some(head), Some(tail)) =
            (std::mem::take(&mut nodes[id]), std::mem::take(&mut nodes[succ]))
        else {
            return false;
        };
        let mut children = match head.tree {
            RegionTree::Linear(children) => children,
            other => vec![other],
        };
        match tail.tree {
            RegionTree::Linear(more) => children.extend(more),
            other => children.push(other),
        }
        nodes[id] = Some(AbstractNode {
            tree: RegionTree::Linear(children),
            succs: tail.succs,
        });
        return true;
    }

    // Branch rule: arms with one predecessor and one successor meeting at a join.
    'branch: for id in 0..nodes.len() {
        let Some(node) = &nodes[id] else { continue };
        if node.succs.len() < 2 {
            continue;
        }
        let mut join: Option<usize> = None;
        let mut arms: Vec<Option<usize>> = Vec::with_capacity(node.succs.len());
        for &target in &node.succs {
            let arm_join = {
                let Some(candidate) = &nodes[target] else {
                    continue 'branch;
                };
                if counts[target] == 1 && candidate.succs.len() == 1 && target != id {
                    // A real arm.
                    arms.push(Some(target));
                    candidate.succs[0]
                } else {
                    // The edge goes straight to the join.
                    if proper {
                        continue 'branch;
                    }
                    arms.push(None);
                    target
                }
            };
            if arm_join == id {
                continue 'branch;
            }
            match join {
                None => join = Some(arm_join),
                Some(j) if j == arm_join => {}
                Some(_) => continue 'branch,
            }
        }
        let Some(join) = join else { continue 'branch };

        let mut arm_trees: Vec<Option<RegionTree>> = Vec::with_capacity(arms.len());
        for arm in &arms {
            match arm {
                Some(abstract_id) => match nodes[*abstract_id].take() {
                    Some(node) => arm_trees.push(Some(node.tree)),
                    None => return false,
                },
                None => arm_trees.push(None),
            }
        }
        let Some(header) = nodes[id].take() else {
            return false;
        };
        let Some(join_block) = nodes[join].as_ref().map(|n| n.tree.first_block()) else {
            return false;
        };
        nodes[id] = Some(AbstractNode {
            tree: RegionTree::Branch {
                header: Box::new(header.tree),
                arms: arm_trees,
                join: join_block,
            },
            succs: vec![join],
        });
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::cfg::Terminator;
    use crate::types::Type;

    fn diamond(empty_arm: bool) -> Cfg {
        let mut cfg = Cfg::new(&[Type::Control(2)]);
        let selector = cfg.params()[0];
        let then_block = cfg.add_block();
        let else_block = if empty_arm { None } else { Some(cfg.add_block()) };
        let join = cfg.add_block();

        let entry = cfg.entry();
        let else_target = else_block.unwrap_or(join);
        cfg.block_mut(entry).terminator = Some(Terminator::Branch {
            operand: selector,
            targets: vec![then_block, else_target],
        });
        cfg.block_mut(then_block).terminator = Some(Terminator::Jump(join));
        if let Some(else_block) = else_block {
            cfg.block_mut(else_block).terminator = Some(Terminator::Jump(join));
        }
        cfg.block_mut(join).terminator = Some(Terminator::Return(vec![]));
        cfg
    }

    #[test]
    fn test_diamond_is_proper_structured() {
        let cfg = diamond(false);
        assert!(is_structured(&cfg));
        assert!(is_proper_structured(&cfg));
        let tree = analyze(&cfg).unwrap();
        let RegionTree::Linear(children) = tree else {
            panic!("expected a linear sequence");
        };
        assert!(matches!(children[0], RegionTree::Branch { .. }));
    }

    #[test]
    fn test_empty_arm_is_structured_but_not_proper() {
        let cfg = diamond(true);
        assert!(is_structured(&cfg));
        assert!(!is_proper_structured(&cfg));
    }

    #[test]
    fn test_tail_controlled_loop_collapses() {
        let mut cfg = Cfg::new(&[Type::Control(2)]);
        let selector = cfg.params()[0];
        let body = cfg.add_block();
        let exit = cfg.add_block();
        let entry = cfg.entry();
        cfg.block_mut(entry).terminator = Some(Terminator::Jump(body));
        cfg.block_mut(body).terminator = Some(Terminator::Branch {
            operand: selector,
            targets: vec![exit, body],
        });
        cfg.block_mut(exit).terminator = Some(Terminator::Return(vec![]));

        assert!(is_structured(&cfg));
        let tree = analyze(&cfg).unwrap();
        let RegionTree::Linear(children) = tree else {
            panic!("expected a linear sequence");
        };
        assert!(matches!(children[1], RegionTree::Loop { .. }));
    }

    #[test]
    fn test_head_controlled_loop_is_irreducible_here() {
        // while-shape: the exit test sits at the header, not the latch.
        let mut cfg = Cfg::new(&[Type::Control(2)]);
        let selector = cfg.params()[0];
        let header = cfg.add_block();
        let body = cfg.add_block();
        let exit = cfg.add_block();
        let entry = cfg.entry();
        cfg.block_mut(entry).terminator = Some(Terminator::Jump(header));
        cfg.block_mut(header).terminator = Some(Terminator::Branch {
            operand: selector,
            targets: vec![exit, body],
        });
        cfg.block_mut(body).terminator = Some(Terminator::Jump(header));
        cfg.block_mut(exit).terminator = Some(Terminator::Return(vec![]));

        assert!(!is_structured(&cfg));
        assert!(matches!(analyze(&cfg), Err(Error::IrreducibleCfg)));
    }
}
