//! Control flow graphs of three-address code.
//!
//! This is the LLVM-like IR the core consumes and emits: a function body is a graph
//! of basic blocks holding phi instructions, three-address instructions
//! ([`Tac`]), and a terminator. Values live in a single SSA variable space per
//! function; memory ordering is explicit (loads and stores consume and produce
//! state-typed variables), so the builder surface, not the core, decides the
//! initial state threading.

use std::fmt;

use crate::rvsdg::operation::Operation;
use crate::types::Type;

/// A strongly-typed identifier for SSA variables within one function.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub(crate) usize);

impl VarId {
    /// Creates a `VarId` from a raw index value.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        VarId(index)
    }

    /// Returns the raw index value.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarId({})", self.0)
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A strongly-typed identifier for basic blocks within one function.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub(crate) usize);

impl BlockId {
    /// Creates a `BlockId` from a raw index value.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        BlockId(index)
    }

    /// Returns the raw index value.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// A three-address instruction: an operation applied to variables.
#[derive(Debug, Clone)]
pub struct Tac {
    /// The operation computed
    pub op: Operation,
    /// Operand variables, in the operation's input order
    pub operands: Vec<VarId>,
    /// Result variables, in the operation's output order
    pub results: Vec<VarId>,
}

/// A phi instruction at a block head, selecting a value per predecessor.
#[derive(Debug, Clone)]
pub struct PhiInstr {
    /// The variable defined by this phi
    pub dest: VarId,
    /// `(predecessor, value)` pairs, one per incoming edge
    pub operands: Vec<(BlockId, VarId)>,
}

/// A block terminator.
#[derive(Debug, Clone)]
pub enum Terminator {
    /// Unconditional jump
    Jump(BlockId),
    /// Multi-way branch on a control-typed operand; `targets[k]` is taken when
    /// the operand selects alternative `k`. With two targets this is the plain
    /// conditional branch.
    Branch {
        /// The `ctl k` selector variable
        operand: VarId,
        /// One target per alternative
        targets: Vec<BlockId>,
    },
    /// Function return
    Return(Vec<VarId>),
}

impl Terminator {
    /// Returns the successor blocks, in target order.
    #[must_use]
    pub fn successors(&self) -> &[BlockId] {
        match self {
            Terminator::Jump(target) => std::slice::from_ref(target),
            Terminator::Branch { targets, .. } => targets,
            Terminator::Return(_) => &[],
        }
    }
}

/// A basic block: phis, straight-line code, and a terminator.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    /// Phi instructions at the block head
    pub phis: Vec<PhiInstr>,
    /// Three-address instructions in execution order
    pub tacs: Vec<Tac>,
    /// The terminator; `None` only while the block is under construction
    pub terminator: Option<Terminator>,
}

/// A function body: blocks, variables, parameters.
#[derive(Debug, Clone)]
pub struct Cfg {
    vars: Vec<Type>,
    params: Vec<VarId>,
    blocks: Vec<BasicBlock>,
    entry: BlockId,
}

impl Cfg {
    /// Creates a CFG with one variable per parameter and an empty entry block.
    #[must_use]
    pub fn new(param_types: &[Type]) -> Self {
        let mut cfg = Self {
            vars: Vec::new(),
            params: Vec::new(),
            blocks: vec![BasicBlock::default()],
            entry: BlockId(0),
        };
        for ty in param_types {
            let var = cfg.add_var(ty.clone());
            cfg.params.push(var);
        }
        cfg
    }

    /// Creates a fresh variable of the given type.
    pub fn add_var(&mut self, ty: Type) -> VarId {
        let id = VarId(self.vars.len());
        self.vars.push(ty);
        id
    }

    /// Returns the type of a variable.
    #[must_use]
    pub fn var_type(&self, var: VarId) -> &Type {
        &self.vars[var.index()]
    }

    /// Returns the number of variables.
    #[must_use]
    pub fn nvars(&self) -> usize {
        self.vars.len()
    }

    /// Returns the parameter variables.
    #[must_use]
    pub fn params(&self) -> &[VarId] {
        &self.params
    }

    /// Appends an empty block.
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(BasicBlock::default());
        id
    }

    /// Returns the entry block.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// Returns a block.
    ///
    /// # Panics
    ///
    /// Panics if the ID is out of bounds.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    /// Returns a mutable block.
    ///
    /// # Panics
    ///
    /// Panics if the ID is out of bounds.
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    /// Returns the number of blocks.
    #[must_use]
    pub fn nblocks(&self) -> usize {
        self.blocks.len()
    }

    /// Returns all block IDs.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len()).map(BlockId)
    }

    /// Returns the successors of a block (empty while unterminated).
    #[must_use]
    pub fn successors(&self, id: BlockId) -> &[BlockId] {
        self.block(id)
            .terminator
            .as_ref()
            .map(Terminator::successors)
            .unwrap_or(&[])
    }

    /// Computes the predecessor lists of all blocks.
    ///
    /// An edge is counted once per occurrence, so a two-way branch with equal
    /// targets contributes two entries.
    #[must_use]
    pub fn predecessors(&self) -> Vec<Vec<BlockId>> {
        let mut preds = vec![Vec::new(); self.blocks.len()];
        for id in self.block_ids() {
            for &succ in self.successors(id) {
                preds[succ.index()].push(id);
            }
        }
        preds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cfg_construction() {
        let mut cfg = Cfg::new(&[Type::Bit(32), Type::MemState]);
        assert_eq!(cfg.params().len(), 2);
        assert_eq!(cfg.var_type(cfg.params()[0]), &Type::Bit(32));

        let exit = cfg.add_block();
        let entry = cfg.entry();
        cfg.block_mut(entry).terminator = Some(Terminator::Jump(exit));
        let ret = cfg.params()[0];
        cfg.block_mut(exit).terminator = Some(Terminator::Return(vec![ret]));

        assert_eq!(cfg.successors(entry), &[exit]);
        assert!(cfg.successors(exit).is_empty());
        let preds = cfg.predecessors();
        assert_eq!(preds[exit.index()], vec![entry]);
        assert!(preds[entry.index()].is_empty());
    }

    #[test]
    fn test_branch_successor_order() {
        let mut cfg = Cfg::new(&[Type::Control(2)]);
        let a = cfg.add_block();
        let b = cfg.add_block();
        let entry = cfg.entry();
        let selector = cfg.params()[0];
        cfg.block_mut(entry).terminator = Some(Terminator::Branch {
            operand: selector,
            targets: vec![a, b],
        });
        assert_eq!(cfg.successors(entry), &[a, b]);
    }
}
