//! # ridge Prelude
//!
//! Convenient re-exports of the most commonly used types: graph and structural
//! node handles, the operation hierarchy, the IR surface, the analyses, and the
//! pass infrastructure.
//!
//! ```rust,no_run
//! use ridge::prelude::*;
//!
//! let mut graph = Graph::new();
//! let root = graph.root();
//! let x = graph.add_import(Type::Bit(32), "x");
//! # let _ = (root, x);
//! ```

pub use crate::alias::{
    BasicEncoder, LocationId, MemoryLocation, MemoryStateEncoderPass, Partitioning,
    PointsToAnalysis, PointsToGraph,
};
pub use crate::bridge::{construct, destruct};
pub use crate::ir::{
    is_proper_structured, is_structured, BasicBlock, BlockId, Cfg, IrFunction, IrGlobal,
    IrModule, PhiInstr, Tac, Terminator, VarId,
};
pub use crate::normalize::{
    reduce_flattened, FlattenedReduction, NormFlags, NormalFormRegistry,
};
pub use crate::pass::{
    run_passes, Event, EventKind, EventLog, NormalizePass, RvsdgModule, RvsdgPass,
};
pub use crate::rvsdg::{
    simple, view, AggregateOp, BitBinaryKind, BitCompareKind, BitOp, CastOp, ControlOp,
    DeltaNode, FloatOp, FpBinaryKind, GammaNode, Graph, LambdaNode, MemoryOp, MiscOp, NodeId,
    NodeKind, OpClass, Operation, Origin, PhiBuilder, PhiNode, RegionId, ThetaNode, User,
};
pub use crate::types::{FloatSize, FunctionType, Linkage, RecordDecl, Type};
pub use crate::{Error, Result};
