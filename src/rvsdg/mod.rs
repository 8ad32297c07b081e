//! The regionalized value-state dependence graph.
//!
//! This module is the graph core plus the structural node semantics:
//!
//! - [`graph`] — arena storage, wiring, divert-to, copy, pruning
//! - [`node`] / [`region`] — ids, ports, users, ownership
//! - [`operation`] — the tagged-union operation hierarchy for simple nodes
//! - [`simple`] — normalized simple-node factories
//! - [`gamma`], [`theta`], [`lambda`], [`delta`], [`phi`] — structural nodes
//! - [`view`] — stable textual dumps
//!
//! The translation-unit node (ω) is the graph's root region; imports and exports
//! live on [`Graph::add_import`] / [`Graph::add_export`].

pub mod delta;
pub mod gamma;
pub mod graph;
pub mod lambda;
pub mod node;
pub mod operation;
pub mod phi;
pub mod region;
pub mod simple;
pub mod theta;
pub mod view;

pub use delta::DeltaNode;
pub use gamma::{EntryVar, ExitVar, GammaNode};
pub use graph::{Graph, SubstitutionMap};
pub use lambda::LambdaNode;
pub use node::{
    DeltaSig, Input, LambdaSig, Node, NodeId, NodeKind, Origin, Output, RegionId, User,
};
pub use operation::{
    AggregateOp, BinaryFlags, BinopReduction, BitBinaryKind, BitCompareKind, BitOp, CastOp,
    ControlOp, FloatOp, FpBinaryKind, MemoryOp, MiscOp, OpClass, Operation,
};
pub use phi::{PhiBuilder, PhiNode, RecVar};
pub use region::{Argument, Region, ResultPort};
pub use theta::{LoopVar, ThetaNode};
pub use view::view;
