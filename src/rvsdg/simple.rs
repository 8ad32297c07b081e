//! Simple node creation.
//!
//! All simple nodes are materialized through [`create`], which consults the graph's
//! normal forms first: if an enabled rule reduces the would-be node to existing
//! origins, those origins are returned and no node is created. The raw factory
//! [`create_node`] bypasses the rules and is used by the rewrite engine itself.
//!
//! The helpers at the bottom cover the common constant and predicate constructors.

use crate::normalize;
use crate::rvsdg::graph::Graph;
use crate::rvsdg::node::{NodeId, NodeKind, Origin, RegionId};
use crate::rvsdg::operation::{BitBinaryKind, BitOp, ControlOp, Operation};
use crate::Result;

/// Creates a simple node computing `op` over `operands`, normalizing on the way.
///
/// Returns the origins holding the results: either the outputs of a newly created
/// node, or pre-existing origins when a normal-form rule reduced the request.
///
/// # Errors
///
/// Fails with [`TypeMismatch`](crate::Error::TypeMismatch) or
/// [`ScopeViolation`](crate::Error::ScopeViolation) if the operands do not fit the
/// operation's signature in `region`.
pub fn create(
    graph: &mut Graph,
    region: RegionId,
    op: Operation,
    operands: &[Origin],
) -> Result<Vec<Origin>> {
    normalize::normalized_create(graph, region, op, operands)
}

/// Creates a simple node without consulting the normal forms.
pub(crate) fn create_node(
    graph: &mut Graph,
    region: RegionId,
    op: Operation,
    operands: &[Origin],
) -> Result<NodeId> {
    let input_types = op.argument_types();
    let output_types = op.result_types();
    graph.add_node(
        region,
        NodeKind::Simple(op),
        operands,
        &input_types,
        output_types,
    )
}

/// Creates a bitvector constant and returns its origin.
///
/// # Errors
///
/// Propagates wiring errors from node creation.
pub fn bit_constant(graph: &mut Graph, region: RegionId, width: u32, value: u64) -> Result<Origin> {
    let outputs = create(
        graph,
        region,
        Operation::Bit(BitOp::Constant { width, value }),
        &[],
    )?;
    Ok(outputs[0])
}

/// Creates a binary bitvector operation and returns its origin.
///
/// # Errors
///
/// Propagates wiring errors from node creation.
pub fn bit_binary(
    graph: &mut Graph,
    region: RegionId,
    kind: BitBinaryKind,
    width: u32,
    lhs: Origin,
    rhs: Origin,
) -> Result<Origin> {
    let outputs = create(
        graph,
        region,
        Operation::Bit(BitOp::Binary { kind, width }),
        &[lhs, rhs],
    )?;
    Ok(outputs[0])
}

/// Creates a constant control value selecting `alternative` out of `nalternatives`.
///
/// # Errors
///
/// Propagates wiring errors from node creation.
pub fn control_constant(
    graph: &mut Graph,
    region: RegionId,
    nalternatives: usize,
    alternative: usize,
) -> Result<Origin> {
    let outputs = create(
        graph,
        region,
        Operation::Control(ControlOp::Constant {
            nalternatives,
            alternative,
        }),
        &[],
    )?;
    Ok(outputs[0])
}

/// Creates a `match` predicate from a bitvector value.
///
/// `mapping` lists `(value, alternative)` pairs; unmatched values select
/// `default_alternative`. The result is a `ctl nalternatives` origin.
///
/// # Errors
///
/// Propagates wiring errors from node creation.
pub fn match_op(
    graph: &mut Graph,
    region: RegionId,
    nbits: u32,
    mut mapping: Vec<(u64, usize)>,
    default_alternative: usize,
    nalternatives: usize,
    operand: Origin,
) -> Result<Origin> {
    mapping.sort_unstable();
    let outputs = create(
        graph,
        region,
        Operation::Control(ControlOp::Match {
            nbits,
            mapping,
            default_alternative,
            nalternatives,
        }),
        &[operand],
    )?;
    Ok(outputs[0])
}
