//! Normal form of binary operations and their flattened n-ary form.
//!
//! The rules run in a fixed canonical order: **flatten**, then **reorder**, then
//! **pairwise reduction** (constants folded last), then distribution/factorization
//! when enabled. The order matters for confluence and is part of the engine's
//! contract.
//!
//! Flattening rewrites nested associative applications (`add(add(a, b), c)`) into
//! one n-ary node; [`reduce_flattened`] lowers the n-ary form back to a tree, either
//! as a left-leaning chain (`Linear`) or as a balanced reduction (`Parallel`).
//!
//! `DISTRIBUTE` and `FACTORIZE` are inverses; enabling both at once does not
//! reach a fixed point.

use crate::normalize::NormFlags;
use crate::rvsdg::graph::Graph;
use crate::rvsdg::node::{NodeId, Origin, RegionId};
use crate::rvsdg::operation::{BinopReduction, BitBinaryKind, BitOp, OpClass, Operation};
use crate::rvsdg::simple;
use crate::Result;

/// How [`reduce_flattened`] lowers an n-ary node back to binary applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlattenedReduction {
    /// Left-leaning chain: `((a ⊕ b) ⊕ c) ⊕ d`
    Linear,
    /// Balanced tree: `(a ⊕ b) ⊕ (c ⊕ d)`
    Parallel,
}

/// Returns the constant value of the node feeding `origin`, if it is a bit constant.
fn const_of(graph: &Graph, origin: Origin) -> Option<u64> {
    let Origin::Output(node, 0) = origin else {
        return None;
    };
    graph.node(node).operation()?.bit_constant().map(|(_, v)| v)
}

/// Returns the operand list behind `origin` if it is produced by the same
/// associative operation (binary or flattened).
fn expandable_operands(
    graph: &Graph,
    origin: Origin,
    kind: BitBinaryKind,
    width: u32,
) -> Option<Vec<Origin>> {
    let Origin::Output(node, 0) = origin else {
        return None;
    };
    let op = graph.node(node).operation()?;
    let matches = match op {
        Operation::Bit(BitOp::Binary { kind: k, width: w }) => *k == kind && *w == width,
        Operation::Bit(BitOp::Flattened { kind: k, width: w, .. }) => *k == kind && *w == width,
        _ => false,
    };
    if !matches {
        return None;
    }
    Some(
        graph
            .node(node)
            .inputs()
            .iter()
            .map(|input| input.origin())
            .collect(),
    )
}

/// Applies one reduction path to an operand pair, returning the replacement origin.
fn reduce_pair(
    graph: &mut Graph,
    region: RegionId,
    kind: BitBinaryKind,
    width: u32,
    path: BinopReduction,
    lhs: Origin,
    rhs: Origin,
) -> Result<Origin> {
    match path {
        BinopReduction::Constants => {
            let a = const_of(graph, lhs)
                .ok_or_else(|| unreachable_error!("constant path without constant lhs"))?;
            let b = const_of(graph, rhs)
                .ok_or_else(|| unreachable_error!("constant path without constant rhs"))?;
            simple::bit_constant(graph, region, width, kind.apply(width, a, b))
        }
        BinopReduction::Merge => match kind.self_pair() {
            Some(true) => Ok(lhs),
            Some(false) => simple::bit_constant(graph, region, width, 0),
            None => Err(unreachable_error!("merge path on non-mergeable operation")),
        },
        BinopReduction::LNeutral => Ok(rhs),
        BinopReduction::RNeutral => Ok(lhs),
        BinopReduction::None
        | BinopReduction::LFold
        | BinopReduction::RFold
        | BinopReduction::Factor => Err(unreachable_error!(
            "reduction path {path:?} is not produced by can_reduce"
        )),
    }
}

/// The `normalized_create` half of the binary normal form.
///
/// When the operand pair reduces, returns the replacement origin instead of
/// letting a node be created.
pub(crate) fn try_create_reduction(
    graph: &mut Graph,
    region: RegionId,
    op: &Operation,
    operands: &[Origin],
) -> Result<Option<Origin>> {
    let Some((kind, width)) = op.bit_binary() else {
        return Ok(None);
    };
    if operands.len() != 2 {
        return Ok(None);
    }
    let (lhs, rhs) = (operands[0], operands[1]);
    let path = kind.can_reduce(
        width,
        const_of(graph, lhs),
        const_of(graph, rhs),
        lhs == rhs,
    );
    if path == BinopReduction::None {
        return Ok(None);
    }
    reduce_pair(graph, region, kind, width, path, lhs, rhs).map(Some)
}

/// The `normalize_node` half of the binary normal form.
pub(crate) fn normalize_node(graph: &mut Graph, node: NodeId) -> bool {
    if graph.node(node).is_dead() {
        return false;
    }
    let Some((kind, width)) = graph.node(node).operation().and_then(Operation::bit_binary)
    else {
        return false;
    };
    let region = graph.node(node).region();
    let lhs = graph.input_origin(node, 0);
    let rhs = graph.input_origin(node, 1);
    let forms = graph.normal_forms();
    let flatten = forms.enabled(OpClass::Binary, NormFlags::FLATTEN);
    let reorder = forms.enabled(OpClass::Binary, NormFlags::REORDER);
    let reducible = forms.enabled(OpClass::Binary, NormFlags::REDUCIBLE);
    let distribute = forms.enabled(OpClass::Binary, NormFlags::DISTRIBUTE);
    let factorize = forms.enabled(OpClass::Binary, NormFlags::FACTORIZE);

    if flatten && kind.is_associative() {
        let left = expandable_operands(graph, lhs, kind, width);
        let right = expandable_operands(graph, rhs, kind, width);
        if left.is_some() || right.is_some() {
            let mut operands = left.unwrap_or_else(|| vec![lhs]);
            operands.extend(right.unwrap_or_else(|| vec![rhs]));
            return replace_with_flattened(graph, node, region, kind, width, operands)
                .unwrap_or(false);
        }
    }

    if reorder && kind.is_commutative() && rhs < lhs {
        let rule = |graph: &mut Graph| -> Result<bool> {
            let op = Operation::Bit(BitOp::Binary { kind, width });
            let outputs = simple::create(graph, region, op, &[rhs, lhs])?;
            graph.divert_users(Origin::Output(node, 0), outputs[0])?;
            Ok(true)
        };
        return rule(graph).unwrap_or(false);
    }

    if reducible {
        let path = kind.can_reduce(
            width,
            const_of(graph, lhs),
            const_of(graph, rhs),
            lhs == rhs,
        );
        if path != BinopReduction::None {
            let rule = |graph: &mut Graph| -> Result<bool> {
                let replacement = reduce_pair(graph, region, kind, width, path, lhs, rhs)?;
                graph.divert_users(Origin::Output(node, 0), replacement)?;
                Ok(true)
            };
            return rule(graph).unwrap_or(false);
        }
    }

    if distribute && kind == BitBinaryKind::Mul {
        if let Some(fired) = try_distribute(graph, node, region, width, lhs, rhs) {
            return fired;
        }
    }

    if factorize && kind == BitBinaryKind::Add {
        if let Some(fired) = try_factorize(graph, node, region, width, lhs, rhs) {
            return fired;
        }
    }

    false
}

fn replace_with_flattened(
    graph: &mut Graph,
    node: NodeId,
    region: RegionId,
    kind: BitBinaryKind,
    width: u32,
    operands: Vec<Origin>,
) -> Result<bool> {
    let op = Operation::Bit(BitOp::Flattened {
        kind,
        width,
        arity: operands.len(),
    });
    let flattened = simple::create_node(graph, region, op, &operands)?;
    graph.divert_users(Origin::Output(node, 0), Origin::Output(flattened, 0))?;
    log::trace!("flattened {node} into {flattened}");
    Ok(true)
}

/// `x * (a + b)` → `x*a + x*b` (and the mirrored form).
fn try_distribute(
    graph: &mut Graph,
    node: NodeId,
    region: RegionId,
    width: u32,
    lhs: Origin,
    rhs: Origin,
) -> Option<bool> {
    let sum_operands = |graph: &Graph, origin: Origin| {
        expandable_operands(graph, origin, BitBinaryKind::Add, width)
            .filter(|operands| operands.len() == 2)
    };
    let (factor, addends) = if let Some(addends) = sum_operands(graph, rhs) {
        (lhs, addends)
    } else if let Some(addends) = sum_operands(graph, lhs) {
        (rhs, addends)
    } else {
        return None;
    };
    let rule = |graph: &mut Graph| -> Result<bool> {
        let left = simple::bit_binary(graph, region, BitBinaryKind::Mul, width, factor, addends[0])?;
        let right =
            simple::bit_binary(graph, region, BitBinaryKind::Mul, width, factor, addends[1])?;
        let sum = simple::bit_binary(graph, region, BitBinaryKind::Add, width, left, right)?;
        graph.divert_users(Origin::Output(node, 0), sum)?;
        Ok(true)
    };
    Some(rule(graph).unwrap_or(false))
}

/// `x*a + x*b` → `x * (a + b)`.
fn try_factorize(
    graph: &mut Graph,
    node: NodeId,
    region: RegionId,
    width: u32,
    lhs: Origin,
    rhs: Origin,
) -> Option<bool> {
    let product = |graph: &Graph, origin: Origin| {
        expandable_operands(graph, origin, BitBinaryKind::Mul, width)
            .filter(|operands| operands.len() == 2)
    };
    let left = product(graph, lhs)?;
    let right = product(graph, rhs)?;
    let common = left
        .iter()
        .find(|candidate| right.contains(candidate))
        .copied()?;
    let other = |operands: &[Origin]| {
        if operands[0] == common {
            operands[1]
        } else {
            operands[0]
        }
    };
    let (a, b) = (other(&left), other(&right));
    let rule = |graph: &mut Graph| -> Result<bool> {
        let sum = simple::bit_binary(graph, region, BitBinaryKind::Add, width, a, b)?;
        let factored = simple::bit_binary(graph, region, BitBinaryKind::Mul, width, common, sum)?;
        graph.divert_users(Origin::Output(node, 0), factored)?;
        Ok(true)
    };
    Some(rule(graph).unwrap_or(false))
}

/// The `normalize_node` half of the flattened-binary normal form.
///
/// Nested flattened or binary applications of the same operation are absorbed so
/// one node carries the whole operand list.
pub(crate) fn normalize_flattened(graph: &mut Graph, node: NodeId) -> bool {
    if graph.node(node).is_dead() {
        return false;
    }
    let Some(Operation::Bit(BitOp::Flattened { kind, width, .. })) =
        graph.node(node).operation().cloned()
    else {
        return false;
    };
    if !graph
        .normal_forms()
        .enabled(OpClass::Binary, NormFlags::FLATTEN)
    {
        return false;
    }
    let region = graph.node(node).region();
    let operands: Vec<Origin> = graph
        .node(node)
        .inputs()
        .iter()
        .map(|input| input.origin())
        .collect();
    if !operands
        .iter()
        .any(|o| expandable_operands(graph, *o, kind, width).is_some())
    {
        return false;
    }
    let mut expanded = Vec::with_capacity(operands.len());
    for operand in operands {
        match expandable_operands(graph, operand, kind, width) {
            Some(inner) => expanded.extend(inner),
            None => expanded.push(operand),
        }
    }
    replace_with_flattened(graph, node, region, kind, width, expanded).unwrap_or(false)
}

/// Lowers every flattened node in `region` (and its subregions) back to a tree of
/// binary applications.
///
/// Returns the number of nodes lowered. Callers usually disable the `FLATTEN`
/// flag first and run [`Graph::prune`](crate::rvsdg::Graph::prune) afterwards.
///
/// # Errors
///
/// Propagates wiring errors; these indicate a malformed graph.
pub fn reduce_flattened(
    graph: &mut Graph,
    region: RegionId,
    reduction: FlattenedReduction,
) -> Result<usize> {
    let mut lowered = 0;
    for subregion in collect_regions(graph, region) {
        for node in graph.topological_order(subregion) {
            if !graph.is_alive(node) {
                continue;
            }
            let Some(Operation::Bit(BitOp::Flattened { kind, width, .. })) =
                graph.node(node).operation().cloned()
            else {
                continue;
            };
            let operands: Vec<Origin> = graph
                .node(node)
                .inputs()
                .iter()
                .map(|input| input.origin())
                .collect();
            let replacement = match reduction {
                FlattenedReduction::Linear => {
                    lower_linear(graph, subregion, kind, width, &operands)?
                }
                FlattenedReduction::Parallel => {
                    lower_parallel(graph, subregion, kind, width, operands)?
                }
            };
            graph.divert_users(Origin::Output(node, 0), replacement)?;
            lowered += 1;
        }
    }
    Ok(lowered)
}

fn collect_regions(graph: &Graph, region: RegionId) -> Vec<RegionId> {
    let mut order = Vec::new();
    let mut stack = vec![region];
    while let Some(current) = stack.pop() {
        order.push(current);
        for &node in graph.region(current).nodes() {
            stack.extend(graph.node(node).subregions().iter().copied());
        }
    }
    order
}

fn lower_linear(
    graph: &mut Graph,
    region: RegionId,
    kind: BitBinaryKind,
    width: u32,
    operands: &[Origin],
) -> Result<Origin> {
    let op = Operation::Bit(BitOp::Binary { kind, width });
    let mut accumulator = operands[0];
    for &operand in &operands[1..] {
        let node = simple::create_node(graph, region, op.clone(), &[accumulator, operand])?;
        accumulator = Origin::Output(node, 0);
    }
    Ok(accumulator)
}

fn lower_parallel(
    graph: &mut Graph,
    region: RegionId,
    kind: BitBinaryKind,
    width: u32,
    mut operands: Vec<Origin>,
) -> Result<Origin> {
    let op = Operation::Bit(BitOp::Binary { kind, width });
    while operands.len() > 1 {
        let mut next = Vec::with_capacity(operands.len() / 2 + 1);
        for pair in operands.chunks(2) {
            if pair.len() == 2 {
                let node = simple::create_node(graph, region, op.clone(), &[pair[0], pair[1]])?;
                next.push(Origin::Output(node, 0));
            } else {
                next.push(pair[0]);
            }
        }
        operands = next;
    }
    Ok(operands[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    fn setup() -> (Graph, RegionId) {
        let graph = Graph::new();
        let root = graph.root();
        (graph, root)
    }

    #[test]
    fn test_add_zero_is_identity() {
        let (mut graph, root) = setup();
        let x = graph.add_import(Type::Bit(32), "x");
        let zero = simple::bit_constant(&mut graph, root, 32, 0).unwrap();
        let sum = simple::bit_binary(&mut graph, root, BitBinaryKind::Add, 32, x, zero).unwrap();
        assert_eq!(sum, x);
    }

    #[test]
    fn test_mul_one_is_identity() {
        let (mut graph, root) = setup();
        let x = graph.add_import(Type::Bit(32), "x");
        let one = simple::bit_constant(&mut graph, root, 32, 1).unwrap();
        let product =
            simple::bit_binary(&mut graph, root, BitBinaryKind::Mul, 32, one, x).unwrap();
        assert_eq!(product, x);
    }

    #[test]
    fn test_xor_self_is_zero() {
        let (mut graph, root) = setup();
        let x = graph.add_import(Type::Bit(32), "x");
        let result = simple::bit_binary(&mut graph, root, BitBinaryKind::Xor, 32, x, x).unwrap();
        let zero = simple::bit_constant(&mut graph, root, 32, 0).unwrap();
        assert_eq!(result, zero);
    }

    #[test]
    fn test_and_self_is_self() {
        let (mut graph, root) = setup();
        let x = graph.add_import(Type::Bit(32), "x");
        let result = simple::bit_binary(&mut graph, root, BitBinaryKind::And, 32, x, x).unwrap();
        assert_eq!(result, x);
    }

    #[test]
    fn test_constant_folding_wraps() {
        let (mut graph, root) = setup();
        let a = simple::bit_constant(&mut graph, root, 8, 250).unwrap();
        let b = simple::bit_constant(&mut graph, root, 8, 10).unwrap();
        let sum = simple::bit_binary(&mut graph, root, BitBinaryKind::Add, 8, a, b).unwrap();
        let expected = simple::bit_constant(&mut graph, root, 8, 4).unwrap();
        assert_eq!(sum, expected);
    }

    #[test]
    fn test_flatten_unflatten_is_involutive() {
        let (mut graph, root) = setup();
        graph
            .normal_forms_mut()
            .set_flag(OpClass::Binary, NormFlags::FLATTEN, true);
        let a = graph.add_import(Type::Bit(32), "a");
        let b = graph.add_import(Type::Bit(32), "b");
        let c = graph.add_import(Type::Bit(32), "c");
        let ab = simple::bit_binary(&mut graph, root, BitBinaryKind::Add, 32, a, b).unwrap();
        let abc = simple::bit_binary(&mut graph, root, BitBinaryKind::Add, 32, ab, c).unwrap();
        graph.add_export(abc, "sum").unwrap();
        graph.normalize();
        graph.prune();
        let flattened = crate::rvsdg::view::view(&graph);

        // Lower to a linear chain, then flatten again; the views must agree.
        graph
            .normal_forms_mut()
            .set_flag(OpClass::Binary, NormFlags::FLATTEN, false);
        reduce_flattened(&mut graph, root, FlattenedReduction::Linear).unwrap();
        graph.prune();
        graph
            .normal_forms_mut()
            .set_flag(OpClass::Binary, NormFlags::FLATTEN, true);
        graph.normalize();
        graph.prune();
        assert_eq!(crate::rvsdg::view::view(&graph), flattened);
    }

    #[test]
    fn test_distribute_mul_over_add() {
        let (mut graph, root) = setup();
        graph
            .normal_forms_mut()
            .set_flag(OpClass::Binary, NormFlags::DISTRIBUTE, true);
        let x = graph.add_import(Type::Bit(32), "x");
        let a = graph.add_import(Type::Bit(32), "a");
        let b = graph.add_import(Type::Bit(32), "b");
        let sum = simple::bit_binary(&mut graph, root, BitBinaryKind::Add, 32, a, b).unwrap();
        let product =
            simple::bit_binary(&mut graph, root, BitBinaryKind::Mul, 32, x, sum).unwrap();
        graph.add_export(product, "r").unwrap();
        graph.normalize();
        graph.prune();
        // The exported origin is now an addition of two products.
        let root_region = graph.region(root);
        let exported = root_region.results()[0].origin();
        let Origin::Output(top, 0) = exported else {
            panic!("expected a node output");
        };
        assert_eq!(
            graph.node(top).operation().and_then(Operation::bit_binary),
            Some((BitBinaryKind::Add, 32))
        );
    }
}
