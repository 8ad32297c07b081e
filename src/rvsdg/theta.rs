//! θ nodes: tail-controlled loops.
//!
//! A θ node owns exactly one subregion. Every loop variable has an outer input
//! (initial value), an inner argument (value at iteration entry), an inner result
//! (value at iteration exit), and an outer output (final value). Result 0 of the
//! subregion is the predicate, a `ctl2` value selecting continue (1) or exit (0).
//!
//! Evaluation repeats the subregion, feeding the previous iteration's results back
//! into the arguments, until the predicate selects 0; the outputs then carry the
//! final results. The region back edge runs through the result/argument pair, so
//! the node graph inside the subregion stays acyclic.

use crate::rvsdg::graph::Graph;
use crate::rvsdg::node::{NodeId, NodeKind, Origin, RegionId};
use crate::rvsdg::simple;
use crate::{Error, Result};

/// Handle to a θ node.
#[derive(Debug, Clone, Copy)]
pub struct ThetaNode {
    node: NodeId,
}

/// A loop variable of a θ node.
#[derive(Debug, Clone, Copy)]
pub struct LoopVar {
    /// Index of the outer input carrying the initial value
    pub input: usize,
    /// The inner argument holding the value at iteration entry
    pub argument: Origin,
    /// Index of the subregion result fed back into the argument
    pub result: usize,
    /// The outer output carrying the final value
    pub output: Origin,
}

impl ThetaNode {
    /// Creates a θ node in `region` with an empty body.
    ///
    /// The predicate is initialized to the constant `ctl2(0)` (exit immediately);
    /// use [`ThetaNode::set_predicate`] to install the real test.
    ///
    /// # Errors
    ///
    /// Propagates wiring errors from creating the initial predicate.
    pub fn create(graph: &mut Graph, region: RegionId) -> Result<Self> {
        let node = graph.add_node(region, NodeKind::Theta, &[], &[], Vec::new())?;
        let subregion = graph.add_subregion(node);
        let predicate = simple::control_constant(graph, subregion, 2, 0)?;
        graph.add_result(subregion, predicate, None)?;
        Ok(Self { node })
    }

    /// Reconstructs a handle from a node ID, if the node is a θ.
    #[must_use]
    pub fn from_node(graph: &Graph, node: NodeId) -> Option<Self> {
        matches!(graph.node(node).kind(), NodeKind::Theta).then_some(Self { node })
    }

    /// Returns the underlying node ID.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Returns the loop body subregion.
    #[must_use]
    pub fn subregion(&self, graph: &Graph) -> RegionId {
        graph.node(self.node).subregions()[0]
    }

    /// Returns the origin currently feeding the predicate result.
    #[must_use]
    pub fn predicate(&self, graph: &Graph) -> Origin {
        graph.result_origin(self.subregion(graph), 0)
    }

    /// Installs the loop predicate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedOperation`] if `origin` is a control value with
    /// more than two alternatives (non-binary θ predicates have no semantics
    /// here), and the usual wiring errors otherwise.
    pub fn set_predicate(&self, graph: &mut Graph, origin: Origin) -> Result<()> {
        if let Some(k) = graph.origin_type(origin).nalternatives() {
            if k != 2 {
                return Err(Error::UnsupportedOperation(format!(
                    "theta predicate with {k} alternatives"
                )));
            }
        }
        graph.redirect_result(self.subregion(graph), 0, origin)
    }

    /// Adds a loop variable with initial value `origin`.
    ///
    /// The variable's result initially feeds the argument straight back
    /// (loop-invariant routing); use [`ThetaNode::set_loop_var_result`] to install
    /// the iteration update.
    ///
    /// # Errors
    ///
    /// Fails with the usual wiring errors if `origin` is not visible in the θ
    /// node's region.
    pub fn add_loop_var(&self, graph: &mut Graph, origin: Origin) -> Result<LoopVar> {
        let ty = graph.origin_type(origin).clone();
        let subregion = self.subregion(graph);
        let input = graph.add_input(self.node, origin, ty.clone())?;
        let argument = graph.add_argument(subregion, ty.clone(), Some(input));
        let output = graph.add_output(self.node, ty);
        let result = graph.add_result(subregion, argument, Some(output))?;
        Ok(LoopVar {
            input,
            argument,
            result,
            output: Origin::Output(self.node, output),
        })
    }

    /// Installs the iteration update of a loop variable.
    ///
    /// # Errors
    ///
    /// Propagates wiring errors from redirecting the result.
    pub fn set_loop_var_result(
        &self,
        graph: &mut Graph,
        var: &LoopVar,
        origin: Origin,
    ) -> Result<()> {
        graph.redirect_result(self.subregion(graph), var.result, origin)
    }

    /// Returns the number of loop variables.
    #[must_use]
    pub fn nloop_vars(&self, graph: &Graph) -> usize {
        graph.node(self.node).ninputs()
    }

    /// Returns loop variable `index`.
    ///
    /// Loop variable `i` corresponds to input `i`, argument `i`, result `i + 1`
    /// (result 0 is the predicate), and output `i`.
    #[must_use]
    pub fn loop_var(&self, graph: &Graph, index: usize) -> LoopVar {
        LoopVar {
            input: index,
            argument: Origin::Argument(self.subregion(graph), index),
            result: index + 1,
            output: Origin::Output(self.node, index),
        }
    }
}

/// Returns the state type check used when routing values through a θ.
///
/// State-typed loop variables are the mechanism the encoder uses to thread
/// per-partition memory states through loops.
#[must_use]
pub fn is_state_loop_var(graph: &Graph, var: &LoopVar) -> bool {
    match var.argument {
        Origin::Argument(region, index) => graph
            .region(region)
            .argument(index)
            .map(|a| a.ty().is_state())
            .unwrap_or(false),
        Origin::Output(..) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rvsdg::operation::{BitBinaryKind, BitCompareKind, BitOp, Operation};
    use crate::types::Type;

    #[test]
    fn test_theta_counts_to_limit() {
        let mut graph = Graph::new();
        let root = graph.root();
        let limit = graph.add_import(Type::Bit(32), "limit");

        let theta = ThetaNode::create(&mut graph, root).unwrap();
        let body = theta.subregion(&graph);

        let n = theta.add_loop_var(&mut graph, limit).unwrap();

        let one = simple::bit_constant(&mut graph, body, 32, 1).unwrap();
        let next = simple::bit_binary(
            &mut graph,
            body,
            BitBinaryKind::Sub,
            32,
            n.argument,
            one,
        )
        .unwrap();
        theta.set_loop_var_result(&mut graph, &n, next).unwrap();

        let stop = simple::create(
            &mut graph,
            body,
            Operation::Bit(BitOp::Compare {
                kind: BitCompareKind::Ne,
                width: 32,
            }),
            &[next, one],
        )
        .unwrap()[0];
        let predicate =
            simple::match_op(&mut graph, body, 1, vec![(1, 1)], 0, 2, stop).unwrap();
        theta.set_predicate(&mut graph, predicate).unwrap();

        graph.add_export(n.output, "n").unwrap();
        graph.verify().unwrap();

        assert_eq!(theta.nloop_vars(&graph), 1);
        assert_eq!(theta.predicate(&graph), predicate);
        let lv = theta.loop_var(&graph, 0);
        assert_eq!(lv.input, 0);
        assert_eq!(lv.result, 1);
    }

    #[test]
    fn test_theta_rejects_wide_predicate() {
        let mut graph = Graph::new();
        let root = graph.root();
        let theta = ThetaNode::create(&mut graph, root).unwrap();
        let body = theta.subregion(&graph);
        let wide = simple::control_constant(&mut graph, body, 3, 1).unwrap();
        assert!(matches!(
            theta.set_predicate(&mut graph, wide),
            Err(Error::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_loop_var_defaults_to_invariant_routing() {
        let mut graph = Graph::new();
        let root = graph.root();
        let x = graph.add_import(Type::Bit(64), "x");
        let theta = ThetaNode::create(&mut graph, root).unwrap();
        let lv = theta.add_loop_var(&mut graph, x).unwrap();
        let body = theta.subregion(&graph);
        assert_eq!(graph.result_origin(body, lv.result), lv.argument);
    }
}
