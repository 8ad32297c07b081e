//! δ nodes: global definitions.
//!
//! A δ node owns one subregion computing the global's initial value. Context
//! variables route other globals and functions into the initializer. The node's
//! single output is a pointer to the global's storage.

use crate::rvsdg::graph::Graph;
use crate::rvsdg::node::{DeltaSig, NodeId, NodeKind, Origin, RegionId};
use crate::types::{Linkage, Type};
use crate::{Error, Result};

/// Handle to a δ node.
#[derive(Debug, Clone, Copy)]
pub struct DeltaNode {
    node: NodeId,
}

impl DeltaNode {
    /// Creates a δ node defining the global `name` of type `value_type`.
    ///
    /// # Errors
    ///
    /// Propagates wiring errors; creation itself cannot fail on a live region.
    pub fn create(
        graph: &mut Graph,
        region: RegionId,
        value_type: Type,
        name: &str,
        linkage: Linkage,
        constant: bool,
    ) -> Result<Self> {
        let node = graph.add_node(
            region,
            NodeKind::Delta(DeltaSig {
                name: name.to_string(),
                value_type,
                linkage,
                constant,
            }),
            &[],
            &[],
            Vec::new(),
        )?;
        graph.add_subregion(node);
        Ok(Self { node })
    }

    /// Reconstructs a handle from a node ID, if the node is a δ.
    #[must_use]
    pub fn from_node(graph: &Graph, node: NodeId) -> Option<Self> {
        matches!(graph.node(node).kind(), NodeKind::Delta(_)).then_some(Self { node })
    }

    /// Returns the underlying node ID.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Returns the initializer subregion.
    #[must_use]
    pub fn subregion(&self, graph: &Graph) -> RegionId {
        graph.node(self.node).subregions()[0]
    }

    /// Returns the identity of this global.
    ///
    /// # Panics
    ///
    /// Panics if the node is not a δ (cannot happen through this handle).
    #[must_use]
    pub fn sig<'a>(&self, graph: &'a Graph) -> &'a DeltaSig {
        match graph.node(self.node).kind() {
            NodeKind::Delta(sig) => sig,
            _ => panic!("delta handle on non-delta node"),
        }
    }

    /// Routes an outer origin into the initializer as a context variable.
    ///
    /// # Errors
    ///
    /// Fails with the usual wiring errors if `origin` is not visible in the δ
    /// node's region.
    pub fn add_context_var(&self, graph: &mut Graph, origin: Origin) -> Result<Origin> {
        let ty = graph.origin_type(origin).clone();
        let input = graph.add_input(self.node, origin, ty.clone())?;
        let subregion = self.subregion(graph);
        Ok(graph.add_argument(subregion, ty, Some(input)))
    }

    /// Wires the initializer result and exposes the pointer output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if `value` does not match the declared
    /// value type, or an `Unreachable` error on double finalization.
    pub fn finalize(&self, graph: &mut Graph, value: Origin) -> Result<Origin> {
        if graph.node(self.node).noutputs() != 0 {
            return Err(unreachable_error!("delta finalized twice"));
        }
        let expected = self.sig(graph).value_type.clone();
        let found = graph.origin_type(value);
        if *found != expected {
            return Err(Error::TypeMismatch {
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }
        let subregion = self.subregion(graph);
        graph.add_result(subregion, value, Some(0))?;
        let output = graph.add_output(self.node, Type::Pointer);
        Ok(Origin::Output(self.node, output))
    }

    /// Returns the pointer output of a finalized δ.
    #[must_use]
    pub fn output(&self) -> Origin {
        Origin::Output(self.node, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rvsdg::simple;

    #[test]
    fn test_delta_constant_global() {
        let mut graph = Graph::new();
        let root = graph.root();
        let delta = DeltaNode::create(
            &mut graph,
            root,
            Type::Bit(32),
            "answer",
            Linkage::Internal,
            true,
        )
        .unwrap();
        let delta_region = delta.subregion(&graph);
        let value = simple::bit_constant(&mut graph, delta_region, 32, 42).unwrap();
        let pointer = delta.finalize(&mut graph, value).unwrap();
        graph.add_export(pointer, "answer").unwrap();
        graph.verify().unwrap();
        assert_eq!(graph.origin_type(pointer), &Type::Pointer);
        assert!(delta.sig(&graph).constant);
    }

    #[test]
    fn test_delta_rejects_wrong_initializer() {
        let mut graph = Graph::new();
        let root = graph.root();
        let delta = DeltaNode::create(
            &mut graph,
            root,
            Type::Bit(32),
            "g",
            Linkage::External,
            false,
        )
        .unwrap();
        let delta_region = delta.subregion(&graph);
        let wide = simple::bit_constant(&mut graph, delta_region, 64, 0).unwrap();
        assert!(matches!(
            delta.finalize(&mut graph, wide),
            Err(Error::TypeMismatch { .. })
        ));
    }
}
