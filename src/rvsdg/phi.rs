//! φ nodes: mutually recursive binding groups.
//!
//! A φ node owns one subregion holding λ and δ definitions that refer to each other
//! through recursion variables. Each recursion variable appears as an argument
//! inside the subregion and as an output outside; its result is wired to the
//! definition's output when the builder is finished.

use crate::rvsdg::graph::Graph;
use crate::rvsdg::node::{NodeId, NodeKind, Origin, RegionId};
use crate::types::Type;
use crate::{Error, Result};

/// Builder for a φ node.
///
/// Recursion variables must be declared before the definitions that use them;
/// [`PhiBuilder::end`] wires each variable to its definition and returns the
/// finished node.
#[derive(Debug)]
pub struct PhiBuilder {
    node: NodeId,
    recvar_types: Vec<Type>,
}

/// A recursion variable of a φ node under construction.
#[derive(Debug, Clone, Copy)]
pub struct RecVar {
    /// Index of the variable (equals the output index of the finished node)
    pub index: usize,
    /// The argument visible inside the subregion
    pub argument: Origin,
}

/// Handle to a finished φ node.
#[derive(Debug, Clone, Copy)]
pub struct PhiNode {
    node: NodeId,
}

impl PhiBuilder {
    /// Starts a φ node in `region`.
    ///
    /// # Errors
    ///
    /// Propagates wiring errors; creation itself cannot fail on a live region.
    pub fn begin(graph: &mut Graph, region: RegionId) -> Result<Self> {
        let node = graph.add_node(region, NodeKind::Phi, &[], &[], Vec::new())?;
        graph.add_subregion(node);
        Ok(Self {
            node,
            recvar_types: Vec::new(),
        })
    }

    /// Returns the subregion under construction.
    #[must_use]
    pub fn subregion(&self, graph: &Graph) -> RegionId {
        graph.node(self.node).subregions()[0]
    }

    /// Declares a recursion variable of the given type.
    pub fn add_recvar(&mut self, graph: &mut Graph, ty: Type) -> RecVar {
        let index = self.recvar_types.len();
        let subregion = self.subregion(graph);
        let argument = graph.add_argument(subregion, ty.clone(), None);
        graph.add_output(self.node, ty.clone());
        self.recvar_types.push(ty);
        RecVar { index, argument }
    }

    /// Routes an outer origin into the subregion as a context variable.
    ///
    /// # Errors
    ///
    /// Fails with the usual wiring errors if `origin` is not visible in the φ
    /// node's region.
    pub fn add_context_var(&self, graph: &mut Graph, origin: Origin) -> Result<Origin> {
        let ty = graph.origin_type(origin).clone();
        let input = graph.add_input(self.node, origin, ty.clone())?;
        let subregion = self.subregion(graph);
        Ok(graph.add_argument(subregion, ty, Some(input)))
    }

    /// Wires each recursion variable to its definition and finishes the node.
    ///
    /// `definitions[i]` must live in the subregion and match the type of
    /// recursion variable `i`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] on type disagreements and an `Unreachable`
    /// error when the definition count does not match the declared variables.
    pub fn end(self, graph: &mut Graph, definitions: &[Origin]) -> Result<PhiNode> {
        if definitions.len() != self.recvar_types.len() {
            return Err(unreachable_error!(
                "phi with {} recursion variables got {} definitions",
                self.recvar_types.len(),
                definitions.len()
            ));
        }
        let subregion = self.subregion(graph);
        for (index, (origin, ty)) in definitions.iter().zip(&self.recvar_types).enumerate() {
            let found = graph.origin_type(*origin);
            if found != ty {
                return Err(Error::TypeMismatch {
                    expected: ty.to_string(),
                    found: found.to_string(),
                });
            }
            graph.add_result(subregion, *origin, Some(index))?;
        }
        Ok(PhiNode { node: self.node })
    }
}

impl PhiNode {
    /// Reconstructs a handle from a node ID, if the node is a φ.
    #[must_use]
    pub fn from_node(graph: &Graph, node: NodeId) -> Option<Self> {
        matches!(graph.node(node).kind(), NodeKind::Phi).then_some(Self { node })
    }

    /// Returns the underlying node ID.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Returns the subregion holding the definitions.
    #[must_use]
    pub fn subregion(&self, graph: &Graph) -> RegionId {
        graph.node(self.node).subregions()[0]
    }

    /// Returns the outer output of recursion variable `index`.
    #[must_use]
    pub fn output(&self, index: usize) -> Origin {
        Origin::Output(self.node, index)
    }

    /// Returns the number of recursion variables.
    #[must_use]
    pub fn nrecvars(&self, graph: &Graph) -> usize {
        graph.node(self.node).noutputs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rvsdg::lambda::LambdaNode;
    use crate::types::{FunctionType, Linkage};

    #[test]
    fn test_phi_self_recursive_function() {
        let mut graph = Graph::new();
        let root = graph.root();
        let ty = FunctionType::new(vec![Type::Bit(32)], vec![Type::Bit(32)]);
        let fn_ty = Type::Function(Box::new(ty.clone()));

        let mut builder = PhiBuilder::begin(&mut graph, root).unwrap();
        let rec = builder.add_recvar(&mut graph, fn_ty.clone());
        let inner = builder.subregion(&graph);

        let lambda = LambdaNode::create(&mut graph, inner, ty, "f", Linkage::Internal).unwrap();
        // The function captures its own recursion variable.
        lambda.add_context_var(&mut graph, rec.argument).unwrap();
        let x = lambda.argument(&graph, 0);
        let output = lambda.finalize(&mut graph, &[x]).unwrap();

        let phi = builder.end(&mut graph, &[output]).unwrap();
        graph.add_export(phi.output(0), "f").unwrap();
        graph.verify().unwrap();
        assert_eq!(phi.nrecvars(&graph), 1);
        assert_eq!(graph.origin_type(phi.output(0)), &fn_ty);
    }
}
