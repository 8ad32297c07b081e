//! λ nodes: function definitions.
//!
//! A λ node owns one subregion holding the function body. The subregion's leading
//! arguments are the function parameters; context variables (captured outer values)
//! are routed in behind them. Finalizing the node wires the body's results and
//! exposes a single function-typed output.

use crate::rvsdg::graph::Graph;
use crate::rvsdg::node::{LambdaSig, NodeId, NodeKind, Origin, RegionId};
use crate::types::{FunctionType, Linkage, Type};
use crate::{Error, Result};

/// Handle to a λ node.
#[derive(Debug, Clone, Copy)]
pub struct LambdaNode {
    node: NodeId,
}

impl LambdaNode {
    /// Creates a λ node defining `name` with the given signature.
    ///
    /// # Errors
    ///
    /// Propagates wiring errors; creation itself cannot fail on a live region.
    pub fn create(
        graph: &mut Graph,
        region: RegionId,
        ty: FunctionType,
        name: &str,
        linkage: Linkage,
    ) -> Result<Self> {
        let node = graph.add_node(
            region,
            NodeKind::Lambda(LambdaSig {
                name: name.to_string(),
                ty: ty.clone(),
                linkage,
            }),
            &[],
            &[],
            Vec::new(),
        )?;
        let subregion = graph.add_subregion(node);
        for parameter in ty.parameters() {
            graph.add_argument(subregion, parameter.clone(), None);
        }
        Ok(Self { node })
    }

    /// Reconstructs a handle from a node ID, if the node is a λ.
    #[must_use]
    pub fn from_node(graph: &Graph, node: NodeId) -> Option<Self> {
        matches!(graph.node(node).kind(), NodeKind::Lambda(_)).then_some(Self { node })
    }

    /// Returns the underlying node ID.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Returns the body subregion.
    #[must_use]
    pub fn subregion(&self, graph: &Graph) -> RegionId {
        graph.node(self.node).subregions()[0]
    }

    /// Returns the signature of this function.
    ///
    /// # Panics
    ///
    /// Panics if the node is not a λ (cannot happen through this handle).
    #[must_use]
    pub fn sig<'a>(&self, graph: &'a Graph) -> &'a LambdaSig {
        match graph.node(self.node).kind() {
            NodeKind::Lambda(sig) => sig,
            _ => panic!("lambda handle on non-lambda node"),
        }
    }

    /// Returns the number of function parameters.
    #[must_use]
    pub fn nparameters(&self, graph: &Graph) -> usize {
        self.sig(graph).ty.parameters().len()
    }

    /// Returns function parameter `index` as an origin inside the body.
    #[must_use]
    pub fn argument(&self, graph: &Graph, index: usize) -> Origin {
        Origin::Argument(self.subregion(graph), index)
    }

    /// Routes an outer origin into the body as a context variable.
    ///
    /// # Errors
    ///
    /// Fails with the usual wiring errors if `origin` is not visible in the λ
    /// node's region.
    pub fn add_context_var(&self, graph: &mut Graph, origin: Origin) -> Result<Origin> {
        let ty = graph.origin_type(origin).clone();
        let input = graph.add_input(self.node, origin, ty.clone())?;
        let subregion = self.subregion(graph);
        Ok(graph.add_argument(subregion, ty, Some(input)))
    }

    /// Wires the body results and exposes the function-typed output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if the result origins do not match the
    /// signature, or an `Unreachable` error on double finalization or a result
    /// count mismatch.
    pub fn finalize(&self, graph: &mut Graph, results: &[Origin]) -> Result<Origin> {
        if graph.node(self.node).noutputs() != 0 {
            return Err(unreachable_error!("lambda finalized twice"));
        }
        let ty = self.sig(graph).ty.clone();
        if results.len() != ty.results().len() {
            return Err(unreachable_error!(
                "lambda expects {} results, got {}",
                ty.results().len(),
                results.len()
            ));
        }
        let subregion = self.subregion(graph);
        for (origin, expected) in results.iter().zip(ty.results()) {
            let found = graph.origin_type(*origin);
            if found != expected {
                return Err(Error::TypeMismatch {
                    expected: expected.to_string(),
                    found: found.to_string(),
                });
            }
            graph.add_result(subregion, *origin, Some(0))?;
        }
        let output = graph.add_output(self.node, Type::Function(Box::new(ty)));
        Ok(Origin::Output(self.node, output))
    }

    /// Returns the function-typed output of a finalized λ.
    #[must_use]
    pub fn output(&self) -> Origin {
        Origin::Output(self.node, 0)
    }

    /// Returns the context variable origins inside the body, in input order.
    #[must_use]
    pub fn context_vars(&self, graph: &Graph) -> Vec<Origin> {
        let subregion = self.subregion(graph);
        let nparameters = self.nparameters(graph);
        (nparameters..graph.region(subregion).narguments())
            .map(|index| Origin::Argument(subregion, index))
            .collect()
    }
}
