//! γ nodes: multi-way conditionals.
//!
//! A γ node takes a `ctl k` predicate followed by any number of entry variables and
//! owns `k` subregions, one per alternative. Each entry variable is routed to one
//! argument in every subregion; each exit variable aggregates one result per
//! subregion into a single outer output. Evaluation picks the subregion selected by
//! the predicate; its results become the node's outputs.

use crate::rvsdg::graph::Graph;
use crate::rvsdg::node::{NodeId, NodeKind, Origin, RegionId};
use crate::types::Type;
use crate::{Error, Result};

/// Handle to a γ node.
#[derive(Debug, Clone, Copy)]
pub struct GammaNode {
    node: NodeId,
}

/// An entry variable: one outer input routed to an argument in every subregion.
#[derive(Debug, Clone)]
pub struct EntryVar {
    /// Index of the outer input carrying the routed value
    pub input: usize,
    /// The per-subregion arguments, in subregion order
    pub arguments: Vec<Origin>,
}

/// An exit variable: per-subregion results aggregated into one outer output.
#[derive(Debug, Clone)]
pub struct ExitVar {
    /// The outer output carrying the selected result
    pub output: Origin,
}

impl GammaNode {
    /// Creates a γ node in `region` with `nsubregions` alternatives.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if `predicate` is not of type
    /// `ctl nsubregions`, or [`Error::UnsupportedOperation`] for fewer than two
    /// alternatives.
    pub fn create(
        graph: &mut Graph,
        region: RegionId,
        predicate: Origin,
        nsubregions: usize,
    ) -> Result<Self> {
        if nsubregions < 2 {
            return Err(Error::UnsupportedOperation(format!(
                "gamma with {nsubregions} subregions"
            )));
        }
        let expected = Type::Control(nsubregions);
        let found = graph.origin_type(predicate);
        if *found != expected {
            return Err(Error::TypeMismatch {
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }
        let node = graph.add_node(
            region,
            NodeKind::Gamma,
            &[predicate],
            std::slice::from_ref(&expected),
            Vec::new(),
        )?;
        for _ in 0..nsubregions {
            graph.add_subregion(node);
        }
        Ok(Self { node })
    }

    /// Reconstructs a handle from a node ID, if the node is a γ.
    #[must_use]
    pub fn from_node(graph: &Graph, node: NodeId) -> Option<Self> {
        matches!(graph.node(node).kind(), NodeKind::Gamma).then_some(Self { node })
    }

    /// Returns the underlying node ID.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Returns the number of alternatives.
    #[must_use]
    pub fn nsubregions(&self, graph: &Graph) -> usize {
        graph.node(self.node).subregions().len()
    }

    /// Returns the subregion of alternative `index`.
    #[must_use]
    pub fn subregion(&self, graph: &Graph, index: usize) -> RegionId {
        graph.node(self.node).subregions()[index]
    }

    /// Returns the predicate origin (outer input 0).
    #[must_use]
    pub fn predicate(&self, graph: &Graph) -> Origin {
        graph.input_origin(self.node, 0)
    }

    /// Routes an outer origin into every subregion and returns the entry variable.
    ///
    /// # Errors
    ///
    /// Fails with the usual wiring errors if `origin` is not visible in the γ
    /// node's region.
    pub fn add_entry_var(&self, graph: &mut Graph, origin: Origin) -> Result<EntryVar> {
        let ty = graph.origin_type(origin).clone();
        let input = graph.add_input(self.node, origin, ty.clone())?;
        let subregions = graph.node(self.node).subregions().to_vec();
        let arguments = subregions
            .into_iter()
            .map(|sub| graph.add_argument(sub, ty.clone(), Some(input)))
            .collect();
        Ok(EntryVar { input, arguments })
    }

    /// Aggregates one result per subregion into a new outer output.
    ///
    /// `origins[i]` must live in subregion `i`; all origins must have one type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if the origins disagree on their type, an
    /// `Unreachable` error if the origin count does not match the subregion count,
    /// and the usual wiring errors for scope violations.
    pub fn add_exit_var(&self, graph: &mut Graph, origins: &[Origin]) -> Result<ExitVar> {
        let subregions = graph.node(self.node).subregions().to_vec();
        if origins.len() != subregions.len() {
            return Err(unreachable_error!(
                "exit variable with {} origins for {} subregions",
                origins.len(),
                subregions.len()
            ));
        }
        let ty = graph.origin_type(origins[0]).clone();
        for origin in &origins[1..] {
            let found = graph.origin_type(*origin);
            if *found != ty {
                return Err(Error::TypeMismatch {
                    expected: ty.to_string(),
                    found: found.to_string(),
                });
            }
        }
        let output = graph.add_output(self.node, ty);
        for (sub, origin) in subregions.into_iter().zip(origins) {
            graph.add_result(sub, *origin, Some(output))?;
        }
        Ok(ExitVar {
            output: Origin::Output(self.node, output),
        })
    }

    /// Returns the number of entry variables.
    #[must_use]
    pub fn nentry_vars(&self, graph: &Graph) -> usize {
        graph.node(self.node).ninputs() - 1
    }

    /// Returns entry variable `index` (0-based, the predicate not counted).
    #[must_use]
    pub fn entry_var(&self, graph: &Graph, index: usize) -> EntryVar {
        let arguments = graph
            .node(self.node)
            .subregions()
            .iter()
            .map(|&sub| Origin::Argument(sub, index))
            .collect();
        EntryVar {
            input: index + 1,
            arguments,
        }
    }

    /// Returns the number of exit variables.
    #[must_use]
    pub fn nexit_vars(&self, graph: &Graph) -> usize {
        graph.node(self.node).noutputs()
    }

    /// Returns exit variable `index` together with its per-subregion result origins.
    #[must_use]
    pub fn exit_var_origins(&self, graph: &Graph, index: usize) -> Vec<Origin> {
        graph
            .node(self.node)
            .subregions()
            .iter()
            .map(|&sub| graph.result_origin(sub, index))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rvsdg::simple;

    #[test]
    fn test_gamma_routing() {
        let mut graph = Graph::new();
        let root = graph.root();
        let c = graph.add_import(Type::Bit(1), "c");
        let x = graph.add_import(Type::Bit(32), "x");

        let predicate = simple::match_op(&mut graph, root, 1, vec![(0, 0)], 1, 2, c).unwrap();
        let gamma = GammaNode::create(&mut graph, root, predicate, 2).unwrap();
        assert_eq!(gamma.nsubregions(&graph), 2);
        assert_eq!(gamma.predicate(&graph), predicate);

        let ev = gamma.add_entry_var(&mut graph, x).unwrap();
        assert_eq!(ev.arguments.len(), 2);

        let gamma_region_1 = gamma.subregion(&graph, 1);
        let one = simple::bit_constant(&mut graph, gamma_region_1, 32, 1).unwrap();
        let bumped = simple::bit_binary(
            &mut graph,
            gamma_region_1,
            crate::rvsdg::operation::BitBinaryKind::Add,
            32,
            ev.arguments[1],
            one,
        )
        .unwrap();
        let xv = gamma
            .add_exit_var(&mut graph, &[ev.arguments[0], bumped])
            .unwrap();

        graph.add_export(xv.output, "r").unwrap();
        graph.verify().unwrap();
        assert_eq!(gamma.nentry_vars(&graph), 1);
        assert_eq!(gamma.nexit_vars(&graph), 1);
    }

    #[test]
    fn test_gamma_rejects_wrong_predicate() {
        let mut graph = Graph::new();
        let root = graph.root();
        let c = graph.add_import(Type::Bit(1), "c");
        assert!(matches!(
            GammaNode::create(&mut graph, root, c, 2),
            Err(Error::TypeMismatch { .. })
        ));

        let predicate = simple::control_constant(&mut graph, root, 3, 0).unwrap();
        assert!(matches!(
            GammaNode::create(&mut graph, root, predicate, 2),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_exit_var_type_disagreement() {
        let mut graph = Graph::new();
        let root = graph.root();
        let predicate = simple::control_constant(&mut graph, root, 2, 0).unwrap();
        let gamma = GammaNode::create(&mut graph, root, predicate, 2).unwrap();
        let gamma_region_0 = gamma.subregion(&graph, 0);
        let a = simple::bit_constant(&mut graph, gamma_region_0, 32, 0).unwrap();
        let gamma_region_1 = gamma.subregion(&graph, 1);
        let b = simple::bit_constant(&mut graph, gamma_region_1, 64, 0).unwrap();
        assert!(matches!(
            gamma.add_exit_var(&mut graph, &[a, b]),
            Err(Error::TypeMismatch { .. })
        ));
    }
}
