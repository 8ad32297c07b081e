//! Regions: ordered node containers with typed arguments and results.
//!
//! A region is the body of a structural node (or the translation-unit root). Its
//! arguments are origins visible to the nodes inside; its results are the values
//! leaving the region. Arguments and results optionally record which outer port of
//! the owning structural node they are routed through.

use crate::types::Type;
use crate::rvsdg::node::{NodeId, Origin, User};

/// An argument of a region: an origin visible inside the region.
#[derive(Debug, Clone)]
pub struct Argument {
    pub(crate) ty: Type,
    pub(crate) users: Vec<User>,
    pub(crate) input: Option<usize>,
}

impl Argument {
    /// Returns the type of this argument.
    #[must_use]
    pub fn ty(&self) -> &Type {
        &self.ty
    }

    /// Returns the users connected to this argument.
    #[must_use]
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Returns the index of the owning structural node's input routed to this
    /// argument, if any.
    #[must_use]
    pub fn input(&self) -> Option<usize> {
        self.input
    }
}

/// A result of a region: a value leaving the region.
#[derive(Debug, Clone)]
pub struct ResultPort {
    pub(crate) ty: Type,
    pub(crate) origin: Origin,
    pub(crate) output: Option<usize>,
}

impl ResultPort {
    /// Returns the type of this result.
    #[must_use]
    pub fn ty(&self) -> &Type {
        &self.ty
    }

    /// Returns the origin inside the region that feeds this result.
    #[must_use]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Returns the index of the owning structural node's output this result is
    /// routed to, if any.
    #[must_use]
    pub fn output(&self) -> Option<usize> {
        self.output
    }
}

/// A region: a bag of nodes plus arguments and results.
///
/// The node list preserves creation order; consumers that require producers before
/// consumers use [`Graph::topological_order`](crate::rvsdg::Graph::topological_order)
/// instead of iterating this list directly.
#[derive(Debug, Clone)]
pub struct Region {
    pub(crate) owner: Option<NodeId>,
    pub(crate) nodes: Vec<NodeId>,
    pub(crate) arguments: Vec<Argument>,
    pub(crate) results: Vec<ResultPort>,
}

impl Region {
    pub(crate) fn new(owner: Option<NodeId>) -> Self {
        Self {
            owner,
            nodes: Vec::new(),
            arguments: Vec::new(),
            results: Vec::new(),
        }
    }

    /// Returns the structural node owning this region, or `None` for the root.
    #[must_use]
    pub fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    /// Returns the nodes of this region in creation order.
    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Returns the number of nodes in this region.
    #[must_use]
    pub fn nnodes(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the arguments of this region.
    #[must_use]
    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    /// Returns the number of arguments.
    #[must_use]
    pub fn narguments(&self) -> usize {
        self.arguments.len()
    }

    /// Returns the results of this region.
    #[must_use]
    pub fn results(&self) -> &[ResultPort] {
        &self.results
    }

    /// Returns the number of results.
    #[must_use]
    pub fn nresults(&self) -> usize {
        self.results.len()
    }

    /// Returns the result at `index`, if present.
    #[must_use]
    pub fn result(&self, index: usize) -> Option<&ResultPort> {
        self.results.get(index)
    }

    /// Returns the argument at `index`, if present.
    #[must_use]
    pub fn argument(&self, index: usize) -> Option<&Argument> {
        self.arguments.get(index)
    }
}
