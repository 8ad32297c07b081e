//! Node identifiers, ports, and node kinds.
//!
//! Nodes are arena-allocated inside a [`Graph`](crate::rvsdg::Graph); [`NodeId`] and
//! [`RegionId`] are stable index newtypes. Edges are not stored as pointers: an input
//! records its [`Origin`] (a node output or a region argument), and every output keeps
//! the list of [`User`] ports connected to it. This keeps deletion and rewriting safe
//! without any cross-references.

use std::fmt;

use crate::types::{FunctionType, Linkage, Type};
use crate::rvsdg::operation::Operation;

/// A strongly-typed identifier for nodes within a graph.
///
/// Node IDs are assigned sequentially when nodes are created and stay stable for the
/// lifetime of the graph; removing a node retires its ID without renumbering others.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Creates a `NodeId` from a raw index value.
    ///
    /// Primarily intended for internal use and testing; normal usage obtains IDs
    /// from node factories.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        NodeId(index)
    }

    /// Returns the raw index value of this node identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A strongly-typed identifier for regions within a graph.
///
/// Region 0 is always the root region (the translation unit); all other regions are
/// subregions of structural nodes and live exactly as long as their owner.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionId(pub(crate) usize);

impl RegionId {
    /// Creates a `RegionId` from a raw index value.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        RegionId(index)
    }

    /// Returns the raw index value of this region identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegionId({})", self.0)
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// The producing side of an edge.
///
/// An origin is either the output of a node or an argument of a region. Every input
/// and every region result is connected to exactly one origin in the same region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Origin {
    /// Output `index` of a node
    Output(NodeId, usize),
    /// Argument `index` of a region
    Argument(RegionId, usize),
}

/// The consuming side of an edge.
///
/// A user is either the input of a node or a result of a region. Each user consumes
/// exactly one origin; an origin's user list holds one entry per connected user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum User {
    /// Input `index` of a node
    Input(NodeId, usize),
    /// Result `index` of a region
    Result(RegionId, usize),
}

/// A typed input port of a node, connected to exactly one origin.
#[derive(Debug, Clone)]
pub struct Input {
    pub(crate) origin: Origin,
    pub(crate) ty: Type,
}

impl Input {
    /// Returns the origin this input is connected to.
    #[must_use]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Returns the type of this input.
    #[must_use]
    pub fn ty(&self) -> &Type {
        &self.ty
    }
}

/// A typed output port of a node, with its list of users.
#[derive(Debug, Clone)]
pub struct Output {
    pub(crate) ty: Type,
    pub(crate) users: Vec<User>,
}

impl Output {
    /// Returns the type of this output.
    #[must_use]
    pub fn ty(&self) -> &Type {
        &self.ty
    }

    /// Returns the users connected to this output.
    #[must_use]
    pub fn users(&self) -> &[User] {
        &self.users
    }
}

/// Identity of a λ node: its name, signature, and linkage.
#[derive(Debug, Clone)]
pub struct LambdaSig {
    /// Symbol name of the function
    pub name: String,
    /// Function signature exposed by the node's output
    pub ty: FunctionType,
    /// Linkage of the definition
    pub linkage: Linkage,
}

/// Identity of a δ node: its name, value type, and linkage.
#[derive(Debug, Clone)]
pub struct DeltaSig {
    /// Symbol name of the global
    pub name: String,
    /// Type of the global's storage
    pub value_type: Type,
    /// Linkage of the definition
    pub linkage: Linkage,
    /// `true` if the storage is read-only
    pub constant: bool,
}

/// The kind of a node.
///
/// Simple nodes compute a primitive [`Operation`] and own no subregions. Structural
/// nodes own one or more subregions and expose routing variables; their kinds carry
/// only the identity data that is not derivable from the ports.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// A primitive operation
    Simple(Operation),
    /// Multi-way conditional; one subregion per alternative
    Gamma,
    /// Tail-controlled loop; exactly one subregion
    Theta,
    /// Function definition; exactly one subregion
    Lambda(LambdaSig),
    /// Global definition; exactly one subregion computing the initializer
    Delta(DeltaSig),
    /// Mutually recursive binding group; exactly one subregion
    Phi,
}

impl NodeKind {
    /// Returns the display name of this node kind.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Simple(_) => "simple",
            NodeKind::Gamma => "gamma",
            NodeKind::Theta => "theta",
            NodeKind::Lambda(_) => "lambda",
            NodeKind::Delta(_) => "delta",
            NodeKind::Phi => "phi",
        }
    }
}

/// A node in the graph.
///
/// Nodes are created by factory functions which compute the port types from the
/// operation (simple nodes) or grow them through routing-variable methods
/// (structural nodes). They are removed only once their outputs have no users.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) region: RegionId,
    pub(crate) kind: NodeKind,
    pub(crate) inputs: Vec<Input>,
    pub(crate) outputs: Vec<Output>,
    pub(crate) subregions: Vec<RegionId>,
}

impl Node {
    /// Returns the region containing this node.
    #[must_use]
    pub fn region(&self) -> RegionId {
        self.region
    }

    /// Returns the kind of this node.
    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Returns the operation of a simple node, or `None` for structural nodes.
    #[must_use]
    pub fn operation(&self) -> Option<&Operation> {
        match &self.kind {
            NodeKind::Simple(op) => Some(op),
            _ => None,
        }
    }

    /// Returns `true` for structural nodes (nodes owning subregions).
    #[must_use]
    pub fn is_structural(&self) -> bool {
        !matches!(self.kind, NodeKind::Simple(_))
    }

    /// Returns the input ports.
    #[must_use]
    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    /// Returns the output ports.
    #[must_use]
    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Returns the number of inputs.
    #[must_use]
    pub fn ninputs(&self) -> usize {
        self.inputs.len()
    }

    /// Returns the number of outputs.
    #[must_use]
    pub fn noutputs(&self) -> usize {
        self.outputs.len()
    }

    /// Returns the subregions owned by this node (empty for simple nodes).
    #[must_use]
    pub fn subregions(&self) -> &[RegionId] {
        &self.subregions
    }

    /// Returns `true` if no output of this node has a user.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.outputs.iter().all(|o| o.users.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_node_id_roundtrip() {
        let id = NodeId::new(42);
        assert_eq!(id.index(), 42);
        assert_eq!(format!("{id}"), "n42");
        assert_eq!(format!("{id:?}"), "NodeId(42)");
    }

    #[test]
    fn test_region_id_roundtrip() {
        let id = RegionId::new(7);
        assert_eq!(id.index(), 7);
        assert_eq!(format!("{id}"), "r7");
    }

    #[test]
    fn test_origin_equality_and_hash() {
        let a = Origin::Output(NodeId::new(1), 0);
        let b = Origin::Output(NodeId::new(1), 0);
        let c = Origin::Output(NodeId::new(1), 1);
        let d = Origin::Argument(RegionId::new(1), 0);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);

        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        set.insert(c);
        set.insert(d);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_user_ordering_is_deterministic() {
        let mut users = vec![
            User::Result(RegionId::new(0), 1),
            User::Input(NodeId::new(2), 0),
            User::Input(NodeId::new(1), 1),
        ];
        users.sort();
        assert_eq!(
            users,
            vec![
                User::Input(NodeId::new(1), 1),
                User::Input(NodeId::new(2), 0),
                User::Result(RegionId::new(0), 1),
            ]
        );
    }
}
