//! The graph arena: node/region storage, wiring, rewriting primitives.
//!
//! A [`Graph`] owns every node and region of one translation unit. The root region
//! plays the role of the ω node: imports are its named arguments, exports its named
//! results. All mutation goes through the methods here so the invariants hold after
//! every public operation:
//!
//! 1. every input's type matches its origin's type;
//! 2. origins are only referenced from their own region;
//! 3. regions are acyclic (θ's back edge runs through its result/argument pair,
//!    never node-to-node);
//! 4. user lists and inputs stay consistent;
//! 5. nodes are destroyed only with their region or once they have no users.
//!
//! The fundamental rewrite primitive is [`Graph::divert_users`]: passes never edit
//! input lists, they build replacement nodes and divert.

use rustc_hash::FxHashMap;

use crate::normalize::NormalFormRegistry;
use crate::rvsdg::node::{Input, Node, NodeId, NodeKind, Origin, Output, RegionId, User};
use crate::rvsdg::region::{Argument, Region, ResultPort};
use crate::types::Type;
use crate::{Error, Result};

/// Substitution map used by [`Graph::copy_node`], from source origins to
/// destination origins.
pub type SubstitutionMap = FxHashMap<Origin, Origin>;

/// A graph owning the regions and nodes of one translation unit.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Option<Node>>,
    regions: Vec<Option<Region>>,
    root: RegionId,
    imports: Vec<String>,
    exports: Vec<String>,
    registry: NormalFormRegistry,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Creates an empty graph with a fresh root region.
    #[must_use]
    pub fn new() -> Self {
        let mut graph = Self {
            nodes: Vec::new(),
            regions: Vec::new(),
            root: RegionId(0),
            imports: Vec::new(),
            exports: Vec::new(),
            registry: NormalFormRegistry::default(),
        };
        graph.root = graph.new_region(None);
        graph
    }

    /// Returns the root region (the translation unit).
    #[must_use]
    pub fn root(&self) -> RegionId {
        self.root
    }

    /// Returns the normal-form registry of this graph.
    #[must_use]
    pub fn normal_forms(&self) -> &NormalFormRegistry {
        &self.registry
    }

    /// Returns the mutable normal-form registry of this graph.
    ///
    /// Flags must be configured before normalization begins, never concurrently
    /// with it.
    pub fn normal_forms_mut(&mut self) -> &mut NormalFormRegistry {
        &mut self.registry
    }

    /// Returns a node by ID.
    ///
    /// # Panics
    ///
    /// Panics if the ID is stale (the node was removed) or out of bounds.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("stale node id {id}"))
    }

    /// Returns `true` if the node ID refers to a live node.
    #[must_use]
    pub fn is_alive(&self, id: NodeId) -> bool {
        self.nodes
            .get(id.index())
            .is_some_and(|slot| slot.is_some())
    }

    /// Returns a region by ID.
    ///
    /// # Panics
    ///
    /// Panics if the ID is stale or out of bounds.
    #[must_use]
    pub fn region(&self, id: RegionId) -> &Region {
        self.regions[id.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("stale region id {id}"))
    }

    /// Returns the total number of live nodes.
    #[must_use]
    pub fn nnodes(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    // ------------------------------------------------------------------
    // Imports and exports (the ω surface)
    // ------------------------------------------------------------------

    /// Adds a named import to the translation unit and returns its origin.
    pub fn add_import(&mut self, ty: Type, name: &str) -> Origin {
        self.imports.push(name.to_string());
        let root = self.root;
        self.add_argument(root, ty, None)
    }

    /// Returns the import names, in argument order.
    #[must_use]
    pub fn imports(&self) -> &[String] {
        &self.imports
    }

    /// Adds a named export fed by `origin` and returns its result index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ScopeViolation`] if `origin` is not in the root region.
    pub fn add_export(&mut self, origin: Origin, name: &str) -> Result<usize> {
        let root = self.root;
        let index = self.add_result(root, origin, None)?;
        self.exports.push(name.to_string());
        Ok(index)
    }

    /// Returns the export names, in result order.
    #[must_use]
    pub fn exports(&self) -> &[String] {
        &self.exports
    }

    // ------------------------------------------------------------------
    // Port queries
    // ------------------------------------------------------------------

    /// Returns the type of an origin.
    #[must_use]
    pub fn origin_type(&self, origin: Origin) -> &Type {
        match origin {
            Origin::Output(node, index) => &self.node(node).outputs[index].ty,
            Origin::Argument(region, index) => &self.region(region).arguments[index].ty,
        }
    }

    /// Returns the region an origin is defined in.
    #[must_use]
    pub fn origin_region(&self, origin: Origin) -> RegionId {
        match origin {
            Origin::Output(node, _) => self.node(node).region,
            Origin::Argument(region, _) => region,
        }
    }

    /// Returns the users of an origin.
    #[must_use]
    pub fn users(&self, origin: Origin) -> &[User] {
        match origin {
            Origin::Output(node, index) => &self.node(node).outputs[index].users,
            Origin::Argument(region, index) => &self.region(region).arguments[index].users,
        }
    }

    /// Returns the number of users of an origin.
    #[must_use]
    pub fn nusers(&self, origin: Origin) -> usize {
        self.users(origin).len()
    }

    /// Returns the origin a user consumes.
    #[must_use]
    pub fn user_origin(&self, user: User) -> Origin {
        match user {
            User::Input(node, index) => self.node(node).inputs[index].origin,
            User::Result(region, index) => self.region(region).results[index].origin,
        }
    }

    /// Returns the region a user lives in.
    #[must_use]
    pub fn user_region(&self, user: User) -> RegionId {
        match user {
            User::Input(node, _) => self.node(node).region,
            User::Result(region, _) => region,
        }
    }

    /// Returns the origin connected to input `index` of `node`.
    #[must_use]
    pub fn input_origin(&self, node: NodeId, index: usize) -> Origin {
        self.node(node).inputs[index].origin
    }

    /// Returns the origin connected to result `index` of `region`.
    #[must_use]
    pub fn result_origin(&self, region: RegionId, index: usize) -> Origin {
        self.region(region).results[index].origin
    }

    // ------------------------------------------------------------------
    // Wiring
    // ------------------------------------------------------------------

    pub(crate) fn new_region(&mut self, owner: Option<NodeId>) -> RegionId {
        let id = RegionId(self.regions.len());
        self.regions.push(Some(Region::new(owner)));
        id
    }

    pub(crate) fn region_mut(&mut self, id: RegionId) -> &mut Region {
        self.regions[id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("stale region id {id}"))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("stale node id {id}"))
    }

    pub(crate) fn add_argument(
        &mut self,
        region: RegionId,
        ty: Type,
        input: Option<usize>,
    ) -> Origin {
        let r = self.region_mut(region);
        let index = r.arguments.len();
        r.arguments.push(Argument {
            ty,
            users: Vec::new(),
            input,
        });
        Origin::Argument(region, index)
    }

    pub(crate) fn add_result(
        &mut self,
        region: RegionId,
        origin: Origin,
        output: Option<usize>,
    ) -> Result<usize> {
        if self.origin_region(origin) != region {
            return Err(Error::ScopeViolation);
        }
        let ty = self.origin_type(origin).clone();
        let index = self.region(region).results.len();
        self.region_mut(region).results.push(ResultPort {
            ty,
            origin,
            output,
        });
        self.add_user(origin, User::Result(region, index));
        Ok(index)
    }

    /// Creates a node in `region` with fully wired inputs.
    ///
    /// `input_types` are the types the node expects; each origin must match and be
    /// defined in `region`. The operation is atomic: on error nothing is mutated.
    pub(crate) fn add_node(
        &mut self,
        region: RegionId,
        kind: NodeKind,
        operands: &[Origin],
        input_types: &[Type],
        output_types: Vec<Type>,
    ) -> Result<NodeId> {
        if operands.len() != input_types.len() {
            return Err(unreachable_error!(
                "operand count {} does not match input count {}",
                operands.len(),
                input_types.len()
            ));
        }
        for (origin, expected) in operands.iter().zip(input_types) {
            let found = self.origin_type(*origin);
            if found != expected {
                return Err(Error::TypeMismatch {
                    expected: expected.to_string(),
                    found: found.to_string(),
                });
            }
            if self.origin_region(*origin) != region {
                return Err(Error::ScopeViolation);
            }
        }

        let id = NodeId(self.nodes.len());
        let inputs = operands
            .iter()
            .zip(input_types)
            .map(|(origin, ty)| Input {
                origin: *origin,
                ty: ty.clone(),
            })
            .collect();
        let outputs = output_types
            .into_iter()
            .map(|ty| Output {
                ty,
                users: Vec::new(),
            })
            .collect();
        self.nodes.push(Some(Node {
            region,
            kind,
            inputs,
            outputs,
            subregions: Vec::new(),
        }));
        self.region_mut(region).nodes.push(id);
        for (index, origin) in operands.iter().enumerate() {
            self.add_user(*origin, User::Input(id, index));
        }
        Ok(id)
    }

    /// Appends an input to an existing (structural) node.
    pub(crate) fn add_input(&mut self, node: NodeId, origin: Origin, ty: Type) -> Result<usize> {
        let found = self.origin_type(origin);
        if *found != ty {
            return Err(Error::TypeMismatch {
                expected: ty.to_string(),
                found: found.to_string(),
            });
        }
        if self.origin_region(origin) != self.node(node).region {
            return Err(Error::ScopeViolation);
        }
        let index = self.node(node).inputs.len();
        self.node_mut(node).inputs.push(Input { origin, ty });
        self.add_user(origin, User::Input(node, index));
        Ok(index)
    }

    /// Appends an output to an existing (structural) node.
    pub(crate) fn add_output(&mut self, node: NodeId, ty: Type) -> usize {
        let index = self.node(node).outputs.len();
        self.node_mut(node).outputs.push(Output {
            ty,
            users: Vec::new(),
        });
        index
    }

    pub(crate) fn add_subregion(&mut self, node: NodeId) -> RegionId {
        let region = self.new_region(Some(node));
        self.node_mut(node).subregions.push(region);
        region
    }

    fn add_user(&mut self, origin: Origin, user: User) {
        match origin {
            Origin::Output(node, index) => self.node_mut(node).outputs[index].users.push(user),
            Origin::Argument(region, index) => {
                self.region_mut(region).arguments[index].users.push(user);
            }
        }
    }

    fn remove_user(&mut self, origin: Origin, user: User) {
        let users = match origin {
            Origin::Output(node, index) => &mut self.node_mut(node).outputs[index].users,
            Origin::Argument(region, index) => {
                &mut self.region_mut(region).arguments[index].users
            }
        };
        if let Some(pos) = users.iter().position(|u| *u == user) {
            users.remove(pos);
        }
    }

    fn set_user_origin(&mut self, user: User, origin: Origin) {
        match user {
            User::Input(node, index) => self.node_mut(node).inputs[index].origin = origin,
            User::Result(region, index) => {
                self.region_mut(region).results[index].origin = origin;
            }
        }
    }

    /// Reconnects result `index` of `region` to a new origin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if the types differ or
    /// [`Error::ScopeViolation`] if the new origin is outside `region`.
    pub fn redirect_result(
        &mut self,
        region: RegionId,
        index: usize,
        origin: Origin,
    ) -> Result<()> {
        if self.origin_region(origin) != region {
            return Err(Error::ScopeViolation);
        }
        let expected = self.region(region).results[index].ty.clone();
        let found = self.origin_type(origin);
        if *found != expected {
            return Err(Error::TypeMismatch {
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }
        let old = self.region(region).results[index].origin;
        if old == origin {
            return Ok(());
        }
        self.remove_user(old, User::Result(region, index));
        self.region_mut(region).results[index].origin = origin;
        self.add_user(origin, User::Result(region, index));
        Ok(())
    }

    /// Reconnects input `index` of `node` to a new origin.
    ///
    /// Used by passes that rewire existing routing variables of structural
    /// nodes (the memory-state encoder in particular).
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if the types differ or
    /// [`Error::ScopeViolation`] if the new origin is outside the node's region.
    pub fn redirect_input(&mut self, node: NodeId, index: usize, origin: Origin) -> Result<()> {
        if self.origin_region(origin) != self.node(node).region {
            return Err(Error::ScopeViolation);
        }
        let expected = self.node(node).inputs[index].ty.clone();
        let found = self.origin_type(origin);
        if *found != expected {
            return Err(Error::TypeMismatch {
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }
        let old = self.node(node).inputs[index].origin;
        if old == origin {
            return Ok(());
        }
        self.remove_user(old, User::Input(node, index));
        self.node_mut(node).inputs[index].origin = origin;
        self.add_user(origin, User::Input(node, index));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Rewriting
    // ------------------------------------------------------------------

    /// Retargets every user of `from` to `to`, preserving input identity.
    ///
    /// Returns the number of users diverted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if the two origins have different types, or
    /// [`Error::ScopeViolation`] if they live in different regions.
    pub fn divert_users(&mut self, from: Origin, to: Origin) -> Result<usize> {
        if from == to {
            return Ok(0);
        }
        let from_ty = self.origin_type(from);
        let to_ty = self.origin_type(to);
        if from_ty != to_ty {
            return Err(Error::TypeMismatch {
                expected: from_ty.to_string(),
                found: to_ty.to_string(),
            });
        }
        if self.origin_region(from) != self.origin_region(to) {
            return Err(Error::ScopeViolation);
        }

        let users = match from {
            Origin::Output(node, index) => {
                std::mem::take(&mut self.node_mut(node).outputs[index].users)
            }
            Origin::Argument(region, index) => {
                std::mem::take(&mut self.region_mut(region).arguments[index].users)
            }
        };
        let count = users.len();
        for user in users {
            self.set_user_origin(user, to);
            self.add_user(to, user);
        }
        Ok(count)
    }

    /// Removes a node whose outputs have no users.
    ///
    /// Subregions of structural nodes are destroyed transitively.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInUse`] if any output still has a user.
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        if !self.node(id).is_dead() {
            return Err(Error::NodeInUse);
        }
        let region = self.node(id).region;
        for index in 0..self.node(id).inputs.len() {
            let origin = self.node(id).inputs[index].origin;
            self.remove_user(origin, User::Input(id, index));
        }
        let subregions = self.node(id).subregions.clone();
        for sub in subregions {
            self.destroy_region(sub);
        }
        self.region_mut(region).nodes.retain(|n| *n != id);
        self.nodes[id.index()] = None;
        Ok(())
    }

    fn destroy_region(&mut self, id: RegionId) {
        let Some(region) = self.regions[id.index()].take() else {
            return;
        };
        for node in region.nodes {
            if let Some(node) = self.nodes[node.index()].take() {
                for sub in node.subregions {
                    self.destroy_region(sub);
                }
            }
        }
    }

    /// Removes dead nodes transitively until none remain.
    ///
    /// A node is dead when none of its outputs has a user. Pruning is idempotent
    /// and never removes a node with users. Returns the number of removed nodes.
    pub fn prune(&mut self) -> usize {
        let mut removed = 0;
        loop {
            let mut any = false;
            for index in 0..self.nodes.len() {
                let id = NodeId(index);
                if self.is_alive(id) && self.node(id).is_dead() {
                    if self.remove_node(id).is_ok() {
                        removed += 1;
                        any = true;
                    }
                }
            }
            if !any {
                break;
            }
        }
        removed
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    /// Returns the nodes of `region` in topological order (producers first).
    ///
    /// Ties break towards lower node IDs, so the order is deterministic.
    #[must_use]
    pub fn topological_order(&self, region: RegionId) -> Vec<NodeId> {
        let r = self.region(region);
        let mut indegree: FxHashMap<NodeId, usize> = FxHashMap::default();
        for &id in &r.nodes {
            let count = self
                .node(id)
                .inputs
                .iter()
                .filter(|input| matches!(input.origin, Origin::Output(..)))
                .count();
            indegree.insert(id, count);
        }

        let mut ready: Vec<NodeId> = indegree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        ready.sort_unstable();
        ready.reverse();

        let mut order = Vec::with_capacity(r.nodes.len());
        while let Some(id) = ready.pop() {
            order.push(id);
            let mut unblocked = Vec::new();
            for output in self.node(id).outputs() {
                for user in output.users() {
                    if let User::Input(consumer, _) = user {
                        if let Some(count) = indegree.get_mut(consumer) {
                            *count -= 1;
                            if *count == 0 {
                                unblocked.push(*consumer);
                            }
                        }
                    }
                }
            }
            unblocked.sort_unstable();
            for id in unblocked.into_iter().rev() {
                ready.push(id);
            }
        }
        order
    }

    /// Returns every live region, root first, subregions after their owner.
    #[must_use]
    pub fn regions_pre_order(&self) -> Vec<RegionId> {
        let mut order = Vec::new();
        let mut stack = vec![self.root];
        while let Some(region) = stack.pop() {
            order.push(region);
            for &node in self.region(region).nodes() {
                for &sub in self.node(node).subregions() {
                    stack.push(sub);
                }
            }
        }
        order
    }

    // ------------------------------------------------------------------
    // Copying
    // ------------------------------------------------------------------

    /// Clones a node into `target`, mapping operands through `smap`.
    ///
    /// Operands without a mapping are reused as-is (useful for copies within the
    /// same region). The new node's outputs are entered into `smap` so later copies
    /// can reference them. Structural nodes are copied recursively.
    ///
    /// # Errors
    ///
    /// Fails with the usual wiring errors if a mapped operand has the wrong type or
    /// region.
    pub fn copy_node(
        &mut self,
        id: NodeId,
        target: RegionId,
        smap: &mut SubstitutionMap,
    ) -> Result<NodeId> {
        let node = self.node(id);
        let kind = node.kind.clone();
        let operands: Vec<Origin> = node
            .inputs
            .iter()
            .map(|input| *smap.get(&input.origin).unwrap_or(&input.origin))
            .collect();
        let input_types: Vec<Type> = node.inputs.iter().map(|i| i.ty.clone()).collect();
        let output_types: Vec<Type> = node.outputs.iter().map(|o| o.ty.clone()).collect();
        let subregions = node.subregions.clone();

        let new_id = self.add_node(target, kind, &operands, &input_types, output_types)?;
        for sub in subregions {
            let new_sub = self.add_subregion(new_id);
            self.copy_region_into(sub, new_sub, smap)?;
        }
        for index in 0..self.node(id).noutputs() {
            smap.insert(Origin::Output(id, index), Origin::Output(new_id, index));
        }
        Ok(new_id)
    }

    pub(crate) fn copy_region_into(
        &mut self,
        source: RegionId,
        target: RegionId,
        smap: &mut SubstitutionMap,
    ) -> Result<()> {
        for index in 0..self.region(source).narguments() {
            let (ty, input) = {
                let arg = &self.region(source).arguments[index];
                (arg.ty.clone(), arg.input)
            };
            let origin = self.add_argument(target, ty, input);
            smap.insert(Origin::Argument(source, index), origin);
        }
        for node in self.topological_order(source) {
            self.copy_node(node, target, smap)?;
        }
        for index in 0..self.region(source).nresults() {
            let (origin, output) = {
                let result = &self.region(source).results[index];
                (result.origin, result.output)
            };
            let origin = *smap.get(&origin).unwrap_or(&origin);
            self.add_result(target, origin, output)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Verification
    // ------------------------------------------------------------------

    /// Checks the graph invariants, reporting the first violation found.
    ///
    /// Used by tests and at pass boundaries in debug builds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unreachable`] describing the violated invariant.
    pub fn verify(&self) -> Result<()> {
        let mut expected_users: FxHashMap<Origin, Vec<User>> = FxHashMap::default();

        for region_id in self.regions_pre_order() {
            let region = self.region(region_id);
            for (index, result) in region.results.iter().enumerate() {
                let found = self.origin_type(result.origin);
                if *found != result.ty {
                    return Err(unreachable_error!(
                        "result {index} of {region_id} has type {}, origin has {found}",
                        result.ty
                    ));
                }
                if self.origin_region(result.origin) != region_id {
                    return Err(unreachable_error!(
                        "result {index} of {region_id} crosses a region boundary"
                    ));
                }
                expected_users
                    .entry(result.origin)
                    .or_default()
                    .push(User::Result(region_id, index));
            }
            for &node_id in region.nodes() {
                let node = self.node(node_id);
                if node.region != region_id {
                    return Err(unreachable_error!(
                        "{node_id} is listed in {region_id} but claims another region"
                    ));
                }
                for (index, input) in node.inputs.iter().enumerate() {
                    let found = self.origin_type(input.origin);
                    if *found != input.ty {
                        return Err(unreachable_error!(
                            "input {index} of {node_id} has type {}, origin has {found}",
                            input.ty
                        ));
                    }
                    if self.origin_region(input.origin) != region_id {
                        return Err(unreachable_error!(
                            "input {index} of {node_id} crosses a region boundary"
                        ));
                    }
                    expected_users
                        .entry(input.origin)
                        .or_default()
                        .push(User::Input(node_id, index));
                }
            }
        }

        for region_id in self.regions_pre_order() {
            let region = self.region(region_id);
            for (index, argument) in region.arguments.iter().enumerate() {
                let origin = Origin::Argument(region_id, index);
                Self::check_users(origin, &argument.users, &expected_users)?;
            }
            for &node_id in region.nodes() {
                for (index, output) in self.node(node_id).outputs.iter().enumerate() {
                    let origin = Origin::Output(node_id, index);
                    Self::check_users(origin, &output.users, &expected_users)?;
                }
            }
        }
        Ok(())
    }

    fn check_users(
        origin: Origin,
        actual: &[User],
        expected: &FxHashMap<Origin, Vec<User>>,
    ) -> Result<()> {
        let mut actual: Vec<User> = actual.to_vec();
        let mut wanted: Vec<User> = expected.get(&origin).cloned().unwrap_or_default();
        actual.sort_unstable();
        wanted.sort_unstable();
        if actual != wanted {
            return Err(unreachable_error!(
                "user list of {origin:?} is inconsistent: {actual:?} != {wanted:?}"
            ));
        }
        Ok(())
    }
}
