//! Per-operation normal forms and the fixed-point rewrite engine.
//!
//! Every operation class owns a [`NormalForm`]: a `mutable` switch plus a set of
//! boolean rewrite flags. Forms inherit along [`OpClass::parent`]: a flag that was
//! never set on a class is looked up on its parent, so enabling a rule on
//! [`OpClass::Simple`] affects every simple operation that does not override it.
//!
//! Rewrites never edit input lists. A rule builds the replacement and diverts the
//! users of the old outputs, which keeps type checking local and cannot dangle.
//! [`Graph::normalize`] drives [`normalize_node`] over all regions until quiescent;
//! [`Graph::prune`](crate::rvsdg::Graph::prune) then collects the corpses.
//!
//! Registry state is per graph. Two graphs in one process never share forms.

mod binary;
mod memory;

pub use binary::{reduce_flattened, FlattenedReduction};

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::rvsdg::graph::Graph;
use crate::rvsdg::node::{NodeId, NodeKind, Origin, RegionId};
use crate::rvsdg::operation::{OpClass, Operation};
use crate::rvsdg::simple;
use crate::Result;

bitflags! {
    /// Rewrite flags understood by the built-in normal forms.
    ///
    /// Which flags a class consults is documented on the class: `Simple` reads
    /// `CSE`; `Binary` reads `REDUCIBLE`, `REORDER`, `FLATTEN`, `DISTRIBUTE`,
    /// `FACTORIZE`; `Store` and `Load` read their memory-rule flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NormFlags: u32 {
        /// Merge equivalent nodes within a region
        const CSE = 1 << 0;
        /// Pairwise operand reduction (constants, neutral elements, merges)
        const REDUCIBLE = 1 << 1;
        /// Canonicalize operand order of commutative operations
        const REORDER = 1 << 2;
        /// Rewrite nested associative operations into the n-ary flattened form
        const FLATTEN = 1 << 3;
        /// Distribute multiplication over addition
        const DISTRIBUTE = 1 << 4;
        /// Factor a common multiplicand out of an addition
        const FACTORIZE = 1 << 5;
        /// Pull a store out of a merged memory state
        const STORE_MUX = 1 << 6;
        /// Kill the prior store to the same address
        const STORE_STORE = 1 << 7;
        /// Bypass unrelated states around a store to an alloca
        const STORE_ALLOCA = 1 << 8;
        /// Deduplicate repeated state inputs
        const MULTIPLE_ORIGIN = 1 << 9;
        /// Pull a load out of a merged memory state
        const LOAD_MUX = 1 << 10;
        /// Forward a dominating store's value to a load
        const LOAD_STORE = 1 << 11;
        /// Bypass unrelated states around a load from an alloca
        const LOAD_ALLOCA = 1 << 12;
    }
}

/// The normal form of one operation class.
///
/// `mutable` gates all rewrites of the class: when it resolves to `false`, every
/// flag reads as disabled. Both `mutable` and the flags inherit through the class
/// parent chain when unset.
#[derive(Debug, Clone, Default)]
pub struct NormalForm {
    mutable: Option<bool>,
    values: NormFlags,
    explicit: NormFlags,
}

impl NormalForm {
    /// Sets or clears a rewrite flag on this form.
    pub fn set_flag(&mut self, flag: NormFlags, enable: bool) {
        self.explicit |= flag;
        if enable {
            self.values |= flag;
        } else {
            self.values -= flag;
        }
    }

    /// Sets the `mutable` switch on this form.
    pub fn set_mutable(&mut self, enable: bool) {
        self.mutable = Some(enable);
    }
}

/// The per-graph registry of normal forms, addressed by [`OpClass`].
#[derive(Debug, Clone)]
pub struct NormalFormRegistry {
    forms: FxHashMap<OpClass, NormalForm>,
}

impl Default for NormalFormRegistry {
    /// The default configuration: everything mutable, CSE on, binary operand
    /// reduction and reordering on. Flattening, distribution, factorization, and
    /// the memory rules start disabled and are enabled per pass.
    fn default() -> Self {
        let mut registry = Self {
            forms: FxHashMap::default(),
        };
        registry.set_mutable(OpClass::Any, true);
        registry.set_flag(OpClass::Simple, NormFlags::CSE, true);
        registry.set_flag(OpClass::Binary, NormFlags::REDUCIBLE, true);
        registry.set_flag(OpClass::Binary, NormFlags::REORDER, true);
        registry
    }
}

impl NormalFormRegistry {
    /// Sets or clears a flag on the form of `class`.
    pub fn set_flag(&mut self, class: OpClass, flag: NormFlags, enable: bool) {
        self.forms.entry(class).or_default().set_flag(flag, enable);
    }

    /// Sets the `mutable` switch on the form of `class`.
    pub fn set_mutable(&mut self, class: OpClass, enable: bool) {
        self.forms.entry(class).or_default().set_mutable(enable);
    }

    /// Resolves the `mutable` switch for `class` through the parent chain.
    #[must_use]
    pub fn is_mutable(&self, class: OpClass) -> bool {
        let mut current = Some(class);
        while let Some(c) = current {
            if let Some(form) = self.forms.get(&c) {
                if let Some(value) = form.mutable {
                    return value;
                }
            }
            current = c.parent();
        }
        false
    }

    /// Resolves a flag for `class` through the parent chain, honoring `mutable`.
    #[must_use]
    pub fn enabled(&self, class: OpClass, flag: NormFlags) -> bool {
        if !self.is_mutable(class) {
            return false;
        }
        let mut current = Some(class);
        while let Some(c) = current {
            if let Some(form) = self.forms.get(&c) {
                if form.explicit.contains(flag) {
                    return form.values.contains(flag);
                }
            }
            current = c.parent();
        }
        false
    }
}

impl Graph {
    /// Runs all enabled normal-form rules to a fixed point.
    ///
    /// Returns the total number of rewrites applied. After this returns,
    /// [`normalize_node`] reports `false` for every node in the graph.
    pub fn normalize(&mut self) -> usize {
        let mut total = 0;
        loop {
            let mut changed = 0;
            for region in self.regions_pre_order() {
                for node in self.topological_order(region) {
                    if self.is_alive(node) && normalize_node(self, node) {
                        changed += 1;
                    }
                }
            }
            if changed == 0 {
                break;
            }
            total += changed;
        }
        if total > 0 {
            log::debug!("normalize applied {total} rewrites");
        }
        total
    }
}

/// Checks all enabled rules on an existing node and applies the first that fires.
///
/// Returns `true` if a rewrite was applied. The node's users are diverted to the
/// replacement; the node itself becomes dead and is left for `prune`.
pub fn normalize_node(graph: &mut Graph, node: NodeId) -> bool {
    let Some(op) = graph.node(node).operation() else {
        return false;
    };
    let class = op.op_class();
    if !graph.normal_forms().is_mutable(class) {
        return false;
    }
    let fired = match class {
        OpClass::Binary => binary::normalize_node(graph, node),
        OpClass::FlattenedBinary => binary::normalize_flattened(graph, node),
        OpClass::Store => memory::normalize_store(graph, node),
        OpClass::Load => memory::normalize_load(graph, node),
        _ => false,
    };
    if fired {
        return true;
    }
    if graph.normal_forms().enabled(class, NormFlags::CSE) {
        return apply_cse(graph, node);
    }
    false
}

/// Materializes `op(operands)` through the normal forms.
///
/// Either returns existing origins (when a rule reduces the request) or creates
/// the node and returns its outputs.
pub(crate) fn normalized_create(
    graph: &mut Graph,
    region: RegionId,
    op: Operation,
    operands: &[Origin],
) -> Result<Vec<Origin>> {
    let class = op.op_class();
    if graph.normal_forms().is_mutable(class) {
        if class == OpClass::Binary
            && graph.normal_forms().enabled(class, NormFlags::REDUCIBLE)
        {
            if let Some(origin) = binary::try_create_reduction(graph, region, &op, operands)? {
                return Ok(vec![origin]);
            }
        }
        if graph.normal_forms().enabled(class, NormFlags::CSE) {
            if let Some(existing) = cse_find(graph, region, &op, operands, None) {
                let count = graph.node(existing).noutputs();
                return Ok((0..count).map(|i| Origin::Output(existing, i)).collect());
            }
        }
    }
    let node = simple::create_node(graph, region, op, operands)?;
    let count = graph.node(node).noutputs();
    Ok((0..count).map(|i| Origin::Output(node, i)).collect())
}

/// Finds a node in `region` computing `op` over exactly `operands`.
///
/// `exclude` skips one node (the one being normalized). The lowest node ID wins,
/// so repeated lookups are deterministic.
fn cse_find(
    graph: &Graph,
    region: RegionId,
    op: &Operation,
    operands: &[Origin],
    exclude: Option<NodeId>,
) -> Option<NodeId> {
    if !op.is_mergeable() {
        return None;
    }
    let mut best: Option<NodeId> = None;
    for &candidate in graph.region(region).nodes() {
        if Some(candidate) == exclude {
            continue;
        }
        let node = graph.node(candidate);
        let NodeKind::Simple(other) = node.kind() else {
            continue;
        };
        if other != op {
            continue;
        }
        let same_operands = node.ninputs() == operands.len()
            && node
                .inputs()
                .iter()
                .zip(operands)
                .all(|(input, origin)| input.origin() == *origin);
        if same_operands && best.is_none_or(|b| candidate < b) {
            best = Some(candidate);
        }
    }
    best
}

fn apply_cse(graph: &mut Graph, node: NodeId) -> bool {
    let op = match graph.node(node).operation() {
        Some(op) => op.clone(),
        None => return false,
    };
    let region = graph.node(node).region();
    let operands: Vec<Origin> = graph
        .node(node)
        .inputs()
        .iter()
        .map(|input| input.origin())
        .collect();
    let Some(existing) = cse_find(graph, region, &op, &operands, Some(node)) else {
        return false;
    };
    // Divert towards the lower id so two equivalent nodes settle on one canonical
    // survivor instead of oscillating.
    if existing > node {
        return false;
    }
    let mut fired = false;
    for index in 0..graph.node(node).noutputs() {
        let from = Origin::Output(node, index);
        let to = Origin::Output(existing, index);
        if graph.nusers(from) > 0 {
            fired |= graph.divert_users(from, to).map(|n| n > 0).unwrap_or(false);
        }
    }
    fired
}
