//! The points-to graph.
//!
//! Nodes are abstract memory locations: one per allocation site (alloca, malloc,
//! global), one per imported symbol, one per function, plus the distinguished
//! **external** node (memory visible outside the translation unit) and
//! **unknown** node (target of loads from undefined or escaped pointers). An
//! edge `A → B` means "A may contain a pointer to B".
//!
//! Register facts map pointer-carrying origins to sets of locations. Both maps
//! only ever grow, so the analysis that fills them is monotone over a finite
//! lattice.

use std::collections::BTreeSet;
use std::fmt;

use rustc_hash::FxHashMap;

use crate::rvsdg::node::{NodeId, Origin};

/// A strongly-typed identifier for abstract memory locations.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocationId(pub(crate) usize);

impl LocationId {
    /// Returns the raw index value.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocationId({})", self.0)
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}

/// An abstract memory location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// Anything visible outside the translation unit
    External,
    /// Target of loads from undefined or escaped pointers
    Unknown,
    /// A stack allocation site
    Alloca(NodeId),
    /// A heap allocation site
    Malloc(NodeId),
    /// A global definition (δ node)
    Global(NodeId),
    /// A function definition (λ node)
    Function(NodeId),
    /// An imported symbol (root argument index)
    Import(usize),
}

/// The points-to graph: abstract locations, may-point-to edges, register facts.
#[derive(Debug, Clone)]
pub struct PointsToGraph {
    locations: Vec<MemoryLocation>,
    index: FxHashMap<MemoryLocation, LocationId>,
    edges: Vec<BTreeSet<LocationId>>,
    registers: FxHashMap<Origin, BTreeSet<LocationId>>,
    escaped: BTreeSet<LocationId>,
    iterations: usize,
}

impl Default for PointsToGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl PointsToGraph {
    /// Creates a graph holding only the two distinguished locations.
    #[must_use]
    pub fn new() -> Self {
        let mut ptg = Self {
            locations: Vec::new(),
            index: FxHashMap::default(),
            edges: Vec::new(),
            registers: FxHashMap::default(),
            escaped: BTreeSet::new(),
            iterations: 0,
        };
        let external = ptg.add_location(MemoryLocation::External);
        ptg.escaped.insert(external);
        ptg.add_location(MemoryLocation::Unknown);
        ptg
    }

    /// Returns the distinguished external location.
    #[must_use]
    pub fn external(&self) -> LocationId {
        LocationId(0)
    }

    /// Returns the distinguished unknown location.
    #[must_use]
    pub fn unknown(&self) -> LocationId {
        LocationId(1)
    }

    /// Adds a location (idempotent) and returns its ID.
    pub fn add_location(&mut self, location: MemoryLocation) -> LocationId {
        if let Some(&id) = self.index.get(&location) {
            return id;
        }
        let id = LocationId(self.locations.len());
        self.locations.push(location);
        self.edges.push(BTreeSet::new());
        self.index.insert(location, id);
        id
    }

    /// Returns the ID of a location, if registered.
    #[must_use]
    pub fn find(&self, location: MemoryLocation) -> Option<LocationId> {
        self.index.get(&location).copied()
    }

    /// Returns the location behind an ID.
    ///
    /// # Panics
    ///
    /// Panics if the ID is out of bounds.
    #[must_use]
    pub fn location(&self, id: LocationId) -> MemoryLocation {
        self.locations[id.index()]
    }

    /// Returns the number of abstract locations.
    #[must_use]
    pub fn nlocations(&self) -> usize {
        self.locations.len()
    }

    /// Returns every registered location ID.
    pub fn location_ids(&self) -> impl Iterator<Item = LocationId> {
        (0..self.locations.len()).map(LocationId)
    }

    /// Returns the may-point-to targets of a location.
    #[must_use]
    pub fn targets(&self, id: LocationId) -> &BTreeSet<LocationId> {
        &self.edges[id.index()]
    }

    /// Adds a may-point-to edge; returns `true` if it was new.
    pub fn add_edge(&mut self, from: LocationId, to: LocationId) -> bool {
        self.edges[from.index()].insert(to)
    }

    /// Returns the points-to set of an origin (empty if never recorded).
    #[must_use]
    pub fn points_to(&self, origin: Origin) -> BTreeSet<LocationId> {
        self.registers.get(&origin).cloned().unwrap_or_default()
    }

    /// Returns `true` if the origin may point to the given location.
    #[must_use]
    pub fn is_pointing_to(&self, origin: Origin, location: MemoryLocation) -> bool {
        let Some(id) = self.find(location) else {
            return false;
        };
        self.registers
            .get(&origin)
            .is_some_and(|set| set.contains(&id))
    }

    /// Adds locations to an origin's points-to set; returns `true` on growth.
    pub fn add_points_to(
        &mut self,
        origin: Origin,
        locations: impl IntoIterator<Item = LocationId>,
    ) -> bool {
        let set = self.registers.entry(origin).or_default();
        let before = set.len();
        set.extend(locations);
        set.len() != before
    }

    /// Marks a location as escaped (a member of external memory).
    ///
    /// Returns `true` if the mark was new.
    pub fn mark_escaped(&mut self, id: LocationId) -> bool {
        self.escaped.insert(id)
    }

    /// Returns `true` if the location escapes the translation unit.
    #[must_use]
    pub fn is_escaped(&self, id: LocationId) -> bool {
        self.escaped.contains(&id)
    }

    /// Returns the escaped locations.
    #[must_use]
    pub fn escaped(&self) -> &BTreeSet<LocationId> {
        &self.escaped
    }

    /// Returns how many whole-graph iterations the analysis needed.
    #[must_use]
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub(crate) fn set_iterations(&mut self, iterations: usize) {
        self.iterations = iterations;
    }
}

impl fmt::Display for PointsToGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for id in self.location_ids() {
            let escaped = if self.is_escaped(id) { " (escaped)" } else { "" };
            writeln!(f, "{id}: {:?}{escaped}", self.location(id))?;
            for target in self.targets(id) {
                writeln!(f, "  -> {target}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinguished_locations() {
        let ptg = PointsToGraph::new();
        assert_eq!(ptg.location(ptg.external()), MemoryLocation::External);
        assert_eq!(ptg.location(ptg.unknown()), MemoryLocation::Unknown);
        assert!(ptg.is_escaped(ptg.external()));
        assert!(!ptg.is_escaped(ptg.unknown()));
    }

    #[test]
    fn test_add_location_is_idempotent() {
        let mut ptg = PointsToGraph::new();
        let site = MemoryLocation::Alloca(NodeId::new(3));
        let a = ptg.add_location(site);
        let b = ptg.add_location(site);
        assert_eq!(a, b);
        assert_eq!(ptg.nlocations(), 3);
    }

    #[test]
    fn test_monotone_growth_reporting() {
        let mut ptg = PointsToGraph::new();
        let site = ptg.add_location(MemoryLocation::Malloc(NodeId::new(1)));
        let origin = Origin::Output(NodeId::new(1), 0);
        assert!(ptg.add_points_to(origin, [site]));
        assert!(!ptg.add_points_to(origin, [site]));
        assert!(ptg.add_edge(site, ptg.unknown()));
        assert!(!ptg.add_edge(site, ptg.unknown()));
    }
}
