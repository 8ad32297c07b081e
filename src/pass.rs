//! Pass infrastructure: the module wrapper, the pass trait, and change tracking.
//!
//! Passes transform an [`RvsdgModule`] in place and report through an
//! [`EventLog`] what they changed. The log is the library's diagnostics surface;
//! embedders that want textual logging wire a `log` backend and get the pass
//! boundaries at debug level.

use crate::rvsdg::Graph;
use crate::Result;

/// A graph plus its translation-unit identity.
#[derive(Debug, Clone)]
pub struct RvsdgModule {
    /// Name of the translation unit (usually the source path)
    pub name: String,
    graph: Graph,
}

impl RvsdgModule {
    /// Creates a module with an empty graph.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            graph: Graph::new(),
        }
    }

    /// Wraps an existing graph.
    #[must_use]
    pub fn with_graph(name: &str, graph: Graph) -> Self {
        Self {
            name: name.to_string(),
            graph,
        }
    }

    /// Returns the graph.
    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Returns the mutable graph.
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }
}

/// Kinds of recorded events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A normal-form rewrite was applied
    NodeNormalized,
    /// A dead node was removed
    NodePruned,
    /// A memory operation was rewritten onto partitioned states
    StateEncoded,
    /// A function was converted between IR and graph form
    FunctionConverted,
}

/// One recorded event.
#[derive(Debug, Clone)]
pub struct Event {
    /// What happened
    pub kind: EventKind,
    /// Human readable detail
    pub message: String,
}

/// An append-only log of pass events.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one event.
    pub fn record(&mut self, kind: EventKind, message: impl Into<String>) {
        self.events.push(Event {
            kind,
            message: message.into(),
        });
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns the number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns the number of events of one kind.
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }

    /// Returns the recorded events.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Appends all events of `other`.
    pub fn merge(&mut self, other: EventLog) {
        self.events.extend(other.events);
    }
}

/// A transformation over a module.
///
/// Passes run sequentially on one module at a time; a pass that mutates must
/// either complete or leave the module restartable.
pub trait RvsdgPass {
    /// Returns the short name of this pass.
    fn name(&self) -> &'static str;

    /// Returns a one-line description of this pass.
    fn description(&self) -> &'static str;

    /// Runs the pass. Returns `true` if the module changed.
    ///
    /// # Errors
    ///
    /// Passes surface construction errors; an `Unreachable` error means the
    /// module must be considered stale.
    fn run(&self, module: &mut RvsdgModule, events: &mut EventLog) -> Result<bool>;
}

/// Normalization to fixed point followed by pruning.
#[derive(Debug, Default)]
pub struct NormalizePass;

impl NormalizePass {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl RvsdgPass for NormalizePass {
    fn name(&self) -> &'static str {
        "normalize"
    }

    fn description(&self) -> &'static str {
        "Apply per-operation normal forms to fixed point, then prune dead nodes"
    }

    fn run(&self, module: &mut RvsdgModule, events: &mut EventLog) -> Result<bool> {
        let normalized = module.graph_mut().normalize();
        let pruned = module.graph_mut().prune();
        for _ in 0..normalized {
            events.record(EventKind::NodeNormalized, "normal form applied");
        }
        for _ in 0..pruned {
            events.record(EventKind::NodePruned, "dead node removed");
        }
        log::debug!(
            "normalize pass on '{}': {normalized} rewrites, {pruned} nodes pruned",
            module.name
        );
        Ok(normalized + pruned > 0)
    }
}

/// Runs a sequence of passes, collecting their events.
///
/// # Errors
///
/// Stops at the first failing pass and returns its error.
pub fn run_passes(module: &mut RvsdgModule, passes: &[&dyn RvsdgPass]) -> Result<EventLog> {
    let mut log = EventLog::new();
    for pass in passes {
        log::debug!("running pass '{}'", pass.name());
        pass.run(module, &mut log)?;
    }
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rvsdg::simple;
    use crate::types::Type;

    #[test]
    fn test_normalize_pass_reports_changes() {
        let mut module = RvsdgModule::new("test");
        let root = module.graph().root();
        let x = module.graph_mut().add_import(Type::Bit(32), "x");
        let zero = simple::bit_constant(module.graph_mut(), root, 32, 0).unwrap();
        // A dead constant plus a reducible addition built with normalization off.
        module
            .graph_mut()
            .normal_forms_mut()
            .set_mutable(crate::rvsdg::OpClass::Any, false);
        let sum = simple::bit_binary(
            module.graph_mut(),
            root,
            crate::rvsdg::BitBinaryKind::Add,
            32,
            x,
            zero,
        )
        .unwrap();
        module.graph_mut().add_export(sum, "sum").unwrap();
        module
            .graph_mut()
            .normal_forms_mut()
            .set_mutable(crate::rvsdg::OpClass::Any, true);

        let mut events = EventLog::new();
        let changed = NormalizePass::new()
            .run(&mut module, &mut events)
            .unwrap();
        assert!(changed);
        assert!(events.count(EventKind::NodeNormalized) >= 1);
        assert!(events.count(EventKind::NodePruned) >= 1);
        // The export now reads the import straight through.
        let exported = module.graph().region(root).results()[0].origin();
        assert_eq!(exported, x);
    }
}
