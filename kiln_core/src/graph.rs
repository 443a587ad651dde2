//! `BuildGraph`: construction, cycle detection, topological scheduling
//! (`spec.md` §4.E).

use std::collections::{HashMap, HashSet};

use crate::error::GraphError;
use crate::node::BuildNode;
use crate::status::BuildStatus;
use crate::target::{Target, TargetId};

/// Cycle-detection discipline, chosen at graph construction time.
/// `spec.md` §9 leaves the default unspecified; kiln defaults to
/// `Deferred` for large graphs (cheaper to build, one batch validation),
/// matching the open question's suggestion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstructionMode {
    /// Rejects each added edge that would close a cycle, at insertion
    /// time: O(V) per insertion via a DFS from the edge's target looking
    /// for the edge's source.
    Strict,
    /// Accepts all edges; a single O(V+E) three-color DFS validates the
    /// whole graph in `validate()`.
    Deferred,
}

impl Default for ConstructionMode {
    fn default() -> Self {
        ConstructionMode::Deferred
    }
}

/// Arena-backed graph: a `Vec<BuildNode>` plus a `TargetId -> index` map,
/// with a separate reverse-edge index. No node holds a pointer to another
/// node or to the graph (`spec.md` §9 "arena + index").
pub struct BuildGraph {
    mode: ConstructionMode,
    nodes: Vec<BuildNode>,
    index: HashMap<TargetId, usize>,
    /// Forward edges: node -> the set of targets it depends on.
    dependencies: HashMap<TargetId, HashSet<TargetId>>,
    /// Reverse edges: node -> the set of targets that depend on it.
    dependents: HashMap<TargetId, HashSet<TargetId>>,
    validated: bool,
}

impl BuildGraph {
    pub fn new(mode: ConstructionMode) -> Self {
        Self {
            mode,
            nodes: Vec::new(),
            index: HashMap::new(),
            dependencies: HashMap::new(),
            dependents: HashMap::new(),
            validated: false,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add_target(&mut self, target: Target) -> Result<(), GraphError> {
        let id = target.id.clone();
        if self.index.contains_key(&id) {
            // Re-adding the identical target is treated as a no-op at the
            // graph layer; duplicate-target rejection with a richer error
            // belongs to the loader (`kiln_core::ConfigError::DuplicateTarget`).
            return Ok(());
        }
        let idx = self.nodes.len();
        self.nodes.push(BuildNode::new(target));
        self.index.insert(id.clone(), idx);
        self.dependencies.entry(id.clone()).or_default();
        self.dependents.entry(id).or_default();
        self.validated = false;
        Ok(())
    }

    /// Adds an edge `from -> to` (`from` depends on `to`). Idempotent: a
    /// repeated call is a no-op (`spec.md` §8 round-trip law).
    pub fn add_dependency(&mut self, from: TargetId, to: TargetId) -> Result<(), GraphError> {
        if !self.index.contains_key(&from) {
            return Err(GraphError::MissingDependency {
                from: from.clone(),
                to,
            });
        }
        if !self.index.contains_key(&to) {
            return Err(GraphError::MissingDependency { from, to });
        }

        if self.mode == ConstructionMode::Strict {
            // Reject edges that would close a cycle: DFS from `to` looking
            // for `from`. If found, inserting `from -> to` would create a
            // path to back `to` around to `from`.
            if self.reachable(&to, &from) {
                return Err(GraphError::Cycle(vec![from, to]));
            }
        }

        self.dependencies
            .entry(from.clone())
            .or_default()
            .insert(to.clone());
        self.dependents.entry(to).or_default().insert(from);
        self.validated = false;
        Ok(())
    }

    fn reachable(&self, from: &TargetId, to: &TargetId) -> bool {
        let mut stack = vec![from.clone()];
        let mut seen = HashSet::new();
        while let Some(cur) = stack.pop() {
            if &cur == to {
                return true;
            }
            if !seen.insert(cur.clone()) {
                continue;
            }
            if let Some(deps) = self.dependencies.get(&cur) {
                stack.extend(deps.iter().cloned());
            }
        }
        false
    }

    /// Runs a single three-color DFS over the whole graph. On success,
    /// marks the graph validated (so `topological_order` and
    /// `ready_nodes` may be called). On failure, returns the cycle path.
    pub fn validate(&mut self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut color: HashMap<TargetId, Color> =
            self.index.keys().map(|k| (k.clone(), Color::White)).collect();

        fn visit(
            node: &TargetId,
            deps: &HashMap<TargetId, HashSet<TargetId>>,
            color: &mut HashMap<TargetId, Color>,
            path: &mut Vec<TargetId>,
        ) -> Result<(), GraphError> {
            color.insert(node.clone(), Color::Gray);
            path.push(node.clone());

            if let Some(children) = deps.get(node) {
                let mut sorted: Vec<&TargetId> = children.iter().collect();
                sorted.sort();
                for child in sorted {
                    match color.get(child).copied().unwrap_or(Color::White) {
                        Color::White => visit(child, deps, color, path)?,
                        Color::Gray => {
                            let start = path.iter().position(|t| t == child).unwrap_or(0);
                            let mut cycle = path[start..].to_vec();
                            cycle.push(child.clone());
                            return Err(GraphError::Cycle(cycle));
                        }
                        Color::Black => {}
                    }
                }
            }

            path.pop();
            color.insert(node.clone(), Color::Black);
            Ok(())
        }

        let mut keys: Vec<TargetId> = self.index.keys().cloned().collect();
        keys.sort();
        for id in &keys {
            if color.get(id).copied() == Some(Color::White) {
                let mut path = Vec::new();
                visit(id, &self.dependencies, &mut color, &mut path)?;
            }
        }

        self.validated = true;
        tracing::debug!(nodes = self.nodes.len(), "build graph validated");
        Ok(())
    }

    pub fn node(&self, id: &TargetId) -> Option<&BuildNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn dependencies_of(&self, id: &TargetId) -> &HashSet<TargetId> {
        static EMPTY: once_cell_like::Lazy<HashSet<TargetId>> = once_cell_like::Lazy::new();
        self.dependencies.get(id).unwrap_or_else(|| EMPTY.get())
    }

    pub fn dependents_of(&self, id: &TargetId) -> &HashSet<TargetId> {
        static EMPTY: once_cell_like::Lazy<HashSet<TargetId>> = once_cell_like::Lazy::new();
        self.dependents.get(id).unwrap_or_else(|| EMPTY.get())
    }

    /// `depth(n)` is `0` for leaves, `1 + max(depth(d) for d in deps)`
    /// otherwise; memoized on the node.
    ///
    /// Requires a validated graph: a cyclic `Deferred`-mode graph that
    /// hasn't run [`Self::validate`] yet would recurse without
    /// terminating.
    pub fn depth(&self, id: &TargetId) -> u32 {
        debug_assert!(self.validated, "depth() called on an unvalidated graph");
        let node = match self.node(id) {
            Some(n) => n,
            None => return 0,
        };
        if let Some(d) = node.memoized_depth() {
            return d;
        }
        let deps = self.dependencies_of(id);
        let depth = if deps.is_empty() {
            0
        } else {
            1 + deps.iter().map(|d| self.depth(d)).max().unwrap_or(0)
        };
        node.set_memoized_depth(depth);
        depth
    }

    /// All targets currently eligible to move `Pending -> Ready`: every
    /// dependency has reached a satisfied terminal state. Ordered by
    /// `(depth descending, target_id lex ascending)` per `spec.md` §4.E.
    ///
    /// Requires a validated graph (see [`Self::depth`]).
    pub fn ready_nodes(&self) -> Vec<TargetId> {
        debug_assert!(self.validated, "ready_nodes() called on an unvalidated graph");
        let mut ready: Vec<TargetId> = self
            .index
            .keys()
            .filter(|id| {
                let node = &self.nodes[self.index[*id]];
                node.status() == BuildStatus::Pending
                    && self
                        .dependencies_of(id)
                        .iter()
                        .all(|d| self.node(d).map(|n| n.status().is_terminal_satisfied()).unwrap_or(false))
            })
            .cloned()
            .collect();

        ready.sort_by(|a, b| self.depth(b).cmp(&self.depth(a)).then_with(|| a.cmp(b)));
        ready
    }

    /// A full deterministic topological order (ignores current node
    /// status, unlike [`Self::ready_nodes`]), using the same
    /// depth-descending / id-ascending tie-break.
    ///
    /// Unlike [`Self::depth`]/[`Self::ready_nodes`], this takes `&mut
    /// self` and can close the validation gap itself: an unvalidated
    /// graph is validated here, returning a `GraphError` on a cycle
    /// instead of recursing forever.
    pub fn topological_order(&mut self) -> Result<Vec<TargetId>, GraphError> {
        if !self.validated {
            self.validate()?;
        }

        let mut in_degree: HashMap<TargetId, usize> = self
            .index
            .keys()
            .map(|id| (id.clone(), self.dependencies_of(id).len()))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut frontier: Vec<TargetId> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| id.clone())
            .collect();
        frontier.sort_by(|a, b| self.depth(b).cmp(&self.depth(a)).then_with(|| a.cmp(b)));

        while let Some(id) = frontier.pop() {
            order.push(id.clone());
            let mut newly_free = Vec::new();
            for dependent in self.dependents_of(&id).clone() {
                if let Some(deg) = in_degree.get_mut(&dependent) {
                    *deg -= 1;
                    if *deg == 0 {
                        newly_free.push(dependent);
                    }
                }
            }
            newly_free.sort_by(|a, b| self.depth(b).cmp(&self.depth(a)).then_with(|| a.cmp(b)));
            frontier.extend(newly_free);
            frontier.sort_by(|a, b| self.depth(b).cmp(&self.depth(a)).then_with(|| a.cmp(b)));
        }

        if order.len() != self.nodes.len() {
            // validate() above should have caught this; defensive fallback.
            return Err(GraphError::Cycle(Vec::new()));
        }

        Ok(order)
    }

    /// All target ids satisfying `predicate`, for ad hoc sub-graph queries
    /// (e.g. "just the test targets").
    pub fn filter(&self, predicate: impl Fn(&Target) -> bool) -> Vec<TargetId> {
        self.nodes
            .iter()
            .filter(|n| predicate(&n.target))
            .map(|n| n.target.id.clone())
            .collect()
    }

    pub fn all_ids(&self) -> Vec<TargetId> {
        self.index.keys().cloned().collect()
    }
}

/// A tiny stand-in for `once_cell::sync::Lazy<HashSet<T>>` specialized to
/// an empty, never-mutated set, used only so `dependencies_of`/
/// `dependents_of` can return a `&HashSet` for targets with no recorded
/// edges without allocating on every call.
mod once_cell_like {
    use std::sync::OnceLock;

    pub struct Lazy<T>(OnceLock<T>);

    impl<T: Default> Lazy<T> {
        pub const fn new() -> Self {
            Lazy(OnceLock::new())
        }

        pub fn get(&self) -> &T {
            self.0.get_or_init(T::default)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{LanguageTag, TargetKind};

    fn t(name: &str) -> Target {
        Target::new(
            TargetId::new("ws", "p", name),
            TargetKind::Library,
            LanguageTag::new("generic"),
        )
    }

    #[test]
    fn empty_graph_validates() {
        let mut g = BuildGraph::new(ConstructionMode::Deferred);
        assert!(g.validate().is_ok());
        assert!(g.ready_nodes().is_empty());
    }

    #[test]
    fn two_node_linear_graph_ready_order() {
        let mut g = BuildGraph::new(ConstructionMode::Deferred);
        g.add_target(t("lib")).unwrap();
        g.add_target(t("app")).unwrap();
        g.add_dependency(TargetId::new("ws", "p", "app"), TargetId::new("ws", "p", "lib"))
            .unwrap();
        g.validate().unwrap();

        let ready = g.ready_nodes();
        assert_eq!(ready, vec![TargetId::new("ws", "p", "lib")]);

        g.node(&TargetId::new("ws", "p", "lib"))
            .unwrap()
            .transition(BuildStatus::Ready);
        g.node(&TargetId::new("ws", "p", "lib"))
            .unwrap()
            .transition(BuildStatus::Running);
        g.node(&TargetId::new("ws", "p", "lib"))
            .unwrap()
            .transition(BuildStatus::Success);

        let ready = g.ready_nodes();
        assert_eq!(ready, vec![TargetId::new("ws", "p", "app")]);
    }

    #[test]
    #[should_panic(expected = "unvalidated")]
    #[cfg(debug_assertions)]
    fn ready_nodes_on_unvalidated_graph_panics_in_debug() {
        let mut g = BuildGraph::new(ConstructionMode::Deferred);
        g.add_target(t("a")).unwrap();
        g.add_target(t("b")).unwrap();
        g.add_dependency(TargetId::new("ws", "p", "a"), TargetId::new("ws", "p", "b"))
            .unwrap();
        g.add_dependency(TargetId::new("ws", "p", "b"), TargetId::new("ws", "p", "a"))
            .unwrap();
        let _ = g.ready_nodes();
    }

    #[test]
    fn deferred_mode_rejects_cycle_with_path() {
        let mut g = BuildGraph::new(ConstructionMode::Deferred);
        g.add_target(t("a")).unwrap();
        g.add_target(t("b")).unwrap();
        g.add_dependency(TargetId::new("ws", "p", "a"), TargetId::new("ws", "p", "b"))
            .unwrap();
        g.add_dependency(TargetId::new("ws", "p", "b"), TargetId::new("ws", "p", "a"))
            .unwrap();

        let err = g.validate().unwrap_err();
        match err {
            GraphError::Cycle(path) => {
                assert!(path.contains(&TargetId::new("ws", "p", "a")));
                assert!(path.contains(&TargetId::new("ws", "p", "b")));
            }
            _ => panic!("expected Cycle"),
        }
    }

    #[test]
    fn strict_mode_rejects_cycle_at_insertion() {
        let mut g = BuildGraph::new(ConstructionMode::Strict);
        g.add_target(t("a")).unwrap();
        g.add_target(t("b")).unwrap();
        g.add_dependency(TargetId::new("ws", "p", "a"), TargetId::new("ws", "p", "b"))
            .unwrap();
        let err = g.add_dependency(TargetId::new("ws", "p", "b"), TargetId::new("ws", "p", "a"));
        assert!(matches!(err, Err(GraphError::Cycle(_))));
    }

    #[test]
    fn add_dependency_is_idempotent() {
        let mut g = BuildGraph::new(ConstructionMode::Deferred);
        g.add_target(t("a")).unwrap();
        g.add_target(t("b")).unwrap();
        let from = TargetId::new("ws", "p", "a");
        let to = TargetId::new("ws", "p", "b");
        g.add_dependency(from.clone(), to.clone()).unwrap();
        g.add_dependency(from.clone(), to.clone()).unwrap();
        assert_eq!(g.dependencies_of(&from).len(), 1);
    }

    #[test]
    fn missing_dependency_endpoint_errors() {
        let mut g = BuildGraph::new(ConstructionMode::Deferred);
        g.add_target(t("a")).unwrap();
        let err = g.add_dependency(TargetId::new("ws", "p", "a"), TargetId::new("ws", "p", "missing"));
        assert!(matches!(err, Err(GraphError::MissingDependency { .. })));
    }

    #[test]
    fn topological_order_respects_edges() {
        let mut g = BuildGraph::new(ConstructionMode::Deferred);
        g.add_target(t("a")).unwrap();
        g.add_target(t("b")).unwrap();
        g.add_target(t("c")).unwrap();
        g.add_dependency(TargetId::new("ws", "p", "b"), TargetId::new("ws", "p", "a"))
            .unwrap();
        g.add_dependency(TargetId::new("ws", "p", "c"), TargetId::new("ws", "p", "b"))
            .unwrap();

        let order = g.topological_order().unwrap();
        let pos = |n: &str| order.iter().position(|id| id.name() == n).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }

    #[test]
    fn depth_is_memoized_and_correct() {
        let mut g = BuildGraph::new(ConstructionMode::Deferred);
        g.add_target(t("a")).unwrap();
        g.add_target(t("b")).unwrap();
        g.add_target(t("c")).unwrap();
        g.add_dependency(TargetId::new("ws", "p", "b"), TargetId::new("ws", "p", "a"))
            .unwrap();
        g.add_dependency(TargetId::new("ws", "p", "c"), TargetId::new("ws", "p", "b"))
            .unwrap();
        g.validate().unwrap();

        assert_eq!(g.depth(&TargetId::new("ws", "p", "a")), 0);
        assert_eq!(g.depth(&TargetId::new("ws", "p", "b")), 1);
        assert_eq!(g.depth(&TargetId::new("ws", "p", "c")), 2);
    }
}
