//! The typed dependency graph over the repository collection.
//!
//! Production and peer edges are ordering-significant; development edges are
//! ignored for publishing order and tolerated in cycles. Node iteration and
//! topological-sort tie-breaking are in ascending name order so that every
//! derived output is deterministic.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use semver::Version;

use crate::repo::Repository;

/// Kind of a dependency edge. Precedence when the same target appears in
/// several manifest sections: `Prod > Peer > Dev`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DepKind {
    Prod,
    Peer,
    Dev,
}

impl DepKind {
    /// Production and peer edges force dependents to republish; dev edges
    /// never do.
    pub fn causes_republish(self) -> bool {
        matches!(self, DepKind::Prod | DepKind::Peer)
    }
}

impl fmt::Display for DepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepKind::Prod => write!(f, "prod"),
            DepKind::Peer => write!(f, "peer"),
            DepKind::Dev => write!(f, "dev"),
        }
    }
}

/// An edge to another repository in the collection.
#[derive(Debug, Clone)]
pub struct DepEdge {
    pub kind: DepKind,
    pub range: String,
}

/// A graph node: one repository plus its in-collection edges.
#[derive(Debug, Clone)]
pub struct Node {
    pub version: Version,
    /// Outgoing edges: dependency name -> edge. At most one edge is retained
    /// per target; kind precedence decides which.
    pub deps: BTreeMap<String, DepEdge>,
    /// Names of repositories that depend on this one (any kind).
    pub dependents: BTreeSet<String>,
    pub publishable: bool,
}

/// Raised by [`DependencyGraph::topological_sort`] when the selected edges
/// contain a cycle.
#[derive(Debug, Clone)]
pub struct CycleError {
    /// Nodes that could not be emitted, in ascending name order.
    pub unvisited: Vec<String>,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "circular dependency involving: {}",
            self.unvisited.join(", ")
        )
    }
}

impl std::error::Error for CycleError {}

/// Cycles split by the edge kinds that produce them.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Cycles over prod+peer edges. These block publishing.
    pub production: Vec<Vec<String>>,
    /// Cycles over dev edges only. Tolerated and merely reported.
    pub dev: Vec<Vec<String>>,
}

/// Non-fatal findings from walking all edges.
#[derive(Debug, Default)]
pub struct GraphAnalysis {
    /// `(package, dependency)` pairs whose range is the wildcard literal.
    pub wildcard_ranges: Vec<(String, String)>,
    /// `(package, dependency)` peer dependencies pointing outside the graph.
    pub external_peers: Vec<(String, String)>,
}

/// Render a cycle as `x → y → x`.
pub fn format_cycle(members: &[String]) -> String {
    let mut parts: Vec<&str> = members.iter().map(String::as_str).collect();
    if let Some(first) = members.first() {
        parts.push(first);
    }
    parts.join(" → ")
}

/// The dependency graph. Built once per operation, then read-only.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, Node>,
}

impl DependencyGraph {
    /// Build the graph in two passes: nodes first, then edges whose target
    /// is another node in the set (external dependencies do not appear).
    pub fn build(repos: &[Repository]) -> Self {
        let mut nodes: BTreeMap<String, Node> = repos
            .iter()
            .map(|repo| {
                (
                    repo.name.clone(),
                    Node {
                        version: repo.version.clone(),
                        deps: BTreeMap::new(),
                        dependents: BTreeSet::new(),
                        publishable: repo.publishable,
                    },
                )
            })
            .collect();

        for repo in repos {
            // Precedence: prod first, then peer, then dev; first insert wins.
            let sections = [
                (&repo.dependencies, DepKind::Prod),
                (&repo.peer_dependencies, DepKind::Peer),
                (&repo.dev_dependencies, DepKind::Dev),
            ];
            for (section, kind) in sections {
                for (dep_name, range) in section {
                    if dep_name == &repo.name || !nodes.contains_key(dep_name) {
                        continue;
                    }
                    let node = nodes.get_mut(&repo.name).expect("node created in pass one");
                    if node.deps.contains_key(dep_name) {
                        continue;
                    }
                    node.deps.insert(
                        dep_name.clone(),
                        DepEdge {
                            kind,
                            range: range.clone(),
                        },
                    );
                    nodes
                        .get_mut(dep_name)
                        .expect("node created in pass one")
                        .dependents
                        .insert(repo.name.clone());
                }
            }
        }

        DependencyGraph { nodes }
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Nodes in ascending name order.
    pub fn nodes(&self) -> impl Iterator<Item = (&String, &Node)> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Kahn's algorithm. A node is ready when all of its selected-kind
    /// dependencies have been emitted; whenever several nodes are ready at
    /// once they are emitted in ascending name order.
    pub fn topological_sort(&self, exclude_dev: bool) -> Result<Vec<String>, CycleError> {
        let selected = |kind: DepKind| !(exclude_dev && kind == DepKind::Dev);

        let mut blocked: BTreeMap<String, usize> = self
            .nodes
            .iter()
            .map(|(name, node)| {
                let count = node.deps.values().filter(|e| selected(e.kind)).count();
                (name.clone(), count)
            })
            .collect();

        let mut ready: BTreeSet<String> = blocked
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| name.clone())
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(name) = ready.pop_first() {
            for dependent in &self.nodes[&name].dependents {
                let edge = &self.nodes[dependent].deps[&name];
                if !selected(edge.kind) {
                    continue;
                }
                let count = blocked
                    .get_mut(dependent)
                    .expect("dependent is a node in the graph");
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependent.clone());
                }
            }
            order.push(name);
        }

        if order.len() < self.nodes.len() {
            let emitted: HashSet<&String> = order.iter().collect();
            let unvisited = self
                .nodes
                .keys()
                .filter(|name| !emitted.contains(name))
                .cloned()
                .collect();
            return Err(CycleError { unvisited });
        }

        Ok(order)
    }

    /// Every elementary cycle over all edges, reported once by canonical
    /// sorted-member key. Paths start at their alphabetically smallest
    /// member because starts are tried in ascending order.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        self.cycles_over(|_| true)
    }

    /// Two independent passes: cycles over prod+peer edges (which block
    /// publishing) and cycles over dev edges (which are tolerated).
    pub fn detect_cycles_by_type(&self) -> CycleReport {
        CycleReport {
            production: self.cycles_over(|kind| kind.causes_republish()),
            dev: self.cycles_over(|kind| kind == DepKind::Dev),
        }
    }

    fn cycles_over(&self, selected: impl Fn(DepKind) -> bool + Copy) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut seen_keys: HashSet<String> = HashSet::new();

        for start in self.nodes.keys() {
            let mut path = vec![start.clone()];
            let mut on_path: HashSet<String> = HashSet::from([start.clone()]);
            self.cycle_dfs(start, start, selected, &mut path, &mut on_path, &mut cycles, &mut seen_keys);
        }

        cycles
    }

    #[allow(clippy::too_many_arguments)]
    fn cycle_dfs(
        &self,
        current: &str,
        start: &str,
        selected: impl Fn(DepKind) -> bool + Copy,
        path: &mut Vec<String>,
        on_path: &mut HashSet<String>,
        cycles: &mut Vec<Vec<String>>,
        seen_keys: &mut HashSet<String>,
    ) {
        for (dep, edge) in &self.nodes[current].deps {
            if !selected(edge.kind) {
                continue;
            }
            if dep == start {
                let mut key_members: Vec<&str> = path.iter().map(String::as_str).collect();
                key_members.sort_unstable();
                if seen_keys.insert(key_members.join(",")) {
                    cycles.push(path.clone());
                }
            } else if !on_path.contains(dep) {
                path.push(dep.clone());
                on_path.insert(dep.clone());
                self.cycle_dfs(dep, start, selected, path, on_path, cycles, seen_keys);
                on_path.remove(dep);
                path.pop();
            }
        }
    }

    /// Walk all edges (and the raw peer sections of `repos`) for non-fatal
    /// findings: wildcard ranges and peer dependencies on external packages.
    pub fn analyze(&self, repos: &[Repository]) -> GraphAnalysis {
        let mut analysis = GraphAnalysis::default();

        for (name, node) in &self.nodes {
            for (dep, edge) in &node.deps {
                if edge.range.trim() == "*" {
                    analysis.wildcard_ranges.push((name.clone(), dep.clone()));
                }
            }
        }

        for repo in repos {
            for dep in repo.peer_dependencies.keys() {
                if !self.nodes.contains_key(dep) {
                    analysis
                        .external_peers
                        .push((repo.name.clone(), dep.clone()));
                }
            }
        }

        analysis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn repo(name: &str, version: &str) -> Repository {
        Repository {
            name: name.to_string(),
            path: PathBuf::from(format!("/repos/{name}")),
            version: Version::parse(version).unwrap(),
            dependencies: Default::default(),
            peer_dependencies: Default::default(),
            dev_dependencies: Default::default(),
            publishable: true,
        }
    }

    fn with_dep(mut r: Repository, name: &str, range: &str) -> Repository {
        r.dependencies.insert(name.to_string(), range.to_string());
        r
    }

    fn with_dev_dep(mut r: Repository, name: &str, range: &str) -> Repository {
        r.dev_dependencies.insert(name.to_string(), range.to_string());
        r
    }

    fn with_peer_dep(mut r: Repository, name: &str, range: &str) -> Repository {
        r.peer_dependencies.insert(name.to_string(), range.to_string());
        r
    }

    #[test]
    fn test_build_edges_and_dependents() {
        let repos = vec![
            repo("lib", "0.1.0"),
            with_dep(repo("app", "0.2.0"), "lib", "^0.1.0"),
        ];
        let graph = DependencyGraph::build(&repos);

        let app = graph.node("app").unwrap();
        assert_eq!(app.deps["lib"].kind, DepKind::Prod);
        assert_eq!(app.deps["lib"].range, "^0.1.0");

        let lib = graph.node("lib").unwrap();
        assert!(lib.dependents.contains("app"));
        assert!(lib.deps.is_empty());
    }

    #[test]
    fn test_external_dependencies_not_in_graph() {
        let repos = vec![with_dep(repo("app", "1.0.0"), "left-pad", "^1.0.0")];
        let graph = DependencyGraph::build(&repos);
        assert!(graph.node("app").unwrap().deps.is_empty());
        assert!(!graph.contains("left-pad"));
    }

    #[test]
    fn test_kind_precedence_prod_over_dev() {
        let mut a = with_dep(repo("a", "1.0.0"), "b", "^1.0.0");
        a.dev_dependencies.insert("b".into(), "*".into());
        let repos = vec![a, repo("b", "1.0.0")];
        let graph = DependencyGraph::build(&repos);
        assert_eq!(graph.node("a").unwrap().deps["b"].kind, DepKind::Prod);
    }

    #[test]
    fn test_kind_precedence_peer_over_dev() {
        let mut a = with_peer_dep(repo("a", "1.0.0"), "b", ">=1.0.0");
        a.dev_dependencies.insert("b".into(), "^1.0.0".into());
        let repos = vec![a, repo("b", "1.0.0")];
        let graph = DependencyGraph::build(&repos);
        assert_eq!(graph.node("a").unwrap().deps["b"].kind, DepKind::Peer);
    }

    #[test]
    fn test_topological_sort_chain() {
        let repos = vec![
            with_dep(repo("c", "0.3.0"), "b", "0.2.0"),
            with_dep(repo("b", "0.2.0"), "a", "0.1.0"),
            repo("a", "0.1.0"),
        ];
        let graph = DependencyGraph::build(&repos);
        let order = graph.topological_sort(true).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_topological_sort_alphabetical_ties() {
        // No edges at all: pure alphabetical emission.
        let repos = vec![repo("mango", "1.0.0"), repo("apple", "1.0.0"), repo("kiwi", "1.0.0")];
        let graph = DependencyGraph::build(&repos);
        let order = graph.topological_sort(true).unwrap();
        assert_eq!(order, vec!["apple", "kiwi", "mango"]);
    }

    #[test]
    fn test_topological_sort_deterministic() {
        let repos = vec![
            with_dep(repo("web", "1.0.0"), "core", "^1.0.0"),
            with_dep(repo("api", "1.0.0"), "core", "^1.0.0"),
            repo("core", "1.0.0"),
            with_dep(repo("cli", "1.0.0"), "api", "^1.0.0"),
        ];
        let graph = DependencyGraph::build(&repos);
        let first = graph.topological_sort(true).unwrap();
        let second = graph.topological_sort(true).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec!["core", "api", "cli", "web"]);
    }

    #[test]
    fn test_sort_respects_prod_and_peer_edges() {
        let repos = vec![
            with_peer_dep(repo("plugin", "1.0.0"), "host", "^1.0.0"),
            repo("host", "1.0.0"),
        ];
        let graph = DependencyGraph::build(&repos);
        let order = graph.topological_sort(true).unwrap();
        let host_idx = order.iter().position(|n| n == "host").unwrap();
        let plugin_idx = order.iter().position(|n| n == "plugin").unwrap();
        assert!(host_idx < plugin_idx);
    }

    #[test]
    fn test_dev_cycle_does_not_block_sort() {
        let repos = vec![
            with_dev_dep(repo("x", "1.0.0"), "y", "^1.0.0"),
            with_dev_dep(repo("y", "1.0.0"), "x", "^1.0.0"),
        ];
        let graph = DependencyGraph::build(&repos);
        let order = graph.topological_sort(true).unwrap();
        assert_eq!(order, vec!["x", "y"]);
    }

    #[test]
    fn test_prod_cycle_fails_sort_listing_members() {
        let repos = vec![
            with_dep(repo("x", "1.0.0"), "y", "^1.0.0"),
            with_dep(repo("y", "1.0.0"), "x", "^1.0.0"),
            repo("z", "1.0.0"),
        ];
        let graph = DependencyGraph::build(&repos);
        let err = graph.topological_sort(true).unwrap_err();
        assert_eq!(err.unvisited, vec!["x", "y"]);
        assert!(err.to_string().contains("circular dependency"));
    }

    #[test]
    fn test_detect_cycles_by_type() {
        let repos = vec![
            with_dep(repo("x", "1.0.0"), "y", "^1.0.0"),
            with_dep(repo("y", "1.0.0"), "x", "^1.0.0"),
            with_dev_dep(repo("p", "1.0.0"), "q", "*"),
            with_dev_dep(repo("q", "1.0.0"), "p", "*"),
        ];
        let graph = DependencyGraph::build(&repos);
        let report = graph.detect_cycles_by_type();
        assert_eq!(report.production.len(), 1);
        assert_eq!(report.production[0], vec!["x", "y"]);
        assert_eq!(report.dev.len(), 1);
        assert_eq!(report.dev[0], vec!["p", "q"]);
    }

    #[test]
    fn test_detect_cycles_reports_each_once() {
        let repos = vec![
            with_dep(repo("a", "1.0.0"), "b", "^1.0.0"),
            with_dep(repo("b", "1.0.0"), "a", "^1.0.0"),
        ];
        let graph = DependencyGraph::build(&repos);
        let cycles = graph.detect_cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(format_cycle(&cycles[0]), "a → b → a");
    }

    #[test]
    fn test_self_dependency_ignored() {
        let repos = vec![with_dep(repo("a", "1.0.0"), "a", "^1.0.0")];
        let graph = DependencyGraph::build(&repos);
        assert!(graph.node("a").unwrap().deps.is_empty());
        assert_eq!(graph.topological_sort(true).unwrap(), vec!["a"]);
    }

    #[test]
    fn test_analyze_wildcards_and_external_peers() {
        let repos = vec![
            with_dep(repo("a", "1.0.0"), "b", "*"),
            with_peer_dep(repo("b", "1.0.0"), "react", ">=17.0.0"),
        ];
        let graph = DependencyGraph::build(&repos);
        let analysis = graph.analyze(&repos);
        assert_eq!(analysis.wildcard_ranges, vec![("a".to_string(), "b".to_string())]);
        assert_eq!(
            analysis.external_peers,
            vec![("b".to_string(), "react".to_string())]
        );
    }
}
