//! Resource dependency graph.
//!
//! Nodes are keyed by `Kind/name`; edges point from the dependent resource
//! to the resource it needs. The graph holds ids only, never resource
//! values, so it serializes cleanly and cycle detection is a plain DFS.

use matlas_core::{ApplyDocument, RefStrength, ResourceId, ResourceKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Why an edge exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeOrigin {
    /// A spec field names the target.
    Reference,
    /// Listed in `dependsOn`.
    Explicit,
    /// Everything in a project waits for the project.
    Project,
}

/// `from` requires `to`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from: ResourceId,
    pub to: ResourceId,
    pub strength: RefStrength,
    pub origin: EdgeOrigin,
    /// Spec field behind a reference edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl Edge {
    /// Relative weight: hard requirements outrank ordering hints.
    pub fn weight(&self) -> u32 {
        match self.strength {
            RefStrength::Required => 3,
            RefStrength::Optional => 2,
            RefStrength::Soft => 1,
        }
    }
}

/// A reference that matched nothing in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unresolved {
    pub from: ResourceId,
    pub target_kind: ResourceKind,
    pub target: String,
    pub field: String,
    pub strength: RefStrength,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub nodes: BTreeSet<ResourceId>,
    pub edges: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<Unresolved>,
    /// `dependsOn` entries that could not be parsed, with the reason.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub malformed: Vec<(ResourceId, String, String)>,
}

impl DependencyGraph {
    /// Build the graph of a document.
    ///
    /// References resolve against `metadata.name` first and the target's
    /// natural key second.
    pub fn build(doc: &ApplyDocument) -> Self {
        let mut graph = Self::default();
        for resource in &doc.resources {
            graph.nodes.insert(resource.id());
        }
        let projects: Vec<ResourceId> = doc
            .of_kind(ResourceKind::Project)
            .map(|r| r.id())
            .collect();

        for resource in &doc.resources {
            let from = resource.id();

            for reference in resource.references() {
                match doc.resolve(reference.kind, &reference.name) {
                    Some(target) if target.id() != from => graph.add_edge(Edge {
                        from: from.clone(),
                        to: target.id(),
                        strength: reference.strength,
                        origin: EdgeOrigin::Reference,
                        field: Some(reference.field.clone()),
                    }),
                    Some(_) => {}
                    None => graph.unresolved.push(Unresolved {
                        from: from.clone(),
                        target_kind: reference.kind,
                        target: reference.name.clone(),
                        field: reference.field.clone(),
                        strength: reference.strength,
                    }),
                }
            }

            for entry in &resource.depends_on {
                match entry.parse::<ResourceId>() {
                    Ok(target) => {
                        let resolved = doc
                            .resolve(target.kind, &target.name)
                            .map(|r| r.id())
                            .unwrap_or(target);
                        graph.add_edge(Edge {
                            from: from.clone(),
                            to: resolved,
                            strength: RefStrength::Required,
                            origin: EdgeOrigin::Explicit,
                            field: None,
                        });
                    }
                    Err(reason) => graph.malformed.push((from.clone(), entry.clone(), reason)),
                }
            }

            if resource.kind() != ResourceKind::Project {
                for project in &projects {
                    graph.add_edge(Edge {
                        from: from.clone(),
                        to: project.clone(),
                        strength: RefStrength::Required,
                        origin: EdgeOrigin::Project,
                        field: None,
                    });
                }
            }
        }
        graph.edges.sort();
        graph.edges.dedup();
        graph
    }

    fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    /// Targets of explicit edges that are not nodes.
    pub fn dangling_edges(&self) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|e| !self.nodes.contains(&e.to))
            .collect()
    }

    /// Direct requirements of a node.
    pub fn requires(&self, id: &ResourceId) -> Vec<&ResourceId> {
        let mut out: Vec<&ResourceId> = self
            .edges
            .iter()
            .filter(|e| &e.from == id && self.nodes.contains(&e.to))
            .map(|e| &e.to)
            .collect();
        out.dedup();
        out
    }

    /// Nodes that directly require `id`.
    pub fn dependents(&self, id: &ResourceId) -> Vec<&ResourceId> {
        let mut out: Vec<&ResourceId> = self
            .edges
            .iter()
            .filter(|e| &e.to == id)
            .map(|e| &e.from)
            .collect();
        out.sort();
        out.dedup();
        out
    }

    fn adjacency(&self) -> BTreeMap<&ResourceId, BTreeSet<&ResourceId>> {
        let mut adj: BTreeMap<&ResourceId, BTreeSet<&ResourceId>> =
            self.nodes.iter().map(|n| (n, BTreeSet::new())).collect();
        for edge in &self.edges {
            if self.nodes.contains(&edge.to) {
                adj.entry(&edge.from).or_default().insert(&edge.to);
            }
        }
        adj
    }

    /// Every elementary cycle found by a DFS with a recursion stack.
    ///
    /// Each path starts and ends at the same node, e.g.
    /// `[DatabaseRole/a, DatabaseRole/b, DatabaseRole/a]`. A cycle is
    /// reported once regardless of the node it was entered from.
    pub fn find_cycles(&self) -> Vec<Vec<ResourceId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            OnStack,
            Done,
        }

        fn visit<'a>(
            node: &'a ResourceId,
            adj: &BTreeMap<&'a ResourceId, BTreeSet<&'a ResourceId>>,
            marks: &mut BTreeMap<&'a ResourceId, Mark>,
            stack: &mut Vec<&'a ResourceId>,
            seen: &mut BTreeSet<BTreeSet<&'a ResourceId>>,
            cycles: &mut Vec<Vec<ResourceId>>,
        ) {
            marks.insert(node, Mark::OnStack);
            stack.push(node);
            if let Some(next) = adj.get(node) {
                for target in next {
                    match marks.get(target).copied().unwrap_or(Mark::New) {
                        Mark::New => visit(target, adj, marks, stack, seen, cycles),
                        Mark::OnStack => {
                            if let Some(start) = stack.iter().position(|n| n == target) {
                                let members: BTreeSet<&ResourceId> =
                                    stack[start..].iter().copied().collect();
                                if seen.insert(members) {
                                    let mut path: Vec<ResourceId> =
                                        stack[start..].iter().map(|n| (*n).clone()).collect();
                                    path.push((*target).clone());
                                    cycles.push(path);
                                }
                            }
                        }
                        Mark::Done => {}
                    }
                }
            }
            stack.pop();
            marks.insert(node, Mark::Done);
        }

        let adj = self.adjacency();
        let mut marks: BTreeMap<&ResourceId, Mark> = BTreeMap::new();
        let mut seen = BTreeSet::new();
        let mut cycles = Vec::new();
        let mut stack = Vec::new();
        for node in &self.nodes {
            if marks.get(node).copied().unwrap_or(Mark::New) == Mark::New {
                visit(node, &adj, &mut marks, &mut stack, &mut seen, &mut cycles);
            }
        }
        cycles
    }

    pub fn is_acyclic(&self) -> bool {
        self.find_cycles().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matlas_core::Resource;
    use matlas_core::resources::{
        ClusterSpec, DatabaseRoleSpec, DatabaseUserSpec, InheritedRole, ProjectSpec, UserScope,
    };

    fn role(name: &str, inherits: &str) -> Resource {
        Resource::new(
            name,
            DatabaseRoleSpec {
                database_name: "admin".into(),
                inherited_roles: vec![InheritedRole {
                    role_name: inherits.into(),
                    database_name: "admin".into(),
                }],
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_edges_from_references_and_project() {
        let doc = ApplyDocument::new("d")
            .with_resource(Resource::new("p1", ProjectSpec::default()))
            .with_resource(Resource::new("c1", ClusterSpec::default()))
            .with_resource(Resource::new(
                "u1",
                DatabaseUserSpec {
                    scopes: vec![UserScope::cluster("c1")],
                    ..Default::default()
                },
            ));
        let graph = DependencyGraph::build(&doc);
        let u1 = ResourceId::new(ResourceKind::DatabaseUser, "u1");
        let requires = graph.requires(&u1);
        assert!(requires.contains(&&ResourceId::new(ResourceKind::Cluster, "c1")));
        assert!(requires.contains(&&ResourceId::new(ResourceKind::Project, "p1")));
        assert!(graph.is_acyclic());
    }

    #[test]
    fn test_two_role_cycle_reported_once() {
        let doc = ApplyDocument::new("d")
            .with_resource(role("a", "b"))
            .with_resource(role("b", "a"));
        let graph = DependencyGraph::build(&doc);
        let cycles = graph.find_cycles();
        assert_eq!(cycles.len(), 1);
        let path: Vec<String> = cycles[0].iter().map(|id| id.to_string()).collect();
        assert_eq!(
            path,
            vec!["DatabaseRole/a", "DatabaseRole/b", "DatabaseRole/a"]
        );
    }

    #[test]
    fn test_unresolved_references_are_collected() {
        let doc = ApplyDocument::new("d").with_resource(Resource::new(
            "u1",
            DatabaseUserSpec {
                scopes: vec![UserScope::cluster("missing")],
                ..Default::default()
            },
        ));
        let graph = DependencyGraph::build(&doc);
        assert_eq!(graph.unresolved.len(), 1);
        assert_eq!(graph.unresolved[0].target, "missing");
    }

    #[test]
    fn test_explicit_dependency_and_dangling_target() {
        let doc = ApplyDocument::new("d").with_resource(
            Resource::new("c1", ClusterSpec::default()).with_depends_on("Cluster/ghost"),
        );
        let graph = DependencyGraph::build(&doc);
        assert_eq!(graph.dangling_edges().len(), 1);
    }
}
