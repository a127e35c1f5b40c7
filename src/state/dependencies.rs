//! Resource dependency tracking.
//!
//! A [`ResourceGraph`] is a directed graph over logical resource names:
//! an edge from A to B means B depends on A. The orchestrator uses it to
//! verify that a computed execution plan is acyclic and ordered, and the
//! teardown engine uses it to name the dependents that keep a resource
//! from being removed.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use thiserror::Error;

/// Errors raised while analyzing a resource graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The graph contains a dependency cycle.
    #[error("Dependency cycle detected at resource '{0}'")]
    Cycle(String),

    /// A resource depends on a name that was never added.
    #[error("Resource '{resource}' depends on unknown resource '{dependency}'")]
    UnknownDependency { resource: String, dependency: String },
}

/// Directed dependency graph over logical resource names.
#[derive(Debug, Default)]
pub struct ResourceGraph {
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl ResourceGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource and its dependency edges. Dependencies must have
    /// been added before their dependents.
    pub fn add_resource<'a>(
        &mut self,
        name: &str,
        depends_on: impl IntoIterator<Item = &'a String>,
    ) -> Result<(), GraphError> {
        let node = *self
            .nodes
            .entry(name.to_string())
            .or_insert_with(|| self.graph.add_node(name.to_string()));

        for dependency in depends_on {
            let dep_node =
                *self
                    .nodes
                    .get(dependency)
                    .ok_or_else(|| GraphError::UnknownDependency {
                        resource: name.to_string(),
                        dependency: dependency.clone(),
                    })?;
            self.graph.add_edge(dep_node, node, ());
        }
        Ok(())
    }

    /// Number of resources in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Topological order of all resources: dependencies before dependents.
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        let order = toposort(&self.graph, None)
            .map_err(|cycle| GraphError::Cycle(self.graph[cycle.node_id()].clone()))?;
        Ok(order.into_iter().map(|n| self.graph[n].clone()).collect())
    }

    /// Direct dependents of a resource: everything with an edge from it.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        match self.nodes.get(name) {
            None => Vec::new(),
            Some(&node) => self
                .graph
                .neighbors_directed(node, Direction::Outgoing)
                .map(|n| self.graph[n].clone())
                .collect(),
        }
    }

    /// Check that a sequence lists every dependency before its dependents.
    pub fn respects_order(&self, sequence: &[String]) -> bool {
        let position: HashMap<&str, usize> = sequence
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        self.graph.edge_indices().all(|edge| {
            match self.graph.edge_endpoints(edge) {
                None => true,
                Some((dep, dependent)) => match (
                    position.get(self.graph[dep].as_str()),
                    position.get(self.graph[dependent].as_str()),
                ) {
                    (Some(dep_pos), Some(dependent_pos)) => dep_pos < dependent_pos,
                    _ => false,
                },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network_graph() -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        graph.add_resource("vpc", []).unwrap();
        graph
            .add_resource("igw", [&"vpc".to_string()])
            .unwrap();
        graph
            .add_resource("public-rt", [&"vpc".to_string(), &"igw".to_string()])
            .unwrap();
        graph
            .add_resource("public-1a", [&"vpc".to_string()])
            .unwrap();
        graph
            .add_resource(
                "public-1a-rta",
                [&"public-1a".to_string(), &"public-rt".to_string()],
            )
            .unwrap();
        graph
    }

    #[test]
    fn topological_order_puts_vpc_first() {
        let graph = network_graph();
        let order = graph.topological_order().unwrap();

        assert_eq!(order[0], "vpc");
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(pos("igw") < pos("public-rt"));
        assert!(pos("public-1a") < pos("public-1a-rta"));
        assert!(pos("public-rt") < pos("public-1a-rta"));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut graph = ResourceGraph::new();
        let err = graph
            .add_resource("igw", [&"vpc".to_string()])
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependency {
                resource: "igw".into(),
                dependency: "vpc".into(),
            }
        );
    }

    #[test]
    fn dependents_are_reported() {
        let graph = network_graph();
        let mut dependents = graph.dependents_of("vpc");
        dependents.sort();
        assert_eq!(dependents, vec!["igw", "public-1a", "public-rt"]);
        assert!(graph.dependents_of("public-1a-rta").is_empty());
    }

    #[test]
    fn respects_order_accepts_creation_order() {
        let graph = network_graph();
        let sequence: Vec<String> = ["vpc", "igw", "public-rt", "public-1a", "public-1a-rta"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(graph.respects_order(&sequence));
    }

    #[test]
    fn respects_order_rejects_dependent_before_dependency() {
        let graph = network_graph();
        let sequence: Vec<String> = ["vpc", "public-rt", "igw", "public-1a", "public-1a-rta"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(!graph.respects_order(&sequence));
    }
}
