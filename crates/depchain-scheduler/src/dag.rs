//! Scheduler dependency graph validation.

use crate::config::{SchedulerConfig, SchedulerSpec};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Cycle detected in scheduler dependencies at {0}")]
    CycleDetected(String),
    #[error("Duplicate scheduler name: {0}")]
    DuplicateScheduler(String),
    #[error("Scheduler {scheduler} references unknown scheduler {dependency}")]
    UnknownDependency { scheduler: String, dependency: String },
    #[error("Scheduler {scheduler} depends on {dependency}, which is not a chain scheduler")]
    NotAChainScheduler { scheduler: String, dependency: String },
    #[error("Scheduler {scheduler} lists {dependency} more than once")]
    RepeatedDependency { scheduler: String, dependency: String },
    #[error("Invalid cron expression for {scheduler}: {message}")]
    InvalidCron { scheduler: String, message: String },
    #[error("No schedulers configured")]
    Empty,
}

impl From<GraphError> for depchain_core::Error {
    fn from(err: GraphError) -> Self {
        depchain_core::Error::Configuration(err.to_string())
    }
}

/// A node in the scheduler graph.
#[derive(Debug, Clone)]
pub struct SchedulerNode {
    pub name: String,
    pub spec: SchedulerSpec,
}

/// Directed acyclic graph of schedulers; edges point from a dependency (or
/// fan-out target) to the scheduler that needs it.
#[derive(Debug)]
pub struct SchedulerGraph {
    graph: DiGraph<SchedulerNode, ()>,
    name_to_index: HashMap<String, NodeIndex>,
}

impl SchedulerGraph {
    /// Validate a configuration and build its graph.
    pub fn build(config: &SchedulerConfig) -> Result<Self, GraphError> {
        if config.schedulers.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();

        for spec in &config.schedulers {
            if name_to_index.contains_key(spec.name()) {
                return Err(GraphError::DuplicateScheduler(spec.name().to_string()));
            }
            if let SchedulerSpec::Nightly(nightly) = spec {
                cron::Schedule::from_str(&nightly.cron).map_err(|e| GraphError::InvalidCron {
                    scheduler: nightly.name.clone(),
                    message: e.to_string(),
                })?;
            }
            let idx = graph.add_node(SchedulerNode {
                name: spec.name().to_string(),
                spec: spec.clone(),
            });
            name_to_index.insert(spec.name().to_string(), idx);
        }

        for spec in &config.schedulers {
            let idx = name_to_index[spec.name()];
            let mut seen = Vec::new();
            for upstream in spec.upstream() {
                if seen.contains(&upstream) {
                    return Err(GraphError::RepeatedDependency {
                        scheduler: spec.name().to_string(),
                        dependency: upstream.clone(),
                    });
                }
                seen.push(upstream);

                let up_idx = *name_to_index.get(upstream).ok_or_else(|| {
                    GraphError::UnknownDependency {
                        scheduler: spec.name().to_string(),
                        dependency: upstream.clone(),
                    }
                })?;
                if matches!(spec, SchedulerSpec::Chain(_))
                    && !matches!(graph[up_idx].spec, SchedulerSpec::Chain(_))
                {
                    return Err(GraphError::NotAChainScheduler {
                        scheduler: spec.name().to_string(),
                        dependency: upstream.clone(),
                    });
                }
                graph.add_edge(up_idx, idx, ());
            }
        }

        let dag = SchedulerGraph {
            graph,
            name_to_index,
        };

        // Verify no cycles
        dag.topological_order()?;

        Ok(dag)
    }

    /// Schedulers ordered so that every scheduler follows its upstreams.
    pub fn topological_order(&self) -> Result<Vec<&SchedulerNode>, GraphError> {
        toposort(&self.graph, None)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|&idx| self.graph.node_weight(idx))
                    .collect()
            })
            .map_err(|cycle| GraphError::CycleDetected(self.graph[cycle.node_id()].name.clone()))
    }

    /// Schedulers with nothing upstream.
    pub fn roots(&self) -> Vec<&SchedulerNode> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, petgraph::Direction::Incoming)
                    .count()
                    == 0
            })
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Schedulers that depend on or fan out to `name`.
    pub fn dependents(&self, name: &str) -> Vec<&SchedulerNode> {
        self.name_to_index
            .get(name)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, petgraph::Direction::Outgoing)
                    .filter_map(|n| self.graph.node_weight(n))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<&SchedulerNode> {
        self.name_to_index
            .get(name)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}
