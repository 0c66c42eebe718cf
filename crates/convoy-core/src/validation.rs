//! One-shot graph validation used by both the plan engine and the
//! publisher: build the graph, classify cycles, attempt the sort.
//!
//! Downstream code never observes a graph with undetected production cycles
//! when it requires a publishing order.

use anyhow::{Result, bail};
use tokio::sync::mpsc::UnboundedSender;

use crate::events::{Event, emit};
use crate::graph::{CycleReport, DependencyGraph, format_cycle};
use crate::repo::Repository;

#[derive(Debug, Clone)]
pub struct ValidateOptions {
    /// Abort with an error when prod/peer cycles exist. The publish path
    /// keeps the default; the plan path turns this off and reports the
    /// cycles as plan errors instead.
    pub fail_on_production_cycles: bool,
    pub log_cycles: bool,
    pub log_order: bool,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            fail_on_production_cycles: true,
            log_cycles: false,
            log_order: false,
        }
    }
}

/// The validated graph plus everything derived from it in one pass.
#[derive(Debug)]
pub struct ValidatedGraph {
    pub graph: DependencyGraph,
    /// Topological order under prod+peer edges; empty when the sort failed.
    pub publishing_order: Vec<String>,
    pub production_cycles: Vec<Vec<String>>,
    pub dev_cycles: Vec<Vec<String>>,
    pub sort_error: Option<String>,
}

/// Build and validate the graph for a repository set.
pub fn validate_graph(
    repos: &[Repository],
    opts: &ValidateOptions,
    events: Option<&UnboundedSender<Event>>,
) -> Result<ValidatedGraph> {
    let graph = DependencyGraph::build(repos);
    let CycleReport { production, dev } = graph.detect_cycles_by_type();

    if opts.log_cycles {
        for cycle in &production {
            emit(
                events,
                Event::Warning(format!("Production dependency cycle: {}", format_cycle(cycle))),
            );
        }
        for cycle in &dev {
            emit(
                events,
                Event::Info(format!("Dev dependency cycle (tolerated): {}", format_cycle(cycle))),
            );
        }
    }

    if opts.fail_on_production_cycles && !production.is_empty() {
        let rendered: Vec<String> = production
            .iter()
            .map(|cycle| format_cycle(cycle))
            .collect();
        bail!("Production dependency cycle: {}", rendered.join("; "));
    }

    let (publishing_order, sort_error) = match graph.topological_sort(true) {
        Ok(order) => (order, None),
        Err(err) => (Vec::new(), Some(err.to_string())),
    };

    if opts.log_order && !publishing_order.is_empty() {
        emit(
            events,
            Event::Info(format!("Publishing order: {}", publishing_order.join(" → "))),
        );
    }

    Ok(ValidatedGraph {
        graph,
        publishing_order,
        production_cycles: production,
        dev_cycles: dev,
        sort_error,
    })
}
