// SPDX-License-Identifier: Apache-2.0

//! Dependency planning: order the loaded plugin catalog so that a
//! plugin's dependencies always run before it.
//!
//! Two views of the same graph are offered: [`topological_sort`] for a
//! single run order, and [`layers`] for the maximum-parallelism grouping
//! the orchestrator's layered mode consumes. Both walk the graph in
//! alphabetical-by-id order at every branch point, so the same catalog
//! always plans to the same order -- a scan's plugin run order should
//! never depend on filesystem iteration order or hash-map iteration.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::plugin::Plugin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Build an id -> dependency-ids adjacency map from a plugin catalog,
/// failing if a plugin depends on an id that isn't in the catalog.
fn build_graph(plugins: &[&Plugin]) -> Result<BTreeMap<String, Vec<String>>> {
    let known: std::collections::HashSet<&str> = plugins.iter().map(|p| p.id.as_str()).collect();
    let mut graph = BTreeMap::new();
    for plugin in plugins {
        for dependency in &plugin.depends_on {
            if !known.contains(dependency.as_str()) {
                return Err(Error::MissingDependency {
                    consumer: plugin.id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
        let mut deps = plugin.depends_on.clone();
        deps.sort();
        graph.insert(plugin.id.clone(), deps);
    }
    Ok(graph)
}

/// Produce a single run order with every plugin's dependencies appearing
/// before it, via a three-color depth-first search. Detects cycles.
pub fn topological_sort(plugins: &[&Plugin]) -> Result<Vec<String>> {
    let graph = build_graph(plugins)?;
    let mut colors: HashMap<&str, Color> = graph.keys().map(|id| (id.as_str(), Color::White)).collect();
    let mut order = Vec::with_capacity(graph.len());
    let mut stack: Vec<String> = Vec::new();

    fn visit<'a>(
        id: &'a str,
        graph: &'a BTreeMap<String, Vec<String>>,
        colors: &mut HashMap<&'a str, Color>,
        order: &mut Vec<String>,
        stack: &mut Vec<String>,
    ) -> Result<()> {
        match colors.get(id) {
            Some(Color::Black) => return Ok(()),
            Some(Color::Gray) => {
                let start = stack.iter().position(|n| n == id).unwrap_or(0);
                let mut cycle = stack[start..].to_vec();
                cycle.push(id.to_string());
                return Err(Error::CyclicDependency(cycle.join(" -> ")));
            }
            _ => {}
        }
        colors.insert(id, Color::Gray);
        stack.push(id.to_string());
        for dep in graph.get(id).map(|v| v.as_slice()).unwrap_or(&[]) {
            visit(dep.as_str(), graph, colors, order, stack)?;
        }
        stack.pop();
        colors.insert(id, Color::Black);
        order.push(id.to_string());
        Ok(())
    }

    for id in graph.keys() {
        visit(id.as_str(), &graph, &mut colors, &mut order, &mut stack)?;
    }

    Ok(order)
}

/// Group the catalog into layers via Kahn's algorithm: layer 0 holds
/// every plugin with no unresolved dependency, layer 1 holds every
/// plugin whose dependencies are all satisfied by layers 0..1, and so
/// on. The orchestrator's layered mode runs each layer's plugins
/// concurrently and waits for the whole layer before advancing.
pub fn layers(plugins: &[&Plugin]) -> Result<Vec<Vec<String>>> {
    let graph = build_graph(plugins)?;

    let mut in_degree: BTreeMap<String, usize> = graph.keys().map(|id| (id.clone(), 0)).collect();
    let mut dependents: BTreeMap<String, Vec<String>> = graph.keys().map(|id| (id.clone(), Vec::new())).collect();
    for (id, deps) in &graph {
        *in_degree.get_mut(id).expect("id present") = deps.len();
        for dep in deps {
            dependents.get_mut(dep).expect("dep present").push(id.clone());
        }
    }

    let mut remaining = in_degree.clone();
    let mut result = Vec::new();
    let mut processed = 0usize;

    while processed < graph.len() {
        let mut ready: Vec<String> = remaining
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(id, _)| id.clone())
            .collect();
        ready.sort();

        if ready.is_empty() {
            // Every remaining node has at least one unresolved
            // dependency, but none are newly satisfiable: a cycle. Every
            // node still in `remaining` is on (or feeds) that cycle, so
            // name all of them rather than picking one arbitrarily.
            let stuck: Vec<String> = remaining.keys().cloned().collect();
            return Err(Error::CyclicDependency(stuck.join(", ")));
        }

        for id in &ready {
            remaining.remove(id);
            for dependent in dependents.get(id).map(|v| v.as_slice()).unwrap_or(&[]) {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count = count.saturating_sub(1);
                }
            }
        }

        processed += ready.len();
        result.push(ready);
    }

    Ok(result)
}
