//! Dependency ordering for constraint sets.
//!
//! Every constraint target and every variable read by a term becomes a node;
//! each term adds an edge from the variable it reads to the target it drives.
//! Kahn's algorithm then yields an order in which every constraint comes after
//! all of its inputs. Ties are broken by first-seen order (constraints in
//! insertion order, target before its terms), so the same set always yields
//! the same order.

use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::constraint::ConstraintSet;
use crate::device::DeviceId;
use crate::error::{PlanError, PlanResult};

/// Topological order of every variable mentioned by a constraint set.
///
/// Contains dependency-only variables (plain scan axes) as well as constraint
/// targets; callers skip the names that have no constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationOrder(Vec<DeviceId>);

impl EvaluationOrder {
    /// Variables in evaluation order
    pub fn iter(&self) -> impl Iterator<Item = &DeviceId> {
        self.0.iter()
    }

    /// Index of a variable in the order
    pub fn position(&self, var: &DeviceId) -> Option<usize> {
        self.0.iter().position(|v| v == var)
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the order is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for EvaluationOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.0.iter().map(DeviceId::as_str).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// Topologically sort `constraints` by their variable dependencies.
///
/// Fails with [`PlanError::CyclicDependency`] if any constraint depends on
/// itself, directly or through other constraints.
pub fn evaluation_order(constraints: &ConstraintSet) -> PlanResult<EvaluationOrder> {
    // Node -> dependents, in first-seen order
    let mut adjacency: IndexMap<&DeviceId, IndexSet<&DeviceId>> = IndexMap::new();
    let mut in_degree: IndexMap<&DeviceId, usize> = IndexMap::new();

    for (target, constraint) in constraints.iter() {
        adjacency.entry(target).or_default();
        in_degree.entry(target).or_insert(0);

        for dependency in constraint.dependencies() {
            adjacency.entry(dependency).or_default();
            in_degree.entry(dependency).or_insert(0);

            // Repeated terms on the same variable count as a single edge
            if adjacency[dependency].insert(target) {
                in_degree[target] += 1;
            }
        }
    }

    let mut queue: VecDeque<&DeviceId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(node, _)| *node)
        .collect();
    let mut sorted = Vec::with_capacity(adjacency.len());

    while let Some(node) = queue.pop_front() {
        sorted.push(node.clone());
        for dependent in &adjacency[node] {
            let degree = &mut in_degree[*dependent];
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(*dependent);
            }
        }
    }

    if sorted.len() != adjacency.len() {
        let involved: Vec<DeviceId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(node, _)| (*node).clone())
            .collect();
        return Err(PlanError::CyclicDependency { involved });
    }

    let order = EvaluationOrder(sorted);
    debug!(
        constraints = constraints.len(),
        order = %order,
        "Computed constraint evaluation order"
    );

    Ok(order)
}
