//! Extension dependency resolution.
//!
//! Builds the dependency graph over every known extension, isolates
//! dependency cycles and unsatisfiable requirements to the extensions they
//! affect, and orders the rest with Kahn's algorithm. Ties are broken by id
//! so the activation order is the same on every boot.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use semver::Version;

use super::error::PluginError;
use super::manifest::parse_requirement;

/// How a graph node participates in a resolution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Waiting to be activated in this pass.
    Candidate,
    /// Already enabled; satisfies dependents without being re-activated.
    Enabled,
    /// Known but will not be enabled (disabled, failed, not installed).
    Unavailable,
}

/// One extension in the dependency graph.
#[derive(Debug, Clone)]
pub struct DependencyNode {
    pub version: String,
    /// Dependency id → version requirement.
    pub dependencies: BTreeMap<String, String>,
    pub state: NodeState,
}

/// Outcome of [`resolve_activation_order`].
#[derive(Debug, Default)]
pub struct ActivationPlan {
    /// Candidates in a valid topological order.
    pub order: Vec<String>,
    /// Candidates that cannot be activated, with the reason.
    pub failed: BTreeMap<String, PluginError>,
}

/// Check one extension's declared dependencies against the graph.
///
/// A dependency that is itself a candidate is acceptable here; the caller
/// activates in topological order and re-checks enablement just before
/// activating.
pub fn check_dependencies(
    extension: &str,
    dependencies: &BTreeMap<String, String>,
    nodes: &BTreeMap<String, DependencyNode>,
) -> Result<(), PluginError> {
    for (dependency, requirement) in dependencies {
        let Some(node) = nodes.get(dependency) else {
            return Err(PluginError::MissingDependency {
                extension: extension.to_string(),
                dependency: dependency.clone(),
            });
        };

        let satisfied = match (parse_requirement(requirement), Version::parse(&node.version)) {
            (Ok(req), Ok(version)) => req.matches(&version),
            _ => false,
        };
        if !satisfied {
            return Err(PluginError::VersionMismatch {
                extension: extension.to_string(),
                dependency: dependency.clone(),
                requirement: requirement.clone(),
                found: node.version.clone(),
            });
        }

        if node.state == NodeState::Unavailable {
            return Err(PluginError::DependencyNotEnabled {
                extension: extension.to_string(),
                dependency: dependency.clone(),
            });
        }
    }
    Ok(())
}

/// Work out which candidates can be activated, and in what order.
pub fn resolve_activation_order(nodes: &BTreeMap<String, DependencyNode>) -> ActivationPlan {
    let mut plan = ActivationPlan::default();

    let candidates: Vec<&str> = nodes
        .iter()
        .filter(|(_, node)| node.state == NodeState::Candidate)
        .map(|(id, _)| id.as_str())
        .collect();

    // Cycle members fail together; nothing outside the cycle is touched here.
    for cycle in find_cycles(&candidates, nodes) {
        let members = cycle.join(", ");
        for id in cycle {
            plan.failed.insert(
                id.to_string(),
                PluginError::CircularDependency {
                    extension: id.to_string(),
                    cycle: members.clone(),
                },
            );
        }
    }

    for id in &candidates {
        if plan.failed.contains_key(*id) {
            continue;
        }
        if let Some(node) = nodes.get(*id)
            && let Err(e) = check_dependencies(id, &node.dependencies, nodes)
        {
            plan.failed.insert(id.to_string(), e);
        }
    }

    // Dependents of failed candidates fail too, transitively.
    loop {
        let mut newly_failed = Vec::new();
        for id in &candidates {
            if plan.failed.contains_key(*id) {
                continue;
            }
            let Some(node) = nodes.get(*id) else { continue };
            if let Some(dependency) = node
                .dependencies
                .keys()
                .find(|dep| plan.failed.contains_key(dep.as_str()))
            {
                newly_failed.push((id.to_string(), dependency.clone()));
            }
        }
        if newly_failed.is_empty() {
            break;
        }
        for (extension, dependency) in newly_failed {
            plan.failed.insert(
                extension.clone(),
                PluginError::DependencyNotEnabled {
                    extension,
                    dependency,
                },
            );
        }
    }

    // Kahn's algorithm over the surviving candidates, smallest id first.
    let remaining: BTreeSet<&str> = candidates
        .iter()
        .copied()
        .filter(|id| !plan.failed.contains_key(*id))
        .collect();

    let mut in_degree: HashMap<&str, usize> = remaining.iter().map(|id| (*id, 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for id in &remaining {
        let Some(node) = nodes.get(*id) else { continue };
        for dep in node.dependencies.keys() {
            if remaining.contains(dep.as_str()) {
                if let Some(degree) = in_degree.get_mut(id) {
                    *degree += 1;
                }
                dependents.entry(dep.as_str()).or_default().push(*id);
            }
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();

    while let Some(id) = ready.pop_first() {
        plan.order.push(id.to_string());
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    plan
}

/// Strongly connected components of the candidate subgraph that form cycles,
/// each sorted, in order of their smallest member.
fn find_cycles<'a>(
    candidates: &[&'a str],
    nodes: &'a BTreeMap<String, DependencyNode>,
) -> Vec<Vec<&'a str>> {
    struct Tarjan<'a> {
        nodes: &'a BTreeMap<String, DependencyNode>,
        candidates: BTreeSet<&'a str>,
        index: HashMap<&'a str, usize>,
        lowlink: HashMap<&'a str, usize>,
        stack: Vec<&'a str>,
        on_stack: BTreeSet<&'a str>,
        next: usize,
        components: Vec<Vec<&'a str>>,
    }

    impl<'a> Tarjan<'a> {
        fn visit(&mut self, id: &'a str) {
            self.index.insert(id, self.next);
            self.lowlink.insert(id, self.next);
            self.next += 1;
            self.stack.push(id);
            self.on_stack.insert(id);

            let nodes = self.nodes;
            if let Some(node) = nodes.get(id) {
                for dep in node.dependencies.keys() {
                    let dep = dep.as_str();
                    if !self.candidates.contains(dep) {
                        continue;
                    }
                    if !self.index.contains_key(dep) {
                        self.visit(dep);
                        let low = self.lowlink[dep].min(self.lowlink[id]);
                        self.lowlink.insert(id, low);
                    } else if self.on_stack.contains(dep) {
                        let low = self.index[dep].min(self.lowlink[id]);
                        self.lowlink.insert(id, low);
                    }
                }
            }

            if self.lowlink[id] == self.index[id] {
                let mut component = Vec::new();
                while let Some(member) = self.stack.pop() {
                    self.on_stack.remove(member);
                    component.push(member);
                    if member == id {
                        break;
                    }
                }
                self.components.push(component);
            }
        }
    }

    let mut tarjan = Tarjan {
        nodes,
        candidates: candidates.iter().copied().collect(),
        index: HashMap::new(),
        lowlink: HashMap::new(),
        stack: Vec::new(),
        on_stack: BTreeSet::new(),
        next: 0,
        components: Vec::new(),
    };

    for id in candidates {
        if !tarjan.index.contains_key(id) {
            tarjan.visit(id);
        }
    }

    let mut cycles: Vec<Vec<&str>> = tarjan
        .components
        .into_iter()
        .filter(|component| {
            component.len() > 1
                || nodes
                    .get(component[0])
                    .is_some_and(|n| n.dependencies.contains_key(component[0]))
        })
        .map(|mut component| {
            component.sort_unstable();
            component
        })
        .collect();
    cycles.sort();
    cycles
}
