//! Dependency graph resolution

use crate::error::{Result, RuntimeError};
use plinth_api::{PluginDependency, PluginDescriptor};
use std::collections::{BTreeMap, HashMap, HashSet};

/// A dependency whose version requirement is not met
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrongDependencyVersion {
    /// Dependent plugin
    pub dependent_id: String,
    /// Dependency
    pub dependency_id: String,
    /// Version found
    pub existing_version: String,
    /// Requirement declared by the dependent
    pub required_version: String,
}

/// Outcome of a resolution pass
#[derive(Debug, Clone, Default)]
pub struct ResolveResult {
    /// Every plugin id, dependencies before dependents
    pub sorted: Vec<String>,
    /// Dependent id -> required dependency ids that are not loaded
    pub not_found: BTreeMap<String, Vec<String>>,
    /// Version requirements that are not satisfied
    pub wrong_versions: Vec<WrongDependencyVersion>,
}

impl ResolveResult {
    /// Problems preventing `plugin_id` from resolving, as messages
    pub fn problems(&self, plugin_id: &str) -> Vec<String> {
        let mut problems: Vec<String> = self
            .not_found
            .get(plugin_id)
            .into_iter()
            .flatten()
            .map(|dep| format!("required dependency '{dep}' is not loaded"))
            .collect();
        problems.extend(
            self.wrong_versions
                .iter()
                .filter(|w| w.dependent_id == plugin_id)
                .map(|w| {
                    format!(
                        "dependency '{}' is {} but '{}' is required",
                        w.dependency_id, w.existing_version, w.required_version
                    )
                }),
        );
        problems
    }
}

/// Builds the dependency graph of the loaded plugins
#[derive(Debug, Default)]
pub struct DependencyResolver {
    dependencies: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl DependencyResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the graph from `descriptors`
    ///
    /// Edges point at loaded dependencies only (optional ones included, so
    /// they still start first when present). A cycle fails the whole pass.
    pub fn resolve(&mut self, descriptors: &[PluginDescriptor]) -> Result<ResolveResult> {
        let by_id: HashMap<&str, &PluginDescriptor> =
            descriptors.iter().map(|d| (d.id.as_str(), d)).collect();

        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        let mut result = ResolveResult::default();

        for descriptor in descriptors {
            let edges = dependencies.entry(descriptor.id.clone()).or_default();
            for dependency in &descriptor.dependencies {
                match by_id.get(dependency.plugin_id.as_str()) {
                    Some(target) => {
                        edges.push(dependency.plugin_id.clone());
                        dependents
                            .entry(dependency.plugin_id.clone())
                            .or_default()
                            .push(descriptor.id.clone());
                        check_version(descriptor, dependency, target, &mut result);
                    }
                    None if !dependency.optional => {
                        result
                            .not_found
                            .entry(descriptor.id.clone())
                            .or_default()
                            .push(dependency.plugin_id.clone());
                    }
                    None => {}
                }
            }
        }

        result.sorted = topological_order(descriptors, &dependencies)?;
        self.dependencies = dependencies;
        self.dependents = dependents;
        Ok(result)
    }

    /// Loaded plugins `plugin_id` depends on directly
    pub fn dependencies(&self, plugin_id: &str) -> Vec<String> {
        self.dependencies.get(plugin_id).cloned().unwrap_or_default()
    }

    /// Loaded plugins depending directly on `plugin_id`
    pub fn dependents(&self, plugin_id: &str) -> Vec<String> {
        self.dependents.get(plugin_id).cloned().unwrap_or_default()
    }

    /// Every plugin depending on `plugin_id`, transitively, nearest first
    pub fn transitive_dependents(&self, plugin_id: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue = std::collections::VecDeque::from(self.dependents(plugin_id));
        while let Some(id) = queue.pop_front() {
            if seen.insert(id.clone()) {
                queue.extend(self.dependents(&id));
                order.push(id);
            }
        }
        order
    }
}

fn check_version(
    dependent: &PluginDescriptor,
    dependency: &PluginDependency,
    target: &PluginDescriptor,
    result: &mut ResolveResult,
) {
    let Some(required) = &dependency.version_req else {
        return;
    };
    if !dependency.satisfies(&target.version) {
        result.wrong_versions.push(WrongDependencyVersion {
            dependent_id: dependent.id.clone(),
            dependency_id: target.id.clone(),
            existing_version: target.version.clone(),
            required_version: required.clone(),
        });
    }
}

fn topological_order(
    descriptors: &[PluginDescriptor],
    edges: &HashMap<String, Vec<String>>,
) -> Result<Vec<String>> {
    fn visit(
        id: &str,
        edges: &HashMap<String, Vec<String>>,
        marks: &mut HashMap<String, Mark>,
        stack: &mut Vec<String>,
        sorted: &mut Vec<String>,
    ) -> Result<()> {
        match marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|s| s == id).unwrap_or(0);
                let mut cycle = stack[start..].to_vec();
                cycle.push(id.to_string());
                return Err(RuntimeError::dependency_cycle(&cycle));
            }
            None => {}
        }

        marks.insert(id.to_string(), Mark::Visiting);
        stack.push(id.to_string());
        for dependency in edges.get(id).into_iter().flatten() {
            visit(dependency, edges, marks, stack, sorted)?;
        }
        stack.pop();
        marks.insert(id.to_string(), Mark::Done);
        sorted.push(id.to_string());
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut stack = Vec::new();
    let mut sorted = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        visit(&descriptor.id, edges, &mut marks, &mut stack, &mut sorted)?;
    }
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin(id: &str, version: &str, deps: &[&str]) -> PluginDescriptor {
        deps.iter().fold(
            PluginDescriptor::new(id, version, format!("{id}::Plugin")),
            |d, dep| d.with_dependency(PluginDependency::parse(dep).unwrap()),
        )
    }

    #[test]
    fn test_dependencies_sorted_first() {
        let mut resolver = DependencyResolver::new();
        let result = resolver
            .resolve(&[
                plugin("b", "1.0.0", &["a"]),
                plugin("c", "1.0.0", &["b", "a"]),
                plugin("a", "1.0.0", &[]),
            ])
            .unwrap();

        assert_eq!(result.sorted, vec!["a", "b", "c"]);
        assert!(result.not_found.is_empty());
        assert_eq!(resolver.dependents("a"), vec!["b", "c"]);
        assert_eq!(resolver.dependencies("c"), vec!["b", "a"]);
        assert_eq!(resolver.transitive_dependents("a"), vec!["b", "c"]);
    }

    #[test]
    fn test_cycle_is_reported_with_path() {
        let mut resolver = DependencyResolver::new();
        let err = resolver
            .resolve(&[
                plugin("a", "1.0.0", &["b"]),
                plugin("b", "1.0.0", &["c"]),
                plugin("c", "1.0.0", &["a"]),
            ])
            .unwrap_err();

        match err {
            RuntimeError::DependencyCycle(path) => assert_eq!(path, "a -> b -> c -> a"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_and_optional_dependencies() {
        let mut resolver = DependencyResolver::new();
        let result = resolver
            .resolve(&[
                plugin("a", "1.0.0", &["ghost", "maybe?"]),
                plugin("b", "1.0.0", &[]),
            ])
            .unwrap();

        assert_eq!(result.not_found.get("a").unwrap(), &vec!["ghost".to_string()]);
        assert_eq!(result.problems("a").len(), 1);
        assert!(result.problems("b").is_empty());
    }

    #[test]
    fn test_wrong_versions() {
        let mut resolver = DependencyResolver::new();
        let result = resolver
            .resolve(&[
                plugin("core", "1.4.0", &[]),
                plugin("ok", "1.0.0", &["core@^1.2"]),
                plugin("old", "1.0.0", &["core@^2"]),
            ])
            .unwrap();

        assert_eq!(result.wrong_versions.len(), 1);
        assert_eq!(result.wrong_versions[0].dependent_id, "old");
        assert!(result.problems("old")[0].contains("^2"));
    }
}
