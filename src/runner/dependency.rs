//! Dependency graph for step execution ordering.
//!
//! Edges are derived from links: a step depends on every step whose
//! creates set contains a link it requires.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use crate::api::StepLink;
use crate::error::{Result, TagflowError};
use crate::steps::Step;

/// Which steps wait for which, keyed by step name.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Step name to the steps it waits for.
    dependencies: BTreeMap<String, BTreeSet<String>>,
    /// Reverse of `dependencies`.
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Derive the graph from the steps' requires and creates sets.
    ///
    /// Fails on duplicate step names, on a required link that no step
    /// creates, and on cycles (including a step requiring its own link).
    pub fn from_steps(steps: &[Arc<dyn Step>]) -> Result<Self> {
        let mut graph = DependencyGraph::default();
        let mut producers: BTreeMap<StepLink, Vec<String>> = BTreeMap::new();
        for step in steps {
            let name = step.name();
            if graph
                .dependencies
                .insert(name.clone(), BTreeSet::new())
                .is_some()
            {
                return Err(TagflowError::DuplicateStep { name });
            }
            graph.dependents.insert(name.clone(), BTreeSet::new());
            for link in step.creates() {
                producers.entry(link).or_default().push(name.clone());
            }
        }

        for step in steps {
            let name = step.name();
            for link in step.requires() {
                let Some(found) = producers.get(&link) else {
                    return Err(TagflowError::UnresolvedRequirement {
                        step: name,
                        link: link.to_string(),
                    });
                };
                for producer in found {
                    graph
                        .dependencies
                        .entry(name.clone())
                        .or_default()
                        .insert(producer.clone());
                    graph
                        .dependents
                        .entry(producer.clone())
                        .or_default()
                        .insert(name.clone());
                }
            }
        }

        if let Some(cycle) = graph.find_cycle() {
            return Err(TagflowError::CircularDependency {
                cycle: cycle.join(" -> "),
            });
        }
        Ok(graph)
    }

    /// Steps that `step` waits for directly.
    pub fn dependencies_of(&self, step: &str) -> Option<&BTreeSet<String>> {
        self.dependencies.get(step)
    }

    /// Whether every dependency of `step` is in `completed`.
    pub fn is_ready(&self, step: &str, completed: &HashSet<String>) -> bool {
        self.dependencies
            .get(step)
            .map_or(true, |deps| deps.iter().all(|d| completed.contains(d)))
    }

    /// Steps that depend on `step`, directly or indirectly.
    pub fn transitive_dependents(&self, step: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut queue = vec![step];
        while let Some(current) = queue.pop() {
            for dependent in self.dependents.get(current).into_iter().flatten() {
                if found.insert(dependent.clone()) {
                    queue.push(dependent);
                }
            }
        }
        found
    }

    /// Layers of steps; each layer only waits for earlier layers.
    ///
    /// Names within a layer are sorted.
    pub fn parallel_groups(&self) -> Vec<Vec<String>> {
        let mut placed: HashSet<String> = HashSet::new();
        let mut groups = Vec::new();
        loop {
            let layer: Vec<String> = self
                .dependencies
                .keys()
                .filter(|name| !placed.contains(*name) && self.is_ready(name, &placed))
                .cloned()
                .collect();
            if layer.is_empty() {
                break;
            }
            placed.extend(layer.iter().cloned());
            groups.push(layer);
        }
        groups
    }

    /// First cycle found, as a path that starts and ends on the same step.
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut finished = BTreeSet::new();
        let mut path = Vec::new();
        self.dependencies
            .keys()
            .find_map(|start| self.visit(start, &mut path, &mut finished))
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        path: &mut Vec<&'a str>,
        finished: &mut BTreeSet<&'a str>,
    ) -> Option<Vec<String>> {
        if finished.contains(node) {
            return None;
        }
        if let Some(start) = path.iter().position(|n| *n == node) {
            let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
            cycle.push(node.to_string());
            return Some(cycle);
        }

        path.push(node);
        for dep in self.dependencies.get(node).into_iter().flatten() {
            if let Some(cycle) = self.visit(dep, path, finished) {
                return Some(cycle);
            }
        }
        path.pop();
        finished.insert(node);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::{FakeStep, Recorder};

    fn graph(steps: Vec<Arc<dyn Step>>) -> DependencyGraph {
        DependencyGraph::from_steps(&steps).unwrap()
    }

    fn diamond(rec: &Arc<Recorder>) -> Vec<Arc<dyn Step>> {
        vec![
            FakeStep::new("root", rec).build(),
            FakeStep::new("src", rec).after("root").build(),
            FakeStep::new("bin", rec).after("root").build(),
            FakeStep::new("rpms", rec).after("src").after("bin").build(),
        ]
    }

    #[test]
    fn no_steps_gives_no_layers() {
        assert!(graph(Vec::new()).parallel_groups().is_empty());
    }

    #[test]
    fn links_become_edges() {
        let rec = Recorder::new();
        let g = graph(vec![
            FakeStep::new("root", &rec).build(),
            FakeStep::new("src", &rec).after("root").build(),
            FakeStep::new("bin", &rec).after("src").build(),
        ]);

        assert!(g.dependencies_of("src").unwrap().contains("root"));
        assert!(g.dependencies_of("bin").unwrap().contains("src"));
        assert!(g.dependencies_of("root").unwrap().is_empty());
        assert_eq!(
            g.parallel_groups(),
            vec![vec!["root"], vec!["src"], vec!["bin"]]
        );
    }

    #[test]
    fn diamond_layers_share_the_middle() {
        let rec = Recorder::new();
        assert_eq!(
            graph(diamond(&rec)).parallel_groups(),
            vec![vec!["root"], vec!["bin", "src"], vec!["rpms"]]
        );
    }

    #[test]
    fn every_producer_of_a_link_is_a_dependency() {
        let rec = Recorder::new();
        let g = graph(vec![
            FakeStep::new("a", &rec)
                .creates(StepLink::release_images())
                .build(),
            FakeStep::new("b", &rec)
                .creates(StepLink::release_images())
                .build(),
            FakeStep::new("c", &rec)
                .requires(StepLink::release_images())
                .build(),
        ]);
        let deps = g.dependencies_of("c").unwrap();
        assert!(deps.contains("a"));
        assert!(deps.contains("b"));
    }

    #[test]
    fn readiness_follows_completed_dependencies() {
        let rec = Recorder::new();
        let g = graph(diamond(&rec));
        let mut completed = HashSet::new();

        assert!(g.is_ready("root", &completed));
        assert!(!g.is_ready("src", &completed));

        completed.insert("root".to_string());
        completed.insert("src".to_string());
        assert!(g.is_ready("bin", &completed));
        assert!(!g.is_ready("rpms", &completed));

        completed.insert("bin".to_string());
        assert!(g.is_ready("rpms", &completed));
    }

    #[test]
    fn transitive_dependents_cover_indirect_steps() {
        let rec = Recorder::new();
        let g = graph(diamond(&rec));

        let below_root: Vec<_> = g.transitive_dependents("root").into_iter().collect();
        assert_eq!(below_root, vec!["bin", "rpms", "src"]);
        assert_eq!(
            g.transitive_dependents("src").into_iter().collect::<Vec<_>>(),
            vec!["rpms"]
        );
        assert!(g.transitive_dependents("rpms").is_empty());
    }

    #[test]
    fn unresolved_requirement_is_rejected() {
        let rec = Recorder::new();
        let steps = vec![FakeStep::new("b", &rec).after("missing").build()];
        let err = DependencyGraph::from_steps(&steps).unwrap_err();
        match err {
            TagflowError::UnresolvedRequirement { step, link } => {
                assert_eq!(step, "b");
                assert_eq!(link, "internal image pipeline:missing");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let rec = Recorder::new();
        let steps = vec![
            FakeStep::new("a", &rec).build(),
            FakeStep::new("a", &rec).build(),
        ];
        assert!(matches!(
            DependencyGraph::from_steps(&steps),
            Err(TagflowError::DuplicateStep { .. })
        ));
    }

    #[test]
    fn cycles_are_rejected_with_their_path() {
        let rec = Recorder::new();
        let steps = vec![
            FakeStep::new("a", &rec).after("c").build(),
            FakeStep::new("b", &rec).after("a").build(),
            FakeStep::new("c", &rec).after("b").build(),
        ];
        match DependencyGraph::from_steps(&steps).unwrap_err() {
            TagflowError::CircularDependency { cycle } => {
                assert_eq!(cycle, "a -> c -> b -> a");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn requiring_own_link_is_a_cycle() {
        let rec = Recorder::new();
        let steps = vec![FakeStep::new("a", &rec).after("a").build()];
        match DependencyGraph::from_steps(&steps).unwrap_err() {
            TagflowError::CircularDependency { cycle } => assert_eq!(cycle, "a -> a"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
