//! Pipeline domain model - a validated step graph

use crate::core::step::Step;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Problems found while validating a step graph
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate step name '{0}'")]
    DuplicateStep(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("cyclic dependency: {cycle}")]
    CyclicDependency { cycle: String },

    #[error("handle '{handle}' is produced by both '{first}' and '{second}'")]
    DuplicateProducer {
        handle: String,
        first: String,
        second: String,
    },

    #[error("step '{step}' reads '{handle}', which no step it depends on produces")]
    UndeclaredRead { step: String, handle: String },
}

/// A pipeline definition
///
/// Only constructible through [`Pipeline::new`], so every instance is
/// acyclic and has resolvable dependencies and reads.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Steps in declaration order
    steps: Vec<Step>,

    index: HashMap<String, usize>,

    /// Handle name -> producing step
    producers: HashMap<String, String>,

    /// Topological order, ties broken by declaration order
    execution_order: Vec<String>,
}

impl Pipeline {
    /// Validate and build a pipeline
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Result<Self, GraphError> {
        let mut index = HashMap::new();
        for (i, step) in steps.iter().enumerate() {
            if index.insert(step.name.clone(), i).is_some() {
                return Err(GraphError::DuplicateStep(step.name.clone()));
            }
        }

        for step in &steps {
            for dep in &step.dependencies {
                if !index.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        step: step.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        check_cycles(&steps, &index)?;

        let mut producers: HashMap<String, String> = HashMap::new();
        for step in &steps {
            for handle in &step.produces {
                if let Some(first) = producers.get(handle) {
                    return Err(GraphError::DuplicateProducer {
                        handle: handle.clone(),
                        first: first.clone(),
                        second: step.name.clone(),
                    });
                }
                producers.insert(handle.clone(), step.name.clone());
            }
        }

        let mut pipeline = Pipeline {
            name: name.into(),
            steps,
            index,
            producers,
            execution_order: Vec::new(),
        };

        for step in &pipeline.steps {
            let ancestors = pipeline.ancestors(&step.name);
            for handle in &step.reads {
                let produced_upstream = pipeline
                    .producers
                    .get(handle)
                    .is_some_and(|producer| ancestors.contains(producer));
                if !produced_upstream {
                    return Err(GraphError::UndeclaredRead {
                        step: step.name.clone(),
                        handle: handle.clone(),
                    });
                }
            }
        }

        pipeline.execution_order = pipeline.layers().into_iter().flatten().collect();
        Ok(pipeline)
    }

    /// Get a step by name
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.index.get(name).map(|&i| &self.steps[i])
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step that produces a handle
    pub fn producer_of(&self, handle: &str) -> Option<&str> {
        self.producers.get(handle).map(String::as_str)
    }

    /// Get execution order (topological sort)
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Topological layering: each layer depends only on earlier layers
    pub fn layers(&self) -> Vec<Vec<String>> {
        let mut remaining: HashMap<&str, usize> = self
            .steps
            .iter()
            .map(|s| (s.name.as_str(), s.dependencies.len()))
            .collect();
        let mut layers = Vec::new();

        loop {
            let layer: Vec<String> = self
                .steps
                .iter()
                .filter(|s| remaining.get(s.name.as_str()) == Some(&0))
                .map(|s| s.name.clone())
                .collect();
            if layer.is_empty() {
                break;
            }
            for name in &layer {
                remaining.remove(name.as_str());
                for dependant in self.direct_dependants(name) {
                    if let Some(count) = remaining.get_mut(dependant) {
                        *count -= 1;
                    }
                }
            }
            layers.push(layer);
        }

        layers
    }

    /// Every step that transitively depends on `name`, in execution order
    pub fn dependants_of(&self, name: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&str> = self.direct_dependants(name).collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next.to_string()) {
                queue.extend(self.direct_dependants(next));
            }
        }

        self.execution_order
            .iter()
            .filter(|s| seen.contains(*s))
            .cloned()
            .collect()
    }

    /// Every step `name` transitively depends on
    pub fn ancestors(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = self
            .step(name)
            .map(|s| s.dependencies.iter().map(String::as_str).collect())
            .unwrap_or_default();
        while let Some(next) = stack.pop() {
            if seen.insert(next.to_string()) {
                if let Some(step) = self.step(next) {
                    stack.extend(step.dependencies.iter().map(String::as_str));
                }
            }
        }
        seen
    }

    fn direct_dependants<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.steps
            .iter()
            .filter(move |s| s.dependencies.iter().any(|d| d == name))
            .map(|s| s.name.as_str())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Depth-first search that reports the first cycle as "a -> b -> a"
fn check_cycles(steps: &[Step], index: &HashMap<String, usize>) -> Result<(), GraphError> {
    let mut marks = vec![Mark::Unvisited; steps.len()];
    let mut path = Vec::new();

    for start in 0..steps.len() {
        if marks[start] == Mark::Unvisited {
            visit(start, steps, index, &mut marks, &mut path)?;
        }
    }

    Ok(())
}

fn visit(
    current: usize,
    steps: &[Step],
    index: &HashMap<String, usize>,
    marks: &mut [Mark],
    path: &mut Vec<usize>,
) -> Result<(), GraphError> {
    marks[current] = Mark::InProgress;
    path.push(current);

    for dep in &steps[current].dependencies {
        let Some(&next) = index.get(dep) else {
            continue;
        };
        match marks[next] {
            Mark::InProgress => {
                let from = path.iter().position(|&i| i == next).unwrap_or(0);
                let mut cycle: Vec<&str> = path[from..]
                    .iter()
                    .map(|&i| steps[i].name.as_str())
                    .collect();
                cycle.push(steps[next].name.as_str());
                return Err(GraphError::CyclicDependency {
                    cycle: cycle.join(" -> "),
                });
            }
            Mark::Unvisited => visit(next, steps, index, marks, path)?,
            Mark::Done => {}
        }
    }

    path.pop();
    marks[current] = Mark::Done;
    Ok(())
}
