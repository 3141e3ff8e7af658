// SPDX-License-Identifier: MIT

//! Graph construction and validation

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use super::types::{Fork, GraphDefinition, InterruptPoint, NextStep};
use crate::underwrite::engine::error::GraphError;
use crate::underwrite::engine::router::Router;
use crate::underwrite::engine::state::StateSchema;
use crate::underwrite::engine::step::Step;

/// Collects steps, edges and interrupt points, then validates them into a
/// [`GraphDefinition`]
pub struct GraphBuilder {
    name: String,
    schema: StateSchema,
    steps: Vec<Arc<dyn Step>>,
    entry: Option<String>,
    edges: Vec<(String, NextStep)>,
    forks: Vec<Fork>,
    interrupts: Vec<InterruptPoint>,
}

impl GraphBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            schema: StateSchema::default(),
            steps: Vec::new(),
            entry: None,
            edges: Vec::new(),
            forks: Vec::new(),
            interrupts: Vec::new(),
        }
    }

    pub fn schema(mut self, schema: StateSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn add_step(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn set_entry(mut self, step: &str) -> Self {
        self.entry = Some(step.to_string());
        self
    }

    pub fn add_edge(mut self, from: &str, to: &str) -> Self {
        self.edges.push((from.to_string(), NextStep::step(to)));
        self
    }

    /// Route `from` to the terminal marker
    pub fn add_end(mut self, from: &str) -> Self {
        self.edges.push((from.to_string(), NextStep::End));
        self
    }

    pub fn add_fork(mut self, from: &str, router: Arc<dyn Router>) -> Self {
        self.forks.push(Fork {
            step: from.to_string(),
            router,
        });
        self
    }

    /// Pause before `step` however it is entered
    pub fn interrupt_before(mut self, step: &str) -> Self {
        self.interrupts.push(InterruptPoint {
            step: step.to_string(),
            only_from: None,
        });
        self
    }

    /// Pause before `step` only when it is entered from `predecessor`
    pub fn interrupt_before_from(mut self, step: &str, predecessor: &str) -> Self {
        self.interrupts.push(InterruptPoint {
            step: step.to_string(),
            only_from: Some(predecessor.to_string()),
        });
        self
    }

    pub fn build(self) -> Result<GraphDefinition, GraphError> {
        let entry = self.entry.clone().ok_or(GraphError::MissingEntry)?;

        let mut order = Vec::with_capacity(self.steps.len());
        let mut steps: HashMap<String, Arc<dyn Step>> = HashMap::new();
        for step in &self.steps {
            let name = step.name().to_string();
            if steps.contains_key(&name) {
                return Err(GraphError::DuplicateStep(name));
            }
            order.push(name.clone());
            steps.insert(name, step.clone());
        }

        let known = |name: &str| -> Result<(), GraphError> {
            if steps.contains_key(name) {
                Ok(())
            } else {
                Err(GraphError::UnknownStep(name.to_string()))
            }
        };

        known(&entry)?;

        if self.forks.len() > 1 {
            return Err(GraphError::MultipleForks {
                first: self.forks[0].step.clone(),
                second: self.forks[1].step.clone(),
            });
        }

        let mut edges: HashMap<String, NextStep> = HashMap::new();
        for (from, to) in &self.edges {
            known(from)?;
            if let Some(target) = to.as_step() {
                known(target)?;
            }
            if edges.insert(from.clone(), to.clone()).is_some() {
                return Err(GraphError::ConflictingEdges(from.clone()));
            }
        }

        let mut fork = None;
        for f in self.forks {
            known(&f.step)?;
            if edges.contains_key(&f.step) {
                return Err(GraphError::ConflictingEdges(f.step.clone()));
            }
            for target in f.router.targets() {
                known(target)?;
            }
            let distinct = f.router.targets().iter().collect::<HashSet<_>>().len();
            if distinct < 2 {
                return Err(GraphError::InvalidFork {
                    step: f.step.clone(),
                    reason: "a fork needs at least two distinct targets".to_string(),
                });
            }
            fork = Some(f);
        }

        let successors = |name: &str| -> Vec<String> {
            match edges.get(name) {
                Some(NextStep::Step(to)) => vec![to.clone()],
                Some(NextStep::End) => Vec::new(),
                None => match &fork {
                    Some(f) if f.step == name => f.router.targets().to_vec(),
                    _ => Vec::new(),
                },
            }
        };

        for name in &order {
            let is_fork = fork.as_ref().map(|f| &f.step == name).unwrap_or(false);
            if !edges.contains_key(name) && !is_fork {
                return Err(GraphError::DanglingStep(name.clone()));
            }
        }

        for interrupt in &self.interrupts {
            known(&interrupt.step)?;
            if let Some(pred) = &interrupt.only_from {
                known(pred)?;
                if !successors(pred).contains(&interrupt.step) {
                    return Err(GraphError::InvalidInterrupt {
                        step: interrupt.step.clone(),
                        reason: format!("'{}' has no edge to it", pred),
                    });
                }
            }
        }

        if let Some(cycle) = find_cycle(&order, &successors) {
            return Err(GraphError::Cycle(cycle));
        }

        let reachable = reachable_from(&entry, &successors);
        if let Some(unreachable) = order.iter().find(|s| !reachable.contains(*s)) {
            return Err(GraphError::UnreachableStep(unreachable.clone()));
        }

        log::debug!(
            "Graph '{}' built: {} steps, entry '{}'",
            self.name,
            order.len(),
            entry
        );

        Ok(GraphDefinition {
            name: self.name,
            entry,
            order,
            steps,
            edges,
            fork,
            interrupts: self.interrupts,
            schema: self.schema,
        })
    }
}

/// Depth-first search for a back edge; returns the cycle's path
fn find_cycle(order: &[String], successors: &dyn Fn(&str) -> Vec<String>) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        node: &str,
        successors: &dyn Fn(&str) -> Vec<String>,
        marks: &mut HashMap<String, Mark>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        match marks.get(node) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = path.iter().position(|p| p == node).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(node.to_string());
                return Some(cycle);
            }
            None => {}
        }

        marks.insert(node.to_string(), Mark::Visiting);
        path.push(node.to_string());
        for next in successors(node) {
            if let Some(cycle) = visit(&next, successors, marks, path) {
                return Some(cycle);
            }
        }
        path.pop();
        marks.insert(node.to_string(), Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    for name in order {
        let mut path = Vec::new();
        if let Some(cycle) = visit(name, successors, &mut marks, &mut path) {
            return Some(cycle);
        }
    }
    None
}

fn reachable_from(entry: &str, successors: &dyn Fn(&str) -> Vec<String>) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([entry.to_string()]);
    while let Some(node) = queue.pop_front() {
        if !seen.insert(node.clone()) {
            continue;
        }
        queue.extend(successors(&node));
    }
    seen
}
