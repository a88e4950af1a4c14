//! Dependency resolution over `blocked_by` edges.
//!
//! The resolver keeps the task set in a petgraph `DiGraph` whose edges point
//! from a blocker to the task it blocks. Readiness is always computed from the
//! task's own `blocked_by` set rather than from the edges, because a blocker
//! that is not in the graph has no node to hang an edge on and must still keep
//! its dependent blocked.

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::core::task::Task;
use crate::error::CircularDependencyError;
use crate::queue::TaskQueue;
use crate::{elog_debug, Result};

/// In-memory dependency graph with a completed set.
pub struct DependencyResolver {
    /// Tasks as nodes, blocker -> dependent as edges.
    graph: DiGraph<Task, ()>,
    /// Index mapping from task id to NodeIndex for fast lookups.
    task_index: HashMap<String, NodeIndex>,
    /// Dependents waiting on a blocker id that has no node yet.
    awaiting: HashMap<String, Vec<NodeIndex>>,
    completed: HashSet<String>,
}

impl DependencyResolver {
    /// Build a resolver from a list of tasks.
    ///
    /// When two tasks share an id, the first one wins.
    pub fn new<I>(tasks: I) -> Self
    where
        I: IntoIterator<Item = Task>,
    {
        let mut resolver = Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
            awaiting: HashMap::new(),
            completed: HashSet::new(),
        };
        for task in tasks {
            resolver.add_task(task);
        }
        resolver
    }

    /// Build a resolver from the pending tasks of a queue.
    ///
    /// Tasks that already have a report are treated as completed, so blockers
    /// finished in an earlier run do not hold their dependents back.
    pub fn from_queue(queue: &TaskQueue) -> Result<Self> {
        let mut resolver = Self::new(queue.pending_tasks()?);
        resolver.completed.extend(queue.list_reports()?);
        elog_debug!(
            "DependencyResolver::from_queue tasks={} completed={}",
            resolver.task_count(),
            resolver.completed.len()
        );
        Ok(resolver)
    }

    /// Add a task, wiring edges to and from tasks already present.
    ///
    /// Returns false if a task with the same id already exists.
    pub fn add_task(&mut self, task: Task) -> bool {
        if self.task_index.contains_key(&task.task_id) {
            return false;
        }

        let id = task.task_id.clone();
        let blocked_by: Vec<String> = task.blocked_by.iter().cloned().collect();
        let index = self.graph.add_node(task);
        self.task_index.insert(id.clone(), index);

        for blocker in blocked_by {
            match self.task_index.get(&blocker) {
                Some(&blocker_index) => {
                    self.graph.add_edge(blocker_index, index, ());
                }
                None => self.awaiting.entry(blocker).or_default().push(index),
            }
        }
        for dependent in self.awaiting.remove(&id).unwrap_or_default() {
            self.graph.add_edge(index, dependent, ());
        }
        true
    }

    pub fn get_task(&self, task_id: &str) -> Option<&Task> {
        self.task_index
            .get(task_id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_completed(&self, task_id: &str) -> bool {
        self.completed.contains(task_id)
    }

    pub fn completed(&self) -> &HashSet<String> {
        &self.completed
    }

    /// Tasks whose whole `blocked_by` set is completed, excluding tasks that
    /// are completed themselves. Returned in insertion order.
    pub fn get_ready_tasks(&self) -> Vec<&Task> {
        self.graph
            .node_indices()
            .map(|i| &self.graph[i])
            .filter(|task| self.is_ready(task))
            .collect()
    }

    /// Tasks that are not completed and still wait on at least one blocker.
    pub fn get_blocked_tasks(&self) -> Vec<&Task> {
        self.graph
            .node_indices()
            .map(|i| &self.graph[i])
            .filter(|task| !self.completed.contains(&task.task_id) && !self.is_ready(task))
            .collect()
    }

    /// Mark a task completed and return the tasks this completion unblocked.
    ///
    /// Only tasks whose readiness flipped from false to true are returned;
    /// tasks that were already ready are not reported again. Ids unknown to
    /// the graph are still recorded, since they may unblock dangling
    /// references.
    pub fn mark_completed(&mut self, task_id: &str) -> Vec<&Task> {
        let ready_before: HashSet<NodeIndex> = self.ready_indices().collect();
        self.completed.insert(task_id.to_string());
        let newly_ready: Vec<NodeIndex> = self
            .ready_indices()
            .filter(|i| !ready_before.contains(i))
            .collect();

        elog_debug!(
            "DependencyResolver::mark_completed {} unblocked={}",
            task_id,
            newly_ready.len()
        );
        newly_ready.into_iter().map(|i| &self.graph[i]).collect()
    }

    /// Check if every task in the graph is completed.
    pub fn is_all_completed(&self) -> bool {
        self.task_index.keys().all(|id| self.completed.contains(id))
    }

    /// Find every cycle in the `blocked_by` graph.
    ///
    /// Runs a depth-first search from each unvisited task (in insertion
    /// order), following `blocked_by` references to tasks in the graph. When
    /// the search re-enters a task on the current recursion stack, the path
    /// from that task's first occurrence to the repeat is recorded, so each
    /// cycle starts and ends with the same id.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let mut search = CycleSearch {
            resolver: self,
            visited: HashSet::new(),
            on_stack: HashSet::new(),
            path: Vec::new(),
            cycles: Vec::new(),
        };
        for index in self.graph.node_indices() {
            if !search.visited.contains(&index) {
                search.visit(index);
            }
        }
        search.cycles
    }

    /// Fail with the first detected cycle, if any.
    pub fn validate(&self) -> std::result::Result<(), CircularDependencyError> {
        match self.detect_cycles().into_iter().next() {
            Some(cycle) => Err(CircularDependencyError { cycle }),
            None => Ok(()),
        }
    }

    /// Tasks ordered so that each comes after its in-graph blockers.
    pub fn topological_order(&self) -> std::result::Result<Vec<&Task>, CircularDependencyError> {
        let sorted = toposort(&self.graph, None).map_err(|err| {
            let cycle = self
                .detect_cycles()
                .into_iter()
                .next()
                .unwrap_or_else(|| vec![self.graph[err.node_id()].task_id.clone()]);
            CircularDependencyError { cycle }
        })?;
        Ok(sorted.into_iter().map(|i| &self.graph[i]).collect())
    }

    fn is_ready(&self, task: &Task) -> bool {
        !self.completed.contains(&task.task_id)
            && task.is_unblocked_by(|id| self.completed.contains(id))
    }

    fn ready_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph
            .node_indices()
            .filter(move |&i| self.is_ready(&self.graph[i]))
    }
}

impl std::fmt::Debug for DependencyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyResolver")
            .field("tasks", &self.graph.node_count())
            .field("dependencies", &self.graph.edge_count())
            .field("completed", &self.completed.len())
            .finish()
    }
}

struct CycleSearch<'a> {
    resolver: &'a DependencyResolver,
    visited: HashSet<NodeIndex>,
    on_stack: HashSet<NodeIndex>,
    path: Vec<NodeIndex>,
    cycles: Vec<Vec<String>>,
}

/// One node on the explicit DFS stack and how far through its blockers
/// the search has got.
struct Frame {
    index: NodeIndex,
    blockers: Vec<NodeIndex>,
    next: usize,
}

impl CycleSearch<'_> {
    /// Depth-first search from `root` using an explicit stack, so chain depth
    /// is bounded by memory rather than by the thread's stack.
    fn visit(&mut self, root: NodeIndex) {
        if !self.visited.insert(root) {
            return;
        }
        let mut frames = vec![self.enter(root)];

        while let Some(frame) = frames.last_mut() {
            let next = frame.blockers.get(frame.next).copied();
            frame.next += 1;

            match next {
                Some(blocker) if self.on_stack.contains(&blocker) => self.record_cycle(blocker),
                Some(blocker) => {
                    if self.visited.insert(blocker) {
                        frames.push(self.enter(blocker));
                    }
                }
                None => {
                    if let Some(done) = frames.pop() {
                        self.path.pop();
                        self.on_stack.remove(&done.index);
                    }
                }
            }
        }
    }

    fn enter(&mut self, index: NodeIndex) -> Frame {
        let resolver = self.resolver;
        self.on_stack.insert(index);
        self.path.push(index);
        let blockers = resolver.graph[index]
            .blocked_by
            .iter()
            .filter_map(|b| resolver.task_index.get(b).copied())
            .collect();
        Frame {
            index,
            blockers,
            next: 0,
        }
    }

    /// Record the path from the first occurrence of `repeat` back to it.
    fn record_cycle(&mut self, repeat: NodeIndex) {
        let resolver = self.resolver;
        let graph = &resolver.graph;
        if let Some(start) = self.path.iter().position(|&i| i == repeat) {
            let mut cycle: Vec<String> = self.path[start..]
                .iter()
                .map(|&i| graph[i].task_id.clone())
                .collect();
            cycle.push(graph[repeat].task_id.clone());
            self.cycles.push(cycle);
        }
    }
}
