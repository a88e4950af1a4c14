//! Dependency resolution integration tests.
//!
//! These tests build resolvers from queue state and check that readiness
//! tracks completions written by workers.

use std::collections::HashSet;

use ensemble::core::task::Params;
use ensemble::{DependencyResolver, Error, Task, TaskResult};

use crate::fixtures::TestProject;

fn ids<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> HashSet<String> {
    tasks.into_iter().map(|t| t.task_id.clone()).collect()
}

/// Test: Chain unblocks one step at a time
/// Given design -> implement -> review in the queue
/// When each step completes
/// Then exactly the next step becomes ready
#[test]
fn test_chain_unblocks_in_order() {
    let project = TestProject::new();
    let [design, implement, review] = project.enqueue_chain();

    let mut resolver = DependencyResolver::from_queue(&project.queue).unwrap();
    resolver.validate().unwrap();
    assert_eq!(ids(resolver.get_ready_tasks()), HashSet::from([design.clone()]));
    assert_eq!(resolver.get_blocked_tasks().len(), 2);

    assert_eq!(ids(resolver.mark_completed(&design)), HashSet::from([implement.clone()]));
    assert_eq!(ids(resolver.mark_completed(&implement)), HashSet::from([review.clone()]));
    assert!(!resolver.is_all_completed());
    assert!(resolver.mark_completed(&review).is_empty());
    assert!(resolver.is_all_completed());
}

/// Test: Reports count as completions when rebuilding
/// Given a chain whose first task was completed by a worker
/// When the resolver is rebuilt from the queue
/// Then the second task is ready
#[test]
fn test_rebuild_from_queue_sees_reports() {
    let project = TestProject::new();
    let [design, implement, _review] = project.enqueue_chain();

    let claimed = project.queue.claim().unwrap();
    assert_eq!(claimed.task_id, design);
    project
        .queue
        .complete(&design, TaskResult::Success, "design.md", None)
        .unwrap();

    let resolver = DependencyResolver::from_queue(&project.queue).unwrap();

    assert_eq!(resolver.task_count(), 2);
    assert!(resolver.is_completed(&design));
    assert_eq!(ids(resolver.get_ready_tasks()), HashSet::from([implement]));
}

/// Test: Stateless readiness agrees with the resolver
#[test]
fn test_queue_readiness_matches_resolver() {
    let project = TestProject::new();
    let a = project.enqueue_after("a", &[]);
    let b = project.enqueue_after("b", &[a.as_str()]);
    let c = project.enqueue_after("c", &[a.as_str(), b.as_str()]);
    let d = project.enqueue_after("d", &[]);

    let mut resolver = DependencyResolver::from_queue(&project.queue).unwrap();
    let mut completed = HashSet::new();

    for step in [&a, &b, &c] {
        let from_queue: HashSet<String> = project
            .queue
            .get_ready_tasks(&completed)
            .unwrap()
            .into_iter()
            .filter(|t| !completed.contains(&t.task_id))
            .map(|t| t.task_id)
            .collect();
        assert_eq!(from_queue, ids(resolver.get_ready_tasks()));

        resolver.mark_completed(step);
        completed.insert(step.clone());
    }

    assert_eq!(ids(resolver.get_ready_tasks()), HashSet::from([d]));
}

/// Test: Cycles written to the queue are caught
/// Given two tasks with caller-supplied ids that block each other
/// When the resolver validates
/// Then a circular dependency error names both tasks
#[test]
fn test_cycle_in_queue_is_detected() {
    let project = TestProject::new();
    project
        .queue
        .enqueue_task(Task::with_id("task-a", "a", "worker").blocked_by(["task-b"]))
        .unwrap();
    project
        .queue
        .enqueue_task(Task::with_id("task-b", "b", "worker").blocked_by(["task-a"]))
        .unwrap();

    let resolver = DependencyResolver::from_queue(&project.queue).unwrap();

    let cycles = resolver.detect_cycles();
    assert!(!cycles.is_empty());
    assert!(cycles[0].contains(&"task-a".to_string()));
    assert!(cycles[0].contains(&"task-b".to_string()));
    assert!(resolver.get_ready_tasks().is_empty());

    let err: Error = resolver.validate().unwrap_err().into();
    assert!(matches!(err, Error::CircularDependency(_)));
    assert!(resolver.topological_order().is_err());
}

/// Test: Dangling blocker keeps a task blocked
#[test]
fn test_dangling_blocker_stays_blocked() {
    let project = TestProject::new();
    let waiting = project
        .queue
        .enqueue_with_dependency("waits", "worker", Params::new(), ["never-enqueued"])
        .unwrap();

    let mut resolver = DependencyResolver::from_queue(&project.queue).unwrap();

    assert!(resolver.validate().is_ok());
    assert!(resolver.get_ready_tasks().is_empty());
    assert_eq!(ids(resolver.get_blocked_tasks()), HashSet::from([waiting.clone()]));
    assert_eq!(ids(resolver.mark_completed("never-enqueued")), HashSet::from([waiting]));
}

/// Test: Topological order respects blockers
#[test]
fn test_topological_order_of_chain() {
    let project = TestProject::new();
    let [design, implement, review] = project.enqueue_chain();

    let resolver = DependencyResolver::from_queue(&project.queue).unwrap();
    let order: Vec<&str> = resolver
        .topological_order()
        .unwrap()
        .into_iter()
        .map(|t| t.task_id.as_str())
        .collect();

    assert_eq!(order, vec![design.as_str(), implement.as_str(), review.as_str()]);
}
