//! Queue lifecycle integration tests.
//!
//! These tests follow tasks through `tasks/ -> processing/ -> reports/` and
//! check what is left on disk at each step.

use std::fs;

use ensemble::core::task::Params;
use ensemble::{TaskResult, TaskStatus};

use crate::fixtures::TestProject;

/// Test: Full task lifecycle
/// Given one enqueued task
/// When a worker claims and completes it
/// Then only a report remains
#[test]
fn test_enqueue_claim_complete() {
    let project = TestProject::new();
    let id = project.enqueue("write docs", "worker");
    assert_eq!(project.queue.list_pending().unwrap(), vec![id.clone()]);

    let task = project.queue.claim().expect("task should be claimable");
    assert_eq!(task.task_id, id);
    assert_eq!(task.status, TaskStatus::Processing);
    assert!(project.queue.list_pending().unwrap().is_empty());
    assert_eq!(project.queue.list_processing().unwrap(), vec![id.clone()]);

    let report = project
        .queue
        .complete(&id, TaskResult::Success, "docs written", None)
        .unwrap();
    assert_eq!(report.agent.as_deref(), Some("worker"));

    assert!(project.queue.list_processing().unwrap().is_empty());
    assert_eq!(project.queue.list_reports().unwrap(), vec![id.clone()]);
    let stored = project.queue.read_report(&id).unwrap().unwrap();
    assert_eq!(stored.output, "docs written");
    assert_eq!(stored.command.as_deref(), Some("write docs"));
}

/// Test: Report without processing copy
/// Given a task id that was never claimed
/// When complete is called
/// Then a readable report is still produced
#[test]
fn test_complete_without_claim_produces_report() {
    let project = TestProject::new();

    project
        .queue
        .complete("crashed-worker-task", TaskResult::Error, "", Some("worker died"))
        .unwrap();

    let stored = project.queue.read_report("crashed-worker-task").unwrap().unwrap();
    assert_eq!(stored.result, TaskResult::Error);
    assert_eq!(stored.error.as_deref(), Some("worker died"));
}

/// Test: Duplicate completion
/// Given a completed task
/// When a second worker reports a different outcome for it
/// Then the first report is kept on disk and returned to the second caller
#[test]
fn test_duplicate_complete_keeps_first_report() {
    let project = TestProject::new();
    let id = project.enqueue("implement", "worker");
    project.queue.claim().unwrap();
    project
        .queue
        .complete(&id, TaskResult::Success, "merged", None)
        .unwrap();

    let report = project
        .queue
        .complete(&id, TaskResult::Error, "stale retry", Some("timeout"))
        .unwrap();

    assert_eq!(report.result, TaskResult::Success);
    let stored = project.queue.read_report(&id).unwrap().unwrap();
    assert_eq!(stored.output, "merged");
    assert!(stored.error.is_none());
    assert_eq!(stored.command.as_deref(), Some("implement"));
}

/// Test: Task files are YAML documents named after the id
#[test]
fn test_task_file_format() {
    let project = TestProject::new();
    let mut params = Params::new();
    params.insert("branch".to_string(), serde_json::json!("feature/login"));
    let id = project.queue.enqueue("implement", "worker", params).unwrap();

    let path = project.queue.layout().tasks_dir().join(format!("{}.yaml", id));
    let raw = fs::read_to_string(path).unwrap();
    let value: serde_yaml::Value = serde_yaml::from_str(&raw).unwrap();

    assert_eq!(value["task_id"].as_str(), Some(id.as_str()));
    assert_eq!(value["agent"].as_str(), Some("worker"));
    assert_eq!(value["status"].as_str(), Some("pending"));
    assert_eq!(value["params"]["branch"].as_str(), Some("feature/login"));
}

/// Test: Claim order follows enqueue order
#[test]
fn test_claim_order_is_enqueue_order() {
    let project = TestProject::new();
    let ids: Vec<String> = (0..5)
        .map(|i| {
            let id = project.enqueue(&format!("step {}", i), "worker");
            // Ids carry millisecond timestamps.
            std::thread::sleep(std::time::Duration::from_millis(2));
            id
        })
        .collect();

    let claimed: Vec<String> = std::iter::from_fn(|| project.queue.claim())
        .map(|t| t.task_id)
        .collect();

    assert_eq!(claimed, ids);
}

/// Test: Session reset
/// Given tasks in every state plus ack markers
/// When queue and ack cleanup run
/// Then every directory is empty
#[test]
fn test_session_reset() {
    let project = TestProject::new();
    let done = project.enqueue("a", "worker");
    project.enqueue("b", "worker");
    project.enqueue("c", "worker");
    project.queue.claim().unwrap();
    project.queue.claim().unwrap();
    project
        .queue
        .complete(&done, TaskResult::Success, "", None)
        .unwrap();
    let ack = project.ack_manager();
    ack.send(&done, "worker");

    project.queue.cleanup().unwrap();
    ack.cleanup().unwrap();

    assert!(project.queue.list_pending().unwrap().is_empty());
    assert!(project.queue.list_processing().unwrap().is_empty());
    assert!(project.queue.list_reports().unwrap().is_empty());
    assert!(!ack.check(&done));
}
