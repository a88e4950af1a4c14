//! Ack and escalation integration tests.
//!
//! These tests dispatch tasks to simulated workers and check how the
//! orchestrator waits, nudges and records what happened.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ensemble::orchestration::{AckManager, EventKind, EventLog, NudgeOutcome, NudgeTarget};
use ensemble::{CycleDetector, Error, LoopDetector};

use crate::fixtures::{counting_nudger, TestProject, FAST_POLL, SHORT_PHASE};

/// Test: Escalation exhaustion
/// Given a worker that never acknowledges
/// When the orchestrator waits with three short phases
/// Then it gives up after phase 3 having nudged exactly three times
#[test]
fn test_escalation_exhausted() {
    let project = TestProject::new();
    let task_id = project.enqueue("implement", "worker");
    let (calls, nudger) = counting_nudger();
    let ack = project.ack_manager().with_nudger(nudger);

    let result = ack.wait_with_escalation(&task_id, &NudgeTarget::new(1, "%1"), SHORT_PHASE, 3);

    assert_eq!(result, (false, 3));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

/// Test: Escalation recovery
/// Given a worker that acknowledges when nudged the first time
/// When the orchestrator waits with escalation
/// Then the ack is seen in phase 1
#[test]
fn test_escalation_recovers_after_first_nudge() {
    let project = TestProject::new();
    let task_id = project.enqueue("implement", "worker");
    let ack_dir = project.ack_dir();
    let acked_task = task_id.clone();
    let ack = project
        .ack_manager()
        .with_nudger(move |target: &NudgeTarget, phase: u32| {
            if phase == 1 {
                let worker = AckManager::new(&ack_dir).unwrap();
                worker.send(&acked_task, &format!("worker-{}", target.worker_id));
            }
            NudgeOutcome::Sent
        });

    let result = ack.wait_with_escalation(&task_id, &NudgeTarget::new(2, "%2"), SHORT_PHASE, 3);

    assert_eq!(result, (true, 1));
    assert_eq!(ack.read(&task_id).unwrap().agent, "worker-2");
}

/// Test: Worker acknowledges a claimed task
/// Given a worker thread that claims and acks
/// When the orchestrator waits
/// Then no escalation is needed
#[test]
fn test_worker_ack_before_escalation() {
    let project = TestProject::new();
    let task_id = project.enqueue("implement", "worker");
    let base = project.queue.layout().base().to_path_buf();
    let ack_dir = project.ack_dir();

    let worker = thread::spawn(move || {
        let queue = ensemble::TaskQueue::new(base).unwrap();
        let task = queue.claim().unwrap();
        AckManager::new(ack_dir).unwrap().send(&task.task_id, "worker-1")
    });

    let (calls, nudger) = counting_nudger();
    let ack = project.ack_manager().with_nudger(nudger);
    let result =
        ack.wait_with_escalation(&task_id, &NudgeTarget::new(1, "%1"), Duration::from_secs(5), 3);

    assert!(worker.join().unwrap());
    assert_eq!(result, (true, 0));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Test: Escalations land in the session log
#[test]
fn test_escalation_events_in_session_log() {
    let project = TestProject::new();
    let log = Arc::new(EventLog::open(project.path.join(".ensemble/logs"), "session-esc").unwrap());
    let (_calls, nudger) = counting_nudger();
    let ack = project
        .ack_manager()
        .with_nudger(nudger)
        .with_event_log(Arc::clone(&log));

    ack.wait_with_escalation("silent-task", &NudgeTarget::new(3, "%3"), SHORT_PHASE, 2);

    let escalations = log.read_events(Some(EventKind::Escalation)).unwrap();
    assert_eq!(escalations.len(), 2);
    assert!(escalations.iter().all(|e| e.data["worker_id"] == 3));
    assert_eq!(log.summary().unwrap().escalation_count, 2);
}

/// Test: Async wait
#[tokio::test]
async fn test_wait_async_sees_late_ack() {
    let project = TestProject::new();
    let ack_dir = project.ack_dir();
    let ack = project.ack_manager();

    let sender = tokio::task::spawn_blocking(move || {
        thread::sleep(Duration::from_millis(50));
        AckManager::new(ack_dir).unwrap().send("late-task", "worker")
    });

    assert!(ack.wait_async("late-task", Duration::from_secs(5), FAST_POLL).await);
    assert!(sender.await.unwrap());
}

/// Test: Review loop guard
/// Given the default configured limits
/// When a task bounces between review and fix
/// Then the fourth bounce is reported and logged
#[test]
fn test_review_cycle_guard() {
    let project = TestProject::new();
    let log = EventLog::open(project.path.join(".ensemble/logs"), "session-loop").unwrap();
    let mut cycles: CycleDetector = project.config.cycle_detector();
    let mut loops: LoopDetector = project.config.loop_detector();
    let task_id = project.enqueue("implement", "worker");

    let mut stopped_at = None;
    for round in 1..=10 {
        loops.record(&task_id);
        if let Err(err) = cycles.check_review_cycle(&task_id) {
            log.log_loop_detected(&task_id, err.count, err.max).unwrap();
            let err: Error = err.into();
            assert!(matches!(err, Error::LoopDetected(_)));
            stopped_at = Some(round);
            break;
        }
    }

    assert_eq!(stopped_at, Some(4));
    assert_eq!(loops.get_count(&task_id), 4);
    assert!(loops.check_loop(&task_id).is_ok());
    assert!(loops.check_loop(&task_id).is_err());
    assert_eq!(log.summary().unwrap().loops_detected, 1);
}
