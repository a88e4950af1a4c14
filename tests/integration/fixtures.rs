//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - A project directory with a queue and ack directory
//! - Counting nudgers
//! - Predefined dependency chains

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use ensemble::core::task::Params;
use ensemble::orchestration::{AckManager, NudgeOutcome, NudgeTarget, Nudger};
use ensemble::{Config, TaskQueue};

/// Phase timeout short enough to keep escalation tests fast.
pub const SHORT_PHASE: Duration = Duration::from_millis(100);

/// Poll interval used alongside [`SHORT_PHASE`].
pub const FAST_POLL: Duration = Duration::from_millis(10);

/// A temporary project with a queue built from the default configuration.
pub struct TestProject {
    /// The temporary directory containing the project.
    pub temp_dir: TempDir,
    /// Path to the project root.
    pub path: PathBuf,
    pub config: Config,
    pub queue: TaskQueue,
}

impl TestProject {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().to_path_buf();
        let config = Config::default();
        let queue = config.task_queue(&path).expect("Failed to create queue");
        Self {
            temp_dir,
            path,
            config,
            queue,
        }
    }

    pub fn ack_dir(&self) -> PathBuf {
        self.queue.layout().ack_dir()
    }

    /// An ack manager on this project's ack directory with a fast poll.
    pub fn ack_manager(&self) -> AckManager {
        AckManager::new(self.ack_dir())
            .expect("Failed to create ack manager")
            .with_poll_interval(FAST_POLL)
    }

    /// Enqueue `command` for `agent` with no params and no blockers.
    pub fn enqueue(&self, command: &str, agent: &str) -> String {
        self.queue
            .enqueue(command, agent, Params::new())
            .expect("Failed to enqueue")
    }

    /// Enqueue `command` blocked by `blockers`.
    pub fn enqueue_after(&self, command: &str, blockers: &[&str]) -> String {
        self.queue
            .enqueue_with_dependency(command, "worker", Params::new(), blockers.iter().copied())
            .expect("Failed to enqueue")
    }

    /// Enqueue `design -> implement -> review` and return the ids in order.
    ///
    /// The steps are spaced out so their ids also sort in enqueue order.
    pub fn enqueue_chain(&self) -> [String; 3] {
        let design = self.enqueue_after("design", &[]);
        std::thread::sleep(Duration::from_millis(2));
        let implement = self.enqueue_after("implement", &[design.as_str()]);
        std::thread::sleep(Duration::from_millis(2));
        let review = self.enqueue_after("review", &[implement.as_str()]);
        [design, implement, review]
    }
}

/// A nudger that counts calls and always reports `Sent`.
pub fn counting_nudger() -> (Arc<AtomicU32>, impl Nudger) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let nudger = move |_: &NudgeTarget, _: u32| {
        counter.fetch_add(1, Ordering::SeqCst);
        NudgeOutcome::Sent
    };
    (calls, nudger)
}
