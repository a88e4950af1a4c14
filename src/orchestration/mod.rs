//! Orchestration helpers layered on the queue.
//!
//! Runaway guards for repeated work, the ack/escalation protocol used when
//! dispatching to workers, the nudge actions it drives, and the per-session
//! event log.

pub mod ack;
pub mod detection;
pub mod events;
pub mod nudge;

pub use ack::{AckManager, AckRecord};
pub use detection::{CycleDetector, LoopDetector, DEFAULT_MAX_CYCLES, DEFAULT_MAX_ITERATIONS};
pub use events::{generate_session_id, Event, EventKind, EventLog, SessionSummary};
pub use nudge::{NudgeOutcome, NudgeTarget, Nudger, ScriptNudger, TmuxNudger};
