//! Integration test suite for ensemble.
//!
//! These tests drive the public API the way an orchestrator and its
//! workers do: publishing tasks, racing to claim them, resolving
//! dependencies and escalating silent workers.
//!
//! # Test Categories
//!
//! - `queue_lifecycle`: enqueue, claim and complete through the directories
//! - `concurrency`: many claimants and writers on one queue
//! - `dependency_flow`: resolver driven from queue state
//! - `escalation`: ack waiting, nudging and the event log
//!
//! # CI Compatibility
//!
//! Worker processes are simulated with threads and nudges with closures,
//! so no tmux server or escalate script is required.

mod fixtures;

mod queue_lifecycle;
mod dependency_flow;
mod escalation;
