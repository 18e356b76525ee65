//! Execution backbone for Stagehand.
//!
//! This crate owns the long-running pieces: the dedicated task executor, the
//! workflow registry, the per-task event stream bridge, and the orchestration
//! gateway. It depends only on `stagehand-types` -- never on
//! `stagehand-infra` or any HTTP crate. Outbound webhooks and concrete
//! orchestrators plug in through the `EventNotifier` and `Orchestrator` traits.

pub mod event;
pub mod workflow;
