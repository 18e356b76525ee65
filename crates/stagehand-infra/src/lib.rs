//! Infrastructure layer for Stagehand.
//!
//! Contains the pieces that touch the outside world: config file loading,
//! data directory layout, registry snapshot persistence, signed webhook
//! delivery (implementing `EventNotifier` from `stagehand-core`), and the
//! stand-in passthrough orchestrator.

pub mod config;
pub mod filesystem;
pub mod orchestrator;
pub mod snapshot;
pub mod webhook;
