//! Shared domain types for Stagehand.
//!
//! This crate contains the types passed between the scheduler, registry,
//! stream bridge, webhook dispatcher and REST layer: workflow records and
//! results, progress events, configuration, and their error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod webhook;
pub mod workflow;
