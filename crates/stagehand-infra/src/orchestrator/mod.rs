//! Concrete orchestrator implementations.

pub mod passthrough;

pub use passthrough::PassthroughOrchestrator;
