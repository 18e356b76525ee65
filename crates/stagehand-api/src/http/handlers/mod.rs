//! HTTP request handlers for the REST API.

pub mod health;
pub mod stream;
pub mod webhook;
pub mod workflow;
