//! Outbound webhooks: HMAC signing and retrying HTTP delivery.

pub mod dispatcher;
pub mod signing;

pub use dispatcher::WebhookDispatcher;
