//! Minimal Anthropic messages-API client. One job: turn a prompt pair into
//! either plain text or a schema-constrained JSON value, synchronously per
//! call. Retries and fallbacks belong to callers.

pub mod claude;
pub mod schema;

pub use claude::Claude;
pub use schema::StructuredOutput;
