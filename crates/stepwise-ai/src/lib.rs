//! stepwise-ai: policy abstraction over LLM providers
//!
//! A policy is a single decision call: messages in, one AI message out. This
//! crate defines the message types, the `Policy` trait, a retrying wrapper
//! and HTTP clients for Anthropic and OpenAI-compatible endpoints.

pub mod error;
pub mod policy;
pub mod providers;
pub mod types;

pub use error::{Error, Result};
pub use policy::{Policy, RetryConfig, RetryingPolicy, SharedPolicy};
pub use types::*;
