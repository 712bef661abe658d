//! Completion-provider adapters.
//!
//! Each provider module implements [`traits::ModelAdapter`]; the evolution
//! pipeline only ever talks to the trait. [`http`] holds the HTTPS client
//! shared with the discovery sources.

#![warn(missing_docs, clippy::pedantic)]

pub mod anthropic;
pub mod http;
pub mod openai;
pub mod traits;
