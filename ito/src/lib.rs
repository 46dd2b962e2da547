//! ito is an agent-runtime SDK core: it turns a natural-language task plus
//! a toolbox into a verifiable sequence of model calls and tool
//! invocations, streaming partial results as typed events while they
//! happen.
//!
//! The crate is organized around five subsystems:
//!
//! - [`generate`] — one-shot text, schema-constrained object, and streaming
//!   generation with an agentic tool loop;
//! - [`strategy`] — pluggable reasoning loops (ReAct, Plan-Execute) over an
//!   [`agent::Agent`] configuration;
//! - [`event`] — the typed, block-structured streaming event protocol;
//! - [`tool`] — the tool registry with per-tool timeouts and presentation
//!   tools;
//! - [`memory`] — tiered memory recalled by vector similarity.
//!
//! Model providers, vector stores, plan stores, embedding models, and
//! guardrails are ports: the crate defines the traits and ships in-memory
//! reference implementations, while production backends are injected by
//! the host.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ito::prelude::*;
//!
//! let provider: SharedChatProvider = Arc::new(my_provider);
//! let agent = Agent::new("researcher", "gpt-4o", provider)
//!     .system_prompt("You are a careful researcher.");
//!
//! let strategy = ReactStrategy::new();
//! let execution = strategy
//!     .execute(&RunContext::new(), &agent, "Capital of France?")
//!     .await?;
//! println!("{}", execution.final_output);
//! ```

pub mod agent;
pub mod error;
pub mod event;
pub mod generate;
pub mod guardrail;
pub mod json_util;
pub mod memory;
pub mod message;
pub mod plan;
pub mod prelude;
pub mod prompt;
pub mod provider;
pub mod reflection;
pub mod replan;
pub mod state;
pub mod strategy;
pub mod tool;
pub mod usage;
pub mod verifier;

pub use error::{Error, Result};
