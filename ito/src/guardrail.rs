//! Guardrails port — safety checks invoked at generation boundaries.
//!
//! The runtime performs no detection itself: a host injects a [`Guardrails`]
//! implementation and the generators call it on input before the first model
//! call and on output before returning. Violations are surfaced on results;
//! what to do about them is the host's policy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GenerateError;

/// A single policy violation reported by a guardrail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Identifier of the rule that fired.
    pub rule: String,
    /// Human-readable description of the violation.
    pub message: String,
}

impl Violation {
    /// Create a new violation.
    #[must_use]
    pub fn new(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            message: message.into(),
        }
    }
}

/// The guardrails port.
#[async_trait]
pub trait Guardrails: Send + Sync {
    /// Validate text entering the runtime.
    async fn validate_input(&self, text: &str) -> Result<Vec<Violation>, GenerateError>;

    /// Validate text leaving the runtime.
    async fn validate_output(&self, text: &str) -> Result<Vec<Violation>, GenerateError>;

    /// Redact personally identifiable information from text.
    ///
    /// The default implementation returns the text unchanged.
    fn redact_pii(&self, text: &str) -> String {
        text.to_owned()
    }
}
