//! Generation pipelines: one-shot text, schema-constrained objects, and
//! streaming with an agentic tool loop.
//!
//! A [`Generator`] wraps a provider plus optional guardrails and exposes the
//! three entry points over a shared request envelope. Retries are owned by
//! the object pipeline only; text callers compose retry externally.

mod object;
mod streaming;
mod text;

pub use object::{ObjectOptions, ObjectResult, Validator};
pub use streaming::{
    ContentPart, StreamRequest, StreamResponse, StreamRun, ThinkingOptions, marker_pairs,
};
pub use text::{ParsedToolCall, TextRequest, TextResult};

use std::sync::Arc;
use std::time::Duration;

use crate::guardrail::{Guardrails, Violation};
use crate::provider::SharedChatProvider;

/// Timeouts for the generation entry points.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorConfig {
    /// Overall deadline for one-shot and per-attempt object calls.
    pub text_timeout: Duration,
    /// Overall deadline for a full streaming run, tool loop included.
    pub stream_timeout: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            text_timeout: Duration::from_secs(30),
            stream_timeout: Duration::from_secs(60),
        }
    }
}

/// The generation pipeline front-end.
#[derive(Clone)]
pub struct Generator {
    pub(crate) provider: SharedChatProvider,
    pub(crate) guardrails: Option<Arc<dyn Guardrails>>,
    pub(crate) config: GeneratorConfig,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Generator {
    /// Create a generator over a provider.
    #[must_use]
    pub fn new(provider: SharedChatProvider) -> Self {
        Self {
            provider,
            guardrails: None,
            config: GeneratorConfig::default(),
        }
    }

    /// Attach guardrails, invoked on input before the first model call and
    /// on output before returning.
    #[must_use]
    pub fn with_guardrails(mut self, guardrails: Arc<dyn Guardrails>) -> Self {
        self.guardrails = Some(guardrails);
        self
    }

    /// Override the timeout configuration.
    #[must_use]
    pub const fn with_config(mut self, config: GeneratorConfig) -> Self {
        self.config = config;
        self
    }

    pub(crate) async fn check_input(
        &self,
        text: &str,
    ) -> Result<Vec<Violation>, crate::error::GenerateError> {
        match &self.guardrails {
            Some(guardrails) => guardrails.validate_input(text).await,
            None => Ok(Vec::new()),
        }
    }

    pub(crate) async fn check_output(
        &self,
        text: &str,
    ) -> Result<Vec<Violation>, crate::error::GenerateError> {
        match &self.guardrails {
            Some(guardrails) => guardrails.validate_output(text).await,
            None => Ok(Vec::new()),
        }
    }
}
