//! Schema-constrained object generation.
//!
//! The target type's JSON schema is derived with `schemars` and injected
//! into the system message as an instruction. Parse and validator failures
//! count as attempts and are retried with a delay; when the budget is
//! exhausted, `fallback_on_fail` decides between returning the last parsed
//! value (or the type's default) and returning the error.

use std::time::Duration;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::GenerateError;
use crate::json_util;
use crate::usage::Usage;

use super::text::TextRequest;
use super::Generator;

/// A post-parse validator. Returns a message describing the rejection.
pub type Validator<T> = Box<dyn Fn(&T) -> Result<(), String> + Send + Sync>;

/// Options for object generation.
pub struct ObjectOptions<T> {
    /// Additional attempts after the first.
    pub retries: usize,
    /// Delay between attempts.
    pub retry_delay: Duration,
    /// Return the last parsed (possibly default) value instead of an error
    /// once retries are exhausted.
    pub fallback_on_fail: bool,
    /// Ask the model to follow the schema exactly. A prompt-level hint; the
    /// parse path is unchanged.
    pub strict_schema: bool,
    /// Validators run in order against each parsed value.
    pub validators: Vec<Validator<T>>,
}

impl<T> Default for ObjectOptions<T> {
    fn default() -> Self {
        Self {
            retries: 2,
            retry_delay: Duration::from_millis(200),
            fallback_on_fail: false,
            strict_schema: false,
            validators: Vec::new(),
        }
    }
}

impl<T> std::fmt::Debug for ObjectOptions<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectOptions")
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("fallback_on_fail", &self.fallback_on_fail)
            .field("strict_schema", &self.strict_schema)
            .field("validators", &self.validators.len())
            .finish()
    }
}

impl<T> ObjectOptions<T> {
    /// Set the retry budget.
    #[must_use]
    pub const fn retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    /// Set the delay between attempts.
    #[must_use]
    pub const fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Enable fallback-on-fail.
    #[must_use]
    pub const fn fallback_on_fail(mut self, enabled: bool) -> Self {
        self.fallback_on_fail = enabled;
        self
    }

    /// Enable the strict-schema prompt hint.
    #[must_use]
    pub const fn strict_schema(mut self, enabled: bool) -> Self {
        self.strict_schema = enabled;
        self
    }

    /// Add a validator.
    #[must_use]
    pub fn validator(
        mut self,
        validator: impl Fn(&T) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validators.push(Box::new(validator));
        self
    }
}

/// Result of an object generation.
#[derive(Debug, Clone)]
pub struct ObjectResult<T> {
    /// The generated value.
    pub value: T,
    /// Attempts made, including the first.
    pub attempts: usize,
    /// Usage accumulated across attempts.
    pub usage: Usage,
    /// Whether the value came from the fallback path.
    pub fell_back: bool,
}

/// Derive the JSON schema for `T`, without the `$schema` meta field.
pub(crate) fn json_schema_for<T: JsonSchema>() -> Result<Value, GenerateError> {
    let root = schemars::schema_for!(T);
    let mut schema = serde_json::to_value(&root)
        .map_err(|e| GenerateError::SchemaGen(e.to_string()))?;
    if let Value::Object(map) = &mut schema {
        map.remove("$schema");
    }
    Ok(schema)
}

impl Generator {
    /// Generate a `T` by constraining the model to its JSON schema.
    pub async fn generate_object<T>(
        &self,
        request: &TextRequest,
        options: &ObjectOptions<T>,
    ) -> Result<ObjectResult<T>, GenerateError>
    where
        T: DeserializeOwned + JsonSchema + Default,
    {
        let schema = json_schema_for::<T>()?;
        let schema_text = serde_json::to_string(&schema)
            .map_err(|e| GenerateError::SchemaGen(e.to_string()))?;

        let mut instruction = format!(
            "You must return a valid JSON object that matches this schema: {schema_text}"
        );
        if options.strict_schema {
            instruction.push_str(
                " Follow the schema exactly; do not add fields it does not declare.",
            );
        }

        let mut constrained = request.clone();
        constrained.system = Some(match &request.system {
            Some(system) => format!("{system}\n\n{instruction}"),
            None => instruction,
        });

        let mut usage = Usage::zero();
        let mut last_error: Option<GenerateError> = None;
        let mut last_parsed: Option<T> = None;
        let total_attempts = options.retries + 1;

        for attempt in 1..=total_attempts {
            if attempt > 1 {
                tokio::time::sleep(options.retry_delay).await;
            }

            match self.generate_text(&constrained).await {
                Ok(result) => {
                    usage += result.usage;
                    match json_util::parse_json_span::<T>(&result.content) {
                        Ok(value) => {
                            match run_validators(&options.validators, &value) {
                                Ok(()) => {
                                    return Ok(ObjectResult {
                                        value,
                                        attempts: attempt,
                                        usage,
                                        fell_back: false,
                                    });
                                }
                                Err(message) => {
                                    warn!(attempt, %message, "Validator rejected object");
                                    last_parsed = Some(value);
                                    last_error = Some(GenerateError::Validation {
                                        attempts: attempt,
                                        message,
                                    });
                                }
                            }
                        }
                        Err(parse_err) => {
                            debug!(attempt, error = %parse_err, "Object parse failed");
                            last_error = Some(GenerateError::parse(
                                result.content,
                                parse_err.to_string(),
                            ));
                        }
                    }
                }
                Err(err) => {
                    // Provider failures also consume an attempt.
                    debug!(attempt, error = %err, "Object generation attempt failed");
                    last_error = Some(err);
                }
            }
        }

        if options.fallback_on_fail {
            return Ok(ObjectResult {
                value: last_parsed.unwrap_or_default(),
                attempts: total_attempts,
                usage,
                fell_back: true,
            });
        }

        Err(last_error
            .unwrap_or_else(|| GenerateError::provider("object generation produced no attempts")))
    }
}

fn run_validators<T>(validators: &[Validator<T>], value: &T) -> Result<(), String> {
    for validator in validators {
        validator(value)?;
    }
    Ok(())
}
