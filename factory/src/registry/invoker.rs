//! Calls capability implementations by name and wraps every call in the
//! uniform [`CapabilityResult`] envelope.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::capabilities;
use crate::core::shape::validate_value;
use crate::core::types::{CapabilityResult, RunError, codes, elapsed_ms, format_timestamp};
use crate::io::config::FactoryConfig;
use crate::registry::store::{Registry, RegistryError};

/// A capability implementation.
///
/// Errors returned here surface as `UNHANDLED` in the envelope; they never
/// abort the caller.
pub trait Capability: Send + Sync {
    fn run(&self, input: &Value) -> Result<Value>;
}

impl<F> Capability for F
where
    F: Fn(&Value) -> Result<Value> + Send + Sync,
{
    fn run(&self, input: &Value) -> Result<Value> {
        self(input)
    }
}

/// Static map from descriptor `entry` to implementation.
#[derive(Default)]
pub struct CapabilityTable {
    entries: BTreeMap<String, Box<dyn Capability>>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding every built-in capability.
    pub fn builtin(config: &FactoryConfig) -> Self {
        let mut table = Self::new();
        capabilities::register_builtins(&mut table, config);
        table
    }

    /// Register (or replace) the implementation for `entry`.
    pub fn register(&mut self, entry: impl Into<String>, capability: impl Capability + 'static) {
        self.entries.insert(entry.into(), Box::new(capability));
    }

    pub fn get(&self, entry: &str) -> Option<&dyn Capability> {
        self.entries.get(entry).map(|boxed| boxed.as_ref())
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("capability '{name}' has no implementation registered for entry '{entry}'")]
    MissingEntry { name: String, entry: String },
}

pub struct Invoker {
    registry: Registry,
    table: CapabilityTable,
}

impl Invoker {
    pub fn new(registry: Registry, table: CapabilityTable) -> Self {
        Self { registry, table }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn table_mut(&mut self) -> &mut CapabilityTable {
        &mut self.table
    }

    /// Resolve `name`, check `input`, run the implementation, check its output.
    ///
    /// `Err` is reserved for wiring failures; everything else is an envelope.
    #[instrument(skip(self, input))]
    pub fn invoke(&self, name: &str, input: &Value) -> Result<CapabilityResult, InvokeError> {
        let descriptor = self.registry.resolve(name)?;
        let capability =
            self.table
                .get(&descriptor.entry)
                .ok_or_else(|| InvokeError::MissingEntry {
                    name: name.to_string(),
                    entry: descriptor.entry.clone(),
                })?;

        let started = Utc::now();
        let envelope = |errors: Vec<RunError>, data: Option<Value>| {
            let finished = Utc::now();
            CapabilityResult {
                ok: errors.is_empty(),
                agent: name.to_string(),
                started_at: format_timestamp(started),
                finished_at: format_timestamp(finished),
                ms: elapsed_ms(started, finished),
                errors,
                data,
            }
        };

        let input_check = self.registry.validate_input(input, &descriptor);
        if !input_check.ok {
            debug!(errors = input_check.errors.len(), "input rejected");
            return Ok(envelope(
                vec![RunError::new(
                    codes::INPUT_INVALID,
                    input_check.errors.join("; "),
                )],
                None,
            ));
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| capability.run(input)));
        let data = match outcome {
            Ok(Ok(data)) => data,
            Ok(Err(err)) => {
                warn!(err = %format!("{err:#}"), "capability failed");
                return Ok(envelope(
                    vec![RunError::new(codes::UNHANDLED, format!("{err:#}"))],
                    None,
                ));
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(%message, "capability panicked");
                return Ok(envelope(
                    vec![RunError::new(codes::UNHANDLED, message)],
                    None,
                ));
            }
        };

        let output_errors = validate_value(&data, &descriptor.output_schema, "output");
        if !output_errors.is_empty() {
            warn!(errors = output_errors.len(), "output rejected");
            return Ok(envelope(
                vec![RunError::new(
                    codes::OUTPUT_INVALID,
                    output_errors.join("; "),
                )],
                Some(data),
            ));
        }

        Ok(envelope(Vec::new(), Some(data)))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return format!("panic: {message}");
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return format!("panic: {message}");
    }
    "panic: <non-string payload>".to_string()
}
