/// Capability registry
///
/// Tools, prompts and prompt-parameter completions are registered here once at
/// startup. After that the registry is shared behind an `Arc` and only read,
/// so lookups from concurrent dispatches need no locking.
///
/// Registration is idempotent by name: registering a tool or prompt under a
/// name that is already taken replaces the earlier handler. The last
/// registration wins. The same holds for a completion registered twice for the
/// same prompt parameter.

pub mod schema;

pub use schema::{Binding, ParamSchema, ParamSpec, ParamType, Params, ValidationError};

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::domain::CapabilityKind;

/// Failure raised by a capability handler
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("result could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HandlerError {
    /// Convenience constructor for handler code
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// Errors raised while building the registry
#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("no {kind} named '{name}'")]
    NotFound { kind: CapabilityKind, name: String },

    #[error("no completion for parameter '{parameter}' of prompt '{prompt}'")]
    CompletionNotFound { prompt: String, parameter: String },

    #[error("prompt '{prompt}' declares no parameter '{parameter}'")]
    UnknownParameter { prompt: String, parameter: String },
}

/// Type-erased tool or prompt handler
pub type HandlerFn = Arc<dyn Fn(Params) -> Result<Value, HandlerError> + Send + Sync>;

/// Completion handler: partial value in, candidate values out
pub type CompletionFn = Arc<dyn Fn(&str) -> Result<Vec<String>, HandlerError> + Send + Sync>;

/// A registered tool or prompt
#[derive(Clone)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub kind: CapabilityKind,
    pub description: Option<String>,
    pub schema: ParamSchema,
    handler: HandlerFn,
}

impl CapabilityDescriptor {
    /// Attach a human-readable description
    pub fn describe(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = Some(description.into());
        self
    }

    /// Invoke the handler with already-bound parameters
    pub fn call(&self, params: Params) -> Result<Value, HandlerError> {
        (self.handler)(params)
    }

    pub fn handler(&self) -> HandlerFn {
        self.handler.clone()
    }
}

impl fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("description", &self.description)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Wrap a typed handler so its result is serialized to JSON
fn erase<F, R>(handler: F) -> HandlerFn
where
    F: Fn(Params) -> Result<R, HandlerError> + Send + Sync + 'static,
    R: Serialize,
{
    Arc::new(move |params: Params| -> Result<Value, HandlerError> {
        let result = handler(params)?;
        Ok(serde_json::to_value(result)?)
    })
}

/// Lookup tables for every registered capability
#[derive(Default)]
pub struct HandlerRegistry {
    tools: HashMap<String, CapabilityDescriptor>,
    prompts: HashMap<String, CapabilityDescriptor>,
    completions: HashMap<(String, String), CompletionFn>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; replaces any tool already registered under `name`
    pub fn register_tool<F, R>(&mut self, name: impl Into<String>, schema: ParamSchema, handler: F) -> &mut CapabilityDescriptor
    where
        F: Fn(Params) -> Result<R, HandlerError> + Send + Sync + 'static,
        R: Serialize,
    {
        self.register(CapabilityKind::Tool, name.into(), schema, erase(handler))
    }

    /// Register a prompt; replaces any prompt already registered under `name`
    ///
    /// Completions for parameters the new schema still declares are kept, the
    /// rest are dropped.
    pub fn register_prompt<F, R>(&mut self, name: impl Into<String>, schema: ParamSchema, handler: F) -> &mut CapabilityDescriptor
    where
        F: Fn(Params) -> Result<R, HandlerError> + Send + Sync + 'static,
        R: Serialize,
    {
        self.register(CapabilityKind::Prompt, name.into(), schema, erase(handler))
    }

    /// Register an already type-erased handler under a kind
    ///
    /// A completion request is addressed to a prompt, so `Completion` registers
    /// a prompt; use `register_completion` for the per-parameter handlers
    /// themselves.
    pub fn register(&mut self, kind: CapabilityKind, name: String, schema: ParamSchema, handler: HandlerFn) -> &mut CapabilityDescriptor {
        let kind = match kind {
            CapabilityKind::Completion => CapabilityKind::Prompt,
            other => other,
        };
        if kind == CapabilityKind::Prompt {
            self.drop_undeclared_completions(&name, &schema);
        }

        let descriptor = CapabilityDescriptor {
            name: name.clone(),
            kind,
            description: None,
            schema,
            handler,
        };

        match self.table_mut(kind).entry(name) {
            Entry::Occupied(mut entry) => {
                tracing::info!("Replaced previously registered {} '{}'", kind, entry.key());
                entry.insert(descriptor);
                entry.into_mut()
            }
            Entry::Vacant(entry) => {
                tracing::debug!("Registered {} '{}'", kind, entry.key());
                entry.insert(descriptor)
            }
        }
    }

    /// Register a completion handler for one parameter of a registered prompt
    ///
    /// Fails if the prompt is unknown or does not declare the parameter.
    pub fn register_completion<F>(&mut self, prompt: &str, parameter: &str, handler: F) -> Result<(), RegistryError>
    where
        F: Fn(&str) -> Result<Vec<String>, HandlerError> + Send + Sync + 'static,
    {
        let descriptor = self.prompts.get(prompt).ok_or_else(|| RegistryError::NotFound {
            kind: CapabilityKind::Prompt,
            name: prompt.to_string(),
        })?;

        if descriptor.schema.get(parameter).is_none() {
            return Err(RegistryError::UnknownParameter {
                prompt: prompt.to_string(),
                parameter: parameter.to_string(),
            });
        }

        let key = (prompt.to_string(), parameter.to_string());
        if self.completions.insert(key, Arc::new(handler)).is_some() {
            tracing::info!("Replaced completion for {}.{}", prompt, parameter);
        }
        Ok(())
    }

    /// Forget completions for parameters `schema` no longer declares
    fn drop_undeclared_completions(&mut self, prompt: &str, schema: &ParamSchema) {
        self.completions.retain(|(owner, parameter), _| {
            let keep = owner != prompt || schema.get(parameter).is_some();
            if !keep {
                tracing::warn!("Dropped completion for {}.{}: parameter is no longer declared", owner, parameter);
            }
            keep
        });
    }

    /// Look up a capability by kind and name
    pub fn resolve(&self, kind: CapabilityKind, name: &str) -> Result<&CapabilityDescriptor, RegistryError> {
        self.table(kind).get(name).ok_or_else(|| RegistryError::NotFound {
            kind,
            name: name.to_string(),
        })
    }

    /// Look up the completion handler for a prompt parameter
    pub fn resolve_completion(&self, prompt: &str, parameter: &str) -> Result<CompletionFn, RegistryError> {
        self.completions
            .get(&(prompt.to_string(), parameter.to_string()))
            .cloned()
            .ok_or_else(|| RegistryError::CompletionNotFound {
                prompt: prompt.to_string(),
                parameter: parameter.to_string(),
            })
    }

    /// All capabilities of a kind, sorted by name
    pub fn list(&self, kind: CapabilityKind) -> Vec<&CapabilityDescriptor> {
        let mut items: Vec<_> = self.table(kind).values().collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        items
    }

    /// Parameters of a prompt that have completion handlers, sorted
    pub fn completable_params(&self, prompt: &str) -> Vec<&str> {
        let mut params: Vec<&str> = self
            .completions
            .keys()
            .filter(|(p, _)| p == prompt)
            .map(|(_, param)| param.as_str())
            .collect();
        params.sort_unstable();
        params
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.prompts.is_empty()
    }

    fn table(&self, kind: CapabilityKind) -> &HashMap<String, CapabilityDescriptor> {
        match kind {
            CapabilityKind::Tool => &self.tools,
            CapabilityKind::Prompt | CapabilityKind::Completion => &self.prompts,
        }
    }

    fn table_mut(&mut self, kind: CapabilityKind) -> &mut HashMap<String, CapabilityDescriptor> {
        match kind {
            CapabilityKind::Tool => &mut self.tools,
            CapabilityKind::Prompt | CapabilityKind::Completion => &mut self.prompts,
        }
    }
}
