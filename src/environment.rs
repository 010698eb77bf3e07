//! Environment adapter: the mutable-state boundary tool calls run against.
//!
//! Each trial owns exactly one adapter instance, namespaced by a trial
//! identifier so concurrent trials never collide. `SimEnvironment` is the
//! in-crate simulated world: a JSON state document plus the task's inline
//! tool specs, with response templates and merge-patch state effects.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::catalog::{EnvConfig, ToolSpec};
use crate::errors::{classify_tool_error, ToolErrorKind};
use crate::protocol::{ToolCall, ToolDescriptor};

// ---------------------------------------------------------------------------
// Adapter contract
// ---------------------------------------------------------------------------

/// Outcome of applying one tool call to the environment.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub ok: bool,
    pub content: String,
    pub error_kind: Option<ToolErrorKind>,
}

impl ToolOutcome {
    pub fn success(content: impl Into<String>) -> Self {
        ToolOutcome {
            ok: true,
            content: content.into(),
            error_kind: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = classify_tool_error(&message);
        ToolOutcome {
            ok: false,
            content: message,
            error_kind: Some(kind),
        }
    }
}

/// The boundary contract: reset to a task's initial world, apply calls,
/// read snapshots. Implementations must keep all mutable state inside the
/// instance.
#[async_trait]
pub trait EnvironmentAdapter: Send {
    async fn reset(&mut self, config: &EnvConfig) -> Result<Value>;
    async fn apply(&mut self, call: &ToolCall) -> ToolOutcome;
    fn snapshot(&self) -> Value;
    /// Identifier isolating this instance's storage from other trials.
    fn trial_namespace(&self) -> &str;
    /// Descriptors for the tools this environment offers, sent to the
    /// agent in the opening turn.
    fn tool_descriptors(&self) -> Vec<ToolDescriptor>;
}

// ---------------------------------------------------------------------------
// Simulated environment
// ---------------------------------------------------------------------------

pub struct SimEnvironment {
    namespace: String,
    state: Value,
    tools: Vec<ToolSpec>,
}

impl SimEnvironment {
    pub fn new(namespace: impl Into<String>) -> Self {
        SimEnvironment {
            namespace: namespace.into(),
            state: Value::Object(serde_json::Map::new()),
            tools: Vec::new(),
        }
    }

    fn find_tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Check the call's arguments against the declared parameter schema:
    /// arguments must be an object (or absent when nothing is required)
    /// and every `required` property must be present.
    fn validate_arguments(spec: &ToolSpec, call: &ToolCall) -> Result<(), String> {
        let required: Vec<&str> = spec
            .parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let args = match &call.arguments {
            Value::Object(map) => map,
            Value::Null if required.is_empty() => return Ok(()),
            Value::Null => {
                return Err(format!(
                    "Missing required argument: {}",
                    required.join(", ")
                ))
            }
            other => return Err(format!("Invalid arguments: expected an object, got {other}")),
        };

        for name in required {
            if !args.contains_key(name) {
                return Err(format!("Missing required argument: {name}"));
            }
        }
        Ok(())
    }

    /// Replace `{name}` placeholders with the call's argument values.
    fn substitute(template: &str, args: &Value) -> String {
        let mut out = template.to_string();
        if let Some(map) = args.as_object() {
            for (key, value) in map {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                out = out.replace(&format!("{{{key}}}"), &rendered);
            }
        }
        out
    }

    /// Substitute placeholders inside an effect patch before merging it.
    /// Object keys are substituted too, so effects can write to
    /// argument-derived locations.
    fn substitute_value(template: &Value, args: &Value) -> Value {
        match template {
            Value::String(s) => Value::String(Self::substitute(s, args)),
            Value::Array(items) => Value::Array(
                items.iter().map(|v| Self::substitute_value(v, args)).collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| {
                        (Self::substitute(k, args), Self::substitute_value(v, args))
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// RFC 7386 style merge patch: objects merge recursively, null removes a
/// key, anything else replaces.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(patch_map) => {
            if !target.is_object() {
                *target = Value::Object(serde_json::Map::new());
            }
            if let Value::Object(target_map) = target {
                for (key, value) in patch_map {
                    if value.is_null() {
                        target_map.remove(key);
                    } else {
                        let entry = target_map.entry(key.clone()).or_insert(Value::Null);
                        merge_patch(entry, value);
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}

#[async_trait]
impl EnvironmentAdapter for SimEnvironment {
    async fn reset(&mut self, config: &EnvConfig) -> Result<Value> {
        self.state = config.initial_state.clone();
        self.tools = config.tools.clone();
        Ok(self.state.clone())
    }

    async fn apply(&mut self, call: &ToolCall) -> ToolOutcome {
        let Some(spec) = self.find_tool(&call.tool_name) else {
            return ToolOutcome::failure(format!("Tool '{}' not found", call.tool_name));
        };
        let spec = spec.clone();

        if let Err(msg) = Self::validate_arguments(&spec, call) {
            return ToolOutcome::failure(msg);
        }

        if let Some(effect) = &spec.effect {
            let patch = Self::substitute_value(effect, &call.arguments);
            merge_patch(&mut self.state, &patch);
        }

        let content = if spec.response.is_empty() {
            "ok".to_string()
        } else {
            Self::substitute(&spec.response, &call.arguments)
        };
        ToolOutcome::success(content)
    }

    fn snapshot(&self) -> Value {
        self.state.clone()
    }

    fn trial_namespace(&self) -> &str {
        &self.namespace
    }

    fn tool_descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|t| ToolDescriptor {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            })
            .collect()
    }
}
