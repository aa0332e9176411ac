//! Tool registry and capability contract
//!
//! Tools are local capabilities the remote model may invoke by name. The
//! registry is built at startup, validated against duplicate names, and
//! advertised verbatim in the `session.update` configuration message.
//! Capabilities never propagate failures past their own boundary; any
//! internal fault becomes a structured failure record.

mod device;

pub use device::{BatteryLevelTool, DeviceServices, ScreenBrightnessTool};

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Declared signature of a tool, sent verbatim to the remote service
///
/// Field names `type`, `name`, `description`, `parameters` are part of
/// the remote contract and must not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDescriptor {
    /// Describe a function-type tool
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            kind: "function".to_string(),
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Result record of a tool invocation
///
/// Either a success record (`{"success": true, ...}`) or a structured
/// failure (`{"success": false, "error": <reason>}`). Both travel back
/// to the remote service; failure is delivered, not swallowed.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    value: Value,
}

impl ToolOutcome {
    /// Build a success record; `fields` must be a JSON object and is
    /// merged after the `success` marker
    pub fn success(fields: Value) -> Self {
        let mut record = Map::new();
        record.insert("success".to_string(), Value::Bool(true));
        if let Value::Object(fields) = fields {
            record.extend(fields);
        }
        Self {
            value: Value::Object(record),
        }
    }

    /// Build a structured failure record
    pub fn failure(reason: impl Into<String>) -> Self {
        let mut record = Map::new();
        record.insert("success".to_string(), Value::Bool(false));
        record.insert("error".to_string(), Value::String(reason.into()));
        Self {
            value: Value::Object(record),
        }
    }

    /// Check whether this outcome carries a success record
    pub fn is_success(&self) -> bool {
        self.value
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Failure reason, if any
    pub fn error(&self) -> Option<&str> {
        self.value.get("error").and_then(Value::as_str)
    }

    /// The underlying result record
    pub fn as_value(&self) -> &Value {
        &self.value
    }

    /// Serialize into the `function_call_output.output` string
    pub fn to_output(&self) -> Result<String> {
        serde_json::to_string(&self.value)
            .map_err(|e| Error::ProtocolParse(format!("failed to serialize outcome: {}", e)))
    }
}

/// A local capability invokable by the remote model
#[async_trait]
pub trait Tool: Send + Sync {
    /// Declared signature advertised in `session.update`
    fn descriptor(&self) -> ToolDescriptor;

    /// Execute with a parsed argument record
    ///
    /// Implementations convert every internal failure into
    /// `ToolOutcome::failure`; they do not return errors or panic.
    async fn invoke(&self, args: Value) -> ToolOutcome;
}

/// Immutable mapping from tool name to capability
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Registration order, so advertised descriptors are deterministic
    order: Vec<String>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool under its descriptor name
    ///
    /// # Errors
    ///
    /// `Error::InvalidConfig` if a tool with the same name is already
    /// registered; a duplicate could silently diverge from the
    /// advertised descriptor list.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.descriptor().name;
        if self.tools.contains_key(&name) {
            return Err(Error::InvalidConfig(format!(
                "duplicate tool name '{}'",
                name
            )));
        }
        debug!("Registered tool '{}'", name);
        self.order.push(name.clone());
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Look up a capability by name
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// All descriptors in registration order
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.descriptor())
            .collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke a tool by name, shielding the caller from panics
    ///
    /// Returns `None` for an unregistered name (not an error). A tool
    /// that panics yields a structured failure record instead of
    /// unwinding into the dispatcher.
    pub async fn invoke(&self, name: &str, args: Value) -> Option<ToolOutcome> {
        let tool = self.resolve(name)?;
        let outcome = AssertUnwindSafe(tool.invoke(args))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                warn!("Tool '{}' aborted unexpectedly", name);
                ToolOutcome::failure(format!("tool '{}' aborted unexpectedly", name))
            });
        Some(outcome)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
