//! Tool registry and invocation runtime.
//!
//! Tools are name-keyed definitions with a JSON input schema and an async
//! run function. The runtime looks up by name, builds the invocation
//! context, and converts every failure into a structured `{ok:false}`
//! result; no error escapes to the dispatcher.

pub mod handlers;
mod schema;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::OnceLock;

use chrono::DateTime;
use chrono::Utc;
use regex_lite::Regex;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

pub use schema::JsonSchema;

use crate::cancel::CancellationSignal;
use crate::error::LoafErr;

/// Structured tool failure: a machine-readable status plus a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolError {
    pub status: String,
    pub message: String,
}

impl ToolError {
    pub fn new(status: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new("invalid_input", message)
    }
}

impl From<LoafErr> for ToolError {
    fn from(err: LoafErr) -> Self {
        Self::new(err.status(), err.to_string())
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_input(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ToolContext {
    pub now: DateTime<Utc>,
    pub cancel: Option<CancellationSignal>,
}

impl ToolContext {
    pub fn new() -> Self {
        Self {
            now: Utc::now(),
            cancel: None,
        }
    }

    pub fn with_cancel(cancel: CancellationSignal) -> Self {
        Self {
            now: Utc::now(),
            cancel: Some(cancel),
        }
    }
}

impl Default for ToolContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct ToolInvocation {
    pub input: Value,
    pub ctx: ToolContext,
}

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send>>;
pub type ToolRunFn = Arc<dyn Fn(ToolInvocation) -> ToolFuture + Send + Sync>;

pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Option<JsonSchema>,
    pub run: ToolRunFn,
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: Option<String>,
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub ok: bool,
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: Value) -> Self {
        Self {
            ok: true,
            output,
            error: None,
        }
    }

    pub fn failure(err: ToolError) -> Self {
        Self {
            ok: false,
            output: json!({ "status": err.status, "message": err.message }),
            error: Some(err.message),
        }
    }
}

/// Serializable listing entry for a registered tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<JsonSchema>,
}

fn tool_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.:-]+$").expect("tool name regex is valid"))
}

pub fn is_valid_tool_name(name: &str) -> bool {
    tool_name_regex().is_match(name)
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<ToolDefinition>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool. Re-registering a name replaces the previous entry.
    pub fn register(&mut self, definition: ToolDefinition) -> Result<(), LoafErr> {
        if !is_valid_tool_name(&definition.name) {
            return Err(LoafErr::invalid_input(format!(
                "invalid tool name '{}'",
                definition.name
            )));
        }
        self.tools
            .insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolDefinition>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|definition| ToolSpec {
                name: definition.name.clone(),
                description: definition.description.clone(),
                input_schema: definition.input_schema.clone(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Invokes a tool by name. Unknown names and run-function errors both
    /// surface as failure results, never as Err.
    pub async fn invoke(&self, call: &ToolCall, ctx: ToolContext) -> ToolResult {
        let Some(definition) = self.get(&call.name) else {
            return ToolResult::failure(ToolError::new(
                "not_found",
                format!("unknown tool '{}'", call.name),
            ));
        };
        let invocation = ToolInvocation {
            input: call.input.clone(),
            ctx,
        };
        match (definition.run)(invocation).await {
            Ok(output) => ToolResult::success(output),
            Err(err) => ToolResult::failure(err),
        }
    }
}
