//! The foreground `bash` tool: one-shot commands with a persistent
//! cwd/env baseline.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::shell_state::MAX_TIMEOUT_SECS;
use crate::shell_state::ShellBaseline;
use crate::shell_state::ShellRequest;
use crate::shell_state::run_shell_command;
use crate::tools::JsonSchema;
use crate::tools::ToolDefinition;
use crate::tools::ToolError;
use crate::tools::ToolFuture;

pub const BASH_TOOL_NAME: &str = "bash";

pub fn bash_tool(baseline: Arc<Mutex<ShellBaseline>>) -> ToolDefinition {
    let mut properties = BTreeMap::<String, JsonSchema>::new();
    properties.insert(
        "command".to_string(),
        JsonSchema::string("The shell command to execute."),
    );
    properties.insert(
        "timeout_secs".to_string(),
        JsonSchema::number(&format!(
            "Seconds before the command is killed.\n- Default: 120, max {MAX_TIMEOUT_SECS}."
        )),
    );
    properties.insert(
        "cwd".to_string(),
        JsonSchema::string("Run in this directory instead of the session cwd."),
    );
    properties.insert(
        "env".to_string(),
        JsonSchema::Object {
            properties: BTreeMap::new(),
            required: None,
            additional_properties: Some(true),
        },
    );
    properties.insert(
        "reset_session".to_string(),
        JsonSchema::boolean("Reset the persistent cwd/env baseline to OS defaults first."),
    );

    ToolDefinition {
        name: BASH_TOOL_NAME.to_string(),
        description: "Execute a shell command.\n\
                      - cwd and exported variables persist to the next call.\n\
                      - Use reset_session to return to a clean environment."
            .to_string(),
        input_schema: Some(JsonSchema::object(properties, vec!["command"])),
        run: Arc::new(move |invocation| -> ToolFuture {
            let baseline = Arc::clone(&baseline);
            Box::pin(async move {
                let request: ShellRequest = serde_json::from_value(invocation.input)
                    .map_err(|err| ToolError::invalid_input(format!("invalid bash input: {err}")))?;
                let mut guard = baseline.lock().await;
                let outcome =
                    run_shell_command(&mut guard, request, invocation.ctx.cancel.clone()).await?;
                Ok(serde_json::to_value(outcome)?)
            })
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolCall;
    use crate::tools::ToolContext;
    use crate::tools::ToolRegistry;
    use serde_json::json;

    #[cfg(unix)]
    #[tokio::test]
    async fn bash_tool_runs_and_persists_cwd() {
        let baseline = Arc::new(Mutex::new(ShellBaseline::os_defaults()));
        let mut registry = ToolRegistry::new();
        registry.register(bash_tool(Arc::clone(&baseline))).unwrap();

        let cd = registry
            .invoke(
                &ToolCall {
                    id: None,
                    name: BASH_TOOL_NAME.to_string(),
                    input: json!({ "command": "cd /" }),
                },
                ToolContext::new(),
            )
            .await;
        assert!(cd.ok, "cd failed: {:?}", cd.error);

        let pwd = registry
            .invoke(
                &ToolCall {
                    id: None,
                    name: BASH_TOOL_NAME.to_string(),
                    input: json!({ "command": "pwd" }),
                },
                ToolContext::new(),
            )
            .await;
        assert!(pwd.ok);
        assert_eq!(pwd.output["stdout"].as_str().unwrap().trim(), "/");
        assert_eq!(pwd.output["cwd_after"], "/");
    }

    #[tokio::test]
    async fn missing_command_is_invalid_input() {
        let baseline = Arc::new(Mutex::new(ShellBaseline::os_defaults()));
        let mut registry = ToolRegistry::new();
        registry.register(bash_tool(baseline)).unwrap();

        let result = registry
            .invoke(
                &ToolCall {
                    id: None,
                    name: BASH_TOOL_NAME.to_string(),
                    input: json!({}),
                },
                ToolContext::new(),
            )
            .await;
        assert!(!result.ok);
        assert_eq!(result.output["status"], "invalid_input");
    }

    #[tokio::test]
    async fn non_object_env_is_rejected() {
        let baseline = Arc::new(Mutex::new(ShellBaseline::os_defaults()));
        let mut registry = ToolRegistry::new();
        registry.register(bash_tool(baseline)).unwrap();

        let result = registry
            .invoke(
                &ToolCall {
                    id: None,
                    name: BASH_TOOL_NAME.to_string(),
                    input: json!({ "command": "true", "env": ["not", "a", "map"] }),
                },
                ToolContext::new(),
            )
            .await;
        assert!(!result.ok);
        assert_eq!(result.output["status"], "invalid_input");
    }
}
