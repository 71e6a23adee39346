//! Background session tools: start, read, write, resize, stop, list.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use crate::background::BackgroundSessionManager;
use crate::background::MAX_READ_CHARS;
use crate::background::ReadSessionParams;
use crate::background::ResizeSessionParams;
use crate::background::StartSessionParams;
use crate::background::StopSessionParams;
use crate::background::WriteSessionParams;
use crate::tools::JsonSchema;
use crate::tools::ToolDefinition;
use crate::tools::ToolError;
use crate::tools::ToolFuture;
use crate::tools::ToolInvocation;

pub const BACKGROUND_START_TOOL_NAME: &str = "bash_background_start";
pub const BACKGROUND_READ_TOOL_NAME: &str = "bash_background_read";
pub const BACKGROUND_WRITE_TOOL_NAME: &str = "bash_background_write";
pub const BACKGROUND_RESIZE_TOOL_NAME: &str = "bash_background_resize";
pub const BACKGROUND_STOP_TOOL_NAME: &str = "bash_background_stop";
pub const BACKGROUND_LIST_TOOL_NAME: &str = "bash_background_list";

/// All six background tools wired to one shared manager.
pub fn background_tools(manager: BackgroundSessionManager) -> Vec<ToolDefinition> {
    vec![
        start_tool(manager.clone()),
        read_tool(manager.clone()),
        write_tool(manager.clone()),
        resize_tool(manager.clone()),
        stop_tool(manager.clone()),
        list_tool(manager),
    ]
}

fn parse_input<T: serde::de::DeserializeOwned>(
    invocation: ToolInvocation,
    what: &str,
) -> Result<T, ToolError> {
    serde_json::from_value(invocation.input)
        .map_err(|err| ToolError::invalid_input(format!("invalid {what} input: {err}")))
}

fn start_tool(manager: BackgroundSessionManager) -> ToolDefinition {
    let mut properties = BTreeMap::<String, JsonSchema>::new();
    properties.insert(
        "command".to_string(),
        JsonSchema::string("The command to run in the session."),
    );
    properties.insert(
        "session_name".to_string(),
        JsonSchema::string("Friendly name; required for reuse_session matching."),
    );
    properties.insert(
        "cwd".to_string(),
        JsonSchema::string("Working directory for the session."),
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
        "full_terminal".to_string(),
        JsonSchema::boolean(
            "Allocate a pseudo-terminal (default true). Pipe transport otherwise.",
        ),
    );
    properties.insert(
        "terminal_cols".to_string(),
        JsonSchema::number("Terminal width, clamped to [40,400]. Default 120."),
    );
    properties.insert(
        "terminal_rows".to_string(),
        JsonSchema::number("Terminal height, clamped to [10,200]. Default 36."),
    );
    properties.insert(
        "reuse_session".to_string(),
        JsonSchema::boolean(
            "Reuse a running session with the same name, cwd, and terminal flag.",
        ),
    );

    ToolDefinition {
        name: BACKGROUND_START_TOOL_NAME.to_string(),
        description: "Start a long-lived background shell session.\n\
                      - Survives across tool calls; read incrementally with bash_background_read.\n\
                      - full_terminal=true gives a PTY with cursor-key and control-char input."
            .to_string(),
        input_schema: Some(JsonSchema::object(properties, vec!["command"])),
        run: Arc::new(move |invocation| -> ToolFuture {
            let manager = manager.clone();
            Box::pin(async move {
                let params: StartSessionParams = parse_input(invocation, "background start")?;
                let response = manager.start(params).await?;
                Ok(serde_json::to_value(response)?)
            })
        }),
    }
}

fn read_tool(manager: BackgroundSessionManager) -> ToolDefinition {
    let mut properties = BTreeMap::<String, JsonSchema>::new();
    properties.insert(
        "session_id".to_string(),
        JsonSchema::number("Target session id."),
    );
    properties.insert(
        "stream".to_string(),
        JsonSchema::string("Which stream to read: both (default), stdout, or stderr."),
    );
    properties.insert(
        "max_chars".to_string(),
        JsonSchema::number(&format!(
            "Characters per stream.\n- Default 8000, max {MAX_READ_CHARS}."
        )),
    );
    properties.insert(
        "peek".to_string(),
        JsonSchema::boolean("Return the slice without advancing the read cursor."),
    );

    ToolDefinition {
        name: BACKGROUND_READ_TOOL_NAME.to_string(),
        description: "Read new output from a background session.\n\
                      - Cursor-based: each non-peek read continues where the last one stopped.\n\
                      - `dropped=true` means old output was lost to the bounded buffer."
            .to_string(),
        input_schema: Some(JsonSchema::object(properties, vec!["session_id"])),
        run: Arc::new(move |invocation| -> ToolFuture {
            let manager = manager.clone();
            Box::pin(async move {
                let params: ReadSessionParams = parse_input(invocation, "background read")?;
                let response = manager.read(params).await?;
                Ok(serde_json::to_value(response)?)
            })
        }),
    }
}

fn write_tool(manager: BackgroundSessionManager) -> ToolDefinition {
    let mut properties = BTreeMap::<String, JsonSchema>::new();
    properties.insert(
        "session_id".to_string(),
        JsonSchema::number("Target session id."),
    );
    properties.insert(
        "input".to_string(),
        JsonSchema::string("Raw text to write to the session."),
    );
    properties.insert(
        "append_newline".to_string(),
        JsonSchema::boolean("Append a newline to input (default true)."),
    );
    properties.insert(
        "key".to_string(),
        JsonSchema::string(
            "Named special key instead of input: enter, tab, esc, up, down, left, right, \
             home, end, pgup, pgdown, backspace, delete, ctrl+c, ctrl+d, ctrl+z.",
        ),
    );
    properties.insert(
        "repeat".to_string(),
        JsonSchema::number("Repeat count for a key sequence, 1..=100."),
    );

    ToolDefinition {
        name: BACKGROUND_WRITE_TOOL_NAME.to_string(),
        description: "Send text or a special key to a background session's stdin.".to_string(),
        input_schema: Some(JsonSchema::object(properties, vec!["session_id"])),
        run: Arc::new(move |invocation| -> ToolFuture {
            let manager = manager.clone();
            Box::pin(async move {
                let params: WriteSessionParams = parse_input(invocation, "background write")?;
                let response = manager.write(params).await?;
                Ok(serde_json::to_value(response)?)
            })
        }),
    }
}

fn resize_tool(manager: BackgroundSessionManager) -> ToolDefinition {
    let mut properties = BTreeMap::<String, JsonSchema>::new();
    properties.insert(
        "session_id".to_string(),
        JsonSchema::number("Target session id."),
    );
    properties.insert(
        "cols".to_string(),
        JsonSchema::number("New width, clamped to [40,400]."),
    );
    properties.insert(
        "rows".to_string(),
        JsonSchema::number("New height, clamped to [10,200]."),
    );

    ToolDefinition {
        name: BACKGROUND_RESIZE_TOOL_NAME.to_string(),
        description: "Resize a PTY session's terminal. Pipe sessions are unsupported."
            .to_string(),
        input_schema: Some(JsonSchema::object(
            properties,
            vec!["session_id", "cols", "rows"],
        )),
        run: Arc::new(move |invocation| -> ToolFuture {
            let manager = manager.clone();
            Box::pin(async move {
                let params: ResizeSessionParams = parse_input(invocation, "background resize")?;
                let response = manager.resize(params).await?;
                Ok(serde_json::to_value(response)?)
            })
        }),
    }
}

fn stop_tool(manager: BackgroundSessionManager) -> ToolDefinition {
    let mut properties = BTreeMap::<String, JsonSchema>::new();
    properties.insert(
        "session_id".to_string(),
        JsonSchema::number("Target session id."),
    );
    properties.insert(
        "force".to_string(),
        JsonSchema::boolean("SIGKILL instead of SIGTERM."),
    );

    ToolDefinition {
        name: BACKGROUND_STOP_TOOL_NAME.to_string(),
        description: "Terminate a background session. The exit transition is observed \
                      asynchronously; buffers remain readable afterwards."
            .to_string(),
        input_schema: Some(JsonSchema::object(properties, vec!["session_id"])),
        run: Arc::new(move |invocation| -> ToolFuture {
            let manager = manager.clone();
            Box::pin(async move {
                let params: StopSessionParams = parse_input(invocation, "background stop")?;
                let response = manager.stop(params).await?;
                Ok(serde_json::to_value(response)?)
            })
        }),
    }
}

fn list_tool(manager: BackgroundSessionManager) -> ToolDefinition {
    ToolDefinition {
        name: BACKGROUND_LIST_TOOL_NAME.to_string(),
        description: "List known background sessions with status and unread counts."
            .to_string(),
        input_schema: Some(JsonSchema::Object {
            properties: BTreeMap::new(),
            required: Some(Vec::new()),
            additional_properties: Some(false),
        }),
        run: Arc::new(move |_invocation| -> ToolFuture {
            let manager = manager.clone();
            Box::pin(async move {
                let descriptors = manager.list().await;
                Ok(json!({ "sessions": serde_json::to_value(descriptors)? }))
            })
        }),
    }
}
