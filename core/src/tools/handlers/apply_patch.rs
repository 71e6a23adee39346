//! The `apply_patch` tool: applies `*** Begin Patch` blocks to the
//! filesystem.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use loaf_apply_patch::ApplyPatchError;
use loaf_apply_patch::apply_hunks;
use loaf_apply_patch::parse_patch;
use serde::Deserialize;
use serde_json::json;

use crate::tools::JsonSchema;
use crate::tools::ToolDefinition;
use crate::tools::ToolError;
use crate::tools::ToolFuture;

pub const APPLY_PATCH_TOOL_NAME: &str = "apply_patch";

#[derive(Debug, Deserialize)]
struct ApplyPatchInput {
    patch: String,
    #[serde(default)]
    cwd: Option<PathBuf>,
}

pub fn apply_patch_tool() -> ToolDefinition {
    let mut properties = BTreeMap::<String, JsonSchema>::new();
    properties.insert(
        "patch".to_string(),
        JsonSchema::string(
            "The full patch body, starting with '*** Begin Patch' and ending with \
             '*** End Patch'.",
        ),
    );
    properties.insert(
        "cwd".to_string(),
        JsonSchema::string("Directory relative paths resolve against (default: process cwd)."),
    );

    ToolDefinition {
        name: APPLY_PATCH_TOOL_NAME.to_string(),
        description: "Apply a patch to local files.\n\
                      - Supports Add File, Delete File, and Update File (with Move to) hunks.\n\
                      - Update chunks anchor on @@ context and tolerate whitespace drift."
            .to_string(),
        input_schema: Some(JsonSchema::object(properties, vec!["patch"])),
        run: Arc::new(move |invocation| -> ToolFuture {
            Box::pin(async move {
                let input: ApplyPatchInput = serde_json::from_value(invocation.input)
                    .map_err(|err| {
                        ToolError::invalid_input(format!("invalid apply_patch input: {err}"))
                    })?;
                let cwd = match input.cwd {
                    Some(cwd) => cwd,
                    None => std::env::current_dir()
                        .map_err(|err| ToolError::new("io_error", err.to_string()))?,
                };

                // Blocking filesystem work runs off the async executor.
                let result = tokio::task::spawn_blocking(move || {
                    let hunks = parse_patch(&input.patch)?;
                    apply_hunks(&hunks, &cwd)
                })
                .await
                .map_err(|err| ToolError::new("io_error", err.to_string()))?;

                match result {
                    Ok(affected) => Ok(json!({
                        "summary": affected.summary(),
                        "changes": affected.to_json(),
                    })),
                    Err(err) => Err(tool_error_for(err)),
                }
            })
        }),
    }
}

fn tool_error_for(err: ApplyPatchError) -> ToolError {
    let status = match &err {
        ApplyPatchError::ParseError(_) => "patch_parse_error",
        ApplyPatchError::MatchError(_) => "patch_match_error",
        ApplyPatchError::IoError(_) => "io_error",
    };
    ToolError::new(status, err.to_string())
}
