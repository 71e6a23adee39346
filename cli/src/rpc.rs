//! Newline-delimited JSON-RPC 2.0 over stdio.
//!
//! Requests carry `jsonrpc:"2.0"`, `id`, `method`, and optional object
//! `params`. Responses carry `result` or `error{code,message,data?}`.
//! Runtime events stream as `event` notifications wrapped in
//! `{type, timestamp, payload}`. Batch requests are rejected.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use loaf_core::AgentRuntime;
use loaf_core::compact::CharCountEstimator;
use loaf_core::compact::CompactEvent;
use loaf_core::compact::CompactEventType;
use loaf_core::compact::CompactionReason;
use loaf_core::compact::DeltaSummarizer;
use loaf_core::compact::SummaryState;
use loaf_core::tools::ToolCall;
use loaf_core::tools::ToolContext;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tracing::info;
use tracing::warn;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const SERVER_ERROR: i64 = -32000;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

/// Offline delta summariser: carries the latest user intent forward and
/// lets the engine's artifact extraction do the heavy lifting. Frontends
/// that want model-written summaries supply their own summariser through
/// the prompt helpers instead.
struct HeuristicSummarizer;

#[async_trait]
impl DeltaSummarizer for HeuristicSummarizer {
    async fn summarize_delta(
        &self,
        previous: &SummaryState,
        delta: &[CompactEvent],
    ) -> anyhow::Result<SummaryState> {
        let mut candidate = previous.clone();
        if let Some(latest_user) = delta
            .iter()
            .rev()
            .find(|event| event.kind == CompactEventType::UserMsg)
            .and_then(|event| event.payload.get("text"))
            .and_then(Value::as_str)
        {
            let mut intent: String = latest_user.chars().take(200).collect();
            if intent.len() < latest_user.len() {
                intent.push_str("...");
            }
            candidate.intent = intent;
        }
        Ok(candidate)
    }
}

pub struct RpcServer {
    runtime: Arc<AgentRuntime>,
    rollout: PathBuf,
    shutdown_requested: bool,
}

impl RpcServer {
    pub fn new(runtime: Arc<AgentRuntime>, rollout: PathBuf) -> Self {
        Self {
            runtime,
            rollout,
            shutdown_requested: false,
        }
    }

    /// Serves until stdin closes or a `shutdown` request arrives.
    pub async fn serve(mut self) -> anyhow::Result<()> {
        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut lines = BufReader::new(stdin).lines();

        self.emit_event(
            &mut stdout,
            "runtime_started",
            json!({ "rollout": self.rollout.display().to_string() }),
        )
        .await?;

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let response = self.handle_line(&line).await;
            write_json_line(&mut stdout, &response).await?;
            if self.shutdown_requested {
                break;
            }
        }

        self.emit_event(&mut stdout, "shutdown", json!({})).await?;
        self.runtime.shutdown().await;
        Ok(())
    }

    async fn emit_event(
        &self,
        stdout: &mut tokio::io::Stdout,
        event_type: &str,
        payload: Value,
    ) -> anyhow::Result<()> {
        let notification = json!({
            "jsonrpc": "2.0",
            "method": "event",
            "params": {
                "type": event_type,
                "timestamp": Utc::now().to_rfc3339(),
                "payload": payload,
            }
        });
        write_json_line(stdout, &notification).await
    }

    async fn handle_line(&mut self, line: &str) -> Value {
        let parsed: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(err) => {
                return error_response(Value::Null, PARSE_ERROR, &format!("parse error: {err}"));
            }
        };

        if parsed.is_array() {
            return error_response(
                Value::Null,
                INVALID_REQUEST,
                "batch requests are not supported",
            );
        }

        let request: RpcRequest = match serde_json::from_value(parsed) {
            Ok(request) => request,
            Err(err) => {
                return error_response(
                    Value::Null,
                    INVALID_REQUEST,
                    &format!("invalid request: {err}"),
                );
            }
        };

        if request.jsonrpc.as_deref() != Some("2.0") {
            return error_response(
                request.id.unwrap_or(Value::Null),
                INVALID_REQUEST,
                "jsonrpc must be \"2.0\"",
            );
        }
        if let Some(params) = &request.params {
            if !params.is_object() {
                return error_response(
                    request.id.unwrap_or(Value::Null),
                    INVALID_PARAMS,
                    "params must be an object",
                );
            }
        }

        let id = request.id.clone().unwrap_or(Value::Null);
        let params = request.params.unwrap_or_else(|| json!({}));
        match self.dispatch(&request.method, params).await {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err((code, message)) => error_response(id, code, &message),
        }
    }

    async fn dispatch(&mut self, method: &str, params: Value) -> Result<Value, (i64, String)> {
        match method {
            "initialize" => Ok(json!({
                "name": "loaf",
                "version": env!("CARGO_PKG_VERSION"),
                "rollout": self.rollout.display().to_string(),
            })),
            "tools/list" => {
                let tools = self.runtime.list_tools();
                Ok(json!({ "tools": serde_json::to_value(tools).map_err(internal)? }))
            }
            "tools/call" => {
                #[derive(Deserialize)]
                struct CallParams {
                    name: String,
                    #[serde(default)]
                    id: Option<String>,
                    #[serde(default)]
                    input: Value,
                }
                let call: CallParams = parse_params(params)?;
                // Tool failures are results, not RPC errors.
                let result = self
                    .runtime
                    .call_tool(
                        &ToolCall {
                            id: call.id,
                            name: call.name,
                            input: call.input,
                        },
                        ToolContext::new(),
                    )
                    .await;
                serde_json::to_value(result).map_err(internal)
            }
            "compact/record_event" => {
                #[derive(Deserialize)]
                struct RecordParams {
                    #[serde(rename = "type")]
                    kind: CompactEventType,
                    #[serde(default)]
                    payload: serde_json::Map<String, Value>,
                    #[serde(default)]
                    turn_id: Option<String>,
                    #[serde(default)]
                    provider: Option<String>,
                }
                let record: RecordParams = parse_params(params)?;
                let session = self.compaction_session().await?;
                let index = session
                    .record_event(|idx| {
                        let mut event = CompactEvent::new(idx, record.kind, record.payload);
                        event.turn_id = record.turn_id;
                        event.provider = record.provider;
                        event
                    })
                    .await
                    .map_err(server_error)?;
                Ok(json!({ "index": index }))
            }
            "compact/run" => {
                #[derive(Deserialize)]
                struct RunParams {
                    model_context_window_tokens: u64,
                    #[serde(default)]
                    pinned_token_estimate: u64,
                    #[serde(default = "default_reason")]
                    reason: CompactionReason,
                    #[serde(default)]
                    force: bool,
                }
                fn default_reason() -> CompactionReason {
                    CompactionReason::Manual
                }
                let run: RunParams = parse_params(params)?;
                let session = self.compaction_session().await?;
                let outcome = session
                    .run_pass(
                        run.model_context_window_tokens,
                        run.pinned_token_estimate,
                        run.reason,
                        run.force,
                        &HeuristicSummarizer,
                        &CharCountEstimator,
                    )
                    .await
                    .map_err(server_error)?;
                Ok(json!({
                    "compressed": outcome.compressed,
                    "anchor": outcome.anchor,
                    "estimated_tokens_before": outcome.estimated_tokens_before,
                    "estimated_tokens_after": outcome.estimated_tokens_after,
                    "summary": serde_json::to_value(outcome.summary).map_err(internal)?,
                }))
            }
            "compact/status" => {
                let session = self.compaction_session().await?;
                serde_json::to_value(session.status().await).map_err(internal)
            }
            "compact/context" => {
                let session = self.compaction_session().await?;
                let messages = session.context_messages().await;
                Ok(json!({ "messages": serde_json::to_value(messages).map_err(internal)? }))
            }
            "sessions/list" => {
                let sessions = self.runtime.background().list().await;
                Ok(json!({ "sessions": serde_json::to_value(sessions).map_err(internal)? }))
            }
            "shutdown" => {
                self.shutdown_requested = true;
                Ok(json!({ "ok": true }))
            }
            other => Err((METHOD_NOT_FOUND, format!("unknown method '{other}'"))),
        }
    }

    async fn compaction_session(
        &self,
    ) -> Result<Arc<loaf_core::CompactionSession>, (i64, String)> {
        self.runtime
            .compaction_session(&self.rollout)
            .await
            .map_err(server_error)
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, (i64, String)> {
    serde_json::from_value(params)
        .map_err(|err| (INVALID_PARAMS, format!("invalid params: {err}")))
}

fn internal(err: serde_json::Error) -> (i64, String) {
    (INTERNAL_ERROR, err.to_string())
}

fn server_error(err: loaf_core::LoafErr) -> (i64, String) {
    (SERVER_ERROR, err.to_string())
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

async fn write_json_line(stdout: &mut tokio::io::Stdout, value: &Value) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    stdout.write_all(&line).await?;
    stdout.flush().await?;
    Ok(())
}

/// Handles one request line without the stdio loop, for tests and embedding.
#[cfg_attr(not(test), allow(dead_code))]
pub async fn handle_request_line(
    runtime: Arc<AgentRuntime>,
    rollout: PathBuf,
    line: &str,
) -> Value {
    let mut server = RpcServer::new(runtime, rollout);
    let response = server.handle_line(line).await;
    if server.shutdown_requested {
        warn!("shutdown requested through single-shot handler; ignoring");
    }
    response
}

pub fn log_startup(rollout: &PathBuf) {
    info!(rollout = %rollout.display(), "loaf rpc server ready");
}

#[cfg(test)]
mod tests {
    use super::*;
    use loaf_core::RuntimeConfig;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn test_runtime(dir: &std::path::Path) -> (Arc<AgentRuntime>, PathBuf) {
        let runtime = Arc::new(AgentRuntime::new(RuntimeConfig {
            home_dir: Some(dir.to_path_buf()),
            ..Default::default()
        }));
        let rollout = dir.join("sessions/rollout-test.jsonl");
        (runtime, rollout)
    }

    #[tokio::test]
    async fn malformed_json_is_parse_error() {
        let dir = tempdir().unwrap();
        let (runtime, rollout) = test_runtime(dir.path());
        let response = handle_request_line(runtime, rollout, "{nope").await;
        assert_eq!(response["error"]["code"], PARSE_ERROR);
        assert_eq!(response["id"], Value::Null);
    }

    #[tokio::test]
    async fn batch_requests_are_invalid() {
        let dir = tempdir().unwrap();
        let (runtime, rollout) = test_runtime(dir.path());
        let response = handle_request_line(runtime, rollout, "[]").await;
        assert_eq!(response["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let dir = tempdir().unwrap();
        let (runtime, rollout) = test_runtime(dir.path());
        let response = handle_request_line(
            runtime,
            rollout,
            r#"{"jsonrpc":"2.0","id":1,"method":"no/such"}"#,
        )
        .await;
        assert_eq!(response["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(response["id"], 1);
    }

    #[tokio::test]
    async fn non_object_params_are_invalid_params() {
        let dir = tempdir().unwrap();
        let (runtime, rollout) = test_runtime(dir.path());
        let response = handle_request_line(
            runtime,
            rollout,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list","params":[1,2]}"#,
        )
        .await;
        assert_eq!(response["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn tools_list_returns_builtins() {
        let dir = tempdir().unwrap();
        let (runtime, rollout) = test_runtime(dir.path());
        let response = handle_request_line(
            runtime,
            rollout,
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#,
        )
        .await;
        let tools = response["result"]["tools"].as_array().unwrap();
        assert!(tools.iter().any(|tool| tool["name"] == "bash"));
        assert!(tools.iter().any(|tool| tool["name"] == "apply_patch"));
    }

    #[tokio::test]
    async fn failing_tool_call_is_a_result_not_an_error() {
        let dir = tempdir().unwrap();
        let (runtime, rollout) = test_runtime(dir.path());
        let response = handle_request_line(
            runtime,
            rollout,
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"no_such_tool","input":{}}}"#,
        )
        .await;
        assert!(response.get("error").is_none());
        assert_eq!(response["result"]["ok"], false);
        assert_eq!(response["result"]["output"]["status"], "not_found");
    }

    #[tokio::test]
    async fn record_and_run_compaction_over_rpc() {
        let dir = tempdir().unwrap();
        let (runtime, rollout) = test_runtime(dir.path());

        for i in 0..40 {
            let (kind, text) = if i % 2 == 0 {
                ("user_msg", format!("user message {i}"))
            } else {
                ("assistant_msg", format!("assistant message {i}"))
            };
            let line = json!({
                "jsonrpc": "2.0",
                "id": i,
                "method": "compact/record_event",
                "params": { "type": kind, "payload": { "text": text } }
            })
            .to_string();
            let response =
                handle_request_line(Arc::clone(&runtime), rollout.clone(), &line).await;
            assert_eq!(response["result"]["index"], i);
        }

        let run = json!({
            "jsonrpc": "2.0",
            "id": 100,
            "method": "compact/run",
            "params": {
                "model_context_window_tokens": 560,
                "pinned_token_estimate": 36,
                "reason": "manual",
                "force": true
            }
        })
        .to_string();
        let response = handle_request_line(Arc::clone(&runtime), rollout.clone(), &run).await;
        assert_eq!(response["result"]["compressed"], true);
        assert!(response["result"]["anchor"].as_u64().unwrap() > 0);

        let status = handle_request_line(
            runtime,
            rollout,
            r#"{"jsonrpc":"2.0","id":101,"method":"compact/status"}"#,
        )
        .await;
        assert_eq!(status["result"]["event_count"], 40);
    }
}
