//! HTTP client for the agent gateway `POST /tools/invoke` endpoint.
//!
//! Responses are layered: an HTTP status, an outer `{ok, result}` envelope,
//! and optionally a JSON tool payload embedded as text in
//! `result.content[].text`. [`decode_tool_response`] folds those layers into
//! a [`ToolResponse`] or a [`GatewayError`].

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use taskloop_core::truncate_chars;
use taskloop_return_loop::{AgentHandle, SessionHistory};
use thiserror::Error;

use crate::gateway_config::GatewaySettings;

pub const SESSIONS_SEND_TOOL: &str = "sessions_send";
pub const SESSIONS_HISTORY_TOOL: &str = "sessions_history";
pub const DEFAULT_HISTORY_LIMIT: usize = 200;
const ERROR_BODY_MAX_CHARS: usize = 300;
const TOOL_FAILURE_STATUSES: [&str; 3] = ["error", "forbidden", "timeout"];

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("OpenClaw gateway not configured for @{handle}")]
    NotConfigured { handle: AgentHandle },
    #[error("{tool} failed: {source}")]
    Transport {
        tool: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{tool} failed: {status} {body}")]
    HttpStatus {
        tool: String,
        status: u16,
        body: String,
    },
    #[error("{tool} failed: non-JSON response: {body}")]
    NonJson { tool: String, body: String },
    #[error("{tool} failed:{}", rejection_detail(.code, .message))]
    Rejected {
        tool: String,
        code: Option<String>,
        message: Option<String>,
    },
    #[error("{tool} failed: {status}{}", status_detail(.error))]
    ToolStatus {
        tool: String,
        status: String,
        error: Option<String>,
    },
    #[error("{tool} failed: unexpected payload: {source}")]
    Decode {
        tool: String,
        #[source]
        source: serde_json::Error,
    },
}

fn rejection_detail(code: &Option<String>, message: &Option<String>) -> String {
    let detail = format!(
        "{} {}",
        code.as_deref().unwrap_or_default(),
        message.as_deref().unwrap_or_default()
    );
    let detail = detail.trim();
    if detail.is_empty() {
        String::new()
    } else {
        format!(" {detail}")
    }
}

fn status_detail(error: &Option<String>) -> String {
    error
        .as_deref()
        .map(|error| format!(": {error}"))
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq)]
/// Successful tool result, tagged by the layer it was taken from.
pub enum ToolResponse {
    /// No text payload was embedded; the envelope itself is the result.
    OuterEnvelope(Value),
    /// Payload taken from the first text content block. Text that is not
    /// JSON is kept as a string value.
    InnerPayload(Value),
}

impl ToolResponse {
    pub fn value(&self) -> &Value {
        match self {
            ToolResponse::OuterEnvelope(value) | ToolResponse::InnerPayload(value) => value,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            ToolResponse::OuterEnvelope(value) | ToolResponse::InnerPayload(value) => value,
        }
    }
}

fn first_text_block(envelope: &Value) -> Option<&str> {
    envelope
        .get("result")?
        .get("content")?
        .as_array()?
        .iter()
        .find(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .and_then(|block| block.get("text"))
        .and_then(Value::as_str)
}

fn string_field(record: &Map<String, Value>, key: &str) -> Option<String> {
    record
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Decodes one raw gateway reply for `tool`.
pub fn decode_tool_response(
    tool: &str,
    status: u16,
    body: &str,
) -> Result<ToolResponse, GatewayError> {
    if !(200..300).contains(&status) {
        return Err(GatewayError::HttpStatus {
            tool: tool.to_string(),
            status,
            body: truncate_chars(body, ERROR_BODY_MAX_CHARS),
        });
    }

    let envelope: Value = serde_json::from_str(body).map_err(|_| GatewayError::NonJson {
        tool: tool.to_string(),
        body: truncate_chars(body, ERROR_BODY_MAX_CHARS),
    })?;

    if let Some(record) = envelope.as_object() {
        if record.get("ok") == Some(&Value::Bool(false)) {
            return Err(GatewayError::Rejected {
                tool: tool.to_string(),
                code: string_field(record, "errorCode"),
                message: string_field(record, "errorMessage"),
            });
        }
    }

    let Some(text) = first_text_block(&envelope) else {
        return Ok(ToolResponse::OuterEnvelope(envelope));
    };
    let payload = serde_json::from_str::<Value>(text)
        .unwrap_or_else(|_| Value::String(text.to_string()));

    if let Some(record) = payload.as_object() {
        if let Some(status) = record.get("status").and_then(Value::as_str) {
            if TOOL_FAILURE_STATUSES.contains(&status) {
                return Err(GatewayError::ToolStatus {
                    tool: tool.to_string(),
                    status: status.to_string(),
                    error: string_field(record, "error"),
                });
            }
        }
    }

    Ok(ToolResponse::InnerPayload(payload))
}

#[derive(Clone)]
/// Shared HTTP client; endpoints and tokens are resolved per handle.
pub struct GatewayClient {
    http: reqwest::Client,
    settings: GatewaySettings,
}

impl GatewayClient {
    pub fn new(settings: GatewaySettings, request_timeout_ms: u64) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("taskloop-return-loop"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create gateway http client")?;
        Ok(Self { http, settings })
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn is_gateway_configured(&self, handle: AgentHandle) -> bool {
        self.settings.is_gateway_configured(handle)
    }

    pub async fn invoke_tool(
        &self,
        handle: AgentHandle,
        tool: &str,
        args: Value,
    ) -> Result<ToolResponse, GatewayError> {
        let endpoint = self
            .settings
            .endpoint(handle)
            .ok_or(GatewayError::NotConfigured { handle })?;
        let transport = |source: reqwest::Error| GatewayError::Transport {
            tool: tool.to_string(),
            source,
        };

        let response = self
            .http
            .post(endpoint.tools_invoke_url())
            .bearer_auth(&endpoint.token)
            .json(&json!({ "tool": tool, "args": args }))
            .send()
            .await
            .map_err(transport)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport)?;
        decode_tool_response(tool, status, &body)
    }

    /// Posts `message` into the session; success means accepted, not answered.
    pub async fn sessions_send(
        &self,
        handle: AgentHandle,
        session_key: &str,
        message: &str,
        timeout_seconds: u64,
    ) -> Result<(), GatewayError> {
        self.invoke_tool(
            handle,
            SESSIONS_SEND_TOOL,
            json!({
                "sessionKey": session_key,
                "message": message,
                "timeoutSeconds": timeout_seconds,
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn sessions_history(
        &self,
        handle: AgentHandle,
        session_key: &str,
        limit: usize,
    ) -> Result<SessionHistory, GatewayError> {
        let response = self
            .invoke_tool(
                handle,
                SESSIONS_HISTORY_TOOL,
                json!({
                    "sessionKey": session_key,
                    "limit": limit,
                    "includeTools": false,
                }),
            )
            .await?;

        let value = response.into_value();
        if !value.is_object() {
            return Ok(SessionHistory {
                session_key: session_key.to_string(),
                messages: Vec::new(),
            });
        }
        let mut history: SessionHistory =
            serde_json::from_value(value).map_err(|source| GatewayError::Decode {
                tool: SESSIONS_HISTORY_TOOL.to_string(),
                source,
            })?;
        if history.session_key.is_empty() {
            history.session_key = session_key.to_string();
        }
        Ok(history)
    }
}
