//! Line protocol spoken by the chat backend.
//!
//! Every line carries a prefix naming its class:
//!
//! * `data:` annotation frames (`tool-status`, `custom-render`)
//! * `0:` assistant text deltas, JSON string literals
//! * `a:` tool results wrapped in `{"result": ...}`
//! * `e:` end of the response

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolStatus {
    InProgress,
    Completed,
    Error,
    Success,
}

/// Renderable components a tool result can be projected into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentName {
    TransactionList,
    DuneAnalytics,
    ProfileData,
    TokenAllocation,
    TokenTransfers,
    ContractTokenTransfers,
    DailyStats,
    TransactionStats,
    TokenMetadata,
}

impl ComponentName {
    /// Components a `tool-result` payload may name itself
    fn from_tool_result(name: &str) -> Option<Self> {
        match name {
            "TokenTransfers" => Some(ComponentName::TokenTransfers),
            "ContractTokenTransfers" => Some(ComponentName::ContractTokenTransfers),
            "DailyStats" => Some(ComponentName::DailyStats),
            "TransactionStats" => Some(ComponentName::TransactionStats),
            "TokenMetadata" => Some(ComponentName::TokenMetadata),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAnnotation {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub tool_call_id: String,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_name: Option<ComponentName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
}

/// A tool result normalized to a single JSON object
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResultEnvelope {
    payload: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolFrame {
    Annotation(ToolAnnotation),
    Content(String),
    ToolResult(ToolResultEnvelope),
    Terminator(Option<String>),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid JSON in `{prefix}` line: {source}")]
    InvalidJson {
        prefix: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("tool result rejected: {0}")]
    Schema(String),

    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("unrecognized line: {0}")]
    Unrecognized(String),
}

/// Classify one complete line. `Ok(None)` for lines that carry nothing to fold.
pub fn parse_line(line: &str) -> Result<Option<ProtocolFrame>, FrameError> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() {
        return Ok(None);
    }

    if let Some(rest) = line.strip_prefix("data:") {
        parse_data(rest.trim())
    } else if let Some(rest) = line.strip_prefix("0:") {
        Ok(Some(ProtocolFrame::Content(parse_text_delta(rest.trim()))))
    } else if let Some(rest) = line.strip_prefix("a:") {
        ToolResultEnvelope::parse(rest).map(|envelope| Some(ProtocolFrame::ToolResult(envelope)))
    } else if let Some(rest) = line.strip_prefix("e:") {
        let rest = rest.trim();
        Ok(Some(ProtocolFrame::Terminator((!rest.is_empty()).then(|| rest.to_string()))))
    } else {
        Err(FrameError::Unrecognized(line.chars().take(80).collect()))
    }
}

fn parse_data(content: &str) -> Result<Option<ProtocolFrame>, FrameError> {
    if content.is_empty() || content == "[DONE]" {
        return Ok(None);
    }

    let value: Value =
        serde_json::from_str(content).map_err(|source| FrameError::InvalidJson { prefix: "data:", source })?;
    match value.get("type").and_then(Value::as_str) {
        Some("tool-status" | "custom-render") => serde_json::from_value(value)
            .map(|annotation| Some(ProtocolFrame::Annotation(annotation)))
            .map_err(|source| FrameError::InvalidJson { prefix: "data:", source }),
        _ => Ok(None),
    }
}

fn parse_text_delta(literal: &str) -> String {
    match serde_json::from_str::<String>(literal) {
        Ok(text) => text,
        Err(_) => {
            let unquoted = literal.strip_prefix('"').unwrap_or(literal);
            let unquoted = unquoted.strip_suffix('"').unwrap_or(unquoted);
            unquoted.replace("\\n", "\n")
        }
    }
}

/// JavaScript truthiness, which decides the projection order
fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_) | Value::Object(_)) => true,
    }
}

impl ToolResultEnvelope {
    /// Parse the body of an `a:` line.
    ///
    /// `result` may hold the payload object directly or a string containing
    /// its JSON encoding.
    pub fn parse(body: &str) -> Result<Self, FrameError> {
        let outer: Value =
            serde_json::from_str(body.trim()).map_err(|source| FrameError::InvalidJson { prefix: "a:", source })?;
        let result = match outer {
            Value::Object(mut map) => map
                .remove("result")
                .ok_or_else(|| FrameError::Schema("missing `result`".to_string()))?,
            _ => return Err(FrameError::Schema("envelope is not an object".to_string())),
        };

        let payload = match result {
            Value::String(encoded) => serde_json::from_str::<Value>(&encoded)
                .map_err(|source| FrameError::InvalidJson { prefix: "a:", source })?,
            other => other,
        };

        Self::from_payload(payload)
    }

    pub fn from_payload(payload: Value) -> Result<Self, FrameError> {
        let Value::Object(payload) = payload else {
            return Err(FrameError::Schema("result is not an object".to_string()));
        };
        match payload.get("toolCallId") {
            None | Some(Value::Null | Value::String(_)) => {}
            Some(_) => return Err(FrameError::Schema("`toolCallId` must be a string".to_string())),
        }
        Ok(Self { payload })
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    fn tool_call_id(&self) -> String {
        self.str_field("toolCallId").unwrap_or_default()
    }

    fn str_field(&self, key: &str) -> Option<String> {
        self.payload.get(key).and_then(Value::as_str).map(str::to_string)
    }

    fn annotation(
        &self,
        component: ComponentName,
        status: ToolStatus,
        data: Option<Value>,
        chain: Option<String>,
    ) -> ToolAnnotation {
        ToolAnnotation {
            kind: "tool-result".to_string(),
            tool_call_id: self.tool_call_id(),
            status,
            component_name: Some(component),
            data,
            chain,
        }
    }

    /// Project into at most one component annotation; the first matching rule wins.
    pub fn project(&self) -> Option<ToolAnnotation> {
        let field = |key: &str| self.payload.get(key);

        if is_truthy(field("transactions")) {
            return Some(self.annotation(
                ComponentName::TransactionList,
                ToolStatus::Success,
                field("transactions").cloned(),
                self.str_field("chain"),
            ));
        }
        if is_truthy(field("wallets")) {
            return Some(self.annotation(
                ComponentName::DuneAnalytics,
                ToolStatus::Success,
                field("wallets").cloned(),
                self.str_field("chain"),
            ));
        }
        if is_truthy(field("table")) {
            return Some(self.annotation(ComponentName::ProfileData, ToolStatus::Success, field("data").cloned(), None));
        }

        let kind = field("type").and_then(Value::as_str);
        if kind == Some("allocation") {
            return Some(self.annotation(
                ComponentName::TokenAllocation,
                ToolStatus::Success,
                Some(Value::Object(self.payload.clone())),
                None,
            ));
        }
        if kind != Some("tool-result") {
            return None;
        }

        let component = field("componentName")
            .and_then(Value::as_str)
            .and_then(ComponentName::from_tool_result)?;
        let status = field("status")
            .and_then(|s| serde_json::from_value::<ToolStatus>(s.clone()).ok())
            .unwrap_or(ToolStatus::Success);
        let data = field("data");
        let chain = match component {
            ComponentName::TokenMetadata => data.and_then(|d| d.get("protocol")),
            ComponentName::TokenTransfers => None,
            _ => data.and_then(|d| d.pointer("/metadata/network")),
        }
        .and_then(Value::as_str)
        .map(str::to_string);

        Some(self.annotation(component, status, data.cloned(), chain))
    }
}
