//! Upstream LLM tool-calling backend
//!
//! Posts the conversation and hands back the raw response body as a byte
//! stream for the protocol decoder.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use super::{ClientError, check_status};
use crate::chat::session::ChatMessage;

/// Raw response chunks as they arrive off the wire
pub type ChatByteStream = BoxStream<'static, Result<Vec<u8>, ClientError>>;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn stream_reply(&self, messages: &[ChatMessage], tool_defaults: &Value)
        -> Result<ChatByteStream, ClientError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest<'a> {
    messages: Vec<WireMessage<'a>>,
    tool_defaults: &'a Value,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Clone)]
pub struct ChatBackendClient {
    url: String,
    http: Client,
}

impl ChatBackendClient {
    pub fn new(url: impl Into<String>, http: Client) -> Self {
        Self { url: url.into(), http }
    }
}

#[async_trait]
impl ChatBackend for ChatBackendClient {
    async fn stream_reply(
        &self,
        messages: &[ChatMessage],
        tool_defaults: &Value,
    ) -> Result<ChatByteStream, ClientError> {
        let body = ChatRequest {
            messages: messages
                .iter()
                .map(|m| WireMessage { role: m.role.as_str(), content: &m.content })
                .collect(),
            tool_defaults,
        };

        let response = check_status(self.http.post(&self.url).json(&body).send().await?).await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ClientError::from))
            .boxed())
    }
}
