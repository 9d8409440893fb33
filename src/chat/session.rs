//! Chat sessions relayed to the tool-calling backend.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use super::decoder::{StreamEnd, decode_stream};
use super::protocol::ToolAnnotation;
use crate::clients::{ChatBackend, ClientError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: format!("{}-{}", role.as_str(), Uuid::new_v4()),
            role,
            content: content.into(),
        }
    }
}

/// Messages of one session plus the annotations attached to each message id
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTranscript {
    pub session_id: Uuid,
    pub messages: Vec<ChatMessage>,
    pub annotations: HashMap<String, Vec<ToolAnnotation>>,
}

impl ChatTranscript {
    fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            messages: Vec::new(),
            annotations: HashMap::new(),
        }
    }

    fn message_mut(&mut self, id: &str) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub session_id: Uuid,
    pub message: ChatMessage,
    pub annotations: Vec<ToolAnnotation>,
    pub end: StreamEnd,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Chat backend is not configured")]
    NotConfigured,

    #[error("Message must not be empty")]
    EmptyMessage,

    #[error("Failed to get response from the model: {0}")]
    Backend(#[from] ClientError),
}

/// In-memory chat sessions
pub struct ChatRelay {
    backend: Option<Arc<dyn ChatBackend>>,
    sessions: DashMap<Uuid, ChatTranscript>,
}

impl ChatRelay {
    pub fn new(backend: Option<Arc<dyn ChatBackend>>) -> Self {
        Self {
            backend,
            sessions: DashMap::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    pub fn transcript(&self, session_id: Uuid) -> Option<ChatTranscript> {
        self.sessions.get(&session_id).map(|t| t.clone())
    }

    /// Send `message` in the session and stream the reply into its transcript
    pub async fn relay(
        &self,
        session_id: Option<Uuid>,
        message: &str,
        tool_defaults: &Value,
    ) -> Result<ChatReply, ChatError> {
        let backend = self.backend.as_ref().ok_or(ChatError::NotConfigured)?;
        if message.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let session_id = session_id.unwrap_or_else(Uuid::new_v4);
        let history = {
            let mut transcript = self
                .sessions
                .entry(session_id)
                .or_insert_with(|| ChatTranscript::new(session_id));
            transcript.messages.push(ChatMessage::new(Role::User, message));
            transcript.messages.clone()
        };

        let assistant = ChatMessage::new(Role::Assistant, "");
        let stream = match backend.stream_reply(&history, tool_defaults).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%session_id, "Chat backend request failed: {}", e);
                self.publish(
                    session_id,
                    ChatMessage::new(Role::Assistant, "Error: Failed to get response from the model. Please try again."),
                    Vec::new(),
                );
                return Err(e.into());
            }
        };

        let (fold, end) = decode_stream(stream, |fold| {
            self.publish(
                session_id,
                ChatMessage {
                    content: fold.content.clone(),
                    ..assistant.clone()
                },
                fold.annotations.clone(),
            );
        })
        .await;

        info!(
            %session_id,
            chars = fold.content.len(),
            annotations = fold.annotations.len(),
            ?end,
            "💬 Chat reply relayed"
        );

        Ok(ChatReply {
            session_id,
            message: ChatMessage {
                content: fold.content,
                ..assistant
            },
            annotations: fold.annotations,
            end,
        })
    }

    /// Replace the message and its annotations under one session lock
    fn publish(&self, session_id: Uuid, message: ChatMessage, annotations: Vec<ToolAnnotation>) {
        let mut transcript = self
            .sessions
            .entry(session_id)
            .or_insert_with(|| ChatTranscript::new(session_id));

        let id = message.id.clone();
        match transcript.message_mut(&id) {
            Some(existing) => *existing = message,
            None => transcript.messages.push(message),
        }
        if annotations.is_empty() {
            transcript.annotations.remove(&id);
        } else {
            transcript.annotations.insert(id, annotations);
        }
    }
}
