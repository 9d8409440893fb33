//! # Chat Module
//!
//! Relays conversations to the tool-calling chat backend and decodes its
//! line-prefixed response stream into assistant text and component
//! annotations.

pub mod decoder;
pub mod protocol;
pub mod session;

pub use decoder::{MessageFold, StreamDecoder, StreamEnd, decode_stream};
pub use protocol::{ComponentName, FrameError, ProtocolFrame, ToolAnnotation, ToolStatus};
pub use session::{ChatError, ChatMessage, ChatRelay, ChatReply, ChatTranscript, Role};
