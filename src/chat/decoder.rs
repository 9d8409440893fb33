//! Incremental decoding of the chat backend's response stream.

use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use super::protocol::{ProtocolFrame, ToolAnnotation, parse_line};
use crate::clients::ClientError;

/// Splits arbitrary byte chunks into lines and classifies them.
///
/// Only the unterminated tail is kept between calls. It is buffered as bytes,
/// so a multi-byte character split across chunks decodes correctly.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    terminated: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` once an `e:` line was seen
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Frames completed by `chunk`. Malformed lines are logged and dropped.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ProtocolFrame> {
        if self.terminated {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            if self.decode_line(&line[..end], &mut frames) {
                break;
            }
        }
        frames
    }

    /// Decode whatever is left once the stream ended cleanly
    pub fn finish(&mut self) -> Vec<ProtocolFrame> {
        let mut frames = Vec::new();
        if !self.terminated && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.decode_line(&line, &mut frames);
        }
        frames
    }

    /// Drop the unterminated tail after a transport failure
    pub fn discard(&mut self) {
        if !self.buffer.is_empty() {
            debug!(bytes = self.buffer.len(), "Discarding partial line");
        }
        self.buffer.clear();
    }

    /// Returns `true` when the line terminated the response
    fn decode_line(&mut self, line: &[u8], frames: &mut Vec<ProtocolFrame>) -> bool {
        let Ok(line) = std::str::from_utf8(line) else {
            warn!("Skipping line that is not valid UTF-8");
            return false;
        };

        match parse_line(line) {
            Ok(Some(frame)) => {
                let terminal = matches!(frame, ProtocolFrame::Terminator(_));
                frames.push(frame);
                if terminal {
                    self.terminated = true;
                    self.buffer.clear();
                }
                terminal
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Skipping chat frame: {}", e);
                false
            }
        }
    }
}

/// Assistant text and annotations accumulated from frames
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MessageFold {
    pub content: String,
    pub annotations: Vec<ToolAnnotation>,
}

impl MessageFold {
    pub fn apply(&mut self, frame: &ProtocolFrame) {
        match frame {
            ProtocolFrame::Content(text) => self.content.push_str(text),
            ProtocolFrame::Annotation(annotation) => self.annotations.push(annotation.clone()),
            ProtocolFrame::ToolResult(envelope) => {
                if let Some(annotation) = envelope.project() {
                    self.annotations.push(annotation);
                } else {
                    debug!("Tool result matched no component");
                }
            }
            ProtocolFrame::Terminator(_) => {}
        }
    }

    pub fn from_frames<'a>(frames: impl IntoIterator<Item = &'a ProtocolFrame>) -> Self {
        let mut fold = Self::default();
        for frame in frames {
            fold.apply(frame);
        }
        fold
    }
}

/// How a decoded stream ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum StreamEnd {
    /// Body ended without an `e:` line
    Completed,
    Terminated(Option<String>),
    TransportError(String),
}

/// Decode `stream` to the end, calling `publish` with the running fold after every chunk
pub async fn decode_stream<S, F>(mut stream: S, mut publish: F) -> (MessageFold, StreamEnd)
where
    S: Stream<Item = Result<Vec<u8>, ClientError>> + Unpin,
    F: FnMut(&MessageFold),
{
    let mut decoder = StreamDecoder::new();
    let mut fold = MessageFold::default();
    let mut terminator = None;

    let mut fold_frames = |frames: Vec<ProtocolFrame>, fold: &mut MessageFold| {
        for frame in &frames {
            if let ProtocolFrame::Terminator(detail) = frame {
                terminator = Some(detail.clone());
            }
            fold.apply(frame);
        }
    };

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                let frames = decoder.feed(&bytes);
                fold_frames(frames, &mut fold);
                publish(&fold);
                if decoder.is_terminated() {
                    break;
                }
            }
            Err(e) => {
                warn!("Chat stream failed: {}", e);
                decoder.discard();
                return (fold, StreamEnd::TransportError(e.to_string()));
            }
        }
    }

    if !decoder.is_terminated() {
        let frames = decoder.finish();
        if !frames.is_empty() {
            fold_frames(frames, &mut fold);
            publish(&fold);
        }
    }

    let end = match terminator {
        Some(detail) => StreamEnd::Terminated(detail),
        None => StreamEnd::Completed,
    };
    (fold, end)
}
