//! Realtime chat framing: JSON text frames in both directions.

use desk_core::orchestrator::{APOLOGY, SourceRef, TurnReply};
use desk_memory::RecordMetadata;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct InboundFrame {
    #[serde(default)]
    pub message: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct OutboundSource {
    pub title: String,
    pub content: String,
    pub metadata: RecordMetadata,
    pub score: f32,
}

impl From<SourceRef> for OutboundSource {
    fn from(source: SourceRef) -> Self {
        Self {
            title: source.title,
            content: source.content,
            metadata: source.metadata,
            score: source.score,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OutboundFrame {
    pub response: String,
    pub sources: Vec<OutboundSource>,
}

impl From<TurnReply> for OutboundFrame {
    fn from(reply: TurnReply) -> Self {
        Self {
            response: reply.response_text,
            sources: reply.sources.into_iter().map(OutboundSource::from).collect(),
        }
    }
}

/// Extract the user message from a text frame.
///
/// A JSON object yields its `message` field; anything that is not a JSON object is taken
/// verbatim. The message is passed on unchanged; `None` when it is empty or only whitespace.
#[must_use]
pub(crate) fn decode_inbound(raw: &str) -> Option<String> {
    let message = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value @ serde_json::Value::Object(_)) => {
            let frame: InboundFrame = serde_json::from_value(value).ok()?;
            match frame.message {
                Some(serde_json::Value::String(s)) => s,
                Some(serde_json::Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            }
        }
        _ => raw.to_owned(),
    };
    (!message.trim().is_empty()).then_some(message)
}

/// # Errors
///
/// Returns an error if the reply cannot be serialized.
pub(crate) fn encode_reply(reply: TurnReply) -> Result<String, serde_json::Error> {
    serde_json::to_string(&OutboundFrame::from(reply))
}

/// Frame sent once before closing a connection after an internal failure.
#[must_use]
pub(crate) fn apology_frame() -> String {
    serde_json::json!({ "response": APOLOGY, "sources": [] }).to_string()
}
