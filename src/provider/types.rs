use super::StreamError;
use futures_core::stream::BoxStream;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

/// One prior turn as forwarded to the upstream model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub speaker: Speaker,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub message: String,

    /// Already trimmed by the caller, oldest first.
    pub history: Vec<HistoryEntry>,

    /// May be empty, in which case no system prompt is sent.
    pub system_instruction: String,

    /// Aborts the network read loop when cancelled.
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Reasoning,
    Content,
}

/// One non-empty fragment of streamed model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub channel: Channel,
    pub text: String,
}

impl Delta {
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            channel: Channel::Reasoning,
            text: text.into(),
        }
    }

    pub fn content(text: impl Into<String>) -> Self {
        Self {
            channel: Channel::Content,
            text: text.into(),
        }
    }
}

pub type DeltaStream = BoxStream<'static, Result<Delta, StreamError>>;

/// Provider interface.
///
/// Each call opens exactly one upstream request. The returned stream is lazy
/// and ends when the upstream signals completion.
pub trait Provider {
    fn name(&self) -> &'static str;

    fn model(&self) -> &str;

    /// Start streaming a response.
    fn stream_chat(
        &self,
        req: ChatRequest,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<DeltaStream, StreamError>> + Send>>;
}
