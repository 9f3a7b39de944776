use super::stream::{spawn_reader, ReadOptions};
use super::{ChatRequest, Delta, DeltaStream, Provider, Speaker, StreamError};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1/";
pub const DEFAULT_MODEL: &str = "deepseek-reasoner";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const KEY_ENV: &str = "DEEPSEEK_API_KEY";

#[derive(Debug, Clone)]
pub struct DeepSeekProvider {
    http: reqwest::Client,
    /// `None` fails every call with `MissingCredential` before any I/O.
    api_key: Option<String>,
    api_base: Url,
    model: String,
    max_tokens: u32,
    read: ReadOptions,
}

impl DeepSeekProvider {
    pub fn new(
        http: reqwest::Client,
        api_key: Option<String>,
        api_base: Url,
        model: String,
        max_tokens: u32,
        read: ReadOptions,
    ) -> Self {
        Self {
            http,
            api_key,
            api_base,
            model,
            max_tokens,
            read,
        }
    }

    fn build_url(&self) -> Result<Url, StreamError> {
        self.api_base
            .join("chat/completions")
            .map_err(|e| StreamError::StreamRead(format!("invalid DeepSeek endpoint: {e}")))
    }

    fn headers(&self) -> Result<HeaderMap, StreamError> {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let key = self
            .api_key
            .as_deref()
            .ok_or(StreamError::MissingCredential {
                provider: "DeepSeek",
                env_var: KEY_ENV,
            })?;
        let v = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|_| {
            StreamError::InvalidCredential {
                provider: "DeepSeek",
                env_var: KEY_ENV,
            }
        })?;
        h.insert(AUTHORIZATION, v);
        Ok(h)
    }

    fn body(&self, req: &ChatRequest) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(req.history.len() + 2);
        if !req.system_instruction.is_empty() {
            messages.push(Message {
                role: "system",
                content: req.system_instruction.clone(),
            });
        }
        messages.extend(req.history.iter().map(|h| Message {
            role: match h.speaker {
                Speaker::User => "user",
                Speaker::Assistant => "assistant",
            },
            content: h.text.clone(),
        }));
        messages.push(Message {
            role: "user",
            content: req.message.clone(),
        });

        ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            stream: true,
            max_tokens: self.max_tokens,
        }
    }
}

impl Provider for DeepSeekProvider {
    fn name(&self) -> &'static str {
        "DeepSeek"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn stream_chat(
        &self,
        req: ChatRequest,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<DeltaStream, StreamError>> + Send>>
    {
        let this = self.clone();

        Box::pin(async move {
            let url = this.build_url()?;
            let headers = this.headers()?;
            let body = this.body(&req);

            tracing::info!(
                model = %this.model,
                history = req.history.len(),
                "starting DeepSeek stream"
            );

            let resp = this
                .http
                .post(url)
                .headers(headers)
                .json(&body)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                tracing::warn!(%status, "DeepSeek request rejected");
                return Err(StreamError::from_response(resp).await);
            }

            Ok(spawn_reader(resp, decode_record, req.cancel, this.read))
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    max_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    delta: ChoiceDelta,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceDelta {
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// `choices[0].delta` carries `reasoning_content` and/or `content`.
fn decode_record(payload: &str) -> Result<Vec<Delta>, serde_json::Error> {
    let chunk: ChatCompletionChunk = serde_json::from_str(payload)?;
    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(Vec::new());
    };

    let mut out = Vec::with_capacity(2);
    if let Some(r) = choice.delta.reasoning_content.filter(|s| !s.is_empty()) {
        out.push(Delta::reasoning(r));
    }
    if let Some(c) = choice.delta.content.filter(|s| !s.is_empty()) {
        out.push(Delta::content(c));
    }
    Ok(out)
}
