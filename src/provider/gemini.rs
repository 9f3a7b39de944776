use super::stream::{spawn_reader, ReadOptions};
use super::{ChatRequest, Delta, DeltaStream, Provider, Speaker, StreamError};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/";
pub const DEFAULT_MODEL: &str = "gemini-2.5-pro";
pub const DEFAULT_THINKING_BUDGET: u32 = 32768;
pub const KEY_ENV: &str = "GEMINI_API_KEY";

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: Option<String>,
    api_base: Url,
    model: String,
    thinking_budget: u32,
    read: ReadOptions,
}

impl GeminiProvider {
    pub fn new(
        http: reqwest::Client,
        api_key: Option<String>,
        api_base: Url,
        model: String,
        thinking_budget: u32,
        read: ReadOptions,
    ) -> Self {
        Self {
            http,
            api_key,
            api_base,
            model,
            thinking_budget,
            read,
        }
    }

    fn build_url(&self) -> Result<Url, StreamError> {
        // v1beta:streamGenerateContent supports Server-Sent Events with alt=sse.
        let mut url = self
            .api_base
            .join(&format!("v1beta/models/{}:streamGenerateContent", self.model))
            .map_err(|e| StreamError::StreamRead(format!("invalid Gemini endpoint: {e}")))?;

        url.query_pairs_mut().append_pair("alt", "sse");
        Ok(url)
    }

    // The key travels in a header so it never appears in the request URL.
    fn headers(&self) -> Result<HeaderMap, StreamError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(StreamError::MissingCredential {
                provider: "Gemini",
                env_var: KEY_ENV,
            })?;
        let v = HeaderValue::from_str(key).map_err(|_| StreamError::InvalidCredential {
            provider: "Gemini",
            env_var: KEY_ENV,
        })?;

        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        h.insert(API_KEY_HEADER, v);
        Ok(h)
    }

    fn body(&self, req: &ChatRequest) -> StreamGenerateContentRequest {
        let mut contents: Vec<Content> = req
            .history
            .iter()
            .map(|h| Content {
                role: Some(
                    match h.speaker {
                        Speaker::User => "user",
                        Speaker::Assistant => "model",
                    }
                    .to_string(),
                ),
                parts: vec![Part::text(&h.text)],
            })
            .collect();
        contents.push(Content {
            role: Some("user".to_string()),
            parts: vec![Part::text(&req.message)],
        });

        let system_instruction = (!req.system_instruction.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part::text(&req.system_instruction)],
        });

        StreamGenerateContentRequest {
            contents,
            system_instruction,
            generation_config: GenerationConfig {
                thinking_config: ThinkingConfig {
                    thinking_budget: self.thinking_budget,
                    include_thoughts: true,
                },
            },
        }
    }
}

impl Provider for GeminiProvider {
    fn name(&self) -> &'static str {
        "Gemini"
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
                "starting Gemini stream"
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
                tracing::warn!(%status, "Gemini request rejected");
                return Err(StreamError::from_response(resp).await);
            }

            // Gemini never sends [DONE]; the stream ends when the body does.
            Ok(spawn_reader(resp, decode_record, req.cancel, this.read))
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamGenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    thinking_config: ThinkingConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
    include_thoughts: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamGenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing)]
    thought: bool,
}

impl Part {
    fn text(s: &str) -> Self {
        Self {
            text: Some(s.to_string()),
            thought: false,
        }
    }
}

/// Split the first candidate's parts into thought text and answer text.
fn decode_record(payload: &str) -> Result<Vec<Delta>, serde_json::Error> {
    let r: StreamGenerateContentResponse = serde_json::from_str(payload)?;
    let Some(content) = r.candidates.into_iter().next().and_then(|c| c.content) else {
        return Ok(Vec::new());
    };

    let mut reasoning = String::new();
    let mut answer = String::new();
    for p in content.parts {
        let Some(t) = p.text else { continue };
        if p.thought {
            reasoning.push_str(&t);
        } else {
            answer.push_str(&t);
        }
    }

    let mut out = Vec::with_capacity(2);
    if !reasoning.is_empty() {
        out.push(Delta::reasoning(reasoning));
    }
    if !answer.is_empty() {
        out.push(Delta::content(answer));
    }
    Ok(out)
}
