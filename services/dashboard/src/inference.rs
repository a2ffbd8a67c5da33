//! Image analysis through a multimodal generative API.
//!
//! One request per image, no retry. The model's text is returned verbatim.

use crate::config::InferenceConfig;
use crate::error::InferenceError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Fixed analysis prompt sent with every image
pub const ANALYSIS_PROMPT: &str = "\
다음은 사용자의 건강 데이터 대시보드 이미지입니다. 이미지에 나타난 지표를 분석하여 \
아래 다섯 가지 항목을 모두 포함해 한국어로 답변해 주세요.

1. 주요 건강 지표의 현재 상태
2. 시간에 따른 패턴 및 추세
3. 주목할 만한 이상 징후
4. 전반적인 건강 상태에 대한 인사이트
5. 개선이 필요한 부분";

const DEFAULT_MIME_TYPE: &str = "image/png";

/// Base64 image with its media type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: String,
    pub data: String,
}

impl ImagePayload {
    /// Strip a `data:<mime>;base64,` header if present
    pub fn from_data_uri(input: &str) -> Self {
        let input = input.trim();

        if let Some(rest) = input.strip_prefix("data:") {
            if let Some((header, data)) = rest.split_once(',') {
                let mime_type = header
                    .split(';')
                    .next()
                    .filter(|m| !m.is_empty())
                    .unwrap_or(DEFAULT_MIME_TYPE);

                return Self {
                    mime_type: mime_type.to_string(),
                    data: data.to_string(),
                };
            }
        }

        Self {
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            data: input.to_string(),
        }
    }
}

/// Turns an image into free-form analysis text
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageAnalyzer: Send + Sync {
    async fn analyze(&self, image: &ImagePayload) -> Result<String, InferenceError>;
}

/// Client for a Gemini-style `generateContent` endpoint
pub struct GeminiAnalyzer {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiAnalyzer {
    pub fn new(config: &InferenceConfig) -> Result<Self, InferenceError> {
        let mut builder = Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl ImageAnalyzer for GeminiAnalyzer {
    #[instrument(skip(self, image), fields(model = %self.model, mime_type = %image.mime_type))]
    async fn analyze(&self, image: &ImagePayload) -> Result<String, InferenceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(InferenceError::NotConfigured("inference.api_key"))?;

        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: ANALYSIS_PROMPT,
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: &image.mime_type,
                            data: &image.data,
                        },
                    },
                ],
            }],
        };

        debug!(size_bytes = image.data.len(), "Sending image for analysis");
        metrics::counter!("dashboard.inference.calls").increment(1);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(InferenceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateContentResponse = response.json().await?;
        let text = body.text();
        if text.is_empty() {
            return Err(InferenceError::EmptyResponse);
        }

        info!(chars = text.chars().count(), "Image analysis received");
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}
