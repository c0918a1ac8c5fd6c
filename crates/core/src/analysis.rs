//! Resume-fit narrative generation over an OpenAI-compatible chat API.
//!
//! The generated text is handed back untouched; callers decide how to render it.

use crate::error::AnalysisError;
use crate::traits::FitAnalyser;
use crate::upsert::BackoffPolicy;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

const DEFAULT_SYSTEM_PROMPT: &str = "You are an experienced recruiter. Compare a candidate's resume \
with a job advertisement and explain, in concise markdown, how well the candidate fits: \
matching strengths, gaps, and concrete suggestions for tailoring the application.";

const DEFAULT_USER_PROMPT: &str = "Resume:\n{user_resume}\n\nJob description:\n{job_description}\n\n\
Assess the fit between this resume and the job.";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout: Duration,
    /// Applied to rate-limited and server-error responses.
    pub backoff: BackoffPolicy,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            request_timeout: Duration::from_secs(120),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplates {
    pub system: String,
    /// May reference `{user_resume}` and `{job_description}`.
    pub user: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            user: DEFAULT_USER_PROMPT.to_string(),
        }
    }
}

impl PromptTemplates {
    pub fn from_files(system_path: &Path, user_path: &Path) -> Result<Self, AnalysisError> {
        Ok(Self {
            system: std::fs::read_to_string(system_path)?,
            user: std::fs::read_to_string(user_path)?,
        })
    }

    pub fn render_user(&self, resume_text: &str, job_description: &str) -> String {
        render(
            &self.user,
            &[("user_resume", resume_text), ("job_description", job_description)],
        )
    }
}

/// Single-pass placeholder substitution; substituted text is never re-scanned.
fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        rendered.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        let matched = values.iter().find_map(|(name, value)| {
            tail.strip_prefix(name)?
                .strip_prefix('}')
                .map(|after| (*value, after))
        });

        match matched {
            Some((value, after)) => {
                rendered.push_str(value);
                rest = after;
            }
            None => {
                rendered.push('{');
                rest = tail;
            }
        }
    }

    rendered.push_str(rest);
    rendered
}

#[derive(Clone)]
pub struct OpenAiFitAnalyser {
    client: Client,
    endpoint: String,
    config: OpenAiConfig,
    prompts: PromptTemplates,
}

impl OpenAiFitAnalyser {
    pub fn new(config: OpenAiConfig, prompts: PromptTemplates) -> Result<Self, AnalysisError> {
        if config.api_key.trim().is_empty() {
            return Err(AnalysisError::Config("missing OpenAI API key".to_string()));
        }
        if config.model.trim().is_empty() {
            return Err(AnalysisError::Config("missing model name".to_string()));
        }

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| AnalysisError::Config("invalid OpenAI API key".to_string()))?,
        );
        let client = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()?;
        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));

        Ok(Self {
            client,
            endpoint,
            config,
            prompts,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl ChatResponse {
    fn into_text(self) -> Result<String, AnalysisError> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(AnalysisError::EmptyContent)
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl FitAnalyser for OpenAiFitAnalyser {
    async fn analyse(&self, resume_text: &str, job_description: &str) -> Result<String, AnalysisError> {
        let user_prompt = self.prompts.render_user(resume_text, job_description);
        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &self.prompts.system,
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                let delay = self.config.backoff.delay_for(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying fit analysis");
                tokio::time::sleep(delay).await;
            }

            let response = self.client.post(&self.endpoint).json(&request).send().await?;
            let status = response.status();
            if status.is_success() {
                let parsed: ChatResponse = response.json().await?;
                debug!(model = %self.config.model, "fit analysis generated");
                return parsed.into_text();
            }

            if should_retry(status) && attempt < self.config.backoff.max_retries {
                attempt += 1;
                continue;
            }
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(AnalysisError::RateLimited { retries: attempt });
            }

            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
                .map(|envelope| envelope.error.message)
                .unwrap_or(body);
            return Err(AnalysisError::Api {
                status: status.as_u16(),
                message,
            });
        }
    }
}
