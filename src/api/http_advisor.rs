//! Implements the `Advisor` trait with a hosted `generateContent` endpoint.

use crate::api::Advisor;
use crate::config::AdvisorConfig;
use crate::model::{Message, Role};
use crate::Result;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing::trace;
use url::Url;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Talks to the hosted language model over HTTPS.
pub struct HttpAdvisor {
    client: reqwest::Client,
    url: Url,
    api_key: String,
}

impl HttpAdvisor {
    pub fn new(endpoint: &str, model: &str, api_key: impl Into<String>) -> Result<Self> {
        let base = Url::parse(endpoint)
            .with_context(|| format!("Invalid advisor endpoint '{endpoint}'"))?;
        let url = base
            .join(&format!("v1beta/models/{model}:generateContent"))
            .with_context(|| format!("Unable to build the advisor URL for model '{model}'"))?;
        Ok(Self {
            client: reqwest::Client::new(),
            url,
            api_key: api_key.into(),
        })
    }

    /// Reads the API key from the environment variable named in `config`.
    pub fn from_config(config: &AdvisorConfig) -> Result<Self> {
        let key_var = config.api_key_env();
        let api_key = std::env::var(key_var).with_context(|| {
            format!(
                "The advisor needs an API key in the {key_var} environment variable. Set it, or \
                set LIFTUP_IN_TEST_MODE=1 to use the offline advisor."
            )
        })?;
        Self::new(config.endpoint(), config.model(), api_key)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait::async_trait]
impl Advisor for HttpAdvisor {
    async fn generate(&self, prompt: &str, history: &[Message]) -> Result<String> {
        let request = GenerateRequest::new(prompt, history);
        trace!("Sending {} turns to {}", request.contents.len(), self.url);

        let response = self
            .client
            .post(self.url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send the request to the advisor model")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            bail!("The advisor model failed with status {status}: {body}");
        }

        let body: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse the advisor model response")?;
        body.text()
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

impl GenerateRequest {
    fn new(prompt: &str, history: &[Message]) -> Self {
        let mut contents: Vec<Content> = history
            .iter()
            .map(|m| Content::new(m.role(), m.text()))
            .collect();
        contents.push(Content::new(Role::User, prompt));
        Self { contents }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<Role>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn new(role: Role, text: &str) -> Self {
        Self {
            role: Some(role),
            parts: vec![Part {
                text: Some(text.to_string()),
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateResponse {
    /// Joins the text parts of the first candidate.
    fn text(&self) -> Result<String> {
        let content = self
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .context("The advisor model returned no candidates")?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.is_empty() {
            bail!("The advisor model returned an empty reply");
        }
        Ok(text)
    }
}
