//! Classifier backed by an OpenAI-compatible chat completions endpoint.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{header, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use super::{parse_answer, ImageClassifier, INSTRUCTIONS};
use crate::config::ClassifierConfig;
use crate::error::ClassifyError;
use crate::model::Classification;
use crate::secrets::resolve_secret_optional;

pub struct VisionClassifier {
    http: Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl VisionClassifier {
    pub fn new(
        endpoint: &str,
        model: &str,
        api_key: Option<SecretString>,
        timeout: Duration,
        max_tokens: u32,
    ) -> Result<Self, ClassifyError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClassifyError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            max_tokens,
        })
    }

    /// Builds the client, resolving the API key from config, file or env.
    /// A missing key is allowed for local endpoints that do not check it.
    pub fn from_config(config: &ClassifierConfig) -> Result<Self, ClassifyError> {
        let api_key = resolve_secret_optional(
            config.api_key.as_deref(),
            config.api_key_file.as_deref(),
            config.api_key_env_var.as_deref(),
        )
        .or_else(|e| match e {
            crate::secrets::SecretError::EnvVarNotSet { name } => {
                log::warn!("{} is not set; calling the classifier without an API key", name);
                Ok(None)
            }
            other => Err(ClassifyError::Config(other.to_string())),
        })?;

        Self::new(
            &config.endpoint,
            &config.model,
            api_key,
            Duration::from_secs(config.request_timeout_secs),
            config.max_tokens,
        )
    }

    fn request_body(&self, image: &[u8], mime_type: &str) -> serde_json::Value {
        let data_url = format!(
            "data:{};base64,{}",
            mime_type,
            base64::engine::general_purpose::STANDARD.encode(image)
        );

        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": INSTRUCTIONS },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": "Classify this image." },
                        { "type": "image_url", "image_url": { "url": data_url } }
                    ]
                }
            ]
        })
    }
}

/// 408, 429 and 5xx are worth retrying; any other failure status is not.
pub(crate) fn status_error(status: StatusCode, body: &str) -> ClassifyError {
    let message = format!("HTTP {}: {}", status.as_u16(), crate::sanitize::truncate(body, 200));
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        ClassifyError::Unavailable(message)
    } else {
        ClassifyError::Rejected(message)
    }
}

#[async_trait]
impl ImageClassifier for VisionClassifier {
    async fn classify(
        &self,
        image: &[u8],
        mime_type: &str,
    ) -> Result<Option<Classification>, ClassifyError> {
        if image.is_empty() {
            return Err(ClassifyError::Rejected("empty image".to_string()));
        }
        if !mime_type.starts_with("image/") {
            return Err(ClassifyError::Rejected(format!(
                "unsupported content type '{}'",
                mime_type
            )));
        }

        let mut request = self
            .http
            .post(format!("{}/chat/completions", self.endpoint))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&self.request_body(image, mime_type));
        if let Some(key) = &self.api_key {
            request = request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", key.expose_secret()),
            );
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClassifyError::Unavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClassifyError::Unparseable(format!("invalid response body: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            log::warn!("Classifier returned an empty answer, treating image as not relevant");
            return Ok(None);
        }

        parse_answer(&content)
    }
}
