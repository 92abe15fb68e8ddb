//! Advisor REST API client.
//!
//! `POST /advisor/analyze` starts an agent run for a session; the intermediate activity and
//! usually the final answer arrive over the realtime channel. `GET /advisor/status` reports
//! backend health.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ApiConfig;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub query: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnalyzeResponse {
    pub status: String,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl AnalyzeResponse {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(default)]
    pub agents: Option<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("advisor request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("advisor api error: {status}{}", .message.as_deref().map(|m| format!(" {}", m)).unwrap_or_default())]
    Api { status: u16, message: Option<String> },
}

impl RequestError {
    /// The `message` field of the server's error body, when it sent one.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            RequestError::Api { message, .. } => message.as_deref(),
            RequestError::Transport(_) => None,
        }
    }
}

#[async_trait]
pub trait AdvisorApi: Send + Sync {
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse, RequestError>;
    async fn status(&self) -> Result<StatusResponse, RequestError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// reqwest-backed [`AdvisorApi`].
#[derive(Clone)]
pub struct HttpAdvisorApi {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpAdvisorApi {
    pub fn new(config: &ApiConfig, token: Option<String>) -> Result<Self, RequestError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    async fn check(res: reqwest::Response) -> Result<reqwest::Response, RequestError> {
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .filter(|m| !m.trim().is_empty());
        log::debug!("advisor api {} body: {}", status, body);
        Err(RequestError::Api { status, message })
    }
}

#[async_trait]
impl AdvisorApi for HttpAdvisorApi {
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse, RequestError> {
        let url = format!("{}/advisor/analyze", self.base_url);
        log::debug!("POST {} session={}", url, request.session_id);
        let res = self
            .authorize(self.client.post(&url))
            .json(request)
            .send()
            .await?;
        let res = Self::check(res).await?;
        Ok(res.json().await?)
    }

    async fn status(&self) -> Result<StatusResponse, RequestError> {
        let url = format!("{}/advisor/status", self.base_url);
        let res = self.authorize(self.client.get(&url)).send().await?;
        let res = Self::check(res).await?;
        Ok(res.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_camel_case() {
        let body = serde_json::to_value(AnalyzeRequest {
            query: "Should I buy AAPL?".to_string(),
            session_id: "session-1-abc".to_string(),
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"query": "Should I buy AAPL?", "sessionId": "session-1-abc"})
        );
    }

    #[test]
    fn response_fields_are_optional() {
        let ok: AnalyzeResponse =
            serde_json::from_str(r#"{"status":"success","response":"Hold."}"#).unwrap();
        assert!(ok.is_success());
        assert_eq!(ok.response.as_deref(), Some("Hold."));

        let failed: AnalyzeResponse = serde_json::from_str(r#"{"status":"error"}"#).unwrap();
        assert!(!failed.is_success());
        assert!(failed.message.is_none());
    }

    #[test]
    fn api_error_exposes_server_message() {
        let err = RequestError::Api {
            status: 503,
            message: Some("Agent unavailable".to_string()),
        };
        assert_eq!(err.server_message(), Some("Agent unavailable"));
        assert_eq!(err.to_string(), "advisor api error: 503 Agent unavailable");

        let bare = RequestError::Api {
            status: 500,
            message: None,
        };
        assert_eq!(bare.to_string(), "advisor api error: 500");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let cfg = ApiConfig {
            base_url: "http://localhost:8080/api/".to_string(),
            ..ApiConfig::default()
        };
        let api = HttpAdvisorApi::new(&cfg, None).unwrap();
        assert_eq!(api.base_url(), "http://localhost:8080/api");
    }
}
