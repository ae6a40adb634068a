//! HTTP dispatch of generated requests.
//!
//! Transport errors and non-2xx responses become failed
//! [`RequestOutcome`]s; dispatch itself never returns an error.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::info;
use url::Url;

use crate::config::GeneralConfig;
use crate::error::{LoadTestError, Result};
use crate::payloads::{ApiMethod, Payload};

/// One request ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: ApiMethod,
    /// Path relative to the host
    pub path: String,
    /// Query parameters for GET, JSON body for POST
    pub payload: Payload,
    /// Statistics group; defaults to the path without its query string
    pub name: Option<String>,
    pub session_id: String,
    /// Log an equivalent curl command for this request
    pub log_curl: bool,
}

impl ApiRequest {
    pub fn stats_name(&self) -> &str {
        match &self.name {
            Some(name) => name,
            None => self.path.split('?').next().unwrap_or(&self.path),
        }
    }
}

/// Transport-level result of one request
#[derive(Debug, Clone, Serialize)]
pub struct RequestOutcome {
    pub name: String,
    pub method: ApiMethod,
    pub status: Option<u16>,
    pub success: bool,
    pub elapsed: Duration,
    pub error: Option<String>,
}

#[async_trait]
pub trait RequestDispatcher: Send + Sync {
    async fn dispatch(&self, request: ApiRequest) -> RequestOutcome;
}

/// Flatten a payload into query pairs.
///
/// Nulls are dropped, arrays repeat their key, nested objects are sent as JSON.
pub fn query_pairs(payload: &Payload) -> Vec<(String, String)> {
    let Some(object) = payload.as_object() else {
        return Vec::new();
    };

    let mut pairs = Vec::new();
    for (key, value) in object {
        match value {
            Value::Array(items) => {
                for item in items {
                    if let Some(text) = query_value(item) {
                        pairs.push((key.clone(), text));
                    }
                }
            }
            other => {
                if let Some(text) = query_value(other) {
                    pairs.push((key.clone(), text));
                }
            }
        }
    }
    pairs
}

fn query_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Dispatcher backed by one pooled `reqwest` client shared by all users
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    base: Url,
    session_header_name: String,
}

impl HttpDispatcher {
    pub fn new(general: &GeneralConfig) -> Result<Self> {
        let base = Url::parse(&general.host)
            .map_err(|e| LoadTestError::config(format!("invalid host '{}': {}", general.host, e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(general.request_timeout_seconds))
            .pool_max_idle_per_host(50)
            .user_agent(general.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            base,
            session_header_name: general.session_header_name.clone(),
        })
    }

    fn url_for(&self, path: &str) -> std::result::Result<Url, url::ParseError> {
        self.base.join(path)
    }

    /// Shell command reproducing `request`, for debugging
    pub fn curl_command(&self, request: &ApiRequest, url: &Url) -> String {
        let mut target = url.clone();
        if request.method == ApiMethod::Get {
            let pairs = query_pairs(&request.payload);
            if !pairs.is_empty() {
                target.query_pairs_mut().extend_pairs(pairs);
            }
        }

        let mut parts = vec![
            format!("curl -X {} '{}'", request.method, target),
            format!("-H '{}: {}'", self.session_header_name, request.session_id),
            "-H 'Content-Type: application/json'".to_string(),
        ];
        if request.method == ApiMethod::Post {
            parts.push(format!("-d '{}'", request.payload));
        }
        parts.join(" \\\n  ")
    }
}

#[async_trait]
impl RequestDispatcher for HttpDispatcher {
    async fn dispatch(&self, request: ApiRequest) -> RequestOutcome {
        let name = request.stats_name().to_string();
        let started = Instant::now();

        let failed = |error: String, status: Option<u16>, elapsed: Duration| RequestOutcome {
            name: name.clone(),
            method: request.method,
            status,
            success: false,
            elapsed,
            error: Some(error),
        };

        let url = match self.url_for(&request.path) {
            Ok(url) => url,
            Err(e) => return failed(format!("invalid path '{}': {}", request.path, e), None, started.elapsed()),
        };

        if request.log_curl {
            info!("CURL command:\n{}", self.curl_command(&request, &url));
        }

        // `json` already sets the content type
        let builder = match request.method {
            ApiMethod::Get => self
                .client
                .get(url)
                .query(&query_pairs(&request.payload))
                .header(reqwest::header::CONTENT_TYPE, "application/json"),
            ApiMethod::Post => self.client.post(url).json(&request.payload),
        };
        let builder = builder.header(self.session_header_name.as_str(), request.session_id.as_str());

        // Outcomes are logged once, by the metrics recorder
        match builder.send().await {
            Ok(response) => {
                let status = response.status();
                let elapsed = started.elapsed();
                if status.is_success() {
                    RequestOutcome {
                        name: name.clone(),
                        method: request.method,
                        status: Some(status.as_u16()),
                        success: true,
                        elapsed,
                        error: None,
                    }
                } else {
                    failed(format!("HTTP {}", status), Some(status.as_u16()), elapsed)
                }
            }
            Err(e) => failed(e.to_string(), e.status().map(|s| s.as_u16()), started.elapsed()),
        }
    }
}
