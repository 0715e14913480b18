//! # Transport
//!
//! The XHR-equivalent seam beneath every HTTP-backed store. Stores build a
//! [`Request`], hand it to a [`Transport`], and turn the [`Response`] (or
//! [`TransportError`]) into store events. Production code uses
//! [`HttpTransport`]; tests use [`MockTransport`](crate::mock::MockTransport).

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// HTTP verbs used by the stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Mutating verbs carry the CSRF token.
    pub fn is_mutating(self) -> bool {
        !matches!(self, Method::Get)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            timeout,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A completed exchange. Header names are stored lowercase.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Response {
    pub status: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parses the body as JSON. Empty or malformed bodies yield `None`.
    pub fn json(&self) -> Option<Value> {
        if self.body.trim().is_empty() {
            return None;
        }
        serde_json::from_str(&self.body).ok()
    }
}

/// Transport-level failures. HTTP error statuses are *not* errors here.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,
    #[error("Request aborted")]
    Aborted,
    #[error("Network error: {0}")]
    Network(String),
}

/// Sends requests on behalf of a store.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response, TransportError>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Turns a [`Request`] into a `reqwest` request. Bodies go out as JSON.
    fn build(&self, request: &Request) -> Result<reqwest::Request, reqwest::Error> {
        let mut builder = self
            .client
            .request(Self::method(request.method), &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder.build()
    }

    fn method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        debug!(method = %request.method, url = %request.url, "Sending request");
        let built = self
            .build(&request)
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let response = self.client.execute(built).await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(e.to_string())
            }
        })?;
        debug!(status, "Received response");

        Ok(Response {
            status,
            body,
            headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_headers_are_case_insensitive() {
        let response = Response::new(200, "{}").with_header("ETag", "\"abc\"");
        assert_eq!(response.header("etag"), Some("\"abc\""));
        assert_eq!(response.header("ETAG"), Some("\"abc\""));
    }

    #[test]
    fn response_json_handles_empty_body() {
        assert_eq!(Response::new(204, "").json(), None);
        assert_eq!(Response::new(200, "{\"a\":1}").json(), Some(json!({"a": 1})));
        assert_eq!(Response::new(200, "not json").json(), None);
    }

    #[test]
    fn bodies_are_sent_as_json() {
        let transport = HttpTransport::new();
        let request = Request::new(Method::Post, "https://api/servers", Duration::from_secs(5))
            .with_body(json!({"name": "web"}));
        let built = transport.build(&request).unwrap();

        assert_eq!(built.method(), &reqwest::Method::POST);
        assert_eq!(
            built.headers()[reqwest::header::CONTENT_TYPE].to_str().unwrap(),
            "application/json"
        );
        let body = built.body().and_then(reqwest::Body::as_bytes).unwrap();
        assert_eq!(serde_json::from_slice::<Value>(body).unwrap(), json!({"name": "web"}));
        assert_eq!(built.timeout(), Some(&Duration::from_secs(5)));
    }

    #[test]
    fn only_get_is_non_mutating() {
        assert!(!Method::Get.is_mutating());
        assert!(Method::Post.is_mutating());
        assert!(Method::Delete.is_mutating());
    }
}
