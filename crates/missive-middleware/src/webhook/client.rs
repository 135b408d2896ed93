//! The HTTP client used for webhook delivery.

use std::collections::BTreeMap;

use async_trait::async_trait;
use missive_core::TransportResult;
use serde::{Deserialize, Serialize};

/// HTTP verbs accepted by webhook endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// One outgoing webhook call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// The response to a webhook call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub text: String,
}

/// Sends webhook requests.
///
/// An `Err` means no response was obtained; any HTTP status, including
/// 4xx and 5xx, is a delivered response.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    async fn send(&self, request: HttpRequest) -> TransportResult<HttpResponse>;
}

#[cfg(feature = "http-client")]
pub use reqwest_client::ReqwestHttpClient;

#[cfg(feature = "http-client")]
mod reqwest_client {
    use std::time::Duration;

    use async_trait::async_trait;
    use missive_core::{TransportError, TransportResult};
    use reqwest::{Client, ClientBuilder, Method};

    use super::{HttpClient, HttpMethod, HttpRequest, HttpResponse};

    /// [`HttpClient`] backed by reqwest.
    #[derive(Debug, Clone, Default)]
    pub struct ReqwestHttpClient {
        client: Client,
    }

    impl ReqwestHttpClient {
        pub fn new() -> Self {
            Self::default()
        }

        /// Creates a client whose requests time out after `timeout`.
        pub fn with_timeout(timeout: Duration) -> TransportResult<Self> {
            let client = ClientBuilder::new()
                .timeout(timeout)
                .build()
                .map_err(|e| TransportError::RequestFailed {
                    url: String::new(),
                    reason: e.to_string(),
                })?;
            Ok(Self { client })
        }

        pub fn from_client(client: Client) -> Self {
            Self { client }
        }
    }

    fn method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }

    #[async_trait]
    impl HttpClient for ReqwestHttpClient {
        async fn send(&self, request: HttpRequest) -> TransportResult<HttpResponse> {
            let mut builder = self
                .client
                .request(method(request.method), request.url.as_str())
                .header("content-type", "application/json")
                .body(request.body);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout {
                        url: request.url.clone(),
                    }
                } else {
                    TransportError::RequestFailed {
                        url: request.url.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;
            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .map_err(|e| TransportError::RequestFailed {
                    url: request.url.clone(),
                    reason: e.to_string(),
                })?;
            Ok(HttpResponse { status, text })
        }
    }
}
