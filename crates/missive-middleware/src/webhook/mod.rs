//! Webhook notification after a successful dispatch.
//!
//! Once the rest of the chain has succeeded, the envelope is serialized to
//! JSON and sent to every endpoint configured for its message type. A call
//! fails only when the [`HttpClient`] returns an error; whatever status comes
//! back counts as delivered. Each endpoint ends up as one `webhook-called`
//! stamp, in endpoint order.
//!
//! Two delivery modes:
//!
//! - **parallel**: every round calls all still-failing endpoints at once, with
//!   one backoff wait between rounds.
//! - **sequential**: endpoints one after another, each retried in place with
//!   its own attempt counter.
//!
//! Delivery failures never fail the dispatch.

mod client;
mod signer;

pub use client::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
#[cfg(feature = "http-client")]
pub use client::ReqwestHttpClient;
pub use signer::{HmacSha256Signer, Signer};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use missive_core::{
    DispatchResult, Envelope, Middleware, Next, TransportResult, WebhookCalledBody, stamps,
};
use tracing::{debug, warn};

use crate::backoff::{RetryConfig, RetryOverrides, Sleeper, TokioSleeper};

// =============================================================================
// Configuration
// =============================================================================

/// A webhook target.
#[derive(Clone)]
pub struct WebhookEndpoint {
    pub url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    /// Header carrying the payload signature.
    pub signature_header: String,
    pub signer: Option<Arc<dyn Signer>>,
}

impl WebhookEndpoint {
    /// A `POST` endpoint without extra headers or signature.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Post,
            headers: BTreeMap::new(),
            signature_header: "x-missive-signature".to_string(),
            signer: None,
        }
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Signs every payload with `signer`, sending the result under `header`.
    pub fn signed<S: Signer>(self, header: impl Into<String>, signer: S) -> Self {
        self.signed_shared(header, Arc::new(signer))
    }

    pub fn signed_shared(mut self, header: impl Into<String>, signer: Arc<dyn Signer>) -> Self {
        self.signature_header = header.into();
        self.signer = Some(signer);
        self
    }

    fn request(&self, body: &str) -> HttpRequest {
        let mut headers = self.headers.clone();
        if let Some(signer) = &self.signer {
            headers.insert(self.signature_header.clone(), signer.sign(body));
        }
        HttpRequest {
            url: self.url.clone(),
            method: self.method,
            headers,
            body: body.to_string(),
        }
    }
}

impl std::fmt::Debug for WebhookEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookEndpoint")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("signature_header", &self.signature_header)
            .field("signed", &self.signer.is_some())
            .finish()
    }
}

/// Webhook settings of one message type.
#[derive(Debug, Clone, Default)]
pub struct WebhookIntent {
    pub endpoints: Vec<WebhookEndpoint>,
    pub retry: RetryOverrides,
    pub parallel: Option<bool>,
    pub detached: Option<bool>,
}

impl WebhookIntent {
    pub fn new(endpoints: Vec<WebhookEndpoint>) -> Self {
        Self {
            endpoints,
            ..Default::default()
        }
    }

    pub fn endpoint(mut self, endpoint: WebhookEndpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn retry(mut self, retry: RetryOverrides) -> Self {
        self.retry = retry;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = Some(parallel);
        self
    }

    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = Some(detached);
        self
    }
}

// =============================================================================
// Delivery
// =============================================================================

struct Delivery {
    client: Arc<dyn HttpClient>,
    sleeper: Arc<dyn Sleeper>,
    retry: RetryConfig,
    endpoints: Vec<WebhookEndpoint>,
}

impl Delivery {
    async fn run(&self, parallel: bool, body: &str) -> Vec<WebhookCalledBody> {
        if parallel {
            self.parallel(body).await
        } else {
            self.sequential(body).await
        }
    }

    async fn call(&self, endpoint: &WebhookEndpoint, body: &str) -> TransportResult<HttpResponse> {
        let result = self.client.send(endpoint.request(body)).await;
        if let Err(e) = &result {
            debug!(url = %endpoint.url, error = %e, "Webhook call failed");
        }
        result
    }

    fn max_attempts(&self) -> u32 {
        self.retry.max_attempts.max(1)
    }

    async fn parallel(&self, body: &str) -> Vec<WebhookCalledBody> {
        let max_attempts = self.max_attempts();
        let mut outcomes: Vec<Option<(u32, HttpResponse)>> = vec![None; self.endpoints.len()];
        let mut pending: Vec<usize> = (0..self.endpoints.len()).collect();
        let mut backoff = self.retry.backoff();

        for round in 1..=max_attempts {
            let results = join_all(
                pending
                    .iter()
                    .map(|&i| self.call(&self.endpoints[i], body)),
            )
            .await;

            let mut failed = Vec::new();
            for (&i, result) in pending.iter().zip(results) {
                match result {
                    Ok(response) => outcomes[i] = Some((round, response)),
                    Err(_) => failed.push(i),
                }
            }

            if failed.is_empty() {
                break;
            }
            pending = failed;
            if round < max_attempts {
                self.sleeper.sleep(backoff.next_delay()).await;
            }
        }

        self.endpoints
            .iter()
            .zip(outcomes)
            .map(|(endpoint, outcome)| self.record(endpoint, outcome))
            .collect()
    }

    async fn sequential(&self, body: &str) -> Vec<WebhookCalledBody> {
        let max_attempts = self.max_attempts();
        let mut backoff = self.retry.backoff();
        let mut called = Vec::with_capacity(self.endpoints.len());

        for endpoint in &self.endpoints {
            backoff.reset();
            let mut outcome = None;
            for attempt in 1..=max_attempts {
                if let Ok(response) = self.call(endpoint, body).await {
                    outcome = Some((attempt, response));
                    break;
                }
                if attempt < max_attempts {
                    self.sleeper.sleep(backoff.next_delay()).await;
                }
            }
            called.push(self.record(endpoint, outcome));
        }
        called
    }

    fn record(&self, endpoint: &WebhookEndpoint, outcome: Option<(u32, HttpResponse)>) -> WebhookCalledBody {
        match outcome {
            Some((attempt, response)) => WebhookCalledBody {
                url: endpoint.url.clone(),
                attempt,
                status: Some(response.status),
                response_text: Some(response.text),
            },
            None => {
                warn!(url = %endpoint.url, attempts = self.max_attempts(), "Webhook delivery exhausted");
                WebhookCalledBody {
                    url: endpoint.url.clone(),
                    attempt: self.max_attempts(),
                    status: None,
                    response_text: None,
                }
            }
        }
    }
}

fn stamp_outcomes(envelope: &Envelope, outcomes: Vec<WebhookCalledBody>) {
    for outcome in outcomes {
        envelope.add_stamp_with(stamps::WEBHOOK_CALLED, &outcome);
    }
}

// =============================================================================
// Middleware
// =============================================================================

/// Notifies webhook endpoints after a successful dispatch.
pub struct Webhook {
    client: Arc<dyn HttpClient>,
    sleeper: Arc<dyn Sleeper>,
    retry: RetryConfig,
    parallel: bool,
    detached: bool,
    intents: HashMap<String, WebhookIntent>,
}

impl Webhook {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            client,
            sleeper: Arc::new(TokioSleeper),
            retry: RetryConfig::default(),
            parallel: false,
            detached: false,
            intents: HashMap::new(),
        }
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Default delivery mode for message types that don't set one.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Delivers on a spawned task without holding up the dispatch.
    ///
    /// The `webhook-called` stamps are appended to the envelope once the
    /// background delivery finishes.
    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Configures the endpoints of one message type.
    pub fn with_intent(mut self, message_type: impl Into<String>, intent: WebhookIntent) -> Self {
        self.intents.insert(message_type.into(), intent);
        self
    }
}

#[async_trait]
impl Middleware for Webhook {
    async fn handle(&self, envelope: Arc<Envelope>, next: Next<'_>) -> DispatchResult<()> {
        next.run(Arc::clone(&envelope)).await?;

        let Some(intent) = self.intents.get(envelope.message_type()) else {
            return Ok(());
        };
        if intent.endpoints.is_empty() {
            return Ok(());
        }

        let body = match serde_json::to_string(&*envelope) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Could not serialize envelope for webhooks");
                return Ok(());
            }
        };
        let parallel = intent.parallel.unwrap_or(self.parallel);
        let delivery = Delivery {
            client: Arc::clone(&self.client),
            sleeper: Arc::clone(&self.sleeper),
            retry: self.retry.merged(&intent.retry),
            endpoints: intent.endpoints.clone(),
        };

        if intent.detached.unwrap_or(self.detached) {
            tokio::spawn(async move {
                let outcomes = delivery.run(parallel, &body).await;
                stamp_outcomes(&envelope, outcomes);
            });
            return Ok(());
        }

        let outcomes = delivery.run(parallel, &body).await;
        stamp_outcomes(&envelope, outcomes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::{RecordingSleeper, WaitingAlgorithm};
    use missive_core::{AnyInput, CommandBus, HandlerError, TransportError};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    /// Fails each URL a configured number of times, then answers 200.
    #[derive(Default)]
    struct ScriptedClient {
        failures: Mutex<HashMap<String, u32>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedClient {
        fn failing(url: &str, times: u32) -> Self {
            let client = Self::default();
            client.failures.lock().insert(url.to_string(), times);
            client
        }

        fn calls_to(&self, url: &str) -> usize {
            self.requests.lock().iter().filter(|r| r.url == url).count()
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedClient {
        async fn send(&self, request: HttpRequest) -> TransportResult<HttpResponse> {
            let url = request.url.clone();
            self.requests.lock().push(request);
            let mut failures = self.failures.lock();
            match failures.get_mut(&url) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    Err(TransportError::RequestFailed {
                        url,
                        reason: "connection refused".into(),
                    })
                }
                _ => Ok(HttpResponse {
                    status: 200,
                    text: format!("ok from {url}"),
                }),
            }
        }
    }

    fn bus_with(webhook: Webhook) -> CommandBus {
        let mut bus = CommandBus::new();
        bus.register("order-placed", AnyInput, |_env: Arc<Envelope>| async move {
            Ok::<_, HandlerError>(json!({"ok": true}))
        });
        bus.use_middleware(webhook);
        bus
    }

    fn called(envelope: &Envelope) -> Vec<WebhookCalledBody> {
        envelope
            .stamps_of_type(stamps::WEBHOOK_CALLED)
            .iter()
            .filter_map(|s| s.body_as())
            .collect()
    }

    fn no_wait(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            waiting_algorithm: WaitingAlgorithm::None,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_parallel_retries_only_failed_endpoints() {
        let client = Arc::new(ScriptedClient::failing("http://a", 1));
        let bus = bus_with(
            Webhook::new(client.clone())
                .retry(no_wait(3))
                .parallel(true)
                .with_intent(
                    "order-placed",
                    WebhookIntent::default()
                        .endpoint(WebhookEndpoint::new("http://a"))
                        .endpoint(WebhookEndpoint::new("http://b")),
                ),
        );

        let intent = bus.create_command("order-placed", json!({"id": 9})).unwrap();
        let dispatched = bus.dispatch(intent).await.unwrap();

        assert_eq!(client.requests.lock().len(), 3);
        assert_eq!(client.calls_to("http://a"), 2);
        assert_eq!(client.calls_to("http://b"), 1);

        let called = called(&dispatched.envelope);
        assert_eq!(called.len(), 2);
        assert_eq!((called[0].url.as_str(), called[0].attempt), ("http://a", 2));
        assert_eq!((called[1].url.as_str(), called[1].attempt), ("http://b", 1));
        assert!(called.iter().all(|c| c.status == Some(200)));
    }

    #[tokio::test]
    async fn test_parallel_exhaustion() {
        let client = Arc::new(ScriptedClient::failing("http://down", u32::MAX));
        let sleeper = RecordingSleeper::new();
        let bus = bus_with(
            Webhook::new(client.clone())
                .retry(RetryConfig {
                    max_attempts: 3,
                    waiting_algorithm: WaitingAlgorithm::Fibonacci,
                    jitter: 0.0,
                    ..Default::default()
                })
                .parallel(true)
                .sleeper(Arc::new(sleeper.clone()))
                .with_intent(
                    "order-placed",
                    WebhookIntent::new(vec![WebhookEndpoint::new("http://down")]),
                ),
        );

        let intent = bus.create_command("order-placed", json!({})).unwrap();
        let dispatched = bus.dispatch(intent).await.unwrap();

        assert_eq!(client.calls_to("http://down"), 3);
        assert_eq!(sleeper.call_count(), 2);
        let called = called(&dispatched.envelope);
        assert_eq!(called[0].attempt, 3);
        assert_eq!(called[0].status, None);
        assert_eq!(called[0].response_text, None);
    }

    #[tokio::test]
    async fn test_sequential_counts_attempts_per_endpoint() {
        let client = Arc::new(ScriptedClient::failing("http://b", 2));
        let sleeper = RecordingSleeper::new();
        let bus = bus_with(
            Webhook::new(client.clone())
                .retry(RetryConfig {
                    max_attempts: 3,
                    waiting_algorithm: WaitingAlgorithm::Fibonacci,
                    jitter: 0.0,
                    ..Default::default()
                })
                .sleeper(Arc::new(sleeper.clone()))
                .with_intent(
                    "order-placed",
                    WebhookIntent::default()
                        .endpoint(WebhookEndpoint::new("http://a"))
                        .endpoint(WebhookEndpoint::new("http://b"))
                        .endpoint(WebhookEndpoint::new("http://c")),
                ),
        );

        let intent = bus.create_command("order-placed", json!({})).unwrap();
        let dispatched = bus.dispatch(intent).await.unwrap();

        let urls: Vec<String> = client.requests.lock().iter().map(|r| r.url.clone()).collect();
        assert_eq!(urls, vec!["http://a", "http://b", "http://b", "http://b", "http://c"]);

        let attempts: Vec<u32> = called(&dispatched.envelope).iter().map(|c| c.attempt).collect();
        assert_eq!(attempts, vec![1, 3, 1]);
        assert_eq!(
            sleeper.calls(),
            vec![Duration::from_secs(1), Duration::from_secs(1)]
        );
    }

    #[tokio::test]
    async fn test_signs_payload_and_skips_on_handler_error() {
        let client = Arc::new(ScriptedClient::default());
        let mut bus = bus_with(
            Webhook::new(client.clone())
                .retry(no_wait(1))
                .with_intent(
                    "order-placed",
                    WebhookIntent::new(vec![
                        WebhookEndpoint::new("http://a")
                            .header("x-tenant", "acme")
                            .signed("x-signature", HmacSha256Signer::new("secret")),
                    ]),
                )
                .with_intent(
                    "broken",
                    WebhookIntent::new(vec![WebhookEndpoint::new("http://a")]),
                ),
        );
        bus.register("broken", AnyInput, |_env: Arc<Envelope>| async move {
            Err::<serde_json::Value, _>(HandlerError::msg("boom"))
        });

        let intent = bus.create_command("order-placed", json!({"id": 1})).unwrap();
        bus.dispatch(intent).await.unwrap();

        {
            let requests = client.requests.lock();
            assert_eq!(requests.len(), 1);
            let request = &requests[0];
            assert_eq!(request.method, HttpMethod::Post);
            assert_eq!(request.headers["x-tenant"], "acme");
            assert_eq!(
                request.headers["x-signature"],
                HmacSha256Signer::new("secret").sign(&request.body)
            );

            let payload: serde_json::Value = serde_json::from_str(&request.body).unwrap();
            assert_eq!(payload["message"]["__type"], "order-placed");
            assert_eq!(payload["stamps"][0]["type"], "identity");
        }

        let intent = bus.create_command("broken", json!({})).unwrap();
        assert!(bus.dispatch(intent).await.is_err());
        assert_eq!(client.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_detached_delivery_stamps_later() {
        let client = Arc::new(ScriptedClient::default());
        let bus = bus_with(
            Webhook::new(client.clone()).detached(true).with_intent(
                "order-placed",
                WebhookIntent::new(vec![WebhookEndpoint::new("http://a")]),
            ),
        );

        let intent = bus.create_command("order-placed", json!({})).unwrap();
        let dispatched = bus.dispatch(intent).await.unwrap();

        for _ in 0..100 {
            if dispatched.envelope.has_stamp(stamps::WEBHOOK_CALLED) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(called(&dispatched.envelope).len(), 1);
        assert_eq!(client.calls_to("http://a"), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_type_is_untouched() {
        let client = Arc::new(ScriptedClient::default());
        let bus = bus_with(Webhook::new(client.clone()));

        let intent = bus.create_command("order-placed", json!({})).unwrap();
        let dispatched = bus.dispatch(intent).await.unwrap();
        assert!(!dispatched.envelope.has_stamp(stamps::WEBHOOK_CALLED));
        assert!(client.requests.lock().is_empty());
    }
}
