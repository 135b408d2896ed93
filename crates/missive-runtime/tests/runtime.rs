//! Buses built from configuration.

use std::sync::Arc;

use async_trait::async_trait;
use missive_core::{AnyInput, Envelope, HandlerError, TransportResult, stamps};
use missive_middleware::{
    HttpClient, HttpRequest, HttpResponse, LogRecord, LoggerAdapter, RecordingSleeper,
    WaitingAlgorithm,
};
use missive_runtime::config::{EndpointConfig, MiddlewareName, WebhookIntentConfig};
use missive_runtime::{MissiveConfig, MissiveRuntime, RuntimeDeps, RuntimeError};
use parking_lot::Mutex;
use serde_json::json;

#[derive(Default)]
struct Recorder {
    requests: Mutex<Vec<HttpRequest>>,
    records: Mutex<Vec<String>>,
}

#[async_trait]
impl HttpClient for Recorder {
    async fn send(&self, request: HttpRequest) -> TransportResult<HttpResponse> {
        self.requests.lock().push(request);
        Ok(HttpResponse {
            status: 204,
            text: String::new(),
        })
    }
}

#[async_trait]
impl LoggerAdapter for Recorder {
    async fn processing(&self, record: &LogRecord) {
        self.records.lock().push(format!("processing {}", record.message.message_type()));
    }

    async fn processed(&self, record: &LogRecord) {
        self.records.lock().push(format!("processed {}", record.message.message_type()));
    }

    async fn error(&self, record: &LogRecord) {
        self.records.lock().push(format!("error {}", record.message.message_type()));
    }
}

fn config() -> MissiveConfig {
    let mut config = MissiveConfig::default();
    config.retry.waiting_algorithm = WaitingAlgorithm::None;
    config.buses.query.middlewares = vec![MiddlewareName::Logger, MiddlewareName::Cacher];
    config.buses.command.middlewares = vec![
        MiddlewareName::Logger,
        MiddlewareName::Retryer,
        MiddlewareName::Webhook,
    ];
    config.webhook.intents.insert(
        "place-order".into(),
        WebhookIntentConfig {
            endpoints: vec![EndpointConfig {
                url: "http://hooks.local/orders".into(),
                secret: Some("s3cret".into()),
                ..Default::default()
            }],
            ..Default::default()
        },
    );
    config
}

#[tokio::test]
async fn buses_follow_configuration() {
    let recorder = Arc::new(Recorder::default());
    let deps = RuntimeDeps::default()
        .with_http_client(recorder.clone())
        .with_logger(recorder.clone())
        .with_sleeper(Arc::new(RecordingSleeper::new()));
    let mut runtime = MissiveRuntime::with_deps(config(), deps).unwrap();

    assert_eq!(runtime.query_bus().middleware_count(), 2);
    assert_eq!(runtime.command_bus().middleware_count(), 3);
    assert_eq!(runtime.event_bus().middleware_count(), 0);

    runtime
        .command_bus_mut()
        .register("place-order", AnyInput, |_env: Arc<Envelope>| async move {
            Ok::<_, HandlerError>(json!({"order": 1}))
        });

    let bus = runtime.command_bus();
    let intent = bus.create_command("place-order", json!({"sku": "A-1"})).unwrap();
    let dispatched = bus.dispatch(intent).await.unwrap();

    assert_eq!(dispatched.result, Some(json!({"order": 1})));
    assert!(dispatched.envelope.has_stamp(stamps::WEBHOOK_CALLED));

    let requests = recorder.requests.lock();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].headers.contains_key("x-missive-signature"));
    assert_eq!(
        *recorder.records.lock(),
        vec!["processing place-order", "processed place-order"]
    );
}

#[tokio::test]
async fn query_results_are_cached() {
    let mut runtime = MissiveRuntime::with_deps(
        config(),
        RuntimeDeps::default().with_http_client(Arc::new(Recorder::default())),
    )
    .unwrap();
    runtime
        .query_bus_mut()
        .register("echo", AnyInput, |env: Arc<Envelope>| async move {
            Ok::<_, HandlerError>(json!({ "out": env.message().get("in").cloned() }))
        });

    let bus = runtime.query_bus();
    let intent = bus.create_query("echo", json!({"in": "x"})).unwrap();
    bus.dispatch(intent.clone()).await.unwrap();
    let second = bus.dispatch(intent).await.unwrap();

    assert_eq!(second.result, Some(json!({"out": "x"})));
    assert!(second.envelope.has_stamp(stamps::CACHE_HIT));
}

#[test]
fn webhook_needs_a_client() {
    let deps = RuntimeDeps {
        http_client: None,
        ..Default::default()
    };
    let err = MissiveRuntime::with_deps(config(), deps).err().unwrap();
    assert!(matches!(err, RuntimeError::MissingHttpClient(ref bus) if bus == "command"));
}

#[test]
fn invalid_configuration_is_rejected() {
    let mut config = config();
    config.buses.event.middlewares = vec![MiddlewareName::Cacher];
    let err = MissiveRuntime::from_config(config).err().unwrap();
    assert!(matches!(err, RuntimeError::Config(_)));
}

#[tokio::test]
async fn lock_built_from_configuration() {
    use missive_middleware::BusMiddlewareExt;

    let mut config = MissiveConfig::default();
    config.lock.timeout_ms = 250;
    let mut runtime = MissiveRuntime::from_config(config).unwrap();

    let lock = runtime
        .config()
        .lock
        .build(Arc::new(|env: &Envelope| env.message_type().to_string()));
    let bus = runtime.command_bus_mut();
    bus.use_lock(lock);
    bus.register("transfer", AnyInput, |_env: Arc<Envelope>| async move {
        Ok::<_, HandlerError>(json!("done"))
    });

    let intent = bus.create_command("transfer", json!({})).unwrap();
    let dispatched = runtime.command_bus().dispatch(intent).await.unwrap();
    assert_eq!(dispatched.result, Some(json!("done")));
}
