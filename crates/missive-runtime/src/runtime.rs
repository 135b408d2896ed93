//! Builds the three buses from configuration.

use std::sync::Arc;

use missive_core::{Bus, BusKind, CommandBus, EventBus, MessageKind, QueryBus};
use missive_middleware::{
    CacheAdapter, HttpClient, LoggerAdapter, Logger, MemoryCacheAdapter, Retryer, Sleeper,
    TokioSleeper, TracingLoggerAdapter,
};
use tracing::{debug, info};

use crate::config::{ConfigLoader, MiddlewareName, MissiveConfig, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// Collaborators handed to config-built middlewares.
#[derive(Clone)]
pub struct RuntimeDeps {
    pub cache: Arc<dyn CacheAdapter>,
    /// Required when a bus lists `webhook`, unless the `http-client`
    /// feature supplies a default.
    pub http_client: Option<Arc<dyn HttpClient>>,
    pub logger: Arc<dyn LoggerAdapter>,
    pub sleeper: Arc<dyn Sleeper>,
}

impl Default for RuntimeDeps {
    fn default() -> Self {
        Self {
            cache: Arc::new(MemoryCacheAdapter::new()),
            http_client: default_http_client(),
            logger: Arc::new(TracingLoggerAdapter),
            sleeper: Arc::new(TokioSleeper),
        }
    }
}

#[cfg(feature = "http-client")]
fn default_http_client() -> Option<Arc<dyn HttpClient>> {
    Some(Arc::new(missive_middleware::ReqwestHttpClient::new()))
}

#[cfg(not(feature = "http-client"))]
fn default_http_client() -> Option<Arc<dyn HttpClient>> {
    None
}

impl RuntimeDeps {
    pub fn with_cache(mut self, cache: Arc<dyn CacheAdapter>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn LoggerAdapter>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

/// A query, a command and an event bus with their configured middlewares.
///
/// Handlers and code-only middlewares (lock, feature flag, mocker, async) are
/// added afterwards through the `*_mut` accessors.
///
/// ```rust,ignore
/// let mut runtime = MissiveRuntime::load()?;
/// runtime.query_bus_mut().register("echo", AnyInput, echo);
/// let dispatched = runtime.query_bus().dispatch(intent).await?;
/// ```
pub struct MissiveRuntime {
    config: MissiveConfig,
    query: QueryBus,
    command: CommandBus,
    event: EventBus,
}

impl MissiveRuntime {
    /// Loads configuration from the default locations and builds the buses.
    pub fn load() -> RuntimeResult<Self> {
        Self::from_config(ConfigLoader::new().load()?)
    }

    pub fn from_config(config: MissiveConfig) -> RuntimeResult<Self> {
        Self::with_deps(config, RuntimeDeps::default())
    }

    /// Validates `config` and builds the buses using `deps`.
    pub fn with_deps(config: MissiveConfig, deps: RuntimeDeps) -> RuntimeResult<Self> {
        validate_config(&config)?;

        let query = build_bus(&config, &deps)?;
        let command = build_bus(&config, &deps)?;
        let event = build_bus(&config, &deps)?;
        info!(
            query = query.middleware_count(),
            command = command.middleware_count(),
            event = event.middleware_count(),
            "Buses built"
        );

        Ok(Self {
            config,
            query,
            command,
            event,
        })
    }

    /// Installs the global tracing subscriber from the `logging` section.
    pub fn init_logging(&self) {
        logging::init_from_config(&self.config.logging);
    }

    pub fn config(&self) -> &MissiveConfig {
        &self.config
    }

    pub fn query_bus(&self) -> &QueryBus {
        &self.query
    }

    pub fn command_bus(&self) -> &CommandBus {
        &self.command
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event
    }

    pub fn query_bus_mut(&mut self) -> &mut QueryBus {
        &mut self.query
    }

    pub fn command_bus_mut(&mut self) -> &mut CommandBus {
        &mut self.command
    }

    pub fn event_bus_mut(&mut self) -> &mut EventBus {
        &mut self.event
    }

    /// Splits the runtime into its buses, e.g. to share each behind an `Arc`.
    pub fn into_buses(self) -> (QueryBus, CommandBus, EventBus) {
        (self.query, self.command, self.event)
    }
}

fn build_bus<K: MessageKind>(config: &MissiveConfig, deps: &RuntimeDeps) -> RuntimeResult<Bus<K>> {
    let kind: BusKind = K::KIND;
    let mut bus = Bus::<K>::new();

    // Validation already rejected misplaced cachers.
    for &name in &config.buses.get(kind).middlewares {
        debug!(bus = %kind, middleware = name.as_str(), "Installing middleware");
        match name {
            MiddlewareName::Logger => {
                bus.use_middleware(Logger::new(Arc::clone(&deps.logger)));
            }
            MiddlewareName::Retryer => {
                bus.use_middleware(
                    Retryer::from_policy(config.retry.to_policy())
                        .with_sleeper(Arc::clone(&deps.sleeper)),
                );
            }
            MiddlewareName::Cacher => {
                bus.use_middleware(config.cache.build(Arc::clone(&deps.cache)));
            }
            MiddlewareName::Webhook => {
                let client = deps
                    .http_client
                    .clone()
                    .ok_or_else(|| RuntimeError::MissingHttpClient(kind.to_string()))?;
                bus.use_middleware(config.webhook.build(client, Arc::clone(&deps.sleeper)));
            }
        }
    }
    Ok(bus)
}
