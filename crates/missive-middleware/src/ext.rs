//! Typed shorthands for installing middlewares.
//!
//! `use_cacher` exists only on query buses and `use_async` only on command
//! and event buses, so misplacing either is a compile error.

use missive_core::{Bus, MessageKind, ProducibleKind, Query};

use crate::async_middleware::AsyncMiddleware;
use crate::cacher::Cacher;
use crate::feature_flag::FeatureFlag;
use crate::lock::Lock;
use crate::logger::Logger;
use crate::mocker::Mocker;
use crate::retryer::Retryer;
use crate::webhook::Webhook;

/// Middlewares valid on every bus.
pub trait BusMiddlewareExt {
    fn use_logger(&mut self, logger: Logger) -> &mut Self;
    fn use_retryer(&mut self, retryer: Retryer) -> &mut Self;
    fn use_lock(&mut self, lock: Lock) -> &mut Self;
    fn use_webhook(&mut self, webhook: Webhook) -> &mut Self;
    fn use_feature_flag(&mut self, feature_flag: FeatureFlag) -> &mut Self;
    fn use_mocker(&mut self, mocker: Mocker) -> &mut Self;
}

impl<K: MessageKind> BusMiddlewareExt for Bus<K> {
    fn use_logger(&mut self, logger: Logger) -> &mut Self {
        self.use_middleware(logger)
    }

    fn use_retryer(&mut self, retryer: Retryer) -> &mut Self {
        self.use_middleware(retryer)
    }

    fn use_lock(&mut self, lock: Lock) -> &mut Self {
        self.use_middleware(lock)
    }

    fn use_webhook(&mut self, webhook: Webhook) -> &mut Self {
        self.use_middleware(webhook)
    }

    fn use_feature_flag(&mut self, feature_flag: FeatureFlag) -> &mut Self {
        self.use_middleware(feature_flag)
    }

    fn use_mocker(&mut self, mocker: Mocker) -> &mut Self {
        self.use_middleware(mocker)
    }
}

/// Result caching, for query buses.
pub trait QueryBusExt {
    fn use_cacher(&mut self, cacher: Cacher) -> &mut Self;
}

impl QueryBusExt for Bus<Query> {
    fn use_cacher(&mut self, cacher: Cacher) -> &mut Self {
        self.use_middleware(cacher)
    }
}

/// Producer hand-off, for command and event buses.
pub trait AsyncBusExt {
    fn use_async(&mut self, middleware: AsyncMiddleware) -> &mut Self;
}

impl<K: ProducibleKind> AsyncBusExt for Bus<K> {
    fn use_async(&mut self, middleware: AsyncMiddleware) -> &mut Self {
        self.use_middleware(middleware)
    }
}
