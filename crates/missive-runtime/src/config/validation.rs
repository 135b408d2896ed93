//! Configuration validation utilities.

use missive_core::BusKind;
use missive_middleware::{RetryConfig, RetryOverrides};

use super::error::{ConfigError, ConfigResult};
use super::schema::{BusesConfig, LockConfig, MissiveConfig, WebhookConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &MissiveConfig) -> ConfigResult<()> {
    validate_retry("retry", &config.retry.to_retry_config())?;
    for (ty, overrides) in &config.retry.intents {
        validate_overrides(&format!("retry.intents.{ty}"), &config.retry.to_retry_config(), overrides)?;
    }
    validate_lock(&config.lock)?;
    validate_webhook(&config.webhook)?;
    validate_buses(&config.buses)?;
    Ok(())
}

fn validate_retry(section: &str, retry: &RetryConfig) -> ConfigResult<()> {
    if retry.max_attempts == 0 {
        return Err(ConfigError::validation(format!(
            "{section}: max_attempts must be at least 1"
        )));
    }
    if !(0.0..=1.0).contains(&retry.jitter) {
        return Err(ConfigError::validation(format!(
            "{section}: jitter must be within [0, 1], got {}",
            retry.jitter
        )));
    }
    if retry.multiplier < 1.0 {
        return Err(ConfigError::validation(format!(
            "{section}: multiplier must be at least 1.0, got {}",
            retry.multiplier
        )));
    }
    Ok(())
}

fn validate_overrides(
    section: &str,
    base: &RetryConfig,
    overrides: &RetryOverrides,
) -> ConfigResult<()> {
    validate_retry(section, &base.merged(overrides))
}

fn validate_lock(lock: &LockConfig) -> ConfigResult<()> {
    let check = |section: &str, timings: [(&str, u64); 3]| {
        match timings.iter().find(|(_, ms)| *ms == 0) {
            Some((field, _)) => Err(ConfigError::validation(format!(
                "{section}: {field} must be greater than 0"
            ))),
            None => Ok(()),
        }
    };

    check(
        "lock",
        [
            ("ttl_ms", lock.ttl_ms),
            ("timeout_ms", lock.timeout_ms),
            ("tick_ms", lock.tick_ms),
        ],
    )?;
    for (ty, o) in &lock.intents {
        check(
            &format!("lock.intents.{ty}"),
            [
                ("ttl_ms", o.ttl_ms.unwrap_or(lock.ttl_ms)),
                ("timeout_ms", o.timeout_ms.unwrap_or(lock.timeout_ms)),
                ("tick_ms", o.tick_ms.unwrap_or(lock.tick_ms)),
            ],
        )?;
    }
    Ok(())
}

fn validate_webhook(webhook: &WebhookConfig) -> ConfigResult<()> {
    validate_retry("webhook.retry", &webhook.retry)?;
    for (ty, intent) in &webhook.intents {
        let section = format!("webhook.intents.{ty}");
        validate_overrides(&section, &webhook.retry, &intent.retry)?;
        if intent.endpoints.iter().any(|e| e.url.trim().is_empty()) {
            return Err(ConfigError::validation(format!(
                "{section}: endpoint url must not be empty"
            )));
        }
    }
    Ok(())
}

fn validate_buses(buses: &BusesConfig) -> ConfigResult<()> {
    for kind in [BusKind::Query, BusKind::Command, BusKind::Event] {
        for name in &buses.get(kind).middlewares {
            if !name.allowed_on(kind) {
                return Err(ConfigError::invalid_middleware(kind.as_str(), name.as_str()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{
        EndpointConfig, LockIntentConfig, MiddlewareName, WebhookIntentConfig,
    };

    #[test]
    fn test_default_is_valid() {
        assert!(validate_config(&MissiveConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_bad_retry() {
        let mut config = MissiveConfig::default();
        config.retry.max_attempts = 0;
        assert!(validate_config(&config).is_err());

        let mut config = MissiveConfig::default();
        config.retry.jitter = 1.5;
        assert!(validate_config(&config).is_err());

        let mut config = MissiveConfig::default();
        config.retry.multiplier = 0.5;
        assert!(validate_config(&config).is_err());

        let mut config = MissiveConfig::default();
        config.retry.intents.insert(
            "pay".into(),
            RetryOverrides {
                max_attempts: Some(0),
                ..Default::default()
            },
        );
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("retry.intents.pay"));
    }

    #[test]
    fn test_rejects_zero_lock_timing() {
        let mut config = MissiveConfig::default();
        config.lock.tick_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = MissiveConfig::default();
        config.lock.ttl_ms = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("lock: ttl_ms"), "{err}");

        let mut config = MissiveConfig::default();
        config.lock.intents.insert(
            "transfer".into(),
            LockIntentConfig {
                ttl_ms: Some(0),
                ..Default::default()
            },
        );
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("lock.intents.transfer: ttl_ms"), "{err}");

        let mut config = MissiveConfig::default();
        config.lock.intents.insert(
            "transfer".into(),
            LockIntentConfig {
                timeout_ms: Some(0),
                ..Default::default()
            },
        );
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_empty_endpoint_url() {
        let mut config = MissiveConfig::default();
        config.webhook.intents.insert(
            "order-placed".into(),
            WebhookIntentConfig {
                endpoints: vec![EndpointConfig::default()],
                ..Default::default()
            },
        );
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_middleware_names() {
        let mut config = MissiveConfig::default();
        config.buses.query.middlewares = vec![MiddlewareName::Logger, MiddlewareName::Cacher];
        config.buses.command.middlewares = vec![MiddlewareName::Retryer, MiddlewareName::Webhook];
        assert!(validate_config(&config).is_ok());

        config.buses.event.middlewares = vec![MiddlewareName::Cacher];
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidMiddleware { ref bus, ref name } if bus == "event" && name == "cacher"
        ));
    }
}
