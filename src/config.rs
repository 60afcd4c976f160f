use std::env;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;

use crate::auth::MIN_SECRET_LEN;
use crate::domain::order::TransitionPolicy;
use crate::orchestrator::EventDelivery;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable '{0}'")]
    Missing(&'static str),

    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,

    pub kafka_brokers: String,
    pub kafka_group_id: String,
    pub order_created_topic: String,

    /// Dedupe falls back to an in-process store when unset.
    pub redis_url: Option<String>,
    pub dedup_ttl: Duration,
    pub dedup_capacity: usize,

    pub auth_secret: String,
    pub auth_leeway_secs: u64,

    pub metrics_port: u16,
    pub side_effect_timeout: Duration,
    pub event_delivery: EventDelivery,
    pub status_transitions: TransitionPolicy,

    pub outbox_poll_interval: Duration,
    pub outbox_batch_size: i64,
    pub outbox_max_attempts: i32,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_url", &"[REDACTED]")
            .field("database_max_connections", &self.database_max_connections)
            .field("kafka_brokers", &self.kafka_brokers)
            .field("kafka_group_id", &self.kafka_group_id)
            .field("order_created_topic", &self.order_created_topic)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("dedup_ttl", &self.dedup_ttl)
            .field("dedup_capacity", &self.dedup_capacity)
            .field("auth_secret", &"[REDACTED]")
            .field("auth_leeway_secs", &self.auth_leeway_secs)
            .field("metrics_port", &self.metrics_port)
            .field("side_effect_timeout", &self.side_effect_timeout)
            .field("event_delivery", &self.event_delivery)
            .field("status_transitions", &self.status_transitions)
            .field("outbox_poll_interval", &self.outbox_poll_interval)
            .field("outbox_batch_size", &self.outbox_batch_size)
            .field("outbox_max_attempts", &self.outbox_max_attempts)
            .finish()
    }
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        let config = Self::from_lookup(|name| env::var(name).ok())?;
        tracing::info!("Application configuration loaded");
        Ok(config)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());

        let auth_secret = get("AUTH_SECRET").ok_or(ConfigError::Missing("AUTH_SECRET"))?;
        if auth_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid {
                name: "AUTH_SECRET",
                reason: format!("must be at least {MIN_SECRET_LEN} bytes"),
            });
        }

        Ok(Self {
            database_url: get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
            kafka_brokers: get("KAFKA_BROKERS").unwrap_or_else(|| "127.0.0.1:9092".to_string()),
            kafka_group_id: get("KAFKA_GROUP_ID").unwrap_or_else(|| "order-flow-consumer".to_string()),
            order_created_topic: get("ORDER_CREATED_TOPIC")
                .unwrap_or_else(|| crate::messaging::ORDER_CREATED_TOPIC.to_string()),
            redis_url: get("REDIS_URL"),
            dedup_ttl: Duration::from_secs(parse_or(&get, "DEDUP_TTL_SECS", 86_400)?),
            dedup_capacity: parse_or(&get, "DEDUP_CAPACITY", 100_000)?,
            auth_secret,
            auth_leeway_secs: parse_or(&get, "AUTH_LEEWAY_SECS", 30)?,
            metrics_port: parse_or(&get, "METRICS_PORT", 9090)?,
            side_effect_timeout: Duration::from_millis(parse_or(&get, "SIDE_EFFECT_TIMEOUT_MS", 2_000)?),
            event_delivery: parse_or(&get, "EVENT_DELIVERY", EventDelivery::Outbox)?,
            status_transitions: parse_or(&get, "STATUS_TRANSITIONS", TransitionPolicy::Enforced)?,
            outbox_poll_interval: Duration::from_millis(parse_or(&get, "OUTBOX_POLL_INTERVAL_MS", 500)?),
            outbox_batch_size: parse_or(&get, "OUTBOX_BATCH_SIZE", 100)?,
            outbox_max_attempts: parse_or(&get, "OUTBOX_MAX_ATTEMPTS", 100)?,
        })
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&'static str) -> Option<String>,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}
