// Layered configuration (file, environment)

use crate::queue::NatsTopicConfig;
use crate::runner::RunnerStrategy;
use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub engine: EngineConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub url: String,
    pub stream_name: String,
    pub subject_prefix: String,
    pub consumer_prefix: String,
    pub max_deliver: i64,
    pub max_age_seconds: u64,
    pub ack_wait_seconds: u64,
    pub publish_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Runner strategy for the whole process.
    pub runner_strategy: RunnerStrategy,
    /// IANA timezone poll schedules are evaluated in.
    pub default_timezone: String,
    /// Bound on the graceful-shutdown drain.
    pub shutdown_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: u16,
}

impl EngineConfig {
    pub fn default_timezone(&self) -> Result<Tz, String> {
        Tz::from_str(&self.default_timezone)
            .map_err(|_| format!("Invalid default timezone '{}'", self.default_timezone))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

impl QueueConfig {
    pub fn to_nats_config(&self) -> NatsTopicConfig {
        NatsTopicConfig {
            url: self.url.clone(),
            stream_name: self.stream_name.clone(),
            subject_prefix: self.subject_prefix.clone(),
            max_age_seconds: self.max_age_seconds,
            max_messages: 1_000_000,
            consumer_prefix: self.consumer_prefix.clone(),
            max_deliver: self.max_deliver,
            ack_wait_seconds: self.ack_wait_seconds,
            publish_timeout_seconds: self.publish_timeout_seconds,
        }
    }
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default configuration
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // Add environment-specific configuration
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }

        if matches!(self.engine.runner_strategy, RunnerStrategy::Queued) {
            if self.queue.url.is_empty() {
                return Err("Queue URL cannot be empty for the queued runner".to_string());
            }
            if self.queue.stream_name.is_empty() {
                return Err("Queue stream_name cannot be empty for the queued runner".to_string());
            }
            if self.queue.subject_prefix.is_empty() {
                return Err(
                    "Queue subject_prefix cannot be empty for the queued runner".to_string()
                );
            }
        }

        self.engine.default_timezone()?;
        if self.engine.shutdown_timeout_seconds == 0 {
            return Err("Engine shutdown_timeout_seconds must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/triggers".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_seconds: 30,
            },
            queue: QueueConfig {
                url: "nats://localhost:4222".to_string(),
                stream_name: "TRIGGERS".to_string(),
                subject_prefix: "triggers".to_string(),
                consumer_prefix: "trigger-workers".to_string(),
                max_deliver: 10,
                max_age_seconds: 86400,
                ack_wait_seconds: 300,
                publish_timeout_seconds: 5,
            },
            engine: EngineConfig {
                runner_strategy: RunnerStrategy::Direct,
                default_timezone: "UTC".to_string(),
                shutdown_timeout_seconds: 30,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: 9090,
            },
        }
    }
}
