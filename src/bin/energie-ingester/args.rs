use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use maison_energie::{
    ingest::PipelineConfig,
    subscription::{DEFAULT_TOPIC, SubscriptionConfig},
    validate::GasMode,
};

#[derive(Debug, Parser)]
pub struct Args {
    #[arg(long, env = "DATABASE_URL", required_unless_present = "in_memory")]
    pub database_url: Option<String>,

    /// Keep readings in process memory instead of PostgreSQL.
    #[arg(long, env = "IN_MEMORY")]
    pub in_memory: bool,

    #[arg(long, env = "MQTT_HOST", default_value = "localhost")]
    pub mqtt_host: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    #[arg(long, env = "MQTT_CLIENT_ID", default_value = "maison-energie-ingester")]
    pub mqtt_client_id: String,

    #[arg(long, env = "MQTT_USERNAME", requires = "mqtt_password")]
    pub mqtt_username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD", requires = "mqtt_username")]
    pub mqtt_password: Option<String>,

    #[arg(long, env = "MQTT_TOPIC", default_value = DEFAULT_TOPIC)]
    pub mqtt_topic: String,

    #[arg(long, env = "MQTT_KEEP_ALIVE_SECS", default_value_t = 30)]
    pub mqtt_keep_alive_secs: u64,

    #[arg(long, env = "RECONNECT_INTERVAL_SECS", default_value_t = 5)]
    pub reconnect_interval_secs: u64,

    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8000")]
    pub http_addr: SocketAddr,

    #[arg(long, env = "STORE_TIMEOUT_MS", default_value_t = 5000)]
    pub store_timeout_ms: u64,

    /// Hard ceiling on readings returned by one query.
    #[arg(long, env = "QUERY_CAP", default_value_t = 1000)]
    pub query_cap: usize,

    /// Readings returned when the query has no limit.
    #[arg(long, env = "DEFAULT_LIMIT", default_value_t = 100)]
    pub default_limit: usize,

    #[arg(long, env = "GAS_MODE", default_value_t = GasMode::Auto)]
    pub gas_mode: GasMode,

    /// Bus messages buffered between the broker connection and the store.
    #[arg(long, env = "INGEST_QUEUE", default_value_t = 1024)]
    pub ingest_queue: usize,
}

impl Args {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            gas_mode: self.gas_mode,
            store_timeout: self.store_timeout(),
            query_cap: self.query_cap,
        }
    }

    pub fn subscription_config(&self) -> SubscriptionConfig {
        SubscriptionConfig {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            client_id: self.mqtt_client_id.clone(),
            credentials: self.mqtt_username.clone().zip(self.mqtt_password.clone()),
            topic: self.mqtt_topic.clone(),
            keep_alive: Duration::from_secs(self.mqtt_keep_alive_secs),
            reconnect_interval: Duration::from_secs(self.reconnect_interval_secs),
        }
    }
}
