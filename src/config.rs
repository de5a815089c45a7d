use crate::key_strategy::KeyStrategy;
use crate::route::RouteSelector;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FanoutConfig {
    pub route: RouteSelector,
    #[serde(default)]
    pub key: KeyStrategy,
    #[serde(default)]
    pub index: String,
    #[serde(default)]
    pub producer: ProducerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProducerConfig {
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_acks")]
    pub acks: String,
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_queue_max_messages")]
    pub queue_max_messages: usize,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            compression: default_compression(),
            acks: default_acks(),
            linger_ms: default_linger_ms(),
            batch_size: default_batch_size(),
            queue_max_messages: default_queue_max_messages(),
            message_timeout_ms: default_message_timeout_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_compression() -> String {
    "snappy".to_string()
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_linger_ms() -> u32 {
    100
}

fn default_batch_size() -> usize {
    16384
}

fn default_queue_max_messages() -> usize {
    100_000
}

fn default_message_timeout_ms() -> u64 {
    300_000
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_capacity() -> usize {
    100
}

fn default_ttl_secs() -> u64 {
    36_000 // 10 hours of inactivity
}

fn default_sweep_interval_secs() -> u64 {
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_config() {
        let config: FanoutConfig = serde_json::from_str(
            r#"{
                "route": {
                    "cluster": {"field": "meta.cluster"},
                    "topic": {"field": "meta.topic"},
                    "hosts": {"field": "meta.hosts"}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.cache.capacity, 100);
        assert_eq!(config.cache.ttl_secs, 36_000);
        assert_eq!(config.cache.sweep_interval_secs, 2);
        assert_eq!(config.producer.compression, "snappy");
        assert_eq!(config.producer.acks, "all");
        assert!(matches!(config.key, KeyStrategy::None));
    }

    #[test]
    fn test_key_strategy_from_config() {
        let config: FanoutConfig = serde_json::from_str(
            r#"{
                "route": {
                    "cluster": {"constant": "eu-1"},
                    "topic": {"constant": "logs"},
                    "hosts": {"constant": "broker:9092"}
                },
                "key": {"field_path": "user.id"}
            }"#,
        )
        .unwrap();

        assert!(matches!(config.key, KeyStrategy::FieldPath(ref p) if p == "user.id"));
    }
}
