#[derive(Debug, Clone)]
pub struct Config {
    pub kafka: KafkaConfig,
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap broker list.
    pub brokers: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            kafka: KafkaConfig {
                brokers: std::env::var("KAFKA_BROKERS")
                    .unwrap_or_else(|_| "kafka:9092".to_string()),
            },
        })
    }
}
