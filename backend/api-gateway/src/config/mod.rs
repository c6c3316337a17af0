#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub kafka: KafkaConfig,
    pub idempotency: IdempotencyConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap broker list.
    pub brokers: String,
}

#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    pub aws_region: String,
    /// Endpoint override for local DynamoDB stacks; unset means AWS.
    pub endpoint_url: Option<String>,
    pub table_name: String,
    pub ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            app: AppConfig {
                port: std::env::var("HTTP_PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()?,
            },
            kafka: KafkaConfig {
                brokers: std::env::var("KAFKA_BROKERS")
                    .unwrap_or_else(|_| "kafka:9092".to_string()),
            },
            idempotency: IdempotencyConfig {
                aws_region: std::env::var("AWS_REGION")
                    .unwrap_or_else(|_| "us-east-1".to_string()),
                endpoint_url: std::env::var("DYNAMODB_URL").ok().filter(|v| !v.is_empty()),
                table_name: std::env::var("IDEMPOTENCY_TABLE")
                    .unwrap_or_else(|_| "idempotency_keys".to_string()),
                ttl_secs: std::env::var("IDEMPOTENCY_TTL_SECS")
                    .unwrap_or_else(|_| "86400".to_string())
                    .parse()?,
            },
        })
    }
}
