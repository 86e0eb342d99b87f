use crate::error::{Error, Result};
use crate::supervisor::RetryPolicy;
use clap::Args;
use std::time::Duration;

/// Configuration for the span consumer.
#[derive(Debug, Clone, Args)]
pub struct ConsumerConfig {
    /// Kafka brokers (comma-separated or multiple --brokers)
    #[arg(long, value_delimiter = ',', required = true, env = "KAFKA_BROKERS")]
    pub brokers: Vec<String>,

    /// Consumer group ID
    ///
    /// Every instance sharing a group id splits the topic's partitions.
    #[arg(long, default_value = "span-balance", env = "KAFKA_GROUP_ID")]
    pub group_id: String,

    /// Topic to consume spans from
    #[arg(long, env = "KAFKA_TOPIC")]
    pub topic: String,

    /// Auto offset reset strategy ("earliest" or "latest")
    ///
    /// Only used when the group has no committed offset for a partition.
    #[arg(long, default_value = "earliest")]
    pub auto_offset_reset: String,

    /// Session timeout in milliseconds
    #[arg(long, default_value_t = 30000)]
    pub session_timeout_ms: u32,

    /// Messages buffered per claimed partition before fetching pauses
    #[arg(long, default_value_t = 1000)]
    pub claim_buffer_size: usize,

    /// Stop after this many consumer group sessions fail in a row.
    /// Unset retries forever.
    #[arg(long)]
    pub max_session_failures: Option<u32>,

    /// Pause between failed session attempts, in milliseconds
    #[arg(long, default_value_t = 0)]
    pub retry_delay_ms: u64,

    /// Timeout for the startup metadata probe, in milliseconds
    #[arg(long, default_value_t = 10000)]
    pub metadata_timeout_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            group_id: "span-balance".to_string(),
            topic: "".to_string(),
            auto_offset_reset: "earliest".to_string(),
            session_timeout_ms: 30000,
            claim_buffer_size: 1000,
            max_session_failures: None,
            retry_delay_ms: 0,
            metadata_timeout_ms: 10000,
        }
    }
}

impl ConsumerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.brokers.iter().all(|b| b.trim().is_empty()) {
            return Err(Error::InvalidConfig("at least one broker is required".to_string()));
        }
        if self.group_id.trim().is_empty() {
            return Err(Error::InvalidConfig("group id must not be empty".to_string()));
        }
        if self.topic.trim().is_empty() {
            return Err(Error::InvalidConfig("topic must not be empty".to_string()));
        }
        if self.claim_buffer_size == 0 {
            return Err(Error::InvalidConfig(
                "claim buffer size must be at least 1".to_string(),
            ));
        }
        match self.auto_offset_reset.as_str() {
            "earliest" | "latest" => Ok(()),
            other => Err(Error::InvalidConfig(format!(
                "auto offset reset must be \"earliest\" or \"latest\", got \"{other}\""
            ))),
        }
    }

    pub fn bootstrap_servers(&self) -> String {
        self.brokers
            .iter()
            .map(|b| b.trim())
            .filter(|b| !b.is_empty())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_consecutive_failures: self.max_session_failures,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        config: ConsumerConfig,
    }

    fn valid_config() -> ConsumerConfig {
        ConsumerConfig {
            topic: "spans".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_from_args() {
        let cli = Cli::try_parse_from([
            "test",
            "--brokers",
            "kafka-1:9092,kafka-2:9092",
            "--topic",
            "spans",
            "--max-session-failures",
            "5",
            "--retry-delay-ms",
            "250",
        ])
        .unwrap();

        assert_eq!(cli.config.brokers, vec!["kafka-1:9092", "kafka-2:9092"]);
        assert_eq!(cli.config.group_id, "span-balance");
        assert_eq!(cli.config.auto_offset_reset, "earliest");
        assert_eq!(
            cli.config.retry_policy(),
            RetryPolicy::bounded(5, Duration::from_millis(250))
        );
    }

    #[test]
    fn test_default_retry_policy_is_unlimited() {
        assert_eq!(valid_config().retry_policy(), RetryPolicy::unlimited());
    }

    #[test]
    fn test_validate_accepts_defaults_with_topic() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_topic() {
        let config = ConsumerConfig::default();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_blank_brokers() {
        let config = ConsumerConfig {
            brokers: vec![" ".to_string()],
            ..valid_config()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_offset_reset() {
        let config = ConsumerConfig {
            auto_offset_reset: "smallest-ish".to_string(),
            ..valid_config()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_zero_buffer() {
        let config = ConsumerConfig {
            claim_buffer_size: 0,
            ..valid_config()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_bootstrap_servers_skips_blanks() {
        let config = ConsumerConfig {
            brokers: vec!["a:9092".to_string(), " ".to_string(), " b:9092".to_string()],
            ..valid_config()
        };
        assert_eq!(config.bootstrap_servers(), "a:9092,b:9092");
    }
}
