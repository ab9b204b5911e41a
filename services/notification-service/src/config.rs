//! Environment configuration.

use hashtag_broker::{BrokerEndpoint, ExchangeKind, QueueBinding, Topology};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerEndpoint,
    pub exchange: String,
    pub exchange_type: ExchangeKind,
    pub password_reset_queue: String,
    pub password_forget_routing_key: String,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        let exchange = std::env::var("EXCHANGE_NAME")
            .unwrap_or_else(|_| hashtag_events::DEFAULT_EXCHANGE.to_string());

        let exchange_type = std::env::var("EXCHANGE_TYPE")
            .map(|raw| {
                raw.parse().unwrap_or_else(|e| {
                    warn!(error = %e, "falling back to direct exchange");
                    ExchangeKind::Direct
                })
            })
            .unwrap_or(ExchangeKind::Direct);

        let password_reset_queue = std::env::var("PASSWORD_RESET_QUEUE")
            .unwrap_or_else(|_| hashtag_events::PASSWORD_RESET_QUEUE.to_string());

        let password_forget_routing_key = std::env::var("PASSWORD_FORGET_ROUTING_KEY")
            .unwrap_or_else(|_| hashtag_events::PASSWORD_FORGET_ROUTING_KEY.to_string());

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Self {
            broker: BrokerEndpoint::from_env(),
            exchange,
            exchange_type,
            password_reset_queue,
            password_forget_routing_key,
            log_level,
        }
    }

    pub fn topology(&self) -> Topology {
        Topology::new(&self.exchange, self.exchange_type, true)
    }

    pub fn binding(&self) -> QueueBinding {
        QueueBinding::durable(&self.password_reset_queue, &self.password_forget_routing_key)
    }
}
