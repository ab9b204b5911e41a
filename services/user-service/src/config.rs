//! Environment configuration.

use hashtag_broker::{BrokerEndpoint, ExchangeKind, Topology};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerEndpoint,
    pub exchange: String,
    pub exchange_type: ExchangeKind,
    pub password_forget_routing_key: String,
    /// Base of the frontend link embedded in reset emails.
    pub reset_url_base: String,
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

        let password_forget_routing_key = std::env::var("PASSWORD_FORGET_ROUTING_KEY")
            .unwrap_or_else(|_| hashtag_events::PASSWORD_FORGET_ROUTING_KEY.to_string());

        let frontend_host =
            std::env::var("FRONTEND_SERVING_HOST").unwrap_or_else(|_| "localhost".to_string());
        let frontend_port = std::env::var("FRONTEND_SERVING_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(4200);

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Self {
            broker: BrokerEndpoint::from_env(),
            exchange,
            exchange_type,
            password_forget_routing_key,
            reset_url_base: format!("http://{frontend_host}:{frontend_port}"),
            log_level,
        }
    }

    pub fn topology(&self) -> Topology {
        Topology::new(&self.exchange, self.exchange_type, true)
    }
}
