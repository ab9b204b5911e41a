//! Broker connection target.

use std::fmt;

/// Maximum AMQP frame size negotiated at connect time.
pub const FRAME_MAX: u32 = 0x2000;

/// Immutable address of the message broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub virtual_host: String,
}

impl Default for BrokerEndpoint {
    fn default() -> Self {
        Self {
            protocol: "amqp".to_string(),
            host: "localhost".to_string(),
            port: 5672,
            virtual_host: "/".to_string(),
        }
    }
}

impl BrokerEndpoint {
    /// Builds the endpoint from `RABBITMQ_SERVICE_HOST` and
    /// `RABBITMQ_SERVICE_PORT`, falling back to `localhost:5672`.
    pub fn from_env() -> Self {
        let host = std::env::var("RABBITMQ_SERVICE_HOST")
            .unwrap_or_else(|_| "localhost".to_string());

        let port = std::env::var("RABBITMQ_SERVICE_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5672);

        Self {
            host,
            port,
            ..Self::default()
        }
    }

    /// Renders the AMQP URI, including the fixed frame-size cap.
    pub fn amqp_uri(&self) -> String {
        let vhost = if self.virtual_host == "/" {
            "%2f".to_string()
        } else {
            self.virtual_host.clone()
        };
        format!(
            "{}://{}:{}/{}?frame_max={}",
            self.protocol, self.host, self.port, vhost, FRAME_MAX
        )
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}
