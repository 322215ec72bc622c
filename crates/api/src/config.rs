//! Application configuration loaded from environment variables.

use std::fmt;
use std::str::FromStr;

use domain::contracts::{CHECK_PRODUCT_QUANTITY, CREATE_ORDER, GET_TOTAL_PRICE};
use messaging::BrokerConfig;
use saga::CoordinatorConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// RPC endpoint names used by the order service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub check_product_quantity: String,
    pub get_total_price: String,
    pub create_order: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            check_product_quantity: CHECK_PRODUCT_QUANTITY.to_string(),
            get_total_price: GET_TOTAL_PRICE.to_string(),
            create_order: CREATE_ORDER.to_string(),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `RPC_CHECK_PRODUCT_QUANTITY`, `RPC_GET_TOTAL_PRICE`, `RPC_CREATE_ORDER`:
///   endpoint names
/// - broker settings, see [`BrokerConfig::from_env`]
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub broker: BrokerConfig,
    pub endpoints: Endpoints,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Endpoints::default();
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: std::env::var("LOG_FORMAT")
                .ok()
                .and_then(|f| f.parse().ok())
                .unwrap_or_default(),
            broker: BrokerConfig::from_env(),
            endpoints: Endpoints {
                check_product_quantity: std::env::var("RPC_CHECK_PRODUCT_QUANTITY")
                    .unwrap_or(defaults.check_product_quantity),
                get_total_price: std::env::var("RPC_GET_TOTAL_PRICE")
                    .unwrap_or(defaults.get_total_price),
                create_order: std::env::var("RPC_CREATE_ORDER").unwrap_or(defaults.create_order),
            },
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Exchange and endpoint names for the order coordinator.
    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            exchange: self.broker.exchange.clone(),
            check_quantity_endpoint: self.endpoints.check_product_quantity.clone(),
            total_price_endpoint: self.endpoints.get_total_price.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            broker: BrokerConfig::default(),
            endpoints: Endpoints::default(),
        }
    }
}
