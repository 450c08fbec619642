//! Interactive Brokers gateway settings
//!
//! Only settings validation and error classification live here. The
//! connection itself belongs to the execution framework.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Market data subscription type requested from the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketDataType {
    Realtime,
    Frozen,
    Delayed,
    DelayedFrozen,
}

impl MarketDataType {
    /// Numeric code used by the TWS API
    pub fn code(self) -> u8 {
        match self {
            MarketDataType::Realtime => 1,
            MarketDataType::Frozen => 2,
            MarketDataType::Delayed => 3,
            MarketDataType::DelayedFrozen => 4,
        }
    }
}

impl fmt::Display for MarketDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MarketDataType::Realtime => "REALTIME",
            MarketDataType::Frozen => "FROZEN",
            MarketDataType::Delayed => "DELAYED",
            MarketDataType::DelayedFrozen => "DELAYED_FROZEN",
        };
        f.write_str(s)
    }
}

impl FromStr for MarketDataType {
    type Err = IbkrSettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "REALTIME" | "LIVE" | "1" => Ok(MarketDataType::Realtime),
            "FROZEN" | "2" => Ok(MarketDataType::Frozen),
            "DELAYED" | "3" => Ok(MarketDataType::Delayed),
            "DELAYED_FROZEN" | "4" => Ok(MarketDataType::DelayedFrozen),
            _ => Err(IbkrSettingsError::UnknownMarketDataType(s.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IbkrSettingsError {
    #[error("IB_HOST must not be empty")]
    EmptyHost,

    #[error("IB_PORT must be non-zero")]
    InvalidPort,

    #[error("IB_CLIENT_ID must be non-negative (got {0})")]
    NegativeClientId(i32),

    #[error("unknown IB_MARKET_DATA_TYPE '{0}' (expected REALTIME, FROZEN, DELAYED or DELAYED_FROZEN)")]
    UnknownMarketDataType(String),

    #[error("account id '{account}' looks like a {kind} account but port {port} is a {port_kind} port")]
    AccountPortMismatch {
        account: String,
        kind: &'static str,
        port: u16,
        port_kind: &'static str,
    },
}

/// TWS / IB Gateway connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IbkrSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: i32,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default = "default_market_data_type")]
    pub market_data_type: MarketDataType,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7497
}

fn default_client_id() -> i32 {
    1
}

fn default_market_data_type() -> MarketDataType {
    MarketDataType::DelayedFrozen
}

impl Default for IbkrSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: default_client_id(),
            account_id: None,
            market_data_type: default_market_data_type(),
        }
    }
}

/// TWS paper and IB Gateway paper
const PAPER_PORTS: [u16; 2] = [7497, 4002];

impl IbkrSettings {
    pub fn is_paper(&self) -> bool {
        PAPER_PORTS.contains(&self.port)
    }

    /// `host:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), IbkrSettingsError> {
        if self.host.trim().is_empty() {
            return Err(IbkrSettingsError::EmptyHost);
        }
        if self.port == 0 {
            return Err(IbkrSettingsError::InvalidPort);
        }
        if self.client_id < 0 {
            return Err(IbkrSettingsError::NegativeClientId(self.client_id));
        }

        // Paper accounts are prefixed with "DU"; a live port with a paper
        // account (or the reverse) is almost always a typo.
        if let Some(account) = &self.account_id {
            let paper_account = account.to_ascii_uppercase().starts_with("DU");
            if paper_account != self.is_paper() {
                let (kind, port_kind) = if paper_account {
                    ("paper", "live")
                } else {
                    ("live", "paper")
                };
                return Err(IbkrSettingsError::AccountPortMismatch {
                    account: account.clone(),
                    kind,
                    port: self.port,
                    port_kind,
                });
            }
        }
        Ok(())
    }
}

/// Broker gateway failures surfaced by the execution framework
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Client ID in use: {0}")]
    ClientIdInUse(String),

    #[error("Gateway error: {0}")]
    Other(String),
}

impl GatewayError {
    /// Map raw gateway/framework error text onto a known failure
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("connection refused")
            || lower.contains("couldn't connect")
            || lower.contains("error 502")
            || lower.contains("code=502")
        {
            GatewayError::ConnectionRefused(message.to_string())
        } else if (lower.contains("client id")
            && (lower.contains("in use") || lower.contains("already")))
            || lower.contains("error 326")
            || lower.contains("code=326")
        {
            GatewayError::ClientIdInUse(message.to_string())
        } else {
            GatewayError::Other(message.to_string())
        }
    }

    /// Operator hint for the failure
    pub fn remediation(&self, settings: &IbkrSettings) -> String {
        match self {
            GatewayError::ConnectionRefused(_) => format!(
                "Start TWS or IB Gateway, enable API socket clients, and check that it listens on {} ({} port)",
                settings.endpoint(),
                if settings.is_paper() { "paper" } else { "live" }
            ),
            GatewayError::ClientIdInUse(_) => format!(
                "Another session already uses client id {}. Close it or set IB_CLIENT_ID to a free id",
                settings.client_id
            ),
            GatewayError::Other(_) => {
                "Check the gateway log and the API settings in TWS / IB Gateway".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_paper() {
        let s = IbkrSettings::default();
        assert!(s.is_paper());
        assert_eq!(s.endpoint(), "127.0.0.1:7497");
        assert_eq!(s.market_data_type, MarketDataType::DelayedFrozen);
        assert_eq!(s.validate(), Ok(()));
    }

    #[test]
    fn test_gateway_paper_port() {
        let s = IbkrSettings {
            port: 4002,
            ..Default::default()
        };
        assert!(s.is_paper());
        let live = IbkrSettings {
            port: 7496,
            ..Default::default()
        };
        assert!(!live.is_paper());
    }

    #[test]
    fn test_account_port_mismatch() {
        let s = IbkrSettings {
            port: 7496,
            account_id: Some("DU1234567".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            s.validate(),
            Err(IbkrSettingsError::AccountPortMismatch { kind: "paper", .. })
        ));
    }

    #[test]
    fn test_market_data_type_parse() {
        assert_eq!("delayed_frozen".parse(), Ok(MarketDataType::DelayedFrozen));
        assert_eq!("1".parse(), Ok(MarketDataType::Realtime));
        assert!("SNAPSHOT".parse::<MarketDataType>().is_err());
        assert_eq!(MarketDataType::Delayed.code(), 3);
    }

    #[test]
    fn test_classify_gateway_errors() {
        assert!(matches!(
            GatewayError::classify("[Errno 111] Connection refused"),
            GatewayError::ConnectionRefused(_)
        ));
        assert!(matches!(
            GatewayError::classify("Error 326: Unable to connect as the client id is already in use"),
            GatewayError::ClientIdInUse(_)
        ));
        assert!(matches!(
            GatewayError::classify("Error 200: No security definition"),
            GatewayError::Other(_)
        ));
    }

    #[test]
    fn test_remediation_mentions_settings() {
        let s = IbkrSettings::default();
        let hint = GatewayError::ClientIdInUse(String::new()).remediation(&s);
        assert!(hint.contains("client id 1"));
        let hint = GatewayError::ConnectionRefused(String::new()).remediation(&s);
        assert!(hint.contains("127.0.0.1:7497"));
    }
}
