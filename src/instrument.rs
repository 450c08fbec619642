//! FX instrument metadata and pip arithmetic

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Symbol;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InstrumentError {
    #[error("invalid FX symbol '{0}': expected BASE/QUOTE (e.g. EUR/USD) or BASEQUOTE")]
    InvalidSymbol(String),
}

/// Currency pair traded on a venue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: Symbol,
    pub venue: String,
    pub base: String,
    pub quote: String,
    pip_size: Decimal,
    price_precision: u32,
}

impl Instrument {
    /// Parse `EUR/USD` or `EURUSD` on the given venue
    pub fn parse(symbol: &str, venue: &str) -> Result<Self, InstrumentError> {
        let cleaned = symbol.trim().to_ascii_uppercase();
        let (base, quote) = match cleaned.split_once('/') {
            Some((b, q)) => (b.to_string(), q.to_string()),
            None if cleaned.len() == 6 && cleaned.is_ascii() => {
                (cleaned[..3].to_string(), cleaned[3..].to_string())
            }
            None => return Err(InstrumentError::InvalidSymbol(symbol.to_string())),
        };

        let is_ccy = |s: &str| s.len() == 3 && s.chars().all(|c| c.is_ascii_alphabetic());
        if !is_ccy(&base) || !is_ccy(&quote) {
            return Err(InstrumentError::InvalidSymbol(symbol.to_string()));
        }

        // JPY crosses quote to 2/3 decimals, everything else to 4/5
        let (pip_size, price_precision) = if quote == "JPY" {
            (dec!(0.01), 3)
        } else {
            (dec!(0.0001), 5)
        };

        Ok(Self {
            symbol: Symbol::new(format!("{}/{}", base, quote)),
            venue: venue.trim().to_ascii_uppercase(),
            base,
            quote,
            pip_size,
            price_precision,
        })
    }

    /// `EUR/USD.IDEALPRO`
    pub fn instrument_id(&self) -> String {
        format!("{}.{}", self.symbol, self.venue)
    }

    /// `EURUSD`, used for catalog directory names
    pub fn file_key(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }

    pub fn pip_size(&self) -> f64 {
        self.pip_size.to_f64().unwrap_or(0.0001)
    }

    pub fn price_precision(&self) -> u32 {
        self.price_precision
    }

    /// Convert a pip distance into a price distance
    pub fn pips_to_price(&self, pips: f64) -> f64 {
        match Decimal::from_f64(pips) {
            Some(p) => (p * self.pip_size).to_f64().unwrap_or(0.0),
            None => pips * self.pip_size(),
        }
    }

    /// Convert a price distance into pips
    pub fn price_to_pips(&self, distance: f64) -> f64 {
        distance / self.pip_size()
    }

    /// Quantize a price to the instrument's precision (half away from zero)
    pub fn round_price(&self, price: f64) -> f64 {
        match Decimal::from_f64(price) {
            Some(d) => d
                .round_dp_with_strategy(self.price_precision, RoundingStrategy::MidpointAwayFromZero)
                .to_f64()
                .unwrap_or(price),
            None => price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_slash_and_compact_forms() {
        let a = Instrument::parse("EUR/USD", "idealpro").unwrap();
        let b = Instrument::parse("eurusd", "IDEALPRO").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.instrument_id(), "EUR/USD.IDEALPRO");
        assert_eq!(a.file_key(), "EURUSD");
    }

    #[test]
    fn test_pip_sizes() {
        let eur = Instrument::parse("EUR/USD", "IDEALPRO").unwrap();
        let jpy = Instrument::parse("USD/JPY", "IDEALPRO").unwrap();
        assert_relative_eq!(eur.pip_size(), 0.0001);
        assert_relative_eq!(jpy.pip_size(), 0.01);
        assert_relative_eq!(eur.pips_to_price(25.0), 0.0025);
        assert_relative_eq!(jpy.pips_to_price(25.0), 0.25);
        assert_relative_eq!(eur.price_to_pips(0.0015), 15.0, epsilon = 1e-9);
    }

    #[test]
    fn test_round_price() {
        let eur = Instrument::parse("EUR/USD", "IDEALPRO").unwrap();
        assert_relative_eq!(eur.round_price(1.123456), 1.12346);
        let jpy = Instrument::parse("USD/JPY", "IDEALPRO").unwrap();
        assert_relative_eq!(jpy.round_price(151.12345), 151.123);
    }

    #[test]
    fn test_invalid_symbols() {
        assert!(Instrument::parse("EURUSDX", "IDEALPRO").is_err());
        assert!(Instrument::parse("EU/USD", "IDEALPRO").is_err());
        assert!(Instrument::parse("123/456", "IDEALPRO").is_err());
    }
}
