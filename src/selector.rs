//! Market selector parsing.
//!
//! A selector names an exchange and a trading pair, e.g. `binance.ADA-USDT`.
//! The exchange part is case-insensitive and stored lowercase; the pair is
//! stored uppercase. `normalized` is the join key used across the trade and
//! marker tables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,
    #[error("selector `{0}` must look like <exchange>.<ASSET>-<CURRENCY>")]
    MissingExchange(String),
    #[error("selector `{0}` has no `<ASSET>-<CURRENCY>` pair")]
    MalformedPair(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selector {
    pub exchange_id: String,
    pub product_id: String,
    pub asset: String,
    pub currency: String,
    pub normalized: String,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SelectorError::Empty);
        }

        let (exchange, product) = input
            .split_once('.')
            .filter(|(e, p)| !e.is_empty() && !p.is_empty())
            .ok_or_else(|| SelectorError::MissingExchange(input.to_string()))?;

        let product_id = product.to_uppercase();
        let (asset, currency) = product_id
            .split_once('-')
            .filter(|(a, c)| !a.is_empty() && !c.is_empty() && !c.contains('-'))
            .ok_or_else(|| SelectorError::MalformedPair(input.to_string()))?;

        let exchange_id = exchange.to_lowercase();
        Ok(Self {
            normalized: format!("{}.{}", exchange_id, product_id),
            asset: asset.to_string(),
            currency: currency.to_string(),
            exchange_id,
            product_id: product_id.clone(),
        })
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_case() {
        let s = Selector::parse("  Binance.ada-usdt ").unwrap();
        assert_eq!(s.exchange_id, "binance");
        assert_eq!(s.product_id, "ADA-USDT");
        assert_eq!(s.asset, "ADA");
        assert_eq!(s.currency, "USDT");
        assert_eq!(s.normalized, "binance.ADA-USDT");
        assert_eq!(s.to_string(), "binance.ADA-USDT");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(Selector::parse(""), Err(SelectorError::Empty));
        assert!(matches!(
            Selector::parse("BTC-USD"),
            Err(SelectorError::MissingExchange(_))
        ));
        assert!(matches!(
            Selector::parse("coinbase."),
            Err(SelectorError::MissingExchange(_))
        ));
        assert!(matches!(
            Selector::parse("coinbase.BTCUSD"),
            Err(SelectorError::MalformedPair(_))
        ));
        assert!(matches!(
            Selector::parse("coinbase.BTC-"),
            Err(SelectorError::MalformedPair(_))
        ));
    }

    #[test]
    fn test_from_str() {
        let s: Selector = "coinbase.BTC-USD".parse().unwrap();
        assert_eq!(s.exchange_id, "coinbase");
    }
}
