//! Exchange adapters
//!
//! Every exchange plugs into the backfill engine through [`ExchangeAdapter`]:
//! paged historical-trade retrieval, cursor derivation, the scan direction it
//! supports, and an optional pause between requests. Adapters are resolved
//! once at startup through [`ExchangeRegistry`].

pub mod binance;
pub mod coinbase;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::ExchangesConfig;
use crate::models::{Cursor, ExchangeTrade, Product};

pub use binance::BinanceAdapter;
pub use coinbase::CoinbaseAdapter;

// =============================================================================
// CAPABILITIES
// =============================================================================

/// Direction in which an exchange lets us walk its trade history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanDirection {
    /// From now toward the past.
    Backward,
    /// From a start point toward an end point.
    Forward,
}

impl fmt::Display for ScanDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanDirection::Backward => f.write_str("backward"),
            ScanDirection::Forward => f.write_str("forward"),
        }
    }
}

/// Parameters of one page request.
///
/// Backward scans set `to` (trades at or before that cursor, newest first);
/// forward scans set `from` (trades at or after that cursor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeQuery {
    pub product_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Cursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Cursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl TradeQuery {
    pub fn new(product_id: &str) -> Self {
        Self {
            product_id: product_id.to_string(),
            from: None,
            to: None,
            offset: None,
        }
    }
}

impl fmt::Display for TradeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{product_id: {}", self.product_id)?;
        if let Some(from) = self.from {
            write!(f, ", from: {}", from)?;
        }
        if let Some(to) = self.to {
            write!(f, ", to: {}", to)?;
        }
        if let Some(offset) = self.offset {
            write!(f, ", offset: {}", offset)?;
        }
        f.write_str("}")
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// Timeout, name resolution failure, connection reset, remote 5xx/429.
    #[error("transient transport error: {0}")]
    Transient(String),
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: reqwest::StatusCode, body: &str, what: &str) -> Self {
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            FetchError::Transient(format!("{} {}: {}", what, status, body))
        } else {
            FetchError::Fatal(anyhow::anyhow!("{} {}: {}", what, status, body))
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            FetchError::Transient(e.to_string())
        } else {
            FetchError::Fatal(e.into())
        }
    }
}

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Registry identifier, the `<exchange>` part of a selector.
    fn name(&self) -> &str;

    /// `None` when the exchange offers no historical trades.
    fn history_scan(&self) -> Option<ScanDirection>;

    /// Minimum pause between consecutive backfill requests.
    fn backfill_rate_limit(&self) -> Option<Duration> {
        None
    }

    /// Paging offset passed through on every request.
    fn offset(&self) -> Option<u64> {
        None
    }

    /// Tradable pairs, for `list-selectors`.
    fn products(&self) -> Vec<Product> {
        Vec::new()
    }

    /// Cursor positioned at a wall-clock time. Forward scanners must support it.
    fn cursor_for_time(&self, _time_ms: i64) -> Option<Cursor> {
        None
    }

    fn cursor_for_trade(&self, trade: &ExchangeTrade) -> Cursor;

    async fn get_trades(&self, query: &TradeQuery) -> Result<Vec<ExchangeTrade>, FetchError>;
}

impl fmt::Debug for dyn ExchangeAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeAdapter").field("name", &self.name()).finish()
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Default, Clone)]
pub struct ExchangeRegistry {
    adapters: BTreeMap<String, Arc<dyn ExchangeAdapter>>,
}

impl ExchangeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in adapter.
    pub fn with_defaults(config: &ExchangesConfig) -> anyhow::Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(BinanceAdapter::new(config)?));
        registry.register(Arc::new(CoinbaseAdapter::new(config)?));
        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn ExchangeAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, exchange_id: &str) -> Option<Arc<dyn ExchangeAdapter>> {
        self.adapters.get(exchange_id).cloned()
    }

    /// Registered exchange ids, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    /// Products per exchange for `list-selectors`. Exchanges left with no
    /// products after the asset filter are omitted.
    pub fn listing(
        &self,
        exchange: Option<&str>,
        asset: Option<&str>,
    ) -> anyhow::Result<Vec<(String, Vec<Product>)>> {
        let adapters: Vec<(&String, &Arc<dyn ExchangeAdapter>)> = match exchange {
            Some(id) => {
                let id = id.to_lowercase();
                let entry = self
                    .adapters
                    .get_key_value(&id)
                    .ok_or_else(|| anyhow::anyhow!("Unknown exchange: {}", id))?;
                vec![entry]
            }
            None => self.adapters.iter().collect(),
        };

        Ok(adapters
            .into_iter()
            .map(|(id, adapter)| (id.clone(), sorted_products(adapter.as_ref(), asset)))
            .filter(|(_, products)| !products.is_empty())
            .collect())
    }
}

/// Products of one exchange, optionally restricted to an asset, sorted by
/// asset then currency.
pub fn sorted_products(adapter: &dyn ExchangeAdapter, asset: Option<&str>) -> Vec<Product> {
    let mut products: Vec<Product> = adapter
        .products()
        .into_iter()
        .filter(|p| asset.map_or(true, |a| p.asset.eq_ignore_ascii_case(a)))
        .collect();
    products.sort_by(|a, b| a.asset.cmp(&b.asset).then_with(|| a.currency.cmp(&b.currency)));
    products
}
