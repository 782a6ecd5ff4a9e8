//! Coinbase Exchange trades adapter
//!
//! Backward scan over `/products/{id}/trades`. The cursor is the numeric
//! trade id; `after=<id>` returns the page of trades older than that id.

use anyhow::Context;
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{ExchangeAdapter, FetchError, ScanDirection, TradeQuery};
use crate::config::ExchangesConfig;
use crate::models::{Cursor, ExchangeTrade, Product};

const PAGE_LIMIT: u32 = 1000;
/// Public endpoints allow roughly three requests per second.
const RATE_LIMIT: Duration = Duration::from_millis(335);

#[derive(Debug, Deserialize)]
struct CoinbaseTrade {
    time: String,
    trade_id: i64,
    price: String,
    size: String,
    side: String,
}

impl TryFrom<CoinbaseTrade> for ExchangeTrade {
    type Error = anyhow::Error;

    fn try_from(t: CoinbaseTrade) -> anyhow::Result<Self> {
        let time = DateTime::parse_from_rfc3339(&t.time)
            .with_context(|| format!("Invalid trade time: {}", t.time))?
            .timestamp_millis();
        Ok(
            ExchangeTrade::new(t.trade_id.to_string(), time).with_payload(serde_json::json!({
                "price": t.price,
                "size": t.size,
                "side": t.side,
            })),
        )
    }
}

#[derive(Clone)]
pub struct CoinbaseAdapter {
    client: Client,
    base_url: String,
}

impl CoinbaseAdapter {
    pub fn new(config: &ExchangesConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("trade-backfill/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(4)
            .build()
            .context("Failed to build Coinbase HTTP client")?;

        Ok(Self {
            client,
            base_url: config.coinbase_api_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ExchangeAdapter for CoinbaseAdapter {
    fn name(&self) -> &str {
        "coinbase"
    }

    fn history_scan(&self) -> Option<ScanDirection> {
        Some(ScanDirection::Backward)
    }

    fn backfill_rate_limit(&self) -> Option<Duration> {
        Some(RATE_LIMIT)
    }

    fn products(&self) -> Vec<Product> {
        vec![
            Product::new("BTC", "USD"),
            Product::new("BTC", "EUR"),
            Product::new("ETH", "USD"),
            Product::new("ETH", "BTC"),
            Product::new("LTC", "USD"),
            Product::new("SOL", "USD"),
            Product::new("USDT", "USD").with_label("Tether"),
        ]
    }

    fn cursor_for_trade(&self, trade: &ExchangeTrade) -> Cursor {
        // trade_id is always an integer on this exchange
        trade.trade_id.parse().unwrap_or_default()
    }

    async fn get_trades(&self, query: &TradeQuery) -> Result<Vec<ExchangeTrade>, FetchError> {
        let url = format!("{}/products/{}/trades", self.base_url, query.product_id);
        let mut qp: Vec<(&str, String)> = Vec::with_capacity(2);
        qp.push(("limit", PAGE_LIMIT.to_string()));
        if let Some(to) = query.to {
            qp.push(("after", to.to_string()));
        }

        let resp = self.client.get(&url).query(&qp).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(FetchError::from_status(status, &text, "GET /products/trades"));
        }

        let trades: Vec<CoinbaseTrade> = resp
            .json()
            .await
            .context("Failed to parse trades response")?;

        let trades = trades
            .into_iter()
            .map(ExchangeTrade::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(trades)
    }
}
