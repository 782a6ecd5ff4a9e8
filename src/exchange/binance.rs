//! Binance aggregate-trades adapter
//!
//! Forward scan over `/api/v3/aggTrades`. The cursor is the trade time in
//! milliseconds; each request covers at most one hour starting at `from`,
//! which is the widest window the endpoint accepts.
//!
//! The engine resumes at `newest + 1`, so a page must never end partway
//! through a millisecond. When a page comes back full, the rest of its last
//! millisecond is fetched by aggregate id before the page is returned.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{ExchangeAdapter, FetchError, ScanDirection, TradeQuery};
use crate::config::ExchangesConfig;
use crate::models::{Cursor, ExchangeTrade, Product};

/// Widest `startTime..endTime` span the endpoint accepts.
const MAX_WINDOW_MS: i64 = 3_600_000;
const PAGE_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize)]
struct AggTrade {
    #[serde(rename = "a")]
    agg_id: u64,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "T")]
    time: i64,
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

impl From<AggTrade> for ExchangeTrade {
    fn from(t: AggTrade) -> Self {
        // buyer is maker => the aggressor sold
        let side = if t.buyer_is_maker { "sell" } else { "buy" };
        ExchangeTrade::new(t.agg_id.to_string(), t.time).with_payload(serde_json::json!({
            "price": t.price,
            "size": t.quantity,
            "side": side,
        }))
    }
}

#[derive(Clone)]
pub struct BinanceAdapter {
    client: Client,
    base_url: String,
}

impl BinanceAdapter {
    pub fn new(config: &ExchangesConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(4)
            .build()
            .context("Failed to build Binance HTTP client")?;

        Ok(Self {
            client,
            base_url: config.binance_api_url.trim_end_matches('/').to_string(),
        })
    }

    /// `ADA-USDT` -> `ADAUSDT`
    fn symbol(product_id: &str) -> String {
        product_id.replace('-', "")
    }

    fn window(query: &TradeQuery) -> Option<(i64, i64)> {
        query.from.map(|from| (from, from + MAX_WINDOW_MS - 1))
    }

    async fn fetch_page(&self, params: &[(&str, String)]) -> Result<Vec<AggTrade>, FetchError> {
        let url = format!("{}/api/v3/aggTrades", self.base_url);
        let resp = self.client.get(&url).query(params).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(FetchError::from_status(status, &text, "GET /api/v3/aggTrades"));
        }

        let trades: Vec<AggTrade> = resp
            .json()
            .await
            .context("Failed to parse aggTrades response")?;
        Ok(trades)
    }

    /// Page forward by `fromId` until every trade sharing the last trade's
    /// millisecond is in `trades`.
    async fn complete_last_millisecond(
        &self,
        symbol: &str,
        trades: &mut Vec<AggTrade>,
    ) -> Result<(), FetchError> {
        while let Some(last) = trades.last() {
            let (last_id, last_time) = (last.agg_id, last.time);
            let params = [
                ("symbol", symbol.to_string()),
                ("fromId", (last_id + 1).to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            let page = self.fetch_page(&params).await?;
            let full = page.len() == PAGE_LIMIT as usize;
            let tail = same_millisecond_prefix(page, last_time);
            let more = full && tail.len() == PAGE_LIMIT as usize;
            trades.extend(tail);
            if !more {
                break;
            }
        }
        Ok(())
    }
}

/// Leading trades of `page` stamped with `time`.
fn same_millisecond_prefix(page: Vec<AggTrade>, time: i64) -> Vec<AggTrade> {
    page.into_iter().take_while(|t| t.time == time).collect()
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn name(&self) -> &str {
        "binance"
    }

    fn history_scan(&self) -> Option<ScanDirection> {
        Some(ScanDirection::Forward)
    }

    fn products(&self) -> Vec<Product> {
        vec![
            Product::new("BTC", "USDT"),
            Product::new("ETH", "USDT"),
            Product::new("ETH", "BTC"),
            Product::new("ADA", "USDT"),
            Product::new("SOL", "USDT"),
            Product::new("XRP", "USDT"),
            Product::new("BNB", "USDT").with_label("Binance Coin"),
        ]
    }

    fn cursor_for_time(&self, time_ms: i64) -> Option<Cursor> {
        Some(time_ms)
    }

    fn cursor_for_trade(&self, trade: &ExchangeTrade) -> Cursor {
        trade.time
    }

    async fn get_trades(&self, query: &TradeQuery) -> Result<Vec<ExchangeTrade>, FetchError> {
        let symbol = Self::symbol(&query.product_id);
        let mut params: Vec<(&str, String)> = Vec::with_capacity(4);
        params.push(("symbol", symbol.clone()));
        params.push(("limit", PAGE_LIMIT.to_string()));
        if let Some((start, end)) = Self::window(query) {
            params.push(("startTime", start.to_string()));
            params.push(("endTime", end.to_string()));
        }

        let mut trades = self.fetch_page(&params).await?;
        if trades.len() == PAGE_LIMIT as usize {
            self.complete_last_millisecond(&symbol, &mut trades).await?;
        }

        Ok(trades.into_iter().map(ExchangeTrade::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_mapping() {
        assert_eq!(BinanceAdapter::symbol("ADA-USDT"), "ADAUSDT");
    }

    #[test]
    fn test_window_is_one_hour_from_cursor() {
        let mut q = TradeQuery::new("BTC-USDT");
        assert_eq!(BinanceAdapter::window(&q), None);
        q.from = Some(1_000);
        assert_eq!(BinanceAdapter::window(&q), Some((1_000, 3_600_999)));
    }

    #[test]
    fn test_agg_trade_conversion() {
        let raw: AggTrade = serde_json::from_str(
            r#"{"a":26129,"p":"0.01633102","q":"4.70443515","f":27781,"l":27781,"T":1498793709153,"m":true,"M":true}"#,
        )
        .unwrap();
        let trade = ExchangeTrade::from(raw);
        assert_eq!(trade.trade_id, "26129");
        assert_eq!(trade.time, 1_498_793_709_153);
        assert_eq!(trade.payload["side"], "sell");
        assert_eq!(trade.payload["price"], "0.01633102");
    }

    fn agg(id: u64, time: i64) -> AggTrade {
        AggTrade {
            agg_id: id,
            price: "1.0".to_string(),
            quantity: "1.0".to_string(),
            time,
            buyer_is_maker: false,
        }
    }

    #[test]
    fn test_same_millisecond_prefix_stops_at_next_millisecond() {
        let page = vec![agg(11, 500), agg(12, 500), agg(13, 501), agg(14, 500)];
        let ids: Vec<u64> = same_millisecond_prefix(page, 500)
            .iter()
            .map(|t| t.agg_id)
            .collect();
        assert_eq!(ids, vec![11, 12]);

        assert!(same_millisecond_prefix(vec![agg(11, 501)], 500).is_empty());
    }

    #[test]
    fn test_cursor_is_trade_time() {
        let adapter = BinanceAdapter::new(&ExchangesConfig::default()).unwrap();
        let trade = ExchangeTrade::new("1", 1_700_000_000_000);
        assert_eq!(adapter.cursor_for_trade(&trade), 1_700_000_000_000);
        assert_eq!(adapter.cursor_for_time(5), Some(5));
    }
}
