use serde::{Deserialize, Serialize};

use crate::selector::Selector;

/// Adapter-defined monotonic pagination position (a trade id or a time in ms,
/// depending on the exchange).
pub type Cursor = i64;

/// A trade exactly as an exchange adapter reports it, before the engine stamps
/// it with its store identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeTrade {
    /// Exchange-native trade identifier.
    pub trade_id: String,
    /// Execution time, milliseconds since epoch.
    pub time: i64,
    /// Adapter-specific fields (price, size, side...), passed through untouched.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ExchangeTrade {
    pub fn new(trade_id: impl Into<String>, time: i64) -> Self {
        Self {
            trade_id: trade_id.into(),
            time,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// A trade record as persisted in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// `<selector.normalized>-<trade_id>`; re-deriving it always lands on the
    /// same store slot.
    pub id: String,
    pub selector: String,
    pub trade_id: String,
    pub time: i64,
    pub cursor: Cursor,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Trade {
    pub fn derive_id(selector: &Selector, trade_id: &str) -> String {
        format!("{}-{}", selector.normalized, trade_id)
    }

    /// Attach store identity and the adapter cursor to a raw exchange trade.
    pub fn stamp(selector: &Selector, raw: ExchangeTrade, cursor: Cursor) -> Self {
        Self {
            id: Self::derive_id(selector, &raw.trade_id),
            selector: selector.normalized.clone(),
            trade_id: raw.trade_id,
            time: raw.time,
            cursor,
            payload: raw.payload,
        }
    }
}

/// Claimed coverage of one backfill session for a selector.
///
/// `from`/`to` bound the contiguous cursor range the session has covered;
/// `oldest_time`/`newest_time` are the timestamp extremes observed inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeMarker {
    pub id: String,
    pub selector: String,
    pub from: Option<Cursor>,
    pub to: Option<Cursor>,
    pub oldest_time: Option<i64>,
    pub newest_time: Option<i64>,
}

impl ResumeMarker {
    /// Fresh marker with a random 8-hex-char session id.
    pub fn new(selector: &Selector) -> Self {
        Self::with_id(hex::encode(rand::random::<[u8; 4]>()), selector)
    }

    pub fn with_id(id: impl Into<String>, selector: &Selector) -> Self {
        Self {
            id: id.into(),
            selector: selector.normalized.clone(),
            from: None,
            to: None,
            oldest_time: None,
            newest_time: None,
        }
    }

    /// Both cursor bounds known.
    pub fn bounds(&self) -> Option<(Cursor, Cursor)> {
        match (self.from, self.to) {
            (Some(from), Some(to)) => Some((from, to)),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bounds().is_none()
    }
}

/// One tradable pair listed by an exchange adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub asset: String,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Product {
    pub fn new(asset: &str, currency: &str) -> Self {
        Self {
            asset: asset.to_string(),
            currency: currency.to_string(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn product_id(&self) -> String {
        format!("{}-{}", self.asset, self.currency)
    }
}
