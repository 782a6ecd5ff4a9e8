//! Trade and resume-marker storage
//!
//! Persistent storage for backfilled trades with:
//! - SQLite backend
//! - Idempotent upserts keyed by derived trade id (last write wins)
//! - Resume markers, queried per selector for coalescing

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::models::{ResumeMarker, Trade};

// =============================================================================
// Store Contract
// =============================================================================

/// Durable keyed storage used by the backfill engine.
pub trait BackfillStore: Send + Sync {
    /// Upsert a whole batch; either every trade is written or none is.
    fn upsert_trades(&self, trades: &[Trade]) -> Result<usize>;

    /// Upsert a marker by id.
    fn upsert_marker(&self, marker: &ResumeMarker) -> Result<()>;

    /// Every marker recorded for a selector, in no particular order.
    fn load_markers(&self, selector: &str) -> Result<Vec<ResumeMarker>>;

    fn count_trades(&self, selector: &str) -> Result<u64>;

    /// Trades for a selector, oldest first.
    fn load_trades(&self, selector: &str) -> Result<Vec<Trade>>;
}

// =============================================================================
// Storage Schema
// =============================================================================

const SCHEMA_SQL: &str = r#"
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS trades (
    id TEXT PRIMARY KEY,
    selector TEXT NOT NULL,
    trade_id TEXT NOT NULL,
    time INTEGER NOT NULL,
    cursor INTEGER NOT NULL,
    payload TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_trades_selector_time
    ON trades(selector, time);

CREATE TABLE IF NOT EXISTS resume_markers (
    id TEXT PRIMARY KEY,
    selector TEXT NOT NULL,
    from_cursor INTEGER,
    to_cursor INTEGER,
    oldest_time INTEGER,
    newest_time INTEGER,
    updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_resume_markers_selector
    ON resume_markers(selector);
"#;

// =============================================================================
// Storage Implementation
// =============================================================================

pub struct SqliteBackfillStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackfillStore {
    /// Open or create storage.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let path = Path::new(&config.db_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(&config.db_path, flags)
            .with_context(|| format!("Failed to open database: {}", config.db_path))?;

        if config.wal_mode {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
        }
        conn.execute_batch(SCHEMA_SQL)?;

        info!(path = %config.db_path, "Backfill storage opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open in-memory storage (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_marker(row: &Row<'_>) -> rusqlite::Result<ResumeMarker> {
        Ok(ResumeMarker {
            id: row.get(0)?,
            selector: row.get(1)?,
            from: row.get(2)?,
            to: row.get(3)?,
            oldest_time: row.get(4)?,
            newest_time: row.get(5)?,
        })
    }
}

impl BackfillStore for SqliteBackfillStore {
    fn upsert_trades(&self, trades: &[Trade]) -> Result<usize> {
        if trades.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                r#"
                INSERT INTO trades (id, selector, trade_id, time, cursor, payload)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    selector = excluded.selector,
                    trade_id = excluded.trade_id,
                    time = excluded.time,
                    cursor = excluded.cursor,
                    payload = excluded.payload,
                    updated_at = strftime('%s', 'now')
                "#,
            )?;

            for trade in trades {
                let payload = serde_json::to_string(&trade.payload)?;
                stmt.execute(params![
                    trade.id,
                    trade.selector,
                    trade.trade_id,
                    trade.time,
                    trade.cursor,
                    payload,
                ])
                .with_context(|| format!("Failed to upsert trade {}", trade.id))?;
            }
        }
        tx.commit()?;

        debug!(count = trades.len(), "Upserted trade batch");
        Ok(trades.len())
    }

    fn upsert_marker(&self, marker: &ResumeMarker) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO resume_markers (id, selector, from_cursor, to_cursor, oldest_time, newest_time)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                selector = excluded.selector,
                from_cursor = excluded.from_cursor,
                to_cursor = excluded.to_cursor,
                oldest_time = excluded.oldest_time,
                newest_time = excluded.newest_time,
                updated_at = strftime('%s', 'now')
            "#,
            params![
                marker.id,
                marker.selector,
                marker.from,
                marker.to,
                marker.oldest_time,
                marker.newest_time,
            ],
        )
        .with_context(|| format!("Failed to upsert marker {}", marker.id))?;
        Ok(())
    }

    fn load_markers(&self, selector: &str) -> Result<Vec<ResumeMarker>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, selector, from_cursor, to_cursor, oldest_time, newest_time
            FROM resume_markers
            WHERE selector = ?1
            "#,
        )?;

        let markers = stmt
            .query_map(params![selector], Self::row_to_marker)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(markers)
    }

    fn count_trades(&self, selector: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trades WHERE selector = ?1",
            params![selector],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn load_trades(&self, selector: &str) -> Result<Vec<Trade>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, selector, trade_id, time, cursor, payload
            FROM trades
            WHERE selector = ?1
            ORDER BY time ASC, cursor ASC
            "#,
        )?;

        let rows = stmt
            .query_map(params![selector], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, selector, trade_id, time, cursor, payload)| {
                Ok(Trade {
                    payload: serde_json::from_str(&payload)
                        .with_context(|| format!("Corrupt payload for trade {}", id))?,
                    id,
                    selector,
                    trade_id,
                    time,
                    cursor,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExchangeTrade;
    use crate::selector::Selector;

    fn trade(selector: &Selector, id: u32, time: i64) -> Trade {
        Trade::stamp(
            selector,
            ExchangeTrade::new(id.to_string(), time)
                .with_payload(serde_json::json!({"price": "1.5", "size": "2"})),
            id as i64,
        )
    }

    #[test]
    fn test_trade_upsert_is_idempotent() {
        let store = SqliteBackfillStore::open_memory().unwrap();
        let sel = Selector::parse("coinbase.BTC-USD").unwrap();

        let batch: Vec<Trade> = (1..=5).map(|i| trade(&sel, i, 1_000 + i as i64)).collect();
        assert_eq!(store.upsert_trades(&batch).unwrap(), 5);
        assert_eq!(store.upsert_trades(&batch).unwrap(), 5);
        assert_eq!(store.count_trades(&sel.normalized).unwrap(), 5);

        // last write wins
        let mut changed = batch[0].clone();
        changed.payload = serde_json::json!({"price": "9"});
        store.upsert_trades(&[changed]).unwrap();
        let loaded = store.load_trades(&sel.normalized).unwrap();
        assert_eq!(loaded.len(), 5);
        assert_eq!(loaded[0].payload["price"], "9");
        assert_eq!(loaded[4], batch[4]);
    }

    #[test]
    fn test_trades_are_selector_scoped() {
        let store = SqliteBackfillStore::open_memory().unwrap();
        let a = Selector::parse("coinbase.BTC-USD").unwrap();
        let b = Selector::parse("coinbase.ETH-USD").unwrap();
        store.upsert_trades(&[trade(&a, 1, 10), trade(&b, 1, 10)]).unwrap();
        assert_eq!(store.count_trades(&a.normalized).unwrap(), 1);
        assert_eq!(store.count_trades(&b.normalized).unwrap(), 1);
    }

    #[test]
    fn test_marker_upsert_and_load() {
        let store = SqliteBackfillStore::open_memory().unwrap();
        let sel = Selector::parse("binance.ADA-USDT").unwrap();
        let other = Selector::parse("binance.BTC-USDT").unwrap();

        let mut marker = ResumeMarker::with_id("aaaa0001", &sel);
        store.upsert_marker(&marker).unwrap();
        marker.from = Some(10);
        marker.to = Some(20);
        marker.oldest_time = Some(1_000);
        marker.newest_time = Some(2_000);
        store.upsert_marker(&marker).unwrap();
        store.upsert_marker(&ResumeMarker::with_id("bbbb0002", &other)).unwrap();

        let loaded = store.load_markers(&sel.normalized).unwrap();
        assert_eq!(loaded, vec![marker]);
        assert!(store.load_markers("binance.XRP-USDT").unwrap().is_empty());
    }

    #[test]
    fn test_on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            db_path: dir.path().join("nested/backfill.db").to_string_lossy().to_string(),
            wal_mode: true,
        };
        let sel = Selector::parse("coinbase.BTC-USD").unwrap();

        {
            let store = SqliteBackfillStore::open(&config).unwrap();
            store.upsert_trades(&[trade(&sel, 7, 700)]).unwrap();
            store.upsert_marker(&ResumeMarker::with_id("cafe0001", &sel)).unwrap();
        }

        let store = SqliteBackfillStore::open(&config).unwrap();
        assert_eq!(store.count_trades(&sel.normalized).unwrap(), 1);
        assert_eq!(store.load_markers(&sel.normalized).unwrap().len(), 1);
    }
}
