//! Trade ledger - SQLite record of every executed fill
//!
//! Also archives task records so the task list survives a restart.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

use crate::task::{TaskConfig, TaskStatus, TaskView};
use crate::types::{OutcomeSide, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Filled,
    Rejected,
    Pending,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Filled => "filled",
            TradeStatus::Rejected => "rejected",
            TradeStatus::Pending => "pending",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "filled" => TradeStatus::Filled,
            "rejected" => TradeStatus::Rejected,
            _ => TradeStatus::Pending,
        }
    }
}

/// Trade record for the ledger
#[derive(Debug, Clone, Serialize)]
pub struct Trade {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub task_id: Option<String>,
    pub event_name: String,
    pub outcome_name: String,
    pub side: OutcomeSide,
    pub action: Side,
    pub price: Decimal,
    pub shares: Decimal,
    pub amount_usdt: Decimal,
    pub order_id: Option<String>,
    pub mode: Option<String>,
    pub status: TradeStatus,
    pub profit_usdt: Option<Decimal>,
}

impl Trade {
    /// Filled trade stamped now, amount derived from price and shares
    pub fn filled(
        task_id: &str,
        event_name: &str,
        outcome_name: &str,
        side: OutcomeSide,
        action: Side,
        price: Decimal,
        shares: Decimal,
    ) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            task_id: Some(task_id.to_string()),
            event_name: event_name.to_string(),
            outcome_name: outcome_name.to_string(),
            side,
            action,
            price,
            shares,
            amount_usdt: (price * shares).round_dp(4),
            order_id: None,
            mode: None,
            status: TradeStatus::Filled,
            profit_usdt: None,
        }
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn with_profit(mut self, profit: Decimal) -> Self {
        self.profit_usdt = Some(profit.round_dp(4));
        self
    }
}

/// Aggregate statistics
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TradeStats {
    pub total_trades: u32,
    pub total_profit: Decimal,
    pub wins: u32,
    pub losses: u32,
}

impl std::fmt::Display for TradeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Trades: {} | Wins: {} | Losses: {} | Profit: ${}",
            self.total_trades, self.wins, self.losses, self.total_profit
        )
    }
}

/// Write-serialized trade ledger
pub struct TradeLedger {
    conn: Mutex<Connection>,
}

impl TradeLedger {
    /// Open (or create) the ledger file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open ledger at {}", path.display()))?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                task_id TEXT,
                event_name TEXT NOT NULL,
                outcome_name TEXT NOT NULL,
                side TEXT NOT NULL,
                action TEXT NOT NULL,
                price REAL NOT NULL,
                shares REAL NOT NULL,
                amount_usdt REAL NOT NULL,
                order_id TEXT,
                mode TEXT,
                status TEXT NOT NULL,
                profit_usdt REAL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                config TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                stopped_at TEXT,
                error TEXT
            )",
            [],
        )?;

        info!("Trade ledger initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append a trade, returning its row id
    pub fn record(&self, trade: &Trade) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO trades (
                timestamp, task_id, event_name, outcome_name, side, action,
                price, shares, amount_usdt, order_id, mode, status, profit_usdt
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                trade.timestamp.to_rfc3339(),
                trade.task_id,
                trade.event_name,
                trade.outcome_name,
                trade.side.as_str(),
                trade.action.as_str(),
                to_real(trade.price),
                to_real(trade.shares),
                to_real(trade.amount_usdt),
                trade.order_id,
                trade.mode,
                trade.status.as_str(),
                trade.profit_usdt.map(to_real),
            ],
        )?;

        let id = conn.last_insert_rowid();
        debug!(
            "Ledger #{}: {} {} {} @ {}",
            id, trade.action, trade.shares, trade.side, trade.price
        );
        Ok(id)
    }

    /// Settle a pending trade. Returns false when the trade is unknown or
    /// already terminal, in which case nothing changes.
    pub fn update_status(&self, id: i64, status: TradeStatus, profit: Option<Decimal>) -> Result<bool> {
        let changed = self.conn.lock().execute(
            "UPDATE trades SET status = ?1, profit_usdt = COALESCE(?2, profit_usdt)
             WHERE id = ?3 AND status = 'pending'",
            params![status.as_str(), profit.map(to_real), id],
        )?;
        Ok(changed > 0)
    }

    /// Newest first
    pub fn list(&self, limit: u32, offset: u32) -> Result<Vec<Trade>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, task_id, event_name, outcome_name, side, action,
                    price, shares, amount_usdt, order_id, mode, status, profit_usdt
             FROM trades ORDER BY timestamp DESC, id DESC LIMIT ?1 OFFSET ?2",
        )?;

        let trades = stmt
            .query_map(params![limit, offset], |row| {
                Ok(Trade {
                    id: Some(row.get(0)?),
                    timestamp: parse_time(&row.get::<_, String>(1)?),
                    task_id: row.get(2)?,
                    event_name: row.get(3)?,
                    outcome_name: row.get(4)?,
                    side: if row.get::<_, String>(5)? == "NO" {
                        OutcomeSide::No
                    } else {
                        OutcomeSide::Yes
                    },
                    action: if row.get::<_, String>(6)? == "sell" {
                        Side::Sell
                    } else {
                        Side::Buy
                    },
                    price: from_real(row.get(7)?),
                    shares: from_real(row.get(8)?),
                    amount_usdt: from_real(row.get(9)?),
                    order_id: row.get(10)?,
                    mode: row.get(11)?,
                    status: TradeStatus::parse(&row.get::<_, String>(12)?),
                    profit_usdt: row.get::<_, Option<f64>>(13)?.map(from_real),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(trades)
    }

    pub fn stats(&self) -> Result<TradeStats> {
        let conn = self.conn.lock();

        let total: i64 = conn.query_row("SELECT COUNT(*) FROM trades", [], |row| row.get(0))?;

        let wins: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trades WHERE profit_usdt > 0",
            [],
            |row| row.get(0),
        )?;

        let total_profit: f64 = conn.query_row(
            "SELECT COALESCE(SUM(profit_usdt), 0) FROM trades",
            [],
            |row| row.get(0),
        )?;

        Ok(TradeStats {
            total_trades: total as u32,
            total_profit: from_real(total_profit).round_dp(2),
            wins: wins as u32,
            losses: (total - wins) as u32,
        })
    }

    /// Insert or refresh a task's archived record
    pub fn save_task(&self, task: &TaskView) -> Result<()> {
        let config = serde_json::to_string(&task.config)?;
        self.conn.lock().execute(
            "INSERT INTO tasks (id, config, status, created_at, started_at, stopped_at, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                started_at = excluded.started_at,
                stopped_at = excluded.stopped_at,
                error = excluded.error",
            params![
                task.id,
                config,
                task.status.as_str(),
                task.created_at.to_rfc3339(),
                task.started_at.map(|t| t.to_rfc3339()),
                task.stopped_at.map(|t| t.to_rfc3339()),
                task.error,
            ],
        )?;
        Ok(())
    }

    pub fn find_task(&self, id: &str) -> Result<Option<TaskView>> {
        let conn = self.conn.lock();
        let task = conn
            .query_row(
                "SELECT id, config, status, created_at, started_at, stopped_at, error
                 FROM tasks WHERE id = ?1",
                [id],
                read_task,
            )
            .optional()?;
        Ok(task.flatten())
    }

    /// Archived tasks, newest first
    pub fn task_history(&self, limit: u32) -> Result<Vec<TaskView>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, config, status, created_at, started_at, stopped_at, error
             FROM tasks ORDER BY created_at DESC LIMIT ?1",
        )?;

        let tasks = stmt
            .query_map([limit], read_task)?
            .collect::<Result<Vec<_>, _>>()?;

        // Rows whose config no longer parses are skipped
        Ok(tasks.into_iter().flatten().collect())
    }
}

fn read_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<TaskView>> {
    let config: String = row.get(1)?;
    let Ok(config) = serde_json::from_str::<TaskConfig>(&config) else {
        return Ok(None);
    };

    Ok(Some(TaskView {
        id: row.get(0)?,
        config,
        status: row
            .get::<_, String>(2)?
            .parse()
            .unwrap_or(TaskStatus::Stopped),
        created_at: parse_time(&row.get::<_, String>(3)?),
        started_at: row.get::<_, Option<String>>(4)?.map(|s| parse_time(&s)),
        stopped_at: row.get::<_, Option<String>>(5)?.map(|s| parse_time(&s)),
        error: row.get(6)?,
        log_count: 0,
    }))
}

fn to_real(d: Decimal) -> f64 {
    d.to_string().parse::<f64>().unwrap_or(0.0)
}

fn from_real(f: f64) -> Decimal {
    f.to_string().parse().unwrap_or_default()
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn buy(price: Decimal, shares: Decimal) -> Trade {
        Trade::filled("task_1", "Election", "Alice", OutcomeSide::Yes, Side::Buy, price, shares)
    }

    #[test]
    fn test_record_and_list_newest_first() {
        let ledger = TradeLedger::in_memory().unwrap();
        let mut first = buy(dec!(0.50), dec!(10));
        first.timestamp = Utc::now() - chrono::Duration::seconds(10);
        ledger.record(&first).unwrap();
        ledger
            .record(&buy(dec!(0.55), dec!(10)).with_order_id("ord-2"))
            .unwrap();

        let trades = ledger.list(10, 0).unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].price, dec!(0.55));
        assert_eq!(trades[0].order_id.as_deref(), Some("ord-2"));
        assert_eq!(trades[1].amount_usdt, dec!(5));

        let paged = ledger.list(1, 1).unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].price, dec!(0.50));
    }

    #[test]
    fn test_terminal_status_is_immutable() {
        let ledger = TradeLedger::in_memory().unwrap();
        let mut pending = buy(dec!(0.40), dec!(5));
        pending.status = TradeStatus::Pending;
        let id = ledger.record(&pending).unwrap();

        assert!(ledger.update_status(id, TradeStatus::Filled, None).unwrap());
        assert!(!ledger.update_status(id, TradeStatus::Rejected, None).unwrap());
        assert_eq!(ledger.list(1, 0).unwrap()[0].status, TradeStatus::Filled);

        let filled = ledger.record(&buy(dec!(0.40), dec!(5))).unwrap();
        assert!(!ledger.update_status(filled, TradeStatus::Pending, None).unwrap());
    }

    #[test]
    fn test_stats() {
        let ledger = TradeLedger::in_memory().unwrap();
        ledger.record(&buy(dec!(0.50), dec!(10))).unwrap();
        ledger
            .record(&buy(dec!(0.60), dec!(10)).with_profit(dec!(1.004)))
            .unwrap();
        ledger
            .record(&buy(dec!(0.45), dec!(10)).with_profit(dec!(-0.5)))
            .unwrap();

        let stats = ledger.stats().unwrap();
        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.losses, 2);
        assert_eq!(stats.total_profit, dec!(0.50));
    }

    #[test]
    fn test_file_backed_ledger_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("trades.db");

        {
            let ledger = TradeLedger::open(&path).unwrap();
            ledger.record(&buy(dec!(0.50), dec!(2))).unwrap();
        }

        let reopened = TradeLedger::open(&path).unwrap();
        assert_eq!(reopened.stats().unwrap().total_trades, 1);
    }
}
