use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::TaskError;
use crate::exchange::EventRef;
use crate::types::{OutcomeSide, PricingMode, MIN_ORDER_USDT};

pub type TaskId = String;

/// `task_` followed by 8 hex chars
pub fn new_task_id() -> TaskId {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("task_{}", &id[..8])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Stopped,
    Error,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Stopped => "stopped",
            TaskStatus::Error => "error",
            TaskStatus::Completed => "completed",
        }
    }

    /// No transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Stopped | TaskStatus::Error | TaskStatus::Completed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "stopped" => Ok(TaskStatus::Stopped),
            "error" => Ok(TaskStatus::Error),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    MarketMaker,
    SellShares,
    SplitAndSell,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::MarketMaker => "market_maker",
            TaskKind::SellShares => "sell_shares",
            TaskKind::SplitAndSell => "split_and_sell",
        }
    }
}

fn default_min_volume() -> Decimal {
    dec!(5)
}

/// One poll a day is the slowest cadence accepted
const MAX_INTERVAL_SECS: f64 = 86_400.0;

fn default_interval() -> f64 {
    5.0
}

fn default_sell_steps() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketMakerConfig {
    pub url: String,
    pub outcome: String,
    /// USDT per side
    pub amount: Decimal,
    #[serde(default)]
    pub mode: PricingMode,
    #[serde(default = "default_min_volume")]
    pub min_volume: Decimal,
    #[serde(default = "default_interval")]
    pub interval: f64,
    #[serde(default)]
    pub single_order_side: Option<OutcomeSide>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellSharesConfig {
    /// Parent topic filter; all positions when absent
    #[serde(default)]
    pub topic_id: Option<u64>,
    #[serde(default)]
    pub mode: PricingMode,
    #[serde(default = "default_min_volume")]
    pub min_volume: Decimal,
    #[serde(default = "default_interval")]
    pub interval: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitAndSellConfig {
    pub url: String,
    pub outcome: String,
    /// USDT converted into YES+NO pairs
    pub amount: Decimal,
    #[serde(default = "default_sell_steps")]
    pub sell_steps: u32,
    #[serde(default)]
    pub aggressive: bool,
    #[serde(default = "default_interval")]
    pub interval: f64,
    #[serde(default = "default_min_volume")]
    pub min_volume: Decimal,
}

/// Strategy configuration, tagged by task type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum TaskConfig {
    MarketMaker(MarketMakerConfig),
    SellShares(SellSharesConfig),
    SplitAndSell(SplitAndSellConfig),
}

impl TaskConfig {
    /// Parse a `{type, config}` request body
    pub fn from_json(value: serde_json::Value) -> Result<Self, TaskError> {
        let config: TaskConfig =
            serde_json::from_value(value).map_err(|e| TaskError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            TaskConfig::MarketMaker(_) => TaskKind::MarketMaker,
            TaskConfig::SellShares(_) => TaskKind::SellShares,
            TaskConfig::SplitAndSell(_) => TaskKind::SplitAndSell,
        }
    }

    fn interval_secs(&self) -> f64 {
        match self {
            TaskConfig::MarketMaker(c) => c.interval,
            TaskConfig::SellShares(c) => c.interval,
            TaskConfig::SplitAndSell(c) => c.interval,
        }
    }

    pub fn interval(&self) -> Result<Duration, TaskError> {
        let secs = self.interval_secs();
        if !secs.is_finite() || secs <= 0.0 {
            return Err(invalid(format!("interval must be positive, got {}", secs)));
        }
        if secs > MAX_INTERVAL_SECS {
            return Err(invalid(format!(
                "interval must be at most {} seconds, got {}",
                MAX_INTERVAL_SECS, secs
            )));
        }
        Duration::try_from_secs_f64(secs).map_err(|e| invalid(format!("interval {}: {}", secs, e)))
    }

    pub fn validate(&self) -> Result<(), TaskError> {
        self.interval()?;

        match self {
            TaskConfig::MarketMaker(c) => {
                event_ref(&c.url)?;
                require_outcome(&c.outcome)?;
                if c.amount < MIN_ORDER_USDT {
                    return Err(invalid(format!(
                        "amount must be at least {} USDT per side, got {}",
                        MIN_ORDER_USDT, c.amount
                    )));
                }
                require_positive("min_volume", c.min_volume)?;
            }
            TaskConfig::SellShares(c) => {
                require_positive("min_volume", c.min_volume)?;
            }
            TaskConfig::SplitAndSell(c) => {
                event_ref(&c.url)?;
                require_outcome(&c.outcome)?;
                require_positive("amount", c.amount)?;
                require_positive("min_volume", c.min_volume)?;
                if c.sell_steps == 0 {
                    return Err(invalid("sell_steps must be at least 1"));
                }
            }
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> TaskError {
    TaskError::InvalidConfig(msg.into())
}

pub(crate) fn event_ref(url: &str) -> Result<EventRef, TaskError> {
    EventRef::parse(url).map_err(TaskError::InvalidConfig)
}

fn require_outcome(outcome: &str) -> Result<(), TaskError> {
    if outcome.trim().is_empty() {
        return Err(invalid("outcome is required"));
    }
    Ok(())
}

fn require_positive(field: &str, value: Decimal) -> Result<(), TaskError> {
    if value <= Decimal::ZERO {
        return Err(invalid(format!("{} must be positive, got {}", field, value)));
    }
    Ok(())
}

/// Read-only view of a task
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub id: TaskId,
    #[serde(flatten)]
    pub config: TaskConfig,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub log_count: usize,
}
