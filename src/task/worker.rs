//! Per-task polling loop and the context strategies run against

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::model::TaskId;
use crate::config::EngineSettings;
use crate::error::{ExchangeError, StrategyError};
use crate::exchange::ExchangeClient;
use crate::retry::retry_rate_limited;
use crate::strategies::{PollOutcome, Strategy};
use crate::task_log::TaskLog;
use crate::token_store::{Credential, TokenStore};
use crate::trade_db::{Trade, TradeLedger};
use crate::types::{OrderRequest, PlacedOrder, MIN_ORDER_USDT};

const PLACE_ATTEMPTS: u32 = 3;

/// Everything a strategy may touch during a poll cycle
pub struct StrategyContext {
    pub task_id: TaskId,
    pub exchange: Arc<dyn ExchangeClient>,
    pub ledger: Arc<TradeLedger>,
    pub log: Arc<TaskLog>,
    pub settings: EngineSettings,
    tokens: Arc<TokenStore>,
    cancel: watch::Receiver<bool>,
    /// Snapshot taken at the top of each cycle
    credential: Mutex<Option<Credential>>,
    credential_failed: AtomicBool,
}

impl StrategyContext {
    pub fn new(
        task_id: TaskId,
        exchange: Arc<dyn ExchangeClient>,
        tokens: Arc<TokenStore>,
        ledger: Arc<TradeLedger>,
        log: Arc<TaskLog>,
        settings: EngineSettings,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            task_id,
            exchange,
            ledger,
            log,
            settings,
            tokens,
            cancel,
            credential: Mutex::new(None),
            credential_failed: AtomicBool::new(false),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn refresh_credential(&self) {
        *self.credential.lock() = self.tokens.snapshot();
    }

    fn take_credential_failure(&self) -> bool {
        self.credential_failed.swap(false, Ordering::Relaxed)
    }

    fn credential_failure(&self, msg: impl Into<String>) -> StrategyError {
        self.credential_failed.store(true, Ordering::Relaxed);
        StrategyError::CredentialExpired(msg.into())
    }

    /// This cycle's credential, rejected when missing or past its window
    pub fn credential(&self) -> Result<Credential, StrategyError> {
        let snapshot = self.credential.lock().clone();
        match snapshot {
            Some(c) if !c.is_expired() => Ok(c),
            Some(c) => Err(self.credential_failure(format!("auth token expired at {}", c.expires_at()))),
            None => Err(self.credential_failure("no auth token set")),
        }
    }

    /// Latest stored credential regardless of age, for best-effort cleanup
    pub fn latest_credential(&self) -> Option<Credential> {
        self.tokens.snapshot()
    }

    /// Run an exchange call under the request timeout
    pub async fn bounded<T, F>(&self, fut: F) -> Result<T, ExchangeError>
    where
        F: Future<Output = Result<T, ExchangeError>>,
    {
        match tokio::time::timeout(self.settings.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ExchangeError::Timeout),
        }
    }

    /// Bounded call whose result is discarded if stop arrived meanwhile
    pub async fn call<T, F>(&self, fut: F) -> Result<T, StrategyError>
    where
        F: Future<Output = Result<T, ExchangeError>>,
    {
        let result = self.bounded(fut).await;
        if self.is_cancelled() {
            return Err(StrategyError::Cancelled);
        }
        result.map_err(|e| {
            if e.is_auth() {
                self.credential_failure(e.to_string())
            } else {
                StrategyError::from(e)
            }
        })
    }

    /// Sleep that ends early on stop
    pub async fn pause(&self, duration: Duration) -> Result<(), StrategyError> {
        let mut cancel = self.cancel.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = cancel.wait_for(|c| *c) => Err(StrategyError::Cancelled),
        }
    }

    /// Submit an order after the cancellation, credential and notional checks
    pub async fn place_order(&self, order: &OrderRequest) -> Result<PlacedOrder, StrategyError> {
        if self.is_cancelled() {
            return Err(StrategyError::Cancelled);
        }
        if order.notional() < MIN_ORDER_USDT {
            return Err(StrategyError::Recoverable(format!(
                "order value ${} below ${} minimum",
                order.notional().round_dp(2),
                MIN_ORDER_USDT
            )));
        }
        let credential = self.credential()?;
        let exchange = &self.exchange;

        self.call(retry_rate_limited(
            "place_order",
            PLACE_ATTEMPTS,
            || self.is_cancelled(),
            || exchange.place_order(order, &credential),
        ))
        .await
    }

    pub async fn cancel_order(&self, order: &PlacedOrder) -> Result<(), StrategyError> {
        let credential = self.credential()?;
        self.call(self.exchange.cancel_order(order, &credential)).await
    }

    /// Confirm a vanished order really left the book.
    ///
    /// Re-reads open orders `fill_verify_attempts` times; any sighting means
    /// it is still resting. Transient read failures count as not seen.
    pub async fn verify_filled(&self, order_id: &str, topic_filter: Option<u64>) -> Result<bool, StrategyError> {
        let attempts = self.settings.fill_verify_attempts;

        for attempt in 1..=attempts {
            self.pause(self.settings.fill_verify_delay).await?;
            let credential = self.credential()?;

            match self.call(self.exchange.get_open_orders(topic_filter, &credential)).await {
                Ok(open) if open.iter().any(|o| o.order_id == order_id) => {
                    self.log.warn(format!(
                        "⚠️ Order {} still open (retry {}/{})",
                        order_id, attempt, attempts
                    ));
                    return Ok(false);
                }
                Ok(_) => {}
                Err(StrategyError::Recoverable(msg)) => {
                    self.log
                        .warn(format!("⚠️ Verify retry {}/{} failed: {}", attempt, attempts, msg));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(true)
    }

    /// Append to the ledger; failures are logged, never fatal
    pub fn record(&self, trade: Trade) -> Option<i64> {
        match self.ledger.record(&trade) {
            Ok(id) => Some(id),
            Err(e) => {
                self.log.error(format!("❌ Failed to record trade: {}", e));
                None
            }
        }
    }
}

/// How a worker ended
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerExit {
    Stopped,
    Completed(String),
    Failed(String),
}

/// Poll until stopped, completed or failed, then let the strategy clean up
pub async fn run(mut strategy: Box<dyn Strategy>, ctx: StrategyContext, interval: Duration) -> WorkerExit {
    let mut cancel = ctx.cancel.clone();
    let max_failures = ctx.settings.max_credential_failures;
    let mut credential_failures = 0u32;

    ctx.log.info(format!("🚀 Starting {}", strategy.name()));

    let exit = loop {
        if ctx.is_cancelled() {
            break WorkerExit::Stopped;
        }

        ctx.refresh_credential();
        let result = strategy.poll(&ctx).await;
        let credential_failed = ctx.take_credential_failure()
            || matches!(result, Err(StrategyError::CredentialExpired(_)));

        match result {
            Ok(PollOutcome::Continue) => {}
            Ok(PollOutcome::Completed(msg)) => break WorkerExit::Completed(msg),
            Err(StrategyError::Cancelled) => break WorkerExit::Stopped,
            Err(StrategyError::Fatal(msg)) => break WorkerExit::Failed(msg),
            Err(StrategyError::Recoverable(msg)) => ctx.log.warn(format!("⚠️ {}", msg)),
            Err(StrategyError::CredentialExpired(msg)) => {
                ctx.log.warn(format!("🔑 Credential expired: {}, placement skipped", msg));
            }
        }

        if credential_failed {
            credential_failures += 1;
            if credential_failures >= max_failures {
                break WorkerExit::Failed(format!(
                    "Auth token rejected {} cycles in a row, update the token and create a new task",
                    credential_failures
                ));
            }
        } else {
            credential_failures = 0;
        }

        let stop_signalled = tokio::select! {
            _ = tokio::time::sleep(interval) => false,
            _ = cancel.wait_for(|c| *c) => true,
        };
        if stop_signalled {
            break WorkerExit::Stopped;
        }
    };

    strategy.shutdown(&ctx).await;

    match &exit {
        WorkerExit::Stopped => ctx.log.info(format!("⛔ {} stopped", strategy.name())),
        WorkerExit::Completed(msg) => ctx.log.info(format!("✅ {}", msg)),
        WorkerExit::Failed(msg) => ctx.log.error(format!("❌ {}", msg)),
    }

    exit
}
