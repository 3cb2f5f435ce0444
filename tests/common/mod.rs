//! In-process exchange and registry fixtures shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opinion_taskbot::alerts::AlertClient;
use opinion_taskbot::config::EngineSettings;
use opinion_taskbot::error::ExchangeError;
use opinion_taskbot::exchange::{EventRef, ExchangeClient};
use opinion_taskbot::orderbook::{BookSide, OrderBookSnapshot};
use opinion_taskbot::task::{TaskRegistry, TaskStatus, TaskView};
use opinion_taskbot::token_store::{Credential, TokenStore};
use opinion_taskbot::trade_db::TradeLedger;
use opinion_taskbot::types::{OpenOrder, OrderRequest, OutcomeMarket, OutcomeSide, PlacedOrder, Position, Side};

pub const EVENT_TOPIC: u64 = 100;
pub const CHILD_TOPIC: u64 = 101;

/// Order as the fake exchange saw it
#[derive(Debug, Clone)]
pub struct Placed {
    pub order_id: String,
    pub request: OrderRequest,
    pub token: String,
}

/// Scriptable stand-in for the exchange
#[derive(Default)]
pub struct FakeExchange {
    pub outcomes: Mutex<Vec<OutcomeMarket>>,
    pub book: Mutex<OrderBookSnapshot>,
    pub positions: Mutex<Vec<Position>>,
    pub open: Mutex<Vec<(OpenOrder, OrderRequest)>>,
    pub placed: Mutex<Vec<Placed>>,
    pub cancelled: Mutex<Vec<String>>,
    pub splits: Mutex<Vec<Decimal>>,
    pub split_error: Mutex<Option<ExchangeError>>,
    /// Tokens the exchange answers with 401
    pub rejected_tokens: Mutex<Vec<String>>,
    /// Returned by every depth request while set
    pub book_error: Mutex<Option<ExchangeError>>,
    /// Returned by every placement while set; nothing is placed
    pub place_error: Mutex<Option<ExchangeError>>,
    /// Orders fill the moment they are placed
    pub fill_immediately: AtomicBool,
    next_id: AtomicU64,
}

pub fn market(title: &str, topic_id: u64) -> OutcomeMarket {
    OutcomeMarket {
        event_title: "Who wins?".to_string(),
        title: title.to_string(),
        topic_id,
        question_id: format!("q{}", topic_id),
        yes_token_id: format!("yes-{}", topic_id),
        no_token_id: format!("no-{}", topic_id),
    }
}

/// Deep two-sided book: bid 0.50, ask 0.55 on YES; bid 0.40, ask 0.45 on NO
pub fn deep_book() -> OrderBookSnapshot {
    OrderBookSnapshot {
        yes: BookSide::from_levels(&[(dec!(0.50), dec!(100))], &[(dec!(0.55), dec!(100))]),
        no: BookSide::from_levels(&[(dec!(0.40), dec!(100))], &[(dec!(0.45), dec!(100))]),
    }
}

pub fn position(parent: u64, child: u64, side: OutcomeSide, shares: Decimal) -> Position {
    Position {
        topic_id: child,
        parent_topic_id: parent,
        title: format!("Outcome {}", child),
        side,
        token_id: format!("{}-{}", side.as_str().to_lowercase(), child),
        shares,
        frozen: Decimal::ZERO,
        last_price: dec!(0.5),
    }
}

impl FakeExchange {
    pub fn new() -> Arc<Self> {
        let fake = Self::default();
        *fake.outcomes.lock() = vec![market("Alice", CHILD_TOPIC), market("Bob", CHILD_TOPIC + 1)];
        *fake.book.lock() = deep_book();
        Arc::new(fake)
    }

    pub fn filling() -> Arc<Self> {
        let fake = Self::new();
        fake.fill_immediately.store(true, Ordering::SeqCst);
        fake
    }

    pub fn placed(&self) -> Vec<Placed> {
        self.placed.lock().clone()
    }

    pub fn placed_count(&self) -> usize {
        self.placed.lock().len()
    }

    pub fn open_count(&self) -> usize {
        self.open.lock().len()
    }

    /// Match `shares` of a resting order without taking it off the book
    pub fn partial_fill(&self, order_id: &str, shares: Decimal) {
        let mut open = self.open.lock();
        let Some((order, request)) = open.iter_mut().find(|(o, _)| o.order_id == order_id) else {
            panic!("order {} is not resting", order_id);
        };
        order.filled += shares;
        if request.side == Side::Sell {
            for p in self.positions.lock().iter_mut().filter(|p| p.token_id == request.token_id) {
                p.shares -= shares;
                p.frozen = (p.frozen - shares).max(Decimal::ZERO);
            }
        }
    }

    /// Fill every resting order
    pub fn fill_all(&self) {
        let filled: Vec<OrderRequest> = self.open.lock().drain(..).map(|(_, req)| req).collect();
        for request in filled {
            self.settle(&request);
        }
    }

    /// Sold shares leave the position list
    fn settle(&self, request: &OrderRequest) {
        if request.side == Side::Sell {
            self.positions.lock().retain(|p| p.token_id != request.token_id);
        }
    }

    fn check(&self, credential: &Credential) -> Result<(), ExchangeError> {
        if self.rejected_tokens.lock().contains(&credential.token) {
            return Err(ExchangeError::Unauthorized("token expired".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeClient for FakeExchange {
    async fn get_outcomes(&self, event: &EventRef) -> Result<Vec<OutcomeMarket>, ExchangeError> {
        let outcomes = self.outcomes.lock().clone();
        if event.topic_id == EVENT_TOPIC {
            return Ok(outcomes);
        }
        // Any other parent topic gets markets built from its held positions
        Ok(self
            .positions
            .lock()
            .iter()
            .filter(|p| p.parent_topic_id == event.topic_id)
            .map(|p| market(&p.title, p.topic_id))
            .collect())
    }

    async fn get_order_book(&self, _market: &OutcomeMarket) -> Result<OrderBookSnapshot, ExchangeError> {
        if let Some(e) = self.book_error.lock().clone() {
            return Err(e);
        }
        Ok(self.book.lock().clone())
    }

    /// Ignores the filter so strategies must apply it themselves
    async fn get_positions(
        &self,
        _topic_filter: Option<u64>,
        credential: &Credential,
    ) -> Result<Vec<Position>, ExchangeError> {
        self.check(credential)?;
        Ok(self.positions.lock().clone())
    }

    async fn get_open_orders(
        &self,
        _topic_filter: Option<u64>,
        credential: &Credential,
    ) -> Result<Vec<OpenOrder>, ExchangeError> {
        self.check(credential)?;
        Ok(self.open.lock().iter().map(|(o, _)| o.clone()).collect())
    }

    async fn place_order(&self, order: &OrderRequest, credential: &Credential) -> Result<PlacedOrder, ExchangeError> {
        self.check(credential)?;
        if let Some(e) = self.place_error.lock().clone() {
            return Err(e);
        }
        let id = format!("ord-{}", self.next_id.fetch_add(1, Ordering::SeqCst));

        self.placed.lock().push(Placed {
            order_id: id.clone(),
            request: order.clone(),
            token: credential.token.clone(),
        });

        if self.fill_immediately.load(Ordering::SeqCst) {
            self.settle(order);
        } else {
            let open = OpenOrder {
                order_id: id.clone(),
                trans_no: id.clone(),
                price: order.price,
                filled: Decimal::ZERO,
            };
            self.open.lock().push((open, order.clone()));
        }

        Ok(PlacedOrder {
            order_id: id.clone(),
            trans_no: id,
        })
    }

    async fn cancel_order(&self, order: &PlacedOrder, credential: &Credential) -> Result<(), ExchangeError> {
        self.check(credential)?;
        self.open.lock().retain(|(o, _)| o.order_id != order.order_id);
        self.cancelled.lock().push(order.order_id.clone());
        Ok(())
    }

    async fn split(
        &self,
        _market: &OutcomeMarket,
        amount: Decimal,
        credential: &Credential,
    ) -> Result<Decimal, ExchangeError> {
        self.check(credential)?;
        if let Some(e) = self.split_error.lock().clone() {
            return Err(e);
        }
        self.splits.lock().push(amount);
        Ok(amount)
    }
}

pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        request_timeout: Duration::from_secs(2),
        max_credential_failures: 3,
        fill_verify_attempts: 1,
        fill_verify_delay: Duration::from_millis(1),
        tick: dec!(0.01),
        ..EngineSettings::default()
    }
}

pub struct Harness {
    pub registry: TaskRegistry,
    pub exchange: Arc<FakeExchange>,
    pub tokens: Arc<TokenStore>,
    pub ledger: Arc<TradeLedger>,
}

pub fn harness(exchange: Arc<FakeExchange>) -> Harness {
    harness_with(exchange, fast_settings())
}

pub fn harness_with(exchange: Arc<FakeExchange>, settings: EngineSettings) -> Harness {
    let tokens = Arc::new(TokenStore::new());
    tokens.set("good-token");
    let ledger = Arc::new(TradeLedger::in_memory().unwrap());
    let registry = TaskRegistry::new(
        exchange.clone(),
        tokens.clone(),
        ledger.clone(),
        settings,
        AlertClient::disabled(),
    );

    Harness {
        registry,
        exchange,
        tokens,
        ledger,
    }
}

/// Poll until `cond` holds, panicking after five seconds
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_status(registry: &TaskRegistry, id: &str, status: TaskStatus) -> TaskView {
    wait_until(&format!("{} to become {}", id, status), || {
        registry.get(id).map(|t| t.status == status).unwrap_or(false)
    })
    .await;
    registry.get(id).unwrap()
}
