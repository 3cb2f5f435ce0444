mod common;

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal_macros::dec;
use serde_json::json;
use std::time::Duration;

use common::*;
use opinion_taskbot::error::{ExchangeError, TaskError};
use opinion_taskbot::orderbook::BookSide;
use opinion_taskbot::task::{MarketMakerConfig, SellSharesConfig, TaskConfig, TaskStatus};
use opinion_taskbot::task_log::LogOrder;
use opinion_taskbot::types::{OutcomeSide, PricingMode, Side};

fn market_maker() -> TaskConfig {
    TaskConfig::MarketMaker(MarketMakerConfig {
        url: format!("https://app.opinion.trade/detail?topicId={}", EVENT_TOPIC),
        outcome: "alice".to_string(),
        amount: dec!(10),
        mode: PricingMode::Standard,
        min_volume: dec!(5),
        interval: 0.01,
        single_order_side: None,
    })
}

#[tokio::test]
async fn test_invalid_config_never_creates_task() {
    let h = harness(FakeExchange::new());

    let err = TaskConfig::from_json(json!({
        "type": "market_maker",
        "config": {"url": "somewhere", "outcome": "Alice", "amount": 10}
    }))
    .unwrap_err();
    assert!(matches!(err, TaskError::InvalidConfig(_)));

    let mut bad = market_maker();
    if let TaskConfig::MarketMaker(c) = &mut bad {
        c.interval = f64::NAN;
    }
    assert!(matches!(h.registry.create(bad), Err(TaskError::InvalidConfig(_))));
    assert!(h.registry.list().is_empty());
}

#[tokio::test]
async fn test_unknown_task_not_found() {
    let h = harness(FakeExchange::new());

    assert!(matches!(h.registry.start("task_deadbeef"), Err(TaskError::NotFound(_))));
    assert!(matches!(h.registry.stop("task_deadbeef").await, Err(TaskError::NotFound(_))));
    assert!(matches!(
        h.registry.logs("task_deadbeef", 10, LogOrder::Chronological),
        Err(TaskError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_double_start_rejected() {
    let h = harness(FakeExchange::new());
    let task = h.registry.create(market_maker()).unwrap();
    assert_eq!(task.status, TaskStatus::Pending);

    let started = h.registry.start(&task.id).unwrap();
    assert_eq!(started.status, TaskStatus::Running);

    let err = h.registry.start(&task.id).unwrap_err();
    assert_eq!(
        err,
        TaskError::InvalidTransition {
            from: TaskStatus::Running,
            action: "start"
        }
    );

    // One worker quotes each side exactly once while the book stays put
    wait_until("both buys placed", || h.exchange.placed_count() >= 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.exchange.placed_count(), 2);

    h.registry.stop(&task.id).await.unwrap();
}

#[tokio::test]
async fn test_transitions_from_wrong_status() {
    let h = harness(FakeExchange::new());
    let task = h.registry.create(market_maker()).unwrap();

    let err = h.registry.stop(&task.id).await.unwrap_err();
    assert!(matches!(
        err,
        TaskError::InvalidTransition {
            from: TaskStatus::Pending,
            ..
        }
    ));
    assert_eq!(h.registry.get(&task.id).unwrap().status, TaskStatus::Pending);

    h.registry.start(&task.id).unwrap();
    let stopped = h.registry.stop(&task.id).await.unwrap();
    assert_eq!(stopped.status, TaskStatus::Stopped);
    assert!(stopped.stopped_at.is_some());

    // Stopped is terminal
    assert!(matches!(
        h.registry.start(&task.id),
        Err(TaskError::InvalidTransition {
            from: TaskStatus::Stopped,
            ..
        })
    ));
    assert!(matches!(
        h.registry.stop(&task.id).await,
        Err(TaskError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_nothing_happens_after_stop() {
    let h = harness(FakeExchange::new());
    let task = h.registry.create(market_maker()).unwrap();
    h.registry.start(&task.id).unwrap();
    wait_until("both buys placed", || h.exchange.placed_count() >= 2).await;

    h.registry.stop(&task.id).await.unwrap();
    let log_count = h.registry.get(&task.id).unwrap().log_count;
    let placed = h.exchange.placed_count();

    // Resting buys were cancelled on the way out
    assert_eq!(h.exchange.cancelled.lock().len(), 2);
    let logs = h.registry.logs(&task.id, 1, LogOrder::NewestFirst).unwrap();
    assert!(logs[0].contains("stopped"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.registry.get(&task.id).unwrap().log_count, log_count);
    assert_eq!(h.exchange.placed_count(), placed);
}

#[tokio::test]
async fn test_credential_update_seen_next_cycle() {
    let mut settings = fast_settings();
    settings.max_credential_failures = 1000;
    let h = harness_with(FakeExchange::new(), settings);
    h.exchange.rejected_tokens.lock().push("good-token".to_string());

    let task = h.registry.create(market_maker()).unwrap();
    h.registry.start(&task.id).unwrap();

    wait_until("a credential failure", || {
        h.registry
            .logs(&task.id, 50, LogOrder::Chronological)
            .unwrap()
            .iter()
            .any(|l| l.contains("Credential expired"))
    })
    .await;
    assert_eq!(h.exchange.placed_count(), 0);

    h.tokens.set("fresh-token");
    wait_until("orders with the new token", || h.exchange.placed_count() >= 2).await;

    assert!(h.exchange.placed().iter().all(|p| p.token == "fresh-token"));
    assert_eq!(h.registry.get(&task.id).unwrap().status, TaskStatus::Running);
    h.registry.stop(&task.id).await.unwrap();
}

#[tokio::test]
async fn test_expired_credential_escalates_to_error() {
    let h = harness(FakeExchange::new());
    h.tokens
        .set_issued_at("old-token", Utc::now() - ChronoDuration::hours(25));

    let task = h.registry.create(market_maker()).unwrap();
    h.registry.start(&task.id).unwrap();

    let failed = wait_for_status(&h.registry, &task.id, TaskStatus::Error).await;
    assert!(failed.error.unwrap().contains("Auth token rejected 3 cycles"));
    assert_eq!(h.exchange.placed_count(), 0);

    let last = h.registry.logs(&task.id, 1, LogOrder::NewestFirst).unwrap();
    assert!(last[0].contains("❌"));
}

#[tokio::test]
async fn test_missing_outcome_is_fatal() {
    let h = harness(FakeExchange::new());
    let mut config = market_maker();
    if let TaskConfig::MarketMaker(c) = &mut config {
        c.outcome = "Zed".to_string();
    }

    let task = h.registry.create(config).unwrap();
    h.registry.start(&task.id).unwrap();

    let failed = wait_for_status(&h.registry, &task.id, TaskStatus::Error).await;
    let error = failed.error.unwrap();
    assert!(error.contains("Zed"));
    assert!(error.contains("Alice"));
}

#[tokio::test]
async fn test_logs_bounded_and_ordered() {
    let h = harness(FakeExchange::new());
    let task = h.registry.create(market_maker()).unwrap();
    h.registry.start(&task.id).unwrap();
    wait_until("both buys placed", || h.exchange.placed_count() >= 2).await;
    h.registry.stop(&task.id).await.unwrap();

    let chronological = h.registry.logs(&task.id, 3, LogOrder::Chronological).unwrap();
    let newest_first = h.registry.logs(&task.id, 3, LogOrder::NewestFirst).unwrap();
    assert_eq!(chronological.len(), 3);
    assert_eq!(chronological.last(), newest_first.first());

    let all = h.registry.logs(&task.id, 10_000, LogOrder::Chronological).unwrap();
    assert!(all[0].contains("Starting Market Maker"));
    assert!(all.iter().all(|l| l.starts_with('[')));
}

#[tokio::test]
async fn test_market_maker_round_trip() {
    let h = harness(FakeExchange::new());
    let task = h.registry.create(market_maker()).unwrap();
    h.registry.start(&task.id).unwrap();

    wait_until("both buys placed", || h.exchange.placed_count() >= 2).await;
    let buys = h.exchange.placed();
    assert!(buys.iter().all(|p| p.request.side == Side::Buy));
    assert_eq!(buys[0].request.price, dec!(0.50));
    assert_eq!(buys[0].request.shares, dec!(20));
    assert_eq!(buys[1].request.price, dec!(0.40));
    assert_eq!(buys[1].request.shares, dec!(25));

    h.exchange.fill_all();
    wait_until("both sells placed", || h.exchange.placed_count() >= 4).await;
    let sells: Vec<_> = h
        .exchange
        .placed()
        .into_iter()
        .filter(|p| p.request.side == Side::Sell)
        .collect();
    assert_eq!(sells.len(), 2);
    assert!(sells.iter().any(|p| p.request.price == dec!(0.55) && p.request.shares == dec!(20)));

    h.exchange.fill_all();
    wait_until("sells recorded", || h.ledger.stats().unwrap().total_trades >= 4).await;
    h.registry.stop(&task.id).await.unwrap();

    let stats = h.ledger.stats().unwrap();
    // (0.55 - 0.50) * 20 + (0.45 - 0.40) * 25
    assert_eq!(stats.total_profit, dec!(2.25));
    assert_eq!(stats.wins, 2);
}

#[tokio::test]
async fn test_history_includes_archived_tasks() {
    let h = harness(FakeExchange::new());
    let task = h
        .registry
        .create(TaskConfig::SellShares(SellSharesConfig {
            topic_id: Some(7),
            mode: PricingMode::Standard,
            min_volume: dec!(5),
            interval: 0.01,
        }))
        .unwrap();

    let archived = h.ledger.find_task(&task.id).unwrap().unwrap();
    assert_eq!(archived.status, TaskStatus::Pending);
    assert_eq!(h.registry.history(10).len(), 1);
}

fn count_logs(h: &Harness, id: &str, needle: &str) -> usize {
    h.registry
        .logs(id, 5000, LogOrder::Chronological)
        .unwrap()
        .iter()
        .filter(|l| l.contains(needle))
        .count()
}

/// YES bid moves up to 0.52 with plenty of depth
fn raise_yes_bid(h: &Harness) {
    h.exchange.book.lock().yes = BookSide::from_levels(&[(dec!(0.52), dec!(100))], &[(dec!(0.55), dec!(100))]);
}

#[tokio::test]
async fn test_interval_too_large_rejected() {
    let h = harness(FakeExchange::new());
    let task = TaskConfig::SellShares(SellSharesConfig {
        topic_id: None,
        mode: PricingMode::Standard,
        min_volume: dec!(5),
        interval: 1e20,
    });

    assert!(matches!(h.registry.create(task), Err(TaskError::InvalidConfig(_))));
    assert!(h.registry.list().is_empty());
}

#[tokio::test]
async fn test_book_errors_keep_task_running() {
    for error in [
        ExchangeError::Network("connection reset".to_string()),
        ExchangeError::RateLimited("slow down".to_string()),
        ExchangeError::Timeout,
    ] {
        let h = harness(FakeExchange::new());
        let needle = error.to_string();
        *h.exchange.book_error.lock() = Some(error);

        let task = h.registry.create(market_maker()).unwrap();
        h.registry.start(&task.id).unwrap();

        wait_until("repeated failures", || count_logs(&h, &task.id, &needle) >= 3).await;
        assert_eq!(h.registry.get(&task.id).unwrap().status, TaskStatus::Running);
        assert_eq!(h.exchange.placed_count(), 0);

        *h.exchange.book_error.lock() = None;
        wait_until("both buys placed", || h.exchange.placed_count() >= 2).await;
        h.registry.stop(&task.id).await.unwrap();
    }
}

#[tokio::test]
async fn test_placement_timeout_keeps_task_running() {
    let h = harness(FakeExchange::new());
    *h.exchange.place_error.lock() = Some(ExchangeError::Timeout);

    let task = h.registry.create(market_maker()).unwrap();
    h.registry.start(&task.id).unwrap();

    wait_until("failed placements", || count_logs(&h, &task.id, "request timed out") >= 4).await;
    assert_eq!(h.registry.get(&task.id).unwrap().status, TaskStatus::Running);
    assert_eq!(h.exchange.placed_count(), 0);

    *h.exchange.place_error.lock() = None;
    wait_until("both buys placed", || h.exchange.placed_count() >= 2).await;
    assert_eq!(h.registry.get(&task.id).unwrap().status, TaskStatus::Running);
    h.registry.stop(&task.id).await.unwrap();
}

#[tokio::test]
async fn test_resting_buys_not_resubmitted() {
    let h = harness(FakeExchange::new());
    let task = h.registry.create(market_maker()).unwrap();
    h.registry.start(&task.id).unwrap();
    wait_until("both buys placed", || h.exchange.placed_count() >= 2).await;

    // Roughly fifteen cycles against an unchanged book
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(h.exchange.placed_count(), 2);
    assert_eq!(h.exchange.open_count(), 2);
    assert!(h.exchange.cancelled.lock().is_empty());
    h.registry.stop(&task.id).await.unwrap();
}

#[tokio::test]
async fn test_outbid_buy_is_replaced() {
    let h = harness(FakeExchange::new());
    let task = h.registry.create(market_maker()).unwrap();
    h.registry.start(&task.id).unwrap();
    wait_until("both buys placed", || h.exchange.placed_count() >= 2).await;
    let first_yes = h.exchange.placed()[0].clone();
    assert_eq!(first_yes.request.outcome, OutcomeSide::Yes);

    raise_yes_bid(&h);
    wait_until("replacement buy", || h.exchange.placed_count() >= 3).await;

    let replacement = h.exchange.placed()[2].clone();
    assert_eq!(replacement.request.side, Side::Buy);
    assert_eq!(replacement.request.outcome, OutcomeSide::Yes);
    assert_eq!(replacement.request.price, dec!(0.52));
    assert_eq!(replacement.request.shares, dec!(19.23));
    assert_eq!(*h.exchange.cancelled.lock(), vec![first_yes.order_id]);

    // Matching the new best bid, so it stays put
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.exchange.placed_count(), 3);
    h.registry.stop(&task.id).await.unwrap();
}

#[tokio::test]
async fn test_partly_filled_buy_sells_what_it_got() {
    let h = harness(FakeExchange::new());
    let task = h.registry.create(market_maker()).unwrap();
    h.registry.start(&task.id).unwrap();
    wait_until("both buys placed", || h.exchange.placed_count() >= 2).await;
    let first_yes = h.exchange.placed()[0].clone();

    h.exchange.partial_fill(&first_yes.order_id, dec!(8));
    raise_yes_bid(&h);
    wait_until("sell for the filled part", || h.exchange.placed_count() >= 3).await;

    let sell = h.exchange.placed()[2].clone();
    assert_eq!(sell.request.side, Side::Sell);
    assert_eq!(sell.request.outcome, OutcomeSide::Yes);
    assert_eq!(sell.request.shares, dec!(8));
    assert_eq!(sell.request.price, dec!(0.55));

    let buys: Vec<_> = h
        .ledger
        .list(10, 0)
        .unwrap()
        .into_iter()
        .filter(|t| t.action == Side::Buy)
        .collect();
    assert_eq!(buys.len(), 1);
    assert_eq!(buys[0].shares, dec!(8));
    assert_eq!(buys[0].price, dec!(0.50));

    h.registry.stop(&task.id).await.unwrap();
}
