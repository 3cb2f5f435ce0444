//! Opinion.trade HTTP client

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use super::signer::{to_wei, OrderSigner, CHAIN_ID};
use super::{EventRef, ExchangeClient};
use crate::auth::{base_headers, bearer_headers};
use crate::config::Config;
use crate::error::ExchangeError;
use crate::orderbook::{BookSide, OrderBookSnapshot};
use crate::token_store::Credential;
use crate::types::{OpenOrder, OrderRequest, OutcomeMarket, OutcomeSide, PlacedOrder, Position};

/// USDT on BNB Chain
const CURRENCY_ADDRESS: &str = "0x55d398326f99059fF775485246999027B3197955";
const PAGE_LIMIT: u32 = 100;

pub struct OpinionClient {
    client: Client,
    base_url: String,
    wallet_address: String,
    signer: Option<OrderSigner>,
    dry_run: bool,
    /// Synthetic orders resting in dry-run mode
    dry_orders: DashMap<String, OpenOrder>,
}

impl OpinionClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .tcp_nodelay(true)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .context("Failed to build HTTP client")?;

        let signer = match &config.private_key {
            Some(key) => Some(OrderSigner::new(key, config.multisig_address.as_deref())?),
            None => None,
        };

        if config.dry_run {
            info!("🧪 DRY RUN: orders will not be signed or submitted");
        }

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            wallet_address: config.wallet_address.clone().unwrap_or_default(),
            signer,
            dry_run: config.dry_run,
            dry_orders: DashMap::new(),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)], headers: HeaderMap) -> Result<Value, ExchangeError> {
        let start = Instant::now();
        let url = format!("{}{}", self.base_url, path);

        let response = self.client.get(&url).headers(headers).query(query).send().await?;
        let status = response.status();
        let body: Value = response.json().await?;

        trace!("GET {} -> {} in {:?}", path, status, start.elapsed());
        classify(status, body, false)
    }

    async fn post(&self, path: &str, payload: &Value, headers: HeaderMap) -> Result<Value, ExchangeError> {
        let start = Instant::now();
        let url = format!("{}{}", self.base_url, path);

        let response = self.client.post(&url).headers(headers).json(payload).send().await?;
        let status = response.status();
        let body: Value = response.json().await?;

        debug!("POST {} -> {} in {:?}", path, status, start.elapsed());
        classify(status, body, true)
    }

    fn signer(&self) -> Result<&OrderSigner, ExchangeError> {
        self.signer
            .as_ref()
            .ok_or_else(|| ExchangeError::Rejected("PRIVATE_KEY not configured".to_string()))
    }
}

#[async_trait]
impl ExchangeClient for OpinionClient {
    async fn get_outcomes(&self, event: &EventRef) -> Result<Vec<OutcomeMarket>, ExchangeError> {
        let path = format!("/v2/topic/mutil/{}", event.topic_id);
        let result = self.get(&path, &[], base_headers()).await?;

        let data = &result["data"];
        let children = data["childList"]
            .as_array()
            .ok_or_else(|| ExchangeError::Decode(format!("no childList for {}", event)))?;
        let event_title = data["title"].as_str().unwrap_or("Unknown");

        Ok(children
            .iter()
            .filter_map(|child| parse_outcome(child, event_title))
            .collect())
    }

    async fn get_order_book(&self, market: &OutcomeMarket) -> Result<OrderBookSnapshot, ExchangeError> {
        let mut books = [BookSide::default(), BookSide::default()];

        for (i, side) in OutcomeSide::BOTH.iter().enumerate() {
            let symbol_types = match side {
                OutcomeSide::Yes => "0",
                OutcomeSide::No => "1",
            };
            let query = [
                ("question_id", market.question_id.clone()),
                ("symbol", market.token_id(*side).to_string()),
                ("chainId", CHAIN_ID.to_string()),
                ("symbol_types", symbol_types.to_string()),
            ];
            let result = self.get("/v2/order/market/depth", &query, base_headers()).await?;
            books[i] = BookSide::from_levels(&parse_levels(&result["bids"]), &parse_levels(&result["asks"]));
        }

        let [yes, no] = books;
        Ok(OrderBookSnapshot { yes, no })
    }

    async fn get_positions(
        &self,
        topic_filter: Option<u64>,
        credential: &Credential,
    ) -> Result<Vec<Position>, ExchangeError> {
        let mut query = vec![
            ("page", "1".to_string()),
            ("limit", PAGE_LIMIT.to_string()),
            ("walletAddress", self.wallet_address.clone()),
        ];
        if let Some(topic_id) = topic_filter {
            query.push(("parentTopicId", topic_id.to_string()));
        }

        let result = self.get("/v2/portfolio", &query, bearer_headers(credential)?).await?;
        Ok(list(&result).iter().filter_map(parse_position).collect())
    }

    async fn get_open_orders(
        &self,
        topic_filter: Option<u64>,
        credential: &Credential,
    ) -> Result<Vec<OpenOrder>, ExchangeError> {
        if self.dry_run {
            return Ok(self.dry_orders.iter().map(|e| e.value().clone()).collect());
        }

        let mut query = vec![
            ("page", "1".to_string()),
            ("limit", PAGE_LIMIT.to_string()),
            ("walletAddress", self.wallet_address.clone()),
            ("queryType", "1".to_string()),
        ];
        if let Some(topic_id) = topic_filter {
            query.push(("parentTopicId", topic_id.to_string()));
        }

        let result = self.get("/v2/order", &query, bearer_headers(credential)?).await?;
        Ok(list(&result)
            .iter()
            .filter_map(|o| {
                Some(OpenOrder {
                    order_id: string_field(&o["orderId"])?,
                    trans_no: string_field(&o["transNo"]).unwrap_or_default(),
                    price: decimal_field(&o["price"]).unwrap_or_default(),
                    filled: decimal_field(&o["filledShares"])
                        .or_else(|| decimal_field(&o["filled"]))
                        .unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn place_order(
        &self,
        order: &OrderRequest,
        credential: &Credential,
    ) -> Result<PlacedOrder, ExchangeError> {
        let price = order.price.round_dp(3);

        if self.dry_run {
            let id = format!("dry-{}", uuid::Uuid::new_v4().simple());
            info!(
                "🧪 [DRY RUN] {} {} {} @ {} ({})",
                order.side, order.shares, order.outcome, price, id
            );
            self.dry_orders.insert(
                id.clone(),
                OpenOrder {
                    order_id: id.clone(),
                    trans_no: id.clone(),
                    price,
                    filled: Decimal::ZERO,
                },
            );
            return Ok(PlacedOrder {
                order_id: id.clone(),
                trans_no: id,
            });
        }

        let signed = self
            .signer()?
            .create_order(&order.token_id, price, order.shares, order.side)
            .map_err(|e| ExchangeError::Rejected(format!("signing failed: {}", e)))?;

        let payload = json!({
            "topicId": order.topic_id,
            "contractAddress": "",
            "price": price.to_string(),
            "tradingMethod": 2,
            "salt": signed.salt,
            "maker": signed.maker,
            "signer": signed.signer,
            "taker": signed.taker,
            "tokenId": signed.token_id,
            "makerAmount": signed.maker_amount,
            "takerAmount": signed.taker_amount,
            "expiration": "0",
            "nonce": "0",
            "feeRateBps": "0",
            "side": signed.side.to_string(),
            "signatureType": "2",
            "signature": signed.signature,
            "timestamp": chrono::Utc::now().timestamp(),
            "sign": signed.signature,
            "safeRate": "0.05",
            "orderExpTime": "0",
            "currencyAddress": CURRENCY_ADDRESS,
            "chainId": CHAIN_ID
        });

        let result = self.post("/v2/order", &payload, bearer_headers(credential)?).await?;
        let data = &result["orderData"];
        let order_id = string_field(&data["orderId"])
            .ok_or_else(|| ExchangeError::Decode("order response without orderId".to_string()))?;

        info!("Order placed: {} {} {} @ {} ({})", order.side, order.shares, order.outcome, price, order_id);
        Ok(PlacedOrder {
            trans_no: string_field(&data["transNo"]).unwrap_or_else(|| order_id.clone()),
            order_id,
        })
    }

    async fn cancel_order(&self, order: &PlacedOrder, credential: &Credential) -> Result<(), ExchangeError> {
        if self.dry_run {
            self.dry_orders.remove(&order.order_id);
            return Ok(());
        }

        let payload = json!({
            "trans_no": order.trans_no,
            "chainId": CHAIN_ID
        });
        self.post("/v1/order/cancel/order", &payload, bearer_headers(credential)?)
            .await?;
        Ok(())
    }

    async fn split(
        &self,
        market: &OutcomeMarket,
        amount: Decimal,
        credential: &Credential,
    ) -> Result<Decimal, ExchangeError> {
        if self.dry_run {
            info!("🧪 [DRY RUN] split {} USDT on {}", amount, market.title);
            return Ok(amount);
        }

        let wei = to_wei(amount).map_err(|e| ExchangeError::Rejected(e.to_string()))?;
        let payload = json!({
            "topicId": market.topic_id,
            "questionId": market.question_id,
            "amount": wei,
            "walletAddress": self.wallet_address,
            "chainId": CHAIN_ID
        });

        let result = self.post("/v1/order/split", &payload, bearer_headers(credential)?).await?;
        // One YES+NO pair per USDT unless the exchange reports otherwise
        Ok(decimal_field(&result["shares"]).unwrap_or(amount))
    }
}

/// Map HTTP status and the `{errno, errmsg, result}` envelope to a result
fn classify(status: StatusCode, body: Value, mutating: bool) -> Result<Value, ExchangeError> {
    let message = body["errmsg"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| status.to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(ExchangeError::Unauthorized(message)),
        StatusCode::TOO_MANY_REQUESTS => return Err(ExchangeError::RateLimited(message)),
        s if !s.is_success() => return Err(ExchangeError::Api(format!("HTTP {}: {}", s, message))),
        _ => {}
    }

    let errno = body["errno"].as_i64().unwrap_or(0);
    if errno == 0 {
        return Ok(body["result"].clone());
    }

    let lower = message.to_lowercase();
    if lower.contains("token") || lower.contains("auth") || lower.contains("login") {
        Err(ExchangeError::Unauthorized(message))
    } else if lower.contains("insufficient") || lower.contains("balance") {
        Err(ExchangeError::InsufficientBalance(message))
    } else if lower.contains("too many") || lower.contains("frequent") {
        Err(ExchangeError::RateLimited(message))
    } else if mutating {
        warn!("Exchange rejected request (errno {}): {}", errno, message);
        Err(ExchangeError::Rejected(message))
    } else {
        Err(ExchangeError::Api(format!("errno {}: {}", errno, message)))
    }
}

fn list(result: &Value) -> &[Value] {
    result["list"].as_array().map(Vec::as_slice).unwrap_or(&[])
}

fn string_field(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn decimal_field(v: &Value) -> Option<Decimal> {
    match v {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

fn parse_levels(v: &Value) -> Vec<(Decimal, Decimal)> {
    v.as_array()
        .map(|levels| {
            levels
                .iter()
                .filter_map(|l| Some((decimal_field(l.get(0)?)?, decimal_field(l.get(1)?)?)))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_outcome(child: &Value, event_title: &str) -> Option<OutcomeMarket> {
    Some(OutcomeMarket {
        event_title: event_title.to_string(),
        title: child["title"].as_str()?.to_string(),
        topic_id: child["topicId"].as_u64()?,
        question_id: string_field(&child["questionId"])?,
        yes_token_id: string_field(&child["yesPos"])?,
        no_token_id: string_field(&child["noPos"])?,
    })
}

fn parse_position(p: &Value) -> Option<Position> {
    let title = p["childTopicTitle"]
        .as_str()
        .or_else(|| p["topicTitle"].as_str())
        .unwrap_or("Unknown");

    Some(Position {
        topic_id: p["topicId"].as_u64()?,
        parent_topic_id: p["mutilTopicId"].as_u64().unwrap_or_default(),
        title: title.to_string(),
        side: if p["outcomeSide"].as_i64() == Some(1) {
            OutcomeSide::Yes
        } else {
            OutcomeSide::No
        },
        token_id: string_field(&p["tokenId"])?,
        shares: decimal_field(&p["tokenAmount"]).unwrap_or_default(),
        frozen: decimal_field(&p["tokenFrozenAmount"]).unwrap_or_default(),
        last_price: decimal_field(&p["lastPrice"]).unwrap_or_default(),
    })
}
