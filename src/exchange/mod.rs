//! Exchange collaborator contract
//!
//! Strategies only ever talk to the market through [`ExchangeClient`], so
//! tests can drive them with an in-process fake.

pub mod opinion;
pub mod signer;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use url::Url;

use crate::error::ExchangeError;
use crate::orderbook::OrderBookSnapshot;
use crate::token_store::Credential;
use crate::types::{OpenOrder, OrderRequest, OutcomeMarket, PlacedOrder, Position};

pub use opinion::OpinionClient;

/// Multi-outcome event, identified by its parent topic id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EventRef {
    pub topic_id: u64,
}

impl EventRef {
    pub fn new(topic_id: u64) -> Self {
        Self { topic_id }
    }

    /// Accepts a bare topic id or an exchange URL with a `topicId` parameter
    pub fn parse(input: &str) -> Result<Self, String> {
        let input = input.trim();
        if let Ok(topic_id) = input.parse::<u64>() {
            return Ok(Self::new(topic_id));
        }

        let url = Url::parse(input).map_err(|e| format!("invalid event reference '{}': {}", input, e))?;
        url.query_pairs()
            .find(|(k, _)| k == "topicId")
            .and_then(|(_, v)| v.parse::<u64>().ok())
            .map(Self::new)
            .ok_or_else(|| format!("topicId not found in '{}'", input))
    }
}

impl fmt::Display for EventRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "topic {}", self.topic_id)
    }
}

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Child outcomes of a multi-outcome event
    async fn get_outcomes(&self, event: &EventRef) -> Result<Vec<OutcomeMarket>, ExchangeError>;

    /// YES and NO books of one outcome
    async fn get_order_book(&self, market: &OutcomeMarket) -> Result<OrderBookSnapshot, ExchangeError>;

    /// Held positions, optionally restricted to one parent topic
    async fn get_positions(
        &self,
        topic_filter: Option<u64>,
        credential: &Credential,
    ) -> Result<Vec<Position>, ExchangeError>;

    async fn get_open_orders(
        &self,
        topic_filter: Option<u64>,
        credential: &Credential,
    ) -> Result<Vec<OpenOrder>, ExchangeError>;

    async fn place_order(
        &self,
        order: &OrderRequest,
        credential: &Credential,
    ) -> Result<PlacedOrder, ExchangeError>;

    async fn cancel_order(&self, order: &PlacedOrder, credential: &Credential) -> Result<(), ExchangeError>;

    /// Convert `amount` USDT into YES+NO pairs; returns shares minted per side
    async fn split(
        &self,
        market: &OutcomeMarket,
        amount: Decimal,
        credential: &Credential,
    ) -> Result<Decimal, ExchangeError>;
}

/// Resolve an outcome by name, listing the available titles when missing
pub fn find_outcome<'a>(outcomes: &'a [OutcomeMarket], name: &str) -> Result<&'a OutcomeMarket, String> {
    outcomes.iter().find(|o| o.matches(name)).ok_or_else(|| {
        let available: Vec<&str> = outcomes.iter().map(|o| o.title.as_str()).collect();
        format!("Outcome '{}' not found. Available: {:?}", name, available)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market(title: &str) -> OutcomeMarket {
        OutcomeMarket {
            event_title: "Election".to_string(),
            title: title.to_string(),
            topic_id: 1,
            question_id: "q".to_string(),
            yes_token_id: "y".to_string(),
            no_token_id: "n".to_string(),
        }
    }

    #[test]
    fn test_event_ref_parsing() {
        assert_eq!(EventRef::parse("1234").unwrap().topic_id, 1234);
        assert_eq!(
            EventRef::parse("https://app.opinion.trade/detail?topicId=98&type=multi")
                .unwrap()
                .topic_id,
            98
        );
        assert!(EventRef::parse("https://app.opinion.trade/detail?id=98").is_err());
        assert!(EventRef::parse("not a url").is_err());
    }

    #[test]
    fn test_find_outcome_either_direction() {
        let outcomes = vec![market("Donald Trump"), market("Kamala Harris")];

        assert_eq!(find_outcome(&outcomes, "trump").unwrap().title, "Donald Trump");
        assert_eq!(
            find_outcome(&outcomes, "Kamala Harris wins").unwrap().title,
            "Kamala Harris"
        );

        let err = find_outcome(&outcomes, "Biden").unwrap_err();
        assert!(err.contains("Kamala Harris"));
    }
}
