// ===============================
// src/domain.rs
// ===============================
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side { Buy, Sell }
impl Side { pub fn sign(&self) -> i64 { match self { Side::Buy => 1, Side::Sell => -1 } } }

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum DomainError {
    #[error("price must be finite and > 0, got {0}")]
    Price(f64),
    #[error("quantity must be > 0")]
    Quantity,
}

fn validate(price: f64, quantity: u32) -> Result<(), DomainError> {
    if !price.is_finite() || price <= 0.0 {
        return Err(DomainError::Price(price));
    }
    if quantity == 0 {
        return Err(DomainError::Quantity);
    }
    Ok(())
}

/// Market observation produced by the feed stage.
///
/// `timestamp` is nanoseconds on the pipeline's monotonic clock
/// (see [`crate::clock::MonoClock`]).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    timestamp: u64,
    price: f64,
    quantity: u32,
    side: Side,
}

impl MarketEvent {
    pub fn new(timestamp: u64, price: f64, quantity: u32, side: Side) -> Result<Self, DomainError> {
        validate(price, quantity)?;
        Ok(Self { timestamp, price, quantity, side })
    }

    pub fn timestamp(&self) -> u64 { self.timestamp }
    pub fn price(&self) -> f64 { self.price }
    pub fn quantity(&self) -> u32 { self.quantity }
    pub fn side(&self) -> Side { self.side }
}

/// Intent to trade emitted by a decision policy and filled by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionEvent {
    timestamp: u64,
    price: f64,
    quantity: u32,
    side: Side,
}

impl DecisionEvent {
    pub fn new(timestamp: u64, price: f64, quantity: u32, side: Side) -> Result<Self, DomainError> {
        validate(price, quantity)?;
        Ok(Self { timestamp, price, quantity, side })
    }

    /// Decision at the triggering event's timestamp and price.
    pub fn from_market(md: &MarketEvent, side: Side, quantity: u32) -> Result<Self, DomainError> {
        Self::new(md.timestamp, md.price, quantity, side)
    }

    pub fn timestamp(&self) -> u64 { self.timestamp }
    pub fn price(&self) -> f64 { self.price }
    pub fn quantity(&self) -> u32 { self.quantity }
    pub fn side(&self) -> Side { self.side }

    pub fn notional(&self) -> f64 { self.price * self.quantity as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_price_and_quantity() {
        assert_eq!(MarketEvent::new(1, 0.0, 1, Side::Buy), Err(DomainError::Price(0.0)));
        assert!(matches!(MarketEvent::new(1, f64::NAN, 1, Side::Buy), Err(DomainError::Price(_))));
        assert_eq!(DecisionEvent::new(1, 100.0, 0, Side::Sell), Err(DomainError::Quantity));
    }

    #[test]
    fn decision_inherits_market_timestamp_and_price() {
        let md = MarketEvent::new(42, 100.25, 7, Side::Buy).unwrap();
        let d = DecisionEvent::from_market(&md, Side::Sell, 3).unwrap();
        assert_eq!(d.timestamp(), 42);
        assert_eq!(d.price(), 100.25);
        assert_eq!(d.quantity(), 3);
        assert_eq!(d.side(), Side::Sell);
        assert_eq!(d.notional(), 300.75);
        assert_eq!(Side::Sell.sign(), -1);
    }
}
