//! Generic types used across the engine.

use serde::{Deserialize, Serialize};

pub type OrderId = u64;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum TradeType {
    Buy,
    Sell,
}

/// An order request produced by the strategy.
///
/// Intents are not persisted: the broker either turns them into an
/// [ActionKind::OrderPlaced] or an [ActionKind::OrderFailed] and the intent itself is
/// discarded.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct OrderIntent {
    pub symbol: String,
    pub shares: f64,
    pub price: f64,
    pub typ: TradeType,
}

impl OrderIntent {
    pub fn buy(symbol: impl Into<String>, shares: f64, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            shares,
            price,
            typ: TradeType::Buy,
        }
    }

    pub fn sell(symbol: impl Into<String>, shares: f64, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            shares,
            price,
            typ: TradeType::Sell,
        }
    }
}

/// An accepted order that has not resolved yet.
///
/// Lives in [EngineState::orders](crate::store::EngineState) from the placement action until
/// exactly one terminal action removes it.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PendingOrder {
    pub order_id: OrderId,
    pub symbol: String,
    pub shares: f64,
    pub price: f64,
    pub typ: TradeType,
    pub placed_at: i64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub symbol: String,
    pub value: f64,
    pub quantity: f64,
    pub date: i64,
    pub typ: TradeType,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OrderFailure {
    //Validation failures happen before an order id is assigned
    pub order_id: Option<OrderId>,
    pub reason: String,
}

/// The unit of work flowing through the engine.
///
/// `timestamp` is monotonic non-decreasing over the lifetime of one engine instance.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Action {
    pub timestamp: i64,
    pub kind: ActionKind,
}

impl Action {
    pub fn new(timestamp: i64, kind: ActionKind) -> Self {
        Self { timestamp, kind }
    }
}

/// Closed set of action types.
///
/// Raw feed events are tagged with the name of the feed they came from; every other variant
/// is a reserved lifecycle or control signal.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum ActionKind {
    Initialized,
    Feed {
        feed: String,
        value: serde_json::Value,
    },
    OrderPlaced(PendingOrder),
    OrderFilled(Fill),
    OrderFailed(OrderFailure),
    OrderCancelled(OrderId),
    Finished,
}

impl ActionKind {
    pub fn is_finished(&self) -> bool {
        matches!(self, ActionKind::Finished)
    }
}
