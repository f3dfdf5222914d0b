//! Holds engine state and applies actions to it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{Action, ActionKind, OrderId, PendingOrder, TradeType};

/// Capital attribute debited and credited by fills.
pub const CASH: &str = "cash";

/// Snapshot of everything the engine knows between two actions.
///
/// Owned by the engine and mutated only through [apply]. Strategies and output consumers
/// always receive clones, so nothing they do to a snapshot can reach back into the engine.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EngineState {
    pub capital: HashMap<String, f64>,
    pub orders: HashMap<OrderId, PendingOrder>,
    pub positions: HashMap<String, f64>,
    pub timestamp: i64,
}

impl EngineState {
    pub fn with_capital(capital: HashMap<String, f64>) -> Self {
        Self {
            capital,
            ..Default::default()
        }
    }

    pub fn cash(&self) -> f64 {
        self.capital.get(CASH).copied().unwrap_or(0.0)
    }
}

/// Applies one action to the state.
///
/// Reducers never fail: malformed orders are rejected by the broker before they can become
/// actions, so by the time an action reaches the store it is known to be well-formed.
pub fn apply(state: &mut EngineState, action: &Action) {
    state.timestamp = action.timestamp;
    match &action.kind {
        ActionKind::Initialized => {
            //Capital is seeded by the builder; a fresh run starts with nothing else
            state.orders.clear();
            state.positions.clear();
            state.timestamp = 0;
        }
        ActionKind::Feed { .. } => {}
        ActionKind::OrderPlaced(order) => {
            state.orders.insert(order.order_id, order.clone());
        }
        ActionKind::OrderFilled(fill) => {
            state.orders.remove(&fill.order_id);
            let cash = state.capital.entry(CASH.to_string()).or_insert(0.0);
            match fill.typ {
                TradeType::Buy => *cash -= fill.value,
                TradeType::Sell => *cash += fill.value,
            }
            let position = state.positions.entry(fill.symbol.clone()).or_insert(0.0);
            match fill.typ {
                TradeType::Buy => *position += fill.quantity,
                TradeType::Sell => *position -= fill.quantity,
            }
        }
        ActionKind::OrderFailed(failure) => {
            if let Some(order_id) = failure.order_id {
                state.orders.remove(&order_id);
            }
        }
        ActionKind::OrderCancelled(order_id) => {
            state.orders.remove(order_id);
        }
        ActionKind::Finished => {}
    }
}
