//! Turns strategy order commands into lifecycle actions.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::info;
use tokio::sync::mpsc;

use crate::store::EngineState;
use crate::types::{ActionKind, Fill, OrderFailure, OrderId, OrderIntent, PendingOrder, TradeType};

/// The external execution venue used in live trading.
///
/// The engine treats this purely as an interface: `place_order` acknowledges or rejects the
/// submission, `execute_order` resolves later with the execution result, and the engine never
/// blocks on it. No timeout is imposed here, so a client that never resolves leaves the order
/// pending indefinitely; timeout policy belongs to implementations of this trait.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    async fn place_order(&self, order: &PendingOrder) -> Result<()>;
    async fn execute_order(&self, order: &PendingOrder) -> Result<Fill>;
    async fn cancel_order(&self, order_id: OrderId) -> Result<()>;
}

/// Asynchronous execution result reported back by the client.
///
/// Folded into the action queue by the engine's sequencer, never applied directly.
#[derive(Debug)]
pub struct ExecutionNotification {
    pub order_id: OrderId,
    pub result: Result<Fill>,
}

/// A command issued by the strategy through its context.
#[derive(Clone, Debug)]
pub(crate) enum BrokerCommand {
    Place(OrderIntent),
    Cancel(OrderId),
}

/// Resolves order and cancel commands into lifecycle actions.
///
/// In backtests resolution is synchronous and deterministic: an accepted order fills
/// instantly at the submitted price, which is what makes backtest runs reproducible. In live
/// trading resolution is delegated to the [ExecutionClient] and execution results come back
/// through the notification channel.
pub struct Broker {
    backtesting: bool,
    client: Option<Arc<dyn ExecutionClient>>,
    last_order_id: OrderId,
    notify_tx: mpsc::UnboundedSender<ExecutionNotification>,
}

impl Broker {
    pub(crate) fn new(
        backtesting: bool,
        client: Option<Arc<dyn ExecutionClient>>,
        notify_tx: mpsc::UnboundedSender<ExecutionNotification>,
    ) -> Self {
        Self {
            backtesting,
            client,
            last_order_id: 0,
            notify_tx,
        }
    }

    pub(crate) async fn place(
        &mut self,
        intent: OrderIntent,
        state: &EngineState,
        now: i64,
    ) -> Vec<ActionKind> {
        if let Err(reason) = validate_intent(&intent, state) {
            info!("BROKER: Rejecting order for {}: {}", intent.symbol, reason);
            return vec![ActionKind::OrderFailed(OrderFailure {
                order_id: None,
                reason,
            })];
        }

        self.last_order_id += 1;
        let order = PendingOrder {
            order_id: self.last_order_id,
            symbol: intent.symbol,
            shares: intent.shares,
            price: intent.price,
            typ: intent.typ,
            placed_at: now,
        };

        if self.backtesting {
            let fill = fill_order(&order, now);
            return vec![
                ActionKind::OrderPlaced(order),
                ActionKind::OrderFilled(fill),
            ];
        }

        //The builder guarantees a client is present in live mode
        let client = Arc::clone(self.client.as_ref().unwrap());
        match client.place_order(&order).await {
            Ok(()) => {
                let notify_tx = self.notify_tx.clone();
                let pending = order.clone();
                //The execution result is folded back into the action queue whenever the
                //client resolves it; feed events keep flowing in the meantime
                tokio::spawn(async move {
                    let result = client.execute_order(&pending).await;
                    let _ = notify_tx.send(ExecutionNotification {
                        order_id: pending.order_id,
                        result,
                    });
                });
                vec![ActionKind::OrderPlaced(order)]
            }
            Err(err) => {
                info!(
                    "BROKER: Client rejected order {} for {}",
                    order.order_id, order.symbol
                );
                vec![ActionKind::OrderFailed(OrderFailure {
                    order_id: Some(order.order_id),
                    reason: err.to_string(),
                })]
            }
        }
    }

    pub(crate) async fn cancel(&mut self, order_id: OrderId, state: &EngineState) -> Vec<ActionKind> {
        if !state.orders.contains_key(&order_id) {
            info!("BROKER: Cannot cancel unknown or resolved order {}", order_id);
            return vec![ActionKind::OrderFailed(OrderFailure {
                order_id: Some(order_id),
                reason: format!("unknown or already resolved order {}", order_id),
            })];
        }

        if self.backtesting {
            //Backtest orders resolve in the dispatch turn they are placed so there is never
            //anything left to cancel
            return vec![ActionKind::OrderFailed(OrderFailure {
                order_id: Some(order_id),
                reason: format!(
                    "order {} resolves in the turn it was placed and cannot be cancelled",
                    order_id
                ),
            })];
        }

        let client = Arc::clone(self.client.as_ref().unwrap());
        match client.cancel_order(order_id).await {
            Ok(()) => vec![ActionKind::OrderCancelled(order_id)],
            Err(err) => vec![ActionKind::OrderFailed(OrderFailure {
                order_id: Some(order_id),
                reason: err.to_string(),
            })],
        }
    }
}

fn validate_intent(intent: &OrderIntent, state: &EngineState) -> Result<(), String> {
    if intent.symbol.is_empty() {
        return Err("order has no symbol".to_string());
    }
    if !intent.shares.is_finite() || intent.shares <= 0.0 {
        return Err(format!("order shares must be positive: {}", intent.shares));
    }
    if !intent.price.is_finite() || intent.price <= 0.0 {
        return Err(format!("order price must be positive: {}", intent.price));
    }
    if intent.typ == TradeType::Buy {
        let value = intent.price * intent.shares;
        if value > state.cash() {
            return Err(format!(
                "insufficient cash: order value {} exceeds {}",
                value,
                state.cash()
            ));
        }
    }
    Ok(())
}

fn fill_order(order: &PendingOrder, date: i64) -> Fill {
    Fill {
        order_id: order.order_id,
        symbol: order.symbol.clone(),
        value: order.price * order.shares,
        quantity: order.shares,
        date,
        typ: order.typ.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tokio::sync::mpsc;

    use crate::store::{EngineState, CASH};
    use crate::types::{ActionKind, OrderIntent};

    use super::Broker;

    fn setup() -> (Broker, EngineState) {
        let (notify_tx, _notify_rx) = mpsc::unbounded_channel();
        let broker = Broker::new(true, None, notify_tx);

        let mut capital = HashMap::new();
        capital.insert(CASH.to_string(), 10_000.0);
        (broker, EngineState::with_capital(capital))
    }

    #[tokio::test]
    async fn test_that_backtest_orders_place_and_fill_in_one_turn() {
        let (mut broker, state) = setup();
        let kinds = broker
            .place(OrderIntent::buy("ABC", 50.0, 100.0), &state, 100)
            .await;

        assert_eq!(kinds.len(), 2);
        assert!(matches!(kinds[0], ActionKind::OrderPlaced(_)));
        match &kinds[1] {
            ActionKind::OrderFilled(fill) => {
                assert_eq!(fill.value, 5_000.0);
                assert_eq!(fill.quantity, 50.0);
            }
            _ => panic!("expected a fill"),
        }
    }

    #[tokio::test]
    async fn test_that_invalid_orders_fail_with_a_reason() {
        let (mut broker, state) = setup();

        let no_symbol = broker
            .place(OrderIntent::buy("", 50.0, 100.0), &state, 100)
            .await;
        let no_shares = broker
            .place(OrderIntent::buy("ABC", 0.0, 100.0), &state, 100)
            .await;
        let bad_price = broker
            .place(OrderIntent::buy("ABC", 50.0, -1.0), &state, 100)
            .await;

        for kinds in [no_symbol, no_shares, bad_price] {
            assert_eq!(kinds.len(), 1);
            assert!(matches!(kinds[0], ActionKind::OrderFailed(_)));
        }
    }

    #[tokio::test]
    async fn test_that_orders_exceeding_cash_are_rejected() {
        let (mut broker, state) = setup();
        let kinds = broker
            .place(OrderIntent::buy("ABC", 500.0, 100.0), &state, 100)
            .await;

        match &kinds[0] {
            ActionKind::OrderFailed(failure) => {
                assert!(failure.reason.contains("insufficient cash"));
            }
            _ => panic!("expected a failure"),
        }
    }

    #[tokio::test]
    async fn test_that_sells_are_not_subject_to_the_cash_check() {
        let (mut broker, state) = setup();
        let kinds = broker
            .place(OrderIntent::sell("ABC", 500.0, 100.0), &state, 100)
            .await;
        assert!(matches!(kinds[0], ActionKind::OrderPlaced(_)));
    }

    #[tokio::test]
    async fn test_that_cancel_of_unknown_order_fails() {
        let (mut broker, state) = setup();
        let kinds = broker.cancel(99, &state).await;

        assert_eq!(kinds.len(), 1);
        match &kinds[0] {
            ActionKind::OrderFailed(failure) => {
                assert_eq!(failure.order_id, Some(99));
                assert!(failure.reason.contains("unknown or already resolved"));
            }
            _ => panic!("expected a failure"),
        }
    }
}
