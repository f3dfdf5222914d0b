#![allow(dead_code)]

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use elodea::broker::ExecutionClient;
use elodea::types::{Fill, OrderId, PendingOrder};

/// Execution client used across the live trading tests.
///
/// Acknowledges placements and cancels immediately and resolves executions after a fixed
/// latency, so placements interleave with feed events while fills trail behind. The rejecting
/// variant fails every call.
pub struct MockClient {
    rejecting: bool,
    latency: Duration,
}

impl MockClient {
    pub fn new() -> Self {
        Self {
            rejecting: false,
            latency: Duration::from_millis(50),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            rejecting: true,
            latency: Duration::from_millis(50),
        }
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            rejecting: false,
            latency,
        }
    }
}

#[async_trait]
impl ExecutionClient for MockClient {
    async fn place_order(&self, _order: &PendingOrder) -> Result<()> {
        if self.rejecting {
            bail!("mock client rejected the order");
        }
        Ok(())
    }

    async fn execute_order(&self, order: &PendingOrder) -> Result<Fill> {
        tokio::time::sleep(self.latency).await;
        if self.rejecting {
            bail!("mock client failed the order");
        }
        Ok(Fill {
            order_id: order.order_id,
            symbol: order.symbol.clone(),
            value: order.price * order.shares,
            quantity: order.shares,
            date: order.placed_at,
            typ: order.typ.clone(),
        })
    }

    async fn cancel_order(&self, _order_id: OrderId) -> Result<()> {
        if self.rejecting {
            bail!("mock client refused to cancel");
        }
        Ok(())
    }
}

pub fn setup_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}
