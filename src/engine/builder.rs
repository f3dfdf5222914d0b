use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::broker::{Broker, ExecutionClient};
use crate::feed::{FeedMux, FeedSource};
use crate::store::EngineState;

use super::{Engine, Strategy};

/// Creates an [Engine].
///
/// Feeds are registered in the order `with_feed` is called; timestamp ties between feeds are
/// broken in that order. Misuse is rejected synchronously here, before any action is
/// produced.
pub struct EngineBuilder {
    feeds: Vec<(String, FeedSource)>,
    initial_capital: HashMap<String, f64>,
    client: Option<Arc<dyn ExecutionClient>>,
    backtesting: bool,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            feeds: Vec::new(),
            initial_capital: HashMap::new(),
            client: None,
            backtesting: true,
        }
    }

    pub fn with_feed(&mut self, name: impl Into<String>, source: FeedSource) -> &mut Self {
        self.feeds.push((name.into(), source));
        self
    }

    pub fn with_initial_capital(&mut self, attribute: impl Into<String>, value: f64) -> &mut Self {
        self.initial_capital.insert(attribute.into(), value);
        self
    }

    pub fn with_client(&mut self, client: Arc<dyn ExecutionClient>) -> &mut Self {
        self.client = Some(client);
        self
    }

    pub fn backtesting(&mut self, backtesting: bool) -> &mut Self {
        self.backtesting = backtesting;
        self
    }

    pub fn build<S: Strategy>(&mut self, strategy: S) -> Engine<S> {
        if !self.backtesting && self.client.is_none() {
            panic!("Engine cannot trade live without an execution client");
        }
        if self.backtesting
            && self
                .feeds
                .iter()
                .any(|(_, source)| matches!(source, FeedSource::Live(_)))
        {
            panic!("Engine cannot backtest a live feed source");
        }

        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        let feeds = std::mem::take(&mut self.feeds);
        let mux = FeedMux::new(feeds, self.backtesting, errors_tx.clone());
        let broker = Broker::new(self.backtesting, self.client.take(), notify_tx);
        let state = EngineState::with_capital(std::mem::take(&mut self.initial_capital));

        Engine::new(
            strategy,
            state,
            broker,
            mux,
            self.backtesting,
            errors_tx,
            errors_rx,
            notify_rx,
        )
    }
}
