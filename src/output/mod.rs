//! Forkable, backpressured engine output.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::store::EngineState;
use crate::types::Action;

/// One item of engine output: the dispatched action and the state after applying it.
#[derive(Clone, Debug)]
pub struct EngineItem {
    pub action: Action,
    pub state: EngineState,
}

struct RegistryInner {
    subscribers: Vec<(u64, mpsc::Sender<EngineItem>)>,
    last_subscriber_id: u64,
    ever_subscribed: bool,
    closed: bool,
}

type Registry = Arc<Mutex<RegistryInner>>;

pub(crate) enum Gate {
    Open(Vec<mpsc::OwnedPermit<EngineItem>>),
    Closed,
}

/// Arena of consumer handles over the engine output.
///
/// Each fork is a bounded channel of capacity one. Before each item the engine reserves a
/// send permit from every active fork, so production cannot advance past the current item
/// until every consumer has drained the previous one: a slow consumer throttles all
/// consumers and the engine itself.
pub(crate) struct OutputSet {
    registry: Registry,
}

impl OutputSet {
    pub(crate) fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(RegistryInner {
                subscribers: Vec::new(),
                last_subscriber_id: 0,
                ever_subscribed: false,
                closed: false,
            })),
        }
    }

    pub(crate) fn subscribe(&self) -> OutputFork {
        subscribe(&self.registry)
    }

    /// Waits until every active fork can take the next item.
    ///
    /// Forks that were dropped are pruned here; once at least one fork has existed and all
    /// of them are gone the gate reports closed and the engine stops producing.
    pub(crate) async fn ready(&self) -> Gate {
        loop {
            let (subscribers, ever_subscribed) = {
                let inner = self.registry.lock().unwrap();
                (inner.subscribers.clone(), inner.ever_subscribed)
            };

            if subscribers.is_empty() {
                if ever_subscribed {
                    return Gate::Closed;
                }
                //An engine nobody is watching still runs to completion
                return Gate::Open(Vec::new());
            }

            let mut permits = Vec::with_capacity(subscribers.len());
            let mut closed = Vec::new();
            for (id, sender) in subscribers {
                match sender.reserve_owned().await {
                    Ok(permit) => permits.push(permit),
                    Err(_) => closed.push(id),
                }
            }
            if closed.is_empty() {
                return Gate::Open(permits);
            }

            {
                let mut inner = self.registry.lock().unwrap();
                inner
                    .subscribers
                    .retain(|(id, _)| !closed.contains(id));
            }
            //Permits reserved this round are released on drop; retry against the pruned set
        }
    }

    pub(crate) fn publish(&self, permits: Vec<mpsc::OwnedPermit<EngineItem>>, item: EngineItem) {
        for permit in permits {
            permit.send(item.clone());
        }
    }

    /// Ends the sequence: fork receivers observe closure and late forks are born exhausted.
    ///
    /// The registry outlives the engine through the `Arc` held by every fork, so the senders
    /// inside it have to be dropped explicitly when the run is over.
    pub(crate) fn close(&self) {
        let mut inner = self.registry.lock().unwrap();
        inner.closed = true;
        inner.subscribers.clear();
    }
}

fn subscribe(registry: &Registry) -> OutputFork {
    let mut inner = registry.lock().unwrap();
    inner.last_subscriber_id += 1;
    inner.ever_subscribed = true;
    let subscriber_id = inner.last_subscriber_id;
    let (item_tx, item_rx) = mpsc::channel(1);
    if !inner.closed {
        inner.subscribers.push((subscriber_id, item_tx));
    }
    OutputFork {
        id: subscriber_id,
        items: item_rx,
        registry: Arc::clone(registry),
    }
}

/// An independent consumer handle over the engine output.
///
/// Forks created after production has started only see items from that point forward.
/// Dropping a fork removes it from the backpressure gate; dropping the last fork cancels the
/// engine's intake.
pub struct OutputFork {
    id: u64,
    items: mpsc::Receiver<EngineItem>,
    registry: Registry,
}

impl OutputFork {
    /// Next item, or `None` once the engine has stopped producing.
    pub async fn recv(&mut self) -> Option<EngineItem> {
        self.items.recv().await
    }

    /// A new independent fork observing the stream from this point forward.
    pub fn fork(&self) -> OutputFork {
        subscribe(&self.registry)
    }
}

impl Drop for OutputFork {
    fn drop(&mut self) {
        let mut inner = self.registry.lock().unwrap();
        inner.subscribers.retain(|(id, _)| *id != self.id);
    }
}
