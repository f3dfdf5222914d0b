//! Single-sequencer dispatch loop binding feeds, strategy, broker, store and output.

mod builder;

pub use builder::EngineBuilder;

use std::collections::VecDeque;

use anyhow::Result;
use derive_more::{Display, Error};
use log::{debug, info};
use tokio::sync::mpsc;

use crate::broker::{Broker, BrokerCommand, ExecutionNotification};
use crate::feed::{FeedEvent, FeedMux};
use crate::output::{EngineItem, Gate, OutputFork, OutputSet};
use crate::store::{self, EngineState};
use crate::types::{Action, ActionKind, OrderFailure, OrderId, OrderIntent};

/// Non-fatal errors reported out-of-band on the engine's error channel.
///
/// Every engine instance owns its own channel, so errors from independent instances never
/// interleave even when their outputs are combined by one consumer.
#[derive(Debug, Display, Error)]
pub enum EngineError {
    #[display("Skipped event from feed {feed} due to missing timestamp property")]
    SkippedEvent { feed: String },
    #[display("{message}")]
    Strategy { message: String },
}

/// User code invoked once per action.
///
/// Returning an error reports it on the engine's error channel and dispatch continues with
/// the next action; it never aborts the run.
pub trait Strategy: Send {
    fn on_action(&mut self, ctx: &mut StrategyContext, action: &Action) -> Result<()>;
}

impl<F> Strategy for F
where
    F: FnMut(&mut StrategyContext, &Action) -> Result<()> + Send,
{
    fn on_action(&mut self, ctx: &mut StrategyContext, action: &Action) -> Result<()> {
        self(ctx, action)
    }
}

/// The capabilities handed to the strategy on each invocation.
///
/// Orders and cancels issued here are appended to the tail of the engine's action queue once
/// the invocation returns, so they are dispatched strictly after the triggering action and
/// after anything already queued ahead of them.
pub struct StrategyContext {
    state: EngineState,
    commands: Vec<BrokerCommand>,
}

impl StrategyContext {
    fn new(state: EngineState) -> Self {
        Self {
            state,
            commands: Vec::new(),
        }
    }

    pub fn order(&mut self, intent: OrderIntent) {
        self.commands.push(BrokerCommand::Place(intent));
    }

    pub fn cancel(&mut self, order_id: OrderId) {
        self.commands.push(BrokerCommand::Cancel(order_id));
    }

    /// A snapshot of engine state as of the action being dispatched.
    ///
    /// The snapshot is detached: mutating it has no effect on the engine.
    pub fn state(&self) -> EngineState {
        self.state.clone()
    }

    fn into_commands(self) -> Vec<BrokerCommand> {
        self.commands
    }
}

/// The engine: one sequencer task that owns every piece of mutable state.
///
/// Feed events, client execution results and strategy commands all enqueue; only the
/// sequencer dequeues and applies. One action is fully applied-and-dispatched at a time.
pub struct Engine<S: Strategy> {
    strategy: S,
    state: EngineState,
    broker: Broker,
    mux: FeedMux,
    queue: VecDeque<Action>,
    clock: i64,
    backtesting: bool,
    output: OutputSet,
    errors_tx: mpsc::UnboundedSender<EngineError>,
    errors_rx: Option<mpsc::UnboundedReceiver<EngineError>>,
    notify_rx: mpsc::UnboundedReceiver<ExecutionNotification>,
}

impl<S: Strategy> Engine<S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        strategy: S,
        state: EngineState,
        broker: Broker,
        mux: FeedMux,
        backtesting: bool,
        errors_tx: mpsc::UnboundedSender<EngineError>,
        errors_rx: mpsc::UnboundedReceiver<EngineError>,
        notify_rx: mpsc::UnboundedReceiver<ExecutionNotification>,
    ) -> Self {
        Self {
            strategy,
            state,
            broker,
            mux,
            queue: VecDeque::new(),
            clock: 0,
            backtesting,
            output: OutputSet::new(),
            errors_tx,
            errors_rx: Some(errors_rx),
            notify_rx,
        }
    }

    /// A new fork over the engine output, subject to the shared backpressure gate.
    pub fn subscribe(&self) -> OutputFork {
        self.output.subscribe()
    }

    /// The error channel for this engine instance.
    ///
    /// Closes once the run is over, after which no further errors can arrive.
    pub fn errors(&mut self) -> mpsc::UnboundedReceiver<EngineError> {
        //Taking the channel twice is a construction error, not a runtime condition
        self.errors_rx.take().unwrap()
    }

    /// Drives the engine to completion.
    ///
    /// Produces exactly one `Initialized` action first and, unless every fork is torn down
    /// mid-run, exactly one `Finished` action last. Nothing is dispatched after `Finished`.
    pub async fn run(mut self) {
        info!("ENGINE: Starting run loop");
        self.enqueue(ActionKind::Initialized);
        let mut feeds_done = false;

        loop {
            //Drain the queue fully before folding in anything external; stale-completion
            //checks below rely on seeing fully applied state
            while let Some(action) = self.queue.pop_front() {
                if !self.step(action).await {
                    info!("ENGINE: All output forks closed, stopping intake");
                    self.output.close();
                    return;
                }
            }

            if feeds_done {
                if self.backtesting || self.state.orders.is_empty() {
                    break;
                }
                //Feeds are exhausted but orders are still pending with the client; there is
                //no timeout here, a client that never resolves leaves them pending forever
                if let Some(notification) = self.notify_rx.recv().await {
                    self.fold_notification(notification);
                }
            } else {
                tokio::select! {
                    biased;
                    Some(notification) = self.notify_rx.recv() => {
                        self.fold_notification(notification);
                    }
                    event = self.mux.next() => match event {
                        Some(event) => self.enqueue_feed(event),
                        None => feeds_done = true,
                    }
                }
            }
        }

        let finished = self.stamp(ActionKind::Finished);
        self.step(finished).await;
        self.output.close();
        info!("ENGINE: Finished");
    }

    //Applies and dispatches one action; false means every fork is gone and the engine
    //should stop producing
    async fn step(&mut self, action: Action) -> bool {
        //The gate: the next item is not produced until every active fork has drained the
        //previous one
        let permits = match self.output.ready().await {
            Gate::Open(permits) => permits,
            Gate::Closed => return false,
        };

        store::apply(&mut self.state, &action);
        debug!("ENGINE: Dispatching {:?}", action.kind);

        let mut ctx = StrategyContext::new(self.state.clone());
        if let Err(err) = self.strategy.on_action(&mut ctx, &action) {
            let _ = self.errors_tx.send(EngineError::Strategy {
                message: err.to_string(),
            });
        }

        let commands = ctx.into_commands();
        if action.kind.is_finished() {
            if !commands.is_empty() {
                debug!(
                    "ENGINE: Dropping {} commands issued after finish",
                    commands.len()
                );
            }
        } else {
            for command in commands {
                let kinds = match command {
                    BrokerCommand::Place(intent) => {
                        self.broker.place(intent, &self.state, self.clock).await
                    }
                    BrokerCommand::Cancel(order_id) => {
                        self.broker.cancel(order_id, &self.state).await
                    }
                };
                for kind in kinds {
                    self.enqueue(kind);
                }
            }
        }

        self.output.publish(
            permits,
            EngineItem {
                action,
                state: self.state.clone(),
            },
        );
        true
    }

    fn enqueue(&mut self, kind: ActionKind) {
        let action = self.stamp(kind);
        self.queue.push_back(action);
    }

    fn enqueue_feed(&mut self, event: FeedEvent) {
        if event.timestamp < self.clock {
            //Live arrival order is temporal order; the stream timestamp stays monotonic
            //even when a source reports an older event time
            debug!(
                "ENGINE: Feed {} event time {} behind engine clock {}",
                event.feed, event.timestamp, self.clock
            );
        }
        self.clock = self.clock.max(event.timestamp);
        self.queue.push_back(Action::new(
            self.clock,
            ActionKind::Feed {
                feed: event.feed,
                value: event.value,
            },
        ));
    }

    fn fold_notification(&mut self, notification: ExecutionNotification) {
        //The order may have been cancelled, or the run torn down, while the execution was
        //in flight; its terminal action has already happened so the result is dropped
        if !self.state.orders.contains_key(&notification.order_id) {
            debug!(
                "ENGINE: Dropping execution result for resolved order {}",
                notification.order_id
            );
            return;
        }
        match notification.result {
            Ok(fill) => self.enqueue(ActionKind::OrderFilled(fill)),
            Err(err) => self.enqueue(ActionKind::OrderFailed(OrderFailure {
                order_id: Some(notification.order_id),
                reason: err.to_string(),
            })),
        }
    }

    fn stamp(&self, kind: ActionKind) -> Action {
        Action::new(self.clock, kind)
    }
}
