//! # What is Elodea?
//!
//! Elodea runs a trading strategy against either historical data or a live market connection
//! using the same programming interface. The strategy is a callable that is invoked once per
//! action flowing through the engine; everything the strategy can observe or do goes through
//! the context it is handed on each invocation.
//!
//! # Implementation
//!
//! The engine is composed of:
//! - A feed layer, [FeedMux](crate::feed::FeedMux), which merges any number of named sources
//!   into one chronologically ordered sequence of tagged events. Historic sources are merged
//!   with a k-way merge, live sources are forwarded in arrival order.
//! - A state store, [EngineState](crate::store::EngineState), holding capital, pending orders,
//!   positions and the engine timestamp. State is only ever mutated by applying actions to it,
//!   one at a time, so every consumer observes the same sequence of transitions.
//! - A broker, [Broker](crate::broker::Broker), which turns strategy order commands into
//!   lifecycle actions. In backtests orders fill instantly and deterministically at the
//!   submitted price; in live trading the broker delegates to an
//!   [ExecutionClient](crate::broker::ExecutionClient) and folds the asynchronous results back
//!   into the action stream.
//! - The dispatch loop, [Engine](crate::engine::Engine), a single sequencer that applies each
//!   action to the store, invokes the strategy and appends anything the strategy produced to
//!   the tail of the same queue.
//! - A forkable output, [OutputFork](crate::output::OutputFork), over `(action, state)` items.
//!   Production is gated on every active fork having drained the previous item, so a slow
//!   consumer throttles the whole engine rather than being buffered over or dropped.
//!
//! Strategy errors never abort a run: they are delivered on a separate error channel owned by
//! each engine instance and dispatch continues with the next action.

pub mod broker;
pub mod engine;
pub mod feed;
pub mod output;
pub mod store;
pub mod types;
