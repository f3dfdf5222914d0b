//! Feed sources and the time-ordered multiplexer.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rand::thread_rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::engine::EngineError;

/// One record produced by a feed.
///
/// The timestamp is optional because sources are not trusted to be well-formed: a record
/// without one is skipped with a reported error and the feed carries on.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FeedRecord {
    pub value: serde_json::Value,
    pub timestamp: Option<i64>,
}

impl FeedRecord {
    pub fn new(value: serde_json::Value, timestamp: i64) -> Self {
        Self {
            value,
            timestamp: Some(timestamp),
        }
    }

    pub fn without_timestamp(value: serde_json::Value) -> Self {
        Self {
            value,
            timestamp: None,
        }
    }
}

/// A named source of records.
///
/// Historic sources are finite and pre-sorted by the caller; live sources push records over a
/// channel and complete by dropping the sender.
pub enum FeedSource {
    Historic(Vec<FeedRecord>),
    Live(mpsc::Receiver<FeedRecord>),
}

/// A record tagged with the feed it came from, ready to be wrapped as an action.
#[derive(Clone, Debug)]
pub struct FeedEvent {
    pub feed: String,
    pub timestamp: i64,
    pub value: serde_json::Value,
}

/// Generates a quote-shaped historic feed, useful for tests and benchmarks.
pub fn random_historic(length: i64) -> Vec<FeedRecord> {
    let price_dist = Uniform::new(90.0, 100.0);
    let size_dist = Uniform::new(100.0, 1000.0);
    let mut rng = thread_rng();

    (0..length)
        .map(|offset| {
            FeedRecord::new(
                serde_json::json!({
                    "price": price_dist.sample(&mut rng),
                    "size": size_dist.sample(&mut rng),
                }),
                100 + offset,
            )
        })
        .collect()
}

struct MergeEntry {
    timestamp: i64,
    feed: usize,
    seq: u64,
    value: serde_json::Value,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.feed == other.feed && self.seq == other.seq
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        //BinaryHeap is a max-heap so the key comparison is reversed to pop the earliest
        //event first, ties broken by feed registration order
        (other.timestamp, other.feed, other.seq).cmp(&(self.timestamp, self.feed, self.seq))
    }
}

enum MuxInner {
    Historic {
        heap: BinaryHeap<MergeEntry>,
        feeds: Vec<std::vec::IntoIter<FeedRecord>>,
        next_seq: u64,
    },
    //Forwarder tasks are spawned on the first poll so the mux can be built outside a runtime
    LiveIdle {
        sources: Vec<FeedSource>,
    },
    Live {
        merged: mpsc::Receiver<(usize, FeedRecord)>,
    },
}

/// Merges named feeds into one chronologically ordered sequence of tagged events.
///
/// Backtests perform a k-way merge over the finite historic sequences; live mode forwards
/// records in arrival order, taking that as their temporal order, and completes only once
/// every source has completed.
pub struct FeedMux {
    names: Vec<String>,
    inner: MuxInner,
    errors: mpsc::UnboundedSender<EngineError>,
}

impl FeedMux {
    pub fn new(
        feeds: Vec<(String, FeedSource)>,
        backtesting: bool,
        errors: mpsc::UnboundedSender<EngineError>,
    ) -> Self {
        let mut names = Vec::with_capacity(feeds.len());
        let mut sources = Vec::with_capacity(feeds.len());
        for (name, source) in feeds {
            names.push(name);
            sources.push(source);
        }

        if !backtesting {
            return Self {
                names,
                inner: MuxInner::LiveIdle { sources },
                errors,
            };
        }

        let feeds = sources
            .into_iter()
            .map(|source| match source {
                FeedSource::Historic(records) => records.into_iter(),
                //The builder rejects this combination before the mux is constructed
                FeedSource::Live(_) => unreachable!("live feed source in a backtest"),
            })
            .collect::<Vec<_>>();

        let mut mux = Self {
            names,
            inner: MuxInner::Historic {
                heap: BinaryHeap::new(),
                feeds,
                next_seq: 0,
            },
            errors,
        };
        for feed_idx in 0..mux.names.len() {
            mux.advance_feed(feed_idx);
        }
        mux
    }

    /// Next event in stream order, or `None` once every source is exhausted.
    pub async fn next(&mut self) -> Option<FeedEvent> {
        match self.inner {
            MuxInner::Historic { .. } => self.next_historic(),
            _ => self.next_live().await,
        }
    }

    fn next_historic(&mut self) -> Option<FeedEvent> {
        let entry = match &mut self.inner {
            MuxInner::Historic { heap, .. } => heap.pop()?,
            _ => return None,
        };
        self.advance_feed(entry.feed);
        Some(FeedEvent {
            feed: self.names[entry.feed].clone(),
            timestamp: entry.timestamp,
            value: entry.value,
        })
    }

    async fn next_live(&mut self) -> Option<FeedEvent> {
        if matches!(self.inner, MuxInner::LiveIdle { .. }) {
            self.start_forwarders();
        }
        loop {
            let (feed_idx, record) = match &mut self.inner {
                MuxInner::Live { merged } => merged.recv().await?,
                _ => return None,
            };
            match record.timestamp {
                Some(timestamp) => {
                    return Some(FeedEvent {
                        feed: self.names[feed_idx].clone(),
                        timestamp,
                        value: record.value,
                    })
                }
                None => self.report_skip(feed_idx),
            }
        }
    }

    //Pushes the next well-formed record of the feed onto the heap, reporting and dropping
    //records with no timestamp along the way
    fn advance_feed(&mut self, feed_idx: usize) {
        let mut skipped = Vec::new();
        if let MuxInner::Historic {
            heap,
            feeds,
            next_seq,
        } = &mut self.inner
        {
            for record in feeds[feed_idx].by_ref() {
                match record.timestamp {
                    Some(timestamp) => {
                        heap.push(MergeEntry {
                            timestamp,
                            feed: feed_idx,
                            seq: *next_seq,
                            value: record.value,
                        });
                        *next_seq += 1;
                        break;
                    }
                    None => skipped.push(feed_idx),
                }
            }
        }
        for feed_idx in skipped {
            self.report_skip(feed_idx);
        }
    }

    fn start_forwarders(&mut self) {
        let sources = match &mut self.inner {
            MuxInner::LiveIdle { sources } => std::mem::take(sources),
            _ => return,
        };
        let (merged_tx, merged_rx) = mpsc::channel(1024);
        for (feed_idx, source) in sources.into_iter().enumerate() {
            let merged_tx = merged_tx.clone();
            tokio::spawn(async move {
                match source {
                    FeedSource::Live(mut receiver) => {
                        while let Some(record) = receiver.recv().await {
                            if merged_tx.send((feed_idx, record)).await.is_err() {
                                break;
                            }
                        }
                    }
                    FeedSource::Historic(records) => {
                        for record in records {
                            if merged_tx.send((feed_idx, record)).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
        //The merged channel closes once every forwarder has completed
        self.inner = MuxInner::Live { merged: merged_rx };
    }

    fn report_skip(&self, feed_idx: usize) {
        let _ = self.errors.send(EngineError::SkippedEvent {
            feed: self.names[feed_idx].clone(),
        });
    }
}
