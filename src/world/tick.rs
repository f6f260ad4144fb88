//! Proposals, ticks and receipts.
//!
//! A [`Proposal`] is the ordered batch of transactions one tick applies,
//! stamped with its height and timestamp. Applying it yields a [`Tick`]: the
//! proposal plus one [`Receipt`] per transaction. Committed receipts are kept
//! in a bounded [`ReceiptCache`] keyed by transaction hash.

use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::types::{TickHeight, Timestamp};
use crate::world::tx::TxMap;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as Timestamp)
        .unwrap_or_default()
}

/// Transactions bound to one tick.
#[derive(Debug, Clone, Default)]
pub struct Proposal {
    /// Tick height.
    pub tick: TickHeight,
    /// Unix milliseconds the tick is stamped with.
    pub timestamp: Timestamp,
    /// Transactions per message name.
    pub txs: TxMap,
}

impl Proposal {
    /// Creates a proposal without transactions.
    pub fn empty(tick: TickHeight, timestamp: Timestamp) -> Self {
        Self { tick, timestamp, txs: TxMap::new() }
    }

    /// Number of transactions across all messages.
    pub fn tx_count(&self) -> usize {
        self.txs.values().map(Vec::len).sum()
    }
}

/// Outcome of one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    /// Transaction hash.
    pub tx_hash: String,
    /// Tick that applied the transaction.
    pub tick: TickHeight,
    /// Handler result, `null` on failure.
    pub result: Value,
    /// Handler errors, empty on success.
    pub errors: Vec<String>,
}

impl Receipt {
    /// Returns `true` if the handler succeeded.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// An applied proposal.
#[derive(Debug, Clone)]
pub struct Tick {
    /// The applied proposal.
    pub proposal: Proposal,
    /// Receipts in the order transactions were handled.
    pub receipts: Vec<Receipt>,
}

impl Tick {
    /// Height of this tick.
    pub fn height(&self) -> TickHeight {
        self.proposal.tick
    }
}

/// Bounded receipt store with oldest-first eviction.
#[derive(Debug)]
pub struct ReceiptCache {
    capacity: usize,
    order: VecDeque<String>,
    by_hash: HashMap<String, Receipt>,
}

impl ReceiptCache {
    /// Creates a cache holding at most `capacity` receipts.
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), order: VecDeque::new(), by_hash: HashMap::new() }
    }

    /// Number of cached receipts.
    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    /// Returns `true` if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    /// Caches `receipt`, evicting the oldest entries beyond capacity.
    pub fn insert(&mut self, receipt: Receipt) {
        if self.by_hash.insert(receipt.tx_hash.clone(), receipt.clone()).is_none() {
            self.order.push_back(receipt.tx_hash);
        }
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.by_hash.remove(&evicted);
            }
        }
    }

    /// Looks up a receipt by transaction hash.
    pub fn get(&self, hash: &str) -> Option<&Receipt> {
        self.by_hash.get(hash)
    }
}
