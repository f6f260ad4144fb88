//! # World contexts
//!
//! - [`WorldContext`] is handed to systems while a tick is applied. It binds
//!   the working state view to the tick's proposal and collects one receipt per
//!   handled transaction.
//! - [`ReadOnlyContext`] is handed to query handlers. It wraps the finalized
//!   view, so a query never observes a partially applied tick and cannot
//!   mutate state.
//!
//! Both dereference to their state view, so the typed component operations of
//! [`WorkingView`] and [`ReaderExt`](crate::engine::gamestate::ReaderExt) are
//! available directly on the context.

use std::cell::RefCell;
use std::ops::Deref;

use serde_json::Value;
use tracing::debug;

use crate::engine::filter::ComponentFilter;
use crate::engine::gamestate::{FinalizedView, WorkingView};
use crate::engine::search::Search;
use crate::engine::types::{TickHeight, Timestamp};
use crate::world::error::SystemError;
use crate::world::message::Message;
use crate::world::persona::{Persona, PersonaManager};
use crate::world::tick::{Proposal, Receipt};
use crate::world::tx::SignedTransaction;
use crate::world::World;

/// One transaction of message type `M`, as seen by a handler.
pub struct MessageTx<'t, M> {
    /// Transaction hash.
    pub hash: &'t str,
    /// Decoded body.
    pub msg: &'t M,
    /// Wire envelope.
    pub tx: &'t SignedTransaction,
}

/// Mutable view of the world during one tick.
pub struct WorldContext<'a> {
    world: &'a World,
    state: WorkingView<'a>,
    proposal: &'a Proposal,
    receipts: RefCell<Vec<Receipt>>,
}

impl<'a> WorldContext<'a> {
    pub(crate) fn new(world: &'a World, state: WorkingView<'a>, proposal: &'a Proposal) -> Self {
        Self { world, state, proposal, receipts: RefCell::new(Vec::new()) }
    }

    /// Height of the tick being applied.
    pub fn tick(&self) -> TickHeight {
        self.proposal.tick
    }

    /// Timestamp of the tick being applied, Unix milliseconds.
    pub fn timestamp(&self) -> Timestamp {
        self.proposal.timestamp
    }

    /// Namespace of the world.
    pub fn namespace(&self) -> &str {
        self.world.namespace()
    }

    /// Working state view.
    pub fn state(&self) -> &WorkingView<'a> {
        &self.state
    }

    /// Searches the working state.
    pub fn search(&self, filter: ComponentFilter) -> Search<'_> {
        Search::new(&self.state, filter)
    }

    /// Searches the working state with a CQL expression.
    pub fn search_cql(&self, text: &str) -> Result<Search<'_>, SystemError> {
        Ok(Search::from_cql(&self.state, text)?)
    }

    pub(crate) fn personas(&self) -> &'a PersonaManager {
        self.world.personas()
    }

    /// Runs `handler` for every transaction of `M` in this tick, in submission
    /// order, recording one receipt per transaction.
    ///
    /// A handler error only fails its transaction. A non-benign storage error
    /// aborts the tick and is returned.
    pub fn each_message<M, F>(&self, mut handler: F) -> Result<(), SystemError>
    where
        M: Message,
        F: FnMut(MessageTx<'_, M>) -> Result<M::Result, SystemError>,
    {
        if !self.world.messages().contains::<M>() {
            return Err(SystemError::custom(format!("message {} is not registered", M::NAME)));
        }
        let Some(txs) = self.proposal.txs.get(M::NAME) else {
            return Ok(());
        };

        for data in txs {
            let msg = data.msg.downcast_ref::<M>().ok_or_else(|| {
                SystemError::custom(format!("transaction {} does not carry a {}", data.hash, M::NAME))
            })?;

            let outcome = handler(MessageTx { hash: &data.hash, msg, tx: &data.tx })
                .and_then(|result| Ok(serde_json::to_value(result)?));

            let receipt = match outcome {
                Ok(result) => Receipt { tx_hash: data.hash.clone(), tick: self.tick(), result, errors: Vec::new() },
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    debug!(tick = self.tick(), message = M::NAME, tx = %data.hash, error = %err, "transaction failed");
                    Receipt {
                        tx_hash: data.hash.clone(),
                        tick: self.tick(),
                        result: Value::Null,
                        errors: vec![err.to_string()],
                    }
                }
            };
            self.receipts.borrow_mut().push(receipt);
        }
        Ok(())
    }

    pub(crate) fn into_receipts(self) -> Vec<Receipt> {
        self.receipts.into_inner()
    }
}

impl<'a> Deref for WorldContext<'a> {
    type Target = WorkingView<'a>;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

/// Read-only view of the last finalized tick, handed to query handlers.
pub struct ReadOnlyContext<'a> {
    world: &'a World,
    view: FinalizedView<'a>,
}

impl<'a> ReadOnlyContext<'a> {
    pub(crate) fn new(world: &'a World) -> Self {
        Self { world, view: world.state().finalized() }
    }

    /// Namespace of the world.
    pub fn namespace(&self) -> &str {
        self.world.namespace()
    }

    /// Height of the last finalized tick, `-1` before the first commit.
    pub fn tick(&self) -> TickHeight {
        self.world.last_finalized_tick()
    }

    /// Finalized state view.
    pub fn state(&self) -> &FinalizedView<'a> {
        &self.view
    }

    /// Searches the finalized state.
    pub fn search(&self, filter: ComponentFilter) -> Search<'_> {
        Search::new(&self.view, filter)
    }

    /// Searches the finalized state with a CQL expression.
    pub fn search_cql(&self, text: &str) -> Result<Search<'_>, SystemError> {
        Ok(Search::from_cql(&self.view, text)?)
    }

    /// Committed persona claimed under `tag`, compared case-insensitively.
    pub fn persona(&self, tag: &str) -> Result<Option<Persona>, SystemError> {
        Ok(self.world.personas().get_committed(&self.view, tag)?.map(|(_, persona)| persona))
    }

    /// Returns `true` if a claim for `tag` waits in the transaction pool.
    pub fn persona_claim_pending(&self, tag: &str) -> bool {
        self.world.persona_claim_pending(tag)
    }
}

impl<'a> Deref for ReadOnlyContext<'a> {
    type Target = FinalizedView<'a>;

    fn deref(&self) -> &Self::Target {
        &self.view
    }
}
