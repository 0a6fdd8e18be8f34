//! Ledger of local batches the server has not echoed back yet.
//!
//! Every batch applied optimistically is recorded with the tree generation
//! it was applied to. The generation moves on whenever the tree is replaced
//! by a fetched snapshot. An echo of one of our batches is redundant only
//! while that batch is still part of the tree; once a replace has wiped it,
//! the echo has to be applied like any remote update.

use std::collections::VecDeque;

use tracing::{debug, trace};

use folio_types::Action;

/// What an echo of this client's own flush corresponds to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Echo {
    /// The batch is applied to the current tree; skip the echo.
    InTree,
    /// The batch was applied to a tree that has since been replaced.
    Replaced,
    /// No recorded batch matches.
    Unknown,
}

#[derive(Debug)]
struct LocalBatch {
    seq: u64,
    generation: u64,
    actions: Vec<Action>,
    accepted: bool,
}

#[derive(Debug)]
pub(crate) struct Outbox {
    generation: u64,
    next_seq: u64,
    capacity: usize,
    batches: VecDeque<LocalBatch>,
}

impl Outbox {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            generation: 0,
            next_seq: 0,
            capacity: capacity.max(1),
            batches: VecDeque::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.batches.len()
    }

    /// Remember a batch just applied to the current tree. Returns its sequence number.
    pub(crate) fn record(&mut self, actions: Vec<Action>) -> u64 {
        while self.batches.len() >= self.capacity {
            if let Some(old) = self.batches.pop_front() {
                debug!(seq = old.seq, accepted = old.accepted, "Outbox full, forgetting oldest batch");
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.batches.push_back(LocalBatch {
            seq,
            generation: self.generation,
            actions,
            accepted: false,
        });
        seq
    }

    /// Record the backend's answer for batch `seq`. Rejected batches never echo.
    pub(crate) fn settle(&mut self, seq: u64, accepted: bool) {
        let Some(pos) = self.batches.iter().position(|b| b.seq == seq) else {
            // Echo already consumed it.
            return;
        };
        if accepted {
            self.batches[pos].accepted = true;
        } else {
            self.batches.remove(pos);
        }
        trace!(seq, accepted, unconfirmed = self.len(), "Batch settled");
    }

    /// The tree was replaced; batches recorded so far are no longer in it.
    pub(crate) fn replaced(&mut self) {
        self.generation += 1;
    }

    /// Consume the oldest batch equal to `actions`.
    pub(crate) fn match_echo(&mut self, actions: &[Action]) -> Echo {
        let Some(pos) = self.batches.iter().position(|b| b.actions == actions) else {
            return Echo::Unknown;
        };
        match self.batches.remove(pos) {
            Some(batch) if batch.generation == self.generation => Echo::InTree,
            Some(_) => Echo::Replaced,
            None => Echo::Unknown,
        }
    }
}
