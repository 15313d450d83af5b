//! Append-only, per-session logs of tickets.
//!
//! Each entry pairs a [Ticket] with its signature and the recipient randomness it was issued
//! against. Entries are returned by [TicketStore::load] in the order they were stored. Nothing in
//! this module rewrites or removes an entry.

use crate::ticket::{self, Ticket};
use bytes::Bytes;
use futures::future::BoxFuture;
use num_bigint::BigUint;
use thiserror::Error;

pub mod journal;
pub mod memory;

/// Errors that can occur when interacting with a [TicketStore].
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] ticket::Error),
    #[error("record corrupt: {0}")]
    Corrupt(String),
}

/// Entries recorded for a session, index-aligned and in issuance order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Entries {
    pub tickets: Vec<Ticket>,
    pub signatures: Vec<Bytes>,
    pub recipient_rands: Vec<BigUint>,
}

impl Entries {
    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    /// Whether no entries were recorded.
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    pub(crate) fn push(&mut self, ticket: Ticket, signature: Bytes, recipient_rand: BigUint) {
        self.tickets.push(ticket);
        self.signatures.push(signature);
        self.recipient_rands.push(recipient_rand);
    }
}

/// Persists tickets per session.
pub trait TicketStore: Send + Sync + 'static {
    /// Append an entry to the log of `session_id`.
    fn store<'a>(
        &'a self,
        session_id: &'a str,
        ticket: &'a Ticket,
        signature: &'a [u8],
        recipient_rand: &'a BigUint,
    ) -> BoxFuture<'a, Result<(), Error>>;

    /// Load every entry stored for `session_id`.
    ///
    /// An unknown session yields empty [Entries], not an error.
    fn load<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Entries, Error>>;
}
