//! Stand-ins for collaborators that tests need to control.

use crate::{
    store::{Entries, Error, TicketStore},
    ticket::Ticket,
};
use futures::future::{self, BoxFuture, FutureExt};
use num_bigint::BigUint;
use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use vidpay_cryptography::{Address, Verifier};

/// A [Verifier] that returns a configurable result.
#[derive(Clone, Default)]
pub struct StubVerifier {
    result: Arc<AtomicBool>,
}

impl StubVerifier {
    pub fn new(result: bool) -> Self {
        Self {
            result: Arc::new(AtomicBool::new(result)),
        }
    }

    pub fn set_verify_result(&self, result: bool) {
        self.result.store(result, Ordering::SeqCst);
    }
}

impl Verifier for StubVerifier {
    fn verify(&self, _address: &Address, _message: &[u8], _signature: &[u8]) -> bool {
        self.result.load(Ordering::SeqCst)
    }
}

/// A [TicketStore] whose every operation fails.
#[derive(Clone, Copy, Default)]
pub struct FailingStore;

impl TicketStore for FailingStore {
    fn store<'a>(
        &'a self,
        _session_id: &'a str,
        _ticket: &'a Ticket,
        _signature: &'a [u8],
        _recipient_rand: &'a BigUint,
    ) -> BoxFuture<'a, Result<(), Error>> {
        future::ready(Err(Error::Io(io::Error::other("store unavailable")))).boxed()
    }

    fn load<'a>(&'a self, _session_id: &'a str) -> BoxFuture<'a, Result<Entries, Error>> {
        future::ready(Err(Error::Io(io::Error::other("store unavailable")))).boxed()
    }
}
