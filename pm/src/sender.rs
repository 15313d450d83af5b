//! Ticket issuance for a paying broadcaster.

use crate::{
    store::TicketStore,
    ticket::{Payment, Ticket, TicketParams},
};
use bytes::Bytes;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use thiserror::Error;
use tracing::{debug, warn};
use vidpay_cryptography::{Address, Digest, PrivateKey};

/// Errors that can occur when issuing a ticket.
#[derive(Error, Debug)]
pub enum Error {
    #[error("signing failed: {0}")]
    Signing(#[from] vidpay_cryptography::Error),
}

/// Issues signed tickets on behalf of a sender account.
pub struct Sender {
    key: PrivateKey,
    sender: Address,
    store: Arc<dyn TicketStore>,
    nonces: Mutex<HashMap<String, u64>>,
}

impl Sender {
    /// Create a [Sender] that signs with `key` for the account `sender`.
    ///
    /// `key` must be `sender` itself or one of its approved signers for the tickets to validate.
    pub fn new(key: PrivateKey, sender: Address, store: Arc<dyn TicketStore>) -> Self {
        Self {
            key,
            sender,
            store,
            nonces: Mutex::new(HashMap::new()),
        }
    }

    /// Account funding the issued tickets.
    pub fn address(&self) -> Address {
        self.sender
    }

    /// Forget the nonce counter of `session_id`.
    ///
    /// Nonces restart from one if the session is resumed, so resumed sessions must use fresh
    /// [TicketParams] for their tickets to be distinct.
    pub fn end_session(&self, session_id: &str) {
        self.nonces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
    }

    /// Issue the next ticket of `session_id` paying for `work_hash`.
    ///
    /// The ticket is recorded in the [TicketStore] before it is returned. Failing to record it
    /// only costs local auditability, so it is logged rather than returned.
    pub async fn create_ticket(
        &self,
        session_id: &str,
        params: &TicketParams,
        work_hash: Digest,
    ) -> Result<Payment, Error> {
        let sender_nonce = {
            let mut nonces = self.nonces.lock().unwrap_or_else(PoisonError::into_inner);
            let nonce = nonces.entry(session_id.to_string()).or_default();
            *nonce += 1;
            *nonce
        };
        let ticket = Ticket {
            recipient: params.recipient,
            sender: self.sender,
            signer: self.key.address(),
            face_value: params.face_value.clone(),
            win_prob: params.win_prob.clone(),
            sender_nonce,
            recipient_rand_hash: params.recipient_rand_hash(),
            work_hash,
        };
        let signature = Bytes::copy_from_slice(self.key.sign(&ticket.encode())?.as_ref());

        if let Err(err) = self
            .store
            .store(session_id, &ticket, &signature, &params.recipient_rand)
            .await
        {
            warn!(?err, session_id, sender_nonce, "failed to record ticket");
        }
        debug!(session_id, sender_nonce, recipient = %ticket.recipient, "issued ticket");

        Ok(Payment {
            ticket,
            signature,
            recipient_rand: params.recipient_rand.clone(),
        })
    }
}
