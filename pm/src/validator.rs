//! Recipient-side checks on received tickets.

use crate::{
    broker::{self, Broker},
    ticket::{self, recipient_rand_hash, Ticket},
};
use num_bigint::BigUint;
use rand::{rngs::OsRng, RngCore};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};
use thiserror::Error;
use vidpay_cryptography::{Address, Digest, Verifier};

/// Reasons a ticket fails validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid signature from {0}")]
    InvalidSignature(Address),
    #[error("signer {signer} not approved by {sender}")]
    UnapprovedSigner { sender: Address, signer: Address },
    #[error("ticket already redeemed")]
    AlreadyRedeemed,
    #[error("no deposit for {0}")]
    DepositNotFound(Address),
    #[error("insufficient deposit: {deposit} < {face_value}")]
    InsufficientDeposit {
        deposit: BigUint,
        face_value: BigUint,
    },
    #[error("recipient rand does not match commitment")]
    RecipientRandMismatch,
    #[error("ticket for {actual}, expected {expected}")]
    InvalidRecipient { expected: Address, actual: Address },
    #[error("broker error: {0}")]
    Broker(#[from] broker::Error),
}

/// Validates tickets addressed to a single recipient.
///
/// Only tickets committing to randomness issued by this validator (through
/// [Validator::issue_recipient_rand] or [Validator::accept_recipient_rand]) are valid.
pub struct Validator<V: Verifier, B: Broker> {
    recipient: Address,
    verifier: V,
    broker: Arc<B>,
    commitments: Mutex<HashSet<Digest>>,
}

impl<V: Verifier, B: Broker> Validator<V, B> {
    pub fn new(recipient: Address, verifier: V, broker: Arc<B>) -> Self {
        Self {
            recipient,
            verifier,
            broker,
            commitments: Mutex::new(HashSet::new()),
        }
    }

    /// Generate fresh randomness that tickets may commit to.
    pub fn issue_recipient_rand(&self) -> BigUint {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let recipient_rand = BigUint::from_bytes_be(&bytes);
        self.accept_recipient_rand(&recipient_rand);
        recipient_rand
    }

    /// Accept tickets committing to `recipient_rand` (e.g. randomness issued before a restart).
    pub fn accept_recipient_rand(&self, recipient_rand: &BigUint) {
        self.commitments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(recipient_rand_hash(recipient_rand));
    }

    /// Stop accepting tickets committing to `recipient_rand`.
    pub fn forget_recipient_rand(&self, recipient_rand: &BigUint) {
        self.commitments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&recipient_rand_hash(recipient_rand));
    }

    /// Check a ticket, stopping at the first failure.
    ///
    /// Checks, in order: the signature recovers to the ticket's signer, the signer is approved
    /// by the sender, the ticket was not redeemed, the sender's deposit covers the face value,
    /// the supplied randomness opens the ticket's commitment and was issued by this validator,
    /// and the ticket names this recipient.
    pub fn validate_ticket(
        &self,
        ticket: &Ticket,
        signature: &[u8],
        recipient_rand: &BigUint,
    ) -> Result<(), Error> {
        if !self
            .verifier
            .verify(&ticket.signer, &ticket.encode(), signature)
        {
            return Err(Error::InvalidSignature(ticket.signer));
        }
        if !self
            .broker
            .is_approved_signer(&ticket.sender, &ticket.signer)?
        {
            return Err(Error::UnapprovedSigner {
                sender: ticket.sender,
                signer: ticket.signer,
            });
        }
        if self.broker.is_used_ticket(ticket)? {
            return Err(Error::AlreadyRedeemed);
        }
        let deposit = match self.broker.get_deposit(&ticket.sender) {
            Ok(deposit) => deposit,
            Err(broker::Error::DepositNotFound(sender)) => {
                return Err(Error::DepositNotFound(sender))
            }
            Err(err) => return Err(err.into()),
        };
        if deposit < ticket.face_value {
            return Err(Error::InsufficientDeposit {
                deposit,
                face_value: ticket.face_value.clone(),
            });
        }
        let commitment = recipient_rand_hash(recipient_rand);
        if commitment != ticket.recipient_rand_hash
            || !self
                .commitments
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&commitment)
        {
            return Err(Error::RecipientRandMismatch);
        }
        if ticket.recipient != self.recipient {
            return Err(Error::InvalidRecipient {
                expected: self.recipient,
                actual: ticket.recipient,
            });
        }
        Ok(())
    }

    /// Whether `ticket` wins the lottery seeded with `recipient_rand`.
    pub fn is_winning_ticket(
        &self,
        ticket: &Ticket,
        _signature: &[u8],
        recipient_rand: &BigUint,
    ) -> bool {
        ticket::is_winning(ticket, recipient_rand)
    }
}
