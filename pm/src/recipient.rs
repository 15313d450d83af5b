//! Ticket receipt for a paid orchestrator.
//!
//! A [Recipient] picks fresh randomness for each session and publishes [TicketParams] that commit
//! to it. Received tickets are validated, entered into the lottery, and winners are recorded and
//! redeemed through the [Broker].

use crate::{
    broker::{self, Broker},
    store::TicketStore,
    ticket::{Payment, TicketParams},
    validator::{self, Validator},
};
use num_bigint::BigUint;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use thiserror::Error;
use tracing::{debug, info, warn};
use vidpay_cryptography::{Address, Verifier};

/// Errors that can occur when receiving a ticket.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("invalid ticket: {0}")]
    InvalidTicket(#[from] validator::Error),
    #[error("redemption failed: {0}")]
    Redemption(#[from] broker::Error),
}

/// Configuration for [Recipient].
#[derive(Clone, Debug)]
pub struct Config {
    /// Address that is paid by winning tickets.
    pub address: Address,
    /// Face value requested per ticket.
    pub face_value: BigUint,
    /// Win threshold requested per ticket.
    pub win_prob: BigUint,
}

/// Accepts tickets for work performed.
pub struct Recipient<V: Verifier, B: Broker> {
    cfg: Config,
    validator: Validator<V, B>,
    broker: Arc<B>,
    store: Arc<dyn TicketStore>,
    rands: Mutex<HashMap<String, BigUint>>,
}

impl<V: Verifier, B: Broker> Recipient<V, B> {
    pub fn new(cfg: Config, verifier: V, broker: Arc<B>, store: Arc<dyn TicketStore>) -> Self {
        Self {
            validator: Validator::new(cfg.address, verifier, broker.clone()),
            cfg,
            broker,
            store,
            rands: Mutex::new(HashMap::new()),
        }
    }

    /// Terms for `session_id`, generating the session's randomness on first use.
    pub fn ticket_params(&self, session_id: &str) -> TicketParams {
        let mut rands = self.rands.lock().unwrap_or_else(PoisonError::into_inner);
        let recipient_rand = rands
            .entry(session_id.to_string())
            .or_insert_with(|| self.validator.issue_recipient_rand())
            .clone();
        TicketParams {
            recipient: self.cfg.address,
            face_value: self.cfg.face_value.clone(),
            win_prob: self.cfg.win_prob.clone(),
            recipient_rand,
        }
    }

    /// Forget `session_id`. Tickets committing to its randomness are no longer accepted.
    pub fn end_session(&self, session_id: &str) {
        let removed = self
            .rands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        if let Some(recipient_rand) = removed {
            self.validator.forget_recipient_rand(&recipient_rand);
            debug!(session_id, "ended session");
        }
    }

    /// Process a ticket received for `session_id`.
    ///
    /// Returns whether the ticket won (and was redeemed).
    pub async fn receive_ticket(&self, session_id: &str, payment: &Payment) -> Result<bool, Error> {
        if !self
            .rands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(session_id)
        {
            return Err(Error::UnknownSession(session_id.to_string()));
        }

        let Payment {
            ticket,
            signature,
            recipient_rand,
        } = payment;
        self.validator
            .validate_ticket(ticket, signature, recipient_rand)?;
        if !self
            .validator
            .is_winning_ticket(ticket, signature, recipient_rand)
        {
            debug!(session_id, sender_nonce = ticket.sender_nonce, "losing ticket");
            return Ok(false);
        }

        self.broker
            .redeem_winning_ticket(ticket, signature, recipient_rand)?;
        info!(session_id, sender = %ticket.sender, face_value = %ticket.face_value, "redeemed winning ticket");
        if let Err(err) = self
            .store
            .store(session_id, ticket, signature, recipient_rand)
            .await
        {
            warn!(?err, session_id, "failed to record winning ticket");
        }
        Ok(true)
    }
}
