//! Escrow ledger for ticket senders.
//!
//! A [Broker] tracks, per sender, a deposit (which funds ticket payouts), a penalty escrow (which
//! is slashed when the deposit cannot cover a winning ticket), and the set of signers approved to
//! issue tickets on the sender's behalf. It also keeps the registry of redeemed tickets, which is
//! the only defense against replay.
//!
//! [Ledger] is an in-process [Broker]. It models the contract's two-phase exit (unlock, then
//! withdraw after [Config::unlock_period]) and its delayed signer revocation, without gas,
//! transactions, or chain time.
//!
//! # Concurrency
//!
//! The used-ticket registry is split into shards, each guarded by its own mutex, so redemptions of
//! different tickets rarely contend. Inserting a ticket hash into its shard is the atomic step
//! that decides a redemption: of any number of concurrent callers redeeming the same ticket,
//! exactly one observes a successful insert.

use crate::ticket::Ticket;
use num_bigint::BigUint;
use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, PoisonError, RwLock},
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, warn};
use vidpay_cryptography::{Address, Digest};

const USED_TICKET_SHARDS: usize = 16;

/// Errors that can occur when interacting with a [Broker].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("ticket already redeemed: {0}")]
    AlreadyRedeemed(Digest),
    #[error("no deposit for {0}")]
    DepositNotFound(Address),
    #[error("no penalty escrow for {0}")]
    PenaltyEscrowNotFound(Address),
    #[error("no account for {0}")]
    AccountNotFound(Address),
    #[error("unlock not initiated for {0}")]
    NotUnlocked(Address),
    #[error("unlock period has not elapsed for {0}")]
    UnlockPending(Address),
}

/// Funds released by [Broker::withdraw].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Withdrawal {
    pub deposit: BigUint,
    pub penalty_escrow: BigUint,
}

/// Escrow authority for ticket senders.
pub trait Broker: Send + Sync + 'static {
    /// Add `amount` to the deposit of `sender`.
    fn fund_deposit(&self, sender: &Address, amount: &BigUint) -> Result<(), Error>;

    /// Add `amount` to the penalty escrow of `sender`.
    fn fund_penalty_escrow(&self, sender: &Address, amount: &BigUint) -> Result<(), Error>;

    /// Fund both pools and approve `signers` in one step.
    fn fund_and_approve_signers(
        &self,
        sender: &Address,
        deposit: &BigUint,
        penalty_escrow: &BigUint,
        signers: &[Address],
    ) -> Result<(), Error> {
        self.fund_deposit(sender, deposit)?;
        self.fund_penalty_escrow(sender, penalty_escrow)?;
        self.approve_signers(sender, signers)
    }

    /// Approve `signers` to issue tickets on behalf of `sender`.
    fn approve_signers(&self, sender: &Address, signers: &[Address]) -> Result<(), Error>;

    /// Request that `signers` stop being approved once the unlock period elapses.
    fn request_signers_revocation(&self, sender: &Address, signers: &[Address])
        -> Result<(), Error>;

    /// Start the withdrawal timer of `sender`.
    fn unlock(&self, sender: &Address) -> Result<(), Error>;

    /// Abort a pending withdrawal of `sender`.
    fn cancel_unlock(&self, sender: &Address) -> Result<(), Error>;

    /// Release all funds of `sender`, which must have unlocked at least one unlock period ago.
    fn withdraw(&self, sender: &Address) -> Result<Withdrawal, Error>;

    /// Redeem a winning ticket, paying its recipient from the sender's deposit.
    fn redeem_winning_ticket(
        &self,
        ticket: &Ticket,
        signature: &[u8],
        recipient_rand: &BigUint,
    ) -> Result<(), Error>;

    /// Whether `ticket` has already been redeemed.
    fn is_used_ticket(&self, ticket: &Ticket) -> Result<bool, Error>;

    /// Whether `signer` may issue tickets on behalf of `sender`.
    fn is_approved_signer(&self, sender: &Address, signer: &Address) -> Result<bool, Error>;

    /// Deposit of `sender`. Fails if `sender` never funded a deposit.
    fn get_deposit(&self, sender: &Address) -> Result<BigUint, Error>;

    /// Penalty escrow of `sender`. Fails if `sender` never funded a penalty escrow.
    fn get_penalty_escrow(&self, sender: &Address) -> Result<BigUint, Error>;
}

/// Configuration for [Ledger].
#[derive(Clone, Debug)]
pub struct Config {
    /// Time between [Broker::unlock] and a permitted [Broker::withdraw], and between
    /// [Broker::request_signers_revocation] and the signer losing approval.
    pub unlock_period: Duration,
}

#[derive(Default)]
struct Account {
    // `None` until funded, so that "never funded" is distinguishable from zero
    deposit: Option<BigUint>,
    penalty_escrow: Option<BigUint>,

    // Approved signers and, if requested, when their revocation was requested
    signers: HashMap<Address, Option<Instant>>,
    unlock_started: Option<Instant>,
}

struct UsedTickets {
    shards: Vec<Mutex<HashSet<Digest>>>,
}

impl UsedTickets {
    fn new() -> Self {
        Self {
            shards: (0..USED_TICKET_SHARDS)
                .map(|_| Mutex::new(HashSet::new()))
                .collect(),
        }
    }

    fn shard(&self, hash: &Digest) -> &Mutex<HashSet<Digest>> {
        &self.shards[hash.as_bytes()[0] as usize % USED_TICKET_SHARDS]
    }

    /// Returns `true` if `hash` was not present.
    fn insert(&self, hash: Digest) -> bool {
        self.shard(&hash)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(hash)
    }

    fn contains(&self, hash: &Digest) -> bool {
        self.shard(hash)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(hash)
    }
}

/// In-process [Broker].
pub struct Ledger {
    unlock_period: Duration,
    accounts: RwLock<HashMap<Address, Account>>,
    used: UsedTickets,
    payouts: Mutex<HashMap<Address, BigUint>>,
}

impl Ledger {
    /// Create an empty ledger.
    pub fn new(cfg: Config) -> Self {
        Self {
            unlock_period: cfg.unlock_period,
            accounts: RwLock::new(HashMap::new()),
            used: UsedTickets::new(),
            payouts: Mutex::new(HashMap::new()),
        }
    }

    /// Overwrite the deposit of `sender`.
    pub fn set_deposit(&self, sender: &Address, amount: BigUint) {
        self.write(|accounts| {
            accounts.entry(*sender).or_default().deposit = Some(amount);
        })
    }

    /// Overwrite the penalty escrow of `sender`.
    pub fn set_penalty_escrow(&self, sender: &Address, amount: BigUint) {
        self.write(|accounts| {
            accounts.entry(*sender).or_default().penalty_escrow = Some(amount);
        })
    }

    /// Total value paid out to `recipient` by redeemed tickets.
    pub fn get_payout(&self, recipient: &Address) -> BigUint {
        self.payouts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(recipient)
            .cloned()
            .unwrap_or_default()
    }

    fn read<T>(&self, f: impl FnOnce(&HashMap<Address, Account>) -> T) -> T {
        f(&self.accounts.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write<T>(&self, f: impl FnOnce(&mut HashMap<Address, Account>) -> T) -> T {
        f(&mut self.accounts.write().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Broker for Ledger {
    fn fund_deposit(&self, sender: &Address, amount: &BigUint) -> Result<(), Error> {
        self.write(|accounts| {
            let deposit = accounts
                .entry(*sender)
                .or_default()
                .deposit
                .get_or_insert_with(BigUint::default);
            *deposit += amount;
        });
        debug!(%sender, %amount, "funded deposit");
        Ok(())
    }

    fn fund_penalty_escrow(&self, sender: &Address, amount: &BigUint) -> Result<(), Error> {
        self.write(|accounts| {
            let escrow = accounts
                .entry(*sender)
                .or_default()
                .penalty_escrow
                .get_or_insert_with(BigUint::default);
            *escrow += amount;
        });
        debug!(%sender, %amount, "funded penalty escrow");
        Ok(())
    }

    fn approve_signers(&self, sender: &Address, signers: &[Address]) -> Result<(), Error> {
        self.write(|accounts| {
            let account = accounts.entry(*sender).or_default();
            for signer in signers {
                // Approving again also clears any pending revocation
                account.signers.insert(*signer, None);
            }
        });
        Ok(())
    }

    fn request_signers_revocation(
        &self,
        sender: &Address,
        signers: &[Address],
    ) -> Result<(), Error> {
        let now = Instant::now();
        self.write(|accounts| {
            let account = accounts
                .get_mut(sender)
                .ok_or(Error::AccountNotFound(*sender))?;
            for signer in signers {
                if let Some(requested) = account.signers.get_mut(signer) {
                    requested.get_or_insert(now);
                }
            }
            Ok(())
        })
    }

    fn unlock(&self, sender: &Address) -> Result<(), Error> {
        self.write(|accounts| {
            let account = accounts
                .get_mut(sender)
                .ok_or(Error::AccountNotFound(*sender))?;
            account.unlock_started = Some(Instant::now());
            Ok(())
        })
    }

    fn cancel_unlock(&self, sender: &Address) -> Result<(), Error> {
        self.write(|accounts| {
            let account = accounts
                .get_mut(sender)
                .ok_or(Error::AccountNotFound(*sender))?;
            account
                .unlock_started
                .take()
                .map(|_| ())
                .ok_or(Error::NotUnlocked(*sender))
        })
    }

    fn withdraw(&self, sender: &Address) -> Result<Withdrawal, Error> {
        self.write(|accounts| {
            let account = accounts
                .get_mut(sender)
                .ok_or(Error::AccountNotFound(*sender))?;
            let started = account.unlock_started.ok_or(Error::NotUnlocked(*sender))?;
            if started.elapsed() < self.unlock_period {
                return Err(Error::UnlockPending(*sender));
            }
            account.unlock_started = None;
            let withdrawal = Withdrawal {
                deposit: account
                    .deposit
                    .as_mut()
                    .map(std::mem::take)
                    .unwrap_or_default(),
                penalty_escrow: account
                    .penalty_escrow
                    .as_mut()
                    .map(std::mem::take)
                    .unwrap_or_default(),
            };
            debug!(%sender, deposit = %withdrawal.deposit, penalty_escrow = %withdrawal.penalty_escrow, "withdrew");
            Ok(withdrawal)
        })
    }

    fn redeem_winning_ticket(
        &self,
        ticket: &Ticket,
        _signature: &[u8],
        _recipient_rand: &BigUint,
    ) -> Result<(), Error> {
        let hash = ticket.hash();
        let payout = self.write(|accounts| {
            let Some(deposit) = accounts
                .get_mut(&ticket.sender)
                .and_then(|account| account.deposit.as_mut())
            else {
                return Err(Error::DepositNotFound(ticket.sender));
            };
            if !self.used.insert(hash) {
                return Err(Error::AlreadyRedeemed(hash));
            }
            if ticket.face_value <= *deposit {
                *deposit -= &ticket.face_value;
                return Ok(ticket.face_value.clone());
            }

            // The deposit cannot cover the ticket: pay what is left and slash the escrow
            let payout = std::mem::take(deposit);
            if let Some(escrow) = accounts
                .get_mut(&ticket.sender)
                .and_then(|account| account.penalty_escrow.as_mut())
            {
                warn!(sender = %ticket.sender, slashed = %escrow, "slashing penalty escrow");
                *escrow = BigUint::default();
            }
            Ok(payout)
        })?;

        debug!(%hash, recipient = %ticket.recipient, %payout, "redeemed ticket");
        *self
            .payouts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(ticket.recipient)
            .or_default() += payout;
        Ok(())
    }

    fn is_used_ticket(&self, ticket: &Ticket) -> Result<bool, Error> {
        Ok(self.used.contains(&ticket.hash()))
    }

    fn is_approved_signer(&self, sender: &Address, signer: &Address) -> Result<bool, Error> {
        Ok(self.read(|accounts| {
            let Some(account) = accounts.get(sender) else {
                return false;
            };
            match account.signers.get(signer) {
                None => false,
                Some(None) => true,
                Some(Some(requested)) => requested.elapsed() < self.unlock_period,
            }
        }))
    }

    fn get_deposit(&self, sender: &Address) -> Result<BigUint, Error> {
        self.read(|accounts| {
            accounts
                .get(sender)
                .and_then(|account| account.deposit.clone())
                .ok_or(Error::DepositNotFound(*sender))
        })
    }

    fn get_penalty_escrow(&self, sender: &Address) -> Result<BigUint, Error> {
        self.read(|accounts| {
            accounts
                .get(sender)
                .and_then(|account| account.penalty_escrow.clone())
                .ok_or(Error::PenaltyEscrowNotFound(*sender))
        })
    }
}
