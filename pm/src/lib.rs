//! Issue, validate, and redeem probabilistic micropayment tickets.
//!
//! A sender pays for each unit of work with a [ticket::Ticket] that is worth its face value only
//! if it wins a lottery whose outcome neither party can bias: the recipient commits to randomness
//! before the ticket is signed, and the outcome is a hash of the ticket and that randomness. Most
//! tickets lose and never reach the [broker::Broker], so issuing one costs a signature rather
//! than a settlement.
//!
//! # Status
//!
//! `vidpay-pm` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

pub mod broker;
pub mod recipient;
pub mod sender;
pub mod store;
pub mod ticket;
pub mod validator;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

pub use broker::{Broker, Ledger};
pub use recipient::Recipient;
pub use sender::Sender;
pub use store::TicketStore;
pub use ticket::{Payment, Ticket, TicketParams};
pub use validator::Validator;
