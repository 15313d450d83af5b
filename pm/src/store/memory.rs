use super::{Entries, Error, TicketStore};
use crate::ticket::Ticket;
use bytes::Bytes;
use futures::future::{self, BoxFuture, FutureExt};
use num_bigint::BigUint;
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

/// In-memory [TicketStore].
#[derive(Default)]
pub struct Store {
    sessions: Mutex<HashMap<String, Entries>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TicketStore for Store {
    fn store<'a>(
        &'a self,
        session_id: &'a str,
        ticket: &'a Ticket,
        signature: &'a [u8],
        recipient_rand: &'a BigUint,
    ) -> BoxFuture<'a, Result<(), Error>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.entry(session_id.to_string()).or_default().push(
            ticket.clone(),
            Bytes::copy_from_slice(signature),
            recipient_rand.clone(),
        );
        future::ready(Ok(())).boxed()
    }

    fn load<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Entries, Error>> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = sessions.get(session_id).cloned().unwrap_or_default();
        future::ready(Ok(entries)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::{recipient_rand_hash, win_prob_from_ratio};
    use vidpay_cryptography::{hash, Address};

    fn ticket(nonce: u64) -> Ticket {
        Ticket {
            recipient: Address::new([1; 20]),
            sender: Address::new([2; 20]),
            signer: Address::new([2; 20]),
            face_value: BigUint::from(100u32),
            win_prob: win_prob_from_ratio(1, 10).unwrap(),
            sender_nonce: nonce,
            recipient_rand_hash: recipient_rand_hash(&BigUint::from(9u8)),
            work_hash: hash(&nonce.to_be_bytes()),
        }
    }

    #[tokio::test]
    async fn test_load_returns_entries_in_order() {
        let store = Store::new();
        for nonce in 0..5u64 {
            store
                .store("session", &ticket(nonce), &[nonce as u8; 65], &BigUint::from(nonce))
                .await
                .unwrap();
        }

        let entries = store.load("session").await.unwrap();
        assert_eq!(entries.len(), 5);
        for (i, nonce) in (0..5u64).enumerate() {
            assert_eq!(entries.tickets[i], ticket(nonce));
            assert_eq!(entries.signatures[i].as_ref(), &[nonce as u8; 65]);
            assert_eq!(entries.recipient_rands[i], BigUint::from(nonce));
        }
    }

    #[tokio::test]
    async fn test_unknown_session_is_empty() {
        let store = Store::new();
        store
            .store("known", &ticket(1), &[0; 65], &BigUint::from(1u8))
            .await
            .unwrap();
        let entries = store.load("unknown").await.unwrap();
        assert!(entries.is_empty());
        assert!(entries.signatures.is_empty());
        assert!(entries.recipient_rands.is_empty());
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = Store::new();
        store
            .store("a", &ticket(1), &[1; 65], &BigUint::from(1u8))
            .await
            .unwrap();
        store
            .store("b", &ticket(2), &[2; 65], &BigUint::from(2u8))
            .await
            .unwrap();
        assert_eq!(store.load("a").await.unwrap().tickets, vec![ticket(1)]);
        assert_eq!(store.load("b").await.unwrap().tickets, vec![ticket(2)]);
    }
}
