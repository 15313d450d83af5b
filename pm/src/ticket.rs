//! Payment instruments and their canonical encoding.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_bigint::BigUint;
use thiserror::Error;
use vidpay_cryptography::{hash, Address, Digest, Sha256, ADDRESS_LENGTH};

const DIGEST_LENGTH: usize = vidpay_cryptography::sha256::DIGEST_LENGTH;

/// Number of bits in the domain over which win probabilities are expressed.
pub const WIN_PROB_BITS: u64 = 256;

/// Errors that can occur when decoding a [Ticket].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("unexpected end of buffer")]
    EndOfBuffer,
    #[error("extra data: {0} bytes")]
    ExtraData(usize),
    #[error("non-canonical integer")]
    NonCanonicalInteger,
}

/// A probabilistic micropayment for one segment submission.
///
/// The identity of a ticket (see [Ticket::hash]) is a deterministic function of its fields: two
/// tickets with identical fields are the same ticket for replay purposes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ticket {
    /// Party paid if the ticket wins.
    pub recipient: Address,
    /// Party whose deposit funds the ticket.
    pub sender: Address,
    /// Key that signed the ticket on behalf of `sender`.
    pub signer: Address,
    /// Value transferred if the ticket wins.
    pub face_value: BigUint,
    /// Win threshold over `[0, 2^256)`.
    pub win_prob: BigUint,
    /// Monotonically increasing per session.
    pub sender_nonce: u64,
    /// Commitment to the recipient randomness for the session.
    pub recipient_rand_hash: Digest,
    /// Content hash of the work paid for.
    pub work_hash: Digest,
}

impl Ticket {
    /// Canonical encoding of the ticket (the payload that is signed and hashed).
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encode_size());
        self.write(&mut buf);
        buf.freeze()
    }

    /// Number of bytes produced by [Ticket::encode].
    pub fn encode_size(&self) -> usize {
        3 * ADDRESS_LENGTH
            + integer_size(&self.face_value)
            + integer_size(&self.win_prob)
            + 8
            + 2 * DIGEST_LENGTH
    }

    /// Write the canonical encoding into `buf`.
    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(self.recipient.as_ref());
        buf.put_slice(self.sender.as_ref());
        buf.put_slice(self.signer.as_ref());
        write_integer(buf, &self.face_value);
        write_integer(buf, &self.win_prob);
        buf.put_u64(self.sender_nonce);
        buf.put_slice(self.recipient_rand_hash.as_ref());
        buf.put_slice(self.work_hash.as_ref());
    }

    /// Read a ticket from the front of `buf`.
    pub fn read(buf: &mut impl Buf) -> Result<Self, Error> {
        let recipient = Address::new(read_array(buf)?);
        let sender = Address::new(read_array(buf)?);
        let signer = Address::new(read_array(buf)?);
        let face_value = read_integer(buf)?;
        let win_prob = read_integer(buf)?;
        if buf.remaining() < 8 {
            return Err(Error::EndOfBuffer);
        }
        let sender_nonce = buf.get_u64();
        let recipient_rand_hash = Digest::from(read_array::<DIGEST_LENGTH>(buf)?);
        let work_hash = Digest::from(read_array::<DIGEST_LENGTH>(buf)?);
        Ok(Self {
            recipient,
            sender,
            signer,
            face_value,
            win_prob,
            sender_nonce,
            recipient_rand_hash,
            work_hash,
        })
    }

    /// Decode a ticket, rejecting trailing bytes.
    pub fn decode(mut bytes: &[u8]) -> Result<Self, Error> {
        let ticket = Self::read(&mut bytes)?;
        if !bytes.is_empty() {
            return Err(Error::ExtraData(bytes.len()));
        }
        Ok(ticket)
    }

    /// Identity of the ticket.
    pub fn hash(&self) -> Digest {
        hash(&self.encode())
    }
}

/// Terms under which a recipient accepts tickets for a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketParams {
    pub recipient: Address,
    pub face_value: BigUint,
    pub win_prob: BigUint,
    /// Randomness chosen by the recipient for the session.
    pub recipient_rand: BigUint,
}

impl TicketParams {
    /// Commitment the recipient publishes for `recipient_rand`.
    pub fn recipient_rand_hash(&self) -> Digest {
        recipient_rand_hash(&self.recipient_rand)
    }
}

/// A signed ticket as sent alongside a segment submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payment {
    pub ticket: Ticket,
    pub signature: Bytes,
    pub recipient_rand: BigUint,
}

/// Commitment to recipient randomness.
pub fn recipient_rand_hash(recipient_rand: &BigUint) -> Digest {
    hash(&recipient_rand.to_bytes_be())
}

/// Build a win threshold that wins with probability `numerator / denominator`.
///
/// Returns `None` if `denominator` is zero. Ratios above one saturate at certain win.
pub fn win_prob_from_ratio(numerator: u64, denominator: u64) -> Option<BigUint> {
    if denominator == 0 {
        return None;
    }
    let max = (BigUint::from(1u8) << WIN_PROB_BITS) - 1u8;
    let numerator = numerator.min(denominator);
    Some(max * numerator / denominator)
}

/// Deterministic lottery: interprets `SHA-256(ticket_hash || recipient_rand)` as an integer in
/// `[0, 2^256)` and wins iff it is below the ticket's `win_prob`.
///
/// Reproducible by any party that holds the ticket and the revealed randomness.
pub fn is_winning(ticket: &Ticket, recipient_rand: &BigUint) -> bool {
    let mut hasher = Sha256::new();
    hasher.update(ticket.hash().as_ref());
    hasher.update(&recipient_rand.to_bytes_be());
    let draw = BigUint::from_bytes_be(hasher.finalize().as_ref());
    draw < ticket.win_prob
}

fn integer_size(value: &BigUint) -> usize {
    4 + value.to_bytes_be().len()
}

fn write_integer(buf: &mut impl BufMut, value: &BigUint) {
    let bytes = value.to_bytes_be();
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(&bytes);
}

fn read_integer(buf: &mut impl Buf) -> Result<BigUint, Error> {
    if buf.remaining() < 4 {
        return Err(Error::EndOfBuffer);
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(Error::EndOfBuffer);
    }
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);

    // Zero is encoded as a single zero byte, everything else without leading zeros
    let canonical = match bytes.as_slice() {
        [] => false,
        [0] => true,
        [first, ..] => *first != 0,
    };
    if !canonical {
        return Err(Error::NonCanonicalInteger);
    }
    Ok(BigUint::from_bytes_be(&bytes))
}

fn read_array<const N: usize>(buf: &mut impl Buf) -> Result<[u8; N], Error> {
    if buf.remaining() < N {
        return Err(Error::EndOfBuffer);
    }
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}
