//! A [TicketStore] that appends entries to one file per session.
//!
//! # Format
//!
//! Each entry is written as a single record:
//!
//! ```text
//! +---+---+---+---+-------------------------------+---+---+---+---+
//! |     Length    |            Payload            |     CRC32     |
//! +---+---+---+---+-------------------------------+---+---+---+---+
//!
//! Payload = Ticket || u32(len) || Signature || u32(len) || RecipientRand
//! ```
//!
//! Lengths and the checksum are big-endian. A record whose checksum does not match is reported as
//! corrupt. A trailing record that was cut short (a write interrupted by a crash) is ignored
//! during load.

use super::{Entries, Error, TicketStore};
use crate::ticket::Ticket;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::future::{BoxFuture, FutureExt};
use num_bigint::BigUint;
use std::{io::ErrorKind, path::PathBuf};
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::warn;
use vidpay_cryptography::hash;

const FILE_EXTENSION: &str = "tickets";

/// Configuration for [Journal].
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory that holds one file per session.
    pub directory: PathBuf,
}

/// On-disk [TicketStore].
pub struct Journal {
    directory: PathBuf,

    // Serializes appends so records of concurrent writers never interleave
    lock: Mutex<()>,
}

impl Journal {
    /// Initialize a [Journal], creating its directory if needed.
    pub async fn init(cfg: Config) -> Result<Self, Error> {
        fs::create_dir_all(&cfg.directory).await?;
        Ok(Self {
            directory: cfg.directory,
            lock: Mutex::new(()),
        })
    }

    // Session ids are arbitrary strings: hash them for a fixed-length, path-safe name
    fn path(&self, session_id: &str) -> PathBuf {
        self.directory
            .join(format!("{}.{}", hash(session_id.as_bytes()), FILE_EXTENSION))
    }

    async fn append(
        &self,
        session_id: &str,
        ticket: &Ticket,
        signature: &[u8],
        recipient_rand: &BigUint,
    ) -> Result<(), Error> {
        let record = encode_record(ticket, signature, recipient_rand);
        let _guard = self.lock.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(session_id))
            .await?;
        file.write_all(&record).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn replay(&self, session_id: &str) -> Result<Entries, Error> {
        let path = self.path(session_id);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Entries::default()),
            Err(err) => return Err(err.into()),
        };

        let mut entries = Entries::default();
        let mut buf = data.as_slice();
        while buf.has_remaining() {
            if buf.remaining() < 4 {
                warn!(?path, trailing = buf.remaining(), "ignoring partial record");
                break;
            }
            let len = (&buf[..4]).get_u32() as usize;
            if buf.remaining() < 4 + len + 4 {
                warn!(?path, trailing = buf.remaining(), "ignoring partial record");
                break;
            }
            buf.advance(4);
            let payload = &buf[..len];
            buf.advance(len);
            let checksum = buf.get_u32();
            if crc32fast::hash(payload) != checksum {
                return Err(Error::Corrupt(format!(
                    "checksum mismatch in {}",
                    path.display()
                )));
            }
            let (ticket, signature, recipient_rand) = decode_payload(payload)?;
            entries.push(ticket, signature, recipient_rand);
        }
        Ok(entries)
    }
}

impl TicketStore for Journal {
    fn store<'a>(
        &'a self,
        session_id: &'a str,
        ticket: &'a Ticket,
        signature: &'a [u8],
        recipient_rand: &'a BigUint,
    ) -> BoxFuture<'a, Result<(), Error>> {
        self.append(session_id, ticket, signature, recipient_rand)
            .boxed()
    }

    fn load<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Entries, Error>> {
        self.replay(session_id).boxed()
    }
}

fn encode_record(ticket: &Ticket, signature: &[u8], recipient_rand: &BigUint) -> Bytes {
    let rand = recipient_rand.to_bytes_be();
    let mut payload = BytesMut::with_capacity(ticket.encode_size() + 8 + signature.len() + rand.len());
    ticket.write(&mut payload);
    payload.put_u32(signature.len() as u32);
    payload.put_slice(signature);
    payload.put_u32(rand.len() as u32);
    payload.put_slice(&rand);

    let mut record = BytesMut::with_capacity(4 + payload.len() + 4);
    record.put_u32(payload.len() as u32);
    record.put_slice(&payload);
    record.put_u32(crc32fast::hash(&payload));
    record.freeze()
}

fn decode_payload(mut payload: &[u8]) -> Result<(Ticket, Bytes, BigUint), Error> {
    let ticket = Ticket::read(&mut payload)?;
    let signature = read_field(&mut payload)?;
    let rand = read_field(&mut payload)?;
    if !payload.is_empty() {
        return Err(Error::Corrupt(format!(
            "{} unexpected bytes in record",
            payload.len()
        )));
    }
    Ok((ticket, signature, BigUint::from_bytes_be(&rand)))
}

fn read_field(buf: &mut &[u8]) -> Result<Bytes, Error> {
    if buf.remaining() < 4 {
        return Err(Error::Corrupt("missing field length".into()));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(Error::Corrupt("field exceeds record".into()));
    }
    let field = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Ok(field)
}
