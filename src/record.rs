//! The on-disk record format: a fixed 30-byte header followed by the raw
//! key and value bytes, with no framing between consecutive records in a
//! segment.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder};

/// Fixed header size: `flag(2) + crc(4) + tstamp(8) + ksz(8) + vsz(8)`.
pub const HEADER_LEN: usize = 2 + 4 + 8 + 8 + 8;

/// Whether a record installs a value or tombstones a key.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Flag {
    Put,
    Delete,
}

impl From<Flag> for u16 {
    fn from(value: Flag) -> Self {
        match value {
            Flag::Put => 1,
            Flag::Delete => 2,
        }
    }
}

impl TryFrom<u16> for Flag {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            1 => Ok(Self::Put),
            2 => Ok(Self::Delete),
            other => Err(Error::CorruptRecord(format!("invalid flag tag {other}"))),
        }
    }
}

/// One decoded key-value record (or tombstone).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    pub flag: Flag,
    pub crc: u32,
    pub tstamp: u64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Record {
    /// Builds a PUT record with a fresh timestamp and the CRC-32 (IEEE) of
    /// `value`.
    #[must_use]
    pub fn put(key: &[u8], value: &[u8], tstamp: u64) -> Self {
        Self {
            flag: Flag::Put,
            crc: crc32fast::hash(value),
            tstamp,
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    /// Builds a DELETE record (empty value) with a fresh timestamp.
    #[must_use]
    pub fn delete(key: &[u8], tstamp: u64) -> Self {
        Self {
            flag: Flag::Delete,
            crc: crc32fast::hash(&[]),
            tstamp,
            key: key.to_vec(),
            value: Vec::new(),
        }
    }

    /// Total on-disk length of this record once encoded.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.key.len() + self.value.len()
    }

    /// Encodes the record into a single contiguous buffer: header, then
    /// key, then value.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0_u8; self.encoded_len()];

        BigEndian::write_u16(&mut buf[0..2], self.flag.into());
        BigEndian::write_u32(&mut buf[2..6], self.crc);
        BigEndian::write_u64(&mut buf[6..14], self.tstamp);
        BigEndian::write_u64(&mut buf[14..22], self.key.len() as u64);
        BigEndian::write_u64(&mut buf[22..30], self.value.len() as u64);

        let key_end = HEADER_LEN + self.key.len();
        buf[HEADER_LEN..key_end].copy_from_slice(&self.key);
        buf[key_end..].copy_from_slice(&self.value);

        buf
    }

    /// Decodes a record from a buffer that holds exactly one encoded
    /// record (as returned by a positioned read of the length recorded in
    /// the index). Fails with [`Error::CorruptRecord`] if the declared key
    /// or value sizes would read past the buffer.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::CorruptRecord(format!(
                "buffer of {} bytes is shorter than the {HEADER_LEN}-byte header",
                buf.len()
            )));
        }

        let flag = Flag::try_from(BigEndian::read_u16(&buf[0..2]))?;
        let crc = BigEndian::read_u32(&buf[2..6]);
        let tstamp = BigEndian::read_u64(&buf[6..14]);
        let ksz = BigEndian::read_u64(&buf[14..22]) as usize;
        let vsz = BigEndian::read_u64(&buf[22..30]) as usize;

        let key_end = HEADER_LEN
            .checked_add(ksz)
            .ok_or_else(|| Error::CorruptRecord("key size overflow".into()))?;
        let value_end = key_end
            .checked_add(vsz)
            .ok_or_else(|| Error::CorruptRecord("value size overflow".into()))?;

        if value_end > buf.len() {
            return Err(Error::CorruptRecord(format!(
                "declared key+value size {} exceeds buffer of {} bytes",
                ksz + vsz,
                buf.len()
            )));
        }

        Ok(Self {
            flag,
            crc,
            tstamp,
            key: buf[HEADER_LEN..key_end].to_vec(),
            value: buf[key_end..value_end].to_vec(),
        })
    }

    /// Verifies the stored CRC against the decoded value bytes. Decoding
    /// never mandates this check itself (per the wire format spec); the
    /// segment scanner calls this when rebuilding the index.
    #[must_use]
    pub fn verify_crc(&self) -> bool {
        crc32fast::hash(&self.value) == self.crc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn round_trips_put() {
        let record = Record::put(b"a", b"1", 42);
        let encoded = record.encode();
        assert_eq!(encoded.len(), HEADER_LEN + 1 + 1);
        let decoded = Record::decode(&encoded).expect("should decode");
        assert_eq!(decoded, record);
        assert!(decoded.verify_crc());
    }

    #[test]
    fn round_trips_delete_with_empty_value() {
        let record = Record::delete(b"a", 42);
        let encoded = record.encode();
        assert_eq!(encoded.len(), HEADER_LEN + 1);
        let decoded = Record::decode(&encoded).expect("should decode");
        assert_eq!(decoded.flag, Flag::Delete);
        assert!(decoded.value.is_empty());
    }

    #[test]
    fn rejects_truncated_header() {
        let buf = [0_u8; HEADER_LEN - 1];
        assert!(Record::decode(&buf).is_err());
    }

    #[test]
    fn rejects_body_shorter_than_declared() {
        let record = Record::put(b"key", b"value", 1);
        let mut encoded = record.encode();
        encoded.truncate(encoded.len() - 1);
        assert!(Record::decode(&encoded).is_err());
    }

    #[test]
    fn rejects_invalid_flag() {
        let mut encoded = Record::put(b"a", b"b", 1).encode();
        BigEndian::write_u16(&mut encoded[0..2], 9);
        assert!(Record::decode(&encoded).is_err());
    }
}
