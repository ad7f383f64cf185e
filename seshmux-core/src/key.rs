//! `IdentityId` and related items.

use std::{
    error::Error as StdError,
    fmt,
    num::NonZeroU128,
    sync::atomic::{AtomicU16, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use time::OffsetDateTime;

/// A 128-bit identity key, ordered by creation time.
///
/// The packed layout is 48 bits of unix milliseconds, a 16-bit per-process
/// sequence number, and 64 bits of entropy. Keys encode as a fixed-width
/// lowercase hex string, so the lexical order of encoded keys equals their
/// creation order.
// `NonZeroU128` is used so that `Option<IdentityId>` has the same size as
// `IdentityId`
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct IdentityId(NonZeroU128);

static SEQUENCE: AtomicU16 = AtomicU16::new(0);

impl IdentityId {
    /// Length of a string returned by the [`encode`] method.
    ///
    /// [`encode`]: IdentityId::encode
    pub const ENCODED_LEN: usize = 32;

    const MILLIS_SHIFT: u32 = 80;
    const SEQ_SHIFT: u32 = 64;
    const MILLIS_MASK: u64 = (1 << 48) - 1;

    /// Generates a fresh key from the system clock, a per-process sequence
    /// counter, and a thread-local RNG.
    #[must_use]
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        IdentityId::from_parts(millis, seq, rand::random())
    }

    /// Packs a key from its constituent parts. `millis` is truncated to
    /// 48 bits.
    #[must_use]
    pub fn from_parts(millis: u64, seq: u16, entropy: u64) -> Self {
        let millis = millis & IdentityId::MILLIS_MASK;
        let value = ((millis as u128) << IdentityId::MILLIS_SHIFT)
            | ((seq as u128) << IdentityId::SEQ_SHIFT)
            | entropy as u128;

        // All-zero parts can only be produced deliberately; map them to the
        // smallest representable key instead of panicking.
        IdentityId(NonZeroU128::new(value).unwrap_or(NonZeroU128::MIN))
    }

    /// The creation instant embedded in this key, at millisecond precision.
    #[must_use]
    pub fn created_at(&self) -> OffsetDateTime {
        let millis = (self.0.get() >> IdentityId::MILLIS_SHIFT) as i128;
        OffsetDateTime::from_unix_timestamp_nanos(millis * 1_000_000)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    /// Encodes this key as a fixed-width lowercase hex string.
    #[inline]
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{:032x}", self.0.get())
    }

    /// Decodes a key from the fixed-width lowercase hex form produced by
    /// [`encode`].
    ///
    /// [`encode`]: IdentityId::encode
    pub fn decode(s: &str) -> Result<IdentityId, DecodeIdentityIdError> {
        if s.len() != IdentityId::ENCODED_LEN {
            return Err(DecodeIdentityIdError::Length(s.len()));
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(DecodeIdentityIdError::Alphabet);
        }

        let value =
            u128::from_str_radix(s, 16).map_err(|_| DecodeIdentityIdError::Alphabet)?;
        match NonZeroU128::new(value) {
            Some(v) => Ok(IdentityId(v)),
            None => Err(DecodeIdentityIdError::Zero),
        }
    }
}

impl fmt::Debug for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IdentityId").field(&self.encode()).finish()
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl From<NonZeroU128> for IdentityId {
    #[inline]
    fn from(value: NonZeroU128) -> Self {
        IdentityId(value)
    }
}

impl From<IdentityId> for NonZeroU128 {
    #[inline]
    fn from(value: IdentityId) -> Self {
        value.0
    }
}

impl Serialize for IdentityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for IdentityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl de::Visitor<'_> for IdVisitor {
            type Value = IdentityId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 32-character lowercase hex identity id")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                IdentityId::decode(v).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(IdVisitor)
    }
}

/// The error type returned when decoding an identity id fails.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeIdentityIdError {
    Length(usize),
    Alphabet,
    Zero,
}

impl StdError for DecodeIdentityIdError {}

impl fmt::Display for DecodeIdentityIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeIdentityIdError::Length(len) => {
                write!(
                    f,
                    "identity id must be {} characters, got {}",
                    IdentityId::ENCODED_LEN,
                    len
                )
            }
            DecodeIdentityIdError::Alphabet => {
                f.write_str("identity id must be lowercase hex")
            }
            DecodeIdentityIdError::Zero => f.write_str("identity id must be non-zero"),
        }
    }
}
