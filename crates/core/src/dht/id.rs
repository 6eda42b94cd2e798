#![warn(missing_docs)]

//! This module defines the identifier of the Chord ring.
//!
//! A [RingId] is a fixed width unsigned integer taken modulo 2^[ID_BITS]. The values
//! form a circle: adding to the largest identifier wraps around to zero. Peers and
//! keys are placed on the circle by hashing them with SHA-256, and every routing
//! decision of the ring is a question about clockwise distance on that circle.
//!
//! Since there is no meaningful total order on a circle, [BiasId] is provided to order
//! identifiers by their clockwise distance from a chosen origin.

use std::cmp::Ordering;
use std::ops::Add;
use std::ops::Neg;
use std::ops::Sub;
use std::str::FromStr;

use num_bigint::BigUint;
use serde::de;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use sha2::Digest;
use sha2::Sha256;

use crate::consts::ID_BITS;
use crate::consts::ID_BYTES;
use crate::error::Error;
use crate::error::Result;

/// RingId is a finite ring R(P) where P = 2^256, stored big-endian.
#[derive(Copy, Clone, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct RingId([u8; ID_BYTES]);

/// Bias Id orders identifiers by clockwise distance from `bias`, so that `bias`
/// itself is the smallest value.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct BiasId {
    /// the zero point for determine order of RingId.
    bias: RingId,
    /// id with the bias subtracted.
    pos: RingId,
}

impl RingId {
    /// The identifier zero.
    pub const ZERO: RingId = RingId([0u8; ID_BYTES]);

    /// Digest an opaque seed into a ring identifier.
    pub fn create(seed: &str) -> Self {
        let digest = Sha256::digest(seed.as_bytes());
        let mut bytes = [0u8; ID_BYTES];
        bytes.copy_from_slice(&digest[..ID_BYTES]);
        Self(bytes)
    }

    /// Raw big-endian bytes.
    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    /// Fixed length lowercase hex form, without prefix.
    pub fn to_canonical_string(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the fixed length hex form. Upper case digits are accepted.
    pub fn from_canonical_str(s: &str) -> Result<Self> {
        if s.len() != ID_BYTES * 2 {
            return Err(Error::MalformedIdentifier(format!(
                "expected {} hex digits, got {}",
                ID_BYTES * 2,
                s.len()
            )));
        }
        let mut bytes = [0u8; ID_BYTES];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| Error::MalformedIdentifier(format!("{s}: {e}")))?;
        Ok(Self(bytes))
    }

    /// Unsigned big-endian comparison, as -1, 0 or 1.
    pub fn compare_to(&self, other: &Self) -> i8 {
        match self.cmp(other) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }
    }

    /// Test self <- (from, to), walking clockwise from `from`.
    /// The endpoints are never inside. When `from == to` the arc is the whole ring but that point.
    pub fn is_in_interval(&self, from: &Self, to: &Self) -> bool {
        if self == from || self == to {
            return false;
        }
        if from < to {
            from < self && self < to
        } else {
            self > from || self < to
        }
    }

    /// Test self <- (from, to].
    pub fn is_in_half_open_interval(&self, from: &Self, to: &Self) -> bool {
        self == to || self.is_in_interval(from, to)
    }

    /// self + 2^k mod 2^256. `k` larger than the width adds nothing.
    pub fn add_power_of_two(&self, k: usize) -> Self {
        if k >= ID_BITS {
            return *self;
        }
        *self + Self::power_of_two(k)
    }

    /// floor(log2(self - other)): the finger slot `self` would occupy relative to `other`.
    /// `None` stands for negative infinity and is returned when both are equal.
    pub fn interval_in_power_of_two_from(&self, other: &Self) -> Option<usize> {
        let distance = BigUint::from(*self - *other);
        if distance.bits() == 0 {
            None
        } else {
            Some(distance.bits() as usize - 1)
        }
    }

    /// 2^k, for k below the width.
    pub fn power_of_two(k: usize) -> Self {
        let mut bytes = [0u8; ID_BYTES];
        if k < ID_BITS {
            bytes[ID_BYTES - 1 - k / 8] = 1 << (k % 8);
        }
        Self(bytes)
    }

    /// Transform RingId to BiasId
    pub fn bias(&self, origin: Self) -> BiasId {
        BiasId::new(origin, *self)
    }

    fn modulus() -> BigUint {
        BigUint::from(1u8) << ID_BITS
    }
}

impl BiasId {
    /// Wrap an id with the given origin.
    pub fn new(bias: RingId, id: RingId) -> BiasId {
        BiasId {
            bias,
            pos: id - bias,
        }
    }

    /// Recover the wrapped id.
    pub fn to_id(self) -> RingId {
        self.pos + self.bias
    }

    /// Clockwise distance from the origin.
    pub fn pos(&self) -> RingId {
        self.pos
    }
}

impl PartialOrd for BiasId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BiasId {
    fn cmp(&self, other: &Self) -> Ordering {
        if other.bias != self.bias {
            let rebased = BiasId::new(self.bias, other.to_id());
            self.pos.cmp(&rebased.pos)
        } else {
            self.pos.cmp(&other.pos)
        }
    }
}

impl From<BiasId> for RingId {
    fn from(id: BiasId) -> RingId {
        id.to_id()
    }
}

impl std::fmt::Display for RingId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl std::fmt::Debug for RingId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "RingId({})", self.to_canonical_string())
    }
}

impl FromStr for RingId {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::from_canonical_str(s)
    }
}

impl Serialize for RingId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where S: Serializer {
        serializer.serialize_str(&self.to_canonical_string())
    }
}

impl<'de> Deserialize<'de> for RingId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where D: Deserializer<'de> {
        let s = String::deserialize(deserializer)?;
        Self::from_canonical_str(&s).map_err(de::Error::custom)
    }
}

impl From<[u8; ID_BYTES]> for RingId {
    fn from(bytes: [u8; ID_BYTES]) -> Self {
        Self(bytes)
    }
}

impl From<u32> for RingId {
    fn from(v: u32) -> RingId {
        Self::from(BigUint::from(v))
    }
}

impl From<RingId> for BigUint {
    fn from(id: RingId) -> BigUint {
        BigUint::from_bytes_be(&id.0)
    }
}

impl From<BigUint> for RingId {
    fn from(a: BigUint) -> Self {
        let reduced = (a % RingId::modulus()).to_bytes_be();
        let mut bytes = [0u8; ID_BYTES];
        bytes[ID_BYTES - reduced.len()..].copy_from_slice(&reduced);
        Self(bytes)
    }
}

// impl finite ring for RingId
impl Neg for RingId {
    type Output = Self;
    fn neg(self) -> Self {
        (RingId::modulus() - BigUint::from(self)).into()
    }
}

impl Add for RingId {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        (BigUint::from(self) + BigUint::from(rhs)).into()
    }
}

impl Sub for RingId {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self + (-rhs)
    }
}
