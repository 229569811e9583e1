//! Ring identifiers.
//!
//! Every peer and every stored value lives at a point on a circular
//! identifier space of 16^32 keys. A [`Key`] is an unsigned integer reduced
//! modulo that ring size, constructed either by hashing a plaintext (a peer
//! endpoint or a user key) or by parsing a hex string off the wire.
//!
//! Hashing is the RFC 4122 name-based SHA-1 scheme under the DNS namespace,
//! so a given plaintext maps to the same 32-hex-digit identifier on every
//! peer. Arithmetic wraps silently around the ring; the only nontrivial
//! ordering primitive is [`Key::in_between`], the clockwise-between
//! predicate that every routing and placement decision is built on.

use std::fmt;
use std::ops::{Add, Sub};

use num_bigint::BigUint;
use num_traits::{One, Zero};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Identifiers render as at most this many hex digits: the ring holds
/// 16^32 keys.
pub const KEY_HEX_DIGITS: u32 = 32;

/// RFC 4122 DNS namespace, the fixed namespace for name-based hashing.
const DNS_NAMESPACE: [u8; 16] = [
    0x6b, 0xa7, 0xb8, 0x10, 0x9d, 0xad, 0x11, 0xd1, 0x80, 0xb4, 0x00, 0xc0,
    0x4f, 0xd4, 0x30, 0xc8,
];

/// Number of keys in the ring: 16^32.
pub(crate) fn ring_size() -> BigUint {
    BigUint::one() << (4 * KEY_HEX_DIGITS)
}

/// A point on the identifier ring, always reduced modulo [`ring_size`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Key {
    value: BigUint,
}

impl Key {
    /// Hash a plaintext into the ring.
    ///
    /// This is the version-5 (SHA-1) name-based UUID of the plaintext under
    /// the DNS namespace, reinterpreted as a big-endian integer.
    pub fn from_plaintext(plaintext: &str) -> Key {
        let mut hasher = Sha1::new();
        hasher.update(DNS_NAMESPACE);
        hasher.update(plaintext.as_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        // Version and variant bits per RFC 4122 §4.3.
        bytes[6] = (bytes[6] & 0x0f) | 0x50;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;

        Key {
            value: BigUint::from_bytes_be(&bytes) % ring_size(),
        }
    }

    /// Parse a lowercase hex rendering. Values beyond the ring wrap.
    pub fn from_hex(hex: &str) -> Option<Key> {
        let value = BigUint::parse_bytes(hex.as_bytes(), 16)?;
        Some(Key {
            value: value % ring_size(),
        })
    }

    /// Lowercase hex rendering with no leading zeros.
    pub fn to_hex(&self) -> String {
        self.value.to_str_radix(16)
    }

    /// Length of the hex rendering.
    pub fn hex_len(&self) -> usize {
        self.to_hex().len()
    }

    /// The zero key.
    pub fn zero() -> Key {
        Key {
            value: BigUint::zero(),
        }
    }

    /// Is this key on the clockwise arc from `lower` to `upper`?
    ///
    /// When the bounds are equal the arc is the single point at the bound.
    /// When `lower < upper` this is the ordinary interval; when
    /// `lower > upper` the arc wraps through zero and is the complement of
    /// the reversed interval. The `inclusive` flag controls whether the
    /// endpoints themselves are members.
    pub fn in_between(&self, lower: &Key, upper: &Key, inclusive: bool) -> bool {
        if lower == upper {
            return self == upper;
        }

        if lower < upper {
            if inclusive {
                lower <= self && self <= upper
            } else {
                lower < self && self < upper
            }
        } else {
            // Wraps through zero: in [b, a] implies not in [a, b].
            if inclusive {
                !(upper < self && self < lower)
            } else {
                !(upper <= self && self <= lower)
            }
        }
    }

    /// Add an arbitrary offset, wrapping around the ring.
    pub(crate) fn offset_by(&self, delta: &BigUint) -> Key {
        Key {
            value: (&self.value + delta) % ring_size(),
        }
    }

    /// floor(log2(self XOR other)), or `None` when the keys are equal.
    ///
    /// `None` orders below every `Some`, which is exactly the behavior the
    /// Merkle descent needs for a zero distance.
    pub(crate) fn distance(&self, other: &Key) -> Option<u64> {
        let xor = &self.value ^ &other.value;
        if xor.is_zero() {
            None
        } else {
            Some(xor.bits() - 1)
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<u32> for Key {
    fn from(value: u32) -> Key {
        Key {
            value: BigUint::from(value),
        }
    }
}

impl Add<u32> for &Key {
    type Output = Key;

    fn add(self, rhs: u32) -> Key {
        self.offset_by(&BigUint::from(rhs))
    }
}

impl Sub<u32> for &Key {
    type Output = Key;

    fn sub(self, rhs: u32) -> Key {
        let ring = ring_size();
        Key {
            value: (&self.value + &ring - BigUint::from(rhs) % &ring) % &ring,
        }
    }
}

impl Add<&Key> for &Key {
    type Output = Key;

    fn add(self, rhs: &Key) -> Key {
        self.offset_by(&rhs.value)
    }
}

impl Sub<&Key> for &Key {
    type Output = Key;

    fn sub(self, rhs: &Key) -> Key {
        let ring = ring_size();
        Key {
            value: (&self.value + &ring - &rhs.value) % &ring,
        }
    }
}

impl Serialize for Key {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D>(deserializer: D) -> Result<Key, D::Error>
    where
        D: Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        Key::from_hex(&hex)
            .ok_or_else(|| de::Error::custom(format!("invalid hex key: {hex:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_between_exclusive_without_wrap() {
        let inside = Key::from(75);
        let boundary = Key::from(99);
        assert!(inside.in_between(&Key::from(0), &Key::from(99), false));
        assert!(!boundary.in_between(&Key::from(0), &Key::from(99), false));
    }

    #[test]
    fn in_between_exclusive_with_wrap() {
        let inside = Key::from(1);
        let boundary = Key::from(25);
        assert!(inside.in_between(&Key::from(75), &Key::from(25), false));
        assert!(!boundary.in_between(&Key::from(75), &Key::from(25), false));
    }

    #[test]
    fn in_between_inclusive_without_wrap() {
        let inside = Key::from(75);
        let boundary = Key::from(99);
        assert!(inside.in_between(&Key::from(0), &Key::from(99), true));
        assert!(boundary.in_between(&Key::from(0), &Key::from(99), true));
    }

    #[test]
    fn in_between_inclusive_with_wrap() {
        let inside = Key::from(1);
        let boundary = Key::from(25);
        assert!(inside.in_between(&Key::from(75), &Key::from(25), true));
        assert!(boundary.in_between(&Key::from(75), &Key::from(25), true));
    }

    #[test]
    fn in_between_equal_bounds_is_single_point() {
        let bound = Key::from(42);
        assert!(bound.in_between(&bound, &bound, true));
        assert!(!Key::from(43).in_between(&bound, &bound, true));
        assert!(!Key::from(41).in_between(&bound, &bound, false));
    }

    #[test]
    fn in_between_differing_hex_lengths() {
        // Regression: keys of differing rendered lengths must still compare
        // within the fixed 16^32 keyspace.
        let key = Key::from_hex("f4ee136cb4059b2883450e7e93698be").unwrap();
        let lower = Key::from_hex("633bd46b5c515992a5ce553d0680bec9").unwrap();
        let upper = Key::from_hex("f4ee136cb4059b2883450e7e93698bd").unwrap();
        assert!(!key.in_between(&lower, &upper, true));
    }

    #[test]
    fn exactly_one_direction_holds() {
        let a = Key::from(100);
        let b = Key::from(2000);
        for k in [0u32, 50, 100, 150, 1999, 2000, 3000].map(Key::from) {
            if k == a || k == b {
                continue;
            }
            let forward = k.in_between(&a, &b, false);
            let backward = k.in_between(&b, &a, false);
            assert!(forward != backward, "key {k} must be on exactly one arc");
        }
    }

    #[test]
    fn hashing_is_deterministic_and_bounded() {
        let first = Key::from_plaintext("127.0.0.1:5055");
        let second = Key::from_plaintext("127.0.0.1:5055");
        assert_eq!(first, second);
        assert!(first.hex_len() <= KEY_HEX_DIGITS as usize);
        assert_ne!(first, Key::from_plaintext("127.0.0.1:5056"));
    }

    #[test]
    fn hex_round_trip() {
        let key = Key::from_plaintext("round-trip");
        assert_eq!(Key::from_hex(&key.to_hex()), Some(key.clone()));
        assert_eq!(Key::from_hex("0"), Some(Key::zero()));
        assert_eq!(Key::from_hex("not hex"), None);
    }

    #[test]
    fn arithmetic_wraps_around_the_ring() {
        let last = &Key::zero() - 1;
        assert_eq!(last.hex_len(), 32);
        assert_eq!(&last + 1, Key::zero());
        assert_eq!(&Key::from(7) - &Key::from(9), &Key::zero() - 2);
    }

    #[test]
    fn distance_is_log2_of_xor() {
        assert_eq!(Key::from(8).distance(&Key::from(9)), Some(0));
        assert_eq!(Key::from(1).distance(&Key::from(255)), Some(7));
        assert_eq!(Key::from(5).distance(&Key::from(5)), None);
        assert!(Key::from(5).distance(&Key::from(5)) < Key::from(4).distance(&Key::from(5)));
    }
}
