//! Monotonic ULID generation for event-log primary keys (spec.md §4.4).
//!
//! A ULID packs a 48-bit millisecond timestamp and 80 bits of randomness
//! into 128 bits, textually rendered as 26 Crockford base-32 characters.
//! Within the same millisecond, the random component is incremented
//! (rather than re-rolled) so IDs generated back-to-back by a single
//! writer still sort in generation order — the "monotonic ULID" variant.
//!
//! Unlike the hex/z32 encodings elsewhere in this workspace (see
//! [`skygent_core::FilterSignature`]), a ULID's 128 bits don't split into
//! whole 5-bit groups, so `data_encoding::Specification` (byte-aligned by
//! design) doesn't fit; encoding is done by hand here instead, one 5-bit
//! group at a time.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng as _;

const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const RANDOM_BITS: u32 = 80;
const RANDOM_MASK: u128 = (1u128 << RANDOM_BITS) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ulid([u8; 16]);

impl Ulid {
    fn from_parts(millis: u64, random: u128) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..6].copy_from_slice(&millis.to_be_bytes()[2..8]);
        bytes[6..16].copy_from_slice(&random.to_be_bytes()[6..16]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn timestamp_millis(&self) -> u64 {
        let mut buf = [0u8; 8];
        buf[2..8].copy_from_slice(&self.0[0..6]);
        u64::from_be_bytes(buf)
    }
}

impl fmt::Display for Ulid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = u128::from_be_bytes(self.0);
        let mut out = [0u8; 26];
        let mut v = value;
        for slot in out.iter_mut().rev() {
            *slot = CROCKFORD[(v & 0x1F) as usize];
            v >>= 5;
        }
        f.write_str(std::str::from_utf8(&out).expect("Crockford alphabet is ASCII"))
    }
}

/// Generates strictly increasing [`Ulid`]s for a single writer.
///
/// Not `Sync` by construction — callers hold it behind the same
/// single-writer discipline as the rest of the event log (spec.md §4.4,
/// I1).
#[derive(Debug, Default)]
pub struct UlidGenerator {
    last_millis: u64,
    last_random: u128,
}

impl UlidGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate_now(&mut self) -> Ulid {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before 1970")
            .as_millis() as u64;
        self.generate_at(now)
    }

    /// Generates a ULID for `now_millis`, guaranteeing strict monotonicity
    /// relative to every prior call on this generator even if `now_millis`
    /// goes backwards (clock skew) or repeats.
    pub fn generate_at(&mut self, now_millis: u64) -> Ulid {
        if now_millis > self.last_millis {
            self.last_millis = now_millis;
            self.last_random = random_80();
        } else {
            let next = self.last_random.wrapping_add(1) & RANDOM_MASK;
            if next == 0 {
                // 80-bit randomness space exhausted within one millisecond.
                // Vanishingly unlikely; bump the clock forward to keep the
                // strictly-increasing invariant rather than wrapping.
                self.last_millis += 1;
                self.last_random = random_80();
            } else {
                self.last_random = next;
            }
        }
        Ulid::from_parts(self.last_millis, self.last_random)
    }
}

fn random_80() -> u128 {
    rand::rng().random::<u128>() & RANDOM_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_to_26_crockford_characters() {
        let mut gen = UlidGenerator::new();
        let ulid = gen.generate_at(1_700_000_000_000);
        let text = ulid.to_string();
        assert_eq!(text.len(), 26);
        assert!(text.chars().all(|c| CROCKFORD.contains(&(c as u8))));
    }

    #[test]
    fn same_millisecond_increments_monotonically() {
        let mut gen = UlidGenerator::new();
        let a = gen.generate_at(1_000);
        let b = gen.generate_at(1_000);
        let c = gen.generate_at(1_000);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn later_millisecond_always_sorts_after() {
        let mut gen = UlidGenerator::new();
        let a = gen.generate_at(1_000);
        let b = gen.generate_at(999); // clock skew backwards
        assert!(b > a);
        assert_eq!(b.timestamp_millis(), 1_001);
    }

    #[test]
    fn timestamp_round_trips() {
        let mut gen = UlidGenerator::new();
        let ulid = gen.generate_at(1_700_000_000_123);
        assert_eq!(ulid.timestamp_millis(), 1_700_000_000_123);
    }
}
