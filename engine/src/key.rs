//! Ordered unique id generation.
//!
//! Every id handed out by a [`KeyGenerator`] must compare strictly greater
//! (lexicographically) than the ones before it, so records created with the
//! default priority append to the end of the collection.

use crate::{RecordId, Timestamp};

/// Source of strictly increasing, globally unique record ids.
pub trait KeyGenerator: Send {
    /// Produce the next id.
    fn next_id(&mut self) -> RecordId;
}

/// Deterministic generator: `prefix` followed by a zero-padded counter.
#[derive(Debug, Clone)]
pub struct SequentialKeys {
    prefix: String,
    next: u64,
}

impl SequentialKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 1,
        }
    }
}

impl KeyGenerator for SequentialKeys {
    fn next_id(&mut self) -> RecordId {
        let id = format!("{}{:020}", self.prefix, self.next);
        self.next += 1;
        id
    }
}

/// Alphabet in ASCII order, so character order matches value order.
pub const PUSH_CHARS: &[u8; 64] =
    b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Number of characters encoding the timestamp.
pub const TIMESTAMP_LEN: usize = 8;

/// Number of random characters following the timestamp.
pub const RANDOM_LEN: usize = 12;

/// Encodes push-style ids: a millisecond timestamp followed by random
/// characters.
///
/// The encoder keeps the last issued id's state. When asked for an id at a
/// timestamp that is not newer than the previous one, it reuses the previous
/// timestamp and increments the random suffix instead, so ids stay strictly
/// increasing even when the wall clock stalls or steps backwards.
///
/// Time and entropy are passed in by the caller; the encoder itself is pure.
#[derive(Debug, Clone, Default)]
pub struct PushIdEncoder {
    last_timestamp: Timestamp,
    last_random: [u8; RANDOM_LEN],
    issued: bool,
}

impl PushIdEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode the next id for `timestamp` (milliseconds since epoch).
    ///
    /// `entropy` bytes are reduced modulo 64; they are only consumed when the
    /// timestamp advances.
    pub fn encode(&mut self, timestamp: Timestamp, entropy: [u8; RANDOM_LEN]) -> RecordId {
        let mut timestamp = timestamp;

        if self.issued && timestamp <= self.last_timestamp {
            timestamp = self.last_timestamp;
            if !increment(&mut self.last_random) {
                // Suffix space exhausted for this millisecond
                timestamp += 1;
                self.last_random = reduce(entropy);
            }
        } else {
            self.last_random = reduce(entropy);
        }

        self.last_timestamp = timestamp;
        self.issued = true;

        let mut out = String::with_capacity(TIMESTAMP_LEN + RANDOM_LEN);
        let mut stamp = [0u8; TIMESTAMP_LEN];
        let mut rest = timestamp;
        for slot in stamp.iter_mut().rev() {
            *slot = PUSH_CHARS[(rest % 64) as usize];
            rest /= 64;
        }
        out.extend(stamp.iter().map(|&c| c as char));
        out.extend(
            self.last_random
                .iter()
                .map(|&v| PUSH_CHARS[v as usize] as char),
        );
        out
    }
}

fn reduce(entropy: [u8; RANDOM_LEN]) -> [u8; RANDOM_LEN] {
    entropy.map(|b| b % 64)
}

/// Add one to a base-64 digit string. Returns false on overflow.
fn increment(digits: &mut [u8; RANDOM_LEN]) -> bool {
    for digit in digits.iter_mut().rev() {
        if *digit < 63 {
            *digit += 1;
            return true;
        }
        *digit = 0;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_keys_are_ordered() {
        let mut keys = SequentialKeys::new("item-");
        let a = keys.next_id();
        let b = keys.next_id();
        assert_eq!(a, "item-00000000000000000001");
        assert!(a < b);

        // Padding keeps lexicographic order past a digit boundary
        let mut keys = SequentialKeys::new("k");
        let ids: Vec<_> = (0..12).map(|_| keys.next_id()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn push_ids_have_fixed_length() {
        let mut encoder = PushIdEncoder::new();
        let id = encoder.encode(1_706_745_600_000, [7; RANDOM_LEN]);
        assert_eq!(id.len(), TIMESTAMP_LEN + RANDOM_LEN);
    }

    #[test]
    fn push_ids_increase_with_time() {
        let mut encoder = PushIdEncoder::new();
        let a = encoder.encode(1000, [63; RANDOM_LEN]);
        let b = encoder.encode(1001, [0; RANDOM_LEN]);
        assert!(a < b);
    }

    #[test]
    fn push_ids_increase_within_same_millisecond() {
        let mut encoder = PushIdEncoder::new();
        let a = encoder.encode(1000, [5; RANDOM_LEN]);
        let b = encoder.encode(1000, [0; RANDOM_LEN]);
        let c = encoder.encode(1000, [0; RANDOM_LEN]);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a[..TIMESTAMP_LEN], b[..TIMESTAMP_LEN]);
    }

    #[test]
    fn push_ids_survive_clock_going_backwards() {
        let mut encoder = PushIdEncoder::new();
        let a = encoder.encode(5000, [1; RANDOM_LEN]);
        let b = encoder.encode(4000, [1; RANDOM_LEN]);
        assert!(a < b);
    }

    #[test]
    fn push_ids_roll_timestamp_on_suffix_overflow() {
        let mut encoder = PushIdEncoder::new();
        let a = encoder.encode(1000, [63; RANDOM_LEN]);
        let b = encoder.encode(1000, [0; RANDOM_LEN]);
        assert!(a < b);
        assert_ne!(a[..TIMESTAMP_LEN], b[..TIMESTAMP_LEN]);
    }

    #[test]
    fn alphabet_is_ascii_sorted() {
        assert!(PUSH_CHARS.windows(2).all(|w| w[0] < w[1]));
    }
}
