//! 20-character lexicographically-ordered push ids, modeled after
//! Firebase's push-id scheme: an 8-character big-endian base-64 encoding
//! of the millisecond timestamp, followed by a 12-character counter of
//! 72 bits of randomness that increments (rather than reseeds) on
//! same-millisecond collisions so ordering is preserved.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

/// Ordered by ASCII, so lexicographic string order agrees with generation
/// order: digits, then uppercase, then underscore, then lowercase.
const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

struct State {
    last_ms: i64,
    last_rand: [u8; 12],
}

/// Process-wide push-id generator. Safe to share behind an `Arc` and call
/// concurrently; state is serialized under a mutex.
pub struct PushIdGenerator {
    state: Mutex<State>,
}

impl Default for PushIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl PushIdGenerator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                last_ms: 0,
                last_rand: [0; 12],
            }),
        }
    }

    /// Generates the next push id, 20 characters over `PUSH_CHARS`.
    pub fn next(&self) -> String {
        let mut state = self.state.lock().expect("push id mutex poisoned");
        let mut now = current_time_ms();

        if now == state.last_ms {
            if increment(&mut state.last_rand) {
                // All 12 random digits were already 63: spin-wait for the
                // clock to advance, then treat it like a fresh millisecond.
                loop {
                    now = current_time_ms();
                    if now != state.last_ms {
                        break;
                    }
                    std::hint::spin_loop();
                }
                state.last_ms = now;
                reseed(&mut state.last_rand);
            }
        } else {
            state.last_ms = now;
            reseed(&mut state.last_rand);
        }

        encode(now, &state.last_rand)
    }
}

/// Increments the 12-digit base-64 counter in place. Returns `true` if
/// every digit was already 63 (the counter wrapped to all zeros).
fn increment(digits: &mut [u8; 12]) -> bool {
    for i in (0..12).rev() {
        if digits[i] == 63 {
            digits[i] = 0;
        } else {
            digits[i] += 1;
            return false;
        }
    }
    true
}

fn reseed(digits: &mut [u8; 12]) {
    let mut rng = rand::thread_rng();
    for digit in digits.iter_mut() {
        *digit = rng.gen_range(0..64);
    }
}

fn current_time_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

fn encode(mut now: i64, rand_digits: &[u8; 12]) -> String {
    let mut timestamp_chars = [0u8; 8];
    for i in (0..8).rev() {
        timestamp_chars[i] = PUSH_CHARS[(now % 64) as usize];
        now /= 64;
    }
    assert_eq!(now, 0, "push id timestamp did not fit in 48 bits");

    let mut id = String::with_capacity(20);
    for &c in &timestamp_chars {
        id.push(c as char);
    }
    for &digit in rand_digits {
        id.push(PUSH_CHARS[digit as usize] as char);
    }
    assert_eq!(id.len(), 20, "push id must be exactly 20 characters");
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_twenty_char_ids_over_the_push_alphabet() {
        let gen = PushIdGenerator::new();
        let id = gen.next();
        assert_eq!(id.len(), 20);
        assert!(
            id.bytes()
                .all(|b| PUSH_CHARS.contains(&b))
        );
    }

    #[test]
    fn same_millisecond_ids_increment_and_stay_ordered() {
        let gen = PushIdGenerator::new();
        let ids: Vec<String> = (0..50).map(|_| gen.next()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted, "ids generated in order must already be sorted");
    }

    #[test]
    fn increment_carries_across_digits() {
        let mut digits = [0u8; 12];
        digits[11] = 63;
        digits[10] = 63;
        let overflowed = increment(&mut digits);
        assert!(!overflowed);
        assert_eq!(digits[9], 1);
        assert_eq!(digits[10], 0);
        assert_eq!(digits[11], 0);
    }

    #[test]
    fn increment_reports_overflow_when_all_63() {
        let mut digits = [63u8; 12];
        let overflowed = increment(&mut digits);
        assert!(overflowed);
        assert_eq!(digits, [0u8; 12]);
    }
}
