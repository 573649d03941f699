//! Identifier generation: UUID v4, monotonic ULID, short hex, and
//! alphanumeric ids.
//!
//! All entropy comes from the operating system RNG. ULIDs are encoded here
//! rather than through a third-party crate because mockd's monotonicity
//! scheme folds a 16-bit counter into the random suffix on same-millisecond
//! collisions.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Crockford base32 alphabet: excludes I, L, O, U.
const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

const ALPHANUMERIC: &[u8; 62] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a canonical lowercase UUID v4 string.
pub fn new_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a 16-character lowercase hex id from 8 random bytes.
pub fn new_short_id() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    let mut out = String::with_capacity(16);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Generate `n` characters drawn uniformly from `[a-zA-Z0-9]`.
///
/// Returns an empty string when `n < 1`.
pub fn new_alphanumeric(n: i64) -> String {
    if n < 1 {
        return String::new();
    }
    let mut out = String::with_capacity(n as usize);
    for _ in 0..n {
        let idx = OsRng.gen_range(0..ALPHANUMERIC.len());
        out.push(ALPHANUMERIC[idx] as char);
    }
    out
}

struct UlidState {
    last_ms: u64,
    counter: u16,
    random: [u8; 10],
}

static ULID_STATE: Lazy<Mutex<UlidState>> = Lazy::new(|| {
    Mutex::new(UlidState {
        last_ms: 0,
        counter: 0,
        random: [0u8; 10],
    })
});

/// Generate a 26-character Crockford base32 ULID.
///
/// Within a single process, ULIDs generated in the same millisecond reuse
/// that millisecond's random suffix with an incrementing 16-bit counter
/// XORed into its first two bytes, so same-millisecond ids never collide.
/// If the counter wraps, generation spins until the clock advances.
pub fn new_ulid() -> String {
    let mut now = unix_millis();
    let mut state = ULID_STATE.lock();

    if now == state.last_ms {
        if state.counter == u16::MAX {
            while now <= state.last_ms {
                std::hint::spin_loop();
                now = unix_millis();
            }
            state.last_ms = now;
            state.counter = 0;
            OsRng.fill_bytes(&mut state.random);
        } else {
            state.counter += 1;
            now = state.last_ms;
        }
    } else {
        state.last_ms = now;
        state.counter = 0;
        OsRng.fill_bytes(&mut state.random);
    }

    let mut random = state.random;
    random[0] ^= (state.counter >> 8) as u8;
    random[1] ^= (state.counter & 0xff) as u8;
    encode_ulid(now, &random)
}

/// Encode a 48-bit millisecond timestamp and 80-bit random suffix as a
/// 26-character ULID. Base32 of a fixed-width big-endian value, so output
/// sorts in input order.
pub fn encode_ulid(ms: u64, random: &[u8; 10]) -> String {
    let mut bytes = [0u8; 16];
    bytes[0] = (ms >> 40) as u8;
    bytes[1] = (ms >> 32) as u8;
    bytes[2] = (ms >> 24) as u8;
    bytes[3] = (ms >> 16) as u8;
    bytes[4] = (ms >> 8) as u8;
    bytes[5] = ms as u8;
    bytes[6..16].copy_from_slice(random);

    // 128 bits -> 26 base32 chars, reading 5 bits at a time from the top.
    // The leading character only carries 3 significant bits.
    let mut out = [0u8; 26];
    let mut pos = 0;

    // Prime with 3 bits so the remaining 125 bits split evenly into 25 chars.
    out[pos] = CROCKFORD[(bytes[0] >> 5) as usize];
    pos += 1;
    let mut acc: u32 = (bytes[0] & 0x1f) as u32;
    let mut acc_bits: u32 = 5;

    for &b in &bytes[1..] {
        acc = (acc << 8) | b as u32;
        acc_bits += 8;
        while acc_bits >= 5 {
            acc_bits -= 5;
            out[pos] = CROCKFORD[((acc >> acc_bits) & 0x1f) as usize];
            pos += 1;
        }
    }
    debug_assert_eq!(pos, 26);
    debug_assert_eq!(acc_bits, 0);

    // Safety: CROCKFORD is pure ASCII.
    String::from_utf8(out.to_vec()).unwrap_or_default()
}

/// Check whether a string is a well-formed ULID: 26 characters of the
/// Crockford alphabet (I, L, O, U rejected; lowercase accepted).
pub fn is_valid_ulid(s: &str) -> bool {
    if s.len() != 26 {
        return false;
    }
    s.bytes()
        .all(|b| CROCKFORD.contains(&b.to_ascii_uppercase()))
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_uuid_shape() {
        let re = regex::Regex::new(
            r"^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$",
        )
        .unwrap();
        for _ in 0..50 {
            let id = new_uuid();
            assert!(re.is_match(&id), "not a v4 uuid: {id}");
        }
    }

    #[test]
    fn test_short_id_shape() {
        for _ in 0..20 {
            let id = new_short_id();
            assert_eq!(id.len(), 16);
            assert!(id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
        }
    }

    #[test]
    fn test_alphanumeric_length_and_charset() {
        assert_eq!(new_alphanumeric(0), "");
        assert_eq!(new_alphanumeric(-5), "");
        let id = new_alphanumeric(64);
        assert_eq!(id.len(), 64);
        assert!(id.bytes().all(|b| b.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_ulid_valid_and_unique() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id = new_ulid();
            assert!(is_valid_ulid(&id), "invalid ulid: {id}");
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn test_ulid_ordering_across_millis() {
        let a = new_ulid();
        std::thread::sleep(std::time::Duration::from_millis(3));
        let b = new_ulid();
        assert!(a < b, "{a} should sort before {b}");
    }

    #[test]
    fn test_encode_ulid_monotonic_at_fixed_ms() {
        // At a fixed millisecond, increasing random suffixes must sort in
        // generation order.
        let ms = 1_700_000_000_000;
        let mut prev = encode_ulid(ms, &[0u8; 10]);
        for i in 1u8..=100 {
            let mut random = [0u8; 10];
            random[9] = i;
            let next = encode_ulid(ms, &random);
            assert!(prev < next);
            prev = next;
        }
    }

    #[test]
    fn test_encode_ulid_timestamp_prefix() {
        // Same timestamp => same 10-char prefix regardless of randomness.
        let ms = 1_234_567_890_123;
        let a = encode_ulid(ms, &[0u8; 10]);
        let b = encode_ulid(ms, &[0xffu8; 10]);
        assert_eq!(a[..10], b[..10]);
    }

    #[test]
    fn test_is_valid_ulid_rejects_excluded_letters() {
        for c in ['I', 'L', 'O', 'U', 'i', 'l', 'o', 'u'] {
            let mut s = "0123456789ABCDEFGHJKMNPQRS".to_string();
            s.replace_range(0..1, &c.to_string());
            assert!(!is_valid_ulid(&s), "should reject {c}");
        }
        assert!(is_valid_ulid("01ARZ3NDEKTSV4RRFFQ69G5FAV"));
        assert!(!is_valid_ulid("01ARZ3NDEKTSV4RRFFQ69G5FA"));
        assert!(!is_valid_ulid("01ARZ3NDEKTSV4RRFFQ69G5FAVX"));
    }

    #[test]
    fn test_same_ms_ulids_do_not_collide() {
        // Hammer generation fast enough that many calls land in one
        // millisecond; the counter path must keep them unique.
        let ids: Vec<String> = (0..5000).map(|_| new_ulid()).collect();
        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }
}
