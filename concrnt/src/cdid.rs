//! CDID - time-ordered 128-bit identifiers
//!
//! Layout: 10 random bytes followed by a 6-byte big-endian millisecond
//! timestamp. Rendered as 26 characters of unpadded lowercase base32
//! (alphabet `0123456789abcdefghjkmnpqrstvwxyz`). A typed id prefixes one
//! character: `t` timeline, `m` message, `a` association, `p` profile,
//! `s` subscription.

use chrono::{DateTime, TimeZone, Utc};
use rand::RngCore;

use crate::types::{ConcrntError, Result};

const ALPHABET: &[u8; 32] = b"0123456789abcdefghjkmnpqrstvwxyz";

/// Typed-id prefixes
pub const PREFIX_TIMELINE: char = 't';
pub const PREFIX_MESSAGE: char = 'm';
pub const PREFIX_ASSOCIATION: char = 'a';
pub const PREFIX_PROFILE: char = 'p';
pub const PREFIX_SUBSCRIPTION: char = 's';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cdid {
    data: [u8; 10],
    time: [u8; 6],
}

impl Cdid {
    /// New CDID from explicit entropy and timestamp.
    pub fn new(data: [u8; 10], at: DateTime<Utc>) -> Self {
        let mut c = Cdid { data, time: [0; 6] };
        c.set_time(at);
        c
    }

    /// New CDID with fresh entropy stamped now.
    pub fn generate() -> Self {
        let mut data = [0u8; 10];
        rand::thread_rng().fill_bytes(&mut data);
        Cdid::new(data, Utc::now())
    }

    fn set_time(&mut self, at: DateTime<Utc>) {
        let ms = at.timestamp_millis() as u64;
        self.time = [
            (ms >> 40) as u8,
            (ms >> 32) as u8,
            (ms >> 24) as u8,
            (ms >> 16) as u8,
            (ms >> 8) as u8,
            ms as u8,
        ];
    }

    pub fn get_time(&self) -> DateTime<Utc> {
        let ms = (self.time[0] as i64) << 40
            | (self.time[1] as i64) << 32
            | (self.time[2] as i64) << 24
            | (self.time[3] as i64) << 16
            | (self.time[4] as i64) << 8
            | self.time[5] as i64;
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    pub fn bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..10].copy_from_slice(&self.data);
        out[10..].copy_from_slice(&self.time);
        out
    }

    pub fn parse(s: &str) -> Result<Cdid> {
        let bytes =
            decode(s).ok_or_else(|| ConcrntError::InvalidInput(format!("bad cdid: {s}")))?;
        if bytes.len() != 16 {
            return Err(ConcrntError::InvalidInput(format!(
                "cdid must decode to 16 bytes: {s}"
            )));
        }
        let mut c = Cdid {
            data: [0; 10],
            time: [0; 6],
        };
        c.data.copy_from_slice(&bytes[..10]);
        c.time.copy_from_slice(&bytes[10..]);
        Ok(c)
    }
}

impl std::fmt::Display for Cdid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&encode(&self.bytes()))
    }
}

/// True iff `s` looks like a typed CDID: `<prefix>` plus 26 characters that
/// decode to 16 bytes.
pub fn is_seems_cdid(s: &str, prefix: char) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 27 || bytes[0] != prefix as u8 {
        return false;
    }
    decode(&s[1..]).map(|b| b.len() == 16).unwrap_or(false)
}

fn encode(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8).div_ceil(5));
    let mut acc: u32 = 0;
    let mut bits = 0u8;
    for &byte in data {
        acc = (acc << 8) | byte as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((acc >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(ALPHABET[((acc << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

fn decode(s: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    let mut acc: u32 = 0;
    let mut bits = 0u8;
    for ch in s.bytes() {
        let val = ALPHABET.iter().position(|&a| a == ch)? as u32;
        acc = (acc << 5) | val;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let c = Cdid::generate();
        let s = c.to_string();
        assert_eq!(s.len(), 26);
        let parsed = Cdid::parse(&s).unwrap();
        assert_eq!(parsed, c);
    }

    #[test]
    fn timestamp_within_a_millisecond() {
        let before = Utc::now();
        let c = Cdid::generate();
        let after = Utc::now();
        let t = c.get_time();
        assert!(t >= before - chrono::Duration::milliseconds(1));
        assert!(t <= after + chrono::Duration::milliseconds(1));
    }

    #[test]
    fn explicit_time_roundtrips_to_the_millisecond() {
        let at = Utc.timestamp_millis_opt(1_704_067_200_123).unwrap();
        let c = Cdid::new([7; 10], at);
        assert_eq!(c.get_time(), at);
        assert_eq!(Cdid::parse(&c.to_string()).unwrap().get_time(), at);
    }

    #[test]
    fn ids_from_later_instants_sort_later() {
        let t0 = Utc.timestamp_millis_opt(1_704_067_200_000).unwrap();
        let t1 = t0 + chrono::Duration::milliseconds(1);
        let a = Cdid::new([0xff; 10], t0);
        let b = Cdid::new([0x00; 10], t1);
        assert!(a.get_time() < b.get_time());
    }

    #[test]
    fn seems_cdid_accepts_typed_ids() {
        let id = format!("t{}", Cdid::generate());
        assert!(is_seems_cdid(&id, 't'));
        assert!(!is_seems_cdid(&id, 'm'));
    }

    #[test]
    fn seems_cdid_rejects_wrong_shapes() {
        assert!(!is_seems_cdid("t0123", 't'));
        assert!(!is_seems_cdid("", 't'));
        // right length, invalid alphabet (uppercase)
        let bad = format!("t{}", "A".repeat(26));
        assert!(!is_seems_cdid(&bad, 't'));
    }

    #[test]
    fn parse_rejects_short_decodings() {
        assert!(Cdid::parse("00000000").is_err());
    }
}
