//! Probe payload encoding and echo decoding.
//!
//! The payload is self-describing in both directions: the responder only
//! echoes bytes, and the sender parses its own header back out of the
//! echo. Layout: 16-byte random tag, 8-byte send timestamp (milliseconds
//! since the Unix epoch, little-endian), 8-byte packet ID (little-endian),
//! then random padding up to the chosen size. There is no version byte and
//! no checksum; undersized datagrams are dropped, not answered.

use rand::{Rng, RngCore};
use thiserror::Error;
use uuid::Uuid;

/// Width of the per-packet correlation tag.
pub const TAG_LEN: usize = 16;

/// Fixed header length: tag, timestamp, packet ID.
pub const HEADER_LEN: usize = TAG_LEN + 8 + 8;

/// Smallest datagram the prober ever transmits. Configured sizes below
/// this are floor-clamped.
pub const MIN_PAYLOAD_LEN: usize = 32;

/// Errors that can occur while decoding an echoed datagram.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("datagram too short: {size} bytes")]
    Truncated { size: usize },
}

/// Header fields parsed back out of an echoed probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoHeader {
    pub tag: Uuid,
    pub sent_at_ms: u64,
    pub packet_id: u64,
}

/// Pick the transmit size for one probe: uniform in `[min, max)`, or
/// `min` when the range is empty, floor-clamped to [`MIN_PAYLOAD_LEN`].
pub fn payload_len(min: u32, max: u32, rng: &mut impl Rng) -> usize {
    let n = if max > min { rng.gen_range(min..max) } else { min };
    (n as usize).max(MIN_PAYLOAD_LEN)
}

/// Build one probe payload of exactly `total_len` bytes (at least
/// [`MIN_PAYLOAD_LEN`]), padded with non-semantic random bytes.
pub fn encode_probe(
    tag: Uuid,
    sent_at_ms: u64,
    packet_id: u64,
    total_len: usize,
    rng: &mut impl RngCore,
) -> Vec<u8> {
    let total_len = total_len.max(MIN_PAYLOAD_LEN);

    let mut buf = vec![0u8; total_len];
    buf[..TAG_LEN].copy_from_slice(tag.as_bytes());
    buf[TAG_LEN..TAG_LEN + 8].copy_from_slice(&sent_at_ms.to_le_bytes());
    buf[TAG_LEN + 8..HEADER_LEN].copy_from_slice(&packet_id.to_le_bytes());
    rng.fill_bytes(&mut buf[HEADER_LEN..]);

    buf
}

/// Parse the header back out of an echoed datagram.
pub fn decode_echo(data: &[u8]) -> Result<EchoHeader, DecodeError> {
    if data.len() < HEADER_LEN {
        return Err(DecodeError::Truncated { size: data.len() });
    }

    Ok(EchoHeader {
        tag: Uuid::from_bytes(read_fixed::<TAG_LEN>(data, 0)),
        sent_at_ms: u64::from_le_bytes(read_fixed::<8>(data, TAG_LEN)),
        packet_id: u64::from_le_bytes(read_fixed::<8>(data, TAG_LEN + 8)),
    })
}

#[inline(always)]
fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[offset..offset + N]);
    out
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn test_encode_then_decode_header() {
        let mut rng = StdRng::seed_from_u64(7);
        let tag = Uuid::new_v4();

        let payload = encode_probe(tag, 1_700_000_000_123, 42, 128, &mut rng);
        assert_eq!(payload.len(), 128);

        let header = decode_echo(&payload).expect("header should decode");
        assert_eq!(header.tag, tag);
        assert_eq!(header.sent_at_ms, 1_700_000_000_123);
        assert_eq!(header.packet_id, 42);
    }

    #[test]
    fn test_encode_clamps_to_minimum() {
        let mut rng = StdRng::seed_from_u64(7);
        let payload = encode_probe(Uuid::new_v4(), 0, 1, 10, &mut rng);
        assert_eq!(payload.len(), MIN_PAYLOAD_LEN);
    }

    #[test]
    fn test_decode_rejects_short_datagram() {
        let err = decode_echo(&[0u8; HEADER_LEN - 1]).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn test_decode_accepts_exact_header() {
        let mut rng = StdRng::seed_from_u64(7);
        let payload = encode_probe(Uuid::new_v4(), 5, 6, HEADER_LEN, &mut rng);
        assert!(decode_echo(&payload[..HEADER_LEN]).is_ok());
    }

    #[test]
    fn test_payload_len_floor_applies_below_minimum() {
        let mut rng = StdRng::seed_from_u64(7);
        // Configured below the wire minimum: actual size is clamped to 32.
        assert_eq!(payload_len(10, 10, &mut rng), MIN_PAYLOAD_LEN);
    }

    #[test]
    fn test_payload_len_degenerate_range() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(payload_len(64, 64, &mut rng), 64);
    }

    #[test]
    fn test_payload_len_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let n = payload_len(100, 200, &mut rng);
            assert!((100..200).contains(&n));
        }
    }
}
