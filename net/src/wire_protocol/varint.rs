//! Bitcoin's compact variable-length unsigned integer encoding.

use crate::error::{PeerError, PeerResult};

/// Encodes `n` using the shortest representation the wire format allows.
pub fn encode(n: u64) -> Vec<u8> {
    if n < 0xFD {
        vec![n as u8]
    } else if n <= 0xFFFF {
        let mut out = vec![0xFD];
        out.extend_from_slice(&(n as u16).to_le_bytes());
        out
    } else if n <= 0xFFFF_FFFF {
        let mut out = vec![0xFE];
        out.extend_from_slice(&(n as u32).to_le_bytes());
        out
    } else {
        let mut out = vec![0xFF];
        out.extend_from_slice(&n.to_le_bytes());
        out
    }
}

/// Decodes a varint from the front of `buf`, returning the value and the
/// number of bytes consumed. Fails with [`PeerError::Truncated`] if `buf` is
/// shorter than the width implied by the prefix byte.
pub fn decode(buf: &[u8]) -> PeerResult<(u64, usize)> {
    let prefix = *buf.first().ok_or(PeerError::Truncated)?;
    match prefix {
        0xFD => {
            let bytes = buf.get(1..3).ok_or(PeerError::Truncated)?;
            Ok((u16::from_le_bytes(bytes.try_into().unwrap()) as u64, 3))
        }
        0xFE => {
            let bytes = buf.get(1..5).ok_or(PeerError::Truncated)?;
            Ok((u32::from_le_bytes(bytes.try_into().unwrap()) as u64, 5))
        }
        0xFF => {
            let bytes = buf.get(1..9).ok_or(PeerError::Truncated)?;
            Ok((u64::from_le_bytes(bytes.try_into().unwrap()), 9))
        }
        n => Ok((n as u64, 1)),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0xFC, vec![0xFC])]
    #[case(0xFD, vec![0xFD, 0xFD, 0x00])]
    #[case(0x10000, vec![0xFE, 0x00, 0x00, 0x01, 0x00])]
    fn boundary_values(#[case] n: u64, #[case] expected: Vec<u8>) {
        assert_eq!(encode(n), expected);
    }

    #[test]
    fn round_trip() {
        for n in [0u64, 1, 0xFC, 0xFD, 0xFFFF, 0x10000, 0xFFFF_FFFF, 0x1_0000_0000, u64::MAX] {
            let encoded = encode(n);
            let (decoded, consumed) = decode(&encoded).unwrap();
            assert_eq!(decoded, n);
            assert_eq!(consumed, encoded.len());
        }
    }

    #[test]
    fn decode_is_shortest() {
        // encode(n) never produces a wider prefix than necessary.
        assert_eq!(encode(252).len(), 1);
        assert_eq!(encode(253).len(), 3);
        assert_eq!(encode(65535).len(), 3);
        assert_eq!(encode(65536).len(), 5);
    }

    #[test]
    fn truncated_buffer() {
        assert!(matches!(decode(&[]), Err(PeerError::Truncated)));
        assert!(matches!(decode(&[0xFD, 0x01]), Err(PeerError::Truncated)));
        assert!(matches!(decode(&[0xFF, 0, 0, 0, 0, 0, 0, 0]), Err(PeerError::Truncated)));
    }
}
