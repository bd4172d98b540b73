//! sha256d (double SHA-256) and the hex<->wire-order conversions hashes need.

use sha2::{Digest, Sha256};
use sha2::digest::FixedOutput;

use crate::error::{PeerError, PeerResult};

pub fn sha256d(input: &[u8]) -> [u8; 32] {
    let first = {
        let mut hasher = Sha256::default();
        hasher.update(input);
        hasher.finalize_fixed()
    };
    let mut hasher = Sha256::default();
    hasher.update(first);
    hasher.finalize_fixed().into()
}

/// Parses a human-readable (big-endian) hash hex string into its on-wire
/// (little-endian) byte order.
pub fn hash_from_hex(hex_str: &str) -> PeerResult<[u8; 32]> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| PeerError::Malformed(format!("invalid hash hex '{}': {}", hex_str, e)))?;
    let mut array: [u8; 32] = bytes.as_slice().try_into()
        .map_err(|_| PeerError::Malformed(format!("hash '{}' is not 32 bytes", hex_str)))?;
    array.reverse();
    Ok(array)
}

/// Renders 32 on-wire (little-endian) hash bytes as the conventional
/// big-endian hex string.
pub fn hash_to_hex(wire_bytes: &[u8; 32]) -> String {
    let mut reversed = *wire_bytes;
    reversed.reverse();
    hex::encode(reversed)
}

#[cfg(test)]
mod test {
    use super::sha256d;

    #[test]
    fn known_empty_checksum() {
        // sha256d("") == the checksum embedded in a canonical empty-payload verack frame.
        let digest = sha256d(&[]);
        assert_eq!(&digest[..4], &[0x5D, 0xF6, 0xE0, 0xE2]);
    }

    #[test]
    fn hash_hex_round_trip() {
        use super::{hash_from_hex, hash_to_hex};
        let hex_str = "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26";
        let wire = hash_from_hex(hex_str).unwrap();
        assert_eq!(hash_to_hex(&wire), hex_str);
    }
}
