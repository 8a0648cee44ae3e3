use k256::elliptic_curve::sec1::ToEncodedPoint;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::error::KeyError;

/// Fingerprint recorded when a key's master fingerprint is unknown.
pub const UNKNOWN_FINGERPRINT: [u8; 4] = [0; 4];

/// Normalize a SEC1 public key to its 33-byte compressed form.
///
/// Accepts both compressed (33 byte, `02`/`03` prefix) and uncompressed
/// (65 byte, `04` prefix) encodings; the point must lie on the curve.
pub fn compress_public_key(bytes: &[u8]) -> Result<[u8; 33], KeyError> {
    match bytes.len() {
        33 | 65 => {}
        n => {
            return Err(KeyError::InvalidPublicKey(format!(
                "expected 33 or 65 bytes, got {n}"
            )))
        }
    }
    let point = k256::PublicKey::from_sec1_bytes(bytes)
        .map_err(|e| KeyError::InvalidPublicKey(format!("not a curve point: {e}")))?;
    point
        .to_encoded_point(true)
        .as_bytes()
        .try_into()
        .map_err(|_| KeyError::InvalidPublicKey("compressed encoding is not 33 bytes".into()))
}

/// RIPEMD160(SHA256(data)).
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    Ripemd160::digest(sha).into()
}

/// BIP32 fingerprint of a public key: the first four bytes of its HASH160.
pub fn fingerprint_from_public_key(pubkey: &[u8]) -> Result<[u8; 4], KeyError> {
    let compressed = compress_public_key(pubkey)?;
    let digest = hash160(&compressed);
    Ok([digest[0], digest[1], digest[2], digest[3]])
}

/// Render a fingerprint as exactly eight lowercase hex digits.
pub fn fixed_length_fingerprint(fingerprint: u32) -> String {
    format!("{fingerprint:08x}")
}

/// Parse a hex fingerprint, left-padding short values to four bytes.
///
/// Wallet exports sometimes drop leading zeros (`"ec65d"` for `000ec65d`).
pub fn parse_fingerprint(s: &str) -> Result<[u8; 4], KeyError> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() || s.len() > 8 {
        return Err(KeyError::InvalidFingerprint(s.to_string()));
    }
    let value = u32::from_str_radix(s, 16)
        .map_err(|e| KeyError::InvalidFingerprint(format!("{s}: {e}")))?;
    Ok(value.to_be_bytes())
}
