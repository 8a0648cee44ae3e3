use bitcoin::{Amount, ScriptBuf, Transaction, TxOut, Txid};

use crate::codec::{write_compact_size, Cursor};
use crate::error::PsbtError;

/// BIP32 origin of a public key: master fingerprint plus derivation path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bip32Derivation {
    pub pubkey: Vec<u8>,
    pub master_fingerprint: [u8; 4],
    pub path: Vec<u32>,
}

impl Bip32Derivation {
    /// Record value: fingerprint then each path element as u32 LE.
    pub fn encode_value(&self) -> Vec<u8> {
        encode_key_origin(&self.master_fingerprint, &self.path)
    }

    pub fn decode(pubkey: &[u8], value: &[u8]) -> Result<Self, PsbtError> {
        let (master_fingerprint, path) = decode_key_origin(value)?;
        Ok(Self { pubkey: pubkey.to_vec(), master_fingerprint, path })
    }
}

/// A PSBT_GLOBAL_XPUB record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalXpub {
    /// 78-byte BIP32 serialization.
    pub xpub: Vec<u8>,
    pub master_fingerprint: [u8; 4],
    pub path: Vec<u32>,
}

pub(crate) fn encode_key_origin(master_fingerprint: &[u8; 4], path: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 4 * path.len());
    out.extend_from_slice(master_fingerprint);
    for index in path {
        out.extend_from_slice(&index.to_le_bytes());
    }
    out
}

pub(crate) fn decode_key_origin(value: &[u8]) -> Result<([u8; 4], Vec<u32>), PsbtError> {
    if value.len() < 4 || value.len() % 4 != 0 {
        return Err(PsbtError::MalformedPsbt(format!(
            "key origin must be a fingerprint plus 4-byte indexes, got {} bytes",
            value.len()
        )));
    }
    let master_fingerprint = [value[0], value[1], value[2], value[3]];
    let path = value[4..]
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok((master_fingerprint, path))
}

/// One partial signature: the signing pubkey and the DER signature with its
/// trailing sighash byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialSig {
    pub pubkey: Vec<u8>,
    pub signature: Vec<u8>,
}

impl PartialSig {
    pub fn sighash_byte(&self) -> Option<u8> {
        self.signature.last().copied()
    }
}

/// Key data of a proprietary (0xfc) record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProprietaryKey {
    pub identifier: Vec<u8>,
    pub subtype: u64,
    pub key: Vec<u8>,
}

impl ProprietaryKey {
    pub fn new(identifier: impl Into<Vec<u8>>, subtype: u64, key: impl Into<Vec<u8>>) -> Self {
        Self { identifier: identifier.into(), subtype, key: key.into() }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_compact_size(&mut out, self.identifier.len() as u64);
        out.extend_from_slice(&self.identifier);
        write_compact_size(&mut out, self.subtype);
        out.extend_from_slice(&self.key);
        out
    }

    pub fn decode(key_data: &[u8]) -> Result<Self, PsbtError> {
        let mut cursor = Cursor::new(key_data);
        let identifier = cursor.read_len_prefixed()?.to_vec();
        let subtype = cursor.read_compact_size()?;
        let key = cursor.take(cursor.remaining())?.to_vec();
        Ok(Self { identifier, subtype, key })
    }
}

/// Fields for a new input. Only the outpoint is required.
#[derive(Debug, Clone, PartialEq)]
pub struct InputArgs {
    pub previous_txid: Txid,
    pub output_index: u32,
    pub sequence: Option<u32>,
    pub non_witness_utxo: Option<Transaction>,
    pub witness_utxo: Option<TxOut>,
    pub redeem_script: Option<ScriptBuf>,
    pub witness_script: Option<ScriptBuf>,
    pub bip32_derivations: Vec<Bip32Derivation>,
    pub sighash_type: Option<u32>,
    pub required_time_locktime: Option<u32>,
    pub required_height_locktime: Option<u32>,
}

impl InputArgs {
    pub fn new(previous_txid: Txid, output_index: u32) -> Self {
        Self {
            previous_txid,
            output_index,
            sequence: None,
            non_witness_utxo: None,
            witness_utxo: None,
            redeem_script: None,
            witness_script: None,
            bip32_derivations: Vec::new(),
            sighash_type: None,
            required_time_locktime: None,
            required_height_locktime: None,
        }
    }
}

/// Fields for a new output. Amount and script are required.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputArgs {
    pub amount: Amount,
    pub script: ScriptBuf,
    pub redeem_script: Option<ScriptBuf>,
    pub witness_script: Option<ScriptBuf>,
    pub bip32_derivations: Vec<Bip32Derivation>,
}

impl OutputArgs {
    pub fn new(amount: Amount, script: ScriptBuf) -> Self {
        Self {
            amount,
            script,
            redeem_script: None,
            witness_script: None,
            bip32_derivations: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bip32_value_layout() {
        let derivation = Bip32Derivation {
            pubkey: vec![0x02; 33],
            master_fingerprint: [0xf5, 0x7e, 0xc6, 0x5d],
            path: vec![0x8000_0030, 0, 5],
        };
        let value = derivation.encode_value();
        assert_eq!(hex::encode(&value), "f57ec65d300000800000000005000000");
        assert_eq!(Bip32Derivation::decode(&[0x02; 33], &value).unwrap(), derivation);
    }

    #[test]
    fn key_origin_rejects_ragged_values() {
        assert!(decode_key_origin(&[1, 2, 3]).is_err());
        assert!(decode_key_origin(&[1, 2, 3, 4, 5]).is_err());
        assert_eq!(decode_key_origin(&[1, 2, 3, 4]).unwrap(), ([1, 2, 3, 4], vec![]));
    }

    #[test]
    fn proprietary_key_layout() {
        let key = ProprietaryKey::new(b"wallet".to_vec(), 7, vec![0xaa]);
        let encoded = key.encode();
        assert_eq!(hex::encode(&encoded), "0677616c6c657407aa");
        assert_eq!(ProprietaryKey::decode(&encoded).unwrap(), key);
    }

    #[test]
    fn sighash_byte_is_last() {
        let sig = PartialSig { pubkey: vec![], signature: vec![0x30, 0x01, 0x83] };
        assert_eq!(sig.sighash_byte(), Some(0x83));
    }
}
