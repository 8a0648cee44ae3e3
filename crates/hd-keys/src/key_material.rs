//! Validated extended public keys.
//!
//! A [`KeyMaterial`] is immutable: deriving a child or attaching origin
//! information produces a new value. Public keys are always held in their
//! 33-byte compressed form.

use std::fmt;
use std::str::FromStr;

use bitcoin::bip32::Xpub;
use bitcoin::secp256k1::Secp256k1;

use crate::error::KeyError;
use crate::network::BtcNetwork;
use crate::path::{format_child, Bip32Path};
use crate::pubkey::{compress_public_key, fingerprint_from_public_key};
use crate::version::ExtendedKeyVersion;

/// Length of a serialized BIP32 extended key.
pub const EXTENDED_KEY_LEN: usize = 78;

/// Fields for building a [`KeyMaterial`] without a base58 string.
#[derive(Debug, Clone)]
pub struct ExtendedKeyParts {
    pub version: ExtendedKeyVersion,
    pub network: BtcNetwork,
    pub depth: u8,
    pub parent_fingerprint: u32,
    pub index: u32,
    pub chaincode: [u8; 32],
    /// Compressed or uncompressed SEC1 encoding.
    pub pubkey: Vec<u8>,
    pub path: Option<Bip32Path>,
    pub root_fingerprint: Option<[u8; 4]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyMaterial {
    version: ExtendedKeyVersion,
    network: BtcNetwork,
    depth: u8,
    parent_fingerprint: u32,
    index: u32,
    chaincode: [u8; 32],
    pubkey: [u8; 33],
    path: Option<Bip32Path>,
    root_fingerprint: Option<[u8; 4]>,
}

impl KeyMaterial {
    /// Decode a base58check extended public key under any known prefix.
    ///
    /// Mainnet prefixes yield a mainnet key; testnet prefixes yield a testnet
    /// key. Use [`KeyMaterial::from_base58_for_network`] for regtest/signet.
    pub fn from_base58(encoded: &str) -> Result<Self, KeyError> {
        let data = bs58::decode(encoded.trim())
            .with_check(None)
            .into_vec()
            .map_err(|e| KeyError::InvalidExtendedKey(format!("base58check decode failed: {e}")))?;
        Self::decode(&data)
    }

    /// Decode a base58check extended public key and require it to belong to
    /// `network`.
    pub fn from_base58_for_network(encoded: &str, network: BtcNetwork) -> Result<Self, KeyError> {
        let key = Self::from_base58(encoded)?;
        key.validate_for_network(network)?;
        Ok(Self { network, ..key })
    }

    /// Build from explicit fields. Uncompressed public keys are compressed.
    pub fn from_parts(parts: ExtendedKeyParts) -> Result<Self, KeyError> {
        let pubkey = compress_public_key(&parts.pubkey)?;
        if parts.version.network_kind() != parts.network.kind() {
            return Err(KeyError::NetworkMismatch(format!(
                "{} prefix on {}",
                parts.version, parts.network
            )));
        }
        let key = Self {
            version: parts.version,
            network: parts.network,
            depth: parts.depth,
            parent_fingerprint: parts.parent_fingerprint,
            index: parts.index,
            chaincode: parts.chaincode,
            pubkey,
            path: None,
            root_fingerprint: parts.root_fingerprint,
        };
        key.check_master_fields()?;
        match parts.path {
            Some(path) => key.with_path(path),
            None => Ok(key),
        }
    }

    /// Decode the 78-byte BIP32 serialization.
    pub fn decode(data: &[u8]) -> Result<Self, KeyError> {
        if data.len() != EXTENDED_KEY_LEN {
            return Err(KeyError::InvalidExtendedKey(format!(
                "expected {EXTENDED_KEY_LEN} bytes, got {}",
                data.len()
            )));
        }
        let version = ExtendedKeyVersion::from_bytes([data[0], data[1], data[2], data[3]])?;
        if data[45] == 0x00 {
            return Err(KeyError::InvalidExtendedKey(
                "private extended keys are not accepted".into(),
            ));
        }
        let pubkey = compress_public_key(&data[45..78])?;
        let mut chaincode = [0u8; 32];
        chaincode.copy_from_slice(&data[13..45]);

        let network = match version.network_kind() {
            bitcoin::NetworkKind::Main => BtcNetwork::Mainnet,
            bitcoin::NetworkKind::Test => BtcNetwork::Testnet,
        };
        let key = Self {
            version,
            network,
            depth: data[4],
            parent_fingerprint: u32::from_be_bytes([data[5], data[6], data[7], data[8]]),
            index: u32::from_be_bytes([data[9], data[10], data[11], data[12]]),
            chaincode,
            pubkey,
            path: None,
            root_fingerprint: None,
        };
        key.check_master_fields()?;
        Ok(key)
    }

    fn check_master_fields(&self) -> Result<(), KeyError> {
        if self.depth == 0 && (self.parent_fingerprint != 0 || self.index != 0) {
            return Err(KeyError::InvalidExtendedKey(
                "depth 0 key with non-zero parent fingerprint or index".into(),
            ));
        }
        Ok(())
    }

    /// Attach the rooted path this key sits at. Its depth must match the key.
    pub fn with_path(self, path: Bip32Path) -> Result<Self, KeyError> {
        if !path.is_rooted() {
            return Err(KeyError::InvalidPath(format!("{path} is not rooted at m")));
        }
        if path.depth() != usize::from(self.depth) {
            return Err(KeyError::InvalidPath(format!(
                "{path} has depth {} but key has depth {}",
                path.depth(),
                self.depth
            )));
        }
        if let Some(last) = path.segments().last() {
            if u32::from(*last) != self.index {
                return Err(KeyError::InvalidPath(format!(
                    "{path} ends in {} but key index is {}",
                    format_child(last),
                    self.index
                )));
            }
        }
        Ok(Self { path: Some(path), ..self })
    }

    pub fn with_root_fingerprint(self, fingerprint: [u8; 4]) -> Self {
        Self { root_fingerprint: Some(fingerprint), ..self }
    }

    pub fn version(&self) -> ExtendedKeyVersion {
        self.version
    }

    pub fn network(&self) -> BtcNetwork {
        self.network
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn parent_fingerprint(&self) -> u32 {
        self.parent_fingerprint
    }

    /// Child number of this key, hardened bit included.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn chaincode(&self) -> &[u8; 32] {
        &self.chaincode
    }

    pub fn pubkey(&self) -> &[u8; 33] {
        &self.pubkey
    }

    pub fn path(&self) -> Option<&Bip32Path> {
        self.path.as_ref()
    }

    pub fn root_fingerprint(&self) -> Option<[u8; 4]> {
        self.root_fingerprint
    }

    /// Fingerprint of this key itself (not of its root).
    pub fn fingerprint(&self) -> [u8; 4] {
        // The stored key was validated on ingestion.
        fingerprint_from_public_key(&self.pubkey).unwrap_or_default()
    }

    /// Check that the version prefix is usable on `network`. Testnet
    /// prefixes cover testnet, regtest and signet.
    pub fn validate_for_network(&self, network: BtcNetwork) -> Result<(), KeyError> {
        if self.version.network_kind() != network.kind() {
            return Err(KeyError::NetworkMismatch(format!(
                "{} key is not valid on {network}",
                self.version
            )));
        }
        Ok(())
    }

    /// The 78-byte BIP32 serialization under this key's own version.
    pub fn encode(&self) -> [u8; EXTENDED_KEY_LEN] {
        self.encode_with(self.version)
    }

    fn encode_with(&self, version: ExtendedKeyVersion) -> [u8; EXTENDED_KEY_LEN] {
        let mut out = [0u8; EXTENDED_KEY_LEN];
        out[0..4].copy_from_slice(&version.to_bytes());
        out[4] = self.depth;
        out[5..9].copy_from_slice(&self.parent_fingerprint.to_be_bytes());
        out[9..13].copy_from_slice(&self.index.to_be_bytes());
        out[13..45].copy_from_slice(&self.chaincode);
        out[45..78].copy_from_slice(&self.pubkey);
        out
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.encode()).with_check().into_string()
    }

    /// Re-encode this key under another prefix, e.g. `Zpub` to `xpub`.
    pub fn convert_version(&self, target: ExtendedKeyVersion) -> String {
        bs58::encode(self.encode_with(target)).with_check().into_string()
    }

    /// Derive the child at an unhardened relative path.
    ///
    /// The child keeps this key's version, network and root fingerprint, and
    /// its path is extended when this key's path is known.
    pub fn derive_path(&self, relative: &Bip32Path) -> Result<KeyMaterial, KeyError> {
        if relative.is_rooted() {
            return Err(KeyError::InvalidPath(format!(
                "{relative} must be relative to the key"
            )));
        }
        if let Some(hardened) = relative.segments().iter().find(|c| c.is_hardened()) {
            return Err(KeyError::HardenedDerivation(format_child(hardened)));
        }
        if relative.is_empty() {
            return Ok(self.clone());
        }

        let standard = ExtendedKeyVersion::standard(self.version.network_kind());
        let xpub = Xpub::decode(&self.encode_with(standard))
            .map_err(|e| KeyError::DerivationFailed(e.to_string()))?;
        let secp = Secp256k1::verification_only();
        let child = xpub
            .derive_pub(&secp, &relative.to_derivation_path())
            .map_err(|e| KeyError::DerivationFailed(e.to_string()))?;

        let derived = Self::decode(&child.encode())?;
        Ok(Self {
            version: self.version,
            network: self.network,
            path: self.path.as_ref().map(|p| p.join(relative)),
            root_fingerprint: self.root_fingerprint,
            ..derived
        })
    }
}

impl fmt::Display for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl FromStr for KeyMaterial {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base58(s)
    }
}
