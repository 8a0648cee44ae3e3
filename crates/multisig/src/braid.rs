//! Braids: one branch (receive or change) of a multisig wallet.
//!
//! A braid binds the cosigners' extended public keys to an address type, a
//! quorum and a branch index. Every address on the branch lives at
//! `index/i` below each cosigner key, and deriving there is a pure function
//! of the braid, so independent coordinators agree on the same addresses.

use bitcoin::bip32::ChildNumber;
use bitcoin::CompressedPublicKey;
use hd_keys::path::MAX_UNHARDENED_INDEX;
use hd_keys::pubkey::{parse_fingerprint, UNKNOWN_FINGERPRINT};
use hd_keys::{Bip32Path, BtcNetwork, KeyMaterial};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address_type::MultisigAddressType;
use crate::error::MultisigError;
use crate::script_builder::{self, BraidOrigin, Multisig};

/// Serialized form of one cosigner key in a [`BraidConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedKeyConfig {
    pub base58_string: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Bip32Path>,
    /// Hex master fingerprint, e.g. `"f57ec65d"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_fingerprint: Option<String>,
}

/// Serialized braid, as exchanged between coordinators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BraidConfig {
    pub network: BtcNetwork,
    pub address_type: MultisigAddressType,
    pub extended_public_keys: Vec<ExtendedKeyConfig>,
    pub required_signers: u32,
    pub index: u32,
}

/// Origin of one derived key, as recorded in PSBT BIP32 derivation fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationRecord {
    pub master_fingerprint: [u8; 4],
    /// Full path from the master key.
    pub path: Bip32Path,
    pub pubkey: CompressedPublicKey,
}

/// Keys derived at one braid path, sorted ascending by serialized key, with
/// derivation records in the same order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKeys {
    pub public_keys: Vec<CompressedPublicKey>,
    pub derivations: Vec<DerivationRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Braid {
    network: BtcNetwork,
    address_type: MultisigAddressType,
    extended_keys: Vec<KeyMaterial>,
    required_signers: u32,
    index: u32,
}

impl Braid {
    pub fn new(
        network: BtcNetwork,
        address_type: MultisigAddressType,
        extended_keys: Vec<KeyMaterial>,
        required_signers: u32,
        index: u32,
    ) -> Result<Self, MultisigError> {
        if extended_keys.is_empty() {
            return Err(MultisigError::InvalidQuorum("braid has no keys".into()));
        }
        let total = extended_keys.len() as u32;
        if required_signers == 0 || required_signers > total {
            return Err(MultisigError::InvalidQuorum(format!(
                "{required_signers}-of-{total}"
            )));
        }
        if total > address_type.max_signers() {
            return Err(MultisigError::InvalidQuorum(format!(
                "{address_type} supports at most {} keys, got {total}",
                address_type.max_signers()
            )));
        }
        if index > MAX_UNHARDENED_INDEX {
            return Err(MultisigError::InvalidConfig(format!(
                "braid index {index} is hardened"
            )));
        }
        for (i, key) in extended_keys.iter().enumerate() {
            key.validate_for_network(network)
                .map_err(|e| MultisigError::NetworkMismatch(format!("key {i}: {e}")))?;
            if extended_keys[..i].iter().any(|other| other.pubkey() == key.pubkey()) {
                return Err(MultisigError::InvalidConfig(format!(
                    "key {i} duplicates an earlier key"
                )));
            }
        }

        Ok(Self { network, address_type, extended_keys, required_signers, index })
    }

    pub fn from_config(config: &BraidConfig) -> Result<Self, MultisigError> {
        let keys = config
            .extended_public_keys
            .iter()
            .map(|entry| -> Result<KeyMaterial, MultisigError> {
                let mut key =
                    KeyMaterial::from_base58_for_network(&entry.base58_string, config.network)?;
                if let Some(path) = &entry.path {
                    key = key.with_path(path.clone())?;
                }
                if let Some(fingerprint) = &entry.root_fingerprint {
                    key = key.with_root_fingerprint(parse_fingerprint(fingerprint)?);
                }
                Ok(key)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(config.network, config.address_type, keys, config.required_signers, config.index)
    }

    pub fn from_json(json: &str) -> Result<Self, MultisigError> {
        let config: BraidConfig = serde_json::from_str(json)
            .map_err(|e| MultisigError::InvalidConfig(e.to_string()))?;
        Self::from_config(&config)
    }

    pub fn to_config(&self) -> BraidConfig {
        BraidConfig {
            network: self.network,
            address_type: self.address_type,
            extended_public_keys: self
                .extended_keys
                .iter()
                .map(|key| ExtendedKeyConfig {
                    base58_string: key.to_base58(),
                    path: key.path().cloned(),
                    root_fingerprint: key.root_fingerprint().map(hex::encode),
                })
                .collect(),
            required_signers: self.required_signers,
            index: self.index,
        }
    }

    pub fn to_json(&self) -> Result<String, MultisigError> {
        serde_json::to_string(&self.to_config())
            .map_err(|e| MultisigError::InvalidConfig(e.to_string()))
    }

    pub fn network(&self) -> BtcNetwork {
        self.network
    }

    pub fn address_type(&self) -> MultisigAddressType {
        self.address_type
    }

    pub fn extended_keys(&self) -> &[KeyMaterial] {
        &self.extended_keys
    }

    pub fn required_signers(&self) -> u32 {
        self.required_signers
    }

    pub fn total_signers(&self) -> u32 {
        self.extended_keys.len() as u32
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Reject paths whose first segment is not this braid's index.
    fn check_path(&self, path: &Bip32Path) -> Result<Bip32Path, MultisigError> {
        let mismatch = || MultisigError::BraidPathMismatch {
            index: self.index,
            path: path.to_string(),
        };
        match path.first() {
            Some(ChildNumber::Normal { index }) if index == self.index => {}
            _ => return Err(mismatch()),
        }
        // `m/0/5` and `0/5` name the same braid path.
        Ok(Bip32Path::relative(path.segments().to_vec()))
    }

    /// Derive every cosigner's child key at `path` (e.g. `0/5`).
    pub fn derive_keys_at(&self, path: &Bip32Path) -> Result<DerivedKeys, MultisigError> {
        let relative = self.check_path(path)?;

        let mut derived = self
            .extended_keys
            .iter()
            .map(|key| -> Result<([u8; 33], DerivationRecord), MultisigError> {
                let child = key.derive_path(&relative)?;
                let pubkey = CompressedPublicKey::from_slice(child.pubkey())
                    .map_err(|e| MultisigError::InvalidScript(format!("derived key: {e}")))?;
                let origin = key.path().cloned().unwrap_or_else(|| placeholder_path(key.depth()));
                let record = DerivationRecord {
                    master_fingerprint: key.root_fingerprint().unwrap_or(UNKNOWN_FINGERPRINT),
                    path: origin.join(&relative),
                    pubkey,
                };
                Ok((*child.pubkey(), record))
            })
            .collect::<Result<Vec<_>, _>>()?;

        derived.sort_by(|a, b| a.0.cmp(&b.0));
        debug!(index = self.index, %relative, keys = derived.len(), "derived braid keys");

        let derivations: Vec<DerivationRecord> = derived.into_iter().map(|(_, record)| record).collect();
        Ok(DerivedKeys {
            public_keys: derivations.iter().map(|record| record.pubkey).collect(),
            derivations,
        })
    }

    /// Shorthand for [`Braid::derive_keys_at`] at `index/i`.
    pub fn derive_keys_at_relative_index(&self, i: u32) -> Result<DerivedKeys, MultisigError> {
        self.derive_keys_at(&self.relative_path(i)?)
    }

    /// Build the multisig at `path`, labelled with this braid as its origin.
    pub fn derive_multisig_at(&self, path: &Bip32Path) -> Result<Multisig, MultisigError> {
        let derived = self.derive_keys_at(path)?;
        let multisig = script_builder::from_public_keys(
            self.network,
            self.address_type,
            self.required_signers,
            &derived.public_keys,
        )?;
        Ok(multisig.with_braid_origin(BraidOrigin {
            config: self.to_config(),
            path: Bip32Path::relative(path.segments().to_vec()),
        }))
    }

    pub fn derive_multisig_at_relative_index(&self, i: u32) -> Result<Multisig, MultisigError> {
        self.derive_multisig_at(&self.relative_path(i)?)
    }

    fn relative_path(&self, i: u32) -> Result<Bip32Path, MultisigError> {
        Ok(Bip32Path::from_unhardened(&[self.index, i])?)
    }
}

/// Stand-in origin for a key whose path is unknown: `depth` unhardened
/// zeros, so records keep the right length.
fn placeholder_path(depth: u8) -> Bip32Path {
    Bip32Path::rooted(vec![ChildNumber::Normal { index: 0 }; usize::from(depth)])
}

#[cfg(test)]
mod tests {
    use hd_keys::ExtendedKeyVersion;

    use super::*;
    use crate::script_builder::classify;

    // BIP32 test vectors 1 and 2, m/0' and master.
    const XPUB_A: &str = "xpub68Gmy5EdvgibQVfPdqkBBCHxA5htiqg55crXYuXoQRKfDBFA1WEjWgP6LHhwBZeNK1VTsfTFUHCdrfp1bgwQ9xv5ski8PX9rL2dZXvgGDnw";
    const XPUB_B: &str = "xpub661MyMwAqRbcFW31YEwpkMuc5THy2PSt5bDMsktWQcFF8syAmRUapSCGu8ED9W6oDMSgv6Zz8idoc4a6mr8BDzTJY47LJhkJ8UB7WEGuduB";
    const XPUB_C: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";

    fn tpub(xpub: &str) -> String {
        KeyMaterial::from_base58(xpub).unwrap().convert_version(ExtendedKeyVersion::Tpub)
    }

    fn config(index: u32) -> BraidConfig {
        BraidConfig {
            network: BtcNetwork::Testnet,
            address_type: MultisigAddressType::P2wsh,
            extended_public_keys: vec![
                ExtendedKeyConfig {
                    base58_string: tpub(XPUB_A),
                    path: Some(Bip32Path::parse("m/0'").unwrap()),
                    root_fingerprint: Some("3442193e".into()),
                },
                ExtendedKeyConfig {
                    base58_string: tpub(XPUB_B),
                    path: Some(Bip32Path::master()),
                    root_fingerprint: Some("bd16bee5".into()),
                },
                ExtendedKeyConfig {
                    base58_string: tpub(XPUB_C),
                    path: None,
                    root_fingerprint: None,
                },
            ],
            required_signers: 2,
            index,
        }
    }

    fn braid() -> Braid {
        Braid::from_config(&config(0)).unwrap()
    }

    #[test]
    fn derives_one_sorted_key_per_member() {
        let derived = braid().derive_keys_at(&Bip32Path::parse("0/3").unwrap()).unwrap();
        assert_eq!(derived.public_keys.len(), 3);
        let bytes: Vec<[u8; 33]> = derived.public_keys.iter().map(|k| k.0.serialize()).collect();
        let mut sorted = bytes.clone();
        sorted.sort();
        assert_eq!(bytes, sorted);
        assert!(bytes.iter().all(|k| k[0] == 0x02 || k[0] == 0x03));
    }

    #[test]
    fn records_follow_key_order() {
        let derived = braid().derive_keys_at_relative_index(9).unwrap();
        for (key, record) in derived.public_keys.iter().zip(&derived.derivations) {
            assert_eq!(key, &record.pubkey);
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        let braid = braid();
        let path = Bip32Path::parse("0/17").unwrap();
        assert_eq!(braid.derive_keys_at(&path).unwrap(), braid.derive_keys_at(&path).unwrap());
    }

    #[test]
    fn relative_index_matches_explicit_path() {
        let braid = braid();
        assert_eq!(
            braid.derive_keys_at_relative_index(4).unwrap(),
            braid.derive_keys_at(&Bip32Path::parse("0/4").unwrap()).unwrap()
        );
    }

    #[test]
    fn rejects_paths_outside_index() {
        let braid = braid();
        for path in ["1/0", "5", "0'/1"] {
            let err = braid.derive_keys_at(&Bip32Path::parse(path).unwrap()).unwrap_err();
            assert!(matches!(err, MultisigError::BraidPathMismatch { index: 0, .. }), "{path}");
        }
    }

    #[test]
    fn rejects_hardened_tail() {
        let err = braid().derive_keys_at(&Bip32Path::parse("0/1'").unwrap()).unwrap_err();
        assert!(matches!(err, MultisigError::Key(_)));
    }

    #[test]
    fn change_braid_uses_its_own_index() {
        let change = Braid::from_config(&config(1)).unwrap();
        assert!(change.derive_keys_at(&Bip32Path::parse("0/0").unwrap()).is_err());
        assert_ne!(
            change.derive_keys_at_relative_index(0).unwrap(),
            braid().derive_keys_at_relative_index(0).unwrap()
        );
    }

    #[test]
    fn records_carry_origin_or_placeholder() {
        let derived = braid().derive_keys_at_relative_index(2).unwrap();
        let mut paths: Vec<String> =
            derived.derivations.iter().map(|r| r.path.to_string()).collect();
        paths.sort();
        assert_eq!(paths, vec!["m/0'/0/2", "m/0/2", "m/0/2"]);

        let unknown = derived
            .derivations
            .iter()
            .filter(|r| r.master_fingerprint == UNKNOWN_FINGERPRINT)
            .count();
        assert_eq!(unknown, 1);
        assert!(derived
            .derivations
            .iter()
            .any(|r| r.master_fingerprint == [0x34, 0x42, 0x19, 0x3e]));
    }

    #[test]
    fn multisig_at_path_matches_braid_settings() {
        let braid = braid();
        let multisig = braid.derive_multisig_at_relative_index(0).unwrap();
        assert_eq!(classify(&multisig), MultisigAddressType::P2wsh);
        assert_eq!(multisig.required_signers(), 2);
        assert_eq!(multisig.total_signers(), 3);
        assert!(multisig.address().to_string().starts_with("tb1q"));

        let origin = multisig.braid_origin().unwrap();
        assert_eq!(origin.config, braid.to_config());
        assert_eq!(origin.path.to_string(), "0/0");
    }

    #[test]
    fn json_roundtrip() {
        let braid = braid();
        let json = braid.to_json().unwrap();
        assert!(json.contains("\"addressType\":\"P2WSH\""));
        assert_eq!(Braid::from_json(&json).unwrap(), braid);
    }

    #[test]
    fn rejects_invalid_quorums() {
        let mut bad = config(0);
        bad.required_signers = 4;
        assert!(matches!(Braid::from_config(&bad), Err(MultisigError::InvalidQuorum(_))));

        bad.required_signers = 0;
        assert!(Braid::from_config(&bad).is_err());
    }

    #[test]
    fn rejects_keys_for_other_network() {
        let mut bad = config(0);
        bad.extended_public_keys[0].base58_string = XPUB_A.to_string();
        assert!(Braid::from_config(&bad).is_err());
    }

    #[test]
    fn rejects_duplicate_keys() {
        let mut bad = config(0);
        bad.extended_public_keys[1] = bad.extended_public_keys[0].clone();
        assert!(matches!(Braid::from_config(&bad), Err(MultisigError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(Braid::from_json("{\"network\":\"testnet\"}").is_err());
        assert!(Braid::from_json("not json").is_err());
    }
}
