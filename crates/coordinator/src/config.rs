//! Multisig wallet configuration files.
//!
//! The JSON layout is the one common multisig coordinators export:
//!
//! ```json
//! {
//!   "name": "Vault",
//!   "network": "testnet",
//!   "addressType": "P2WSH",
//!   "quorum": { "requiredSigners": 2, "totalSigners": 3 },
//!   "extendedPublicKeys": [
//!     { "name": "a", "xpub": "tpub...", "bip32Path": "m/48'/1'/0'/2'", "xfp": "f57ec65d" }
//!   ],
//!   "startingAddressIndex": 0
//! }
//! ```
//!
//! Keys whose origin was never recorded carry `"Unknown"` for the path and
//! fingerprint. Unrecognised fields are ignored.

use hd_keys::{Bip32Path, BtcNetwork};
use multisig::{Braid, BraidConfig, ExtendedKeyConfig, MultisigAddressType};
use serde::{Deserialize, Serialize};

use crate::error::CoordinatorError;

pub const RECEIVE_BRAID_INDEX: u32 = 0;
pub const CHANGE_BRAID_INDEX: u32 = 1;

const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quorum {
    pub required_signers: u32,
    pub total_signers: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletKey {
    #[serde(default)]
    pub name: String,
    pub xpub: String,
    #[serde(default)]
    pub bip32_path: Option<String>,
    #[serde(default)]
    pub xfp: Option<String>,
}

impl WalletKey {
    fn to_key_config(&self) -> Result<ExtendedKeyConfig, CoordinatorError> {
        let path = known(self.bip32_path.as_deref())
            .map(Bip32Path::parse)
            .transpose()?;
        Ok(ExtendedKeyConfig {
            base58_string: self.xpub.trim().to_string(),
            path,
            root_fingerprint: known(self.xfp.as_deref()).map(str::to_string),
        })
    }
}

fn known(value: Option<&str>) -> Option<&str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case(UNKNOWN))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletConfig {
    #[serde(default)]
    pub name: String,
    pub network: BtcNetwork,
    pub address_type: MultisigAddressType,
    pub quorum: Quorum,
    pub extended_public_keys: Vec<WalletKey>,
    #[serde(default)]
    pub starting_address_index: u32,
}

impl WalletConfig {
    pub fn from_json(json: &str) -> Result<Self, CoordinatorError> {
        let config: WalletConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, CoordinatorError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), CoordinatorError> {
        let keys = self.extended_public_keys.len() as u32;
        if self.quorum.total_signers != keys {
            return Err(CoordinatorError::InvalidConfig(format!(
                "quorum lists {} signers but {keys} keys are configured",
                self.quorum.total_signers
            )));
        }
        if self.quorum.required_signers == 0 || self.quorum.required_signers > keys {
            return Err(CoordinatorError::InvalidConfig(format!(
                "cannot require {} of {keys} signers",
                self.quorum.required_signers
            )));
        }
        Ok(())
    }

    /// The braid at branch `index` (0 receive, 1 change).
    pub fn braid(&self, index: u32) -> Result<Braid, CoordinatorError> {
        Ok(Braid::from_config(&self.braid_config(index)?)?)
    }

    pub fn braid_config(&self, index: u32) -> Result<BraidConfig, CoordinatorError> {
        self.validate()?;
        Ok(BraidConfig {
            network: self.network,
            address_type: self.address_type,
            extended_public_keys: self
                .extended_public_keys
                .iter()
                .map(WalletKey::to_key_config)
                .collect::<Result<Vec<_>, _>>()?,
            required_signers: self.quorum.required_signers,
            index,
        })
    }

    pub fn receive_braid(&self) -> Result<Braid, CoordinatorError> {
        self.braid(RECEIVE_BRAID_INDEX)
    }

    pub fn change_braid(&self) -> Result<Braid, CoordinatorError> {
        self.braid(CHANGE_BRAID_INDEX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hd_keys::{ExtendedKeyVersion, KeyMaterial};

    // BIP32 test vector 1, m/0' and m/0'/1
    const XPUB_A: &str = "xpub68Gmy5EdvgibQVfPdqkBBCHxA5htiqg55crXYuXoQRKfDBFA1WEjWgP6LHhwBZeNK1VTsfTFUHCdrfp1bgwQ9xv5ski8PX9rL2dZXvgGDnw";
    const XPUB_B: &str = "xpub6ASuArnXKPbfEwhqN6e3mwBcDTgzisQN1wXN9BJcM47sSikHjJf3UFHKkNAWbWMiGj7Wf5uMash7SyYq527Hqck2AxYysAA7xmALppuCkwQ";

    fn tpub(xpub: &str) -> String {
        KeyMaterial::from_base58(xpub).unwrap().convert_version(ExtendedKeyVersion::Tpub)
    }

    fn config_json(total: u32) -> String {
        format!(
            r#"{{
                "name": "Test Vault",
                "network": "testnet",
                "addressType": "P2SH-P2WSH",
                "client": {{ "type": "public" }},
                "quorum": {{ "requiredSigners": 1, "totalSigners": {total} }},
                "extendedPublicKeys": [
                    {{ "name": "a", "xpub": "{}", "bip32Path": "m/0'", "xfp": "3442193e" }},
                    {{ "name": "b", "xpub": "{}", "bip32Path": "Unknown", "xfp": "Unknown" }}
                ],
                "startingAddressIndex": 4
            }}"#,
            tpub(XPUB_A),
            tpub(XPUB_B)
        )
    }

    #[test]
    fn parses_and_ignores_unknown_fields() {
        let config = WalletConfig::from_json(&config_json(2)).unwrap();
        assert_eq!(config.name, "Test Vault");
        assert_eq!(config.network, BtcNetwork::Testnet);
        assert_eq!(config.address_type, MultisigAddressType::P2shP2wsh);
        assert_eq!(config.quorum, Quorum { required_signers: 1, total_signers: 2 });
        assert_eq!(config.starting_address_index, 4);
    }

    #[test]
    fn total_signers_must_match_keys() {
        let err = WalletConfig::from_json(&config_json(3)).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidConfig(_)));
    }

    #[test]
    fn unknown_origins_become_absent() {
        let config = WalletConfig::from_json(&config_json(2)).unwrap();
        let braid = config.braid_config(0).unwrap();
        assert_eq!(braid.extended_public_keys[0].path, Some(Bip32Path::parse("m/0'").unwrap()));
        assert_eq!(braid.extended_public_keys[0].root_fingerprint.as_deref(), Some("3442193e"));
        assert_eq!(braid.extended_public_keys[1].path, None);
        assert_eq!(braid.extended_public_keys[1].root_fingerprint, None);
    }

    #[test]
    fn receive_and_change_braids() {
        let config = WalletConfig::from_json(&config_json(2)).unwrap();
        let receive = config.receive_braid().unwrap();
        let change = config.change_braid().unwrap();
        assert_eq!(receive.index(), RECEIVE_BRAID_INDEX);
        assert_eq!(change.index(), CHANGE_BRAID_INDEX);
        assert_eq!(receive.required_signers(), 1);
        assert_ne!(
            receive.derive_multisig_at_relative_index(0).unwrap().address(),
            change.derive_multisig_at_relative_index(0).unwrap().address()
        );
    }

    #[test]
    fn json_roundtrip() {
        let config = WalletConfig::from_json(&config_json(2)).unwrap();
        let again = WalletConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(again, config);
    }
}
