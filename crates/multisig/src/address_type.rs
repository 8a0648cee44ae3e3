use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MultisigError;

/// Script wrappings supported for M-of-N multisig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MultisigAddressType {
    #[serde(rename = "P2SH")]
    P2sh,
    #[serde(rename = "P2SH-P2WSH", alias = "P2SH_P2WSH")]
    P2shP2wsh,
    #[serde(rename = "P2WSH")]
    P2wsh,
}

impl MultisigAddressType {
    pub const ALL: [MultisigAddressType; 3] = [
        MultisigAddressType::P2sh,
        MultisigAddressType::P2shP2wsh,
        MultisigAddressType::P2wsh,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MultisigAddressType::P2sh => "P2SH",
            MultisigAddressType::P2shP2wsh => "P2SH-P2WSH",
            MultisigAddressType::P2wsh => "P2WSH",
        }
    }

    /// Whether spends of this type carry a witness.
    pub fn is_segwit(self) -> bool {
        !matches!(self, MultisigAddressType::P2sh)
    }

    /// Largest N a standard script of this type can hold. Legacy P2SH is
    /// bounded by the 520-byte redeem script push.
    pub fn max_signers(self) -> u32 {
        match self {
            MultisigAddressType::P2sh => 15,
            MultisigAddressType::P2shP2wsh | MultisigAddressType::P2wsh => 20,
        }
    }
}

impl fmt::Display for MultisigAddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MultisigAddressType {
    type Err = MultisigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('_', "-").as_str() {
            "P2SH" => Ok(MultisigAddressType::P2sh),
            "P2SH-P2WSH" => Ok(MultisigAddressType::P2shP2wsh),
            "P2WSH" => Ok(MultisigAddressType::P2wsh),
            _ => Err(MultisigError::UnsupportedAddressType(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_types() {
        assert_eq!("P2SH".parse::<MultisigAddressType>().unwrap(), MultisigAddressType::P2sh);
        assert_eq!(
            "p2sh_p2wsh".parse::<MultisigAddressType>().unwrap(),
            MultisigAddressType::P2shP2wsh
        );
        assert_eq!("P2WSH".parse::<MultisigAddressType>().unwrap(), MultisigAddressType::P2wsh);
    }

    #[test]
    fn rejects_single_sig_and_taproot() {
        for name in ["P2PKH", "P2WPKH", "P2TR", ""] {
            let err = name.parse::<MultisigAddressType>().unwrap_err();
            assert!(matches!(err, MultisigError::UnsupportedAddressType(_)));
        }
    }

    #[test]
    fn display_matches_serde_names() {
        for address_type in MultisigAddressType::ALL {
            let json = serde_json::to_string(&address_type).unwrap();
            assert_eq!(json, format!("\"{address_type}\""));
        }
    }

    #[test]
    fn only_p2sh_is_legacy() {
        assert!(!MultisigAddressType::P2sh.is_segwit());
        assert!(MultisigAddressType::P2shP2wsh.is_segwit());
        assert!(MultisigAddressType::P2wsh.is_segwit());
    }
}
