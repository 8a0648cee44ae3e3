use std::fmt;
use std::str::FromStr;

use bitcoin::NetworkKind;
use serde::{Deserialize, Serialize};

use crate::error::KeyError;

/// SLIP-0132 extended public key version prefixes.
///
/// The capitalized variants are the multisig flavours (`Ypub`, `Zpub`,
/// `Upub`, `Vpub`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtendedKeyVersion {
    #[serde(rename = "xpub")]
    Xpub,
    #[serde(rename = "ypub")]
    Ypub,
    #[serde(rename = "zpub")]
    Zpub,
    #[serde(rename = "Ypub")]
    MultisigYpub,
    #[serde(rename = "Zpub")]
    MultisigZpub,
    #[serde(rename = "tpub")]
    Tpub,
    #[serde(rename = "upub")]
    Upub,
    #[serde(rename = "vpub")]
    Vpub,
    #[serde(rename = "Upub")]
    MultisigUpub,
    #[serde(rename = "Vpub")]
    MultisigVpub,
}

impl ExtendedKeyVersion {
    pub const ALL: [ExtendedKeyVersion; 10] = [
        ExtendedKeyVersion::Xpub,
        ExtendedKeyVersion::Ypub,
        ExtendedKeyVersion::Zpub,
        ExtendedKeyVersion::MultisigYpub,
        ExtendedKeyVersion::MultisigZpub,
        ExtendedKeyVersion::Tpub,
        ExtendedKeyVersion::Upub,
        ExtendedKeyVersion::Vpub,
        ExtendedKeyVersion::MultisigUpub,
        ExtendedKeyVersion::MultisigVpub,
    ];

    /// The 4-byte version tag at the head of the serialized key.
    pub fn to_bytes(self) -> [u8; 4] {
        match self {
            ExtendedKeyVersion::Xpub => [0x04, 0x88, 0xb2, 0x1e],
            ExtendedKeyVersion::Ypub => [0x04, 0x9d, 0x7c, 0xb2],
            ExtendedKeyVersion::Zpub => [0x04, 0xb2, 0x47, 0x46],
            ExtendedKeyVersion::MultisigYpub => [0x02, 0x95, 0xb4, 0x3f],
            ExtendedKeyVersion::MultisigZpub => [0x02, 0xaa, 0x7e, 0xd3],
            ExtendedKeyVersion::Tpub => [0x04, 0x35, 0x87, 0xcf],
            ExtendedKeyVersion::Upub => [0x04, 0x4a, 0x52, 0x62],
            ExtendedKeyVersion::Vpub => [0x04, 0x5f, 0x1c, 0xf6],
            ExtendedKeyVersion::MultisigUpub => [0x02, 0x42, 0x89, 0xef],
            ExtendedKeyVersion::MultisigVpub => [0x02, 0x57, 0x54, 0x83],
        }
    }

    pub fn from_bytes(bytes: [u8; 4]) -> Result<Self, KeyError> {
        Self::ALL
            .into_iter()
            .find(|v| v.to_bytes() == bytes)
            .ok_or_else(|| KeyError::UnknownVersion(hex::encode(bytes)))
    }

    /// The base58 prefix a key with this version renders with.
    pub fn prefix(self) -> &'static str {
        match self {
            ExtendedKeyVersion::Xpub => "xpub",
            ExtendedKeyVersion::Ypub => "ypub",
            ExtendedKeyVersion::Zpub => "zpub",
            ExtendedKeyVersion::MultisigYpub => "Ypub",
            ExtendedKeyVersion::MultisigZpub => "Zpub",
            ExtendedKeyVersion::Tpub => "tpub",
            ExtendedKeyVersion::Upub => "upub",
            ExtendedKeyVersion::Vpub => "vpub",
            ExtendedKeyVersion::MultisigUpub => "Upub",
            ExtendedKeyVersion::MultisigVpub => "Vpub",
        }
    }

    pub fn network_kind(self) -> NetworkKind {
        match self {
            ExtendedKeyVersion::Xpub
            | ExtendedKeyVersion::Ypub
            | ExtendedKeyVersion::Zpub
            | ExtendedKeyVersion::MultisigYpub
            | ExtendedKeyVersion::MultisigZpub => NetworkKind::Main,
            _ => NetworkKind::Test,
        }
    }

    /// The plain BIP32 version (`xpub`/`tpub`) for a network kind.
    pub fn standard(kind: NetworkKind) -> Self {
        match kind {
            NetworkKind::Main => ExtendedKeyVersion::Xpub,
            NetworkKind::Test => ExtendedKeyVersion::Tpub,
        }
    }
}

impl fmt::Display for ExtendedKeyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for ExtendedKeyVersion {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.prefix() == s)
            .ok_or_else(|| KeyError::UnknownVersion(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_roundtrip_for_every_version() {
        for version in ExtendedKeyVersion::ALL {
            assert_eq!(ExtendedKeyVersion::from_bytes(version.to_bytes()).unwrap(), version);
            assert_eq!(version.prefix().parse::<ExtendedKeyVersion>().unwrap(), version);
        }
    }

    #[test]
    fn prefixes_are_case_sensitive() {
        assert_eq!("Zpub".parse::<ExtendedKeyVersion>().unwrap(), ExtendedKeyVersion::MultisigZpub);
        assert_eq!("zpub".parse::<ExtendedKeyVersion>().unwrap(), ExtendedKeyVersion::Zpub);
        assert!("ZPUB".parse::<ExtendedKeyVersion>().is_err());
    }

    #[test]
    fn network_kinds() {
        assert_eq!(ExtendedKeyVersion::MultisigYpub.network_kind(), NetworkKind::Main);
        assert_eq!(ExtendedKeyVersion::Vpub.network_kind(), NetworkKind::Test);
        assert_eq!(ExtendedKeyVersion::standard(NetworkKind::Test), ExtendedKeyVersion::Tpub);
    }

    #[test]
    fn unknown_bytes_rejected() {
        let err = ExtendedKeyVersion::from_bytes([0xde, 0xad, 0xbe, 0xef]).unwrap_err();
        assert_eq!(err.to_string(), "unknown extended key version: deadbeef");
    }
}
