use std::str::FromStr;

use bitcoin::{Network, NetworkKind};
use serde::{Deserialize, Serialize};

use crate::error::KeyError;

/// Supported Bitcoin networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BtcNetwork {
    #[serde(alias = "main")]
    Mainnet,
    #[serde(alias = "test")]
    Testnet,
    #[serde(alias = "reg")]
    Regtest,
    #[serde(alias = "sig")]
    Signet,
}

impl BtcNetwork {
    /// Convert to the `bitcoin` crate's `Network` type.
    pub fn to_bitcoin_network(self) -> Network {
        match self {
            BtcNetwork::Mainnet => Network::Bitcoin,
            BtcNetwork::Testnet => Network::Testnet,
            BtcNetwork::Regtest => Network::Regtest,
            BtcNetwork::Signet => Network::Signet,
        }
    }

    /// Mainnet or "test" for the purposes of extended key and base58 prefixes.
    pub fn kind(self) -> NetworkKind {
        match self {
            BtcNetwork::Mainnet => NetworkKind::Main,
            _ => NetworkKind::Test,
        }
    }

    /// BIP44 coin type used in standard derivation paths.
    pub fn coin_type(self) -> u32 {
        match self {
            BtcNetwork::Mainnet => 0,
            _ => 1,
        }
    }
}

impl std::fmt::Display for BtcNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BtcNetwork::Mainnet => write!(f, "mainnet"),
            BtcNetwork::Testnet => write!(f, "testnet"),
            BtcNetwork::Regtest => write!(f, "regtest"),
            BtcNetwork::Signet => write!(f, "signet"),
        }
    }
}

impl FromStr for BtcNetwork {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "main" | "mainnet" | "bitcoin" => Ok(BtcNetwork::Mainnet),
            "test" | "testnet" => Ok(BtcNetwork::Testnet),
            "reg" | "regtest" => Ok(BtcNetwork::Regtest),
            "sig" | "signet" => Ok(BtcNetwork::Signet),
            other => Err(KeyError::InvalidNetwork(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_converts_to_bitcoin_network() {
        assert_eq!(BtcNetwork::Mainnet.to_bitcoin_network(), Network::Bitcoin);
    }

    #[test]
    fn regtest_converts_to_bitcoin_network() {
        assert_eq!(BtcNetwork::Regtest.to_bitcoin_network(), Network::Regtest);
    }

    #[test]
    fn only_mainnet_is_main_kind() {
        assert_eq!(BtcNetwork::Mainnet.kind(), NetworkKind::Main);
        assert_eq!(BtcNetwork::Testnet.kind(), NetworkKind::Test);
        assert_eq!(BtcNetwork::Regtest.kind(), NetworkKind::Test);
        assert_eq!(BtcNetwork::Signet.kind(), NetworkKind::Test);
    }

    #[test]
    fn display_names() {
        assert_eq!(BtcNetwork::Mainnet.to_string(), "mainnet");
        assert_eq!(BtcNetwork::Testnet.to_string(), "testnet");
        assert_eq!(BtcNetwork::Regtest.to_string(), "regtest");
        assert_eq!(BtcNetwork::Signet.to_string(), "signet");
    }

    #[test]
    fn parses_short_and_long_names() {
        assert_eq!("main".parse::<BtcNetwork>().unwrap(), BtcNetwork::Mainnet);
        assert_eq!("Testnet".parse::<BtcNetwork>().unwrap(), BtcNetwork::Testnet);
        assert_eq!("reg".parse::<BtcNetwork>().unwrap(), BtcNetwork::Regtest);
        assert!("litecoin".parse::<BtcNetwork>().is_err());
    }

    #[test]
    fn serde_accepts_aliases() {
        let net: BtcNetwork = serde_json::from_str("\"test\"").unwrap();
        assert_eq!(net, BtcNetwork::Testnet);
        assert_eq!(serde_json::to_string(&BtcNetwork::Signet).unwrap(), "\"signet\"");
    }
}
