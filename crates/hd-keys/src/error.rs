use thiserror::Error;

/// Extended key and derivation path errors.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid extended key: {0}")]
    InvalidExtendedKey(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid bip32 path: {0}")]
    InvalidPath(String),

    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("unknown extended key version: {0}")]
    UnknownVersion(String),

    #[error("network mismatch: {0}")]
    NetworkMismatch(String),

    #[error("cannot derive hardened child {0} from a public key")]
    HardenedDerivation(String),

    #[error("derivation failed: {0}")]
    DerivationFailed(String),

    #[error("invalid network: {0}")]
    InvalidNetwork(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_invalid_extended_key() {
        let err = KeyError::InvalidExtendedKey("bad checksum".into());
        assert_eq!(err.to_string(), "invalid extended key: bad checksum");
    }

    #[test]
    fn display_invalid_path() {
        let err = KeyError::InvalidPath("m/x".into());
        assert_eq!(err.to_string(), "invalid bip32 path: m/x");
    }

    #[test]
    fn display_hardened_derivation() {
        let err = KeyError::HardenedDerivation("0'".into());
        assert_eq!(
            err.to_string(),
            "cannot derive hardened child 0' from a public key"
        );
    }

    #[test]
    fn display_network_mismatch() {
        let err = KeyError::NetworkMismatch("tpub on mainnet".into());
        assert_eq!(err.to_string(), "network mismatch: tpub on mainnet");
    }

    #[test]
    fn error_trait_is_implemented() {
        let err: Box<dyn std::error::Error> = Box::new(KeyError::InvalidPublicKey("test".into()));
        assert!(err.to_string().contains("test"));
    }
}
