use hd_keys::KeyError;
use thiserror::Error;

/// Braid derivation and multisig script construction errors.
#[derive(Debug, Error)]
pub enum MultisigError {
    #[error("path {path} is outside braid index {index}")]
    BraidPathMismatch { index: u32, path: String },

    #[error("unsupported address type: {0}")]
    UnsupportedAddressType(String),

    #[error("invalid quorum: {0}")]
    InvalidQuorum(String),

    #[error("invalid multisig script: {0}")]
    InvalidScript(String),

    #[error("network mismatch: {0}")]
    NetworkMismatch(String),

    #[error("invalid braid config: {0}")]
    InvalidConfig(String),

    #[error("address error: {0}")]
    Address(String),

    #[error("key error: {0}")]
    Key(#[from] KeyError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_braid_path_mismatch() {
        let err = MultisigError::BraidPathMismatch { index: 0, path: "1/4".into() };
        assert_eq!(err.to_string(), "path 1/4 is outside braid index 0");
    }

    #[test]
    fn display_unsupported_address_type() {
        let err = MultisigError::UnsupportedAddressType("P2TR".into());
        assert_eq!(err.to_string(), "unsupported address type: P2TR");
    }

    #[test]
    fn key_errors_convert() {
        let err: MultisigError = KeyError::InvalidPath("x".into()).into();
        assert_eq!(err.to_string(), "key error: invalid bip32 path: x");
    }
}
