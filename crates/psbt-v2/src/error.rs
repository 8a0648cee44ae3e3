use thiserror::Error;

/// PSBT parsing, validation and mutation errors.
#[derive(Debug, Error)]
pub enum PsbtError {
    #[error("malformed psbt: {0}")]
    MalformedPsbt(String),

    #[error("invalid psbt state: {0}")]
    InvalidState(String),

    #[error("psbt is not modifiable: {0}")]
    NotModifiable(String),

    #[error("input {input} already has a signature for pubkey {pubkey}")]
    DuplicateSignature { input: usize, pubkey: String },

    #[error("input {0} does not exist")]
    MissingInput(usize),

    #[error("output {0} does not exist")]
    MissingOutput(usize),

    #[error("input {input} has no signature for pubkey {pubkey}")]
    UnknownPubkey { input: usize, pubkey: String },

    #[error("input lock requirements do not determine an nLockTime")]
    IndeterminateLocktime,

    #[error("encoding error: {0}")]
    Encoding(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_malformed() {
        let err = PsbtError::MalformedPsbt("bad magic".into());
        assert_eq!(err.to_string(), "malformed psbt: bad magic");
    }

    #[test]
    fn display_duplicate_signature() {
        let err = PsbtError::DuplicateSignature { input: 1, pubkey: "02ab".into() };
        assert_eq!(err.to_string(), "input 1 already has a signature for pubkey 02ab");
    }

    #[test]
    fn display_missing_input() {
        assert_eq!(PsbtError::MissingInput(3).to_string(), "input 3 does not exist");
    }

    #[test]
    fn display_indeterminate_locktime() {
        assert_eq!(
            PsbtError::IndeterminateLocktime.to_string(),
            "input lock requirements do not determine an nLockTime"
        );
    }

    #[test]
    fn debug_format_works() {
        let debug = format!("{:?}", PsbtError::NotModifiable("inputs".into()));
        assert!(debug.contains("NotModifiable"));
    }
}
