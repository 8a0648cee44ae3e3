use hd_keys::KeyError;
use multisig::MultisigError;
use psbt_v2::PsbtError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid wallet config: {0}")]
    InvalidConfig(String),

    #[error("multisig: {0}")]
    Multisig(MultisigError),

    #[error("psbt: {0}")]
    Psbt(PsbtError),
}

impl From<MultisigError> for CoordinatorError {
    fn from(e: MultisigError) -> Self {
        CoordinatorError::Multisig(e)
    }
}

impl From<KeyError> for CoordinatorError {
    fn from(e: KeyError) -> Self {
        CoordinatorError::Multisig(MultisigError::Key(e))
    }
}

impl From<PsbtError> for CoordinatorError {
    fn from(e: PsbtError) -> Self {
        CoordinatorError::Psbt(e)
    }
}

impl From<serde_json::Error> for CoordinatorError {
    fn from(e: serde_json::Error) -> Self {
        CoordinatorError::InvalidConfig(format!("json: {e}"))
    }
}
