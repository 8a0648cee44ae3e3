//! Glue between multisig wallet configuration and PSBT v2 construction.

pub mod config;
pub mod error;
pub mod formatter;

pub use config::{Quorum, WalletConfig, WalletKey, CHANGE_BRAID_INDEX, RECEIVE_BRAID_INDEX};
pub use error::CoordinatorError;
pub use formatter::{
    bip32_derivations, build_unsigned_psbt, global_xpubs, input_args, output_args, PsbtInputSource,
    PsbtOutputTarget, DEFAULT_SEQUENCE,
};
