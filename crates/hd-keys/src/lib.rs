//! Extended public key handling for multisig coordination.
//!
//! Decodes and re-encodes BIP32 extended public keys under every common
//! version prefix, parses derivation paths, computes fingerprints, and
//! derives unhardened children.

pub mod error;
pub mod key_material;
pub mod network;
pub mod path;
pub mod pubkey;
pub mod version;

pub use error::KeyError;
pub use key_material::{ExtendedKeyParts, KeyMaterial};
pub use network::BtcNetwork;
pub use path::Bip32Path;
pub use version::ExtendedKeyVersion;
