//! BIP174 / BIP370 partially signed transactions, version 2.
//!
//! [`RawPsbt`] is the byte-exact map layer; [`PsbtV2`] adds typed fields,
//! the TX_MODIFIABLE state machine and v0 import on top of it.

pub mod codec;
pub mod error;
pub mod keys;
mod legacy;
pub mod locktime;
pub mod map;
pub mod modifiable;
pub mod psbt;
pub mod types;

pub use codec::{decode_psbt_bytes, psbt_version_number, PsbtFormat, RawPsbt, PSBT_MAGIC};
pub use error::PsbtError;
pub use keys::MapKind;
pub use locktime::LOCKTIME_THRESHOLD;
pub use map::{KeyValueMap, MapEntry};
pub use modifiable::TxModifiable;
pub use psbt::{MapRef, PsbtV2, VersionUpdate};
pub use types::{Bip32Derivation, GlobalXpub, InputArgs, OutputArgs, PartialSig, ProprietaryKey};
