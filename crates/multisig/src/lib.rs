//! Multisig braids and scripts.
//!
//! A [`Braid`] derives the cosigner keys for one wallet branch; the
//! [`script_builder`] turns an ordered key set into the redeem/witness
//! script, locking script and address for an address type.

pub mod address_type;
pub mod braid;
pub mod error;
pub mod script_builder;

pub use address_type::MultisigAddressType;
pub use braid::{Braid, BraidConfig, DerivationRecord, DerivedKeys, ExtendedKeyConfig};
pub use error::MultisigError;
pub use script_builder::{classify, BraidOrigin, Multisig};
