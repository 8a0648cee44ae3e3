//! BIP174 / BIP370 key types.
//!
//! Keyed types carry key data after the type byte and may repeat within a
//! map (one partial signature per pubkey, for instance). All other types
//! must appear at most once, with empty key data.

/// Which of the three map kinds a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKind {
    Global,
    Input,
    Output,
}

/// Key type used by every map kind for proprietary records.
pub const PROPRIETARY: u8 = 0xfc;

pub mod global {
    /// v0 only; forbidden in v2.
    pub const UNSIGNED_TX: u8 = 0x00;
    pub const XPUB: u8 = 0x01;
    pub const TX_VERSION: u8 = 0x02;
    pub const FALLBACK_LOCKTIME: u8 = 0x03;
    pub const INPUT_COUNT: u8 = 0x04;
    pub const OUTPUT_COUNT: u8 = 0x05;
    pub const TX_MODIFIABLE: u8 = 0x06;
    pub const VERSION: u8 = 0xfb;
    pub const PROPRIETARY: u8 = super::PROPRIETARY;
}

pub mod input {
    pub const NON_WITNESS_UTXO: u8 = 0x00;
    pub const WITNESS_UTXO: u8 = 0x01;
    pub const PARTIAL_SIG: u8 = 0x02;
    pub const SIGHASH_TYPE: u8 = 0x03;
    pub const REDEEM_SCRIPT: u8 = 0x04;
    pub const WITNESS_SCRIPT: u8 = 0x05;
    pub const BIP32_DERIVATION: u8 = 0x06;
    pub const FINAL_SCRIPTSIG: u8 = 0x07;
    pub const FINAL_SCRIPTWITNESS: u8 = 0x08;
    pub const POR_COMMITMENT: u8 = 0x09;
    pub const RIPEMD160: u8 = 0x0a;
    pub const SHA256: u8 = 0x0b;
    pub const HASH160: u8 = 0x0c;
    pub const HASH256: u8 = 0x0d;
    pub const PREVIOUS_TXID: u8 = 0x0e;
    pub const OUTPUT_INDEX: u8 = 0x0f;
    pub const SEQUENCE: u8 = 0x10;
    pub const REQUIRED_TIME_LOCKTIME: u8 = 0x11;
    pub const REQUIRED_HEIGHT_LOCKTIME: u8 = 0x12;
    pub const TAP_KEY_SIG: u8 = 0x13;
    pub const TAP_SCRIPT_SIG: u8 = 0x14;
    pub const TAP_LEAF_SCRIPT: u8 = 0x15;
    pub const TAP_BIP32_DERIVATION: u8 = 0x16;
    pub const TAP_INTERNAL_KEY: u8 = 0x17;
    pub const TAP_MERKLE_ROOT: u8 = 0x18;
    pub const PROPRIETARY: u8 = super::PROPRIETARY;
}

pub mod output {
    pub const REDEEM_SCRIPT: u8 = 0x00;
    pub const WITNESS_SCRIPT: u8 = 0x01;
    pub const BIP32_DERIVATION: u8 = 0x02;
    pub const AMOUNT: u8 = 0x03;
    pub const SCRIPT: u8 = 0x04;
    pub const TAP_INTERNAL_KEY: u8 = 0x05;
    pub const TAP_TREE: u8 = 0x06;
    pub const TAP_BIP32_DERIVATION: u8 = 0x07;
    pub const PROPRIETARY: u8 = super::PROPRIETARY;
}

/// Whether `key_type` is defined with key data in maps of `kind`.
///
/// Unknown types are treated as keyed so they survive a round trip.
pub fn is_keyed(kind: MapKind, key_type: u8) -> bool {
    match kind {
        MapKind::Global => !matches!(
            key_type,
            global::UNSIGNED_TX
                | global::TX_VERSION
                | global::FALLBACK_LOCKTIME
                | global::INPUT_COUNT
                | global::OUTPUT_COUNT
                | global::TX_MODIFIABLE
                | global::VERSION
        ),
        MapKind::Input => !matches!(
            key_type,
            input::NON_WITNESS_UTXO
                | input::WITNESS_UTXO
                | input::SIGHASH_TYPE
                | input::REDEEM_SCRIPT
                | input::WITNESS_SCRIPT
                | input::FINAL_SCRIPTSIG
                | input::FINAL_SCRIPTWITNESS
                | input::POR_COMMITMENT
                | input::PREVIOUS_TXID
                | input::OUTPUT_INDEX
                | input::SEQUENCE
                | input::REQUIRED_TIME_LOCKTIME
                | input::REQUIRED_HEIGHT_LOCKTIME
                | input::TAP_KEY_SIG
                | input::TAP_INTERNAL_KEY
                | input::TAP_MERKLE_ROOT
        ),
        MapKind::Output => !matches!(
            key_type,
            output::REDEEM_SCRIPT
                | output::WITNESS_SCRIPT
                | output::AMOUNT
                | output::SCRIPT
                | output::TAP_INTERNAL_KEY
                | output::TAP_TREE
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_unique_types_are_keyed() {
        assert!(is_keyed(MapKind::Global, global::XPUB));
        assert!(is_keyed(MapKind::Input, input::PARTIAL_SIG));
        assert!(is_keyed(MapKind::Input, input::BIP32_DERIVATION));
        assert!(is_keyed(MapKind::Input, input::TAP_LEAF_SCRIPT));
        assert!(is_keyed(MapKind::Output, output::TAP_BIP32_DERIVATION));
        assert!(is_keyed(MapKind::Output, PROPRIETARY));
    }

    #[test]
    fn singular_types_are_not_keyed() {
        assert!(!is_keyed(MapKind::Global, global::VERSION));
        assert!(!is_keyed(MapKind::Input, input::PREVIOUS_TXID));
        assert!(!is_keyed(MapKind::Output, output::AMOUNT));
    }

    #[test]
    fn same_byte_means_different_things_per_map() {
        // 0x02 is the tx version globally but keyed partial sigs on inputs.
        assert!(!is_keyed(MapKind::Global, 0x02));
        assert!(is_keyed(MapKind::Input, 0x02));
        assert!(is_keyed(MapKind::Output, 0x02));
    }
}
