use std::fmt;

/// PSBT_GLOBAL_TX_MODIFIABLE bit field.
///
/// Unknown bits are carried through unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TxModifiable(u8);

const SIGHASH_ANYONECANPAY: u8 = 0x80;
const SIGHASH_BASE_MASK: u8 = 0x1f;
const SIGHASH_NONE: u8 = 0x02;
const SIGHASH_SINGLE: u8 = 0x03;

impl TxModifiable {
    pub const INPUTS: TxModifiable = TxModifiable(0b001);
    pub const OUTPUTS: TxModifiable = TxModifiable(0b010);
    pub const SIGHASH_SINGLE: TxModifiable = TxModifiable(0b100);

    pub const fn empty() -> Self {
        TxModifiable(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        TxModifiable(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: TxModifiable) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: TxModifiable) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: TxModifiable) {
        self.0 &= !other.0;
    }

    pub fn inputs_modifiable(self) -> bool {
        self.contains(Self::INPUTS)
    }

    pub fn outputs_modifiable(self) -> bool {
        self.contains(Self::OUTPUTS)
    }

    pub fn has_sighash_single(self) -> bool {
        self.contains(Self::SIGHASH_SINGLE)
    }

    /// Flags after a signature committing with `sighash` is added.
    ///
    /// Without ANYONECANPAY the input set is committed. Any base type but
    /// NONE commits outputs, and SINGLE pairs an input with its output.
    pub fn after_signature(self, sighash: u8) -> Self {
        let mut flags = self;
        let base = sighash & SIGHASH_BASE_MASK;
        if sighash & SIGHASH_ANYONECANPAY == 0 {
            flags.remove(Self::INPUTS);
        }
        if base != SIGHASH_NONE {
            flags.remove(Self::OUTPUTS);
        }
        if base == SIGHASH_SINGLE {
            flags.insert(Self::SIGHASH_SINGLE);
        }
        flags
    }
}

impl std::ops::BitOr for TxModifiable {
    type Output = TxModifiable;

    fn bitor(self, rhs: TxModifiable) -> TxModifiable {
        TxModifiable(self.0 | rhs.0)
    }
}

impl fmt::Display for TxModifiable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.inputs_modifiable() {
            names.push("INPUTS");
        }
        if self.outputs_modifiable() {
            names.push("OUTPUTS");
        }
        if self.has_sighash_single() {
            names.push("SIGHASH_SINGLE");
        }
        if names.is_empty() {
            f.write_str("NONE")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}
