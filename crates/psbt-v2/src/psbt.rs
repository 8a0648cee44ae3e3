use std::fmt;
use std::str::FromStr;

use bitcoin::consensus::{deserialize, serialize};
use bitcoin::hashes::Hash;
use bitcoin::{Amount, ScriptBuf, Transaction, TxOut, Txid, Witness};
use tracing::{debug, warn};

use crate::codec::{
    self, compact_size_bytes, parse_compact_size, read_i32_le, read_i64_le, read_u32_le, PsbtFormat, RawPsbt,
};
use crate::error::PsbtError;
use crate::keys::{self, global, input, output, MapKind};
use crate::locktime::{self, LockRequirement};
use crate::map::{KeyValueMap, MapEntry};
use crate::modifiable::TxModifiable;
use crate::types::{
    decode_key_origin, encode_key_origin, Bip32Derivation, GlobalXpub, InputArgs, OutputArgs, PartialSig, ProprietaryKey,
};

pub const PSBT_VERSION_2: u32 = 2;
pub const DEFAULT_TX_VERSION: i32 = 2;

const XPUB_LEN: usize = 78;

/// Outcome of [`PsbtV2::set_psbt_version`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionUpdate {
    Accepted,
    /// The requested value was below 2 and 2 was stored instead.
    Coerced { requested: u32 },
}

/// Addresses one of the maps of a PSBT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapRef {
    Global,
    Input(usize),
    Output(usize),
}

impl MapRef {
    pub fn kind(self) -> MapKind {
        match self {
            MapRef::Global => MapKind::Global,
            MapRef::Input(_) => MapKind::Input,
            MapRef::Output(_) => MapKind::Output,
        }
    }
}

/// A BIP370 PSBT with typed accessors over its raw maps.
///
/// Every mutation keeps the global input/output counts equal to the number
/// of input/output maps. Structural changes are re-validated and rolled
/// back when validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsbtV2 {
    pub(crate) raw: RawPsbt,
    pub(crate) non_standard: bool,
}

impl Default for PsbtV2 {
    fn default() -> Self {
        Self::create()
    }
}

impl PsbtV2 {
    /// Creator role: an empty PSBT with inputs and outputs modifiable.
    pub fn create() -> Self {
        let mut global = KeyValueMap::new();
        global.insert(global::TX_VERSION, DEFAULT_TX_VERSION.to_le_bytes().to_vec());
        global.insert(global::FALLBACK_LOCKTIME, 0u32.to_le_bytes().to_vec());
        global.insert(global::INPUT_COUNT, compact_size_bytes(0));
        global.insert(global::OUTPUT_COUNT, compact_size_bytes(0));
        global.insert(
            global::TX_MODIFIABLE,
            vec![(TxModifiable::INPUTS | TxModifiable::OUTPUTS).bits()],
        );
        global.insert(global::VERSION, PSBT_VERSION_2.to_le_bytes().to_vec());
        Self {
            raw: RawPsbt { global, inputs: Vec::new(), outputs: Vec::new() },
            non_standard: false,
        }
    }

    /// Parse raw bytes, or hex / base64 text.
    pub fn parse(input: impl AsRef<[u8]>) -> Result<Self, PsbtError> {
        Self::parse_with(input, false)
    }

    /// Like [`PsbtV2::parse`], but a tx version of 1 is accepted when
    /// `allow_tx_version_1` is set and the result is marked non-standard.
    pub fn parse_with(input: impl AsRef<[u8]>, allow_tx_version_1: bool) -> Result<Self, PsbtError> {
        let bytes = codec::decode_psbt_bytes(input.as_ref())?;
        let raw = RawPsbt::parse(&bytes)?;

        if raw.global.contains(global::UNSIGNED_TX) {
            return Err(PsbtError::MalformedPsbt(
                "unsigned transaction record is not allowed in psbt v2".into(),
            ));
        }
        for (key_type, name) in [
            (global::VERSION, "psbt version"),
            (global::TX_VERSION, "tx version"),
            (global::INPUT_COUNT, "input count"),
            (global::OUTPUT_COUNT, "output count"),
        ] {
            if !raw.global.contains(key_type) {
                return Err(PsbtError::MalformedPsbt(format!("missing required global {name}")));
            }
        }
        check_singular_key_data(&raw)?;

        let mut psbt = Self { raw, non_standard: false };
        let version = psbt.psbt_version()?;
        if version > PSBT_VERSION_2 {
            return Err(PsbtError::MalformedPsbt(format!("unsupported psbt version {version}")));
        }
        if version < PSBT_VERSION_2 {
            psbt.set_psbt_version(version)?;
        }
        if allow_tx_version_1 && psbt.tx_version()? == 1 {
            warn!("accepting tx version 1, psbt is non-standard");
            psbt.non_standard = true;
        }
        psbt.validate()?;
        debug!(
            inputs = psbt.input_count(),
            outputs = psbt.output_count(),
            non_standard = psbt.non_standard,
            "parsed psbt v2"
        );
        Ok(psbt)
    }

    pub fn from_hex(text: &str) -> Result<Self, PsbtError> {
        Self::parse(codec::decode_hex(text)?)
    }

    pub fn from_base64(text: &str) -> Result<Self, PsbtError> {
        Self::parse(codec::decode_base64(text)?)
    }

    pub fn serialize(&self) -> Vec<u8> {
        debug!(
            inputs = self.input_count(),
            outputs = self.output_count(),
            "serializing psbt v2"
        );
        self.raw.serialize()
    }

    pub fn to_hex(&self) -> String {
        codec::encode_hex(&self.serialize())
    }

    pub fn to_base64(&self) -> String {
        codec::encode_base64(&self.serialize())
    }

    pub fn serialize_as(&self, format: PsbtFormat) -> String {
        match format {
            PsbtFormat::Hex => self.to_hex(),
            PsbtFormat::Base64 => self.to_base64(),
        }
    }

    /// Overwrite `target` with a deep copy of this PSBT's maps.
    ///
    /// No validation runs; the copy shares nothing with `self`.
    pub fn copy_unchecked(&self, target: &mut PsbtV2) {
        target.raw = self.raw.clone();
        target.non_standard = self.non_standard;
    }

    pub fn raw(&self) -> &RawPsbt {
        &self.raw
    }

    /// True after a version-1 transaction was allowed in.
    pub fn is_non_standard(&self) -> bool {
        self.non_standard
    }

    // ─── Global fields ───────────────────────────────────────────────

    /// PSBT_GLOBAL_VERSION, 0 when absent.
    pub fn psbt_version(&self) -> Result<u32, PsbtError> {
        match self.raw.global.get(global::VERSION) {
            Some(value) => read_u32_le(value, "psbt version"),
            None => Ok(0),
        }
    }

    /// Set PSBT_GLOBAL_VERSION. Values below 2 are stored as 2; values
    /// above 2 are refused.
    pub fn set_psbt_version(&mut self, version: u32) -> Result<VersionUpdate, PsbtError> {
        let update = match version {
            PSBT_VERSION_2 => VersionUpdate::Accepted,
            v if v < PSBT_VERSION_2 => {
                warn!(requested = version, "psbt version below 2, storing 2");
                VersionUpdate::Coerced { requested: version }
            }
            v => return Err(PsbtError::InvalidState(format!("unsupported psbt version {v}"))),
        };
        self.raw.global.insert(global::VERSION, PSBT_VERSION_2.to_le_bytes().to_vec());
        Ok(update)
    }

    pub fn tx_version(&self) -> Result<i32, PsbtError> {
        let value = self
            .raw
            .global
            .get(global::TX_VERSION)
            .ok_or_else(|| PsbtError::InvalidState("missing tx version".into()))?;
        read_i32_le(value, "tx version")
    }

    pub fn set_tx_version(&mut self, version: i32) -> Result<(), PsbtError> {
        if version < DEFAULT_TX_VERSION {
            return Err(PsbtError::InvalidState(format!("tx version {version} is below 2")));
        }
        self.raw.global.insert(global::TX_VERSION, version.to_le_bytes().to_vec());
        self.non_standard = false;
        Ok(())
    }

    /// Store tx version 1 and mark the PSBT non-standard.
    pub fn dangerously_set_tx_version_1(&mut self) {
        warn!("setting tx version 1, psbt is now non-standard");
        self.raw.global.insert(global::TX_VERSION, 1i32.to_le_bytes().to_vec());
        self.non_standard = true;
    }

    pub fn fallback_locktime(&self) -> Result<Option<u32>, PsbtError> {
        self.raw
            .global
            .get(global::FALLBACK_LOCKTIME)
            .map(|v| read_u32_le(v, "fallback locktime"))
            .transpose()
    }

    pub fn set_fallback_locktime(&mut self, locktime: Option<u32>) {
        match locktime {
            Some(value) => {
                self.raw.global.insert(global::FALLBACK_LOCKTIME, value.to_le_bytes().to_vec());
            }
            None => {
                self.raw.global.remove(global::FALLBACK_LOCKTIME);
            }
        }
    }

    pub fn input_count(&self) -> usize {
        self.raw.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.raw.outputs.len()
    }

    /// PSBT_GLOBAL_TX_MODIFIABLE; absent means nothing is modifiable.
    pub fn tx_modifiable(&self) -> TxModifiable {
        let bits = self
            .raw
            .global
            .get(global::TX_MODIFIABLE)
            .and_then(|v| v.first().copied())
            .unwrap_or(0);
        TxModifiable::from_bits(bits)
    }

    pub fn set_tx_modifiable(&mut self, flags: TxModifiable) {
        self.raw.global.insert(global::TX_MODIFIABLE, vec![flags.bits()]);
    }

    pub fn global_xpubs(&self) -> Result<Vec<GlobalXpub>, PsbtError> {
        self.raw
            .global
            .entries(global::XPUB)
            .iter()
            .map(|entry| {
                if entry.key_data.len() != XPUB_LEN {
                    return Err(PsbtError::MalformedPsbt(format!(
                        "global xpub key must be {XPUB_LEN} bytes, got {}",
                        entry.key_data.len()
                    )));
                }
                let (master_fingerprint, path) = decode_key_origin(&entry.value)?;
                Ok(GlobalXpub { xpub: entry.key_data.clone(), master_fingerprint, path })
            })
            .collect()
    }

    pub fn add_global_xpub(&mut self, xpub: &GlobalXpub) -> Result<(), PsbtError> {
        if xpub.xpub.len() != XPUB_LEN {
            return Err(PsbtError::InvalidState(format!(
                "global xpub must be {XPUB_LEN} bytes, got {}",
                xpub.xpub.len()
            )));
        }
        self.raw.global.insert_keyed(
            global::XPUB,
            xpub.xpub.clone(),
            encode_key_origin(&xpub.master_fingerprint, &xpub.path),
        );
        Ok(())
    }

    // ─── Generic record access ───────────────────────────────────────

    pub fn map(&self, map: MapRef) -> Result<&KeyValueMap, PsbtError> {
        match map {
            MapRef::Global => Ok(&self.raw.global),
            MapRef::Input(index) => self.input(index),
            MapRef::Output(index) => self.output(index),
        }
    }

    fn map_mut(&mut self, map: MapRef) -> Result<&mut KeyValueMap, PsbtError> {
        match map {
            MapRef::Global => Ok(&mut self.raw.global),
            MapRef::Input(index) => self.input_mut(index),
            MapRef::Output(index) => self.output_mut(index),
        }
    }

    /// Records of `key_type` in one map (preimages, taproot fields, ...).
    pub fn records(&self, map: MapRef, key_type: u8) -> Result<&[MapEntry], PsbtError> {
        Ok(self.map(map)?.entries(key_type))
    }

    /// Set an arbitrary record, re-validating afterwards.
    ///
    /// Counts, versions, modifiable flags and partial signatures have their
    /// own operations and are refused here.
    pub fn set_record(
        &mut self,
        map: MapRef,
        key_type: u8,
        key_data: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<(), PsbtError> {
        let kind = map.kind();
        if is_managed(kind, key_type) {
            return Err(PsbtError::InvalidState(format!(
                "{kind:?} key type {key_type:#04x} has a dedicated operation"
            )));
        }
        if !keys::is_keyed(kind, key_type) && !key_data.is_empty() {
            return Err(PsbtError::InvalidState(format!(
                "{kind:?} key type {key_type:#04x} takes no key data"
            )));
        }
        self.mutate_validated(map, |m| {
            m.insert_keyed(key_type, key_data, value);
        })
    }

    pub fn remove_record(&mut self, map: MapRef, key_type: u8, key_data: &[u8]) -> Result<Option<Vec<u8>>, PsbtError> {
        if is_managed(map.kind(), key_type) {
            return Err(PsbtError::InvalidState(format!(
                "{:?} key type {key_type:#04x} has a dedicated operation",
                map.kind()
            )));
        }
        let mut removed = None;
        self.mutate_validated(map, |m| removed = m.remove_keyed(key_type, key_data))?;
        Ok(removed)
    }

    pub fn proprietary(&self, map: MapRef) -> Result<Vec<(ProprietaryKey, Vec<u8>)>, PsbtError> {
        self.map(map)?
            .entries(keys::PROPRIETARY)
            .iter()
            .map(|entry| Ok((ProprietaryKey::decode(&entry.key_data)?, entry.value.clone())))
            .collect()
    }

    pub fn set_proprietary(&mut self, map: MapRef, key: &ProprietaryKey, value: Vec<u8>) -> Result<(), PsbtError> {
        self.map_mut(map)?
            .insert_keyed(keys::PROPRIETARY, key.encode(), value);
        Ok(())
    }

    fn mutate_validated(
        &mut self,
        map: MapRef,
        change: impl FnOnce(&mut KeyValueMap),
    ) -> Result<(), PsbtError> {
        let target = self.map_mut(map)?;
        let before = target.clone();
        change(target);
        if let Err(err) = self.validate() {
            *self.map_mut(map)? = before;
            return Err(err);
        }
        Ok(())
    }

    // ─── Inputs ──────────────────────────────────────────────────────

    fn input(&self, index: usize) -> Result<&KeyValueMap, PsbtError> {
        self.raw.inputs.get(index).ok_or(PsbtError::MissingInput(index))
    }

    fn input_mut(&mut self, index: usize) -> Result<&mut KeyValueMap, PsbtError> {
        self.raw.inputs.get_mut(index).ok_or(PsbtError::MissingInput(index))
    }

    pub fn previous_txid(&self, index: usize) -> Result<Txid, PsbtError> {
        let value = self
            .input(index)?
            .get(input::PREVIOUS_TXID)
            .ok_or_else(|| PsbtError::InvalidState(format!("input {index} is missing its previous txid")))?;
        let bytes: [u8; 32] = value.try_into().map_err(|_| {
            PsbtError::MalformedPsbt(format!("input {index} previous txid must be 32 bytes"))
        })?;
        Ok(Txid::from_byte_array(bytes))
    }

    pub fn output_index(&self, index: usize) -> Result<u32, PsbtError> {
        let value = self
            .input(index)?
            .get(input::OUTPUT_INDEX)
            .ok_or_else(|| PsbtError::InvalidState(format!("input {index} is missing its output index")))?;
        read_u32_le(value, "output index")
    }

    pub fn sequence(&self, index: usize) -> Result<Option<u32>, PsbtError> {
        self.input_u32(index, input::SEQUENCE, "sequence")
    }

    pub fn set_input_sequence(&mut self, index: usize, sequence: u32) -> Result<(), PsbtError> {
        self.input_mut(index)?
            .insert(input::SEQUENCE, sequence.to_le_bytes().to_vec());
        Ok(())
    }

    pub fn required_time_locktime(&self, index: usize) -> Result<Option<u32>, PsbtError> {
        self.input_u32(index, input::REQUIRED_TIME_LOCKTIME, "required time locktime")
    }

    pub fn set_input_required_time_locktime(&mut self, index: usize, locktime: Option<u32>) -> Result<(), PsbtError> {
        if let Some(value) = locktime {
            locktime::check_time_locktime(value)?;
        }
        self.set_input_optional_u32(index, input::REQUIRED_TIME_LOCKTIME, locktime)
    }

    pub fn required_height_locktime(&self, index: usize) -> Result<Option<u32>, PsbtError> {
        self.input_u32(index, input::REQUIRED_HEIGHT_LOCKTIME, "required height locktime")
    }

    pub fn set_input_required_height_locktime(&mut self, index: usize, locktime: Option<u32>) -> Result<(), PsbtError> {
        if let Some(value) = locktime {
            locktime::check_height_locktime(value)?;
        }
        self.set_input_optional_u32(index, input::REQUIRED_HEIGHT_LOCKTIME, locktime)
    }

    pub fn sighash_type(&self, index: usize) -> Result<Option<u32>, PsbtError> {
        self.input_u32(index, input::SIGHASH_TYPE, "sighash type")
    }

    pub fn set_input_sighash_type(&mut self, index: usize, sighash: u32) -> Result<(), PsbtError> {
        self.input_mut(index)?
            .insert(input::SIGHASH_TYPE, sighash.to_le_bytes().to_vec());
        Ok(())
    }

    pub fn non_witness_utxo(&self, index: usize) -> Result<Option<Transaction>, PsbtError> {
        self.input(index)?
            .get(input::NON_WITNESS_UTXO)
            .map(|bytes| {
                deserialize(bytes).map_err(|e| PsbtError::MalformedPsbt(format!("input {index} non-witness utxo: {e}")))
            })
            .transpose()
    }

    /// The transaction must be the one the input spends from.
    pub fn set_input_non_witness_utxo(&mut self, index: usize, tx: &Transaction) -> Result<(), PsbtError> {
        check_previous_tx(tx, self.previous_txid(index)?, self.output_index(index)?)?;
        self.input_mut(index)?
            .insert(input::NON_WITNESS_UTXO, serialize(tx));
        Ok(())
    }

    pub fn witness_utxo(&self, index: usize) -> Result<Option<TxOut>, PsbtError> {
        self.input(index)?
            .get(input::WITNESS_UTXO)
            .map(|bytes| deserialize(bytes).map_err(|e| PsbtError::MalformedPsbt(format!("input {index} witness utxo: {e}"))))
            .transpose()
    }

    pub fn set_input_witness_utxo(&mut self, index: usize, utxo: &TxOut) -> Result<(), PsbtError> {
        self.input_mut(index)?
            .insert(input::WITNESS_UTXO, serialize(utxo));
        Ok(())
    }

    pub fn partial_sigs(&self, index: usize) -> Result<Vec<PartialSig>, PsbtError> {
        Ok(self
            .input(index)?
            .entries(input::PARTIAL_SIG)
            .iter()
            .map(|entry| PartialSig { pubkey: entry.key_data.clone(), signature: entry.value.clone() })
            .collect())
    }

    pub fn input_redeem_script(&self, index: usize) -> Result<Option<ScriptBuf>, PsbtError> {
        Ok(script_field(self.input(index)?, input::REDEEM_SCRIPT))
    }

    pub fn set_input_redeem_script(&mut self, index: usize, script: ScriptBuf) -> Result<(), PsbtError> {
        self.input_mut(index)?
            .insert(input::REDEEM_SCRIPT, script.into_bytes());
        Ok(())
    }

    pub fn input_witness_script(&self, index: usize) -> Result<Option<ScriptBuf>, PsbtError> {
        Ok(script_field(self.input(index)?, input::WITNESS_SCRIPT))
    }

    pub fn set_input_witness_script(&mut self, index: usize, script: ScriptBuf) -> Result<(), PsbtError> {
        self.input_mut(index)?
            .insert(input::WITNESS_SCRIPT, script.into_bytes());
        Ok(())
    }

    pub fn input_bip32_derivations(&self, index: usize) -> Result<Vec<Bip32Derivation>, PsbtError> {
        derivations(self.input(index)?, input::BIP32_DERIVATION)
    }

    pub fn add_input_bip32_derivation(&mut self, index: usize, derivation: &Bip32Derivation) -> Result<(), PsbtError> {
        check_pubkey(&derivation.pubkey)?;
        self.input_mut(index)?.insert_keyed(
            input::BIP32_DERIVATION,
            derivation.pubkey.clone(),
            derivation.encode_value(),
        );
        Ok(())
    }

    pub fn final_script_sig(&self, index: usize) -> Result<Option<ScriptBuf>, PsbtError> {
        Ok(script_field(self.input(index)?, input::FINAL_SCRIPTSIG))
    }

    pub fn set_input_final_script_sig(&mut self, index: usize, script: ScriptBuf) -> Result<(), PsbtError> {
        self.input_mut(index)?
            .insert(input::FINAL_SCRIPTSIG, script.into_bytes());
        Ok(())
    }

    pub fn final_script_witness(&self, index: usize) -> Result<Option<Witness>, PsbtError> {
        self.input(index)?
            .get(input::FINAL_SCRIPTWITNESS)
            .map(|bytes| deserialize(bytes).map_err(|e| PsbtError::MalformedPsbt(format!("input {index} final witness: {e}"))))
            .transpose()
    }

    pub fn set_input_final_script_witness(&mut self, index: usize, witness: &Witness) -> Result<(), PsbtError> {
        self.input_mut(index)?
            .insert(input::FINAL_SCRIPTWITNESS, serialize(witness));
        Ok(())
    }

    fn input_u32(&self, index: usize, key_type: u8, field: &str) -> Result<Option<u32>, PsbtError> {
        self.input(index)?
            .get(key_type)
            .map(|v| read_u32_le(v, field))
            .transpose()
    }

    fn set_input_optional_u32(&mut self, index: usize, key_type: u8, value: Option<u32>) -> Result<(), PsbtError> {
        let map = self.input_mut(index)?;
        match value {
            Some(v) => {
                map.insert(key_type, v.to_le_bytes().to_vec());
            }
            None => {
                map.remove(key_type);
            }
        }
        Ok(())
    }

    // ─── Outputs ─────────────────────────────────────────────────────

    fn output(&self, index: usize) -> Result<&KeyValueMap, PsbtError> {
        self.raw.outputs.get(index).ok_or(PsbtError::MissingOutput(index))
    }

    fn output_mut(&mut self, index: usize) -> Result<&mut KeyValueMap, PsbtError> {
        self.raw.outputs.get_mut(index).ok_or(PsbtError::MissingOutput(index))
    }

    pub fn output_amount(&self, index: usize) -> Result<Amount, PsbtError> {
        let value = self
            .output(index)?
            .get(output::AMOUNT)
            .ok_or_else(|| PsbtError::InvalidState(format!("output {index} is missing its amount")))?;
        let sats = read_i64_le(value, "amount")?;
        u64::try_from(sats)
            .map(Amount::from_sat)
            .map_err(|_| PsbtError::InvalidState(format!("output {index} has negative amount {sats}")))
    }

    pub fn output_script(&self, index: usize) -> Result<ScriptBuf, PsbtError> {
        script_field(self.output(index)?, output::SCRIPT)
            .ok_or_else(|| PsbtError::InvalidState(format!("output {index} is missing its script")))
    }

    pub fn output_redeem_script(&self, index: usize) -> Result<Option<ScriptBuf>, PsbtError> {
        Ok(script_field(self.output(index)?, output::REDEEM_SCRIPT))
    }

    pub fn set_output_redeem_script(&mut self, index: usize, script: ScriptBuf) -> Result<(), PsbtError> {
        self.output_mut(index)?
            .insert(output::REDEEM_SCRIPT, script.into_bytes());
        Ok(())
    }

    pub fn output_witness_script(&self, index: usize) -> Result<Option<ScriptBuf>, PsbtError> {
        Ok(script_field(self.output(index)?, output::WITNESS_SCRIPT))
    }

    pub fn set_output_witness_script(&mut self, index: usize, script: ScriptBuf) -> Result<(), PsbtError> {
        self.output_mut(index)?
            .insert(output::WITNESS_SCRIPT, script.into_bytes());
        Ok(())
    }

    pub fn output_bip32_derivations(&self, index: usize) -> Result<Vec<Bip32Derivation>, PsbtError> {
        derivations(self.output(index)?, output::BIP32_DERIVATION)
    }

    pub fn add_output_bip32_derivation(&mut self, index: usize, derivation: &Bip32Derivation) -> Result<(), PsbtError> {
        check_pubkey(&derivation.pubkey)?;
        self.output_mut(index)?.insert_keyed(
            output::BIP32_DERIVATION,
            derivation.pubkey.clone(),
            derivation.encode_value(),
        );
        Ok(())
    }

    // ─── Constructor ─────────────────────────────────────────────────

    /// Append an input; returns its index.
    pub fn add_input(&mut self, args: InputArgs) -> Result<usize, PsbtError> {
        if !self.tx_modifiable().inputs_modifiable() {
            return Err(PsbtError::NotModifiable("inputs cannot be added".into()));
        }
        let map = input_map(&args)?;
        self.raw.inputs.push(map);
        self.sync_counts();
        if let Err(err) = self.validate() {
            self.raw.inputs.pop();
            self.sync_counts();
            return Err(err);
        }
        Ok(self.raw.inputs.len() - 1)
    }

    /// Append an output; returns its index.
    pub fn add_output(&mut self, args: OutputArgs) -> Result<usize, PsbtError> {
        if !self.tx_modifiable().outputs_modifiable() {
            return Err(PsbtError::NotModifiable("outputs cannot be added".into()));
        }
        let map = output_map(&args)?;
        self.raw.outputs.push(map);
        self.sync_counts();
        Ok(self.raw.outputs.len() - 1)
    }

    pub fn delete_input(&mut self, index: usize) -> Result<(), PsbtError> {
        if !self.tx_modifiable().inputs_modifiable() {
            return Err(PsbtError::NotModifiable("inputs cannot be removed".into()));
        }
        self.input(index)?;
        self.raw.inputs.remove(index);
        self.sync_counts();
        Ok(())
    }

    /// Remove an output.
    ///
    /// Under SIGHASH_SINGLE modifiability the signatures of inputs at or
    /// after `index` committed to outputs that move, so they are dropped.
    pub fn delete_output(&mut self, index: usize) -> Result<(), PsbtError> {
        let flags = self.tx_modifiable();
        if !flags.outputs_modifiable() {
            return Err(PsbtError::NotModifiable("outputs cannot be removed".into()));
        }
        self.output(index)?;
        if flags.has_sighash_single() {
            for (i, map) in self.raw.inputs.iter_mut().enumerate().skip(index) {
                let dropped = map.remove(input::PARTIAL_SIG).len();
                if dropped > 0 {
                    debug!(input = i, dropped, "dropped sighash single signatures");
                }
            }
        }
        self.raw.outputs.remove(index);
        self.sync_counts();
        Ok(())
    }

    fn sync_counts(&mut self) {
        let inputs = self.raw.inputs.len() as u64;
        let outputs = self.raw.outputs.len() as u64;
        self.raw.global.insert(global::INPUT_COUNT, compact_size_bytes(inputs));
        self.raw.global.insert(global::OUTPUT_COUNT, compact_size_bytes(outputs));
    }

    // ─── Signer ──────────────────────────────────────────────────────

    /// Add a partial signature and collapse TX_MODIFIABLE accordingly.
    ///
    /// Either the signature and the flag change both land, or neither does.
    pub fn add_partial_sig(&mut self, index: usize, pubkey: &[u8], signature: &[u8]) -> Result<(), PsbtError> {
        let map = self.input(index)?;
        check_pubkey(pubkey)?;
        let Some(&sighash) = signature.last() else {
            return Err(PsbtError::InvalidState("signature is empty".into()));
        };
        if map.contains_keyed(input::PARTIAL_SIG, pubkey) {
            return Err(PsbtError::DuplicateSignature { input: index, pubkey: hex::encode(pubkey) });
        }

        let input_before = map.clone();
        let flags_before = self.raw.global.get(global::TX_MODIFIABLE).map(<[u8]>::to_vec);
        if let Err(err) = self.apply_partial_sig(index, pubkey, signature, sighash) {
            self.raw.inputs[index] = input_before;
            match flags_before {
                Some(bits) => {
                    self.raw.global.insert(global::TX_MODIFIABLE, bits);
                }
                None => {
                    self.raw.global.remove(global::TX_MODIFIABLE);
                }
            }
            return Err(err);
        }
        Ok(())
    }

    fn apply_partial_sig(&mut self, index: usize, pubkey: &[u8], signature: &[u8], sighash: u8) -> Result<(), PsbtError> {
        self.input_mut(index)?
            .insert_keyed(input::PARTIAL_SIG, pubkey.to_vec(), signature.to_vec());

        let before = self.tx_modifiable();
        let after = before.after_signature(sighash);
        if after != before {
            debug!(input = index, sighash, from = %before, to = %after, "collapsed tx modifiable flags");
            self.set_tx_modifiable(after);
        }

        if let Some(declared) = self.sighash_type(index)? {
            if declared != u32::from(sighash) {
                return Err(PsbtError::InvalidState(format!(
                    "signature sighash {sighash:#04x} does not match input {index} sighash type {declared:#04x}"
                )));
            }
        }
        self.validate()
    }

    /// Remove the signature for `pubkey`, or every signature when `None`.
    pub fn remove_partial_sig(&mut self, index: usize, pubkey: Option<&[u8]>) -> Result<(), PsbtError> {
        let map = self.input_mut(index)?;
        match pubkey {
            Some(pubkey) => map
                .remove_keyed(input::PARTIAL_SIG, pubkey)
                .map(|_| ())
                .ok_or_else(|| PsbtError::UnknownPubkey { input: index, pubkey: hex::encode(pubkey) }),
            None => {
                map.remove(input::PARTIAL_SIG);
                Ok(())
            }
        }
    }

    // ─── Validation ──────────────────────────────────────────────────

    pub fn validate(&self) -> Result<(), PsbtError> {
        let version = self.psbt_version()?;
        if version != PSBT_VERSION_2 {
            return Err(PsbtError::InvalidState(format!("psbt version {version} is not 2")));
        }
        let tx_version = self.tx_version()?;
        if tx_version < DEFAULT_TX_VERSION && !(self.non_standard && tx_version == 1) {
            return Err(PsbtError::InvalidState(format!("tx version {tx_version} is below 2")));
        }
        self.fallback_locktime()?;
        if let Some(bits) = self.raw.global.get(global::TX_MODIFIABLE) {
            if bits.len() != 1 {
                return Err(PsbtError::MalformedPsbt("tx modifiable must be 1 byte".into()));
            }
        }
        self.check_count(global::INPUT_COUNT, self.raw.inputs.len(), "input")?;
        self.check_count(global::OUTPUT_COUNT, self.raw.outputs.len(), "output")?;
        self.global_xpubs()?;

        for index in 0..self.raw.inputs.len() {
            self.previous_txid(index)?;
            self.output_index(index)?;
            self.sequence(index)?;
            self.sighash_type(index)?;
            if let Some(time) = self.required_time_locktime(index)? {
                locktime::check_time_locktime(time)?;
            }
            if let Some(height) = self.required_height_locktime(index)? {
                locktime::check_height_locktime(height)?;
            }
            self.non_witness_utxo(index)?;
            self.witness_utxo(index)?;
            self.input_bip32_derivations(index)?;
            self.final_script_witness(index)?;
        }
        for index in 0..self.raw.outputs.len() {
            self.output_amount(index)?;
            self.output_script(index)?;
            self.output_bip32_derivations(index)?;
        }
        Ok(())
    }

    fn check_count(&self, key_type: u8, actual: usize, name: &str) -> Result<(), PsbtError> {
        let declared = self
            .raw
            .global
            .get(key_type)
            .ok_or_else(|| PsbtError::InvalidState(format!("missing {name} count")))
            .and_then(parse_compact_size)?;
        if declared != actual as u64 {
            return Err(PsbtError::InvalidState(format!(
                "{name} count {declared} does not match {actual} {name} maps"
            )));
        }
        Ok(())
    }

    /// The nLockTime the finished transaction must carry.
    pub fn n_locktime(&self) -> Result<u32, PsbtError> {
        let requirements = (0..self.raw.inputs.len())
            .map(|index| {
                Ok(LockRequirement {
                    time: self.required_time_locktime(index)?,
                    height: self.required_height_locktime(index)?,
                })
            })
            .collect::<Result<Vec<_>, PsbtError>>()?;
        locktime::resolve_locktime(&requirements, self.fallback_locktime()?)
    }

    // ─── Role readiness ──────────────────────────────────────────────

    pub fn is_ready_for_constructor(&self) -> bool {
        matches!(self.fallback_locktime(), Ok(Some(_)))
            && self.tx_modifiable().contains(TxModifiable::INPUTS | TxModifiable::OUTPUTS)
    }

    pub fn is_ready_for_updater(&self) -> bool {
        matches!(self.tx_version(), Ok(v) if v >= DEFAULT_TX_VERSION)
            && self.validate().is_ok()
            && self.n_locktime().is_ok()
    }

    /// Every input carries the UTXO a signer needs to compute its sighash.
    pub fn is_ready_for_signer(&self) -> bool {
        self.is_ready_for_updater()
            && !self.raw.inputs.is_empty()
            && self
                .raw
                .inputs
                .iter()
                .all(|m| m.contains(input::WITNESS_UTXO) || m.contains(input::NON_WITNESS_UTXO))
    }

    pub fn is_ready_for_transaction_extractor(&self) -> bool {
        self.validate().is_ok()
            && self.n_locktime().is_ok()
            && !self.raw.inputs.is_empty()
            && self
                .raw
                .inputs
                .iter()
                .all(|m| m.contains(input::FINAL_SCRIPTSIG) || m.contains(input::FINAL_SCRIPTWITNESS))
    }
}

impl fmt::Display for PsbtV2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl FromStr for PsbtV2 {
    type Err = PsbtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s.as_bytes())
    }
}

fn is_managed(kind: MapKind, key_type: u8) -> bool {
    match kind {
        MapKind::Global => matches!(
            key_type,
            global::UNSIGNED_TX
                | global::TX_VERSION
                | global::INPUT_COUNT
                | global::OUTPUT_COUNT
                | global::TX_MODIFIABLE
                | global::VERSION
        ),
        MapKind::Input => key_type == input::PARTIAL_SIG,
        MapKind::Output => false,
    }
}

fn check_singular_key_data(raw: &RawPsbt) -> Result<(), PsbtError> {
    let maps = std::iter::once((MapKind::Global, &raw.global))
        .chain(raw.inputs.iter().map(|m| (MapKind::Input, m)))
        .chain(raw.outputs.iter().map(|m| (MapKind::Output, m)));
    for (kind, map) in maps {
        for (key_type, entry) in map.iter() {
            if !keys::is_keyed(kind, key_type) && !entry.key_data.is_empty() {
                return Err(PsbtError::MalformedPsbt(format!(
                    "{kind:?} key type {key_type:#04x} must not carry key data"
                )));
            }
        }
    }
    Ok(())
}

fn check_pubkey(pubkey: &[u8]) -> Result<(), PsbtError> {
    match pubkey.len() {
        33 | 65 => Ok(()),
        n => Err(PsbtError::InvalidState(format!("pubkey must be 33 or 65 bytes, got {n}"))),
    }
}

fn check_previous_tx(tx: &Transaction, txid: Txid, vout: u32) -> Result<(), PsbtError> {
    if tx.compute_txid() != txid {
        return Err(PsbtError::InvalidState(format!(
            "non-witness utxo {} does not match previous txid {txid}",
            tx.compute_txid()
        )));
    }
    if vout as usize >= tx.output.len() {
        return Err(PsbtError::InvalidState(format!(
            "output index {vout} is out of range for {} outputs",
            tx.output.len()
        )));
    }
    Ok(())
}

fn script_field(map: &KeyValueMap, key_type: u8) -> Option<ScriptBuf> {
    map.get(key_type).map(|bytes| ScriptBuf::from_bytes(bytes.to_vec()))
}

fn derivations(map: &KeyValueMap, key_type: u8) -> Result<Vec<Bip32Derivation>, PsbtError> {
    map.entries(key_type)
        .iter()
        .map(|entry| Bip32Derivation::decode(&entry.key_data, &entry.value))
        .collect()
}

fn input_map(args: &InputArgs) -> Result<KeyValueMap, PsbtError> {
    let mut map = KeyValueMap::new();
    map.insert(input::PREVIOUS_TXID, args.previous_txid.to_byte_array().to_vec());
    map.insert(input::OUTPUT_INDEX, args.output_index.to_le_bytes().to_vec());
    if let Some(sequence) = args.sequence {
        map.insert(input::SEQUENCE, sequence.to_le_bytes().to_vec());
    }
    if let Some(tx) = &args.non_witness_utxo {
        check_previous_tx(tx, args.previous_txid, args.output_index)?;
        map.insert(input::NON_WITNESS_UTXO, serialize(tx));
    }
    if let Some(utxo) = &args.witness_utxo {
        map.insert(input::WITNESS_UTXO, serialize(utxo));
    }
    if let Some(script) = &args.redeem_script {
        map.insert(input::REDEEM_SCRIPT, script.to_bytes());
    }
    if let Some(script) = &args.witness_script {
        map.insert(input::WITNESS_SCRIPT, script.to_bytes());
    }
    for derivation in &args.bip32_derivations {
        check_pubkey(&derivation.pubkey)?;
        map.insert_keyed(input::BIP32_DERIVATION, derivation.pubkey.clone(), derivation.encode_value());
    }
    if let Some(sighash) = args.sighash_type {
        map.insert(input::SIGHASH_TYPE, sighash.to_le_bytes().to_vec());
    }
    if let Some(time) = args.required_time_locktime {
        locktime::check_time_locktime(time)?;
        map.insert(input::REQUIRED_TIME_LOCKTIME, time.to_le_bytes().to_vec());
    }
    if let Some(height) = args.required_height_locktime {
        locktime::check_height_locktime(height)?;
        map.insert(input::REQUIRED_HEIGHT_LOCKTIME, height.to_le_bytes().to_vec());
    }
    Ok(map)
}

fn output_map(args: &OutputArgs) -> Result<KeyValueMap, PsbtError> {
    let sats = i64::try_from(args.amount.to_sat())
        .map_err(|_| PsbtError::InvalidState(format!("amount {} does not fit in i64", args.amount)))?;
    let mut map = KeyValueMap::new();
    map.insert(output::AMOUNT, sats.to_le_bytes().to_vec());
    map.insert(output::SCRIPT, args.script.to_bytes());
    if let Some(script) = &args.redeem_script {
        map.insert(output::REDEEM_SCRIPT, script.to_bytes());
    }
    if let Some(script) = &args.witness_script {
        map.insert(output::WITNESS_SCRIPT, script.to_bytes());
    }
    for derivation in &args.bip32_derivations {
        check_pubkey(&derivation.pubkey)?;
        map.insert_keyed(output::BIP32_DERIVATION, derivation.pubkey.clone(), derivation.encode_value());
    }
    Ok(map)
}
