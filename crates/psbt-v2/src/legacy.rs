use bitcoin::consensus::deserialize;
use bitcoin::Transaction;
use tracing::{debug, warn};

use crate::codec::{self, read_u32_le, RawPsbt};
use crate::error::PsbtError;
use crate::keys::{global, input, output};
use crate::psbt::PsbtV2;
use crate::types::{InputArgs, OutputArgs};

impl PsbtV2 {
    /// Convert a v0 PSBT into a v2 one.
    ///
    /// The unsigned transaction supplies the outpoints, sequences, amounts,
    /// scripts and fallback locktime. Every other record is carried over, and
    /// partial signatures are replayed through [`PsbtV2::add_partial_sig`] so
    /// the modifiable flags end up as if they had been added here. A version
    /// 1 transaction is refused unless `allow_tx_version_1` is set, which
    /// marks the result non-standard; read such a PSBT back with
    /// [`PsbtV2::parse_with`].
    pub fn from_v0(input: impl AsRef<[u8]>, allow_tx_version_1: bool) -> Result<Self, PsbtError> {
        let bytes = codec::decode_psbt_bytes(input.as_ref())?;
        let raw = RawPsbt::parse(&bytes)?;

        if let Some(version) = raw.global.get(global::VERSION) {
            let version = read_u32_le(version, "psbt version")?;
            if version != 0 {
                return Err(PsbtError::MalformedPsbt(format!("expected a v0 psbt, found version {version}")));
            }
        }
        let unsigned = raw
            .global
            .get(global::UNSIGNED_TX)
            .ok_or_else(|| PsbtError::MalformedPsbt("v0 psbt is missing its unsigned transaction".into()))?;
        let tx: Transaction =
            deserialize(unsigned).map_err(|e| PsbtError::MalformedPsbt(format!("unsigned transaction: {e}")))?;

        let mut psbt = PsbtV2::create();
        match tx.version.0 {
            v if v >= 2 => psbt.set_tx_version(v)?,
            1 if allow_tx_version_1 => {
                warn!("importing version 1 transaction as non-standard psbt v2");
                psbt.dangerously_set_tx_version_1();
            }
            v => {
                return Err(PsbtError::InvalidState(format!(
                    "legacy transaction version {v} is not allowed"
                )))
            }
        }
        psbt.set_fallback_locktime(Some(tx.lock_time.to_consensus_u32()));

        for (key_type, entry) in raw.global.iter() {
            if is_v0_global_record(key_type) {
                psbt.raw
                    .global
                    .insert_keyed(key_type, entry.key_data.clone(), entry.value.clone());
            }
        }

        for (txin, map) in tx.input.iter().zip(&raw.inputs) {
            let mut args = InputArgs::new(txin.previous_output.txid, txin.previous_output.vout);
            args.sequence = Some(txin.sequence.0);
            let index = psbt.add_input(args)?;
            for (key_type, entry) in map.iter() {
                if is_v0_input_record(key_type) {
                    psbt.raw.inputs[index].insert_keyed(key_type, entry.key_data.clone(), entry.value.clone());
                }
            }
        }

        for (txout, map) in tx.output.iter().zip(&raw.outputs) {
            let index = psbt.add_output(OutputArgs::new(txout.value, txout.script_pubkey.clone()))?;
            for (key_type, entry) in map.iter() {
                if !matches!(key_type, output::AMOUNT | output::SCRIPT) {
                    psbt.raw.outputs[index].insert_keyed(key_type, entry.key_data.clone(), entry.value.clone());
                }
            }
        }
        psbt.validate()?;

        let mut replayed = 0usize;
        for (index, map) in raw.inputs.iter().enumerate() {
            for entry in map.entries(input::PARTIAL_SIG) {
                psbt.add_partial_sig(index, &entry.key_data, &entry.value)?;
                replayed += 1;
            }
        }
        debug!(
            inputs = psbt.input_count(),
            outputs = psbt.output_count(),
            signatures = replayed,
            "converted v0 psbt"
        );
        Ok(psbt)
    }
}

/// Global records copied verbatim: xpubs, proprietary and unknown ones.
fn is_v0_global_record(key_type: u8) -> bool {
    !matches!(
        key_type,
        global::UNSIGNED_TX
            | global::TX_VERSION
            | global::FALLBACK_LOCKTIME
            | global::INPUT_COUNT
            | global::OUTPUT_COUNT
            | global::TX_MODIFIABLE
            | global::VERSION
    )
}

/// Records copied verbatim from a v0 input map. Signatures are replayed
/// separately and the v2 outpoint/sequence/lock fields come from the
/// unsigned transaction.
fn is_v0_input_record(key_type: u8) -> bool {
    !matches!(
        key_type,
        input::PARTIAL_SIG
            | input::PREVIOUS_TXID
            | input::OUTPUT_INDEX
            | input::SEQUENCE
            | input::REQUIRED_TIME_LOCKTIME
            | input::REQUIRED_HEIGHT_LOCKTIME
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::consensus::serialize;
    use bitcoin::hashes::Hash;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, TxIn, TxOut, Txid, Witness};

    use crate::map::KeyValueMap;
    use crate::modifiable::TxModifiable;

    fn unsigned_tx(version: i32) -> Transaction {
        let txin = |byte: u8| TxIn {
            previous_output: OutPoint { txid: Txid::from_byte_array([byte; 32]), vout: 1 },
            script_sig: ScriptBuf::new(),
            sequence: Sequence(0xffff_fffd),
            witness: Witness::new(),
        };
        Transaction {
            version: Version(version),
            lock_time: LockTime::from_consensus(800_000),
            input: vec![txin(0x11), txin(0x22)],
            output: vec![TxOut {
                value: Amount::from_sat(40_000),
                script_pubkey: ScriptBuf::from_bytes(vec![0x00, 0x14, 0x11, 0x22]),
            }],
        }
    }

    fn pubkey(byte: u8) -> Vec<u8> {
        let mut key = vec![0x03];
        key.extend([byte; 32]);
        key
    }

    fn v0_bytes(tx: &Transaction, signatures: &[(usize, u8)]) -> Vec<u8> {
        let mut raw = RawPsbt::default();
        raw.global.insert(global::UNSIGNED_TX, serialize(tx));
        raw.global.insert_keyed(global::XPUB, vec![0x04; 78], vec![1, 2, 3, 4]);
        raw.inputs = tx.input.iter().map(|_| KeyValueMap::new()).collect();
        raw.outputs = tx.output.iter().map(|_| KeyValueMap::new()).collect();
        raw.inputs[0].insert(input::WITNESS_SCRIPT, vec![0x51]);
        raw.inputs[0].insert_keyed(input::BIP32_DERIVATION, pubkey(7), vec![9, 9, 9, 9, 0, 0, 0, 0]);
        raw.outputs[0].insert_keyed(output::BIP32_DERIVATION, pubkey(8), vec![8, 8, 8, 8]);
        for (input_index, sighash) in signatures {
            raw.inputs[*input_index].insert_keyed(input::PARTIAL_SIG, pubkey(*sighash), vec![0x30, 0x02, *sighash]);
        }
        raw.serialize()
    }

    #[test]
    fn converts_structure_and_metadata() {
        let tx = unsigned_tx(2);
        let psbt = PsbtV2::from_v0(v0_bytes(&tx, &[]), false).unwrap();

        assert_eq!(psbt.input_count(), 2);
        assert_eq!(psbt.output_count(), 1);
        assert_eq!(psbt.tx_version().unwrap(), 2);
        assert_eq!(psbt.fallback_locktime().unwrap(), Some(800_000));
        assert_eq!(psbt.previous_txid(1).unwrap(), Txid::from_byte_array([0x22; 32]));
        assert_eq!(psbt.output_index(0).unwrap(), 1);
        assert_eq!(psbt.sequence(0).unwrap(), Some(0xffff_fffd));
        assert_eq!(psbt.output_amount(0).unwrap(), Amount::from_sat(40_000));
        assert_eq!(psbt.input_witness_script(0).unwrap(), Some(ScriptBuf::from_bytes(vec![0x51])));
        assert_eq!(psbt.input_bip32_derivations(0).unwrap()[0].master_fingerprint, [9, 9, 9, 9]);
        assert_eq!(psbt.output_bip32_derivations(0).unwrap()[0].pubkey, pubkey(8));
        assert_eq!(psbt.global_xpubs().unwrap().len(), 1);
        assert_eq!(psbt.psbt_version().unwrap(), 2);
        assert!(!psbt.is_non_standard());

        let reparsed = PsbtV2::parse(psbt.serialize()).unwrap();
        assert_eq!(reparsed, psbt);
    }

    #[test]
    fn replays_signatures_through_flag_collapse() {
        let tx = unsigned_tx(2);
        let psbt = PsbtV2::from_v0(v0_bytes(&tx, &[(1, 0x81)]), false).unwrap();
        assert_eq!(psbt.partial_sigs(1).unwrap().len(), 1);
        assert_eq!(psbt.tx_modifiable(), TxModifiable::INPUTS);

        let psbt = PsbtV2::from_v0(v0_bytes(&tx, &[(0, 0x01), (1, 0x81)]), false).unwrap();
        assert_eq!(psbt.tx_modifiable(), TxModifiable::empty());
    }

    #[test]
    fn version_1_requires_opt_in() {
        let tx = unsigned_tx(1);
        let bytes = v0_bytes(&tx, &[]);
        let err = PsbtV2::from_v0(&bytes, false).unwrap_err();
        assert!(matches!(err, PsbtError::InvalidState(_)));

        let psbt = PsbtV2::from_v0(&bytes, true).unwrap();
        assert!(psbt.is_non_standard());
        assert_eq!(psbt.tx_version().unwrap(), 1);

        let reparsed = PsbtV2::parse_with(psbt.to_base64(), true).unwrap();
        assert_eq!(reparsed, psbt);
    }

    #[test]
    fn accepts_text_encodings() {
        let bytes = v0_bytes(&unsigned_tx(2), &[]);
        let from_b64 = PsbtV2::from_v0(codec::encode_base64(&bytes), false).unwrap();
        let from_hex = PsbtV2::from_v0(codec::encode_hex(&bytes), false).unwrap();
        assert_eq!(from_b64, from_hex);
    }

    #[test]
    fn rejects_v2_input() {
        let err = PsbtV2::from_v0(PsbtV2::create().serialize(), false).unwrap_err();
        assert!(matches!(err, PsbtError::MalformedPsbt(_)));
    }

    #[test]
    fn reads_rust_bitcoin_v0_output() {
        let tx = unsigned_tx(2);
        let legacy = bitcoin::psbt::Psbt::from_unsigned_tx(tx.clone()).unwrap();
        let psbt = PsbtV2::from_v0(legacy.serialize(), false).unwrap();
        assert_eq!(psbt.input_count(), tx.input.len());
        assert_eq!(psbt.output_script(0).unwrap(), tx.output[0].script_pubkey);
    }
}
