//! Turns spendable multisig UTXOs and payment targets into PSBT arguments.

use bitcoin::address::NetworkUnchecked;
use bitcoin::consensus::deserialize;
use bitcoin::{Address, Amount, Sequence, Transaction, TxOut, Txid};
use hd_keys::pubkey::UNKNOWN_FINGERPRINT;
use hd_keys::{BtcNetwork, ExtendedKeyVersion};
use multisig::{Braid, BraidConfig, Multisig};
use psbt_v2::{Bip32Derivation, GlobalXpub, InputArgs, OutputArgs, PsbtV2};
use tracing::debug;

use crate::error::CoordinatorError;

/// Sequence for new inputs: replaceable, no relative locktime.
pub const DEFAULT_SEQUENCE: u32 = Sequence::ENABLE_RBF_NO_LOCKTIME.0;

/// A UTXO locked to one of the wallet's multisig addresses.
#[derive(Debug, Clone)]
pub struct PsbtInputSource {
    /// Transaction ID in display (big-endian) hex.
    pub txid: String,
    pub output_index: u32,
    pub amount_sats: u64,
    /// Full previous transaction; required for P2SH inputs.
    pub previous_tx_hex: Option<String>,
    pub multisig: Multisig,
}

/// A payment. `multisig` is set when the output goes back to the wallet
/// (change), so signers can verify it.
#[derive(Debug, Clone)]
pub struct PsbtOutputTarget {
    pub address: String,
    pub amount_sats: u64,
    pub multisig: Option<Multisig>,
}

pub fn input_args(source: &PsbtInputSource) -> Result<InputArgs, CoordinatorError> {
    let txid: Txid = source
        .txid
        .parse()
        .map_err(|e| CoordinatorError::InvalidInput(format!("invalid txid {}: {e}", source.txid)))?;
    let multisig = &source.multisig;

    let mut args = InputArgs::new(txid, source.output_index);
    args.sequence = Some(DEFAULT_SEQUENCE);
    args.redeem_script = multisig.redeem_script().map(|s| s.to_owned());
    args.witness_script = multisig.witness_script().map(|s| s.to_owned());
    args.bip32_derivations = bip32_derivations(multisig)?;

    if let Some(hex_tx) = &source.previous_tx_hex {
        let tx = previous_transaction(hex_tx)?;
        let spent = tx.output.get(source.output_index as usize).ok_or_else(|| {
            CoordinatorError::InvalidInput(format!(
                "previous transaction has no output {}",
                source.output_index
            ))
        })?;
        if spent.value.to_sat() != source.amount_sats {
            return Err(CoordinatorError::InvalidInput(format!(
                "previous output holds {} sats, expected {}",
                spent.value.to_sat(),
                source.amount_sats
            )));
        }
        if spent.script_pubkey.as_script() != multisig.locking_script() {
            return Err(CoordinatorError::InvalidInput(
                "previous output is not locked to the multisig".into(),
            ));
        }
        args.non_witness_utxo = Some(tx);
    } else if !multisig.address_type().is_segwit() {
        return Err(CoordinatorError::InvalidInput(format!(
            "{} input {}:{} needs its previous transaction",
            multisig.address_type(),
            source.txid,
            source.output_index
        )));
    }

    if multisig.address_type().is_segwit() {
        args.witness_utxo = Some(TxOut {
            value: Amount::from_sat(source.amount_sats),
            script_pubkey: multisig.locking_script().to_owned(),
        });
    }
    Ok(args)
}

pub fn output_args(target: &PsbtOutputTarget, network: BtcNetwork) -> Result<OutputArgs, CoordinatorError> {
    let address: Address = target
        .address
        .parse::<Address<NetworkUnchecked>>()
        .map_err(|e| CoordinatorError::InvalidAddress(format!("{}: {e}", target.address)))?
        .require_network(network.to_bitcoin_network())
        .map_err(|e| CoordinatorError::InvalidAddress(format!("{} on {network}: {e}", target.address)))?;

    let mut args = OutputArgs::new(Amount::from_sat(target.amount_sats), address.script_pubkey());
    if let Some(multisig) = &target.multisig {
        if multisig.address() != &address {
            return Err(CoordinatorError::InvalidAddress(format!(
                "{} does not belong to the change multisig {}",
                target.address,
                multisig.address()
            )));
        }
        args.redeem_script = multisig.redeem_script().map(|s| s.to_owned());
        args.witness_script = multisig.witness_script().map(|s| s.to_owned());
        args.bip32_derivations = bip32_derivations(multisig)?;
    }
    Ok(args)
}

/// BIP32 derivations of a multisig's keys, re-derived from its braid.
///
/// A multisig built from bare keys has no braid origin and yields none.
pub fn bip32_derivations(multisig: &Multisig) -> Result<Vec<Bip32Derivation>, CoordinatorError> {
    let Some(origin) = multisig.braid_origin() else {
        return Ok(Vec::new());
    };
    let derived = Braid::from_config(&origin.config)?.derive_keys_at(&origin.path)?;
    if derived.public_keys.as_slice() != multisig.public_keys() {
        return Err(CoordinatorError::InvalidInput(format!(
            "braid at {} does not produce the multisig's keys",
            origin.path
        )));
    }
    Ok(derived
        .derivations
        .iter()
        .map(|record| Bip32Derivation {
            pubkey: record.pubkey.0.serialize().to_vec(),
            master_fingerprint: record.master_fingerprint,
            path: record.path.to_u32_vec(),
        })
        .collect())
}

/// PSBT_GLOBAL_XPUB records for every distinct cosigner key in `configs`.
///
/// Keys are stored under the plain xpub/tpub version, as BIP174 expects.
pub fn global_xpubs(configs: &[BraidConfig]) -> Result<Vec<GlobalXpub>, CoordinatorError> {
    let mut xpubs: Vec<GlobalXpub> = Vec::new();
    for config in configs {
        let braid = Braid::from_config(config)?;
        for key in braid.extended_keys() {
            let mut encoded = key.encode();
            let version = ExtendedKeyVersion::standard(key.network().kind());
            encoded[..4].copy_from_slice(&version.to_bytes());
            if xpubs.iter().any(|x| x.xpub == encoded) {
                continue;
            }
            let path = match key.path() {
                Some(path) => path.to_u32_vec(),
                None => vec![0; usize::from(key.depth())],
            };
            xpubs.push(GlobalXpub {
                xpub: encoded.to_vec(),
                master_fingerprint: key.root_fingerprint().unwrap_or(UNKNOWN_FINGERPRINT),
                path,
            });
        }
    }
    Ok(xpubs)
}

/// Build a PSBT spending `inputs` to `outputs`, ready for signers.
///
/// Every input must belong to the same network. With `include_xpubs` the
/// cosigner keys of each distinct braid behind the inputs are added as
/// global xpubs.
pub fn build_unsigned_psbt(
    inputs: &[PsbtInputSource],
    outputs: &[PsbtOutputTarget],
    include_xpubs: bool,
) -> Result<PsbtV2, CoordinatorError> {
    let network = inputs
        .first()
        .map(|source| source.multisig.network())
        .ok_or_else(|| CoordinatorError::InvalidInput("no inputs to spend".into()))?;
    if outputs.is_empty() {
        return Err(CoordinatorError::InvalidInput("no outputs to pay".into()));
    }

    let mut psbt = PsbtV2::create();
    for source in inputs {
        if source.multisig.network() != network {
            return Err(CoordinatorError::InvalidInput(format!(
                "input {}:{} is on {}, expected {network}",
                source.txid,
                source.output_index,
                source.multisig.network()
            )));
        }
        psbt.add_input(input_args(source)?)?;
    }
    for target in outputs {
        psbt.add_output(output_args(target, network)?)?;
    }

    if include_xpubs {
        let mut configs: Vec<BraidConfig> = Vec::new();
        for origin in inputs.iter().filter_map(|s| s.multisig.braid_origin()) {
            if !configs.contains(&origin.config) {
                configs.push(origin.config.clone());
            }
        }
        for xpub in global_xpubs(&configs)? {
            psbt.add_global_xpub(&xpub)?;
        }
    }

    debug!(
        inputs = psbt.input_count(),
        outputs = psbt.output_count(),
        %network,
        "built unsigned psbt"
    );
    Ok(psbt)
}

fn previous_transaction(hex_tx: &str) -> Result<Transaction, CoordinatorError> {
    let bytes = hex::decode(hex_tx.trim())
        .map_err(|e| CoordinatorError::InvalidInput(format!("previous transaction hex: {e}")))?;
    deserialize(&bytes).map_err(|e| CoordinatorError::InvalidInput(format!("previous transaction: {e}")))
}
