//! M-of-N `CHECKMULTISIG` scripts and their P2SH / P2WSH wrappings.
//!
//! Keys are pushed in the order given. Callers deriving from a braid get
//! them already sorted (BIP67); callers passing keys by hand are trusted to
//! have chosen their order.

use bitcoin::address::Address;
use bitcoin::opcodes::all::OP_CHECKMULTISIG;
use bitcoin::script::{Builder, Instruction, Script, ScriptBuf};
use bitcoin::{CompressedPublicKey, PublicKey};
use hd_keys::{Bip32Path, BtcNetwork};

use crate::address_type::MultisigAddressType;
use crate::braid::BraidConfig;
use crate::error::MultisigError;

/// Largest script that can be pushed as a P2SH redeem script.
pub const MAX_REDEEM_SCRIPT_SIZE: usize = 520;

/// Label recording which braid and path produced a [`Multisig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BraidOrigin {
    pub config: BraidConfig,
    pub path: Bip32Path,
}

/// A concrete multisig script and the address it locks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Multisig {
    address_type: MultisigAddressType,
    network: BtcNetwork,
    public_keys: Vec<CompressedPublicKey>,
    required_signers: u32,
    redeem_script: Option<ScriptBuf>,
    witness_script: Option<ScriptBuf>,
    locking_script: ScriptBuf,
    address: Address,
    braid_origin: Option<BraidOrigin>,
}

impl Multisig {
    pub fn address_type(&self) -> MultisigAddressType {
        self.address_type
    }

    pub fn network(&self) -> BtcNetwork {
        self.network
    }

    pub fn public_keys(&self) -> &[CompressedPublicKey] {
        &self.public_keys
    }

    pub fn required_signers(&self) -> u32 {
        self.required_signers
    }

    pub fn total_signers(&self) -> u32 {
        self.public_keys.len() as u32
    }

    /// The P2SH redeem script. For P2SH-P2WSH this is the nested P2WSH
    /// program; absent for native P2WSH.
    pub fn redeem_script(&self) -> Option<&Script> {
        self.redeem_script.as_deref()
    }

    /// The witness script; absent for legacy P2SH.
    pub fn witness_script(&self) -> Option<&Script> {
        self.witness_script.as_deref()
    }

    /// The bare `OP_m <keys> OP_n OP_CHECKMULTISIG` script, read from the
    /// nesting level that holds it for this address type.
    pub fn multisig_script(&self) -> &Script {
        match (classify(self), &self.witness_script, &self.redeem_script) {
            (MultisigAddressType::P2sh, _, Some(redeem)) => redeem.as_script(),
            (_, Some(witness), _) => witness.as_script(),
            // Construction always fills the level the address type needs.
            _ => self.locking_script.as_script(),
        }
    }

    /// The scriptPubKey an output paying to this multisig carries.
    pub fn locking_script(&self) -> &Script {
        &self.locking_script
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn braid_origin(&self) -> Option<&BraidOrigin> {
        self.braid_origin.as_ref()
    }

    pub(crate) fn with_braid_origin(self, origin: BraidOrigin) -> Self {
        Self { braid_origin: Some(origin), ..self }
    }
}

/// Build a multisig from public keys, pushed in the order given.
pub fn from_public_keys(
    network: BtcNetwork,
    address_type: MultisigAddressType,
    required_signers: u32,
    public_keys: &[CompressedPublicKey],
) -> Result<Multisig, MultisigError> {
    check_quorum(address_type, required_signers, public_keys)?;

    let mut builder = Builder::new().push_int(i64::from(required_signers));
    for key in public_keys {
        builder = builder.push_key(&PublicKey::new(key.0));
    }
    let bare = builder
        .push_int(public_keys.len() as i64)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script();

    wrap(network, address_type, required_signers, public_keys.to_vec(), bare)
}

/// Build a multisig from an already assembled bare multisig script.
pub fn from_script(
    network: BtcNetwork,
    address_type: MultisigAddressType,
    script: &Script,
) -> Result<Multisig, MultisigError> {
    let (required_signers, public_keys) = parse_multisig_script(script)?;
    check_quorum(address_type, required_signers, &public_keys)?;
    wrap(network, address_type, required_signers, public_keys, script.to_owned())
}

/// Hex variant of [`from_script`].
pub fn from_script_hex(
    network: BtcNetwork,
    address_type: MultisigAddressType,
    script_hex: &str,
) -> Result<Multisig, MultisigError> {
    let bytes = hex::decode(script_hex.trim())
        .map_err(|e| MultisigError::InvalidScript(format!("invalid hex: {e}")))?;
    from_script(network, address_type, Script::from_bytes(&bytes))
}

/// Recover the address type of a built multisig from its shape: a redeem
/// script wrapping a witness script is P2SH-P2WSH, otherwise a bech32
/// address is P2WSH and anything else P2SH.
pub fn classify(multisig: &Multisig) -> MultisigAddressType {
    if multisig.redeem_script.is_some() && multisig.witness_script.is_some() {
        return MultisigAddressType::P2shP2wsh;
    }
    if is_bech32_address(&multisig.address.to_string()) {
        MultisigAddressType::P2wsh
    } else {
        MultisigAddressType::P2sh
    }
}

fn is_bech32_address(address: &str) -> bool {
    let lower = address.to_ascii_lowercase();
    ["bc1", "tb1", "bcrt1"].iter().any(|hrp| lower.starts_with(hrp))
}

/// Decode `OP_m <pubkey>... OP_n OP_CHECKMULTISIG` into `m` and the keys.
pub fn parse_multisig_script(
    script: &Script,
) -> Result<(u32, Vec<CompressedPublicKey>), MultisigError> {
    let instructions = script
        .instructions()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| MultisigError::InvalidScript(e.to_string()))?;

    let (first, rest) = instructions
        .split_first()
        .ok_or_else(|| MultisigError::InvalidScript("empty script".into()))?;
    let (last, rest) = rest
        .split_last()
        .ok_or_else(|| MultisigError::InvalidScript("script too short".into()))?;
    let (total, keys) = rest
        .split_last()
        .ok_or_else(|| MultisigError::InvalidScript("script too short".into()))?;

    if !matches!(last, Instruction::Op(op) if *op == OP_CHECKMULTISIG) {
        return Err(MultisigError::InvalidScript("missing OP_CHECKMULTISIG".into()));
    }
    let required = small_int(first)?;
    let total = small_int(total)?;

    let public_keys = keys
        .iter()
        .map(|instruction| match instruction {
            Instruction::PushBytes(bytes) => CompressedPublicKey::from_slice(bytes.as_bytes())
                .map_err(|e| MultisigError::InvalidScript(format!("invalid public key: {e}"))),
            Instruction::Op(op) => Err(MultisigError::InvalidScript(format!(
                "unexpected opcode {op} among keys"
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if public_keys.len() as u32 != total {
        return Err(MultisigError::InvalidScript(format!(
            "script declares {total} keys but pushes {}",
            public_keys.len()
        )));
    }
    if required == 0 || required > total {
        return Err(MultisigError::InvalidScript(format!(
            "{required}-of-{total} is not a valid quorum"
        )));
    }
    Ok((required, public_keys))
}

/// `OP_1`..`OP_16`, or a one-byte push for 17..=20.
fn small_int(instruction: &Instruction<'_>) -> Result<u32, MultisigError> {
    match instruction {
        Instruction::Op(op) => {
            let byte = op.to_u8();
            if (0x51..=0x60).contains(&byte) {
                Ok(u32::from(byte - 0x50))
            } else {
                Err(MultisigError::InvalidScript(format!("expected a count, found {op}")))
            }
        }
        Instruction::PushBytes(bytes) => match bytes.as_bytes() {
            [n] if *n <= 0x7f => Ok(u32::from(*n)),
            other => Err(MultisigError::InvalidScript(format!(
                "expected a count, found push of {} bytes",
                other.len()
            ))),
        },
    }
}

fn check_quorum(
    address_type: MultisigAddressType,
    required_signers: u32,
    public_keys: &[CompressedPublicKey],
) -> Result<(), MultisigError> {
    let total = public_keys.len() as u32;
    if total == 0 {
        return Err(MultisigError::InvalidQuorum("no public keys".into()));
    }
    if required_signers == 0 || required_signers > total {
        return Err(MultisigError::InvalidQuorum(format!(
            "{required_signers}-of-{total}"
        )));
    }
    if total > address_type.max_signers() {
        return Err(MultisigError::InvalidQuorum(format!(
            "{address_type} supports at most {} keys, got {total}",
            address_type.max_signers()
        )));
    }
    for (i, key) in public_keys.iter().enumerate() {
        if public_keys[..i].contains(key) {
            return Err(MultisigError::InvalidQuorum(format!(
                "duplicate public key {}",
                hex::encode(key.0.serialize())
            )));
        }
    }
    Ok(())
}

fn wrap(
    network: BtcNetwork,
    address_type: MultisigAddressType,
    required_signers: u32,
    public_keys: Vec<CompressedPublicKey>,
    bare: ScriptBuf,
) -> Result<Multisig, MultisigError> {
    let (redeem_script, witness_script, locking_script) = match address_type {
        MultisigAddressType::P2sh => {
            if bare.len() > MAX_REDEEM_SCRIPT_SIZE {
                return Err(MultisigError::InvalidScript(format!(
                    "redeem script is {} bytes, limit is {MAX_REDEEM_SCRIPT_SIZE}",
                    bare.len()
                )));
            }
            let locking = ScriptBuf::new_p2sh(&bare.script_hash());
            (Some(bare), None, locking)
        }
        MultisigAddressType::P2shP2wsh => {
            let nested = ScriptBuf::new_p2wsh(&bare.wscript_hash());
            let locking = ScriptBuf::new_p2sh(&nested.script_hash());
            (Some(nested), Some(bare), locking)
        }
        MultisigAddressType::P2wsh => {
            let locking = ScriptBuf::new_p2wsh(&bare.wscript_hash());
            (None, Some(bare), locking)
        }
    };

    let address = Address::from_script(&locking_script, network.to_bitcoin_network())
        .map_err(|e| MultisigError::Address(e.to_string()))?;

    Ok(Multisig {
        address_type,
        network,
        public_keys,
        required_signers,
        redeem_script,
        witness_script,
        locking_script,
        address,
        braid_origin: None,
    })
}
