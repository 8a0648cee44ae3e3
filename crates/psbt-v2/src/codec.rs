//! Byte-level PSBT framing: magic, maps of length-prefixed records, and the
//! hex / base64 text forms.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bitcoin::consensus::deserialize;
use bitcoin::Transaction;

use crate::error::PsbtError;
use crate::keys::global;
use crate::map::KeyValueMap;

/// `psbt` followed by the 0xff separator.
pub const PSBT_MAGIC: [u8; 5] = [0x70, 0x73, 0x62, 0x74, 0xff];

const HEX_MAGIC: &str = "70736274ff";
const BASE64_MAGIC: &str = "cHNidP8";

/// Text form used by [`crate::PsbtV2::serialize_as`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsbtFormat {
    Hex,
    Base64,
}

#[derive(Clone, Copy)]
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], PsbtError> {
        if self.remaining() < n {
            return Err(PsbtError::MalformedPsbt(format!(
                "unexpected end of data at byte {}",
                self.pos
            )));
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.buf[start..start + n])
    }

    pub(crate) fn read_compact_size(&mut self) -> Result<u64, PsbtError> {
        let first = self.take(1)?[0];
        match first {
            n @ 0x00..=0xfc => Ok(n as u64),
            0xfd => {
                let s = self.take(2)?;
                Ok(u16::from_le_bytes([s[0], s[1]]) as u64)
            }
            0xfe => {
                let s = self.take(4)?;
                Ok(u32::from_le_bytes([s[0], s[1], s[2], s[3]]) as u64)
            }
            0xff => {
                let s = self.take(8)?;
                Ok(u64::from_le_bytes([s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7]]))
            }
        }
    }

    fn read_len(&mut self) -> Result<usize, PsbtError> {
        let len = self.read_compact_size()?;
        usize::try_from(len)
            .ok()
            .filter(|n| *n <= self.remaining())
            .ok_or_else(|| PsbtError::MalformedPsbt(format!("length {len} exceeds remaining data")))
    }

    pub(crate) fn read_len_prefixed(&mut self) -> Result<&'a [u8], PsbtError> {
        let len = self.read_len()?;
        self.take(len)
    }
}

pub(crate) fn write_compact_size(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

pub(crate) fn compact_size_bytes(n: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    write_compact_size(&mut out, n);
    out
}

/// Decode a value that must be exactly one compact size integer.
pub(crate) fn parse_compact_size(data: &[u8]) -> Result<u64, PsbtError> {
    let mut cursor = Cursor::new(data);
    let n = cursor.read_compact_size()?;
    if cursor.remaining() > 0 {
        return Err(PsbtError::MalformedPsbt("trailing bytes after compact size".into()));
    }
    Ok(n)
}

fn read_map(cursor: &mut Cursor<'_>) -> Result<KeyValueMap, PsbtError> {
    let mut map = KeyValueMap::new();
    loop {
        let key_len = cursor.read_len()?;
        if key_len == 0 {
            return Ok(map);
        }
        let key = cursor.take(key_len)?;
        let value = cursor.read_len_prefixed()?;
        map.push_parsed(key[0], key[1..].to_vec(), value.to_vec())?;
    }
}

fn write_map(out: &mut Vec<u8>, map: &KeyValueMap) {
    for (key_type, entry) in map.iter() {
        write_compact_size(out, entry.key_data.len() as u64 + 1);
        out.push(key_type);
        out.extend_from_slice(&entry.key_data);
        write_compact_size(out, entry.value.len() as u64);
        out.extend_from_slice(&entry.value);
    }
    out.push(0x00);
}

/// A PSBT as three layers of untyped maps.
///
/// Works for both v0 and v2: the number of input and output maps comes from
/// the unsigned transaction when one is present, otherwise from the v2 count
/// fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPsbt {
    pub global: KeyValueMap,
    pub inputs: Vec<KeyValueMap>,
    pub outputs: Vec<KeyValueMap>,
}

impl RawPsbt {
    pub fn parse(bytes: &[u8]) -> Result<Self, PsbtError> {
        let mut cursor = Cursor::new(bytes);
        read_magic(&mut cursor)?;
        let global = read_map(&mut cursor)?;
        let (input_count, output_count) = map_counts(&global)?;

        let mut inputs = Vec::new();
        for _ in 0..input_count {
            inputs.push(read_map(&mut cursor)?);
        }
        let mut outputs = Vec::new();
        for _ in 0..output_count {
            outputs.push(read_map(&mut cursor)?);
        }

        if cursor.remaining() > 0 {
            return Err(PsbtError::MalformedPsbt(format!(
                "{} trailing bytes after the last map",
                cursor.remaining()
            )));
        }
        Ok(Self { global, inputs, outputs })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = PSBT_MAGIC.to_vec();
        write_map(&mut out, &self.global);
        for map in self.inputs.iter().chain(&self.outputs) {
            write_map(&mut out, map);
        }
        out
    }
}

fn read_magic(cursor: &mut Cursor<'_>) -> Result<(), PsbtError> {
    let magic = cursor
        .take(PSBT_MAGIC.len())
        .map_err(|_| PsbtError::MalformedPsbt("missing psbt magic".into()))?;
    if magic != PSBT_MAGIC {
        return Err(PsbtError::MalformedPsbt(format!("bad magic {}", hex::encode(magic))));
    }
    Ok(())
}

fn map_counts(global: &KeyValueMap) -> Result<(u64, u64), PsbtError> {
    if let Some(tx_bytes) = global.get(global::UNSIGNED_TX) {
        let tx: Transaction = deserialize(tx_bytes)
            .map_err(|e| PsbtError::MalformedPsbt(format!("unsigned transaction: {e}")))?;
        return Ok((tx.input.len() as u64, tx.output.len() as u64));
    }
    let count = |key_type: u8, name: &str| {
        global
            .get(key_type)
            .ok_or_else(|| PsbtError::MalformedPsbt(format!("missing {name} count")))
            .and_then(parse_compact_size)
    };
    Ok((count(global::INPUT_COUNT, "input")?, count(global::OUTPUT_COUNT, "output")?))
}

/// Normalize PSBT input to raw bytes.
///
/// Accepts raw bytes starting with the magic, or hex / base64 text whose
/// decoding starts with it. Surrounding whitespace in text is ignored.
pub fn decode_psbt_bytes(input: &[u8]) -> Result<Vec<u8>, PsbtError> {
    if input.starts_with(&PSBT_MAGIC) {
        return Ok(input.to_vec());
    }
    let text = std::str::from_utf8(input)
        .map_err(|_| PsbtError::MalformedPsbt("input is neither psbt bytes nor text".into()))?
        .trim();
    let head = text.get(..HEX_MAGIC.len()).unwrap_or_default();
    if head.eq_ignore_ascii_case(HEX_MAGIC) {
        return decode_hex(text);
    }
    if text.starts_with(BASE64_MAGIC) {
        return decode_base64(text);
    }
    Err(PsbtError::MalformedPsbt("missing psbt magic".into()))
}

pub fn decode_hex(text: &str) -> Result<Vec<u8>, PsbtError> {
    hex::decode(text.trim()).map_err(|e| PsbtError::Encoding(format!("hex: {e}")))
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>, PsbtError> {
    BASE64
        .decode(text.trim())
        .map_err(|e| PsbtError::Encoding(format!("base64: {e}")))
}

pub fn encode_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// The PSBT_GLOBAL_VERSION of any PSBT, 0 when the field is absent.
///
/// Only the global map is read, so this works on v0 and v2 alike and on
/// versions this crate cannot otherwise handle.
pub fn psbt_version_number(input: impl AsRef<[u8]>) -> Result<u32, PsbtError> {
    let bytes = decode_psbt_bytes(input.as_ref())?;
    let mut cursor = Cursor::new(&bytes);
    read_magic(&mut cursor)?;
    let global = read_map(&mut cursor)?;
    match global.get(global::VERSION) {
        None => Ok(0),
        Some(value) => read_u32_le(value, "psbt version"),
    }
}

pub(crate) fn read_u32_le(value: &[u8], field: &str) -> Result<u32, PsbtError> {
    let bytes: [u8; 4] = value
        .try_into()
        .map_err(|_| PsbtError::MalformedPsbt(format!("{field} must be 4 bytes, got {}", value.len())))?;
    Ok(u32::from_le_bytes(bytes))
}

pub(crate) fn read_i32_le(value: &[u8], field: &str) -> Result<i32, PsbtError> {
    read_u32_le(value, field).map(|v| v as i32)
}

pub(crate) fn read_i64_le(value: &[u8], field: &str) -> Result<i64, PsbtError> {
    let bytes: [u8; 8] = value
        .try_into()
        .map_err(|_| PsbtError::MalformedPsbt(format!("{field} must be 8 bytes, got {}", value.len())))?;
    Ok(i64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Global map with zero inputs and outputs, v2.
    const EMPTY_V2: &str = "70736274ff0102040200000001040100010501000106010301fb040200000000";

    #[test]
    fn compact_size_boundaries() {
        for (n, encoded) in [
            (0u64, "00"),
            (0xfc, "fc"),
            (0xfd, "fdfd00"),
            (0xffff, "fdffff"),
            (0x1_0000, "fe00000100"),
            (0x1_0000_0000, "ff0000000001000000"),
        ] {
            assert_eq!(hex::encode(compact_size_bytes(n)), encoded);
            assert_eq!(parse_compact_size(&hex::decode(encoded).unwrap()).unwrap(), n);
        }
    }

    #[test]
    fn compact_size_rejects_trailing_bytes() {
        assert!(parse_compact_size(&[0x01, 0x00]).is_err());
        assert!(parse_compact_size(&[0xfd, 0x01]).is_err());
    }

    #[test]
    fn raw_roundtrip_preserves_bytes() {
        let bytes = hex::decode(EMPTY_V2).unwrap();
        let raw = RawPsbt::parse(&bytes).unwrap();
        assert_eq!(raw.global.len(), 5);
        assert!(raw.inputs.is_empty());
        assert_eq!(raw.serialize(), bytes);
    }

    #[test]
    fn maps_follow_declared_counts() {
        // input count 1, output count 1, each map holding one unknown record
        let hex = "70736274ff010401010105010100\
                   02aa0101bb00\
                   02cc0101dd00";
        let raw = RawPsbt::parse(&hex::decode(hex).unwrap()).unwrap();
        assert_eq!(raw.inputs.len(), 1);
        assert_eq!(raw.outputs.len(), 1);
        assert_eq!(raw.inputs[0].get_keyed(0xaa, &[0x01]), Some(&[0xbb][..]));
        assert_eq!(raw.outputs[0].get_keyed(0xcc, &[0x01]), Some(&[0xdd][..]));
    }

    #[test]
    fn bad_magic_rejected() {
        let err = RawPsbt::parse(&hex::decode("70736274fe00").unwrap()).unwrap_err();
        assert!(matches!(err, PsbtError::MalformedPsbt(_)));
    }

    #[test]
    fn missing_counts_rejected() {
        let err = RawPsbt::parse(&hex::decode("70736274ff00").unwrap()).unwrap_err();
        assert_eq!(err.to_string(), "malformed psbt: missing input count");
    }

    #[test]
    fn truncated_and_trailing_data_rejected() {
        let bytes = hex::decode(EMPTY_V2).unwrap();
        assert!(RawPsbt::parse(&bytes[..bytes.len() - 3]).is_err());
        let mut extra = bytes.clone();
        extra.push(0x00);
        assert!(RawPsbt::parse(&extra).is_err());
    }

    #[test]
    fn duplicate_key_rejected() {
        let hex = "70736274ff0104010001050100010401000000";
        let err = RawPsbt::parse(&hex::decode(hex).unwrap()).unwrap_err();
        assert!(err.to_string().contains("duplicate key 04"));
    }

    #[test]
    fn decode_detects_text_forms() {
        let bytes = hex::decode(EMPTY_V2).unwrap();
        assert_eq!(decode_psbt_bytes(&bytes).unwrap(), bytes);
        assert_eq!(decode_psbt_bytes(EMPTY_V2.as_bytes()).unwrap(), bytes);
        assert_eq!(
            decode_psbt_bytes(EMPTY_V2.to_uppercase().as_bytes()).unwrap(),
            bytes
        );
        let b64 = encode_base64(&bytes);
        assert!(b64.starts_with("cHNidP8"));
        assert_eq!(decode_psbt_bytes(format!(" {b64}\n").as_bytes()).unwrap(), bytes);
        assert!(decode_psbt_bytes(b"hello").is_err());
    }

    #[test]
    fn version_number_defaults_to_zero() {
        assert_eq!(psbt_version_number(EMPTY_V2).unwrap(), 2);
        // v0-style global map with only an unknown record
        assert_eq!(psbt_version_number("70736274ff02aa00010000").unwrap(), 0);
    }

    #[test]
    fn fixed_width_readers() {
        assert_eq!(read_u32_le(&[1, 0, 0, 0], "x").unwrap(), 1);
        assert_eq!(read_i32_le(&[0xff; 4], "x").unwrap(), -1);
        assert_eq!(read_i64_le(&[0xe8, 0x03, 0, 0, 0, 0, 0, 0], "x").unwrap(), 1000);
        assert!(read_u32_le(&[1, 0], "x").is_err());
    }
}
