//! BIP32 derivation paths.
//!
//! A path is either rooted (`m/48'/1'/0'/2'`), describing where a key sits
//! below its master, or relative (`0/5`), describing a derivation below some
//! other key. Both forms accept `'`, `h` and `H` as hardened markers.

use std::fmt;
use std::str::FromStr;

use bitcoin::bip32::{ChildNumber, DerivationPath};
use serde::{Deserialize, Serialize};

use crate::error::KeyError;

/// Highest index allowed for an unhardened segment.
pub const MAX_UNHARDENED_INDEX: u32 = 0x7fff_ffff;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Bip32Path {
    rooted: bool,
    segments: Vec<ChildNumber>,
}

impl Bip32Path {
    /// The master path `m`.
    pub fn master() -> Self {
        Self { rooted: true, segments: Vec::new() }
    }

    pub fn rooted(segments: Vec<ChildNumber>) -> Self {
        Self { rooted: true, segments }
    }

    pub fn relative(segments: Vec<ChildNumber>) -> Self {
        Self { rooted: false, segments }
    }

    /// Build a relative path of unhardened indexes, e.g. `[0, 5]` for `0/5`.
    pub fn from_unhardened(indexes: &[u32]) -> Result<Self, KeyError> {
        let segments = indexes
            .iter()
            .map(|&index| {
                ChildNumber::from_normal_idx(index)
                    .map_err(|e| KeyError::InvalidPath(format!("index {index}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::relative(segments))
    }

    pub fn parse(s: &str) -> Result<Self, KeyError> {
        let s = s.trim();
        let (rooted, rest) = match s {
            "m" | "M" => return Ok(Self::master()),
            _ => match s.strip_prefix("m/").or_else(|| s.strip_prefix("M/")) {
                Some(rest) => (true, rest),
                None => (false, s),
            },
        };
        if rest.is_empty() {
            return Err(KeyError::InvalidPath(format!("empty path {s:?}")));
        }

        let segments = rest
            .split('/')
            .map(|segment| parse_segment(segment).map_err(|reason| {
                KeyError::InvalidPath(format!("{s}: {reason}"))
            }))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rooted, segments })
    }

    pub fn is_rooted(&self) -> bool {
        self.rooted
    }

    pub fn segments(&self) -> &[ChildNumber] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// True when every segment is hardened.
    pub fn is_hardened(&self) -> bool {
        self.segments.iter().all(ChildNumber::is_hardened)
    }

    /// True when every segment is unhardened, i.e. derivable from a public key.
    pub fn is_unhardened(&self) -> bool {
        self.segments.iter().all(ChildNumber::is_normal)
    }

    pub fn first(&self) -> Option<ChildNumber> {
        self.segments.first().copied()
    }

    /// Append a relative path. The result keeps this path's rootedness.
    pub fn join(&self, tail: &Bip32Path) -> Bip32Path {
        let mut segments = self.segments.clone();
        segments.extend_from_slice(&tail.segments);
        Self { rooted: self.rooted, segments }
    }

    pub fn child(&self, child: ChildNumber) -> Bip32Path {
        let mut segments = self.segments.clone();
        segments.push(child);
        Self { rooted: self.rooted, segments }
    }

    /// Raw `u32` segments with the hardened bit set where applicable.
    pub fn to_u32_vec(&self) -> Vec<u32> {
        self.segments.iter().map(|&c| u32::from(c)).collect()
    }

    pub fn to_derivation_path(&self) -> DerivationPath {
        DerivationPath::from(self.segments.clone())
    }
}

fn parse_segment(segment: &str) -> Result<ChildNumber, String> {
    let (digits, hardened) = match segment.strip_suffix(['\'', 'h', 'H']) {
        Some(digits) => (digits, true),
        None => (segment, false),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid segment {segment:?}"));
    }
    let index: u32 = digits
        .parse()
        .map_err(|e| format!("invalid segment {segment:?}: {e}"))?;
    let child = if hardened {
        ChildNumber::from_hardened_idx(index)
    } else {
        ChildNumber::from_normal_idx(index)
    };
    child.map_err(|e| format!("segment {segment:?} out of range: {e}"))
}

pub(crate) fn format_child(child: &ChildNumber) -> String {
    match child {
        ChildNumber::Normal { index } => index.to_string(),
        ChildNumber::Hardened { index } => format!("{index}'"),
    }
}

impl fmt::Display for Bip32Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self
            .segments
            .iter()
            .map(format_child)
            .collect::<Vec<_>>()
            .join("/");
        match (self.rooted, body.is_empty()) {
            (true, true) => write!(f, "m"),
            (true, false) => write!(f, "m/{body}"),
            (false, _) => write!(f, "{body}"),
        }
    }
}

impl FromStr for Bip32Path {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Bip32Path {
    type Error = KeyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Bip32Path> for String {
    fn from(path: Bip32Path) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rooted_path() {
        let path = Bip32Path::parse("m/48'/1'/0'/2'").unwrap();
        assert!(path.is_rooted());
        assert!(path.is_hardened());
        assert_eq!(path.depth(), 4);
        assert_eq!(path.to_string(), "m/48'/1'/0'/2'");
    }

    #[test]
    fn h_marker_displays_as_apostrophe() {
        let path = Bip32Path::parse("m/45h/0H").unwrap();
        assert_eq!(path.to_string(), "m/45'/0'");
    }

    #[test]
    fn parses_relative_path() {
        let path = Bip32Path::parse("0/5").unwrap();
        assert!(!path.is_rooted());
        assert!(path.is_unhardened());
        assert_eq!(path.to_u32_vec(), vec![0, 5]);
        assert_eq!(path.to_string(), "0/5");
    }

    #[test]
    fn master_path() {
        let path = Bip32Path::parse("m").unwrap();
        assert!(path.is_empty());
        assert_eq!(path.to_string(), "m");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Bip32Path::parse("").is_err());
        assert!(Bip32Path::parse("m/").is_err());
        assert!(Bip32Path::parse("m/a/1").is_err());
        assert!(Bip32Path::parse("0//1").is_err());
        assert!(Bip32Path::parse("m/-1").is_err());
        assert!(Bip32Path::parse("m/2147483648").is_err());
    }

    #[test]
    fn join_keeps_root() {
        let base = Bip32Path::parse("m/48'/1'/0'/2'").unwrap();
        let tail = Bip32Path::parse("0/7").unwrap();
        assert_eq!(base.join(&tail).to_string(), "m/48'/1'/0'/2'/0/7");
    }

    #[test]
    fn hardened_bit_in_raw_segments() {
        let path = Bip32Path::parse("m/44'/0").unwrap();
        assert_eq!(path.to_u32_vec(), vec![0x8000_002c, 0]);
    }

    #[test]
    fn from_unhardened_rejects_hardened_range() {
        assert!(Bip32Path::from_unhardened(&[0, 1]).is_ok());
        assert!(Bip32Path::from_unhardened(&[MAX_UNHARDENED_INDEX + 1]).is_err());
    }

    #[test]
    fn serde_as_string() {
        let path = Bip32Path::parse("m/45'/0").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"m/45'/0\"");
        let back: Bip32Path = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }
}
