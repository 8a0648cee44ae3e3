use indexmap::IndexMap;

use crate::error::PsbtError;

/// One record of a map: the key data after the type byte, and the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    pub key_data: Vec<u8>,
    pub value: Vec<u8>,
}

/// Ordered key-value records of one PSBT map, grouped by key type.
///
/// Types keep the order they were first inserted in, and records of a keyed
/// type keep their insertion order, so parse-then-serialize reproduces the
/// input for any canonically grouped PSBT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValueMap {
    entries: IndexMap<u8, Vec<MapEntry>>,
}

impl KeyValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of the singular record of `key_type` (empty key data).
    pub fn get(&self, key_type: u8) -> Option<&[u8]> {
        self.get_keyed(key_type, &[])
    }

    pub fn get_keyed(&self, key_type: u8, key_data: &[u8]) -> Option<&[u8]> {
        self.entries
            .get(&key_type)?
            .iter()
            .find(|e| e.key_data == key_data)
            .map(|e| e.value.as_slice())
    }

    /// Set the singular record of `key_type`, returning the previous value.
    pub fn insert(&mut self, key_type: u8, value: Vec<u8>) -> Option<Vec<u8>> {
        self.insert_keyed(key_type, Vec::new(), value)
    }

    /// Set the record `(key_type, key_data)`, returning the previous value.
    pub fn insert_keyed(&mut self, key_type: u8, key_data: Vec<u8>, value: Vec<u8>) -> Option<Vec<u8>> {
        let records = self.entries.entry(key_type).or_default();
        if let Some(existing) = records.iter_mut().find(|e| e.key_data == key_data) {
            return Some(std::mem::replace(&mut existing.value, value));
        }
        records.push(MapEntry { key_data, value });
        None
    }

    /// All records of `key_type`, in insertion order.
    pub fn entries(&self, key_type: u8) -> &[MapEntry] {
        self.entries.get(&key_type).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains(&self, key_type: u8) -> bool {
        self.entries.contains_key(&key_type)
    }

    pub fn contains_keyed(&self, key_type: u8, key_data: &[u8]) -> bool {
        self.get_keyed(key_type, key_data).is_some()
    }

    /// Remove every record of `key_type`.
    pub fn remove(&mut self, key_type: u8) -> Vec<MapEntry> {
        self.entries.shift_remove(&key_type).unwrap_or_default()
    }

    pub fn remove_keyed(&mut self, key_type: u8, key_data: &[u8]) -> Option<Vec<u8>> {
        let records = self.entries.get_mut(&key_type)?;
        let position = records.iter().position(|e| e.key_data == key_data)?;
        let removed = records.remove(position);
        if records.is_empty() {
            self.entries.shift_remove(&key_type);
        }
        Some(removed.value)
    }

    /// Number of records across all types.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Key types present, in map order.
    pub fn key_types(&self) -> impl Iterator<Item = u8> + '_ {
        self.entries.keys().copied()
    }

    /// Every record with its key type, in serialization order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &MapEntry)> + '_ {
        self.entries
            .iter()
            .flat_map(|(key_type, records)| records.iter().map(move |e| (*key_type, e)))
    }

    /// Add a freshly parsed record; a repeated key is a malformed PSBT.
    pub(crate) fn push_parsed(&mut self, key_type: u8, key_data: Vec<u8>, value: Vec<u8>) -> Result<(), PsbtError> {
        if self.contains_keyed(key_type, &key_data) {
            return Err(PsbtError::MalformedPsbt(format!(
                "duplicate key {:02x}{}",
                key_type,
                hex::encode(&key_data)
            )));
        }
        self.entries
            .entry(key_type)
            .or_default()
            .push(MapEntry { key_data, value });
        Ok(())
    }
}
