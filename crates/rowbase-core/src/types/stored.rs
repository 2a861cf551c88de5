//! Storage representation of row values.

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::Error;

/// A single scalar cell. Exactly one column is populated.
#[derive(Debug, Clone, Default, PartialEq, Archive, Serialize, Deserialize)]
pub struct ScalarCell {
    pub text: Option<String>,
    pub number: Option<f64>,
    /// Microseconds since the Unix epoch.
    pub date: Option<i64>,
    pub boolean: Option<bool>,
}

/// One entry of a multi-valued property.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct MultipleEntry {
    pub position: u32,
    pub value: String,
}

/// A min/max pair. Numeric ranges use the number columns, date ranges the date columns.
#[derive(Debug, Clone, Default, PartialEq, Archive, Serialize, Deserialize)]
pub struct RangeCell {
    pub number_min: Option<f64>,
    pub number_max: Option<f64>,
    pub date_min: Option<i64>,
    pub date_max: Option<i64>,
}

/// A file reference.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct MediaEntry {
    pub name: String,
    pub file: String,
    pub mime_type: String,
    pub size: Option<u64>,
    pub storage_url: Option<String>,
}

/// A row value as written to its sub-store.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum StoredValue {
    Scalar(ScalarCell),
    Multiple(Vec<MultipleEntry>),
    Range(RangeCell),
    Media(Vec<MediaEntry>),
}

impl StoredValue {
    /// Serialize using rkyv.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize using rkyv.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let mut aligned = rkyv::util::AlignedVec::<16>::new();
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_entries_keep_their_order() {
        let stored = StoredValue::Multiple(vec![
            MultipleEntry {
                position: 0,
                value: "b".into(),
            },
            MultipleEntry {
                position: 1,
                value: "a".into(),
            },
        ]);
        let bytes = stored.to_bytes().unwrap();
        assert_eq!(StoredValue::from_bytes(&bytes).unwrap(), stored);
    }

    #[test]
    fn test_garbage_is_a_deserialization_error() {
        let err = StoredValue::from_bytes(&[0xff, 0x01]).unwrap_err();
        assert!(matches!(err, Error::Deserialization(_)));
    }
}
