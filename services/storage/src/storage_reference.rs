use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator between bucket and key in the persisted form
pub const REFERENCE_SEPARATOR: char = ',';

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Malformed storage reference: {0:?}")]
pub struct MalformedReference(pub String);

/// Location of a stored object, persisted as `{bucket},{key}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageReference {
    pub bucket: String,
    pub key: String,
}

impl StorageReference {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Encoded form stored in the metadata record
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StorageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.bucket, REFERENCE_SEPARATOR, self.key)
    }
}

impl FromStr for StorageReference {
    type Err = MalformedReference;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(REFERENCE_SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(bucket), Some(key), None) => Ok(Self::new(bucket, key)),
            _ => Err(MalformedReference(s.to_string())),
        }
    }
}
