//! Logical names for tables and indexes, and their on-disk encoding.
//!
//! A [`Name`] is any non-empty UTF-8 string up to [`MAX_NAME_LEN`] bytes. On
//! disk it becomes the lowercase hexadecimal of its bytes, which is always a
//! valid path segment (no separators, no reserved characters) and never
//! collides on case-insensitive filesystems.
//!
//! ```rust
//! use photon_docstore::Name;
//!
//! let name = Name::new("users/eu").unwrap();
//! assert_eq!(name.encode(), "75736572732f6575");
//! assert_eq!(Name::decode("75736572732f6575").unwrap(), name);
//! ```

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use crate::error::{Error, ErrorKind, Result};

/// Longest accepted name in bytes. Encoded segments are twice as long and
/// must stay within the common 255-byte filename limit.
pub const MAX_NAME_LEN: usize = 127;

/// Identifier of a table or an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Name(String);

impl Name {
    /// Validate and wrap a logical name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::new(ErrorKind::InvalidName, "validate name")
                .with_message("name cannot be empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(Error::new(ErrorKind::InvalidName, "validate name")
                .with_message(format!(
                    "name is {} bytes, the limit is {}",
                    name.len(),
                    MAX_NAME_LEN
                )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segment for this name.
    pub fn encode(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    /// Inverse of [`Name::encode`]. Only the exact lowercase form is accepted
    /// so that every name has a single directory.
    pub fn decode(segment: &str) -> Result<Self> {
        let invalid = |msg: String| {
            Error::new(ErrorKind::InvalidName, "decode name").with_message(msg)
        };

        if segment.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(invalid(format!("segment {:?} is not lowercase hex", segment)));
        }
        let bytes = hex::decode(segment)
            .map_err(|e| invalid(format!("segment {:?} is not hex: {}", segment, e)))?;
        let name = String::from_utf8(bytes)
            .map_err(|_| invalid(format!("segment {:?} is not UTF-8", segment)))?;
        Self::new(name)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Name {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Name {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Name::new(value)
    }
}

impl TryFrom<&str> for Name {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Name::new(value)
    }
}

impl From<Name> for String {
    fn from(name: Name) -> Self {
        name.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_is_path_safe() {
        for raw in ["users", "a/b", "..", "C:\\temp", "名前", "with space", "\0"] {
            let segment = Name::new(raw).unwrap().encode();
            assert!(segment.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));
        }
    }

    #[test]
    fn test_case_variants_get_distinct_segments() {
        let lower = Name::new("users").unwrap().encode();
        let upper = Name::new("USERS").unwrap().encode();
        assert_ne!(lower.to_lowercase(), upper.to_lowercase());
    }

    #[test]
    fn test_validation() {
        assert!(Name::new("").is_err());
        assert!(Name::new("a".repeat(MAX_NAME_LEN)).is_ok());
        let err = Name::new("a".repeat(MAX_NAME_LEN + 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidName);
        assert!(Name::new("a".repeat(MAX_NAME_LEN)).unwrap().encode().len() <= 255);
    }

    #[test]
    fn test_decode_rejects_bad_segments() {
        for bad in ["", "7", "zz", "7573657273A0", "ff", "75736572730"] {
            assert!(Name::decode(bad).is_err(), "{:?} should not decode", bad);
        }
    }

    #[test]
    fn test_serde_is_plain_string() {
        let name = Name::new("orders").unwrap();
        assert_eq!(serde_json::to_string(&name).unwrap(), "\"orders\"");
        assert!(serde_json::from_str::<Name>("\"\"").is_err());
    }

    proptest! {
        #[test]
        fn name_roundtrip(raw in "\\PC{1,40}") {
            prop_assume!(raw.len() <= MAX_NAME_LEN);
            let name = Name::new(raw.clone()).unwrap();
            let decoded = Name::decode(&name.encode()).unwrap();
            prop_assert_eq!(decoded.as_str(), raw.as_str());
        }

        #[test]
        fn name_roundtrip_any_bytes(raw in proptest::collection::vec(any::<char>(), 1..30)) {
            let raw: String = raw.into_iter().collect();
            prop_assume!(raw.len() <= MAX_NAME_LEN);
            let name = Name::new(raw).unwrap();
            prop_assert_eq!(Name::decode(&name.encode()).unwrap(), name);
        }
    }
}
