//! Structured values stored on behalf of the protocol client.

use std::collections::BTreeMap;

use zeroize::Zeroize;

/// A JSON-like tree with a dedicated variant for raw binary buffers.
///
/// Maps are ordered so that two encodings of the same value are identical,
/// which keeps repeated saves of unchanged state byte-stable.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum KeyValue {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<KeyValue>),
    Map(BTreeMap<String, KeyValue>),
}

impl KeyValue {
    pub fn map() -> Self {
        Self::Map(BTreeMap::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, KeyValue>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    /// Field lookup on a map value; `None` for any other variant.
    pub fn get(&self, field: &str) -> Option<&KeyValue> {
        self.as_map().and_then(|map| map.get(field))
    }

    /// Builder-style insert; turns a non-map value into an empty map first.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<KeyValue>) -> Self {
        if !matches!(self, Self::Map(_)) {
            self = Self::map();
        }
        if let Self::Map(map) = &mut self {
            map.insert(field.into(), value.into());
        }
        self
    }
}

impl Zeroize for KeyValue {
    fn zeroize(&mut self) {
        match self {
            Self::String(s) => s.zeroize(),
            Self::Bytes(bytes) => bytes.zeroize(),
            Self::List(items) => items.iter_mut().for_each(Zeroize::zeroize),
            Self::Map(map) => map.values_mut().for_each(Zeroize::zeroize),
            Self::Null | Self::Bool(_) | Self::Number(_) => {}
        }
    }
}

impl From<bool> for KeyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<u32> for KeyValue {
    fn from(value: u32) -> Self {
        Self::Number(value.into())
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<u8>> for KeyValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<&[u8]> for KeyValue {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl From<Vec<KeyValue>> for KeyValue {
    fn from(value: Vec<KeyValue>) -> Self {
        Self::List(value)
    }
}

impl From<BTreeMap<String, KeyValue>> for KeyValue {
    fn from(value: BTreeMap<String, KeyValue>) -> Self {
        Self::Map(value)
    }
}

impl<T: Into<KeyValue>> From<Option<T>> for KeyValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_nests_fields() {
        let value = KeyValue::map()
            .with("private", vec![1u8, 2, 3])
            .with("keyId", 7i64);
        assert_eq!(value.get("private").and_then(KeyValue::as_bytes), Some(&[1u8, 2, 3][..]));
        assert_eq!(value.get("keyId").and_then(KeyValue::as_i64), Some(7));
        assert!(value.get("missing").is_none());
    }

    #[test]
    fn zeroize_clears_nested_secrets() {
        let mut value = KeyValue::map().with("inner", KeyValue::map().with("secret", vec![9u8; 32]));
        value.zeroize();
        let inner = value.get("inner").and_then(|v| v.get("secret")).cloned();
        assert_eq!(inner, Some(KeyValue::Bytes(vec![])));
    }
}
