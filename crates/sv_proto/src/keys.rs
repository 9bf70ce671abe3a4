//! The per-session key-blob.
//!
//! Layout: bucket name → key id → value. Buckets we do not know about are
//! kept as they are so a newer writer's data survives a round trip through an
//! older reader.

use std::collections::BTreeMap;

use zeroize::Zeroize;

use crate::{
    category::KeyCategory, credentials::variant_name, error::DecodeError, value::KeyValue,
};

type Bucket = BTreeMap<String, KeyValue>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyBlob {
    buckets: BTreeMap<String, Bucket>,
}

impl KeyBlob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(BTreeMap::is_empty)
    }

    pub fn get(&self, category: KeyCategory, id: &str) -> Option<&KeyValue> {
        self.buckets.get(category.bucket()).and_then(|b| b.get(id))
    }

    /// Overwrite (or add) one entry.
    pub fn put(&mut self, category: KeyCategory, id: impl Into<String>, value: KeyValue) {
        self.buckets
            .entry(category.bucket().to_owned())
            .or_default()
            .insert(id.into(), value);
    }

    pub fn delete(&mut self, category: KeyCategory, id: &str) -> Option<KeyValue> {
        self.buckets
            .get_mut(category.bucket())
            .and_then(|b| b.remove(id))
    }

    /// Stored ids of one category, in key order.
    pub fn ids(&self, category: KeyCategory) -> Vec<String> {
        self.buckets
            .get(category.bucket())
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, category: KeyCategory) -> usize {
        self.buckets.get(category.bucket()).map_or(0, BTreeMap::len)
    }

    /// Entries stored under a bucket name that no category maps to.
    pub fn unknown_buckets(&self) -> impl Iterator<Item = &str> {
        self.buckets
            .keys()
            .map(String::as_str)
            .filter(|b| KeyCategory::from_bucket(b).is_none())
    }

    /// Build from a decoded value: an object of objects.
    pub fn from_value(value: KeyValue) -> Result<Self, DecodeError> {
        let root = match value {
            KeyValue::Map(root) => root,
            other => {
                return Err(DecodeError::new(
                    "$",
                    format!("key-blob must be an object, got {}", variant_name(&other)),
                ))
            }
        };
        let mut buckets = BTreeMap::new();
        for (name, entries) in root {
            match entries {
                KeyValue::Map(entries) => {
                    buckets.insert(name, entries);
                }
                KeyValue::Null => {}
                other => {
                    return Err(DecodeError::new(
                        format!("$.{name}"),
                        format!("bucket must be an object, got {}", variant_name(&other)),
                    ))
                }
            }
        }
        Ok(Self { buckets })
    }

    pub fn to_value(&self) -> KeyValue {
        KeyValue::Map(
            self.buckets
                .iter()
                .map(|(name, entries)| (name.clone(), KeyValue::Map(entries.clone())))
                .collect(),
        )
    }
}

impl Drop for KeyBlob {
    fn drop(&mut self) {
        for bucket in self.buckets.values_mut() {
            bucket.values_mut().for_each(Zeroize::zeroize);
        }
    }
}
