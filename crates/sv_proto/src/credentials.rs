//! Static identity material of one session.
//!
//! The protocol client owns the content: we never generate or interpret key
//! pairs here, we only carry them. An empty `Credentials` tells the client to
//! enrol a fresh identity.

use std::collections::BTreeMap;

use zeroize::Zeroize;

use crate::{error::DecodeError, value::KeyValue};

pub const NOISE_KEY: &str = "noiseKey";
pub const SIGNED_IDENTITY_KEY: &str = "signedIdentityKey";
pub const SIGNED_PRE_KEY: &str = "signedPreKey";
pub const ADV_SECRET_KEY: &str = "advSecretKey";
pub const REGISTRATION_ID: &str = "registrationId";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Credentials {
    fields: BTreeMap<String, KeyValue>,
}

impl Credentials {
    pub fn empty() -> Self {
        Self::default()
    }

    /// No identity material at all; the client has to pair from scratch.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&KeyValue> {
        self.fields.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<KeyValue>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<KeyValue> {
        self.fields.remove(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &KeyValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn noise_key(&self) -> Option<&KeyValue> {
        self.get(NOISE_KEY)
    }

    pub fn signed_identity_key(&self) -> Option<&KeyValue> {
        self.get(SIGNED_IDENTITY_KEY)
    }

    pub fn signed_pre_key(&self) -> Option<&KeyValue> {
        self.get(SIGNED_PRE_KEY)
    }

    pub fn adv_secret_key(&self) -> Option<&str> {
        self.get(ADV_SECRET_KEY).and_then(KeyValue::as_str)
    }

    /// Build from a decoded value. The root must be a map.
    pub fn from_value(value: KeyValue) -> Result<Self, DecodeError> {
        match value {
            KeyValue::Map(fields) => Ok(Self { fields }),
            other => Err(DecodeError::new(
                "$",
                format!("credentials must be an object, got {}", variant_name(&other)),
            )),
        }
    }

    pub fn to_value(&self) -> KeyValue {
        KeyValue::Map(self.fields.clone())
    }
}

impl FromIterator<(String, KeyValue)> for Credentials {
    fn from_iter<I: IntoIterator<Item = (String, KeyValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl Drop for Credentials {
    fn drop(&mut self) {
        self.fields.values_mut().for_each(Zeroize::zeroize);
    }
}

pub(crate) fn variant_name(value: &KeyValue) -> &'static str {
    match value {
        KeyValue::Null => "null",
        KeyValue::Bool(_) => "a boolean",
        KeyValue::Number(_) => "a number",
        KeyValue::String(_) => "a string",
        KeyValue::Bytes(_) => "a buffer",
        KeyValue::List(_) => "a list",
        KeyValue::Map(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_read_well_known_fields() {
        let mut creds = Credentials::empty();
        assert!(creds.is_empty());
        creds.insert(ADV_SECRET_KEY, "c2VjcmV0");
        creds.insert(
            NOISE_KEY,
            KeyValue::map().with("private", vec![1u8; 32]).with("public", vec![2u8; 32]),
        );
        assert_eq!(creds.adv_secret_key(), Some("c2VjcmV0"));
        assert!(creds.noise_key().and_then(|k| k.get("public")).is_some());
        assert!(creds.signed_pre_key().is_none());

        let rebuilt = Credentials::from_value(creds.to_value()).unwrap();
        assert_eq!(rebuilt, creds);
    }

    #[test]
    fn non_object_root_is_rejected() {
        let err = Credentials::from_value(KeyValue::List(vec![])).unwrap_err();
        assert_eq!(err.path, "$");
    }
}
