//! App-state-sync-key data.
//!
//! Stored entries of the `app-state-sync-key` category are plain objects; the
//! protocol client expects them re-materialized into this structure. Field
//! names follow the client's wire schema (`keyData`, `fingerprint`,
//! `timestamp`).

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::{error::ProtoError, value::KeyValue};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppStateSyncKeyFingerprint {
    pub raw_id: Option<u32>,
    pub current_index: Option<u32>,
    pub device_indexes: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppStateSyncKeyData {
    pub key_data: Option<Vec<u8>>,
    pub fingerprint: Option<AppStateSyncKeyFingerprint>,
    /// Milliseconds since the epoch.
    pub timestamp: Option<i64>,
}

impl AppStateSyncKeyData {
    /// Reconstruct from a stored entry. `id` is only used in error messages.
    ///
    /// Accepts `keyData` as a buffer or base64 text, and `timestamp` as a
    /// number, numeric text, or a `{low, high}` 64-bit pair.
    pub fn from_value(id: &str, value: &KeyValue) -> Result<Self, ProtoError> {
        let fail = |reason: String| ProtoError::Reconstruct {
            id: id.to_owned(),
            reason,
        };
        if value.as_map().is_none() {
            return Err(fail("entry is not an object".into()));
        }

        let key_data = match value.get("keyData") {
            None | Some(KeyValue::Null) => None,
            Some(KeyValue::Bytes(bytes)) => Some(bytes.clone()),
            Some(KeyValue::String(b64)) => Some(
                STANDARD
                    .decode(b64.as_bytes())
                    .map_err(|e| fail(format!("keyData is not base64: {e}")))?,
            ),
            Some(_) => return Err(fail("keyData must be a buffer".into())),
        };

        let fingerprint = match value.get("fingerprint") {
            None | Some(KeyValue::Null) => None,
            Some(fp @ KeyValue::Map(_)) => Some(AppStateSyncKeyFingerprint {
                raw_id: optional_u32(fp.get("rawId")).map_err(|r| fail(format!("rawId {r}")))?,
                current_index: optional_u32(fp.get("currentIndex"))
                    .map_err(|r| fail(format!("currentIndex {r}")))?,
                device_indexes: match fp.get("deviceIndexes") {
                    None | Some(KeyValue::Null) => Vec::new(),
                    Some(KeyValue::List(items)) => items
                        .iter()
                        .map(|item| optional_u32(Some(item)).map(Option::unwrap_or_default))
                        .collect::<Result<_, _>>()
                        .map_err(|r| fail(format!("deviceIndexes {r}")))?,
                    Some(_) => return Err(fail("deviceIndexes must be a list".into())),
                },
            }),
            Some(_) => return Err(fail("fingerprint must be an object".into())),
        };

        let timestamp = match value.get("timestamp") {
            None | Some(KeyValue::Null) => None,
            Some(ts) => Some(timestamp_millis(ts).ok_or_else(|| fail("timestamp is not an integer".into()))?),
        };

        Ok(Self {
            key_data,
            fingerprint,
            timestamp,
        })
    }

    pub fn to_value(&self) -> KeyValue {
        let mut value = KeyValue::map();
        if let Some(bytes) = &self.key_data {
            value = value.with("keyData", bytes.clone());
        }
        if let Some(fp) = &self.fingerprint {
            let mut fingerprint = KeyValue::map().with(
                "deviceIndexes",
                fp.device_indexes
                    .iter()
                    .map(|&i| KeyValue::from(i))
                    .collect::<Vec<_>>(),
            );
            if let Some(raw_id) = fp.raw_id {
                fingerprint = fingerprint.with("rawId", raw_id);
            }
            if let Some(index) = fp.current_index {
                fingerprint = fingerprint.with("currentIndex", index);
            }
            value = value.with("fingerprint", fingerprint);
        }
        if let Some(ts) = self.timestamp {
            value = value.with("timestamp", ts);
        }
        value
    }
}

fn optional_u32(value: Option<&KeyValue>) -> Result<Option<u32>, &'static str> {
    match value {
        None | Some(KeyValue::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or("is not an unsigned 32-bit integer"),
    }
}

fn timestamp_millis(value: &KeyValue) -> Option<i64> {
    match value {
        KeyValue::Number(n) => n.as_i64(),
        KeyValue::String(s) => s.trim().parse().ok(),
        // 64-bit values split into two 32-bit halves by JavaScript encoders.
        KeyValue::Map(_) => {
            let low = value.get("low")?.as_i64()?;
            let high = value.get("high")?.as_i64()?;
            Some((high << 32) | (low & 0xffff_ffff))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    #[test]
    fn reconstructs_stored_entry() {
        let stored = codec::decode(
            r#"{"keyData":{"type":"Buffer","data":"AAEC"},
                "fingerprint":{"rawId":77,"currentIndex":2,"deviceIndexes":[0,2]},
                "timestamp":"1700000000000"}"#,
        )
        .unwrap();
        let data = AppStateSyncKeyData::from_value("AAAAAF1k", &stored).unwrap();
        assert_eq!(data.key_data, Some(vec![0, 1, 2]));
        assert_eq!(
            data.fingerprint,
            Some(AppStateSyncKeyFingerprint {
                raw_id: Some(77),
                current_index: Some(2),
                device_indexes: vec![0, 2],
            })
        );
        assert_eq!(data.timestamp, Some(1_700_000_000_000));
    }

    #[test]
    fn long_pair_timestamp_and_base64_key_data() {
        let stored = KeyValue::map()
            .with("keyData", "AAEC")
            .with("timestamp", KeyValue::map().with("low", 5i64).with("high", 1i64));
        let data = AppStateSyncKeyData::from_value("k", &stored).unwrap();
        assert_eq!(data.key_data, Some(vec![0, 1, 2]));
        assert_eq!(data.timestamp, Some((1i64 << 32) + 5));
    }

    #[test]
    fn to_value_reconstructs_identically() {
        let data = AppStateSyncKeyData {
            key_data: Some(vec![9; 32]),
            fingerprint: Some(AppStateSyncKeyFingerprint {
                raw_id: Some(1),
                current_index: None,
                device_indexes: vec![3],
            }),
            timestamp: Some(42),
        };
        assert_eq!(AppStateSyncKeyData::from_value("k", &data.to_value()).unwrap(), data);
    }

    #[test]
    fn rejects_wrong_shapes() {
        let err = AppStateSyncKeyData::from_value("bad", &KeyValue::from("x")).unwrap_err();
        assert!(matches!(err, ProtoError::Reconstruct { id, .. } if id == "bad"));

        let stored = KeyValue::map().with("keyData", true);
        assert!(AppStateSyncKeyData::from_value("k", &stored).is_err());
    }
}
