//! Row model of the `auth_sessions` table.

use serde::Serialize;

use crate::{db::Row, error::DatabaseError};

pub const SESSIONS_TABLE: &str = "auth_sessions";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRecord {
    pub id: String,
    /// Codec text of the credentials; NULL only before the first save.
    pub credentials: Option<String>,
    /// Codec text of the key-blob (column `keys_`).
    pub keys: Option<String>,
    pub is_active: bool,
}

impl TryFrom<&Row> for SessionRecord {
    type Error = DatabaseError;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row
                .text("id")?
                .map(str::to_owned)
                .ok_or_else(|| DatabaseError::Column {
                    column: "id".into(),
                    reason: "primary key is NULL".into(),
                })?,
            credentials: row.text("credentials")?.map(str::to_owned),
            keys: row.text("keys_")?.map(str::to_owned),
            is_active: row.bool("is_active")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqlValue;

    #[test]
    fn record_from_row() {
        let row = Row::new(vec![
            ("id".into(), SqlValue::from("alpha")),
            ("credentials".into(), SqlValue::Null),
            ("keys_".into(), SqlValue::from("{}")),
            ("is_active".into(), SqlValue::Int(1)),
        ]);
        let record = SessionRecord::try_from(&row).expect("valid row");
        assert_eq!(record.id, "alpha");
        assert_eq!(record.credentials, None);
        assert!(record.is_active);

        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["keys"], "{}");
    }

    #[test]
    fn null_id_is_rejected() {
        let row = Row::new(vec![
            ("id".into(), SqlValue::Null),
            ("is_active".into(), SqlValue::Bool(true)),
        ]);
        assert!(SessionRecord::try_from(&row).is_err());
    }
}
