//! Database capability and its SQLite adapter (sqlx).
//!
//! The repository only ever talks to [`DatabaseConnection`]: a parameterized
//! `execute` returning plain rows. Values are always bound, never spliced into
//! the SQL text, so codec output with quotes or newlines is stored verbatim.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow},
    Column, Row as _, TypeInfo, ValueRef,
};

use crate::error::DatabaseError;

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// One result row, columns in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new(columns: Vec<(String, SqlValue)>) -> Self {
        Self { columns }
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Text column; `None` for SQL NULL or a missing column.
    pub fn text(&self, column: &str) -> Result<Option<&str>, DatabaseError> {
        match self.get(column) {
            None | Some(SqlValue::Null) => Ok(None),
            Some(SqlValue::Text(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(mismatch(column, "text", other)),
        }
    }

    pub fn int(&self, column: &str) -> Result<i64, DatabaseError> {
        match self.get(column) {
            Some(SqlValue::Int(i)) => Ok(*i),
            Some(SqlValue::Bool(b)) => Ok(i64::from(*b)),
            Some(other) => Err(mismatch(column, "integer", other)),
            None => Err(missing(column)),
        }
    }

    /// SQLite has no boolean storage class; 0/1 integers are accepted.
    pub fn bool(&self, column: &str) -> Result<bool, DatabaseError> {
        match self.get(column) {
            Some(SqlValue::Bool(b)) => Ok(*b),
            Some(SqlValue::Int(i)) => Ok(*i != 0),
            Some(other) => Err(mismatch(column, "boolean", other)),
            None => Err(missing(column)),
        }
    }
}

fn mismatch(column: &str, expected: &str, got: &SqlValue) -> DatabaseError {
    DatabaseError::Column {
        column: column.to_owned(),
        reason: format!("expected {expected}, got {got:?}"),
    }
}

fn missing(column: &str) -> DatabaseError {
    DatabaseError::Column {
        column: column.to_owned(),
        reason: "not present in result".into(),
    }
}

#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    /// Run one statement with bound parameters and return its rows
    /// (empty for statements that produce none).
    async fn execute(&self, query: &str, params: &[SqlValue]) -> Result<Vec<Row>, DatabaseError>;
}

/// SQLite through a shared sqlx pool. Cheap to clone.
#[derive(Clone)]
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    /// Open (or create) the database behind `url`, e.g. `sqlite://auth.db`.
    ///
    /// WAL keeps readers of one session from blocking the writer of another.
    pub async fn connect(url: &str) -> Result<Self, DatabaseError> {
        let opts = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new().connect_with(opts).await?;
        Ok(Self { pool })
    }

    /// Private in-memory database. A single connection that never expires,
    /// since every new connection would see its own empty database.
    pub async fn in_memory() -> Result<Self, DatabaseError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl DatabaseConnection for SqliteDatabase {
    async fn execute(&self, query: &str, params: &[SqlValue]) -> Result<Vec<Row>, DatabaseError> {
        let mut statement = sqlx::query(query);
        for param in params {
            statement = match param {
                SqlValue::Null => statement.bind(Option::<String>::None),
                SqlValue::Bool(b) => statement.bind(*b),
                SqlValue::Int(i) => statement.bind(*i),
                SqlValue::Real(f) => statement.bind(*f),
                SqlValue::Text(s) => statement.bind(s.clone()),
                SqlValue::Blob(b) => statement.bind(b.clone()),
            };
        }
        let rows = statement.fetch_all(&self.pool).await?;
        rows.iter().map(convert_row).collect()
    }
}

fn convert_row(row: &SqliteRow) -> Result<Row, DatabaseError> {
    let mut columns = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            // Storage class of the value itself, not the declared column type.
            let storage = raw.type_info().name().to_ascii_uppercase();
            match storage.as_str() {
                "INTEGER" | "INT" | "INT8" | "BIGINT" => {
                    SqlValue::Int(row.try_get_unchecked::<i64, _>(idx)?)
                }
                "BOOLEAN" | "BOOL" => SqlValue::Bool(row.try_get_unchecked::<bool, _>(idx)?),
                "REAL" | "FLOAT" | "DOUBLE" => SqlValue::Real(row.try_get_unchecked::<f64, _>(idx)?),
                "BLOB" => SqlValue::Blob(row.try_get_unchecked::<Vec<u8>, _>(idx)?),
                _ => SqlValue::Text(row.try_get_unchecked::<String, _>(idx)?),
            }
        };
        columns.push((column.name().to_owned(), value));
    }
    Ok(Row::new(columns))
}
