//! Database connection traits.
//!
//! This module defines the driver-facing abstractions the save and fetch
//! engines run on:
//!
//! - [`Connection`] - executes SQL and opens transactions
//! - [`TransactionOps`] - transactional operations with savepoint support
//! - [`IsolationLevel`] - SQL transaction isolation levels
//! - [`Dialect`] - placeholder and identifier-quoting rules per backend
//!
//! All operations integrate with asupersync's structured concurrency via `Cx` context
//! for proper cancellation and timeout handling.

use crate::identifiers::{quote_ident, quote_ident_mysql};
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read uncommitted: transactions can see uncommitted changes from others.
    ReadUncommitted,

    /// Read committed: transactions only see committed changes from others.
    /// This is the default for PostgreSQL.
    #[default]
    ReadCommitted,

    /// Repeatable read: transactions see a consistent snapshot of the database.
    RepeatableRead,

    /// Serializable: transactions appear to execute sequentially.
    Serializable,
}

impl IsolationLevel {
    /// Get the SQL syntax for this isolation level.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// SQL dialect for generating dialect-specific SQL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Dialect {
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    #[default]
    Postgres,
    /// SQLite dialect (uses ?1, ?2 placeholders)
    Sqlite,
    /// MySQL dialect (uses ? placeholders)
    Mysql,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier for this dialect.
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => quote_ident(name),
            Dialect::Mysql => quote_ident_mysql(name),
        }
    }

    /// Whether `INSERT ... RETURNING` is available.
    pub const fn supports_returning(self) -> bool {
        matches!(self, Dialect::Postgres | Dialect::Sqlite)
    }
}

/// A database connection capable of executing queries.
///
/// All operations are async and take a `Cx` context for cancellation/timeout support.
/// Implementations must be `Send + Sync` for use across async boundaries.
///
/// # Example
///
/// ```rust,ignore
/// let rows = conn.query(&cx, "SELECT * FROM books WHERE id = $1", &[Value::BigInt(1)]).await?;
///
/// let tx = conn.begin(&cx).await?;
/// tx.execute(&cx, "INSERT INTO tags (label) VALUES ($1)", &[Value::Text("rust".into())]).await?;
/// tx.commit(&cx).await?;
/// ```
pub trait Connection: Send + Sync {
    /// The transaction type returned by this connection.
    type Tx<'conn>: TransactionOps
    where
        Self: 'conn;

    /// SQL dialect spoken by this connection.
    fn dialect(&self) -> Dialect;

    /// Execute a query and return all rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, crate::Error>> + Send;

    /// Execute a statement (INSERT, UPDATE, DELETE) and return rows affected.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, crate::Error>> + Send;

    /// Begin a transaction with default isolation level (ReadCommitted).
    fn begin(&self, cx: &Cx) -> impl Future<Output = Outcome<Self::Tx<'_>, crate::Error>> + Send {
        self.begin_with(cx, IsolationLevel::default())
    }

    /// Begin a transaction with a specific isolation level.
    fn begin_with(
        &self,
        cx: &Cx,
        isolation: IsolationLevel,
    ) -> impl Future<Output = Outcome<Self::Tx<'_>, crate::Error>> + Send;
}

/// Trait for transaction operations.
///
/// Transactions must be explicitly committed or rolled back; dropping
/// without commit triggers automatic rollback in the driver.
///
/// # Savepoints
///
/// Savepoints allow partial rollback within a transaction. The save engine
/// wraps every conflict-eligible insert in one:
///
/// ```rust,ignore
/// tx.savepoint(&cx, "sp1").await?;
/// match tx.execute(&cx, insert_sql, &params).await {
///     Outcome::Err(e) if e.is_unique_violation() => tx.rollback_to(&cx, "sp1").await?,
///     other => { other?; tx.release(&cx, "sp1").await? }
/// }
/// ```
pub trait TransactionOps: Send + Sync {
    /// Execute a query within this transaction.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, crate::Error>> + Send;

    /// Execute a statement within this transaction.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, crate::Error>> + Send;

    /// Create a savepoint within this transaction.
    fn savepoint(
        &self,
        cx: &Cx,
        name: &str,
    ) -> impl Future<Output = Outcome<(), crate::Error>> + Send;

    /// Rollback to a previously created savepoint.
    ///
    /// All changes made after the savepoint are discarded, but the transaction
    /// remains active and changes before the savepoint are preserved.
    fn rollback_to(
        &self,
        cx: &Cx,
        name: &str,
    ) -> impl Future<Output = Outcome<(), crate::Error>> + Send;

    /// Release a savepoint, keeping its changes within the transaction.
    fn release(
        &self,
        cx: &Cx,
        name: &str,
    ) -> impl Future<Output = Outcome<(), crate::Error>> + Send;

    /// Commit the transaction, making all changes permanent.
    fn commit(self, cx: &Cx) -> impl Future<Output = Outcome<(), crate::Error>> + Send;

    /// Rollback the transaction, discarding all changes.
    fn rollback(self, cx: &Cx) -> impl Future<Output = Outcome<(), crate::Error>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_default() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
        assert_eq!(IsolationLevel::Serializable.as_sql(), "SERIALIZABLE");
    }

    #[test]
    fn test_dialect_placeholders() {
        assert_eq!(Dialect::Postgres.placeholder(3), "$3");
        assert_eq!(Dialect::Sqlite.placeholder(3), "?3");
        assert_eq!(Dialect::Mysql.placeholder(3), "?");
    }

    #[test]
    fn test_dialect_quoting() {
        assert_eq!(Dialect::Postgres.quote_identifier("books"), "\"books\"");
        assert_eq!(Dialect::Mysql.quote_identifier("books"), "`books`");
        assert!(Dialect::Sqlite.supports_returning());
        assert!(!Dialect::Mysql.supports_returning());
    }
}
