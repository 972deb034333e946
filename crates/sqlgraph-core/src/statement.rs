//! Structured statements and the statement executor collaborator.
//!
//! The save planner and fetch executor never build SQL text. They produce
//! [`Statement`] and [`Query`] values and hand them to a
//! [`StatementExecutor`], which either renders them for a real connection
//! ([`SqlExecutor`](crate::sql::SqlExecutor)) or evaluates them directly
//! (the in-memory backend).

use crate::error::Error;
use crate::key::KeyValue;
use crate::relationship::LinkTable;
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};

/// Column name carrying the parent identifier in [`Query::Linked`] results.
pub const PARENT_COLUMN: &str = "__parent";

/// A write against one table.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `INSERT INTO table (columns) VALUES (values)`, optionally reading
    /// back a generated identifier column.
    Insert {
        table: &'static str,
        columns: Vec<&'static str>,
        values: Vec<Value>,
        returning: Option<&'static str>,
    },
    /// `UPDATE table SET .. WHERE key_column = key`
    Update {
        table: &'static str,
        key_column: &'static str,
        key: Value,
        set: Vec<(&'static str, Value)>,
    },
    /// `DELETE FROM table WHERE c1 = v1 AND ..`
    Delete {
        table: &'static str,
        filters: Vec<(&'static str, Value)>,
    },
}

impl Statement {
    /// Target table.
    pub fn table(&self) -> &'static str {
        match self {
            Statement::Insert { table, .. }
            | Statement::Update { table, .. }
            | Statement::Delete { table, .. } => table,
        }
    }

    /// Short operation name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::Insert { .. } => "insert",
            Statement::Update { .. } => "update",
            Statement::Delete { .. } => "delete",
        }
    }
}

/// Row selection by key membership: `(c1, c2) IN ((..), (..))`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyFilter {
    pub columns: Vec<&'static str>,
    pub keys: Vec<KeyValue>,
}

impl KeyFilter {
    /// Single-column filter.
    pub fn by(column: &'static str, keys: Vec<Value>) -> Self {
        Self {
            columns: vec![column],
            keys: keys.into_iter().map(KeyValue::single).collect(),
        }
    }
}

/// `SELECT columns FROM table WHERE filter ORDER BY order_by`
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: &'static str,
    pub columns: Vec<&'static str>,
    pub filter: KeyFilter,
    pub order_by: Vec<&'static str>,
}

/// Target rows reached through a link table, each tagged with the parent id
/// it was reached from in the [`PARENT_COLUMN`] column.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedSelect {
    pub link: LinkTable,
    pub table: &'static str,
    pub id_column: &'static str,
    pub columns: Vec<&'static str>,
    pub parent_keys: Vec<Value>,
}

/// Opaque filter produced by an external condition builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// SQL boolean expression; each `?` stands for the next entry of `params`.
    pub sql: String,
    pub params: Vec<Value>,
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    pub column: &'static str,
    pub descending: bool,
}

impl OrderTerm {
    pub fn asc(column: &'static str) -> Self {
        Self {
            column,
            descending: false,
        }
    }

    pub fn desc(column: &'static str) -> Self {
        Self {
            column,
            descending: true,
        }
    }
}

/// Root rows of a fetch selected by predicate, ordering and paging.
#[derive(Debug, Clone, PartialEq)]
pub struct RootQuery {
    pub table: &'static str,
    pub columns: Vec<&'static str>,
    pub predicate: Option<Predicate>,
    pub order_by: Vec<OrderTerm>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// A read against storage.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Select(Select),
    Linked(LinkedSelect),
    Roots(RootQuery),
}

impl Query {
    /// Primary table read by the query.
    pub fn table(&self) -> &'static str {
        match self {
            Query::Select(s) => s.table,
            Query::Linked(l) => l.table,
            Query::Roots(r) => r.table,
        }
    }
}

/// Outcome of one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Executed {
    pub rows_affected: u64,
    /// Identifier generated by storage for an insert with `returning`.
    pub generated_id: Option<Value>,
}

/// Executes structured statements inside the caller's unit of work.
///
/// Implementations own the transaction boundary; savepoints let the save
/// engine undo a single conflicting insert or the whole save.
pub trait StatementExecutor: Send + Sync {
    /// Run a read and return all rows.
    fn query(
        &self,
        cx: &Cx,
        query: &Query,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Run a write.
    fn execute(
        &self,
        cx: &Cx,
        statement: &Statement,
    ) -> impl Future<Output = Outcome<Executed, Error>> + Send;

    /// Create a savepoint.
    fn savepoint(&self, cx: &Cx, name: &str) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Undo everything since the savepoint; the savepoint stays active.
    fn rollback_to(&self, cx: &Cx, name: &str) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Drop the savepoint, keeping its changes.
    fn release(&self, cx: &Cx, name: &str) -> impl Future<Output = Outcome<(), Error>> + Send;
}
