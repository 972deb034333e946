//! Core types and traits for sqlgraph.
//!
//! This crate provides the foundations shared by the save and fetch engines:
//!
//! - [`Value`], [`KeyValue`] and [`Row`] for dynamically typed data
//! - the entity model [`Registry`] of [`EntityDescriptor`]s and their
//!   [`AssociationDescriptor`]s
//! - [`Instance`], a populated subset of an entity's properties
//! - structured [`Statement`]s / [`Query`]s and the [`StatementExecutor`]
//!   collaborator that runs them
//! - `Connection` / `TransactionOps` driver traits and [`SqlExecutor`]
//! - `Outcome` re-export from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Budget, Cx, Outcome, RegionId, TaskId};

pub mod connection;
pub mod entity;
pub mod error;
pub mod identifiers;
pub mod instance;
pub mod key;
pub mod registry;
pub mod relationship;
pub mod row;
pub mod sql;
pub mod statement;
pub mod types;
pub mod value;

pub use connection::{Connection, Dialect, IsolationLevel, TransactionOps};
pub use entity::{EntityDescriptor, IdGeneration, ScalarProperty};
pub use error::{
    ConnectionError, ConnectionErrorKind, ConstraintConflictError, CyclicDependencyError,
    DissociationError, Error, GraphPath, MalformedGraphError, MalformedReason, QueryError,
    QueryErrorKind, RegistryError, Result, ShapeError, ShapeErrorKind, TransactionError,
    TransactionErrorKind, TypeError, UnknownPropertyError,
};
pub use identifiers::{is_valid_identifier, quote_ident, quote_ident_mysql};
pub use instance::{Instance, Related};
pub use key::KeyValue;
pub use registry::{Registry, RegistryBuilder};
pub use relationship::{AssociationDescriptor, Cardinality, DissociationPolicy, LinkTable, Ownership};
pub use row::{FromValue, Row};
pub use sql::SqlExecutor;
pub use statement::{
    Executed, KeyFilter, LinkedSelect, OrderTerm, PARENT_COLUMN, Predicate, Query, RootQuery,
    Select, Statement, StatementExecutor,
};
pub use types::SqlType;
pub use value::Value;

/// Unwrap an `Outcome`, returning early from the enclosing function on
/// `Err`, `Cancelled` or `Panicked`.
#[macro_export]
macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            $crate::Outcome::Ok(value) => value,
            $crate::Outcome::Err(e) => return $crate::Outcome::Err(e),
            $crate::Outcome::Cancelled(r) => return $crate::Outcome::Cancelled(r),
            $crate::Outcome::Panicked(p) => return $crate::Outcome::Panicked(p),
        }
    };
}

/// Unwrap a `Result` inside a function returning `Outcome`.
#[macro_export]
macro_rules! try_result {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(e) => return $crate::Outcome::Err(::core::convert::From::from(e)),
        }
    };
}
