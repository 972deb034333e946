//! sqlgraph - persist and retrieve whole object graphs over relational storage.
//!
//! sqlgraph treats a root instance and everything reachable from it as one
//! unit:
//!
//! - **Save** brings storage in line with a graph of new, changed and
//!   unchanged instances using the minimum set of writes, ordered so every
//!   referenced row exists first.
//! - **Fetch** loads graphs described by a [`Shape`] with a number of
//!   queries bounded by the shape, never by the data.
//!
//! Entities are described at runtime through a [`Registry`] of
//! [`EntityDescriptor`]s; no code generation is involved.
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlgraph::prelude::*;
//!
//! let registry = Registry::builder()
//!     .register(
//!         EntityDescriptor::new("Book", "books")
//!             .scalar(ScalarProperty::new("title", SqlType::Text))
//!             .association(AssociationDescriptor::many("chapters", "Chapter").remote_fk("book_id")),
//!     )
//!     .register(
//!         EntityDescriptor::new("Chapter", "chapters")
//!             .scalar(ScalarProperty::new("heading", SqlType::Text)),
//!     )
//!     .build()?;
//!
//! let session = Session::new(conn, &registry);
//! let book = Instance::new("Book")
//!     .set("title", "Dune")
//!     .many("chapters", vec![Instance::new("Chapter").set("heading", "One")]);
//! let saved = session.save(&cx, SaveCommand::new(book)).await?;
//!
//! let shape = Shape::of("Book").include("chapters");
//! let fetched = session.fetch(&cx, &shape, &RootSource::ids([saved.root.id.clone()])).await?;
//! assert!(fetched.instances[0].same_as(&saved.root));
//! ```
//!
//! # Features
//!
//! - **Structured concurrency**: every call takes an asupersync [`Cx`] and
//!   returns an [`Outcome`], so cancellation is observed between statements.
//! - **Driver agnostic**: the engine talks to a [`StatementExecutor`]; any
//!   [`Connection`] becomes one through [`SqlExecutor`].
//! - **Concurrent writers**: inserts that lose a uniqueness race are
//!   re-resolved and applied as updates.

pub use sqlgraph_core::{
    // asupersync re-exports
    Budget,
    Cx,
    Outcome,
    RegionId,
    TaskId,
    // Descriptors
    AssociationDescriptor,
    Cardinality,
    DissociationPolicy,
    EntityDescriptor,
    IdGeneration,
    LinkTable,
    Ownership,
    Registry,
    RegistryBuilder,
    ScalarProperty,
    SqlType,
    // Data
    Instance,
    KeyValue,
    Related,
    Row,
    Value,
    // Storage seam
    Connection,
    Dialect,
    Executed,
    IsolationLevel,
    OrderTerm,
    Predicate,
    Query,
    SqlExecutor,
    Statement,
    StatementExecutor,
    TransactionOps,
    // Errors
    Error,
    GraphPath,
    MalformedReason,
    Result,
    ShapeErrorKind,
};

pub use sqlgraph_query::{
    DEFAULT_MAX_DEPTH, FetchOptions, FetchReport, Fetched, Fetcher, RootSource, Shape,
};

pub use sqlgraph_session::{
    AffectedRows, GraphEngine, SaveCommand, SaveMode, SaveOptions, SaveResult, Session,
    SessionConfig,
};

/// Error payload types, for matching on [`Error`] variants.
pub mod error {
    pub use sqlgraph_core::error::*;
}

/// The common imports for working with sqlgraph.
///
/// ```ignore
/// use sqlgraph::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        AssociationDescriptor, Connection, Cx, DissociationPolicy, EntityDescriptor, Error,
        FetchOptions, Fetched, GraphEngine, IdGeneration, Instance, LinkTable, Outcome, Registry,
        Related, RootSource, SaveCommand, SaveMode, SaveResult, ScalarProperty, Session,
        SessionConfig, Shape, SqlType, StatementExecutor, Value,
    };
}
