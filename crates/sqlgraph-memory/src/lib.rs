//! In-memory storage backend for sqlgraph.
//!
//! [`MemoryStore`] implements `StatementExecutor` directly over process
//! memory, with no SQL in between. It builds its tables from a `Registry`
//! and enforces what the save engine relies on from real storage:
//!
//! - primary keys and declared unique keys (violations report SQLSTATE 23505)
//! - generated identifiers for `IdGeneration::Identity` entities
//! - uniqueness of `(local, remote)` pairs in link tables
//! - nested savepoints
//!
//! Raw SQL predicates are not evaluated; root queries support ordering and
//! paging only.
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlgraph_memory::MemoryStore;
//!
//! let store = MemoryStore::from_registry(&registry);
//! store.seed("publishers", vec![("name", Value::from("Acme"))])?;
//!
//! let fetched = Fetcher::new(&registry)
//!     .fetch(&cx, &store, &Shape::of("Publisher"), &RootSource::all())
//!     .await;
//! assert_eq!(store.query_count(), 1);
//! ```

mod store;
mod table;

pub use store::MemoryStore;
