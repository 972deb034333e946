//! Shape specifications and shaped retrieval for sqlgraph.
//!
//! `sqlgraph-query` is the **read side**. A [`Shape`] names the scalar
//! properties and nested associations of interest; the [`Fetcher`] loads
//! exactly that shape with one batched query per association edge,
//! independent of how many rows each level holds.
//!
//! Shapes are shared with the write side: `sqlgraph-session` uses them to
//! restrict which parts of an input graph a save reconciles.
//!
//! ```ignore
//! let shape = Shape::of("Book")
//!     .with("publisher", Shape::of("Publisher"))
//!     .with("authors", Shape::of("Author").only(["name"]));
//! let fetched = Fetcher::new(&registry)
//!     .fetch(&cx, &executor, &shape, &RootSource::ids([1_i64, 2, 3]))
//!     .await;
//! ```

pub mod fetch;
pub mod shape;

pub use fetch::{
    DEFAULT_MAX_DEPTH, FetchOptions, FetchReport, Fetched, Fetcher, RootSource, fetch_resolved,
};
pub use shape::{ResolvedAssociation, ResolvedShape, ScalarSelection, Shape};
