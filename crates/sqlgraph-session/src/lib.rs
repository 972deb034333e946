//! Graph save engine for sqlgraph.
//!
//! `sqlgraph-session` persists whole object graphs. A save takes one root
//! [`Instance`](sqlgraph_core::Instance) with any mix of new, changed and
//! unchanged related instances and brings storage in line with it using the
//! minimum set of writes.
//!
//! # Pipeline
//!
//! 1. **Normalize** ([`normalize`]): flatten the input tree into one node per
//!    distinct row, merging repeated sightings and validating every property
//!    against the [`Registry`].
//! 2. **Snapshot** ([`snapshot`]): read the stored state of every
//!    identifiable node and its populated collections, batched per entity.
//! 3. **Plan** ([`plan`]): diff graph against snapshot and order the writes
//!    so that every row exists before anything references it.
//! 4. **Flush** ([`flush`]): execute the plan, threading generated ids into
//!    later statements and recovering inserts that lose a uniqueness race.
//!
//! Everything up to the plan is side-effect free, so a malformed graph,
//! unknown property, dangling reference, refused dissociation or cyclic
//! insert fails before anything is written.
//!
//! # Entry points
//!
//! - [`GraphEngine`] runs over any [`StatementExecutor`] the caller owns,
//!   usually an open transaction.
//! - [`Session`] owns a [`Connection`] and runs every call in its own
//!   transaction, committing on success and rolling back otherwise.
//!
//! ```ignore
//! let session = Session::new(conn, &registry);
//! let book = Instance::new("Book")
//!     .set("title", "Dune")
//!     .many("chapters", vec![Instance::new("Chapter").set("heading", "One")]);
//! let saved = session.save(&cx, SaveCommand::new(book)).await?;
//! assert!(saved.root.id.is_some());
//! ```

pub mod flush;
pub mod normalize;
pub mod plan;
pub mod save;
pub mod snapshot;

#[cfg(test)]
mod fixtures;

pub use flush::{AffectedRows, FlushResult};
pub use normalize::{NodeId, NodeKey, NormalizedGraph};
pub use plan::{DissociationPolicies, EntryKind, StatementPlan};
pub use save::{SaveCommand, SaveMode, SaveOptions, SaveResult};

use sqlgraph_core::{
    Connection, Cx, DissociationPolicy, Error, IsolationLevel, Outcome, Registry, SqlExecutor,
    StatementExecutor, TransactionOps, try_outcome,
};
use sqlgraph_query::{Fetched, Fetcher, RootSource, Shape, DEFAULT_MAX_DEPTH};
use tracing::warn;

// ============================================================================
// Configuration
// ============================================================================

/// Engine-wide settings shared by every save and fetch.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Deepest shape nesting accepted before a shape is rejected.
    pub max_shape_depth: usize,
    /// Whether an insert that hits a uniqueness conflict is retried as an update.
    pub conflict_retry: bool,
    /// Isolation level of the transactions a [`Session`] opens.
    pub isolation: IsolationLevel,
    /// Default dissociation for collections linked by a key on the child row.
    pub owned_collection_policy: DissociationPolicy,
    /// Default dissociation for collections linked through a link table.
    pub shared_collection_policy: DissociationPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_shape_depth: DEFAULT_MAX_DEPTH,
            conflict_retry: true,
            isolation: IsolationLevel::ReadCommitted,
            owned_collection_policy: DissociationPolicy::ReplaceAll,
            shared_collection_policy: DissociationPolicy::AppendOnly,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_shape_depth(mut self, value: usize) -> Self {
        self.max_shape_depth = value;
        self
    }

    #[must_use]
    pub fn conflict_retry(mut self, value: bool) -> Self {
        self.conflict_retry = value;
        self
    }

    #[must_use]
    pub fn isolation(mut self, value: IsolationLevel) -> Self {
        self.isolation = value;
        self
    }

    #[must_use]
    pub fn owned_collection_policy(mut self, value: DissociationPolicy) -> Self {
        self.owned_collection_policy = value;
        self
    }

    #[must_use]
    pub fn shared_collection_policy(mut self, value: DissociationPolicy) -> Self {
        self.shared_collection_policy = value;
        self
    }
}

// ============================================================================
// Graph Engine
// ============================================================================

/// Save and fetch over a caller-provided executor.
///
/// The engine never begins or ends transactions; callers that want
/// all-or-nothing saves across several calls run them on one transaction.
#[derive(Debug, Clone)]
pub struct GraphEngine<'r> {
    registry: &'r Registry,
    config: SessionConfig,
}

impl<'r> GraphEngine<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self::with_config(registry, SessionConfig::default())
    }

    pub fn with_config(registry: &'r Registry, config: SessionConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Persist the graph rooted at `command.root`.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = %command.root.entity))]
    pub async fn save<E: StatementExecutor>(
        &self,
        cx: &Cx,
        executor: &E,
        command: SaveCommand,
    ) -> Outcome<SaveResult, Error> {
        save::save(cx, executor, self.registry, &self.config, command).await
    }

    /// Load the graphs described by `shape` for the roots in `roots`.
    pub async fn fetch<E: StatementExecutor>(
        &self,
        cx: &Cx,
        executor: &E,
        shape: &Shape,
        roots: &RootSource,
    ) -> Outcome<Fetched, Error> {
        Fetcher::new(self.registry)
            .max_depth(self.config.max_shape_depth)
            .fetch(cx, executor, shape, roots)
            .await
    }
}

// ============================================================================
// Session
// ============================================================================

/// A [`GraphEngine`] bound to a connection, one transaction per call.
pub struct Session<'r, C: Connection> {
    connection: C,
    engine: GraphEngine<'r>,
}

impl<'r, C: Connection> Session<'r, C> {
    pub fn new(connection: C, registry: &'r Registry) -> Self {
        Self::with_config(connection, registry, SessionConfig::default())
    }

    pub fn with_config(connection: C, registry: &'r Registry, config: SessionConfig) -> Self {
        Self {
            connection,
            engine: GraphEngine::with_config(registry, config),
        }
    }

    pub fn engine(&self) -> &GraphEngine<'r> {
        &self.engine
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn into_connection(self) -> C {
        self.connection
    }

    /// Save in a fresh transaction.
    ///
    /// Commits when the save succeeds. Any failure, including a conflict
    /// the engine could not recover, rolls the whole transaction back.
    pub async fn save(&self, cx: &Cx, command: SaveCommand) -> Outcome<SaveResult, Error> {
        let tx = try_outcome!(self.connection.begin_with(cx, self.engine.config.isolation).await);
        let executor = SqlExecutor::new(tx, self.connection.dialect());
        let outcome = self.engine.save(cx, &executor, command).await;
        finish(cx, executor.into_inner(), outcome).await
    }

    /// Fetch in a fresh transaction so every hop reads the same state.
    pub async fn fetch(&self, cx: &Cx, shape: &Shape, roots: &RootSource) -> Outcome<Fetched, Error> {
        let tx = try_outcome!(self.connection.begin_with(cx, self.engine.config.isolation).await);
        let executor = SqlExecutor::new(tx, self.connection.dialect());
        let outcome = self.engine.fetch(cx, &executor, shape, roots).await;
        finish(cx, executor.into_inner(), outcome).await
    }
}

async fn finish<T, Tx: TransactionOps>(cx: &Cx, tx: Tx, outcome: Outcome<T, Error>) -> Outcome<T, Error> {
    match outcome {
        Outcome::Ok(value) => {
            try_outcome!(tx.commit(cx).await);
            Outcome::Ok(value)
        }
        failed => {
            if let Outcome::Err(e) = tx.rollback(cx).await {
                warn!(error = %e, "Rollback failed");
            }
            failed
        }
    }
}
