//! The save entry point: normalize, snapshot, plan, execute, back-fill.

use std::collections::HashMap;

use sqlgraph_core::{
    Cx, DissociationPolicy, Error, GraphPath, Instance, Outcome, Registry, ShapeError,
    ShapeErrorKind, StatementExecutor, UnknownPropertyError, try_outcome, try_result,
};
use sqlgraph_query::Shape;
use tracing::{debug, info, warn};

use crate::SessionConfig;
use crate::flush::{self, AffectedRows};
use crate::normalize;
use crate::plan::{self, DissociationPolicies};
use crate::snapshot;

const SAVE_SAVEPOINT: &str = "sqlgraph_save";

/// What a save may do to the root row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SaveMode {
    /// Insert the root when it does not exist, update it otherwise.
    #[default]
    Upsert,
    /// Fail with a conflict when the root already exists.
    InsertOnly,
    /// Fail when the root does not exist.
    UpdateOnly,
}

/// Per-call options for a save.
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Restricts which properties the save considers.
    pub shape: Option<Shape>,
    /// Dissociation overrides keyed by `"Entity.association"`.
    pub overrides: HashMap<String, DissociationPolicy>,
    pub mode: SaveMode,
}

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shape(mut self, shape: Shape) -> Self {
        self.shape = Some(shape);
        self
    }

    /// Override the dissociation policy of one association, named
    /// `"Entity.association"`.
    #[must_use]
    pub fn policy(mut self, association: impl Into<String>, policy: DissociationPolicy) -> Self {
        self.overrides.insert(association.into(), policy);
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: SaveMode) -> Self {
        self.mode = mode;
        self
    }
}

/// A root instance plus the options it is saved with.
#[derive(Debug, Clone)]
pub struct SaveCommand {
    pub root: Instance,
    pub options: SaveOptions,
}

impl SaveCommand {
    pub fn new(root: Instance) -> Self {
        Self {
            root,
            options: SaveOptions::default(),
        }
    }

    #[must_use]
    pub fn options(mut self, options: SaveOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn shape(mut self, shape: Shape) -> Self {
        self.options = self.options.shape(shape);
        self
    }

    #[must_use]
    pub fn policy(mut self, association: impl Into<String>, policy: DissociationPolicy) -> Self {
        self.options = self.options.policy(association, policy);
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: SaveMode) -> Self {
        self.options = self.options.mode(mode);
        self
    }
}

/// Outcome of a successful save.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveResult {
    /// The saved root with every identifier filled in.
    pub root: Instance,
    pub affected: AffectedRows,
    /// Write statements executed.
    pub statements: usize,
    /// Inserts that raced a concurrent writer and were applied as updates.
    pub recovered_conflicts: usize,
}

fn check_overrides(registry: &Registry, overrides: &HashMap<String, DissociationPolicy>) -> sqlgraph_core::Result<()> {
    for key in overrides.keys() {
        let (entity, association) = key.split_once('.').unwrap_or((key.as_str(), ""));
        let descriptor = registry.describe(entity)?;
        if descriptor.association_named(association).is_none() {
            return Err(Error::UnknownProperty(UnknownPropertyError {
                entity: entity.to_string(),
                property: association.to_string(),
                path: GraphPath::root(entity, None),
            }));
        }
    }
    Ok(())
}

/// Save `command.root` through `executor`.
///
/// Validation and planning finish before the first write. Writes run inside
/// one savepoint so a failed save leaves the enclosing transaction as it
/// found it.
pub(crate) async fn save<E: StatementExecutor>(
    cx: &Cx,
    executor: &E,
    registry: &Registry,
    config: &SessionConfig,
    command: SaveCommand,
) -> Outcome<SaveResult, Error> {
    let start = std::time::Instant::now();
    let SaveCommand { mut root, options } = command;

    let scope = match &options.shape {
        Some(shape) => {
            let resolved = try_result!(shape.resolve(registry, config.max_shape_depth));
            if resolved.entity.name != root.entity {
                return Outcome::Err(Error::Shape(ShapeError {
                    kind: ShapeErrorKind::EntityMismatch,
                    path: GraphPath::root(&root.entity, None),
                    message: format!(
                        "shape is rooted at {} but the instance is a {}",
                        resolved.entity.name, root.entity
                    ),
                }));
            }
            Some(resolved)
        }
        None => None,
    };
    try_result!(check_overrides(registry, &options.overrides));

    let graph = try_result!(normalize::normalize(registry, &root, scope.as_ref()));
    let snapshot = try_outcome!(snapshot::load(cx, executor, registry, &graph).await);
    let policies = DissociationPolicies {
        overrides: options.overrides,
        owned: config.owned_collection_policy,
        shared: config.shared_collection_policy,
    };
    let plan = try_result!(plan::plan(registry, &graph, &snapshot, &policies, options.mode));
    debug!(
        nodes = graph.len(),
        reads = snapshot.queries(),
        statements = plan.len(),
        "Save planned"
    );

    if plan.is_empty() {
        graph.back_fill(&mut root, plan.initial_ids());
        info!(
            entity = %root.entity,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Save found nothing to write"
        );
        return Outcome::Ok(SaveResult {
            root,
            affected: AffectedRows::default(),
            statements: 0,
            recovered_conflicts: 0,
        });
    }

    try_outcome!(executor.savepoint(cx, SAVE_SAVEPOINT).await);
    let flushed = match flush::execute_plan(cx, executor, registry, &graph, &plan, config.conflict_retry).await {
        Outcome::Ok(flushed) => {
            try_outcome!(executor.release(cx, SAVE_SAVEPOINT).await);
            flushed
        }
        Outcome::Err(e) => {
            undo(cx, executor).await;
            return Outcome::Err(e);
        }
        Outcome::Cancelled(r) => {
            undo(cx, executor).await;
            return Outcome::Cancelled(r);
        }
        Outcome::Panicked(p) => {
            undo(cx, executor).await;
            return Outcome::Panicked(p);
        }
    };

    graph.back_fill(&mut root, &flushed.ids);
    info!(
        entity = %root.entity,
        inserted = flushed.affected.inserted,
        updated = flushed.affected.updated,
        associations_inserted = flushed.affected.associations_inserted,
        associations_deleted = flushed.affected.associations_deleted,
        recovered = flushed.recovered_conflicts,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Save complete"
    );
    Outcome::Ok(SaveResult {
        root,
        affected: flushed.affected,
        statements: flushed.statements,
        recovered_conflicts: flushed.recovered_conflicts,
    })
}

async fn undo<E: StatementExecutor>(cx: &Cx, executor: &E) {
    if let Outcome::Err(e) = executor.rollback_to(cx, SAVE_SAVEPOINT).await {
        warn!(error = %e, "Failed to roll back save savepoint");
        return;
    }
    if let Outcome::Err(e) = executor.release(cx, SAVE_SAVEPOINT).await {
        warn!(error = %e, "Failed to release save savepoint");
    }
}
