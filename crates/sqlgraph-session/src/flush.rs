//! Plan execution.
//!
//! Runs a [`StatementPlan`] entry by entry through a [`StatementExecutor`],
//! threading generated identifiers into later statements. Inserts of
//! identifiable rows run inside a per-row savepoint so that a uniqueness
//! conflict (a concurrent save inserting the same key) can be undone and the
//! row re-resolved as an update against the now-existing row. The retry is
//! taken once per row; a second conflict is a [`ConstraintConflictError`].

use sqlgraph_core::{
    ConstraintConflictError, Cx, Error, GraphPath, Outcome, QueryError, QueryErrorKind, Registry,
    Statement, StatementExecutor, Value, try_outcome, try_result,
};

use crate::normalize::NormalizedGraph;
use crate::plan::{EntryKind, Operation, PlanEntry, PlannedValue, StatementPlan};
use crate::snapshot;

/// Rows affected by a save, per operation kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AffectedRows {
    pub inserted: u64,
    pub updated: u64,
    pub associations_inserted: u64,
    pub associations_deleted: u64,
}

impl AffectedRows {
    fn record(&mut self, kind: EntryKind, rows: u64) {
        match kind {
            EntryKind::Insert => self.inserted += rows,
            EntryKind::Update => self.updated += rows,
            EntryKind::InsertAssociation => self.associations_inserted += rows,
            EntryKind::DeleteAssociation => self.associations_deleted += rows,
        }
    }

    /// Total number of affected rows.
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.associations_inserted + self.associations_deleted
    }
}

/// Result of executing a plan.
#[derive(Debug, Clone, Default)]
pub struct FlushResult {
    pub affected: AffectedRows,
    /// Statements that completed successfully.
    pub statements: usize,
    /// Inserts that hit a uniqueness conflict and were completed as updates.
    pub recovered_conflicts: usize,
    /// Final identifier of every node.
    pub ids: Vec<Option<Value>>,
}

struct Flush<'a, 'r, E> {
    cx: &'a Cx,
    executor: &'a E,
    registry: &'r Registry,
    graph: &'a NormalizedGraph<'r>,
    conflict_retry: bool,
    result: FlushResult,
}

/// Execute `plan` in order.
#[tracing::instrument(level = "debug", skip_all, fields(entries = plan.len()))]
pub async fn execute_plan<E: StatementExecutor>(
    cx: &Cx,
    executor: &E,
    registry: &Registry,
    graph: &NormalizedGraph<'_>,
    plan: &StatementPlan,
    conflict_retry: bool,
) -> Outcome<FlushResult, Error> {
    let start = std::time::Instant::now();
    let mut flush = Flush {
        cx,
        executor,
        registry,
        graph,
        conflict_retry,
        result: FlushResult {
            ids: plan.initial_ids().to_vec(),
            ..FlushResult::default()
        },
    };

    for (position, entry) in plan.entries().enumerate() {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        try_outcome!(flush.run(position, entry).await);
    }

    tracing::debug!(
        elapsed_ms = start.elapsed().as_millis(),
        statements = flush.result.statements,
        recovered = flush.result.recovered_conflicts,
        "Plan executed"
    );
    Outcome::Ok(flush.result)
}

fn conflict(entity: &str, path: &GraphPath, message: impl Into<String>, error: Error) -> Error {
    let source = match error {
        Error::Query(q) => Some(q),
        _ => None,
    };
    Error::ConstraintConflict(ConstraintConflictError {
        entity: entity.to_string(),
        path: path.clone(),
        message: message.into(),
        source,
    })
}

impl<E: StatementExecutor> Flush<'_, '_, E> {
    fn resolve(&self, value: &PlannedValue, path: &GraphPath) -> Result<Value, Error> {
        match value {
            PlannedValue::Literal(v) => Ok(v.clone()),
            PlannedValue::IdOf(node) => self.result.ids[*node].clone().ok_or_else(|| {
                Error::Custom(format!(
                    "identifier of {} is not available for {path}",
                    self.graph.node(*node).path
                ))
            }),
        }
    }

    fn resolve_pairs(
        &self,
        pairs: &[(&'static str, PlannedValue)],
        path: &GraphPath,
    ) -> Result<Vec<(&'static str, Value)>, Error> {
        pairs
            .iter()
            .map(|(column, value)| Ok((*column, self.resolve(value, path)?)))
            .collect()
    }

    fn statement(&self, entry: &PlanEntry) -> Result<Statement, Error> {
        Ok(match &entry.operation {
            Operation::Insert { columns, returning } => {
                let pairs = self.resolve_pairs(columns, &entry.path)?;
                let (columns, values) = pairs.into_iter().unzip();
                Statement::Insert {
                    table: entry.table,
                    columns,
                    values,
                    returning: *returning,
                }
            }
            Operation::Update {
                key_column,
                key,
                set,
            } => Statement::Update {
                table: entry.table,
                key_column: *key_column,
                key: self.resolve(key, &entry.path)?,
                set: self.resolve_pairs(set, &entry.path)?,
            },
            Operation::Delete { filters } => Statement::Delete {
                table: entry.table,
                filters: self.resolve_pairs(filters, &entry.path)?,
            },
        })
    }

    /// Whether a uniqueness conflict on this entry can be recovered.
    fn recoverable(&self, entry: &PlanEntry) -> bool {
        if !self.conflict_retry {
            return false;
        }
        match entry.kind {
            EntryKind::Insert => entry
                .node
                .is_some_and(|n| self.graph.node(n).key.is_resolvable()),
            EntryKind::InsertAssociation => matches!(entry.operation, Operation::Insert { .. }),
            EntryKind::Update | EntryKind::DeleteAssociation => false,
        }
    }

    async fn run(&mut self, position: usize, entry: &PlanEntry) -> Outcome<(), Error> {
        let statement = try_result!(self.statement(entry));
        tracing::trace!(kind = %entry.kind, table = entry.table, path = %entry.path, "Executing plan entry");

        if !self.recoverable(entry) {
            return match self.executor.execute(self.cx, &statement).await {
                Outcome::Ok(executed) => {
                    self.completed(entry, executed.rows_affected, executed.generated_id, &statement)
                }
                Outcome::Err(e) if e.is_unique_violation() => Outcome::Err(conflict(
                    self.entity_name(entry),
                    &entry.path,
                    format!("{} on {} violates a unique constraint", entry.kind, entry.table),
                    e,
                )),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            };
        }

        let savepoint = format!("sqlgraph_row_{position}");
        try_outcome!(self.executor.savepoint(self.cx, &savepoint).await);
        match self.executor.execute(self.cx, &statement).await {
            Outcome::Ok(executed) => {
                try_outcome!(self.executor.release(self.cx, &savepoint).await);
                self.completed(entry, executed.rows_affected, executed.generated_id, &statement)
            }
            Outcome::Err(e) if e.is_unique_violation() => {
                try_outcome!(self.executor.rollback_to(self.cx, &savepoint).await);
                try_outcome!(self.executor.release(self.cx, &savepoint).await);
                if entry.kind == EntryKind::InsertAssociation {
                    tracing::warn!(table = entry.table, path = %entry.path, "Link already present, skipping");
                    self.result.recovered_conflicts += 1;
                    return Outcome::Ok(());
                }
                self.recover(entry, &statement, e).await
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    fn entity_name(&self, entry: &PlanEntry) -> &str {
        entry
            .node
            .map_or(entry.table, |n| self.graph.node(n).entity.name)
    }

    fn completed(
        &mut self,
        entry: &PlanEntry,
        rows: u64,
        generated: Option<Value>,
        statement: &Statement,
    ) -> Outcome<(), Error> {
        if let (EntryKind::Insert, Some(node)) = (entry.kind, entry.node) {
            match generated {
                Some(id) => self.result.ids[node] = Some(id),
                None if self.result.ids[node].is_none() => {
                    return Outcome::Err(Error::Query(QueryError::new(
                        QueryErrorKind::Database,
                        format!("insert into {} returned no identifier", entry.table),
                    )));
                }
                None => {}
            }
        }
        tracing::trace!(kind = statement.kind(), table = entry.table, rows, "Statement done");
        self.result.statements += 1;
        self.result.affected.record(entry.kind, rows);
        Outcome::Ok(())
    }

    /// Re-resolve a conflicting insert as an update of the row that won the race.
    async fn recover(&mut self, entry: &PlanEntry, insert: &Statement, error: Error) -> Outcome<(), Error> {
        let Some(n) = entry.node else {
            return Outcome::Err(error);
        };
        let node = self.graph.node(n);
        let entity = node.entity;
        let existing = try_outcome!(
            snapshot::lookup(self.cx, self.executor, self.registry, entity, &node.key).await
        );
        let Some(row) = existing else {
            return Outcome::Err(conflict(
                entity.name,
                &entry.path,
                format!("insert conflicted but no {} matches {}", entity.name, node.key),
                error,
            ));
        };

        tracing::warn!(
            entity = entity.name,
            key = %node.key,
            id = %row.id,
            path = %entry.path,
            "Insert conflicted with an existing row, updating instead"
        );
        self.result.ids[n] = Some(row.id.clone());
        self.result.recovered_conflicts += 1;

        let Statement::Insert { columns, values, .. } = insert else {
            return Outcome::Ok(());
        };
        let set: Vec<(&'static str, Value)> = columns
            .iter()
            .zip(values)
            .filter(|(column, value)| **column != entity.id.column && !row.cell(column).same_as(value))
            .map(|(column, value)| (*column, value.clone()))
            .collect();
        if set.is_empty() {
            return Outcome::Ok(());
        }

        let update = Statement::Update {
            table: entity.table,
            key_column: entity.id.column,
            key: row.id.clone(),
            set,
        };
        match self.executor.execute(self.cx, &update).await {
            Outcome::Ok(executed) => {
                self.result.statements += 1;
                self.result.affected.record(EntryKind::Update, executed.rows_affected);
                Outcome::Ok(())
            }
            Outcome::Err(e) if e.is_unique_violation() => Outcome::Err(conflict(
                entity.name,
                &entry.path,
                "conflict persisted after re-resolving the insert as an update",
                e,
            )),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}
