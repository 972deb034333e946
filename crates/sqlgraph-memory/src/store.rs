//! The in-memory [`StatementExecutor`].

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use sqlgraph_core::{
    Cx, Error, Executed, KeyFilter, KeyValue, LinkedSelect, Outcome, PARENT_COLUMN, Query,
    QueryError, QueryErrorKind, Registry, Result, RootQuery, Row, Select, Statement,
    StatementExecutor, TransactionError, TransactionErrorKind, Value,
};

use crate::table::{StoredRow, Table, cell_eq, compare_values};

type Tables = BTreeMap<&'static str, Table>;

#[derive(Debug, Default)]
struct State {
    tables: Tables,
    /// Named snapshots, innermost last.
    savepoints: Vec<(String, Tables)>,
}

#[derive(Debug, Default)]
struct Log {
    queries: Vec<Query>,
    statements: Vec<Statement>,
}

/// Relational storage held in process memory.
///
/// One table per registered entity (primary key, unique keys and generated
/// identifiers enforced) and one per link table (unique `(local, remote)`).
/// Every query and statement run through [`StatementExecutor`] is logged so
/// tests can assert batching and idempotence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    log: Mutex<Log>,
}

impl MemoryStore {
    /// Create empty tables for every entity and link table in `registry`.
    pub fn from_registry(registry: &Registry) -> Self {
        let mut tables = Tables::new();

        for entity in registry.entities() {
            let columns = registry
                .table_columns(entity.name)
                .unwrap_or_else(|_| vec![entity.id_column()]);
            let mut table = Table::new(entity.table, columns);
            table.key = Some(entity.id_column());
            table.generated = entity.generates_ids();
            table.unique.push(vec![entity.id_column()]);
            for key in &entity.unique_keys {
                let columns = key
                    .iter()
                    .filter_map(|name| entity.scalar_property(name).map(|s| s.column))
                    .collect();
                table.unique.push(columns);
            }
            tables.insert(entity.table, table);
        }

        for entity in registry.entities() {
            for link in entity.associations.iter().filter_map(|a| a.link()) {
                tables.entry(link.table).or_insert_with(|| {
                    let mut table =
                        Table::new(link.table, vec![link.local_column, link.remote_column]);
                    table.unique.push(vec![link.local_column, link.remote_column]);
                    table
                });
            }
        }

        tracing::debug!(tables = tables.len(), "Memory store created");
        Self {
            state: Mutex::new(State {
                tables,
                savepoints: Vec::new(),
            }),
            log: Mutex::new(Log::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log(&self) -> MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a row as if committed by another unit of work: it is not
    /// logged and survives rollback to any open savepoint.
    pub fn seed(&self, table: &str, values: Vec<(&'static str, Value)>) -> Result<Executed> {
        let mut state = self.state();
        let row: StoredRow = values.into_iter().collect();
        let target = table_mut(&mut state.tables, table)?;
        let idx = target.insert(row)?;
        let stored = target.rows[idx].clone();
        let generated_id = target.key.and_then(|k| stored.get(k).cloned());

        for (_, snapshot) in &mut state.savepoints {
            if let Some(t) = snapshot.get_mut(table) {
                if let Err(e) = t.insert(stored.clone()) {
                    tracing::debug!(table = table, error = %e, "Seed row not copied into savepoint");
                }
            }
        }
        Ok(Executed {
            rows_affected: 1,
            generated_id,
        })
    }

    /// Every row of `table`, all declared columns, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        let state = self.state();
        let Some(t) = state.tables.get(table) else {
            return Vec::new();
        };
        let names: Vec<String> = t.columns.iter().map(|c| (*c).to_string()).collect();
        t.rows
            .iter()
            .map(|row| Row::new(names.clone(), Table::project(row, &t.columns)))
            .collect()
    }

    /// Number of rows in `table`.
    pub fn row_count(&self, table: &str) -> usize {
        self.state().tables.get(table).map_or(0, |t| t.rows.len())
    }

    /// Queries run since creation or the last [`clear_log`](Self::clear_log).
    pub fn query_count(&self) -> usize {
        self.log().queries.len()
    }

    /// Statements run since creation or the last [`clear_log`](Self::clear_log).
    pub fn statement_count(&self) -> usize {
        self.log().statements.len()
    }

    pub fn queries(&self) -> Vec<Query> {
        self.log().queries.clone()
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.log().statements.clone()
    }

    pub fn clear_log(&self) {
        let mut log = self.log();
        log.queries.clear();
        log.statements.clear();
    }

    /// Number of open savepoints.
    pub fn savepoint_depth(&self) -> usize {
        self.state().savepoints.len()
    }

    fn query_sync(&self, query: &Query) -> Result<Vec<Row>> {
        self.log().queries.push(query.clone());
        let state = self.state();
        match query {
            Query::Select(select) => run_select(&state.tables, select),
            Query::Linked(linked) => run_linked(&state.tables, linked),
            Query::Roots(roots) => run_roots(&state.tables, roots),
        }
    }

    fn execute_sync(&self, statement: &Statement) -> Result<Executed> {
        self.log().statements.push(statement.clone());
        let mut state = self.state();
        let table = table_mut(&mut state.tables, statement.table())?;
        let executed = match statement {
            Statement::Insert {
                columns,
                values,
                returning,
                ..
            } => {
                let row: StoredRow = columns.iter().copied().zip(values.iter().cloned()).collect();
                let idx = table.insert(row)?;
                Executed {
                    rows_affected: 1,
                    generated_id: returning.and_then(|c| table.rows[idx].get(c).cloned()),
                }
            }
            Statement::Update {
                key_column,
                key,
                set,
                ..
            } => Executed {
                rows_affected: table.update(*key_column, key, set)?,
                generated_id: None,
            },
            Statement::Delete { filters, .. } => Executed {
                rows_affected: table.delete(filters)?,
                generated_id: None,
            },
        };
        tracing::trace!(
            kind = statement.kind(),
            table = statement.table(),
            rows = executed.rows_affected,
            "Memory statement"
        );
        Ok(executed)
    }

    fn savepoint_sync(&self, name: &str) {
        let mut state = self.state();
        let snapshot = state.tables.clone();
        state.savepoints.push((name.to_string(), snapshot));
    }

    fn rollback_to_sync(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        let pos = savepoint_position(&state.savepoints, name)?;
        state.savepoints.truncate(pos + 1);
        state.tables = state.savepoints[pos].1.clone();
        Ok(())
    }

    fn release_sync(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        let pos = savepoint_position(&state.savepoints, name)?;
        state.savepoints.truncate(pos);
        Ok(())
    }
}

impl StatementExecutor for MemoryStore {
    fn query(&self, _cx: &Cx, query: &Query) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let result = self.query_sync(query);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn execute(
        &self,
        _cx: &Cx,
        statement: &Statement,
    ) -> impl Future<Output = Outcome<Executed, Error>> + Send {
        let result = self.execute_sync(statement);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn savepoint(&self, _cx: &Cx, name: &str) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.savepoint_sync(name);
        async move { Outcome::Ok(()) }
    }

    fn rollback_to(&self, _cx: &Cx, name: &str) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.rollback_to_sync(name);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn release(&self, _cx: &Cx, name: &str) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.release_sync(name);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }
}

fn table_mut<'a>(tables: &'a mut Tables, name: &str) -> Result<&'a mut Table> {
    tables.get_mut(name).ok_or_else(|| no_such_table(name))
}

fn table_ref<'a>(tables: &'a Tables, name: &str) -> Result<&'a Table> {
    tables.get(name).ok_or_else(|| no_such_table(name))
}

fn no_such_table(name: &str) -> Error {
    Error::Query(QueryError::new(
        QueryErrorKind::NotFound,
        format!("no such table: {name}"),
    ))
}

fn savepoint_position(savepoints: &[(String, Tables)], name: &str) -> Result<usize> {
    savepoints
        .iter()
        .rposition(|(n, _)| n == name)
        .ok_or_else(|| {
            Error::Transaction(TransactionError {
                kind: TransactionErrorKind::SavepointNotFound,
                message: format!("no such savepoint: {name}"),
            })
        })
}

fn column_names(columns: &[&'static str]) -> Vec<String> {
    columns.iter().map(|c| (*c).to_string()).collect()
}

fn matches_filter(row: &StoredRow, filter: &KeyFilter) -> bool {
    filter.keys.iter().any(|key| {
        filter.columns.len() == key.values().len()
            && filter
                .columns
                .iter()
                .zip(key.values())
                .all(|(c, v)| cell_eq(row.get(c), v))
    })
}

fn sort_rows(rows: &mut [&StoredRow], order: &[(&'static str, bool)]) {
    rows.sort_by(|a, b| {
        for (column, descending) in order {
            let null = Value::Null;
            let x = a.get(column).unwrap_or(&null);
            let y = b.get(column).unwrap_or(&null);
            let ord = compare_values(x, y);
            let ord = if *descending { ord.reverse() } else { ord };
            if ord.is_ne() {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

fn run_select(tables: &Tables, select: &Select) -> Result<Vec<Row>> {
    let table = table_ref(tables, select.table)?;
    table.check_columns(select.columns.iter().chain(&select.filter.columns))?;
    let mut rows: Vec<&StoredRow> = table
        .rows
        .iter()
        .filter(|row| matches_filter(row, &select.filter))
        .collect();
    let order: Vec<_> = select.order_by.iter().map(|c| (*c, false)).collect();
    sort_rows(&mut rows, &order);

    let names = column_names(&select.columns);
    Ok(rows
        .into_iter()
        .map(|row| Row::new(names.clone(), Table::project(row, &select.columns)))
        .collect())
}

fn run_linked(tables: &Tables, linked: &LinkedSelect) -> Result<Vec<Row>> {
    let link = table_ref(tables, linked.link.table)?;
    let target = table_ref(tables, linked.table)?;
    target.check_columns(linked.columns.iter())?;

    let parents: HashSet<KeyValue> = linked
        .parent_keys
        .iter()
        .filter(|v| !v.is_null())
        .map(|v| KeyValue::single(v.clone()))
        .collect();

    let mut pairs: Vec<(&Value, &StoredRow)> = Vec::new();
    for link_row in &link.rows {
        let Some(parent) = link_row.get(linked.link.local_column) else {
            continue;
        };
        if !parents.contains(&KeyValue::single(parent.clone())) {
            continue;
        }
        let Some(remote) = link_row.get(linked.link.remote_column) else {
            continue;
        };
        if let Some(row) = target
            .rows
            .iter()
            .find(|row| cell_eq(row.get(linked.id_column), remote))
        {
            pairs.push((parent, row));
        }
    }

    let null = Value::Null;
    pairs.sort_by(|(pa, ra), (pb, rb)| {
        compare_values(pa, pb).then_with(|| {
            compare_values(
                ra.get(linked.id_column).unwrap_or(&null),
                rb.get(linked.id_column).unwrap_or(&null),
            )
        })
    });

    let mut names = vec![PARENT_COLUMN.to_string()];
    names.extend(column_names(&linked.columns));
    Ok(pairs
        .into_iter()
        .map(|(parent, row)| {
            let mut values = vec![parent.clone()];
            values.extend(Table::project(row, &linked.columns));
            Row::new(names.clone(), values)
        })
        .collect())
}

fn run_roots(tables: &Tables, roots: &RootQuery) -> Result<Vec<Row>> {
    if roots.predicate.is_some() {
        return Err(Error::Query(QueryError::new(
            QueryErrorKind::Unsupported,
            "the memory store cannot evaluate SQL predicates",
        )));
    }
    let table = table_ref(tables, roots.table)?;
    table.check_columns(roots.columns.iter().chain(roots.order_by.iter().map(|t| &t.column)))?;

    let mut rows: Vec<&StoredRow> = table.rows.iter().collect();
    let mut order: Vec<_> = roots.order_by.iter().map(|t| (t.column, t.descending)).collect();
    if let Some(key) = table.key {
        order.push((key, false));
    }
    sort_rows(&mut rows, &order);

    let offset = usize::try_from(roots.offset.unwrap_or(0)).unwrap_or(usize::MAX);
    let limit = roots
        .limit
        .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));

    let names = column_names(&roots.columns);
    Ok(rows
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|row| Row::new(names.clone(), Table::project(row, &roots.columns)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use sqlgraph_core::{
        AssociationDescriptor, EntityDescriptor, LinkTable, OrderTerm, Predicate, ScalarProperty,
        SqlType,
    };

    fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => panic!("unexpected error: {e}"),
            Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
    }

    fn registry() -> Registry {
        Registry::builder()
            .register(
                EntityDescriptor::new("Tag", "tags")
                    .scalar(ScalarProperty::new("label", SqlType::Text))
                    .unique_key(&["label"]),
            )
            .register(
                EntityDescriptor::new("Post", "posts")
                    .scalar(ScalarProperty::new("title", SqlType::Text))
                    .association(
                        AssociationDescriptor::many("tags", "Tag")
                            .link_table(LinkTable::new("post_tags", "post_id", "tag_id")),
                    ),
            )
            .build()
            .unwrap()
    }

    fn insert(table: &'static str, columns: Vec<&'static str>, values: Vec<Value>) -> Statement {
        Statement::Insert {
            table,
            columns,
            values,
            returning: Some("id"),
        }
    }

    #[test]
    fn test_tables_created_from_registry() {
        let store = MemoryStore::from_registry(&registry());
        assert_eq!(store.row_count("tags"), 0);
        assert_eq!(store.row_count("post_tags"), 0);
        assert!(store.rows("nope").is_empty());
    }

    #[test]
    fn test_insert_returns_generated_id_and_enforces_unique_keys() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let store = MemoryStore::from_registry(&registry());

            let first = unwrap_outcome(
                store
                    .execute(&cx, &insert("tags", vec!["label"], vec![Value::from("rust")]))
                    .await,
            );
            assert_eq!(first.generated_id, Some(Value::BigInt(1)));

            match store
                .execute(&cx, &insert("tags", vec!["label"], vec![Value::from("rust")]))
                .await
            {
                Outcome::Err(e) => assert!(e.is_unique_violation()),
                other => panic!("expected unique violation, got {other:?}"),
            }
            assert_eq!(store.row_count("tags"), 1);
            assert_eq!(store.statement_count(), 2);
        });
    }

    #[test]
    fn test_savepoint_rollback_and_release() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let store = MemoryStore::from_registry(&registry());

            unwrap_outcome(store.savepoint(&cx, "outer").await);
            unwrap_outcome(
                store
                    .execute(&cx, &insert("tags", vec!["label"], vec![Value::from("a")]))
                    .await,
            );
            store.seed("tags", vec![("label", Value::from("concurrent"))]).unwrap();
            unwrap_outcome(store.rollback_to(&cx, "outer").await);

            let rows = store.rows("tags");
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].get_by_name("label"), Some(&Value::from("concurrent")));

            unwrap_outcome(store.release(&cx, "outer").await);
            assert_eq!(store.savepoint_depth(), 0);
            assert!(matches!(
                store.release(&cx, "outer").await,
                Outcome::Err(Error::Transaction(_))
            ));
        });
    }

    #[test]
    fn test_select_linked_and_roots() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let store = MemoryStore::from_registry(&registry());
            for label in ["b", "a", "c"] {
                store.seed("tags", vec![("label", Value::from(label))]).unwrap();
            }
            store.seed("posts", vec![("title", Value::from("p"))]).unwrap();
            for tag in [3_i64, 1] {
                store
                    .seed("post_tags", vec![("post_id", Value::BigInt(1)), ("tag_id", Value::BigInt(tag))])
                    .unwrap();
            }

            let rows = unwrap_outcome(
                store
                    .query(
                        &cx,
                        &Query::Select(Select {
                            table: "tags",
                            columns: vec!["id", "label"],
                            filter: KeyFilter::by("id", vec![Value::Int(2), Value::Int(1)]),
                            order_by: vec!["id"],
                        }),
                    )
                    .await,
            );
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0].get_by_name("label"), Some(&Value::from("b")));

            let linked = unwrap_outcome(
                store
                    .query(
                        &cx,
                        &Query::Linked(LinkedSelect {
                            link: LinkTable::new("post_tags", "post_id", "tag_id"),
                            table: "tags",
                            id_column: "id",
                            columns: vec!["id", "label"],
                            parent_keys: vec![Value::BigInt(1)],
                        }),
                    )
                    .await,
            );
            let labels: Vec<_> = linked.iter().map(|r| r.get_by_name("label").cloned()).collect();
            assert_eq!(labels, vec![Some(Value::from("b")), Some(Value::from("c"))]);
            assert_eq!(linked[0].get_by_name(PARENT_COLUMN), Some(&Value::BigInt(1)));

            let roots = RootQuery {
                table: "tags",
                columns: vec!["id", "label"],
                predicate: None,
                order_by: vec![OrderTerm::asc("label")],
                limit: Some(2),
                offset: None,
            };
            let sorted = unwrap_outcome(store.query(&cx, &Query::Roots(roots.clone())).await);
            assert_eq!(sorted[0].get_by_name("label"), Some(&Value::from("a")));
            assert_eq!(sorted.len(), 2);

            let filtered = RootQuery {
                predicate: Some(Predicate {
                    sql: "label = ?".to_string(),
                    params: vec![Value::from("a")],
                }),
                ..roots
            };
            assert!(matches!(
                store.query(&cx, &Query::Roots(filtered)).await,
                Outcome::Err(Error::Query(_))
            ));
            assert_eq!(store.query_count(), 4);
        });
    }
}
