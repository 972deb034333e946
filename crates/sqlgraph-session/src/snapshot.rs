//! Stored state of the rows a save touches.
//!
//! Before planning, the engine reads the current row of every identifiable
//! node and the stored targets of every remote-key or link-table association
//! the input graph populates on an existing node. Reads are batched: one
//! query per (entity, key kind) for rows and one per association for targets.

use std::collections::HashMap;

use sqlgraph_core::{
    Cx, EntityDescriptor, Error, KeyFilter, KeyValue, Ownership, Outcome, Query, Registry, Row,
    Select, StatementExecutor, Value, try_outcome, try_result,
};

use crate::normalize::{NodeId, NodeKey, NormalizedGraph};

/// The stored row behind a node.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: Value,
    pub cells: HashMap<&'static str, Value>,
}

impl StoredRow {
    /// Read a row selected with `columns` (the entity's table columns).
    fn from_row(entity: &EntityDescriptor, columns: &[&'static str], row: &Row) -> Option<Self> {
        let id = row.get_by_name(entity.id_column())?.clone();
        if id.is_null() {
            return None;
        }
        let cells = columns
            .iter()
            .filter_map(|column| row.get_by_name(column).map(|value| (*column, value.clone())))
            .collect();
        Some(Self { id, cells })
    }

    /// Stored value of `column`; missing cells read as NULL.
    pub fn cell(&self, column: &str) -> &Value {
        self.cells.get(column).unwrap_or(&Value::Null)
    }
}

/// Current stored state relevant to one normalized graph.
#[derive(Debug, Default)]
pub struct Snapshot {
    rows: Vec<Option<StoredRow>>,
    targets: HashMap<(NodeId, &'static str), Vec<Value>>,
    queries: usize,
}

impl Snapshot {
    /// Stored row of `node`, if it exists.
    pub fn row(&self, node: NodeId) -> Option<&StoredRow> {
        self.rows.get(node).and_then(Option::as_ref)
    }

    pub fn exists(&self, node: NodeId) -> bool {
        self.row(node).is_some()
    }

    /// Identifiers of the targets currently stored for `association` of `node`.
    ///
    /// Only populated for remote-key and link-table associations of existing nodes.
    pub fn stored_targets(&self, node: NodeId, association: &'static str) -> &[Value] {
        self.targets
            .get(&(node, association))
            .map_or(&[], Vec::as_slice)
    }

    /// Number of queries issued to build this snapshot.
    pub fn queries(&self) -> usize {
        self.queries
    }
}

/// Key filter locating the stored row of a node, with the key value to match.
pub(crate) fn key_filter(entity: &EntityDescriptor, key: &NodeKey) -> Option<(Vec<&'static str>, KeyValue)> {
    match key {
        NodeKey::Id(id) => Some((vec![entity.id.column], id.clone())),
        NodeKey::Unique { index, values } => {
            let columns = entity.unique_keys.get(*index)?.iter().map(|p| {
                entity
                    .scalar_property(p)
                    .map_or(entity.id.column, |s| s.column)
            });
            Some((columns.collect(), values.clone()))
        }
        NodeKey::Transient(_) => None,
    }
}

async fn run_query<E: StatementExecutor>(
    cx: &Cx,
    executor: &E,
    query: Query,
    snapshot: &mut Snapshot,
) -> Outcome<Vec<Row>, Error> {
    if let Some(reason) = cx.cancel_reason() {
        return Outcome::Cancelled(reason);
    }
    snapshot.queries += 1;
    executor.query(cx, &query).await
}

/// Look up the stored row of a single node by its key.
pub(crate) async fn lookup<E: StatementExecutor>(
    cx: &Cx,
    executor: &E,
    registry: &Registry,
    entity: &EntityDescriptor,
    key: &NodeKey,
) -> Outcome<Option<StoredRow>, Error> {
    let Some((columns, value)) = key_filter(entity, key) else {
        return Outcome::Ok(None);
    };
    let table_columns = try_result!(registry.table_columns(entity.name));
    let query = Query::Select(Select {
        table: entity.table,
        columns: table_columns.clone(),
        filter: KeyFilter {
            columns,
            keys: vec![value],
        },
        order_by: vec![entity.id.column],
    });
    let rows = try_outcome!(executor.query(cx, &query).await);
    Outcome::Ok(
        rows.iter()
            .find_map(|row| StoredRow::from_row(entity, &table_columns, row)),
    )
}

/// Read the stored state for every node of `graph`.
#[tracing::instrument(level = "debug", skip_all, fields(nodes = graph.len()))]
pub async fn load<E: StatementExecutor>(
    cx: &Cx,
    executor: &E,
    registry: &Registry,
    graph: &NormalizedGraph<'_>,
) -> Outcome<Snapshot, Error> {
    let mut snapshot = Snapshot {
        rows: vec![None; graph.len()],
        ..Snapshot::default()
    };

    // Groups keep first-appearance order so the query sequence is deterministic.
    let mut groups: Vec<((&'static str, Option<usize>), Vec<NodeId>)> = Vec::new();
    for (id, node) in graph.nodes().iter().enumerate() {
        let kind = match &node.key {
            NodeKey::Id(_) => None,
            NodeKey::Unique { index, .. } => Some(*index),
            NodeKey::Transient(_) => continue,
        };
        let group = (node.entity.name, kind);
        match groups.iter_mut().find(|(g, _)| *g == group) {
            Some((_, members)) => members.push(id),
            None => groups.push((group, vec![id])),
        }
    }

    for (_, members) in &groups {
        let entity = graph.node(members[0]).entity;
        let mut columns = Vec::new();
        let mut by_key: HashMap<KeyValue, Vec<NodeId>> = HashMap::new();
        for &member in members {
            if let Some((key_columns, value)) = key_filter(entity, &graph.node(member).key) {
                columns = key_columns;
                by_key.entry(value).or_default().push(member);
            }
        }
        let table_columns = try_result!(registry.table_columns(entity.name));
        let query = Query::Select(Select {
            table: entity.table,
            columns: table_columns.clone(),
            filter: KeyFilter {
                columns: columns.clone(),
                keys: by_key.keys().cloned().collect(),
            },
            order_by: vec![entity.id.column],
        });
        let rows = try_outcome!(run_query(cx, executor, query, &mut snapshot).await);
        for row in &rows {
            let Some(stored) = StoredRow::from_row(entity, &table_columns, row) else {
                continue;
            };
            let values: Vec<Value> = columns
                .iter()
                .map(|c| stored.cell(c).clone())
                .collect();
            if let Some(nodes) = by_key.get(&KeyValue::composite(values)) {
                for &node in nodes {
                    snapshot.rows[node] = Some(stored.clone());
                }
            }
        }
    }

    // Stored targets of populated collections (and remote to-ones) on existing nodes.
    let mut edges: Vec<((&'static str, &'static str), Vec<NodeId>)> = Vec::new();
    for (id, node) in graph.nodes().iter().enumerate() {
        if !snapshot.exists(id) {
            continue;
        }
        for edge in &node.edges {
            if matches!(edge.association.ownership, Ownership::Local { .. }) {
                continue;
            }
            let group = (node.entity.name, edge.association.name);
            match edges.iter_mut().find(|(g, _)| *g == group) {
                Some((_, members)) => members.push(id),
                None => edges.push((group, vec![id])),
            }
        }
    }

    for ((_, association), parents) in &edges {
        let node = graph.node(parents[0]);
        let Some(descriptor) = node.entity.association_named(association) else {
            continue;
        };
        let target = try_result!(registry.describe(descriptor.target));

        let mut owners: HashMap<KeyValue, Vec<NodeId>> = HashMap::new();
        for &parent in parents {
            if let Some(row) = snapshot.row(parent) {
                owners
                    .entry(KeyValue::single(row.id.clone()))
                    .or_default()
                    .push(parent);
            }
        }
        let parent_ids: Vec<Value> = owners.keys().filter_map(|k| k.first().cloned()).collect();

        let (query, owner_column, target_column) = match descriptor.ownership {
            Ownership::Remote { column } => (
                Query::Select(Select {
                    table: target.table,
                    columns: vec![target.id.column, column],
                    filter: KeyFilter::by(column, parent_ids),
                    order_by: vec![target.id.column],
                }),
                column,
                target.id.column,
            ),
            Ownership::LinkTable(link) => (
                Query::Select(Select {
                    table: link.table,
                    columns: vec![link.local_column, link.remote_column],
                    filter: KeyFilter::by(link.local_column, parent_ids),
                    order_by: vec![link.remote_column],
                }),
                link.local_column,
                link.remote_column,
            ),
            Ownership::Local { .. } => continue,
        };

        let rows = try_outcome!(run_query(cx, executor, query, &mut snapshot).await);
        for row in &rows {
            let (Some(owner), Some(target_id)) =
                (row.get_by_name(owner_column), row.get_by_name(target_column))
            else {
                continue;
            };
            let Some(nodes) = owners.get(&KeyValue::single(owner.clone())) else {
                continue;
            };
            for &node in nodes {
                snapshot
                    .targets
                    .entry((node, descriptor.name))
                    .or_default()
                    .push(target_id.clone());
            }
        }
    }

    tracing::debug!(
        existing = snapshot.rows.iter().filter(|r| r.is_some()).count(),
        queries = snapshot.queries,
        "Snapshot loaded"
    );
    Outcome::Ok(snapshot)
}
