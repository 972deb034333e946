//! Diff and statement planning.
//!
//! Compares a [`NormalizedGraph`] with its [`Snapshot`] and produces the
//! minimal [`StatementPlan`]:
//!
//! - nodes without a stored row are inserted with their populated scalars
//!   and the foreign keys they own
//! - existing nodes are updated only in the columns whose populated value
//!   differs from storage; unpopulated columns are never written
//! - link-table and remote-key collections add the missing links and, per
//!   the association's [`DissociationPolicy`], remove stored links the input
//!   no longer declares
//!
//! Entries are ordered removals first, then inserts, updates and new links,
//! with every entry after the inserts it takes identifiers from. A cycle among
//! to-be-inserted rows is a [`CyclicDependencyError`].

use std::collections::{HashMap, HashSet};
use std::fmt;

use sqlgraph_core::{
    AssociationDescriptor, ConstraintConflictError, CyclicDependencyError, DissociationError,
    DissociationPolicy, Error, GraphPath, KeyValue, MalformedReason, Ownership, Registry, Result,
    Value,
};

use crate::normalize::{Node, NodeId, NormalizedGraph, Targets};
use crate::save::SaveMode;
use crate::snapshot::Snapshot;

/// A column value known at planning time or produced by an earlier insert.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedValue {
    Literal(Value),
    /// The identifier of a node, generated or stored.
    IdOf(NodeId),
}

/// What a plan entry does, as counted in the save result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Insert,
    Update,
    InsertAssociation,
    DeleteAssociation,
}

impl EntryKind {
    /// Execution priority: removals, inserts, updates, new links.
    fn rank(self) -> u8 {
        match self {
            EntryKind::DeleteAssociation => 0,
            EntryKind::Insert => 1,
            EntryKind::Update => 2,
            EntryKind::InsertAssociation => 3,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntryKind::Insert => "insert",
            EntryKind::Update => "update",
            EntryKind::InsertAssociation => "insert-association",
            EntryKind::DeleteAssociation => "delete-association",
        })
    }
}

/// The statement an entry issues once its planned values are resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Insert {
        columns: Vec<(&'static str, PlannedValue)>,
        returning: Option<&'static str>,
    },
    Update {
        key_column: &'static str,
        key: PlannedValue,
        set: Vec<(&'static str, PlannedValue)>,
    },
    Delete {
        filters: Vec<(&'static str, PlannedValue)>,
    },
}

impl Operation {
    fn planned_values(&self) -> Box<dyn Iterator<Item = &PlannedValue> + '_> {
        match self {
            Operation::Insert { columns, .. } => Box::new(columns.iter().map(|(_, v)| v)),
            Operation::Update { key, set, .. } => {
                Box::new(std::iter::once(key).chain(set.iter().map(|(_, v)| v)))
            }
            Operation::Delete { filters } => Box::new(filters.iter().map(|(_, v)| v)),
        }
    }
}

/// One planned statement.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub kind: EntryKind,
    pub table: &'static str,
    /// The node whose own row an `Insert`/`Update` writes.
    pub node: Option<NodeId>,
    pub operation: Operation,
    /// Entries (by index) that must execute first.
    pub depends_on: Vec<usize>,
    pub path: GraphPath,
}

/// Ordered statements of one save plus the identifiers known before execution.
#[derive(Debug, Clone, Default)]
pub struct StatementPlan {
    entries: Vec<PlanEntry>,
    order: Vec<usize>,
    ids: Vec<Option<Value>>,
}

impl StatementPlan {
    /// Entries in execution order.
    pub fn entries(&self) -> impl Iterator<Item = &PlanEntry> {
        self.order.iter().map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, kind: EntryKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    /// Identifier per node before execution: input or stored ids.
    pub fn initial_ids(&self) -> &[Option<Value>] {
        &self.ids
    }
}

/// Dissociation policies in effect for one save.
#[derive(Debug, Clone)]
pub struct DissociationPolicies {
    /// Per-association overrides keyed by `"Entity.association"`.
    pub overrides: HashMap<String, DissociationPolicy>,
    /// Fallback for remote-key collections.
    pub owned: DissociationPolicy,
    /// Fallback for link-table collections.
    pub shared: DissociationPolicy,
}

impl Default for DissociationPolicies {
    fn default() -> Self {
        Self {
            overrides: HashMap::new(),
            owned: DissociationPolicy::ReplaceAll,
            shared: DissociationPolicy::AppendOnly,
        }
    }
}

impl DissociationPolicies {
    /// Override first, then the association's declaration, then the defaults.
    pub fn resolve(&self, entity: &str, association: &AssociationDescriptor) -> DissociationPolicy {
        self.overrides
            .get(&format!("{entity}.{}", association.name))
            .copied()
            .or(association.dissociation)
            .unwrap_or(if association.is_shared() {
                self.shared
            } else {
                self.owned
            })
    }
}

struct PlanBuilder<'a, 'r> {
    registry: &'r Registry,
    graph: &'a NormalizedGraph<'r>,
    snapshot: &'a Snapshot,
    inbound: Vec<Vec<(NodeId, &'r AssociationDescriptor)>>,
    insert_of: Vec<Option<usize>>,
    ids: Vec<Option<Value>>,
    entries: Vec<PlanEntry>,
}

/// Plan the statements that reconcile storage with `graph`.
#[tracing::instrument(level = "debug", skip_all, fields(nodes = graph.len()))]
pub fn plan<'r>(
    registry: &'r Registry,
    graph: &NormalizedGraph<'r>,
    snapshot: &Snapshot,
    policies: &DissociationPolicies,
    mode: SaveMode,
) -> Result<StatementPlan> {
    let root = graph.node(graph.root());
    match (mode, snapshot.exists(graph.root())) {
        (SaveMode::InsertOnly, true) => {
            return Err(Error::ConstraintConflict(ConstraintConflictError {
                entity: root.entity.name.to_string(),
                path: root.path.clone(),
                message: "root already exists and the save is insert-only".to_string(),
                source: None,
            }));
        }
        (SaveMode::UpdateOnly, false) => {
            return Err(Error::malformed(
                MalformedReason::DanglingReference,
                root.entity.name,
                root.path.clone(),
                "root does not exist and the save is update-only",
            ));
        }
        _ => {}
    }

    let ids = graph
        .nodes()
        .iter()
        .enumerate()
        .map(|(n, node)| snapshot.row(n).map(|row| row.id.clone()).or_else(|| node.id.clone()))
        .collect();
    let mut builder = PlanBuilder {
        registry,
        graph,
        snapshot,
        inbound: graph.inbound(),
        insert_of: vec![None; graph.len()],
        ids,
        entries: Vec::new(),
    };

    let new_nodes = builder.new_nodes()?;
    for (slot, &node) in new_nodes.iter().enumerate() {
        builder.insert_of[node] = Some(slot);
    }
    for &node in &new_nodes {
        builder.plan_insert(node);
    }
    for node in 0..graph.len() {
        if builder.snapshot.exists(node) {
            builder.plan_update(node);
            builder.plan_reparenting(node);
        }
    }
    for node in 0..graph.len() {
        builder.plan_links(node);
        builder.plan_removals(node, policies)?;
    }

    let order = order(&builder.entries)?;
    let plan = StatementPlan {
        entries: builder.entries,
        order,
        ids: builder.ids,
    };
    tracing::debug!(
        entries = plan.len(),
        inserts = plan.count(EntryKind::Insert),
        updates = plan.count(EntryKind::Update),
        links_added = plan.count(EntryKind::InsertAssociation),
        links_removed = plan.count(EntryKind::DeleteAssociation),
        "Statement plan built"
    );
    Ok(plan)
}

impl<'r> PlanBuilder<'_, 'r> {
    /// Nodes needing an insert; references and keyless assigned-id nodes must exist.
    fn new_nodes(&self) -> Result<Vec<NodeId>> {
        let mut new_nodes = Vec::new();
        for (n, node) in self.graph.nodes().iter().enumerate() {
            if self.snapshot.exists(n) {
                continue;
            }
            if node.reference {
                return Err(Error::malformed(
                    MalformedReason::DanglingReference,
                    node.entity.name,
                    node.path.clone(),
                    format!("referenced {} ({}) does not exist", node.entity.name, node.key),
                ));
            }
            if node.id.is_none() && !node.entity.generates_ids() {
                return Err(Error::malformed(
                    MalformedReason::UnresolvableKey,
                    node.entity.name,
                    node.path.clone(),
                    "new row needs an assigned identifier",
                ));
            }
            new_nodes.push(n);
        }
        Ok(new_nodes)
    }

    fn push(
        &mut self,
        kind: EntryKind,
        table: &'static str,
        node: Option<NodeId>,
        operation: Operation,
        path: GraphPath,
    ) {
        let index = self.entries.len();
        let mut depends_on = Vec::new();
        for value in operation.planned_values() {
            let PlannedValue::IdOf(target) = value else {
                continue;
            };
            let Some(insert) = self.insert_of[*target] else {
                continue;
            };
            // A row may carry its own assigned identifier in the same insert.
            if insert == index && self.ids[*target].is_some() {
                continue;
            }
            if !depends_on.contains(&insert) {
                depends_on.push(insert);
            }
        }
        self.entries.push(PlanEntry {
            kind,
            table,
            node,
            operation,
            depends_on,
            path,
        });
    }

    /// Value the local foreign key of `edge` should hold.
    fn local_target(targets: &Targets) -> PlannedValue {
        match targets {
            Targets::One(Some(target)) => PlannedValue::IdOf(*target),
            _ => PlannedValue::Literal(Value::Null),
        }
    }

    fn plan_insert(&mut self, n: NodeId) {
        let node: &Node<'r> = self.graph.node(n);
        let entity = node.entity;
        let mut columns = Vec::new();
        if let Some(id) = &node.id {
            columns.push((entity.id.column, PlannedValue::Literal(id.clone())));
        }
        for scalar in &entity.scalars {
            if let Some(value) = node.fields.get(scalar.name) {
                columns.push((scalar.column, PlannedValue::Literal(value.clone())));
            }
        }
        for edge in &node.edges {
            if let Some(column) = edge.association.local_column() {
                columns.push((column, Self::local_target(&edge.targets)));
            }
        }
        for &(parent, association) in &self.inbound[n] {
            if let Some(column) = association.remote_column() {
                columns.retain(|(c, _)| *c != column);
                columns.push((column, PlannedValue::IdOf(parent)));
            }
        }
        let returning = node.id.is_none().then_some(entity.id.column);
        self.push(
            EntryKind::Insert,
            entity.table,
            Some(n),
            Operation::Insert { columns, returning },
            node.path.clone(),
        );
    }

    /// Whether `value` would change the stored cell.
    fn differs(&self, stored: &Value, value: &PlannedValue) -> bool {
        match value {
            PlannedValue::Literal(v) => !stored.same_as(v),
            PlannedValue::IdOf(target) => match (&self.insert_of[*target], &self.ids[*target]) {
                (None, Some(id)) => !stored.same_as(id),
                _ => true,
            },
        }
    }

    fn plan_update(&mut self, n: NodeId) {
        let node = self.graph.node(n);
        let Some(row) = self.snapshot.row(n) else {
            return;
        };
        let entity = node.entity;
        let mut set = Vec::new();
        for scalar in &entity.scalars {
            if let Some(value) = node.fields.get(scalar.name) {
                if !row.cell(scalar.column).same_as(value) {
                    set.push((scalar.column, PlannedValue::Literal(value.clone())));
                }
            }
        }
        for edge in &node.edges {
            if let Some(column) = edge.association.local_column() {
                let value = Self::local_target(&edge.targets);
                if self.differs(row.cell(column), &value) {
                    set.push((column, value));
                }
            }
        }
        if set.is_empty() {
            return;
        }
        let key = PlannedValue::Literal(row.id.clone());
        self.push(
            EntryKind::Update,
            entity.table,
            Some(n),
            Operation::Update {
                key_column: entity.id.column,
                key,
                set,
            },
            node.path.clone(),
        );
    }

    /// Point the remote foreign key of an existing child at its parent in the graph.
    fn plan_reparenting(&mut self, n: NodeId) {
        let Some(row) = self.snapshot.row(n) else {
            return;
        };
        let node = self.graph.node(n);
        let inbound = self.inbound[n].clone();
        let mut assigned: Vec<&'static str> = Vec::new();
        for &(parent, association) in inbound.iter().rev() {
            let Some(column) = association.remote_column() else {
                continue;
            };
            if assigned.contains(&column) {
                continue;
            }
            assigned.push(column);
            let value = PlannedValue::IdOf(parent);
            if !self.differs(row.cell(column), &value) {
                continue;
            }
            let key = PlannedValue::Literal(row.id.clone());
            self.push(
                EntryKind::InsertAssociation,
                node.entity.table,
                None,
                Operation::Update {
                    key_column: node.entity.id.column,
                    key,
                    set: vec![(column, value)],
                },
                node.path.clone(),
            );
        }
    }

    fn plan_links(&mut self, n: NodeId) {
        let node = self.graph.node(n);
        for edge in &node.edges {
            let Ownership::LinkTable(link) = edge.association.ownership else {
                continue;
            };
            let stored: HashSet<KeyValue> = self
                .snapshot
                .stored_targets(n, edge.association.name)
                .iter()
                .map(|id| KeyValue::single(id.clone()))
                .collect();
            for target in edge.targets.nodes() {
                let linked = self.snapshot.exists(target)
                    && self.ids[target]
                        .as_ref()
                        .is_some_and(|id| stored.contains(&KeyValue::single(id.clone())));
                if linked {
                    continue;
                }
                let path = node.path.member(edge.association.name);
                self.push(
                    EntryKind::InsertAssociation,
                    link.table,
                    None,
                    Operation::Insert {
                        columns: vec![
                            (link.local_column, PlannedValue::IdOf(n)),
                            (link.remote_column, PlannedValue::IdOf(target)),
                        ],
                        returning: None,
                    },
                    path,
                );
            }
        }
    }

    /// Whether the stored row `id` of `entity` is attached through `column`
    /// to some parent elsewhere in this save.
    fn reattached(&self, entity: &str, id: &Value, column: &'static str) -> bool {
        self.graph.nodes().iter().enumerate().any(|(n, node)| {
            node.entity.name == entity
                && self.ids[n].as_ref().is_some_and(|own| own.same_as(id))
                && self.inbound[n]
                    .iter()
                    .any(|(_, a)| a.remote_column() == Some(column))
        })
    }

    fn plan_removals(&mut self, n: NodeId, policies: &DissociationPolicies) -> Result<()> {
        let node = self.graph.node(n);
        let Some(row) = self.snapshot.row(n) else {
            return Ok(());
        };
        for edge in &node.edges {
            let association = edge.association;
            if association.local_column().is_some() {
                continue;
            }
            let declared: HashSet<KeyValue> = edge
                .targets
                .nodes()
                .into_iter()
                .filter_map(|t| self.ids[t].clone())
                .map(KeyValue::single)
                .collect();
            let removed: Vec<Value> = self
                .snapshot
                .stored_targets(n, association.name)
                .iter()
                .filter(|id| !declared.contains(&KeyValue::single((*id).clone())))
                .cloned()
                .collect();
            if removed.is_empty() {
                continue;
            }

            let path = node.path.member(association.name);
            match policies.resolve(node.entity.name, association) {
                DissociationPolicy::AppendOnly => {}
                DissociationPolicy::Disallow => {
                    return Err(Error::Dissociation(DissociationError {
                        entity: node.entity.name.to_string(),
                        association: association.name.to_string(),
                        path,
                        removed: removed.len(),
                    }));
                }
                DissociationPolicy::ReplaceAll => match association.ownership {
                    Ownership::LinkTable(link) => {
                        for target in removed {
                            self.push(
                                EntryKind::DeleteAssociation,
                                link.table,
                                None,
                                Operation::Delete {
                                    filters: vec![
                                        (link.local_column, PlannedValue::Literal(row.id.clone())),
                                        (link.remote_column, PlannedValue::Literal(target)),
                                    ],
                                },
                                path.clone(),
                            );
                        }
                    }
                    Ownership::Remote { column } => {
                        let target = self.registry.describe(association.target)?;
                        for child in removed {
                            if self.reattached(target.name, &child, column) {
                                continue;
                            }
                            let operation = if association.nullable {
                                Operation::Update {
                                    key_column: target.id.column,
                                    key: PlannedValue::Literal(child),
                                    set: vec![(column, PlannedValue::Literal(Value::Null))],
                                }
                            } else {
                                Operation::Delete {
                                    filters: vec![(target.id.column, PlannedValue::Literal(child))],
                                }
                            };
                            self.push(
                                EntryKind::DeleteAssociation,
                                target.table,
                                None,
                                operation,
                                path.clone(),
                            );
                        }
                    }
                    Ownership::Local { .. } => {}
                },
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    New,
    Active,
    Done,
}

/// Topological order of `entries`, visiting in priority order so that
/// independent entries keep their kind ordering.
fn order(entries: &[PlanEntry]) -> Result<Vec<usize>> {
    let mut priority: Vec<usize> = (0..entries.len()).collect();
    priority.sort_by_key(|&i| (entries[i].kind.rank(), i));

    let mut marks = vec![Mark::New; entries.len()];
    let mut order = Vec::with_capacity(entries.len());
    for start in priority {
        if marks[start] != Mark::New {
            continue;
        }
        marks[start] = Mark::Active;
        let mut stack = vec![(start, 0_usize)];
        while let Some((entry, next)) = stack.last_mut() {
            let entry = *entry;
            if let Some(&dep) = entries[entry].depends_on.get(*next) {
                *next += 1;
                match marks[dep] {
                    Mark::Done => {}
                    Mark::Active => {
                        let from = stack.iter().position(|(e, _)| *e == dep).unwrap_or(0);
                        let cycle = stack[from..]
                            .iter()
                            .map(|(e, _)| entries[*e].path.clone())
                            .collect();
                        return Err(Error::CyclicDependency(CyclicDependencyError { cycle }));
                    }
                    Mark::New => {
                        marks[dep] = Mark::Active;
                        stack.push((dep, 0));
                    }
                }
            } else {
                marks[entry] = Mark::Done;
                order.push(entry);
                stack.pop();
            }
        }
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{library, seed_id, unwrap_outcome};
    use crate::normalize::normalize;
    use crate::snapshot;
    use asupersync::runtime::RuntimeBuilder;
    use sqlgraph_core::{Cx, Instance};
    use sqlgraph_memory::MemoryStore;

    fn plan_for(
        registry: &Registry,
        store: &MemoryStore,
        input: &Instance,
        policies: &DissociationPolicies,
        mode: SaveMode,
    ) -> Result<StatementPlan> {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        let graph = normalize(registry, input, None)?;
        let snapshot = rt.block_on(async { unwrap_outcome(snapshot::load(&cx, store, registry, &graph).await) });
        plan(registry, &graph, &snapshot, policies, mode)
    }

    fn kinds(plan: &StatementPlan) -> Vec<(EntryKind, &'static str)> {
        plan.entries().map(|e| (e.kind, e.table)).collect()
    }

    #[test]
    fn test_new_graph_inserts_parents_first() {
        let registry = library();
        let store = MemoryStore::from_registry(&registry);
        let input = Instance::new("Book")
            .set("title", "Dune")
            .one("publisher", Instance::new("Publisher").set("name", "Ace"))
            .many("chapters", vec![Instance::new("Chapter").set("heading", "One")])
            .many("tags", vec![Instance::new("Tag").with_id("sf").set("label", "SF")]);

        let plan = plan_for(&registry, &store, &input, &DissociationPolicies::default(), SaveMode::Upsert).unwrap();
        let order = kinds(&plan);
        let position = |table| order.iter().position(|(_, t)| *t == table).unwrap();
        assert!(position("publishers") < position("books"));
        assert!(position("books") < position("chapters"));
        assert_eq!(order.last(), Some(&(EntryKind::InsertAssociation, "book_tags")));
        assert_eq!(plan.count(EntryKind::Insert), 4);

        let book = plan.entries().find(|e| e.table == "books").unwrap();
        match &book.operation {
            Operation::Insert { columns, returning } => {
                assert_eq!(*returning, Some("id"));
                let names: Vec<_> = columns.iter().map(|(c, _)| *c).collect();
                assert_eq!(names, vec!["title", "publisher_id"]);
            }
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[test]
    fn test_unchanged_graph_plans_nothing() {
        let registry = library();
        let store = MemoryStore::from_registry(&registry);
        let book = seed_id(&store, "books", vec![("title", Value::from("Dune")), ("year", Value::Int(1965))]);
        let ch = seed_id(&store, "chapters", vec![("heading", Value::from("One")), ("book_id", book.clone())]);

        let input = Instance::new("Book")
            .with_id(book)
            .set("title", "Dune")
            .many("chapters", vec![Instance::new("Chapter").with_id(ch).set("heading", "One")]);
        let plan = plan_for(&registry, &store, &input, &DissociationPolicies::default(), SaveMode::Upsert).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_update_touches_only_changed_columns() {
        let registry = library();
        let store = MemoryStore::from_registry(&registry);
        let book = seed_id(&store, "books", vec![("title", Value::from("Dune")), ("year", Value::Int(1965))]);

        let input = Instance::new("Book").with_id(book).set("year", 1966_i64);
        let plan = plan_for(&registry, &store, &input, &DissociationPolicies::default(), SaveMode::Upsert).unwrap();
        assert_eq!(plan.len(), 1);
        match &plan.entries().next().unwrap().operation {
            Operation::Update { set, .. } => {
                assert_eq!(set, &vec![("year", PlannedValue::Literal(Value::BigInt(1966)))]);
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn test_removals_follow_policy_and_ownership() {
        let registry = library();
        let store = MemoryStore::from_registry(&registry);
        let book = seed_id(&store, "books", vec![("title", Value::from("Dune"))]);
        seed_id(&store, "chapters", vec![("heading", Value::from("Old")), ("book_id", book.clone())]);
        seed_id(&store, "notes", vec![("body", Value::from("Old")), ("book_id", book.clone())]);
        let author = seed_id(&store, "authors", vec![("name", Value::from("Herbert"))]);
        store
            .seed("book_authors", vec![("book_id", book.clone()), ("author_id", author)])
            .unwrap();

        let input = Instance::new("Book")
            .with_id(book)
            .many("chapters", vec![])
            .many("notes", vec![])
            .many("authors", vec![]);

        let plan = plan_for(&registry, &store, &input, &DissociationPolicies::default(), SaveMode::Upsert).unwrap();
        // Chapters are deleted (non-nullable key), notes detached, authors kept.
        let removals: Vec<_> = plan
            .entries()
            .map(|e| (e.kind, e.table, matches!(e.operation, Operation::Delete { .. })))
            .collect();
        assert_eq!(
            removals,
            vec![
                (EntryKind::DeleteAssociation, "chapters", true),
                (EntryKind::DeleteAssociation, "notes", false),
            ]
        );

        let mut policies = DissociationPolicies::default();
        policies
            .overrides
            .insert("Book.authors".to_string(), DissociationPolicy::ReplaceAll);
        let plan = plan_for(&registry, &store, &input, &policies, SaveMode::Upsert).unwrap();
        assert_eq!(plan.count(EntryKind::DeleteAssociation), 3);

        policies
            .overrides
            .insert("Book.chapters".to_string(), DissociationPolicy::Disallow);
        match plan_for(&registry, &store, &input, &policies, SaveMode::Upsert) {
            Err(Error::Dissociation(e)) => {
                assert_eq!(e.association, "chapters");
                assert_eq!(e.removed, 1);
            }
            other => panic!("expected dissociation error, got {other:?}"),
        }
    }

    #[test]
    fn test_moved_child_is_not_detached() {
        let registry = library();
        let store = MemoryStore::from_registry(&registry);
        let acme = seed_id(&store, "publishers", vec![("name", Value::from("Acme"))]);
        let first = seed_id(&store, "books", vec![("title", Value::from("A")), ("publisher_id", acme.clone())]);
        let second = seed_id(&store, "books", vec![("title", Value::from("B")), ("publisher_id", acme.clone())]);
        let note = seed_id(&store, "notes", vec![("body", Value::from("n")), ("book_id", first.clone())]);

        // Only the new parent is in the graph: the note is re-pointed.
        let moved = Instance::new("Book")
            .with_id(second.clone())
            .many("notes", vec![Instance::reference("Note", note.clone())]);
        let plan = plan_for(&registry, &store, &moved, &DissociationPolicies::default(), SaveMode::Upsert).unwrap();
        assert_eq!(kinds(&plan), vec![(EntryKind::InsertAssociation, "notes")]);

        // Both parents in the graph: the old one does not detach the moved note.
        let both = Instance::new("Publisher").with_id(acme).many(
            "books",
            vec![
                Instance::new("Book").with_id(first).many("notes", vec![]),
                Instance::new("Book")
                    .with_id(second)
                    .many("notes", vec![Instance::reference("Note", note)]),
            ],
        );
        let plan = plan_for(&registry, &store, &both, &DissociationPolicies::default(), SaveMode::Upsert).unwrap();
        assert_eq!(kinds(&plan), vec![(EntryKind::InsertAssociation, "notes")]);
    }

    #[test]
    fn test_references_and_modes() {
        let registry = library();
        let store = MemoryStore::from_registry(&registry);
        let book = seed_id(&store, "books", vec![("title", Value::from("Dune"))]);

        let dangling = Instance::new("Book")
            .with_id(book.clone())
            .many("authors", vec![Instance::reference("Author", 404_i64)]);
        match plan_for(&registry, &store, &dangling, &DissociationPolicies::default(), SaveMode::Upsert) {
            Err(Error::MalformedGraph(e)) => {
                assert_eq!(e.reason, MalformedReason::DanglingReference);
                assert_eq!(e.path.to_string(), "Book(id=1).authors[0]");
            }
            other => panic!("expected dangling reference, got {other:?}"),
        }

        let existing = Instance::new("Book").with_id(book).set("title", "Dune");
        assert!(matches!(
            plan_for(&registry, &store, &existing, &DissociationPolicies::default(), SaveMode::InsertOnly),
            Err(Error::ConstraintConflict(_))
        ));
        let missing = Instance::new("Book").with_id(77_i64).set("title", "New");
        assert!(matches!(
            plan_for(&registry, &store, &missing, &DissociationPolicies::default(), SaveMode::UpdateOnly),
            Err(Error::MalformedGraph(e)) if e.reason == MalformedReason::DanglingReference
        ));

        let keyless_assigned = Instance::new("Tag").set("label", "x");
        assert!(matches!(
            plan_for(&registry, &store, &keyless_assigned, &DissociationPolicies::default(), SaveMode::Upsert),
            Err(Error::MalformedGraph(e)) if e.reason == MalformedReason::UnresolvableKey
        ));
    }

    #[test]
    fn test_cycle_among_new_rows() {
        let registry = library();
        let store = MemoryStore::from_registry(&registry);

        // Two new authors mentoring each other cannot be inserted in any order.
        let pair = Instance::new("Author").with_id(1_i64).set("name", "A").one(
            "mentor",
            Instance::new("Author")
                .set("name", "B")
                .one("mentor", Instance::reference("Author", 1_i64)),
        );
        match plan_for(&registry, &store, &pair, &DissociationPolicies::default(), SaveMode::Upsert) {
            Err(Error::CyclicDependency(e)) => {
                let paths: Vec<String> = e.cycle.iter().map(ToString::to_string).collect();
                assert_eq!(paths, vec!["Author(id=1)", "Author(id=1).mentor"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }

        // A row may reference itself when its identifier is assigned.
        let own_mentor = Instance::new("Author")
            .with_id(5_i64)
            .set("name", "Self")
            .one("mentor", Instance::reference("Author", 5_i64));
        let plan = plan_for(&registry, &store, &own_mentor, &DissociationPolicies::default(), SaveMode::Upsert).unwrap();
        assert_eq!(plan.len(), 1);
        assert!(plan.entries().next().unwrap().depends_on.is_empty());
    }
}
