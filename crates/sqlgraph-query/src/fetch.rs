//! Shape-driven batched retrieval.
//!
//! The [`Fetcher`] loads root rows, then walks the resolved shape breadth
//! first. Every association edge of the shape costs exactly one query, batched
//! over all parent rows reached at that level:
//!
//! - a to-one with the foreign key on the parent loads targets by `id IN (..)`
//! - a collection whose targets hold the foreign key loads by `fk IN (..)`
//! - a link-table association loads `(parent, target)` pairs with one join
//!
//! Rows land in a flat arena; nested [`Instance`]s are assembled only after
//! the last level completes. Absent targets are explicit
//! (`Related::One(None)` / `Related::Many(vec![])`), and properties outside
//! the shape are left unpopulated.

use std::collections::{BTreeMap, HashMap, HashSet};

use sqlgraph_core::{
    Cardinality, Cx, Error, Instance, KeyFilter, KeyValue, LinkedSelect, OrderTerm, Outcome,
    Ownership, PARENT_COLUMN, Predicate, Query, Registry, Related, RootQuery, Row, Select,
    StatementExecutor, Value, try_outcome, try_result,
};

use crate::shape::{ResolvedAssociation, ResolvedShape, Shape};

/// Default nesting guard for shapes.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Ordering and paging applied to a root query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOptions {
    pub order_by: Vec<OrderTerm>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn order_by(mut self, term: OrderTerm) -> Self {
        self.order_by.push(term);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Where the root rows of a fetch come from.
#[derive(Debug, Clone, PartialEq)]
pub enum RootSource {
    /// Explicit identifiers. Results follow this order; a repeated id yields
    /// one instance per occurrence and unknown ids are skipped.
    Ids(Vec<Value>),
    /// Rows selected by an opaque predicate (all rows when `None`).
    Query {
        predicate: Option<Predicate>,
        options: FetchOptions,
    },
}

impl RootSource {
    /// Roots by identifier.
    pub fn ids<I, V>(ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        RootSource::Ids(ids.into_iter().map(Into::into).collect())
    }

    /// Every row of the root table.
    pub fn all() -> Self {
        RootSource::Query {
            predicate: None,
            options: FetchOptions::default(),
        }
    }

    /// Rows matching `predicate`, ordered and paged by `options`.
    pub fn query(predicate: Option<Predicate>, options: FetchOptions) -> Self {
        RootSource::Query { predicate, options }
    }
}

/// Query accounting for one fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Queries issued, including the root query.
    pub queries: usize,
    /// Association edges traversed.
    pub hops: usize,
    /// Breadth-first levels that traversed at least one edge.
    pub levels: usize,
    /// Rows read across all queries.
    pub rows: usize,
}

/// Shaped instances plus the accounting of how they were loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub instances: Vec<Instance>,
    pub report: FetchReport,
}

impl Fetched {
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// The first instance, if any.
    pub fn first(&self) -> Option<&Instance> {
        self.instances.first()
    }
}

/// Loads object graphs described by a [`Shape`].
#[derive(Debug, Clone, Copy)]
pub struct Fetcher<'r> {
    registry: &'r Registry,
    max_depth: usize,
}

impl<'r> Fetcher<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Override the shape nesting guard.
    #[must_use]
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Resolve `shape` and load the graphs rooted at `roots`.
    ///
    /// The shape is validated before any query runs, so an unknown property
    /// fails with nothing read.
    #[tracing::instrument(level = "debug", skip(self, cx, executor, shape, roots), fields(entity = shape.entity()))]
    pub async fn fetch<E: StatementExecutor>(
        &self,
        cx: &Cx,
        executor: &E,
        shape: &Shape,
        roots: &RootSource,
    ) -> Outcome<Fetched, Error> {
        let resolved = try_result!(shape.resolve(self.registry, self.max_depth));
        fetch_resolved(cx, executor, &resolved, roots).await
    }
}

/// Load graphs for an already resolved shape.
#[tracing::instrument(level = "debug", skip_all, fields(entity = shape.entity.name))]
pub async fn fetch_resolved<E: StatementExecutor>(
    cx: &Cx,
    executor: &E,
    shape: &ResolvedShape<'_>,
    roots: &RootSource,
) -> Outcome<Fetched, Error> {
    let start = std::time::Instant::now();
    let mut run = HopRunner {
        cx,
        executor,
        arena: Vec::new(),
        report: FetchReport::default(),
    };

    let order = try_outcome!(run.load_roots(shape, roots).await);

    let mut frontier: Vec<(&ResolvedShape<'_>, Vec<usize>)> = Vec::new();
    if !order.is_empty() && !shape.associations.is_empty() {
        frontier.push((shape, distinct(&order)));
    }

    while !frontier.is_empty() {
        let mut next = Vec::new();
        let mut edges = 0;
        for (node, parents) in &frontier {
            for assoc in &node.associations {
                let children = try_outcome!(run.hop(assoc, parents).await);
                edges += 1;
                if !children.is_empty() && !assoc.shape.associations.is_empty() {
                    next.push((&assoc.shape, children));
                }
            }
        }
        run.report.hops += edges;
        run.report.levels += 1;
        tracing::debug!(
            level = run.report.levels,
            edges = edges,
            queries = run.report.queries,
            "Fetch level complete"
        );
        frontier = next;
    }

    let instances: Vec<Instance> = order.iter().map(|&idx| assemble(&run.arena, idx, shape)).collect();

    tracing::info!(
        entity = shape.entity.name,
        roots = instances.len(),
        queries = run.report.queries,
        hops = run.report.hops,
        rows = run.report.rows,
        elapsed_ms = start.elapsed().as_millis(),
        "Fetch complete"
    );

    Outcome::Ok(Fetched {
        instances,
        report: run.report,
    })
}

/// Association targets recorded on a loaded row.
#[derive(Debug)]
enum Slot {
    One(Option<usize>),
    Many(Vec<usize>),
}

/// One loaded row of one shape node.
#[derive(Debug)]
struct Record {
    id: Value,
    fields: BTreeMap<String, Value>,
    foreign: HashMap<&'static str, Value>,
    slots: HashMap<&'static str, Slot>,
}

struct HopRunner<'a, E> {
    cx: &'a Cx,
    executor: &'a E,
    arena: Vec<Record>,
    report: FetchReport,
}

impl<E: StatementExecutor> HopRunner<'_, E> {
    async fn run_query(&mut self, query: Query) -> Outcome<Vec<Row>, Error> {
        if let Some(reason) = self.cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        self.report.queries += 1;
        let rows = try_outcome!(self.executor.query(self.cx, &query).await);
        self.report.rows += rows.len();
        Outcome::Ok(rows)
    }

    async fn load_roots(
        &mut self,
        shape: &ResolvedShape<'_>,
        source: &RootSource,
    ) -> Outcome<Vec<usize>, Error> {
        let entity = shape.entity;
        match source {
            RootSource::Ids(ids) => {
                let mut wanted = HashSet::new();
                let mut keys = Vec::new();
                for id in ids {
                    if !id.is_null() && wanted.insert(KeyValue::single(id.clone())) {
                        keys.push(id.clone());
                    }
                }
                if keys.is_empty() {
                    return Outcome::Ok(Vec::new());
                }

                let rows = try_outcome!(
                    self.run_query(Query::Select(Select {
                        table: entity.table,
                        columns: shape.columns(),
                        filter: KeyFilter::by(entity.id_column(), keys),
                        order_by: vec![entity.id_column()],
                    }))
                    .await
                );
                let mut seen = HashMap::new();
                for row in &rows {
                    self.absorb(shape, row, &mut seen);
                }

                let mut order = Vec::with_capacity(ids.len());
                for id in ids {
                    match seen.get(&KeyValue::single(id.clone())) {
                        Some(&idx) => order.push(idx),
                        None => tracing::debug!(entity = entity.name, id = %id, "Root not found"),
                    }
                }
                Outcome::Ok(order)
            }
            RootSource::Query { predicate, options } => {
                let rows = try_outcome!(
                    self.run_query(Query::Roots(RootQuery {
                        table: entity.table,
                        columns: shape.columns(),
                        predicate: predicate.clone(),
                        order_by: options.order_by.clone(),
                        limit: options.limit,
                        offset: options.offset,
                    }))
                    .await
                );
                let mut seen = HashMap::new();
                let order = rows
                    .iter()
                    .filter_map(|row| self.absorb(shape, row, &mut seen).map(|(idx, _)| idx))
                    .collect();
                Outcome::Ok(order)
            }
        }
    }

    /// Load one association for every parent in `parents`; returns the
    /// distinct child records reached.
    async fn hop(
        &mut self,
        assoc: &ResolvedAssociation<'_>,
        parents: &[usize],
    ) -> Outcome<Vec<usize>, Error> {
        let descriptor = assoc.descriptor;
        let target = assoc.shape.entity;
        let id_column = target.id_column();
        let mut seen = HashMap::new();
        let mut children = Vec::new();

        match descriptor.ownership {
            Ownership::Local { column } => {
                let mut wanted = HashSet::new();
                let mut keys = Vec::new();
                for &p in parents {
                    if let Some(fk) = self.arena[p].foreign.get(column) {
                        if !fk.is_null() && wanted.insert(KeyValue::single(fk.clone())) {
                            keys.push(fk.clone());
                        }
                    }
                }

                if !keys.is_empty() {
                    let rows = try_outcome!(
                        self.run_query(Query::Select(Select {
                            table: target.table,
                            columns: assoc.shape.columns(),
                            filter: KeyFilter::by(id_column, keys),
                            order_by: vec![id_column],
                        }))
                        .await
                    );
                    for row in &rows {
                        if let Some((idx, true)) = self.absorb(&assoc.shape, row, &mut seen) {
                            children.push(idx);
                        }
                    }
                }

                for &p in parents {
                    let linked = match self.arena[p].foreign.get(column) {
                        Some(fk) if !fk.is_null() => {
                            let found = seen.get(&KeyValue::single(fk.clone())).copied();
                            if found.is_none() {
                                tracing::warn!(
                                    entity = target.name,
                                    association = descriptor.name,
                                    key = %fk,
                                    "Dangling foreign key, target row not found"
                                );
                            }
                            found
                        }
                        _ => None,
                    };
                    self.arena[p].slots.insert(descriptor.name, Slot::One(linked));
                }
            }
            Ownership::Remote { column } => {
                let parent_ids = self.parent_ids(parents);
                let mut groups = HashMap::new();
                if !parent_ids.is_empty() {
                    let mut columns = assoc.shape.columns();
                    if !columns.contains(&column) {
                        columns.push(column);
                    }
                    let rows = try_outcome!(
                        self.run_query(Query::Select(Select {
                            table: target.table,
                            columns,
                            filter: KeyFilter::by(column, parent_ids),
                            order_by: vec![id_column],
                        }))
                        .await
                    );
                    groups = self.group_rows(&assoc.shape, &rows, column, &mut seen, &mut children);
                }
                self.fill_slots(assoc, parents, &mut groups);
            }
            Ownership::LinkTable(link) => {
                let parent_ids = self.parent_ids(parents);
                let mut groups = HashMap::new();
                if !parent_ids.is_empty() {
                    let rows = try_outcome!(
                        self.run_query(Query::Linked(LinkedSelect {
                            link,
                            table: target.table,
                            id_column,
                            columns: assoc.shape.columns(),
                            parent_keys: parent_ids,
                        }))
                        .await
                    );
                    groups = self.group_rows(&assoc.shape, &rows, PARENT_COLUMN, &mut seen, &mut children);
                }
                self.fill_slots(assoc, parents, &mut groups);
            }
        }

        tracing::debug!(
            association = descriptor.name,
            target = target.name,
            parents = parents.len(),
            children = children.len(),
            "Hop loaded"
        );
        Outcome::Ok(children)
    }

    fn parent_ids(&self, parents: &[usize]) -> Vec<Value> {
        parents.iter().map(|&p| self.arena[p].id.clone()).collect()
    }

    /// Store rows as records and group them by the parent key in `owner_column`.
    fn group_rows(
        &mut self,
        shape: &ResolvedShape<'_>,
        rows: &[Row],
        owner_column: &str,
        seen: &mut HashMap<KeyValue, usize>,
        children: &mut Vec<usize>,
    ) -> HashMap<KeyValue, Vec<usize>> {
        let mut groups: HashMap<KeyValue, Vec<usize>> = HashMap::new();
        for row in rows {
            let Some(owner) = row.get_by_name(owner_column) else {
                continue;
            };
            let owner = KeyValue::single(owner.clone());
            if let Some((idx, fresh)) = self.absorb(shape, row, seen) {
                if fresh {
                    children.push(idx);
                }
                groups.entry(owner).or_default().push(idx);
            }
        }
        groups
    }

    fn fill_slots(
        &mut self,
        assoc: &ResolvedAssociation<'_>,
        parents: &[usize],
        groups: &mut HashMap<KeyValue, Vec<usize>>,
    ) {
        let descriptor = assoc.descriptor;
        for &p in parents {
            let members = groups
                .remove(&KeyValue::single(self.arena[p].id.clone()))
                .unwrap_or_default();
            let slot = match descriptor.cardinality {
                Cardinality::Many => Slot::Many(members),
                Cardinality::One => {
                    if members.len() > 1 {
                        tracing::warn!(
                            association = descriptor.name,
                            parent = %self.arena[p].id,
                            matches = members.len(),
                            "Ambiguous to-one association, keeping the lowest identifier"
                        );
                    }
                    Slot::One(members.first().copied())
                }
            };
            self.arena[p].slots.insert(descriptor.name, slot);
        }
    }

    /// Record `row` for `shape`, reusing an existing record with the same id.
    /// Returns the record index and whether it was newly created.
    fn absorb(
        &mut self,
        shape: &ResolvedShape<'_>,
        row: &Row,
        seen: &mut HashMap<KeyValue, usize>,
    ) -> Option<(usize, bool)> {
        let id = row.get_by_name(shape.entity.id_column())?;
        if id.is_null() {
            return None;
        }
        let key = KeyValue::single(id.clone());
        if let Some(&idx) = seen.get(&key) {
            return Some((idx, false));
        }

        let fields = shape
            .scalars
            .iter()
            .map(|s| {
                let value = row.get_by_name(s.column).cloned().unwrap_or(Value::Null);
                (s.name.to_string(), value)
            })
            .collect();
        let foreign = shape
            .associations
            .iter()
            .filter_map(|a| a.descriptor.local_column())
            .map(|column| {
                let value = row.get_by_name(column).cloned().unwrap_or(Value::Null);
                (column, value)
            })
            .collect();

        let idx = self.arena.len();
        self.arena.push(Record {
            id: id.clone(),
            fields,
            foreign,
            slots: HashMap::new(),
        });
        seen.insert(key, idx);
        Some((idx, true))
    }
}

fn distinct(indices: &[usize]) -> Vec<usize> {
    let mut seen = HashSet::new();
    indices.iter().copied().filter(|i| seen.insert(*i)).collect()
}

fn assemble(arena: &[Record], idx: usize, shape: &ResolvedShape<'_>) -> Instance {
    let record = &arena[idx];
    let mut instance = Instance::new(shape.entity.name).with_id(record.id.clone());
    instance.fields = record.fields.clone();

    for assoc in &shape.associations {
        let descriptor = assoc.descriptor;
        let related = match record.slots.get(descriptor.name) {
            Some(Slot::One(Some(child))) => {
                Related::One(Some(Box::new(assemble(arena, *child, &assoc.shape))))
            }
            Some(Slot::Many(children)) => Related::Many(
                children
                    .iter()
                    .map(|&child| assemble(arena, child, &assoc.shape))
                    .collect(),
            ),
            Some(Slot::One(None)) => Related::One(None),
            None => match descriptor.cardinality {
                Cardinality::One => Related::One(None),
                Cardinality::Many => Related::Many(Vec::new()),
            },
        };
        instance.associations.insert(descriptor.name.to_string(), related);
    }
    instance
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use asupersync::types::CancelKind;
    use sqlgraph_core::{
        AssociationDescriptor, EntityDescriptor, Executed, LinkTable, ScalarProperty, SqlType,
        Statement,
    };
    use sqlgraph_memory::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Cancels the caller's context once `limit` queries have completed.
    struct CancelAfter<'a> {
        store: &'a MemoryStore,
        limit: usize,
        done: AtomicUsize,
    }

    impl StatementExecutor for CancelAfter<'_> {
        async fn query(&self, cx: &Cx, query: &Query) -> Outcome<Vec<Row>, Error> {
            let rows = self.store.query(cx, query).await;
            if self.done.fetch_add(1, Ordering::SeqCst) + 1 == self.limit {
                cx.cancel_with(CancelKind::User, Some("caller gave up"));
            }
            rows
        }

        async fn execute(&self, cx: &Cx, statement: &Statement) -> Outcome<Executed, Error> {
            self.store.execute(cx, statement).await
        }

        async fn savepoint(&self, cx: &Cx, name: &str) -> Outcome<(), Error> {
            self.store.savepoint(cx, name).await
        }

        async fn rollback_to(&self, cx: &Cx, name: &str) -> Outcome<(), Error> {
            self.store.rollback_to(cx, name).await
        }

        async fn release(&self, cx: &Cx, name: &str) -> Outcome<(), Error> {
            self.store.release(cx, name).await
        }
    }

    fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
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
                EntityDescriptor::new("Publisher", "publishers")
                    .scalar(ScalarProperty::new("name", SqlType::Text)),
            )
            .register(
                EntityDescriptor::new("Book", "books")
                    .scalar(ScalarProperty::new("title", SqlType::Text))
                    .scalar(ScalarProperty::new("year", SqlType::Integer).nullable(true))
                    .association(
                        AssociationDescriptor::one("publisher", "Publisher").local_fk("publisher_id"),
                    )
                    .association(AssociationDescriptor::many("chapters", "Chapter").remote_fk("book_id"))
                    .association(
                        AssociationDescriptor::many("authors", "Author")
                            .link_table(LinkTable::new("book_authors", "book_id", "author_id")),
                    ),
            )
            .register(
                EntityDescriptor::new("Chapter", "chapters")
                    .scalar(ScalarProperty::new("heading", SqlType::Text)),
            )
            .register(
                EntityDescriptor::new("Author", "authors")
                    .scalar(ScalarProperty::new("name", SqlType::Text)),
            )
            .build()
            .unwrap()
    }

    fn seed_id(store: &MemoryStore, table: &'static str, values: Vec<(&'static str, Value)>) -> Value {
        store.seed(table, values).unwrap().generated_id.unwrap()
    }

    /// Two publishers, `books` books alternating between them, two chapters
    /// per book and one shared author on every book.
    fn library(store: &MemoryStore, books: usize) -> Vec<Value> {
        let acme = seed_id(store, "publishers", vec![("name", Value::from("Acme"))]);
        let orbit = seed_id(store, "publishers", vec![("name", Value::from("Orbit"))]);
        let author = seed_id(store, "authors", vec![("name", Value::from("Le Guin"))]);
        let mut ids = Vec::new();
        for i in 0..books {
            let publisher = if i % 2 == 0 { acme.clone() } else { orbit.clone() };
            let book = seed_id(
                store,
                "books",
                vec![
                    ("title", Value::Text(format!("Book {i}"))),
                    ("year", Value::Null),
                    ("publisher_id", publisher),
                ],
            );
            for c in 0..2 {
                store
                    .seed(
                        "chapters",
                        vec![
                            ("heading", Value::Text(format!("Chapter {c}"))),
                            ("book_id", book.clone()),
                        ],
                    )
                    .unwrap();
            }
            store
                .seed(
                    "book_authors",
                    vec![("book_id", book.clone()), ("author_id", author.clone())],
                )
                .unwrap();
            ids.push(book);
        }
        ids
    }

    fn full_shape() -> Shape {
        Shape::of("Book")
            .only(["title"])
            .with("publisher", Shape::of("Publisher"))
            .with("chapters", Shape::of("Chapter"))
            .with("authors", Shape::of("Author"))
    }

    #[test]
    fn test_query_count_is_bounded_by_hops() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let registry = registry();
            let store = MemoryStore::from_registry(&registry);
            let ids = library(&store, 200);
            store.clear_log();

            let fetched = unwrap_outcome(
                Fetcher::new(&registry)
                    .fetch(&cx, &store, &full_shape(), &RootSource::Ids(ids.clone()))
                    .await,
            );

            assert_eq!(fetched.len(), 200);
            assert_eq!(fetched.report.queries, 4);
            assert_eq!(fetched.report.hops, 3);
            assert_eq!(fetched.report.levels, 1);
            assert_eq!(store.query_count(), 4);

            let first = fetched.first().unwrap();
            assert_eq!(first.get("title"), Some(&Value::from("Book 0")));
            assert!(!first.is_populated("year"));
            assert_eq!(
                first.related_one("publisher").unwrap().get("name"),
                Some(&Value::from("Acme"))
            );
            assert_eq!(first.related_many("chapters").len(), 2);
            assert_eq!(first.related_many("authors").len(), 1);
        });
    }

    #[test]
    fn test_cancellation_abandons_remaining_hops() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let registry = registry();
            let store = MemoryStore::from_registry(&registry);
            let ids = library(&store, 6);
            store.clear_log();
            let executor = CancelAfter {
                store: &store,
                limit: 1,
                done: AtomicUsize::new(0),
            };

            let outcome = Fetcher::new(&registry)
                .fetch(&cx, &executor, &full_shape(), &RootSource::Ids(ids))
                .await;
            match outcome {
                Outcome::Cancelled(reason) => assert_eq!(reason.kind, CancelKind::User),
                Outcome::Ok(fetched) => panic!("fetch completed with {} roots", fetched.len()),
                Outcome::Err(e) => panic!("unexpected error: {e}"),
                Outcome::Panicked(p) => panic!("panicked: {p:?}"),
            }
            // Only the root query ran; the three association hops never started.
            assert_eq!(store.query_count(), 1);
        });
    }

    #[test]
    fn test_results_follow_requested_order() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let registry = registry();
            let store = MemoryStore::from_registry(&registry);
            let ids = library(&store, 3);

            let requested = vec![
                ids[2].clone(),
                ids[0].clone(),
                Value::BigInt(9_999),
                ids[2].clone(),
            ];
            let fetched = unwrap_outcome(
                Fetcher::new(&registry)
                    .fetch(&cx, &store, &Shape::of("Book").only(["title"]), &RootSource::Ids(requested))
                    .await,
            );

            let titles: Vec<_> = fetched
                .instances
                .iter()
                .map(|i| i.get("title").cloned().unwrap())
                .collect();
            assert_eq!(
                titles,
                vec![Value::from("Book 2"), Value::from("Book 0"), Value::from("Book 2")]
            );
            assert_eq!(fetched.report.queries, 1);
        });
    }

    #[test]
    fn test_absent_associations_are_explicit() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let registry = registry();
            let store = MemoryStore::from_registry(&registry);
            let lonely = seed_id(
                &store,
                "books",
                vec![("title", Value::from("Lonely")), ("publisher_id", Value::Null)],
            );

            let fetched = unwrap_outcome(
                Fetcher::new(&registry)
                    .fetch(&cx, &store, &full_shape(), &RootSource::ids([lonely]))
                    .await,
            );
            let book = fetched.first().unwrap();
            assert_eq!(book.related("publisher"), Some(&Related::One(None)));
            assert_eq!(book.related("chapters"), Some(&Related::Many(Vec::new())));
            assert_eq!(book.related("authors"), Some(&Related::Many(Vec::new())));
            // publisher skipped (no keys); chapters and authors still queried
            assert_eq!(fetched.report.queries, 3);
        });
    }

    #[test]
    fn test_ids_only_association() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let registry = registry();
            let store = MemoryStore::from_registry(&registry);
            let ids = library(&store, 1);

            let shape = Shape::of("Book").ids_only().with_ids("authors");
            let fetched = unwrap_outcome(
                Fetcher::new(&registry)
                    .fetch(&cx, &store, &shape, &RootSource::Ids(ids))
                    .await,
            );
            let book = fetched.first().unwrap();
            assert!(book.fields.is_empty());
            let author = &book.related_many("authors")[0];
            assert!(author.is_reference());
        });
    }

    #[test]
    fn test_unknown_property_fails_before_any_query() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let registry = registry();
            let store = MemoryStore::from_registry(&registry);
            let shape = Shape::of("Book").include("reviews");

            match Fetcher::new(&registry)
                .fetch(&cx, &store, &shape, &RootSource::all())
                .await
            {
                Outcome::Err(Error::UnknownProperty(e)) => assert_eq!(e.property, "reviews"),
                other => panic!("expected unknown property, got {other:?}"),
            }
            assert_eq!(store.query_count(), 0);
        });
    }

    #[test]
    fn test_root_query_paging() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let registry = registry();
            let store = MemoryStore::from_registry(&registry);
            library(&store, 5);

            let source = RootSource::query(
                None,
                FetchOptions::new().order_by(OrderTerm::desc("title")).limit(2).offset(1),
            );
            let fetched = unwrap_outcome(
                Fetcher::new(&registry)
                    .fetch(&cx, &store, &Shape::of("Book").only(["title"]), &source)
                    .await,
            );
            let titles: Vec<_> = fetched
                .instances
                .iter()
                .map(|i| i.get("title").cloned().unwrap())
                .collect();
            assert_eq!(titles, vec![Value::from("Book 3"), Value::from("Book 2")]);
        });
    }

    #[test]
    fn test_empty_roots_issue_no_queries() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let registry = registry();
            let store = MemoryStore::from_registry(&registry);
            let fetched = unwrap_outcome(
                Fetcher::new(&registry)
                    .fetch(&cx, &store, &full_shape(), &RootSource::Ids(Vec::new()))
                    .await,
            );
            assert!(fetched.is_empty());
            assert_eq!(fetched.report, FetchReport::default());
        });
    }
}
