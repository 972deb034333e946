//! Graph normalization.
//!
//! Turns a nested [`Instance`] tree into a flat [`NormalizedGraph`]: one
//! [`Node`] per logical entity plus explicit association edges between node
//! indices. Repeated sightings of the same entity (same identifier, or same
//! complete unique key) merge into one node; later scalar values overwrite
//! earlier ones and association targets accumulate.
//!
//! Traversal is an explicit-stack pre-order walk, so arbitrarily deep input
//! never recurses on the call stack.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use sqlgraph_core::{
    AssociationDescriptor, Cardinality, EntityDescriptor, Error, GraphPath, Instance, KeyValue,
    MalformedReason, Registry, Related, Result, UnknownPropertyError, Value,
};
use sqlgraph_query::ResolvedShape;

/// Index of a node in a [`NormalizedGraph`].
pub type NodeId = usize;

/// How a node was identified.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    /// By identifier.
    Id(KeyValue),
    /// By the complete unique key at `index` in the entity's `unique_keys`.
    Unique { index: usize, values: KeyValue },
    /// Not identifiable; always a new row with a generated identifier.
    Transient(usize),
}

impl NodeKey {
    /// Whether a uniqueness conflict on insert can be re-resolved through this key.
    pub fn is_resolvable(&self) -> bool {
        !matches!(self, NodeKey::Transient(_))
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Id(key) => write!(f, "id={key}"),
            NodeKey::Unique { index, values } => write!(f, "unique#{index}={values}"),
            NodeKey::Transient(n) => write!(f, "new#{n}"),
        }
    }
}

/// Targets of one populated association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    One(Option<NodeId>),
    Many(Vec<NodeId>),
}

impl Targets {
    pub fn nodes(&self) -> Vec<NodeId> {
        match self {
            Targets::One(one) => one.iter().copied().collect(),
            Targets::Many(many) => many.clone(),
        }
    }
}

/// A populated association of a node.
#[derive(Debug, Clone)]
pub struct Edge<'r> {
    pub association: &'r AssociationDescriptor,
    pub targets: Targets,
}

/// One logical entity of the input graph.
#[derive(Debug, Clone)]
pub struct Node<'r> {
    pub entity: &'r EntityDescriptor,
    pub key: NodeKey,
    pub id: Option<Value>,
    /// In-scope scalar values by property name (identifier excluded).
    pub fields: BTreeMap<&'static str, Value>,
    pub edges: Vec<Edge<'r>>,
    /// No sighting populated anything in scope besides the key.
    pub reference: bool,
    /// Where the node was first seen.
    pub path: GraphPath,
}

impl<'r> Node<'r> {
    pub fn edge(&self, association: &str) -> Option<&Edge<'r>> {
        self.edges.iter().find(|e| e.association.name == association)
    }
}

/// How a sighting was reached: element `index` of `association` on the
/// instance of sighting `parent`.
#[derive(Debug, Clone, Copy)]
struct Via {
    parent: usize,
    association: &'static str,
    index: usize,
}

/// One visited instance of the input tree, in pre-order.
#[derive(Debug)]
struct Sighting {
    node: NodeId,
    via: Option<Via>,
}

/// The flat, deduplicated form of an input graph.
#[derive(Debug)]
pub struct NormalizedGraph<'r> {
    nodes: Vec<Node<'r>>,
    root: NodeId,
    sightings: Vec<Sighting>,
}

impl<'r> NormalizedGraph<'r> {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node<'r> {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[Node<'r>] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// For every node, the `(parent, association)` pairs whose edges target it.
    pub fn inbound(&self) -> Vec<Vec<(NodeId, &'r AssociationDescriptor)>> {
        let mut inbound = vec![Vec::new(); self.nodes.len()];
        for (parent, node) in self.nodes.iter().enumerate() {
            for edge in &node.edges {
                for target in edge.targets.nodes() {
                    inbound[target].push((parent, edge.association));
                }
            }
        }
        inbound
    }

    /// Write final identifiers back into every traversed instance of `root`.
    pub fn back_fill(&self, root: &mut Instance, ids: &[Option<Value>]) {
        let mut steps = Vec::new();
        for sighting in &self.sightings {
            let Some(id) = ids.get(sighting.node).cloned().flatten() else {
                continue;
            };
            steps.clear();
            let mut via = sighting.via;
            while let Some(step) = via {
                steps.push(step);
                via = self.sightings[step.parent].via;
            }
            if let Some(instance) = locate(root, steps.iter().rev()) {
                instance.id = Some(id);
            }
        }
    }
}

fn locate<'a, 'v>(root: &'a mut Instance, steps: impl Iterator<Item = &'v Via>) -> Option<&'a mut Instance> {
    let mut current = root;
    for Via { association, index, .. } in steps {
        current = current
            .associations
            .get_mut(*association)?
            .instances_mut()
            .nth(*index)?;
    }
    Some(current)
}

struct Frame<'i, 's, 'r> {
    instance: &'i Instance,
    node: NodeId,
    scope: Option<&'s ResolvedShape<'r>>,
    path: GraphPath,
    via: Option<Via>,
}

struct Normalizer<'r> {
    registry: &'r Registry,
    nodes: Vec<Node<'r>>,
    index: HashMap<(&'static str, NodeKey), NodeId>,
    sightings: Vec<Sighting>,
    transient: usize,
}

/// Normalize the graph rooted at `root`.
///
/// With a `scope`, scalars and associations outside the shape are ignored even
/// when populated. Fails with `UnknownProperty` for undeclared names and with
/// `MalformedGraph` for unresolvable keys, nulls in non-nullable properties,
/// wrong cardinality, or values of the wrong type.
pub fn normalize<'r>(
    registry: &'r Registry,
    root: &Instance,
    scope: Option<&ResolvedShape<'r>>,
) -> Result<NormalizedGraph<'r>> {
    let entity = registry.describe(&root.entity)?;
    let mut normalizer = Normalizer {
        registry,
        nodes: Vec::new(),
        index: HashMap::new(),
        sightings: Vec::new(),
        transient: 0,
    };

    let id = normalizer.identifier(entity, root, &GraphPath::root(entity.name, None))?;
    let path = GraphPath::root(entity.name, id.as_ref().map(|v| v as &dyn fmt::Display));
    let root_node = normalizer.resolve(entity, root, id, &path, scope)?;

    let mut stack = vec![Frame {
        instance: root,
        node: root_node,
        scope,
        path,
        via: None,
    }];
    while let Some(frame) = stack.pop() {
        let sighting = normalizer.sightings.len();
        normalizer.sightings.push(Sighting {
            node: frame.node,
            via: frame.via,
        });
        let children = normalizer.absorb(&frame, sighting)?;
        stack.extend(children.into_iter().rev());
    }

    tracing::debug!(
        entity = entity.name,
        nodes = normalizer.nodes.len(),
        sightings = normalizer.sightings.len(),
        "Graph normalized"
    );

    Ok(NormalizedGraph {
        nodes: normalizer.nodes,
        root: root_node,
        sightings: normalizer.sightings,
    })
}

impl<'r> Normalizer<'r> {
    /// The identifier of `instance`, folding a populated identifier property
    /// into `Instance::id`.
    fn identifier(
        &self,
        entity: &EntityDescriptor,
        instance: &Instance,
        path: &GraphPath,
    ) -> Result<Option<Value>> {
        let explicit = instance.id.clone().filter(|v| !v.is_null());
        let folded = instance.get(entity.id.name).cloned().filter(|v| !v.is_null());
        match (explicit, folded) {
            (Some(a), Some(b)) if !a.same_as(&b) => Err(Error::malformed(
                MalformedReason::UnresolvableKey,
                entity.name,
                path.clone(),
                format!("conflicting identifiers {a} and {b}"),
            )),
            (Some(id), _) | (None, Some(id)) => {
                if entity.id.sql_type.accepts(&id) {
                    Ok(Some(id))
                } else {
                    Err(Error::malformed(
                        MalformedReason::TypeMismatch,
                        entity.name,
                        path.clone(),
                        format!("identifier {id} is not a valid {}", entity.id.sql_type.sql_name()),
                    ))
                }
            }
            (None, None) => Ok(None),
        }
    }

    /// Whether `instance` populates anything in `scope` besides its key.
    fn has_content(entity: &EntityDescriptor, instance: &Instance, scope: Option<&ResolvedShape<'r>>) -> bool {
        let scalar = instance.fields.keys().any(|name| {
            name != entity.id.name && scope.is_none_or(|s| s.includes_scalar(name))
        });
        let association = instance
            .associations
            .keys()
            .any(|name| scope.is_none_or(|s| s.association(name).is_some()));
        scalar || association
    }

    /// Find or create the node for one sighting.
    fn resolve(
        &mut self,
        entity: &'r EntityDescriptor,
        instance: &Instance,
        id: Option<Value>,
        path: &GraphPath,
        scope: Option<&ResolvedShape<'r>>,
    ) -> Result<NodeId> {
        let mut keys = Vec::new();
        if let Some(id) = &id {
            keys.push(NodeKey::Id(KeyValue::single(id.clone())));
        }
        for (index, properties) in entity.unique_keys.iter().enumerate() {
            let values: Option<Vec<Value>> = properties
                .iter()
                .map(|p| instance.get(p).filter(|v| !v.is_null()).cloned())
                .collect();
            if let Some(values) = values {
                keys.push(NodeKey::Unique {
                    index,
                    values: KeyValue::composite(values),
                });
            }
        }

        let matched: Vec<(NodeId, &NodeKey)> = keys
            .iter()
            .filter_map(|key| self.index.get(&(entity.name, key.clone())).map(|&node| (node, key)))
            .collect();
        let claimed = id
            .clone()
            .or_else(|| matched.iter().find_map(|(node, _)| self.nodes[*node].id.clone()));
        if let Some(claimed) = &claimed {
            for (other, key) in &matched {
                let existing = &self.nodes[*other];
                if let Some(held) = existing.id.as_ref().filter(|held| !held.same_as(claimed)) {
                    return Err(Error::malformed(
                        MalformedReason::UnresolvableKey,
                        entity.name,
                        path.clone(),
                        format!(
                            "{} is shared with {} (identifier {held}) but this instance has identifier {claimed}",
                            describe_key(entity, key),
                            existing.path
                        ),
                    ));
                }
            }
        }
        let found = matched.first().map(|(node, _)| *node);
        let content = Self::has_content(entity, instance, scope);

        let node = match found {
            Some(node) => {
                if self.nodes[node].id.is_none() {
                    self.nodes[node].id = claimed;
                }
                node
            }
            None => {
                let key = match keys.first() {
                    Some(key) => key.clone(),
                    None if content && entity.generates_ids() => {
                        self.transient += 1;
                        NodeKey::Transient(self.transient)
                    }
                    None => {
                        return Err(Error::malformed(
                            MalformedReason::UnresolvableKey,
                            entity.name,
                            path.clone(),
                            "no identifier and no complete unique key",
                        ));
                    }
                };
                self.nodes.push(Node {
                    entity,
                    key,
                    id,
                    fields: BTreeMap::new(),
                    edges: Vec::new(),
                    reference: true,
                    path: path.clone(),
                });
                self.nodes.len() - 1
            }
        };

        for key in keys {
            if !matches!(key, NodeKey::Transient(_)) {
                self.index.entry((entity.name, key)).or_insert(node);
            }
        }
        if content {
            self.nodes[node].reference = false;
        }
        Ok(node)
    }

    /// Merge one sighting into its node; returns the frames of its children.
    fn absorb<'i, 's>(&mut self, frame: &Frame<'i, 's, 'r>, sighting: usize) -> Result<Vec<Frame<'i, 's, 'r>>> {
        let node = frame.node;
        let entity = self.nodes[node].entity;
        let instance = frame.instance;

        if instance.entity != entity.name {
            return Err(Error::malformed(
                MalformedReason::TypeMismatch,
                entity.name,
                frame.path.clone(),
                format!("expected a {} instance, found {}", entity.name, instance.entity),
            ));
        }

        for (name, value) in &instance.fields {
            if name == entity.id.name {
                continue;
            }
            let property = entity.scalar_property(name).ok_or_else(|| unknown(entity, name, &frame.path))?;
            if frame.scope.is_some_and(|s| !s.includes_scalar(name)) {
                continue;
            }
            if value.is_null() && !property.nullable {
                return Err(Error::malformed(
                    MalformedReason::NullNotAllowed,
                    entity.name,
                    frame.path.member(name),
                    "property is not nullable",
                ));
            }
            if !property.sql_type.accepts(value) {
                return Err(Error::malformed(
                    MalformedReason::TypeMismatch,
                    entity.name,
                    frame.path.member(name),
                    format!(
                        "{} value does not fit {}",
                        value.type_name(),
                        property.sql_type.sql_name()
                    ),
                ));
            }
            self.nodes[node].fields.insert(property.name, value.clone());
        }

        let mut children = Vec::new();
        for (name, related) in &instance.associations {
            let association = entity
                .association_named(name)
                .ok_or_else(|| unknown(entity, name, &frame.path))?;
            let scope = match frame.scope {
                Some(shape) => match shape.association(name) {
                    Some(nested) => Some(&nested.shape),
                    None => continue,
                },
                None => None,
            };
            let target = self.registry.describe(association.target)?;
            let member = frame.path.member(name);
            let via = |index| Via {
                parent: sighting,
                association: association.name,
                index,
            };

            let targets = match (association.cardinality, related) {
                (Cardinality::One, Related::One(None)) => {
                    if !association.nullable && association.local_column().is_some() {
                        return Err(Error::malformed(
                            MalformedReason::NullNotAllowed,
                            entity.name,
                            member,
                            "association is not nullable",
                        ));
                    }
                    Targets::One(None)
                }
                (Cardinality::One, Related::One(Some(child))) => {
                    let (child_node, child_frame) =
                        self.child(target, child, scope, member, via(0))?;
                    children.push(child_frame);
                    Targets::One(Some(child_node))
                }
                (Cardinality::Many, Related::Many(many)) => {
                    let mut nodes = Vec::with_capacity(many.len());
                    for (i, child) in many.iter().enumerate() {
                        let (child_node, child_frame) =
                            self.child(target, child, scope, member.index(i), via(i))?;
                        children.push(child_frame);
                        if !nodes.contains(&child_node) {
                            nodes.push(child_node);
                        }
                    }
                    Targets::Many(nodes)
                }
                (expected, _) => {
                    return Err(Error::malformed(
                        MalformedReason::CardinalityMismatch,
                        entity.name,
                        member,
                        format!(
                            "association is to-{}",
                            if expected == Cardinality::One { "one" } else { "many" }
                        ),
                    ));
                }
            };
            self.merge_edge(node, association, targets);
        }
        Ok(children)
    }

    fn child<'i, 's>(
        &mut self,
        target: &'r EntityDescriptor,
        instance: &'i Instance,
        scope: Option<&'s ResolvedShape<'r>>,
        path: GraphPath,
        via: Via,
    ) -> Result<(NodeId, Frame<'i, 's, 'r>)> {
        if instance.entity != target.name {
            return Err(Error::malformed(
                MalformedReason::TypeMismatch,
                target.name,
                path,
                format!("expected a {} instance, found {}", target.name, instance.entity),
            ));
        }
        let id = self.identifier(target, instance, &path)?;
        let node = self.resolve(target, instance, id, &path, scope)?;
        Ok((
            node,
            Frame {
                instance,
                node,
                scope,
                path,
                via: Some(via),
            },
        ))
    }

    fn merge_edge(&mut self, node: NodeId, association: &'r AssociationDescriptor, targets: Targets) {
        let edges = &mut self.nodes[node].edges;
        match edges.iter_mut().find(|e| e.association.name == association.name) {
            Some(edge) => match (&mut edge.targets, targets) {
                (Targets::Many(existing), Targets::Many(added)) => {
                    for target in added {
                        if !existing.contains(&target) {
                            existing.push(target);
                        }
                    }
                }
                (slot, replacement) => *slot = replacement,
            },
            None => edges.push(Edge {
                association,
                targets,
            }),
        }
    }
}

fn describe_key(entity: &EntityDescriptor, key: &NodeKey) -> String {
    match key {
        NodeKey::Unique { index, values } => match entity.unique_keys.get(*index) {
            Some(properties) => format!("unique key ({}) = {values}", properties.join(", ")),
            None => key.to_string(),
        },
        other => other.to_string(),
    }
}

fn unknown(entity: &EntityDescriptor, property: &str, path: &GraphPath) -> Error {
    Error::UnknownProperty(UnknownPropertyError {
        entity: entity.name.to_string(),
        property: property.to_string(),
        path: path.member(property),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlgraph_core::{IdGeneration, LinkTable, ScalarProperty, SqlType};
    use sqlgraph_query::Shape;

    fn registry() -> Registry {
        Registry::builder()
            .register(
                EntityDescriptor::new("Publisher", "publishers")
                    .scalar(ScalarProperty::new("name", SqlType::Text))
                    .unique_key(&["name"])
                    .association(AssociationDescriptor::many("imprints", "Publisher").remote_fk("parent_id")),
            )
            .register(
                EntityDescriptor::new("Book", "books")
                    .scalar(ScalarProperty::new("title", SqlType::Text))
                    .scalar(ScalarProperty::new("year", SqlType::Integer).nullable(true))
                    .association(
                        AssociationDescriptor::one("publisher", "Publisher")
                            .local_fk("publisher_id")
                            .nullable(false),
                    )
                    .association(AssociationDescriptor::many("chapters", "Chapter").remote_fk("book_id"))
                    .association(
                        AssociationDescriptor::many("tags", "Tag")
                            .link_table(LinkTable::new("book_tags", "book_id", "tag_id")),
                    ),
            )
            .register(
                EntityDescriptor::new("Chapter", "chapters")
                    .scalar(ScalarProperty::new("heading", SqlType::Text)),
            )
            .register(
                EntityDescriptor::new("Tag", "tags")
                    .id("code", SqlType::Text, IdGeneration::Assigned)
                    .scalar(ScalarProperty::new("label", SqlType::Text)),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_repeated_entities_merge_last_visited_wins() {
        let registry = registry();
        let book = Instance::new("Book")
            .set("title", "Dune")
            .one("publisher", Instance::new("Publisher").with_id(7_i64).set("name", "Ace"))
            .many(
                "chapters",
                vec![
                    Instance::new("Chapter").set("heading", "One"),
                    Instance::new("Chapter").set("heading", "Two"),
                ],
            )
            .many(
                "tags",
                vec![
                    Instance::new("Tag").with_id("sf").set("label", "Sci-fi"),
                    Instance::new("Tag").with_id("sf").set("label", "SF"),
                ],
            );

        let graph = normalize(&registry, &book, None).unwrap();
        // book, publisher, two transient chapters, one tag
        assert_eq!(graph.len(), 5);
        let root = graph.node(graph.root());
        assert!(matches!(root.key, NodeKey::Transient(_)));
        assert!(!root.reference);

        let tags = root.edge("tags").unwrap().targets.nodes();
        assert_eq!(tags.len(), 1);
        assert_eq!(graph.node(tags[0]).fields.get("label"), Some(&Value::from("SF")));

        let chapters = root.edge("chapters").unwrap().targets.nodes();
        assert_eq!(chapters.len(), 2);
        assert_ne!(chapters[0], chapters[1]);
        assert_eq!(graph.node(chapters[1]).path.to_string(), "Book.chapters[1]");
        assert_eq!(graph.inbound()[chapters[0]].len(), 1);
    }

    #[test]
    fn test_shared_unique_key_with_different_ids_is_rejected() {
        let registry = registry();
        let ace = Instance::new("Publisher")
            .with_id(7_i64)
            .set("name", "Ace")
            .many(
                "imprints",
                vec![Instance::new("Publisher").with_id(8_i64).set("name", "Ace")],
            );
        match normalize(&registry, &ace, None) {
            Err(Error::MalformedGraph(e)) => {
                assert_eq!(e.reason, MalformedReason::UnresolvableKey);
                assert_eq!(e.path.to_string(), "Publisher(id=7).imprints[0]");
                assert!(e.message.contains("unique key (name)"), "{}", e.message);
                assert!(e.message.contains("Publisher(id=7)"), "{}", e.message);
            }
            other => panic!("expected unresolvable key, got {other:?}"),
        }

        // The unique key learns its identifier from a later sighting.
        let late = Instance::new("Publisher")
            .set("name", "Ace")
            .many(
                "imprints",
                vec![
                    Instance::new("Publisher").with_id(8_i64).set("name", "Ace"),
                    Instance::new("Publisher").with_id(7_i64).set("name", "Ace"),
                ],
            );
        assert!(matches!(
            normalize(&registry, &late, None),
            Err(Error::MalformedGraph(e)) if e.reason == MalformedReason::UnresolvableKey
        ));

        let same = Instance::new("Publisher")
            .with_id(7_i64)
            .set("name", "Ace")
            .many(
                "imprints",
                vec![Instance::new("Publisher").with_id(7_i64).set("name", "Ace")],
            );
        let graph = normalize(&registry, &same, None).unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.node(0).id, Some(Value::BigInt(7)));
    }

    #[test]
    fn test_unique_key_identifies_and_reference_flag() {
        let registry = registry();
        let book = Instance::new("Book")
            .with_id(1_i64)
            .one("publisher", Instance::new("Publisher").set("name", "Ace"))
            .many("tags", vec![Instance::reference("Tag", "sf")]);

        let graph = normalize(&registry, &book, None).unwrap();
        let root = graph.node(graph.root());
        assert_eq!(root.path.to_string(), "Book(id=1)");
        assert!(!root.reference);

        let publisher = graph.node(root.edge("publisher").unwrap().targets.nodes()[0]);
        assert!(matches!(publisher.key, NodeKey::Unique { index: 0, .. }));
        assert!(!publisher.reference);

        let tag = graph.node(root.edge("tags").unwrap().targets.nodes()[0]);
        assert!(tag.reference);
        assert_eq!(tag.id, Some(Value::from("sf")));
    }

    #[test]
    fn test_identifier_property_is_folded() {
        let registry = registry();
        let graph = normalize(&registry, &Instance::new("Book").set("id", 4_i64), None).unwrap();
        let root = graph.node(graph.root());
        assert_eq!(root.id, Some(Value::BigInt(4)));
        assert!(root.fields.is_empty());
        assert!(root.reference);

        let conflicting = Instance::new("Book").with_id(4_i64).set("id", 5_i64);
        assert!(matches!(
            normalize(&registry, &conflicting, None),
            Err(Error::MalformedGraph(_))
        ));
    }

    #[test]
    fn test_malformed_inputs() {
        let registry = registry();

        let keyless_tag = Instance::new("Book").many("tags", vec![Instance::new("Tag").set("label", "x")]);
        match normalize(&registry, &keyless_tag, None) {
            Err(Error::MalformedGraph(e)) => {
                assert_eq!(e.reason, MalformedReason::UnresolvableKey);
                assert_eq!(e.path.to_string(), "Book.tags[0]");
            }
            other => panic!("expected unresolvable key, got {other:?}"),
        }

        let null_title = Instance::new("Book").set("title", Value::Null);
        assert!(matches!(
            normalize(&registry, &null_title, None),
            Err(Error::MalformedGraph(e)) if e.reason == MalformedReason::NullNotAllowed
        ));

        let null_publisher = Instance::new("Book").set("title", "x").none("publisher");
        assert!(matches!(
            normalize(&registry, &null_publisher, None),
            Err(Error::MalformedGraph(e)) if e.reason == MalformedReason::NullNotAllowed
        ));

        let wrong_type = Instance::new("Book").set("year", "nineteen");
        assert!(matches!(
            normalize(&registry, &wrong_type, None),
            Err(Error::MalformedGraph(e)) if e.reason == MalformedReason::TypeMismatch
        ));

        let wrong_cardinality = Instance::new("Book").set("title", "x").none("chapters");
        assert!(matches!(
            normalize(&registry, &wrong_cardinality, None),
            Err(Error::MalformedGraph(e)) if e.reason == MalformedReason::CardinalityMismatch
        ));

        let unknown = Instance::new("Book").set("subtitle", "x");
        match normalize(&registry, &unknown, None) {
            Err(Error::UnknownProperty(e)) => assert_eq!(e.path.to_string(), "Book.subtitle"),
            other => panic!("expected unknown property, got {other:?}"),
        }
    }

    #[test]
    fn test_scope_ignores_out_of_shape_properties() {
        let registry = registry();
        let shape = Shape::of("Book").only(["title"]).with_ids("tags");
        let scope = shape.resolve(&registry, 8).unwrap();
        let book = Instance::new("Book")
            .with_id(1_i64)
            .set("title", "Dune")
            .set("year", 1965_i64)
            .many("chapters", vec![Instance::new("Chapter").set("heading", "One")])
            .many("tags", vec![Instance::new("Tag").with_id("sf").set("label", "ignored")]);

        let graph = normalize(&registry, &book, Some(&scope)).unwrap();
        assert_eq!(graph.len(), 2);
        let root = graph.node(graph.root());
        assert_eq!(root.fields.len(), 1);
        assert!(root.edge("chapters").is_none());
        let tag = graph.node(root.edge("tags").unwrap().targets.nodes()[0]);
        assert!(tag.reference);
        assert!(tag.fields.is_empty());
    }

    #[test]
    fn test_back_fill_reaches_every_sighting() {
        let registry = registry();
        let mut book = Instance::new("Book")
            .set("title", "Dune")
            .many(
                "chapters",
                vec![
                    Instance::new("Chapter").set("heading", "One"),
                    Instance::new("Chapter").set("heading", "Two"),
                ],
            );
        let graph = normalize(&registry, &book, None).unwrap();
        let ids: Vec<Option<Value>> = (0..graph.len()).map(|i| Some(Value::BigInt(100 + i as i64))).collect();
        graph.back_fill(&mut book, &ids);

        assert_eq!(book.id, Some(Value::BigInt(100)));
        let chapters = book.related_many("chapters");
        assert_eq!(chapters[0].id, Some(Value::BigInt(101)));
        assert_eq!(chapters[1].id, Some(Value::BigInt(102)));
    }

    #[test]
    fn test_deep_chain_does_not_recurse() {
        let registry = Registry::builder()
            .register(
                EntityDescriptor::new("Node", "nodes")
                    .scalar(ScalarProperty::new("n", SqlType::BigInt))
                    .association(AssociationDescriptor::one("next", "Node").local_fk("next_id")),
            )
            .build()
            .unwrap();
        let mut chain = Instance::new("Node").set("n", 0_i64);
        for n in 1..500_i64 {
            chain = Instance::new("Node").set("n", n).one("next", chain);
        }
        let graph = normalize(&registry, &chain, None).unwrap();
        assert_eq!(graph.len(), 500);
        assert_eq!(graph.node(graph.len() - 1).path.depth(), 499);

        let ids: Vec<Option<Value>> = (0..graph.len()).map(|i| Some(Value::BigInt(i as i64))).collect();
        graph.back_fill(&mut chain, &ids);
        let mut deepest = &chain;
        while let Some(next) = deepest.related_one("next") {
            deepest = next;
        }
        assert_eq!(deepest.get("n"), Some(&Value::BigInt(0)));
        assert_eq!(deepest.id, Some(Value::BigInt(499)));
    }
}
