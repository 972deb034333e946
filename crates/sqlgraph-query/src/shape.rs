//! Shape specifications.
//!
//! A [`Shape`] is a finite, caller-built tree naming which scalar properties
//! and which nested associations of an entity type take part in an
//! operation. Fetches load exactly the shape; saves given an explicit shape
//! only reconcile what it names.
//!
//! Shapes are plain data until [`Shape::resolve`] checks every name against
//! the [`Registry`] and enforces the nesting guard, producing a
//! [`ResolvedShape`] that borrows the registry's descriptors.
//!
//! # Example
//!
//! ```ignore
//! let shape = Shape::of("Book")
//!     .only(["title"])
//!     .with("publisher", Shape::of("Publisher"))
//!     .with("chapters", Shape::of("Chapter").only(["heading"]))
//!     .with_ids("authors");
//! let resolved = shape.resolve(&registry, 32)?;
//! ```

use sqlgraph_core::{
    AssociationDescriptor, EntityDescriptor, Error, GraphPath, Registry, Result, ScalarProperty,
    ShapeError, ShapeErrorKind, UnknownPropertyError,
};

/// Which scalar properties a shape node includes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarSelection {
    /// Every declared scalar.
    All,
    /// The named scalars (the identifier is always included).
    Only(Vec<String>),
}

/// How an association named in a shape expands.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ShapeChild {
    /// An explicit nested shape.
    Nested(Shape),
    /// Target identifiers only.
    IdsOnly,
    /// All scalars of the target, no further associations.
    Leaf,
    /// The same association followed `depth` more times on a self-referencing entity.
    Recursive { depth: usize },
}

/// A user-built shape specification node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape {
    entity: String,
    scalars: ScalarSelection,
    associations: Vec<(String, ShapeChild)>,
}

impl Shape {
    /// All scalar properties of `entity` and no associations.
    pub fn of(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            scalars: ScalarSelection::All,
            associations: Vec::new(),
        }
    }

    /// Restrict to the named scalar properties.
    #[must_use]
    pub fn only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scalars = ScalarSelection::Only(names.into_iter().map(Into::into).collect());
        self
    }

    /// Include no scalar properties besides the identifier.
    #[must_use]
    pub fn ids_only(mut self) -> Self {
        self.scalars = ScalarSelection::Only(Vec::new());
        self
    }

    /// Include an association expanded by a nested shape.
    #[must_use]
    pub fn with(self, association: impl Into<String>, shape: Shape) -> Self {
        self.push(association.into(), ShapeChild::Nested(shape))
    }

    /// Include an association with only its targets' identifiers.
    #[must_use]
    pub fn with_ids(self, association: impl Into<String>) -> Self {
        self.push(association.into(), ShapeChild::IdsOnly)
    }

    /// Include an association with all scalars of its targets.
    #[must_use]
    pub fn include(self, association: impl Into<String>) -> Self {
        self.push(association.into(), ShapeChild::Leaf)
    }

    /// Follow a self-referencing association `depth` levels deep. Every
    /// level selects the same scalars as this node.
    #[must_use]
    pub fn recursive(self, association: impl Into<String>, depth: usize) -> Self {
        if depth == 0 {
            return self;
        }
        self.push(association.into(), ShapeChild::Recursive { depth })
    }

    fn push(mut self, name: String, child: ShapeChild) -> Self {
        match self.associations.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = child,
            None => self.associations.push((name, child)),
        }
        self
    }

    /// Entity type this shape applies to.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Scalar selection of this node.
    pub fn scalars(&self) -> &ScalarSelection {
        &self.scalars
    }

    /// Names of the associations this node includes, in insertion order.
    pub fn association_names(&self) -> impl Iterator<Item = &str> {
        self.associations.iter().map(|(n, _)| n.as_str())
    }

    /// Validate against the registry and expand into a finite tree.
    ///
    /// Fails with `UnknownProperty` for undeclared names and with
    /// `Shape(DepthExceeded)` when associations nest deeper than `max_depth`.
    pub fn resolve<'r>(&self, registry: &'r Registry, max_depth: usize) -> Result<ResolvedShape<'r>> {
        let entity = registry.describe(&self.entity)?;
        let path = GraphPath::root(entity.name, None);
        resolve_node(self, entity, registry, &path, 0, max_depth)
    }
}

fn resolve_node<'r>(
    shape: &Shape,
    entity: &'r EntityDescriptor,
    registry: &'r Registry,
    path: &GraphPath,
    depth: usize,
    max_depth: usize,
) -> Result<ResolvedShape<'r>> {
    let scalars = resolve_scalars(&shape.scalars, entity, path)?;

    let mut associations = Vec::with_capacity(shape.associations.len());
    for (name, child) in &shape.associations {
        let child_path = path.member(name);
        let descriptor = entity.association_named(name).ok_or_else(|| {
            Error::UnknownProperty(UnknownPropertyError {
                entity: entity.name.to_string(),
                property: name.clone(),
                path: child_path.clone(),
            })
        })?;
        if depth + 1 > max_depth {
            return Err(Error::Shape(ShapeError {
                kind: ShapeErrorKind::DepthExceeded,
                path: child_path,
                message: format!("shape nests deeper than {max_depth} associations"),
            }));
        }
        let target = registry.describe(descriptor.target)?;

        let nested = match child {
            ShapeChild::Nested(nested) => {
                if nested.entity != target.name {
                    return Err(Error::Shape(ShapeError {
                        kind: ShapeErrorKind::EntityMismatch,
                        path: child_path,
                        message: format!(
                            "nested shape is for {} but '{}' targets {}",
                            nested.entity, name, target.name
                        ),
                    }));
                }
                resolve_node(nested, target, registry, &child_path, depth + 1, max_depth)?
            }
            ShapeChild::IdsOnly => ResolvedShape::ids_only(target),
            ShapeChild::Leaf => ResolvedShape::leaf(target),
            ShapeChild::Recursive { depth: remaining } => {
                if target.name != entity.name {
                    return Err(Error::Shape(ShapeError {
                        kind: ShapeErrorKind::RecursiveTargetMismatch,
                        path: child_path,
                        message: format!(
                            "'{}' targets {}, recursion requires {}",
                            name, target.name, entity.name
                        ),
                    }));
                }
                let mut level = Shape {
                    entity: shape.entity.clone(),
                    scalars: shape.scalars.clone(),
                    associations: Vec::new(),
                };
                if *remaining > 1 {
                    level = level.recursive(name.clone(), remaining - 1);
                }
                resolve_node(&level, target, registry, &child_path, depth + 1, max_depth)?
            }
        };

        associations.push(ResolvedAssociation {
            descriptor,
            shape: nested,
        });
    }

    Ok(ResolvedShape {
        entity,
        scalars,
        associations,
    })
}

fn resolve_scalars<'r>(
    selection: &ScalarSelection,
    entity: &'r EntityDescriptor,
    path: &GraphPath,
) -> Result<Vec<&'r ScalarProperty>> {
    match selection {
        ScalarSelection::All => Ok(entity.scalars.iter().collect()),
        ScalarSelection::Only(names) => {
            let mut scalars: Vec<&ScalarProperty> = Vec::with_capacity(names.len());
            for name in names {
                if name == entity.id.name {
                    continue;
                }
                let property = entity.scalar_property(name).ok_or_else(|| {
                    Error::UnknownProperty(UnknownPropertyError {
                        entity: entity.name.to_string(),
                        property: name.clone(),
                        path: path.member(name),
                    })
                })?;
                if !scalars.iter().any(|s| s.name == property.name) {
                    scalars.push(property);
                }
            }
            Ok(scalars)
        }
    }
}

/// A validated shape node bound to registry descriptors.
#[derive(Debug, Clone)]
pub struct ResolvedShape<'r> {
    pub entity: &'r EntityDescriptor,
    pub scalars: Vec<&'r ScalarProperty>,
    pub associations: Vec<ResolvedAssociation<'r>>,
}

/// An association included by a resolved shape.
#[derive(Debug, Clone)]
pub struct ResolvedAssociation<'r> {
    pub descriptor: &'r AssociationDescriptor,
    pub shape: ResolvedShape<'r>,
}

impl<'r> ResolvedShape<'r> {
    /// Identifier only, no associations.
    pub fn ids_only(entity: &'r EntityDescriptor) -> Self {
        Self {
            entity,
            scalars: Vec::new(),
            associations: Vec::new(),
        }
    }

    /// All scalars, no associations.
    pub fn leaf(entity: &'r EntityDescriptor) -> Self {
        Self {
            entity,
            scalars: entity.scalars.iter().collect(),
            associations: Vec::new(),
        }
    }

    /// Whether the scalar property `name` is selected.
    pub fn includes_scalar(&self, name: &str) -> bool {
        self.scalars.iter().any(|s| s.name == name)
    }

    /// The included association named `name`.
    pub fn association(&self, name: &str) -> Option<&ResolvedAssociation<'r>> {
        self.associations.iter().find(|a| a.descriptor.name == name)
    }

    /// Deepest association nesting below this node.
    pub fn depth(&self) -> usize {
        self.associations
            .iter()
            .map(|a| 1 + a.shape.depth())
            .max()
            .unwrap_or(0)
    }

    /// Number of association edges in the tree (one fetch query each).
    pub fn hop_count(&self) -> usize {
        self.associations
            .iter()
            .map(|a| 1 + a.shape.hop_count())
            .sum()
    }

    /// Columns to read for rows of this node: identifier, selected scalars
    /// and the local foreign keys its associations follow.
    pub fn columns(&self) -> Vec<&'static str> {
        let mut columns = vec![self.entity.id_column()];
        for scalar in &self.scalars {
            if !columns.contains(&scalar.column) {
                columns.push(scalar.column);
            }
        }
        for assoc in &self.associations {
            if let Some(column) = assoc.descriptor.local_column() {
                if !columns.contains(&column) {
                    columns.push(column);
                }
            }
        }
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlgraph_core::{LinkTable, SqlType};

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
                    .association(
                        AssociationDescriptor::many("authors", "Author")
                            .link_table(LinkTable::new("book_authors", "book_id", "author_id")),
                    ),
            )
            .register(
                EntityDescriptor::new("Author", "authors")
                    .scalar(ScalarProperty::new("name", SqlType::Text)),
            )
            .register(
                EntityDescriptor::new("Category", "categories")
                    .scalar(ScalarProperty::new("label", SqlType::Text))
                    .association(AssociationDescriptor::one("parent", "Category").local_fk("parent_id")),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_resolve_all_and_only() {
        let registry = registry();
        let resolved = Shape::of("Book").resolve(&registry, 8).unwrap();
        assert_eq!(resolved.scalars.len(), 2);
        assert!(resolved.associations.is_empty());

        let resolved = Shape::of("Book")
            .only(["id", "title", "title"])
            .resolve(&registry, 8)
            .unwrap();
        assert_eq!(resolved.scalars.len(), 1);
        assert!(resolved.includes_scalar("title"));
        assert!(!resolved.includes_scalar("year"));
    }

    #[test]
    fn test_resolve_nested_and_columns() {
        let registry = registry();
        let resolved = Shape::of("Book")
            .ids_only()
            .with("publisher", Shape::of("Publisher"))
            .with_ids("authors")
            .resolve(&registry, 8)
            .unwrap();
        assert_eq!(resolved.columns(), vec!["id", "publisher_id"]);
        assert_eq!(resolved.hop_count(), 2);
        assert_eq!(resolved.depth(), 1);
        let authors = resolved.association("authors").unwrap();
        assert!(authors.shape.scalars.is_empty());
        assert_eq!(authors.shape.entity.name, "Author");
    }

    #[test]
    fn test_unknown_scalar_and_association() {
        let registry = registry();
        match Shape::of("Book").only(["subtitle"]).resolve(&registry, 8) {
            Err(Error::UnknownProperty(e)) => {
                assert_eq!(e.property, "subtitle");
                assert_eq!(e.path.to_string(), "Book.subtitle");
            }
            other => panic!("expected unknown property, got {other:?}"),
        }
        match Shape::of("Book")
            .with("publisher", Shape::of("Publisher").include("owner"))
            .resolve(&registry, 8)
        {
            Err(Error::UnknownProperty(e)) => {
                assert_eq!(e.entity, "Publisher");
                assert_eq!(e.path.to_string(), "Book.publisher.owner");
            }
            other => panic!("expected unknown property, got {other:?}"),
        }
    }

    #[test]
    fn test_entity_mismatch() {
        let registry = registry();
        let err = Shape::of("Book")
            .with("publisher", Shape::of("Author"))
            .resolve(&registry, 8)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Shape(ShapeError {
                kind: ShapeErrorKind::EntityMismatch,
                ..
            })
        ));
    }

    #[test]
    fn test_recursive_expansion() {
        let registry = registry();
        let resolved = Shape::of("Category")
            .only(["label"])
            .recursive("parent", 3)
            .resolve(&registry, 8)
            .unwrap();
        assert_eq!(resolved.depth(), 3);
        let level1 = &resolved.associations[0].shape;
        assert!(level1.includes_scalar("label"));
        assert_eq!(level1.associations.len(), 1);
        let level3 = &level1.associations[0].shape.associations[0].shape;
        assert!(level3.associations.is_empty());

        let err = Shape::of("Book").recursive("publisher", 2).resolve(&registry, 8);
        assert!(matches!(
            err,
            Err(Error::Shape(ShapeError {
                kind: ShapeErrorKind::RecursiveTargetMismatch,
                ..
            }))
        ));
    }

    #[test]
    fn test_depth_guard() {
        let registry = registry();
        let err = Shape::of("Category")
            .recursive("parent", 10)
            .resolve(&registry, 4)
            .unwrap_err();
        match err {
            Error::Shape(e) => {
                assert_eq!(e.kind, ShapeErrorKind::DepthExceeded);
                assert_eq!(e.path.depth(), 5);
            }
            other => panic!("expected depth error, got {other:?}"),
        }
        assert!(Shape::of("Category").recursive("parent", 4).resolve(&registry, 4).is_ok());
    }

    #[test]
    fn test_repeated_with_replaces() {
        let shape = Shape::of("Book")
            .with_ids("authors")
            .include("authors")
            .recursive("ignored", 0);
        assert_eq!(shape.association_names().collect::<Vec<_>>(), vec!["authors"]);
        assert_eq!(shape.entity(), "Book");
    }
}
