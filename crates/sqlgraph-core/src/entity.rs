//! Entity type descriptors.
//!
//! An [`EntityDescriptor`] is the static metadata of one entity type: its
//! table, identifier property, scalar properties, association properties and
//! alternate unique keys. Descriptors are registered once in a
//! [`Registry`](crate::registry::Registry) and never mutated afterwards.

use crate::relationship::AssociationDescriptor;
use crate::types::SqlType;

/// How identifiers of new rows are obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdGeneration {
    /// Storage generates the id on insert; it is read back and back-filled.
    #[default]
    Identity,
    /// The caller supplies the id.
    Assigned,
}

/// Metadata about one scalar property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarProperty {
    /// Property name
    pub name: &'static str,
    /// Database column name (may differ from property name)
    pub column: &'static str,
    /// SQL type for this property
    pub sql_type: SqlType,
    /// Whether NULL may be stored
    pub nullable: bool,
}

impl ScalarProperty {
    /// A non-nullable property stored in a column of the same name.
    #[must_use]
    pub fn new(name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            column: name,
            sql_type,
            nullable: false,
        }
    }

    /// Override the column name.
    #[must_use]
    pub fn column(mut self, column: &'static str) -> Self {
        self.column = column;
        self
    }

    /// Set nullability.
    #[must_use]
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

/// Static description of an entity type.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub name: &'static str,
    pub table: &'static str,
    pub id: ScalarProperty,
    pub id_generation: IdGeneration,
    pub scalars: Vec<ScalarProperty>,
    pub associations: Vec<AssociationDescriptor>,
    pub unique_keys: Vec<Vec<&'static str>>,
}

impl EntityDescriptor {
    /// Start describing an entity stored in `table`.
    ///
    /// The identifier defaults to a generated `BIGINT` property named `id`.
    #[must_use]
    pub fn new(name: &'static str, table: &'static str) -> Self {
        Self {
            name,
            table,
            id: ScalarProperty::new("id", SqlType::BigInt),
            id_generation: IdGeneration::Identity,
            scalars: Vec::new(),
            associations: Vec::new(),
            unique_keys: Vec::new(),
        }
    }

    /// Declare the identifier property.
    #[must_use]
    pub fn id(mut self, name: &'static str, sql_type: SqlType, generation: IdGeneration) -> Self {
        self.id = ScalarProperty::new(name, sql_type);
        self.id_generation = generation;
        self
    }

    /// Declare a scalar property.
    #[must_use]
    pub fn scalar(mut self, property: ScalarProperty) -> Self {
        self.scalars.push(property);
        self
    }

    /// Declare an association property.
    #[must_use]
    pub fn association(mut self, association: AssociationDescriptor) -> Self {
        self.associations.push(association);
        self
    }

    /// Declare an alternate unique key over one or more scalar properties.
    #[must_use]
    pub fn unique_key(mut self, properties: &[&'static str]) -> Self {
        self.unique_keys.push(properties.to_vec());
        self
    }

    /// Look up a scalar property by name (the identifier is not a scalar).
    pub fn scalar_property(&self, name: &str) -> Option<&ScalarProperty> {
        self.scalars.iter().find(|s| s.name == name)
    }

    /// Look up an association by name.
    pub fn association_named(&self, name: &str) -> Option<&AssociationDescriptor> {
        self.associations.iter().find(|a| a.name == name)
    }

    /// Whether `name` is the identifier, a scalar or an association.
    pub fn declares(&self, name: &str) -> bool {
        self.id.name == name
            || self.scalar_property(name).is_some()
            || self.association_named(name).is_some()
    }

    /// Column storing the identifier.
    pub fn id_column(&self) -> &'static str {
        self.id.column
    }

    /// Whether new rows obtain their id from storage.
    pub fn generates_ids(&self) -> bool {
        matches!(self.id_generation, IdGeneration::Identity)
    }

    /// Scalar property names in declaration order.
    pub fn scalar_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.scalars.iter().map(|s| s.name)
    }

    /// Associations whose foreign key column lives on this entity's table.
    pub fn local_associations(&self) -> impl Iterator<Item = &AssociationDescriptor> {
        self.associations
            .iter()
            .filter(|a| a.local_column().is_some())
    }
}
