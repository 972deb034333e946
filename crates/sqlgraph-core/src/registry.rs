//! The entity model registry.
//!
//! All entity descriptors are registered up front, validated as a whole, and
//! frozen into an immutable [`Registry`] shared by every save and fetch call.

use std::collections::{HashMap, HashSet};

use crate::entity::EntityDescriptor;
use crate::error::{Error, RegistryError, Result};
use crate::identifiers::is_valid_identifier;
use crate::relationship::{AssociationDescriptor, Cardinality, Ownership};

/// Collects entity descriptors before validation.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entities: Vec<EntityDescriptor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity descriptor.
    #[must_use]
    pub fn register(mut self, descriptor: EntityDescriptor) -> Self {
        self.entities.push(descriptor);
        self
    }

    /// Validate all descriptors and freeze the registry.
    pub fn build(self) -> Result<Registry> {
        let mut by_name = HashMap::with_capacity(self.entities.len());
        let mut order = Vec::with_capacity(self.entities.len());
        let mut tables = HashSet::new();

        for desc in &self.entities {
            if by_name.contains_key(desc.name) {
                return Err(registry_error(desc.name, "entity registered twice"));
            }
            if !tables.insert(desc.table) {
                return Err(registry_error(
                    desc.name,
                    format!("table '{}' is used by another entity", desc.table),
                ));
            }
            by_name.insert(desc.name, order.len());
            order.push(desc.name);
        }

        for desc in &self.entities {
            validate_entity(desc, &by_name, &self.entities)?;
        }

        tracing::debug!(entities = order.len(), "Entity registry built");

        Ok(Registry {
            entities: self.entities,
            by_name,
        })
    }
}

fn registry_error(entity: &str, message: impl Into<String>) -> Error {
    Error::Registry(RegistryError {
        entity: Some(entity.to_string()),
        message: message.into(),
    })
}

fn check_identifier(entity: &str, what: &str, name: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(registry_error(
            entity,
            format!("{what} '{name}' is not a valid SQL identifier"),
        ))
    }
}

fn validate_entity(
    desc: &EntityDescriptor,
    by_name: &HashMap<&'static str, usize>,
    all: &[EntityDescriptor],
) -> Result<()> {
    check_identifier(desc.name, "table", desc.table)?;
    check_identifier(desc.name, "column", desc.id.column)?;

    if desc.generates_ids() && !desc.id.sql_type.is_integer() {
        return Err(registry_error(
            desc.name,
            "generated identifiers require an integer id type",
        ));
    }

    let mut names = HashSet::new();
    let mut columns = HashSet::new();
    names.insert(desc.id.name);
    columns.insert(desc.id.column);

    for scalar in &desc.scalars {
        check_identifier(desc.name, "column", scalar.column)?;
        if !names.insert(scalar.name) {
            return Err(registry_error(
                desc.name,
                format!("property '{}' declared twice", scalar.name),
            ));
        }
        if !columns.insert(scalar.column) {
            return Err(registry_error(
                desc.name,
                format!("column '{}' mapped twice", scalar.column),
            ));
        }
    }

    for assoc in &desc.associations {
        if !names.insert(assoc.name) {
            return Err(registry_error(
                desc.name,
                format!("property '{}' declared twice", assoc.name),
            ));
        }
        validate_association(desc, assoc, by_name)?;
        if let Some(column) = assoc.local_column() {
            if !columns.insert(column) {
                return Err(registry_error(
                    desc.name,
                    format!("column '{column}' mapped twice"),
                ));
            }
        }
    }

    // Remote foreign keys other entities place on this table must not
    // collide with its own columns.
    for other in all {
        for assoc in &other.associations {
            if let (true, Some(column)) = (assoc.target == desc.name, assoc.remote_column()) {
                if desc.scalars.iter().any(|s| s.column == column) || desc.id.column == column {
                    return Err(registry_error(
                        other.name,
                        format!(
                            "remote foreign key '{column}' of '{}' collides with a column of {}",
                            assoc.name, desc.name
                        ),
                    ));
                }
            }
        }
    }

    for key in &desc.unique_keys {
        if key.is_empty() {
            return Err(registry_error(desc.name, "empty unique key"));
        }
        for property in key {
            if desc.scalar_property(property).is_none() {
                return Err(registry_error(
                    desc.name,
                    format!("unique key references undeclared scalar '{property}'"),
                ));
            }
        }
    }

    Ok(())
}

fn validate_association(
    desc: &EntityDescriptor,
    assoc: &AssociationDescriptor,
    by_name: &HashMap<&'static str, usize>,
) -> Result<()> {
    if !by_name.contains_key(assoc.target) {
        return Err(registry_error(
            desc.name,
            format!(
                "association '{}' targets unregistered entity '{}'",
                assoc.name, assoc.target
            ),
        ));
    }
    match (&assoc.ownership, assoc.cardinality) {
        (Ownership::Local { column }, Cardinality::One) if column.is_empty() => {
            return Err(registry_error(
                desc.name,
                format!("association '{}' declares no foreign key column", assoc.name),
            ));
        }
        (Ownership::Local { .. }, Cardinality::Many) => {
            return Err(registry_error(
                desc.name,
                format!(
                    "to-many association '{}' needs a remote foreign key or link table",
                    assoc.name
                ),
            ));
        }
        (Ownership::LinkTable(link), _) => {
            check_identifier(desc.name, "table", link.table)?;
            if link.local_column == link.remote_column {
                return Err(registry_error(
                    desc.name,
                    format!("link table '{}' uses one column for both sides", link.table),
                ));
            }
        }
        _ => {}
    }
    for column in assoc.ownership.columns() {
        check_identifier(desc.name, "column", column)?;
    }
    Ok(())
}

/// Immutable set of validated entity descriptors.
#[derive(Debug)]
pub struct Registry {
    entities: Vec<EntityDescriptor>,
    by_name: HashMap<&'static str, usize>,
}

impl Registry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Look up an entity type, failing for unregistered names.
    pub fn describe(&self, entity: &str) -> Result<&EntityDescriptor> {
        self.get(entity).ok_or_else(|| {
            Error::Registry(RegistryError {
                entity: Some(entity.to_string()),
                message: "entity type is not registered".to_string(),
            })
        })
    }

    /// Look up an entity type.
    pub fn get(&self, entity: &str) -> Option<&EntityDescriptor> {
        self.by_name.get(entity).map(|&i| &self.entities[i])
    }

    /// All descriptors in registration order.
    pub fn entities(&self) -> &[EntityDescriptor] {
        &self.entities
    }

    /// Remote foreign keys stored on `entity`'s table, as
    /// `(declaring entity, association)` pairs.
    pub fn inbound_foreign_keys(
        &self,
        entity: &str,
    ) -> Vec<(&EntityDescriptor, &AssociationDescriptor)> {
        self.entities
            .iter()
            .flat_map(|owner| {
                owner
                    .associations
                    .iter()
                    .filter(move |a| a.target == entity && a.remote_column().is_some())
                    .map(move |a| (owner, a))
            })
            .collect()
    }

    /// Every column stored on `entity`'s table: id, scalars, local and
    /// inbound remote foreign keys. Duplicated inbound columns appear once.
    pub fn table_columns(&self, entity: &str) -> Result<Vec<&'static str>> {
        let desc = self.describe(entity)?;
        let mut columns = vec![desc.id.column];
        columns.extend(desc.scalars.iter().map(|s| s.column));
        columns.extend(desc.local_associations().filter_map(|a| a.local_column()));
        for (_, assoc) in self.inbound_foreign_keys(entity) {
            if let Some(column) = assoc.remote_column() {
                if !columns.contains(&column) {
                    columns.push(column);
                }
            }
        }
        Ok(columns)
    }
}
