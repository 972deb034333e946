//! Entity instances: the unit of data exchanged with save and fetch.
//!
//! An instance carries only the properties that are *populated*. A property
//! absent from [`Instance::fields`] is untouched by saves and was not
//! requested by a fetch; a property present with [`Value::Null`] is null.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use crate::value::Value;

/// The populated value of an association property.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    /// To-one association; `None` means "no target".
    One(Option<Box<Instance>>),
    /// To-many association; an empty vec means "no targets".
    Many(Vec<Instance>),
}

impl Related {
    /// Iterate over the contained instances.
    pub fn instances(&self) -> Box<dyn Iterator<Item = &Instance> + '_> {
        match self {
            Related::One(one) => Box::new(one.iter().map(|b| &**b)),
            Related::Many(many) => Box::new(many.iter()),
        }
    }

    /// Mutable iteration over the contained instances.
    pub fn instances_mut(&mut self) -> Box<dyn Iterator<Item = &mut Instance> + '_> {
        match self {
            Related::One(one) => Box::new(one.iter_mut().map(|b| &mut **b)),
            Related::Many(many) => Box::new(many.iter_mut()),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Related::One(None) => serde_json::Value::Null,
            Related::One(Some(inst)) => inst.to_json(),
            Related::Many(many) => serde_json::Value::Array(many.iter().map(Instance::to_json).collect()),
        }
    }

    fn same_as(&self, other: &Related) -> bool {
        match (self, other) {
            (Related::One(None), Related::One(None)) => true,
            (Related::One(Some(a)), Related::One(Some(b))) => a.same_as(b),
            (Related::Many(a), Related::Many(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_as(y))
            }
            _ => false,
        }
    }
}

/// A populated subset of one entity's properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    /// Entity type name.
    pub entity: String,
    /// Identifier, when known.
    pub id: Option<Value>,
    /// Populated scalar properties.
    pub fields: BTreeMap<String, Value>,
    /// Populated association properties.
    pub associations: BTreeMap<String, Related>,
}

impl Instance {
    /// An instance with nothing populated.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            id: None,
            fields: BTreeMap::new(),
            associations: BTreeMap::new(),
        }
    }

    /// An identifier-only reference to an existing row.
    pub fn reference(entity: impl Into<String>, id: impl Into<Value>) -> Self {
        Self::new(entity).with_id(id)
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Populate a scalar property.
    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Populate a to-one association with a target.
    #[must_use]
    pub fn one(mut self, name: impl Into<String>, target: Instance) -> Self {
        self.associations
            .insert(name.into(), Related::One(Some(Box::new(target))));
        self
    }

    /// Populate a to-one association as explicitly empty.
    #[must_use]
    pub fn none(mut self, name: impl Into<String>) -> Self {
        self.associations.insert(name.into(), Related::One(None));
        self
    }

    /// Populate a to-many association.
    #[must_use]
    pub fn many(mut self, name: impl Into<String>, targets: Vec<Instance>) -> Self {
        self.associations.insert(name.into(), Related::Many(targets));
        self
    }

    /// A populated scalar value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// A populated association.
    pub fn related(&self, name: &str) -> Option<&Related> {
        self.associations.get(name)
    }

    /// The single target of a populated to-one association.
    pub fn related_one(&self, name: &str) -> Option<&Instance> {
        match self.associations.get(name) {
            Some(Related::One(Some(inst))) => Some(inst),
            _ => None,
        }
    }

    /// The targets of a populated to-many association (empty when unpopulated).
    pub fn related_many(&self, name: &str) -> &[Instance] {
        match self.associations.get(name) {
            Some(Related::Many(many)) => many,
            _ => &[],
        }
    }

    /// Whether a scalar or association named `name` is populated.
    pub fn is_populated(&self, name: &str) -> bool {
        self.fields.contains_key(name) || self.associations.contains_key(name)
    }

    /// Only the identifier is populated.
    pub fn is_reference(&self) -> bool {
        self.id.is_some() && self.fields.is_empty() && self.associations.is_empty()
    }

    /// Equality that compares values by storage semantics
    /// (integer widths are ignored, see [`Value::same_as`]).
    pub fn same_as(&self, other: &Instance) -> bool {
        let ids_match = match (&self.id, &other.id) {
            (Some(a), Some(b)) => a.same_as(b),
            (None, None) => true,
            _ => false,
        };
        ids_match
            && self.entity == other.entity
            && self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .all(|(k, v)| other.fields.get(k).is_some_and(|o| v.same_as(o)))
            && self.associations.len() == other.associations.len()
            && self
                .associations
                .iter()
                .all(|(k, r)| other.associations.get(k).is_some_and(|o| r.same_as(o)))
    }

    /// Render as JSON: `id` first when known, unpopulated properties absent.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        if let Some(id) = &self.id {
            map.insert("id".to_string(), id.to_json());
        }
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_json());
        }
        for (name, related) in &self.associations {
            map.insert(name.clone(), related.to_json());
        }
        serde_json::Value::Object(map)
    }
}

impl Serialize for Instance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}
