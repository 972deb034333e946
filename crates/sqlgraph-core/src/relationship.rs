//! Association metadata.
//!
//! Associations are declared once per entity type and describe how two
//! entity tables are connected: which side holds the foreign key (or which
//! link table mediates the connection), the cardinality seen from the
//! declaring side, and how stored links missing from a saved graph are
//! reconciled.

/// How many targets an association holds, seen from the declaring entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// At most one target (`Book.publisher`).
    One,
    /// Any number of targets (`Book.chapters`).
    Many,
}

/// Information about a link/join table for many-to-many associations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTable {
    /// The link table name (e.g., `"book_authors"`).
    pub table: &'static str,

    /// Column in the link table pointing to the declaring entity (e.g., `"book_id"`).
    pub local_column: &'static str,

    /// Column in the link table pointing to the target entity (e.g., `"author_id"`).
    pub remote_column: &'static str,
}

impl LinkTable {
    /// Create a new link-table definition.
    #[must_use]
    pub const fn new(
        table: &'static str,
        local_column: &'static str,
        remote_column: &'static str,
    ) -> Self {
        Self {
            table,
            local_column,
            remote_column,
        }
    }
}

/// Which side of an association stores the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The declaring entity's table has a foreign key column to the target.
    Local { column: &'static str },
    /// The target entity's table has a foreign key column back to the declaring entity.
    Remote { column: &'static str },
    /// A link table holds (declaring id, target id) pairs.
    LinkTable(LinkTable),
}

impl Ownership {
    /// The foreign key / link column names this ownership relies on.
    pub fn columns(&self) -> Vec<&'static str> {
        match self {
            Ownership::Local { column } | Ownership::Remote { column } => vec![column],
            Ownership::LinkTable(link) => vec![link.local_column, link.remote_column],
        }
    }
}

/// What a save does with stored links that are absent from the input graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DissociationPolicy {
    /// Reconcile storage to exactly the input set, removing missing links.
    ReplaceAll,
    /// Only add links; never remove.
    AppendOnly,
    /// Fail the save if any stored link would have to be removed.
    Disallow,
}

/// Metadata about one association property of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationDescriptor {
    /// Property name on the declaring entity.
    pub name: &'static str,

    /// Target entity type name.
    pub target: &'static str,

    /// One or many targets.
    pub cardinality: Cardinality,

    /// Where the connection is stored.
    pub ownership: Ownership,

    /// Whether the association may be empty / the foreign key NULL.
    pub nullable: bool,

    /// Declared dissociation policy; falls back to session defaults when unset.
    pub dissociation: Option<DissociationPolicy>,
}

impl AssociationDescriptor {
    /// A to-one association. Ownership defaults to a local foreign key
    /// that must be named with [`local_fk`](Self::local_fk).
    #[must_use]
    pub const fn one(name: &'static str, target: &'static str) -> Self {
        Self::new(name, target, Cardinality::One)
    }

    /// A to-many association. Ownership must be set with
    /// [`remote_fk`](Self::remote_fk) or [`link_table`](Self::link_table).
    #[must_use]
    pub const fn many(name: &'static str, target: &'static str) -> Self {
        Self::new(name, target, Cardinality::Many)
    }

    const fn new(name: &'static str, target: &'static str, cardinality: Cardinality) -> Self {
        Self {
            name,
            target,
            cardinality,
            ownership: Ownership::Local { column: "" },
            nullable: true,
            dissociation: None,
        }
    }

    /// The declaring table holds `column`, referencing the target's id.
    #[must_use]
    pub const fn local_fk(mut self, column: &'static str) -> Self {
        self.ownership = Ownership::Local { column };
        self
    }

    /// The target table holds `column`, referencing the declaring entity's id.
    #[must_use]
    pub const fn remote_fk(mut self, column: &'static str) -> Self {
        self.ownership = Ownership::Remote { column };
        self
    }

    /// Connection stored in a link table.
    #[must_use]
    pub const fn link_table(mut self, link: LinkTable) -> Self {
        self.ownership = Ownership::LinkTable(link);
        self
    }

    /// Set nullability of the association / foreign key column.
    #[must_use]
    pub const fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Declare the dissociation policy for this association.
    #[must_use]
    pub const fn dissociation(mut self, policy: DissociationPolicy) -> Self {
        self.dissociation = Some(policy);
        self
    }

    /// Whether this association holds at most one target.
    #[must_use]
    pub const fn is_one(&self) -> bool {
        matches!(self.cardinality, Cardinality::One)
    }

    /// Owned collections: the target rows carry the foreign key to us.
    #[must_use]
    pub const fn is_owned(&self) -> bool {
        matches!(self.ownership, Ownership::Remote { .. })
    }

    /// Shared associations: mediated by a link table.
    #[must_use]
    pub const fn is_shared(&self) -> bool {
        matches!(self.ownership, Ownership::LinkTable(_))
    }

    /// The local foreign key column, if the declaring table holds it.
    #[must_use]
    pub const fn local_column(&self) -> Option<&'static str> {
        match self.ownership {
            Ownership::Local { column } => Some(column),
            _ => None,
        }
    }

    /// The remote foreign key column, if the target table holds it.
    #[must_use]
    pub const fn remote_column(&self) -> Option<&'static str> {
        match self.ownership {
            Ownership::Remote { column } => Some(column),
            _ => None,
        }
    }

    /// The link table, if one mediates this association.
    #[must_use]
    pub const fn link(&self) -> Option<&LinkTable> {
        match &self.ownership {
            Ownership::LinkTable(link) => Some(link),
            _ => None,
        }
    }
}
