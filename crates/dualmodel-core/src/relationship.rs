//! Relationship declarations and resolved relationship metadata.
//!
//! A [`RelationshipDecl`] is what the model author writes. Once mappings are
//! configured the builder turns it into a [`RelationshipInfo`] stored on the
//! field descriptor: target model and table, cardinality, collection shape,
//! and the foreign key columns that link the two tables.

use std::collections::BTreeMap;

/// The cardinality of a relationship, seen from the declaring model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelationshipKind {
    /// One-to-one, parent side: `User` has one `Profile` that points back at it.
    OneToOne,
    /// Many-to-one: many `Hero`s belong to one `Team`.
    #[default]
    ManyToOne,
    /// One-to-many: one `Team` has many `Hero`s.
    OneToMany,
    /// Many-to-many: `Hero`s have many `Power`s via a link table.
    ManyToMany,
}

impl RelationshipKind {
    /// True when the field holds a collection of related instances.
    pub const fn is_collection(&self) -> bool {
        matches!(self, RelationshipKind::OneToMany | RelationshipKind::ManyToMany)
    }
}

/// How a collection-valued relationship is exposed on the instance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CollectionKind {
    /// A single related instance (or none).
    #[default]
    Scalar,
    /// Ordered list.
    List,
    /// De-duplicated by object identity, insertion ordered.
    Set,
    /// Keyed by an attribute of the related instance.
    Mapping { key: String },
}

/// Whether deleting a parent leaves child rows to the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PassiveDeletes {
    /// The session loads and updates children itself.
    #[default]
    False,
    /// Children already loaded are handled; unloaded ones are left to the database.
    True,
    /// Children are never touched; the database's ON DELETE does all the work.
    All,
}

/// Information about a link table for many-to-many relationships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTableInfo {
    /// The link table name (e.g., `"heropowerlink"`).
    pub table_name: String,
    /// The link model name.
    pub model: String,
    /// Column in the link table pointing to the local model.
    pub local_column: String,
    /// Column in the link table pointing to the remote model.
    pub remote_column: String,
}

/// Declaration of a relationship-backed attribute.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationshipDecl {
    /// Attribute on the related model that points back here.
    pub back_populates: Option<String>,
    /// Delete child rows when the parent is deleted.
    pub cascade_delete: bool,
    pub passive_deletes: PassiveDeletes,
    /// Link model for many-to-many relationships.
    pub link_model: Option<String>,
    /// Attribute of the related model used as key for mapping collections.
    pub mapping_key: Option<String>,
    /// Passthrough options for the relationship machinery (recorded, not interpreted).
    pub sa_relationship_kwargs: BTreeMap<String, serde_json::Value>,
}

impl RelationshipDecl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn back_populates(mut self, field: impl Into<String>) -> Self {
        self.back_populates = Some(field.into());
        self
    }

    pub fn cascade_delete(mut self, value: bool) -> Self {
        self.cascade_delete = value;
        self
    }

    pub fn passive_deletes(mut self, value: PassiveDeletes) -> Self {
        self.passive_deletes = value;
        self
    }

    pub fn link_model(mut self, model: impl Into<String>) -> Self {
        self.link_model = Some(model.into());
        self
    }

    pub fn mapping_key(mut self, attribute: impl Into<String>) -> Self {
        self.mapping_key = Some(attribute.into());
        self
    }

    pub fn sa_relationship_kwarg(
        mut self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        self.sa_relationship_kwargs.insert(key.into(), value);
        self
    }
}

/// Resolved metadata about a relationship between two table models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipInfo {
    /// Name of the target model.
    pub target: String,
    /// Table of the target model.
    pub target_table: String,
    pub kind: RelationshipKind,
    pub collection: CollectionKind,
    /// Foreign key column on the declaring table (many-to-one).
    pub local_key: Option<String>,
    /// Foreign key column on the target table (one-to-many, one-to-one).
    pub remote_key: Option<String>,
    pub link_table: Option<LinkTableInfo>,
    pub back_populates: Option<String>,
    pub cascade_delete: bool,
    pub passive_deletes: PassiveDeletes,
}
