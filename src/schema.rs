//! Declared schema types: stores, primary keys, and index definitions.
//!
//! Schemas are supplied by the caller at open time and are immutable for the
//! session. Index definitions are value objects compared structurally — the
//! migration engine relies on `PartialEq` to detect index changes between
//! the declared schema and the persisted metadata snapshot.

use serde::{Deserialize, Serialize};

// ============================================================================
// KeyPath
// ============================================================================

/// A field name (optionally dotted, `"user.id"`) or an ordered sequence of
/// field names for compound keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    Single(String),
    Compound(Vec<String>),
}

impl KeyPath {
    /// A key path is compound only when it names more than one field.
    pub fn is_compound(&self) -> bool {
        matches!(self, KeyPath::Compound(paths) if paths.len() > 1)
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        KeyPath::Single(path.to_string())
    }
}

impl From<&[&str]> for KeyPath {
    fn from(paths: &[&str]) -> Self {
        KeyPath::Compound(paths.iter().map(|p| p.to_string()).collect())
    }
}

// ============================================================================
// IndexSchema
// ============================================================================

/// A secondary, possibly-compound, possibly-multi-valued lookup path into
/// a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    pub key_path: KeyPath,
    #[serde(default)]
    pub unique: bool,
    /// The key path value is an array; one index row per element.
    #[serde(default)]
    pub multi_entry: bool,
    #[serde(default)]
    pub full_text: bool,
    /// Denormalize the record's data into the index's side table to avoid
    /// a join on reads.
    #[serde(default)]
    pub include_data_in_index: bool,
    /// The index may be added without migrating existing rows; reads against
    /// it are undefined until a later write populates it.
    #[serde(default)]
    pub do_not_backfill: bool,
}

impl IndexSchema {
    pub fn new(name: &str, key_path: impl Into<KeyPath>) -> Self {
        Self {
            name: name.to_string(),
            key_path: key_path.into(),
            unique: false,
            multi_entry: false,
            full_text: false,
            include_data_in_index: false,
            do_not_backfill: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn multi_entry(mut self) -> Self {
        self.multi_entry = true;
        self
    }

    pub fn full_text(mut self) -> Self {
        self.full_text = true;
        self
    }

    pub fn include_data(mut self) -> Self {
        self.include_data_in_index = true;
        self
    }

    pub fn no_backfill(mut self) -> Self {
        self.do_not_backfill = true;
        self
    }

    /// Whether this index's entries live in a separate side table rather
    /// than as an extra column on the main table. True for multi-entry
    /// indexes, and for full-text indexes when the engine has a native
    /// text-search module. Re-derived from the current engine capability,
    /// never cached.
    pub fn uses_side_table(&self, supports_full_text: bool) -> bool {
        self.multi_entry || (self.full_text && supports_full_text)
    }
}

// ============================================================================
// StoreSchema
// ============================================================================

/// A named collection of records, each addressed by a primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSchema {
    pub name: String,
    pub primary_key_path: KeyPath,
    #[serde(default)]
    pub indexes: Vec<IndexSchema>,
    /// Used to size migration batches during a full data migration.
    #[serde(default)]
    pub estimated_obj_bytes: Option<usize>,
}

impl StoreSchema {
    pub fn new(name: &str, primary_key_path: impl Into<KeyPath>) -> Self {
        Self {
            name: name.to_string(),
            primary_key_path: primary_key_path.into(),
            indexes: Vec::new(),
            estimated_obj_bytes: None,
        }
    }

    pub fn with_index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn estimated_obj_bytes(mut self, bytes: usize) -> Self {
        self.estimated_obj_bytes = Some(bytes);
        self
    }

    pub fn find_index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

// ============================================================================
// Schema
// ============================================================================

/// The versioned schema declared by the caller at open time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub version: u32,
    /// Below this stored version, wipe rather than migrate.
    #[serde(default)]
    pub last_usable_version: Option<u32>,
    pub stores: Vec<StoreSchema>,
}

impl Schema {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            last_usable_version: None,
            stores: Vec::new(),
        }
    }

    pub fn last_usable_version(mut self, version: u32) -> Self {
        self.last_usable_version = Some(version);
        self
    }

    pub fn with_store(mut self, store: StoreSchema) -> Self {
        self.stores.push(store);
        self
    }

    pub fn find_store(&self, name: &str) -> Option<&StoreSchema> {
        self.stores.iter().find(|s| s.name == name)
    }
}

// ============================================================================
// IndexMetadata
// ============================================================================

/// Persisted snapshot of an index as it was actually materialized, stored
/// as a serialized row in the reserved metadata table.
///
/// Invariant: metadata reflects the materialized index structure, not merely
/// the last-declared schema — the migration engine treats a mismatch between
/// metadata and the declared schema as requiring re-migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// `<storeName>_<indexName>`, also the metadata row's primary key.
    pub key: String,
    pub store_name: String,
    pub index: IndexSchema,
}

/// `<storeName>_<indexName>` — names both the metadata row and, for
/// side-table-backed indexes, the side table itself.
pub fn index_identifier(store: &StoreSchema, index: &IndexSchema) -> String {
    format!("{}_{}", store.name, index.name)
}

// ============================================================================
// Tests
// ============================================================================
