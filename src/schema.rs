//! Relation schema: field list and key designation.
//!
//! The engine is schema-driven but schema-light: all it asks of a
//! relation is the ordered field list, each field's type and declared
//! width, and which field is the primary key. Validation happens once at
//! table create/open; afterwards the tree trusts the schema.
//!
//! Internal index pages always hold `(key, u32 child_id)` tuples with a
//! fixed-width key, so a variable-width key field is rejected up front —
//! otherwise separator replacement during rebalancing could change
//! record sizes mid-repair.

use crate::error::{Result, RowanError};
use crate::types::DataType;

/// One field of a relation.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub ty: DataType,
    /// Declared width in bytes; 0 for variable-width fields.
    pub size: usize,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, ty: DataType, size: usize) -> Self {
        Self {
            name: name.into(),
            ty,
            size,
        }
    }

    /// Wire width of this field, if fixed.
    pub fn wire_size(&self) -> Option<usize> {
        self.ty.wire_size(self.size)
    }
}

/// Schema of one relation: fields plus the key field index.
#[derive(Debug, Clone)]
pub struct RelationInfo {
    pub fields: Vec<FieldInfo>,
    /// Index of the primary-key field within `fields`.
    pub key: usize,
}

impl RelationInfo {
    pub fn new(fields: Vec<FieldInfo>, key: usize) -> Self {
        Self { fields, key }
    }

    pub fn key_field(&self) -> &FieldInfo {
        &self.fields[self.key]
    }

    pub fn key_type(&self) -> DataType {
        self.key_field().ty
    }

    /// Fixed wire width of the key field.
    ///
    /// Only meaningful after [`validate`](Self::validate) has accepted
    /// the schema.
    pub fn key_size(&self) -> usize {
        self.key_field().wire_size().unwrap_or(0)
    }

    /// Checks the schema at table create/open.
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(RowanError::Schema("relation has no fields".into()));
        }
        if self.key >= self.fields.len() {
            return Err(RowanError::Schema(format!(
                "key index {} out of range ({} fields)",
                self.key,
                self.fields.len()
            )));
        }
        let key = self.key_field();
        match key.wire_size() {
            Some(n) if n > 0 => Ok(()),
            _ => Err(RowanError::Schema(format!(
                "key field '{}' must be fixed-width",
                key.name
            ))),
        }
    }
}
