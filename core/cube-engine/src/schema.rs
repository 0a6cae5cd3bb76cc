//! FILENAME: core/cube-engine/src/schema.rs
//! Schema - Field name to typed column mapping for a backing dataset.
//!
//! Field names are resolved against the schema once per spec or query, so the
//! per-row work is plain index access.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use cube_core::Value;

use crate::error::{CubeError, Result};

/// Storage type of a dataset column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Integer,
    Number,
    Text,
    Boolean,
    Date,
    Timestamp,
    Duration,
    Bytes,
}

impl FieldKind {
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldKind::Integer | FieldKind::Number)
    }

    /// Whether `value` may be stored in a column of this kind. Null always fits.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (FieldKind::Integer, Value::Integer(_))
                | (FieldKind::Number, Value::Number(_))
                | (FieldKind::Number, Value::Integer(_))
                | (FieldKind::Text, Value::Text(_))
                | (FieldKind::Boolean, Value::Boolean(_))
                | (FieldKind::Date, Value::Date(_))
                | (FieldKind::Timestamp, Value::Timestamp(_))
                | (FieldKind::Duration, Value::Duration(_))
                | (FieldKind::Bytes, Value::Bytes(_))
        )
    }
}

/// A named column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

/// A resolved field: its column position and type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRef {
    pub index: usize,
    pub kind: FieldKind,
}

/// Ordered column definitions with a name index.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<FieldDef>,
    by_name: FxHashMap<String, usize>,
}

impl Schema {
    pub fn new<I, S>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, FieldKind)>,
        S: Into<String>,
    {
        let mut schema = Schema::default();
        for (name, kind) in fields {
            schema.push(FieldDef {
                name: name.into(),
                kind,
            })?;
        }
        Ok(schema)
    }

    /// Appends a column definition.
    pub fn push(&mut self, field: FieldDef) -> Result<()> {
        if self.by_name.contains_key(&field.name) {
            return Err(CubeError::DuplicateField {
                field: field.name,
                area: "schema",
            });
        }
        self.by_name.insert(field.name.clone(), self.fields.len());
        self.fields.push(field);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<FieldRef> {
        self.by_name.get(name).map(|&index| FieldRef {
            index,
            kind: self.fields[index].kind,
        })
    }

    pub fn resolve(&self, name: &str) -> Result<FieldRef> {
        self.field(name)
            .ok_or_else(|| CubeError::UnknownField(name.to_string()))
    }
}
