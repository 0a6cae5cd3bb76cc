//! FILENAME: core/cube-core/src/cell.rs
//! PURPOSE: The cell emitted into a cube grid.
//! CONTEXT: A cell is a value plus its role (data value, row header, column
//! header). Header cells may carry the expansion prefix that toggling them
//! would expand or collapse, and leaf row headers carry the row's properties.
//! Equality and hashing only look at (value, kind) so header rows can be
//! de-duplicated without regard to that metadata.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::number_format::{format_value, FormatOptions, Locale};
use crate::value::Value;

/// The role of a cell in the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellKind {
    Value,
    RowHeader,
    ColumnHeader,
}

/// The atomic unit of a cube grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub value: Value,
    pub kind: CellKind,
    /// Prefix to expand/collapse when this header is clicked.
    #[serde(default)]
    pub expansion: Option<Vec<Value>>,
    /// Property values of a fully drilled row, on its row header only.
    #[serde(default)]
    pub properties: Option<Vec<Value>>,
}

/// Field replacements for [`Cell::copy`]. `None` keeps the original field.
#[derive(Debug, Clone, Default)]
pub struct CellOverrides {
    pub value: Option<Value>,
    pub kind: Option<CellKind>,
    pub expansion: Option<Option<Vec<Value>>>,
    pub properties: Option<Option<Vec<Value>>>,
}

impl Cell {
    pub fn new(value: Value, kind: CellKind) -> Self {
        Cell {
            value,
            kind,
            expansion: None,
            properties: None,
        }
    }

    /// Creates a data cell.
    pub fn value(value: impl Into<Value>) -> Self {
        Cell::new(value.into(), CellKind::Value)
    }

    /// Creates a row header cell.
    pub fn row_header(value: impl Into<Value>) -> Self {
        Cell::new(value.into(), CellKind::RowHeader)
    }

    /// Creates a column header cell.
    pub fn column_header(value: impl Into<Value>) -> Self {
        Cell::new(value.into(), CellKind::ColumnHeader)
    }

    /// A `Null` cell of the given kind.
    pub fn blank(kind: CellKind) -> Self {
        Cell::new(Value::Null, kind)
    }

    pub fn with_expansion(mut self, prefix: Vec<Value>) -> Self {
        self.expansion = Some(prefix);
        self
    }

    pub fn with_properties(mut self, properties: Vec<Value>) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn is_blank(&self) -> bool {
        self.value.is_null()
    }

    /// Returns a shallow variant of this cell with the overridden fields replaced.
    pub fn copy(&self, overrides: CellOverrides) -> Cell {
        Cell {
            value: overrides.value.unwrap_or_else(|| self.value.clone()),
            kind: overrides.kind.unwrap_or(self.kind),
            expansion: overrides.expansion.unwrap_or_else(|| self.expansion.clone()),
            properties: overrides.properties.unwrap_or_else(|| self.properties.clone()),
        }
    }

    /// Display string for `locale`, HTML line breaks and the default bytes MIME type.
    pub fn formatted(&self, locale: &Locale) -> String {
        format_value(&self.value, &FormatOptions::new(locale))
    }

    pub fn formatted_with(&self, options: &FormatOptions<'_>) -> String {
        format_value(&self.value, options)
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.kind == other.kind
    }
}

impl Eq for Cell {}

impl Hash for Cell {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
        self.kind.hash(state);
    }
}
