//! FILENAME: core/cube-engine/src/definition.rs
//! Cube Definition - The complete, user-visible state of one pivot view.
//!
//! This module contains all the types needed to DESCRIBE a cube view.
//! These structures are designed to be:
//! - Rebuilt per request from the spec codec (never persisted by the engine)
//! - Mutated by user interaction (expand/collapse, add field, reorder)
//! - Validated once before any query is planned

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use cube_core::{Coordinate, Value};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{CubeError, Result};
use crate::schema::Schema;

// ============================================================================
// AGGREGATION
// ============================================================================

/// Supported aggregation functions for measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl Default for Aggregate {
    fn default() -> Self {
        Aggregate::Sum
    }
}

impl Aggregate {
    pub const ALL: [Aggregate; 5] = [
        Aggregate::Sum,
        Aggregate::Avg,
        Aggregate::Count,
        Aggregate::Min,
        Aggregate::Max,
    ];

    /// Wire and SQL-alias spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregate::Sum => "sum",
            Aggregate::Avg => "avg",
            Aggregate::Count => "count",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
        }
    }

    /// Human label used in measure headers ("Sum of amount").
    pub fn label(&self) -> &'static str {
        match self {
            Aggregate::Sum => "Sum",
            Aggregate::Avg => "Average",
            Aggregate::Count => "Count",
            Aggregate::Min => "Min",
            Aggregate::Max => "Max",
        }
    }

    /// Sum and average only make sense over numbers.
    pub fn requires_numeric(&self) -> bool {
        matches!(self, Aggregate::Sum | Aggregate::Avg)
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregate {
    type Err = CubeError;

    fn from_str(s: &str) -> Result<Self> {
        Aggregate::ALL
            .iter()
            .copied()
            .find(|agg| agg.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CubeError::Specification(format!("unknown aggregate '{}'", s)))
    }
}

// ============================================================================
// MEASURES AND ORDERING
// ============================================================================

/// A (field, aggregate) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Measure {
    pub field: String,
    pub aggregate: Aggregate,
}

impl Measure {
    pub fn new(field: impl Into<String>, aggregate: Aggregate) -> Self {
        Measure {
            field: field.into(),
            aggregate,
        }
    }

    /// Display name (e.g., "Sum of amount").
    pub fn label(&self) -> String {
        format!("{} of {}", self.aggregate.label(), self.field)
    }

    /// Column alias in rendered queries.
    pub fn alias(&self) -> String {
        format!("{}__{}", self.field, self.aggregate)
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.aggregate, self.field)
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Asc
    }
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

impl FromStr for Direction {
    type Err = CubeError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("asc") {
            Ok(Direction::Asc)
        } else if s.eq_ignore_ascii_case("desc") {
            Ok(Direction::Desc)
        } else {
            Err(CubeError::Specification(format!("unknown sort direction '{}'", s)))
        }
    }
}

/// What an order entry sorts by: a dimension or a measure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderKey {
    Field(String),
    Measure(Measure),
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderKey::Field(name) => f.write_str(name),
            OrderKey::Measure(m) => write!(f, "{}", m),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderItem {
    pub key: OrderKey,
    pub direction: Direction,
}

impl OrderItem {
    pub fn new(key: OrderKey, direction: Direction) -> Self {
        OrderItem { key, direction }
    }
}

// ============================================================================
// EXPANSION STATE
// ============================================================================

/// Which hierarchy nodes of one axis the user has opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expansions {
    /// Every node is expanded.
    All,
    /// Prefixes of the expanded nodes. The empty prefix is the grand total.
    Prefixes(BTreeSet<Vec<Value>>),
}

impl Default for Expansions {
    fn default() -> Self {
        Expansions::Prefixes(BTreeSet::new())
    }
}

impl Expansions {
    pub fn none() -> Self {
        Expansions::default()
    }

    pub fn from_prefixes(prefixes: impl IntoIterator<Item = Vec<Value>>) -> Self {
        Expansions::Prefixes(prefixes.into_iter().collect())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Expansions::All)
    }

    /// Explicit prefixes; empty for `All`.
    pub fn prefixes(&self) -> impl Iterator<Item = &Vec<Value>> {
        let set = match self {
            Expansions::All => None,
            Expansions::Prefixes(set) => Some(set),
        };
        set.into_iter().flatten()
    }

    pub fn is_expanded(&self, prefix: &[Value]) -> bool {
        match self {
            Expansions::All => true,
            Expansions::Prefixes(set) => set.contains(prefix),
        }
    }

    /// Visible nodes: everything under `All`, the grand total, and nodes one
    /// level below an expanded prefix.
    pub fn is_visible(&self, coordinate: &Coordinate) -> bool {
        match self {
            Expansions::All => true,
            Expansions::Prefixes(set) => {
                coordinate.is_grand_total() || set.iter().any(|p| coordinate.is_child_of(p))
            }
        }
    }

    /// Whether drill `level` has to be queried: it holds nodes that can pass
    /// `is_visible`, or ancestors of such nodes, which fix the sibling order
    /// of the drill tree.
    pub fn level_is_needed(&self, level: usize) -> bool {
        level == 0 || self.is_all() || self.prefixes().any(|p| p.len() + 1 >= level)
    }

    pub fn expand(&mut self, prefix: Vec<Value>) {
        if let Expansions::Prefixes(set) = self {
            set.insert(prefix);
        }
    }

    /// Removes `prefix` and every expanded prefix below it. Collapsing a node
    /// under `All` is a no-op; use `collapse_all` first.
    pub fn collapse(&mut self, prefix: &[Value]) {
        if let Expansions::Prefixes(set) = self {
            set.retain(|p| !p.starts_with(prefix));
        }
    }

    /// Returns true when the node ends up expanded.
    pub fn toggle(&mut self, prefix: Vec<Value>) -> bool {
        if self.is_expanded(&prefix) {
            self.collapse(&prefix);
            self.is_expanded(&prefix)
        } else {
            self.expand(prefix);
            true
        }
    }

    fn truncate(&mut self, len: usize) {
        if let Expansions::Prefixes(set) = self {
            let truncated = std::mem::take(set)
                .into_iter()
                .map(|mut p| {
                    p.truncate(len);
                    p
                })
                .collect();
            *set = truncated;
        }
    }
}

/// One of the two cube axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    Rows,
    Columns,
}

impl Axis {
    pub fn name(&self) -> &'static str {
        match self {
            Axis::Rows => "row",
            Axis::Columns => "column",
        }
    }
}

// ============================================================================
// MAIN SPEC STRUCT
// ============================================================================

/// The complete state of one pivot view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CubeSpec {
    /// Backing dataset key. Supplied out of band, never encoded.
    #[serde(default)]
    pub table: Option<String>,

    /// Row dimensions, outermost first.
    #[serde(default)]
    pub rows: Vec<String>,

    /// Column dimensions, outermost first.
    #[serde(default)]
    pub columns: Vec<String>,

    #[serde(default)]
    pub measures: Vec<Measure>,

    /// Unaggregated fields shown next to fully drilled rows.
    #[serde(default)]
    pub properties: Vec<String>,

    #[serde(default)]
    pub order: Vec<OrderItem>,

    #[serde(default)]
    pub row_expansions: Expansions,

    #[serde(default)]
    pub column_expansions: Expansions,
}

impl CubeSpec {
    /// Creates an empty cube over `table`.
    pub fn new(table: impl Into<String>) -> Self {
        CubeSpec {
            table: Some(table.into()),
            ..Default::default()
        }
    }

    pub fn with_rows<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn with_columns<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn with_measure(mut self, field: impl Into<String>, aggregate: Aggregate) -> Self {
        self.measures.push(Measure::new(field, aggregate));
        self
    }

    pub fn with_property(mut self, field: impl Into<String>) -> Self {
        self.properties.push(field.into());
        self
    }

    pub fn with_order(mut self, key: OrderKey, direction: Direction) -> Self {
        self.order.push(OrderItem::new(key, direction));
        self
    }

    pub fn dimensions(&self, axis: Axis) -> &[String] {
        match axis {
            Axis::Rows => &self.rows,
            Axis::Columns => &self.columns,
        }
    }

    pub fn expansions(&self, axis: Axis) -> &Expansions {
        match axis {
            Axis::Rows => &self.row_expansions,
            Axis::Columns => &self.column_expansions,
        }
    }

    pub fn expansions_mut(&mut self, axis: Axis) -> &mut Expansions {
        match axis {
            Axis::Rows => &mut self.row_expansions,
            Axis::Columns => &mut self.column_expansions,
        }
    }

    // ------------------------------------------------------------------------
    // Interaction
    // ------------------------------------------------------------------------

    pub fn expand(&mut self, axis: Axis, prefix: Vec<Value>) {
        self.expansions_mut(axis).expand(prefix);
    }

    pub fn collapse(&mut self, axis: Axis, prefix: &[Value]) {
        self.expansions_mut(axis).collapse(prefix);
    }

    pub fn toggle(&mut self, axis: Axis, prefix: Vec<Value>) -> bool {
        self.expansions_mut(axis).toggle(prefix)
    }

    pub fn expand_all(&mut self, axis: Axis) {
        *self.expansions_mut(axis) = Expansions::All;
    }

    pub fn collapse_all(&mut self, axis: Axis) {
        *self.expansions_mut(axis) = Expansions::none();
    }

    pub fn expand_row(&mut self, prefix: Vec<Value>) {
        self.expand(Axis::Rows, prefix);
    }

    pub fn collapse_row(&mut self, prefix: &[Value]) {
        self.collapse(Axis::Rows, prefix);
    }

    pub fn toggle_row(&mut self, prefix: Vec<Value>) -> bool {
        self.toggle(Axis::Rows, prefix)
    }

    pub fn expand_column(&mut self, prefix: Vec<Value>) {
        self.expand(Axis::Columns, prefix);
    }

    pub fn collapse_column(&mut self, prefix: &[Value]) {
        self.collapse(Axis::Columns, prefix);
    }

    pub fn toggle_column(&mut self, prefix: Vec<Value>) -> bool {
        self.toggle(Axis::Columns, prefix)
    }

    /// Appends a row dimension.
    pub fn add_row(&mut self, field: impl Into<String>) -> Result<()> {
        let field = field.into();
        if self.rows.contains(&field) {
            return Err(CubeError::DuplicateField { field, area: "rows" });
        }
        self.rows.push(field);
        Ok(())
    }

    /// Appends a column dimension.
    pub fn add_column(&mut self, field: impl Into<String>) -> Result<()> {
        let field = field.into();
        if self.columns.contains(&field) {
            return Err(CubeError::DuplicateField { field, area: "columns" });
        }
        self.columns.push(field);
        Ok(())
    }

    pub fn add_measure(&mut self, field: impl Into<String>, aggregate: Aggregate) -> Result<()> {
        let measure = Measure::new(field, aggregate);
        if self.measures.contains(&measure) {
            return Err(CubeError::DuplicateField {
                field: measure.to_string(),
                area: "measures",
            });
        }
        self.measures.push(measure);
        Ok(())
    }

    pub fn add_property(&mut self, field: impl Into<String>) -> Result<()> {
        let field = field.into();
        if self.properties.contains(&field) {
            return Err(CubeError::DuplicateField { field, area: "properties" });
        }
        self.properties.push(field);
        Ok(())
    }

    /// Removes `field` everywhere it is used. Expansion prefixes that reached
    /// past the removed dimension are cut back to the levels above it.
    /// Returns false when the field was not in use.
    pub fn remove_field(&mut self, field: &str) -> bool {
        let mut removed = false;

        if let Some(pos) = self.rows.iter().position(|f| f == field) {
            self.rows.remove(pos);
            self.row_expansions.truncate(pos);
            removed = true;
        }
        if let Some(pos) = self.columns.iter().position(|f| f == field) {
            self.columns.remove(pos);
            self.column_expansions.truncate(pos);
            removed = true;
        }

        let before = self.measures.len() + self.properties.len() + self.order.len();
        self.measures.retain(|m| m.field != field);
        self.properties.retain(|p| p != field);
        self.order.retain(|item| match &item.key {
            OrderKey::Field(f) => f != field,
            OrderKey::Measure(m) => m.field != field,
        });
        removed || before != self.measures.len() + self.properties.len() + self.order.len()
    }

    /// Cycles the order entry for `key`: absent -> asc -> desc -> absent.
    /// Returns the new direction, if any.
    pub fn toggle_order(&mut self, key: OrderKey) -> Option<Direction> {
        match self.order.iter().position(|item| item.key == key) {
            None => {
                self.order.push(OrderItem::new(key, Direction::Asc));
                Some(Direction::Asc)
            }
            Some(pos) if self.order[pos].direction == Direction::Asc => {
                self.order[pos].direction = Direction::Desc;
                Some(Direction::Desc)
            }
            Some(pos) => {
                self.order.remove(pos);
                None
            }
        }
    }

    // ------------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------------

    /// Checks the structural invariants and, when a schema is given, that every
    /// referenced field exists and sum/avg only target numeric fields.
    pub fn validate(&self, schema: Option<&Schema>) -> Result<()> {
        check_unique(&self.rows, "rows")?;
        check_unique(&self.columns, "columns")?;
        check_unique(&self.properties, "properties")?;

        let mut seen = FxHashSet::default();
        for measure in &self.measures {
            if !seen.insert(measure) {
                return Err(CubeError::DuplicateField {
                    field: measure.to_string(),
                    area: "measures",
                });
            }
        }

        let mut seen_keys = FxHashSet::default();
        for item in &self.order {
            if !seen_keys.insert(&item.key) {
                return Err(CubeError::DuplicateOrderKey(item.key.to_string()));
            }
            let resolvable = match &item.key {
                OrderKey::Field(f) => self.rows.contains(f) || self.columns.contains(f),
                OrderKey::Measure(m) => self.measures.contains(m),
            };
            if !resolvable {
                return Err(CubeError::Specification(format!(
                    "order key '{}' is not a dimension or measure of this cube",
                    item.key
                )));
            }
        }

        for axis in [Axis::Rows, Axis::Columns] {
            let width = self.dimensions(axis).len();
            for prefix in self.expansions(axis).prefixes() {
                if prefix.len() > width {
                    return Err(CubeError::InvalidExpansion {
                        axis: axis.name(),
                        prefix: Coordinate::from_prefix(prefix, 0).to_string(),
                        reason: format!("longer than the {} {} dimensions", width, axis.name()),
                    });
                }
            }
        }

        if let Some(schema) = schema {
            for field in self.rows.iter().chain(&self.columns).chain(&self.properties) {
                schema.resolve(field)?;
            }
            for measure in &self.measures {
                let field = schema.resolve(&measure.field)?;
                if measure.aggregate.requires_numeric() && !field.kind.is_numeric() {
                    return Err(CubeError::AggregationType {
                        field: measure.field.clone(),
                        aggregate: measure.aggregate.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

fn check_unique(fields: &[String], area: &'static str) -> Result<()> {
    let mut seen = FxHashSet::default();
    for field in fields {
        if !seen.insert(field.as_str()) {
            return Err(CubeError::DuplicateField {
                field: field.clone(),
                area,
            });
        }
    }
    Ok(())
}
