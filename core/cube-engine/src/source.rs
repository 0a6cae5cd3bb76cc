//! FILENAME: core/cube-engine/src/source.rs
//! Aggregation Source - Executes grouped aggregate queries.
//!
//! `AggregationSource` is the boundary to whatever holds the backing dataset.
//! `MemorySource` is an in-memory implementation: datasets are plain row
//! vectors with a schema, and `select` does a single hash-grouping pass.

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use cube_core::Value;

use crate::definition::{Aggregate, Direction};
use crate::error::{CubeError, Result};
use crate::query::AggregateQuery;
use crate::schema::{FieldRef, Schema};

/// One result or dataset row.
pub type Row = Vec<Value>;

/// Rows between timeout checks during a scan.
const TIMEOUT_CHECK_INTERVAL: usize = 1024;

/// Executes grouped aggregate queries against backing datasets.
pub trait AggregationSource: Send + Sync {
    /// Runs `query`. Rows carry the group-by values, then the measures, then
    /// the property minimums, ordered by `query.order_by`. A query running
    /// longer than `timeout` fails with `CubeError::Timeout`.
    fn select(&self, query: &AggregateQuery, timeout: Option<Duration>) -> Result<Vec<Row>>;
}

impl<T: AggregationSource + ?Sized> AggregationSource for &T {
    fn select(&self, query: &AggregateQuery, timeout: Option<Duration>) -> Result<Vec<Row>> {
        (**self).select(query, timeout)
    }
}

// ============================================================================
// DATASET
// ============================================================================

/// A flat table: schema plus rows.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    schema: Schema,
    rows: Vec<Row>,
}

impl Dataset {
    pub fn new(schema: Schema) -> Self {
        Dataset {
            schema,
            rows: Vec::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Appends a row after checking its width and value types.
    pub fn push(&mut self, row: Row) -> Result<()> {
        if row.len() != self.schema.len() {
            return Err(CubeError::Source(format!(
                "row has {} values, schema has {} fields",
                row.len(),
                self.schema.len()
            )));
        }
        for (value, field) in row.iter().zip(self.schema.fields()) {
            if !field.kind.accepts(value) {
                return Err(CubeError::Source(format!(
                    "field '{}' cannot hold a {} value",
                    field.name,
                    value.type_name()
                )));
            }
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn with_rows(mut self, rows: impl IntoIterator<Item = Row>) -> Result<Self> {
        for row in rows {
            self.push(row)?;
        }
        Ok(self)
    }
}

// ============================================================================
// ACCUMULATOR
// ============================================================================

/// Running state for one measure of one group.
#[derive(Debug, Clone, Default)]
struct Accumulator {
    int_sum: i64,
    float_sum: f64,
    all_integers: bool,
    count: u64,
    min: Option<Value>,
    max: Option<Value>,
}

impl Accumulator {
    fn new() -> Self {
        Accumulator {
            all_integers: true,
            ..Default::default()
        }
    }

    /// Adds a value. Nulls are skipped, as in SQL aggregates.
    fn add(&mut self, value: &Value) {
        if value.is_null() {
            return;
        }
        self.count += 1;

        match value {
            Value::Integer(i) => {
                self.float_sum += *i as f64;
                match self.int_sum.checked_add(*i) {
                    Some(sum) => self.int_sum = sum,
                    None => self.all_integers = false,
                }
            }
            Value::Number(n) => {
                self.float_sum += n.0;
                self.all_integers = false;
            }
            _ => {}
        }

        if self.min.as_ref().map_or(true, |m| value < m) {
            self.min = Some(value.clone());
        }
        if self.max.as_ref().map_or(true, |m| value > m) {
            self.max = Some(value.clone());
        }
    }

    fn compute(&self, aggregate: Aggregate) -> Value {
        match aggregate {
            Aggregate::Count => Value::Integer(self.count as i64),
            _ if self.count == 0 => Value::Null,
            Aggregate::Sum if self.all_integers => Value::Integer(self.int_sum),
            Aggregate::Sum => Value::number(self.float_sum),
            Aggregate::Avg => Value::number(self.float_sum / self.count as f64),
            Aggregate::Min => self.min.clone().unwrap_or(Value::Null),
            Aggregate::Max => self.max.clone().unwrap_or(Value::Null),
        }
    }
}

// ============================================================================
// MEMORY SOURCE
// ============================================================================

/// In-memory datasets keyed by table name.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    tables: FxHashMap<String, Dataset>,
}

impl MemorySource {
    pub fn new() -> Self {
        MemorySource::default()
    }

    pub fn with_table(mut self, name: impl Into<String>, dataset: Dataset) -> Self {
        self.insert_table(name, dataset);
        self
    }

    pub fn insert_table(&mut self, name: impl Into<String>, dataset: Dataset) {
        self.tables.insert(name.into(), dataset);
    }

    pub fn remove_table(&mut self, name: &str) -> Option<Dataset> {
        self.tables.remove(name)
    }

    pub fn table(&self, name: &str) -> Option<&Dataset> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

/// Fields of a query resolved against one dataset schema.
struct ResolvedQuery {
    group_by: Vec<FieldRef>,
    measures: Vec<(FieldRef, Aggregate)>,
    properties: Vec<FieldRef>,
}

impl ResolvedQuery {
    fn resolve(query: &AggregateQuery, schema: &Schema) -> Result<Self> {
        let group_by = query
            .group_by
            .iter()
            .map(|f| schema.resolve(f))
            .collect::<Result<Vec<_>>>()?;

        let mut measures = Vec::with_capacity(query.measures.len());
        for m in &query.measures {
            let field = schema.resolve(&m.field)?;
            if m.aggregate.requires_numeric() && !field.kind.is_numeric() {
                return Err(CubeError::AggregationType {
                    field: m.field.clone(),
                    aggregate: m.aggregate.to_string(),
                });
            }
            measures.push((field, m.aggregate));
        }

        let properties = query
            .properties
            .iter()
            .map(|f| schema.resolve(f))
            .collect::<Result<Vec<_>>>()?;

        Ok(ResolvedQuery {
            group_by,
            measures,
            properties,
        })
    }
}

struct Group {
    key: Vec<Value>,
    measures: Vec<Accumulator>,
    properties: Vec<Accumulator>,
}

impl AggregationSource for MemorySource {
    fn select(&self, query: &AggregateQuery, timeout: Option<Duration>) -> Result<Vec<Row>> {
        let started = Instant::now();
        let dataset = self
            .tables
            .get(&query.table)
            .ok_or_else(|| CubeError::UnknownTable(query.table.clone()))?;
        let resolved = ResolvedQuery::resolve(query, &dataset.schema)?;

        let check_timeout = |limit: Option<Duration>| -> Result<()> {
            match limit {
                Some(limit) if started.elapsed() > limit => Err(CubeError::Timeout { limit }),
                _ => Ok(()),
            }
        };

        let mut index: FxHashMap<Vec<Value>, usize> = FxHashMap::default();
        let mut groups: Vec<Group> = Vec::new();

        for (n, row) in dataset.rows.iter().enumerate() {
            if n % TIMEOUT_CHECK_INTERVAL == 0 {
                check_timeout(timeout)?;
            }

            let key: Vec<Value> = resolved.group_by.iter().map(|f| row[f.index].clone()).collect();
            let slot = match index.get(&key) {
                Some(&slot) => slot,
                None => {
                    groups.push(Group {
                        key: key.clone(),
                        measures: vec![Accumulator::new(); resolved.measures.len()],
                        properties: vec![Accumulator::new(); resolved.properties.len()],
                    });
                    index.insert(key, groups.len() - 1);
                    groups.len() - 1
                }
            };

            let group = &mut groups[slot];
            for (acc, (field, _)) in group.measures.iter_mut().zip(&resolved.measures) {
                acc.add(&row[field.index]);
            }
            for (acc, field) in group.properties.iter_mut().zip(&resolved.properties) {
                acc.add(&row[field.index]);
            }
        }

        // An ungrouped aggregate always yields exactly one row.
        if resolved.group_by.is_empty() && groups.is_empty() {
            groups.push(Group {
                key: Vec::new(),
                measures: vec![Accumulator::new(); resolved.measures.len()],
                properties: vec![Accumulator::new(); resolved.properties.len()],
            });
        }

        let mut rows: Vec<Row> = groups
            .into_iter()
            .map(|group| {
                let mut row = group.key;
                row.extend(
                    group
                        .measures
                        .iter()
                        .zip(&resolved.measures)
                        .map(|(acc, (_, aggregate))| acc.compute(*aggregate)),
                );
                row.extend(group.properties.iter().map(|acc| acc.compute(Aggregate::Min)));
                row
            })
            .collect();

        let sort_columns: Vec<(usize, Direction)> = query
            .order_by
            .iter()
            .filter_map(|item| query.column_of(&item.key).map(|col| (col, item.direction)))
            .collect();
        if !sort_columns.is_empty() {
            rows.sort_by(|a, b| {
                sort_columns
                    .iter()
                    .map(|&(col, direction)| compare_nulls_last(&a[col], &b[col], direction))
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        check_timeout(timeout)?;
        Ok(rows)
    }
}

/// SQL ordering: nulls count as larger than every value, so they come last
/// ascending and first descending.
fn compare_nulls_last(a: &Value, b: &Value, direction: Direction) -> Ordering {
    let ord = match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.cmp(b),
    };
    match direction {
        Direction::Asc => ord,
        Direction::Desc => ord.reverse(),
    }
}
