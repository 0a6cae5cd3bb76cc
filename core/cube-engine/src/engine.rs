//! FILENAME: core/cube-engine/src/engine.rs
//! Cube Engine - Turns a CubeSpec into a renderable Grid.
//!
//! Algorithm:
//! 1. Validate the spec and plan one aggregate query per drill-level pair
//! 2. Fetch each query's rows through the materialized cache
//! 3. Split every row into (row coordinate, column coordinate), measures and
//!    properties, recording first-seen coordinate order per axis
//! 4. Keep only cells whose two coordinates are visible
//! 5. Walk each axis depth-first from the grand total and assemble the Grid

use std::time::Instant;

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use cube_core::{Cell, Coordinate, Value};

use crate::cache::MaterializedCache;
use crate::config::EngineConfig;
use crate::definition::{CubeSpec, Expansions};
use crate::error::{CubeError, Result};
use crate::query::{self, QueryPlan};
use crate::schema::Schema;
use crate::source::AggregationSource;
use crate::store::CacheStore;
use crate::view::{Grid, GridLayout};

// ============================================================================
// CUBE DATA
// ============================================================================

/// Reduced query results: everything the grid is assembled from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CubeData {
    /// Measure cells of every visible (row, column) coordinate pair.
    pub values: FxHashMap<(Coordinate, Coordinate), Vec<Cell>>,

    /// Property values of fully drilled row coordinates.
    pub properties: FxHashMap<Coordinate, Vec<Value>>,

    /// Row coordinates in first-seen order, from the column grand-total queries.
    pub row_order: Vec<Coordinate>,

    /// Column coordinates in first-seen order, from the row grand-total queries.
    pub column_order: Vec<Coordinate>,
}

impl CubeData {
    pub fn value_cells(&self, row: &Coordinate, column: &Coordinate) -> Option<&[Cell]> {
        self.values
            .get(&(row.clone(), column.clone()))
            .map(Vec::as_slice)
    }
}

// ============================================================================
// CUBE
// ============================================================================

/// One pivot view over a cached dataset.
pub struct Cube<'a, S, A> {
    spec: CubeSpec,
    cache: &'a MaterializedCache<S, A>,
    config: EngineConfig,
    schema: Option<&'a Schema>,
}

impl<'a, S: CacheStore, A: AggregationSource> Cube<'a, S, A> {
    pub fn new(spec: CubeSpec, cache: &'a MaterializedCache<S, A>) -> Self {
        Cube {
            spec,
            cache,
            config: EngineConfig::default(),
            schema: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates field names and aggregate types against `schema` up front
    /// instead of leaving it to the aggregation source.
    pub fn with_schema(mut self, schema: &'a Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn spec(&self) -> &CubeSpec {
        &self.spec
    }

    /// The spec, for interaction between builds (expand, add fields, ...).
    pub fn spec_mut(&mut self) -> &mut CubeSpec {
        &mut self.spec
    }

    pub fn into_spec(self) -> CubeSpec {
        self.spec
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn table(&self) -> Result<&str> {
        self.spec
            .table
            .as_deref()
            .ok_or_else(|| CubeError::Specification("no table selected".to_string()))
    }

    /// Validates the spec and plans its queries.
    pub fn plan(&self) -> Result<QueryPlan> {
        self.spec.validate(self.schema)?;
        let table = self.table()?;
        Ok(query::plan(&self.spec, table, self.config.plan_mode))
    }

    /// Runs the plan and reduces the results. A failing query aborts the
    /// whole computation and is reported with its position in the plan.
    pub fn compute(&self) -> Result<CubeData> {
        let plan = self.plan()?;
        let table = self.table()?;
        let timeout = self.config.timeout();
        let total = plan.len();
        let started = Instant::now();

        let row_width = self.spec.rows.len();
        let column_width = self.spec.columns.len();
        let measure_count = self.spec.measures.len();
        let collect_properties = !self.spec.properties.is_empty() && row_width > 0;

        let mut data = CubeData::default();
        let mut seen_rows: FxHashSet<Coordinate> = FxHashSet::default();
        let mut seen_columns: FxHashSet<Coordinate> = FxHashSet::default();

        for (index, planned) in plan.queries.iter().enumerate() {
            let wrap = |source: CubeError| CubeError::PlanQuery {
                index,
                total,
                source: Box::new(source),
            };
            let rows = self.cache.get(table, &planned.query, timeout).map_err(wrap)?;

            let row_level = planned.row_level;
            let column_level = planned.column_level;
            let measures_at = row_level + column_level;
            let properties_at = measures_at + measure_count;
            let expected = planned.query.row_width();

            for row in rows.iter() {
                if row.len() != expected {
                    return Err(wrap(CubeError::Source(format!(
                        "expected {} values per row, got {}",
                        expected,
                        row.len()
                    ))));
                }

                let row_coord = Coordinate::from_prefix(&row[..row_level], row_width);
                let column_coord = Coordinate::from_prefix(&row[row_level..measures_at], column_width);

                if column_level == 0 && seen_rows.insert(row_coord.clone()) {
                    data.row_order.push(row_coord.clone());
                }
                if row_level == 0 && seen_columns.insert(column_coord.clone()) {
                    data.column_order.push(column_coord.clone());
                }
                if collect_properties && column_level == 0 && row_level == row_width {
                    data.properties
                        .insert(row_coord.clone(), row[properties_at..].to_vec());
                }

                if self.spec.row_expansions.is_visible(&row_coord)
                    && self.spec.column_expansions.is_visible(&column_coord)
                {
                    let cells = row[measures_at..properties_at]
                        .iter()
                        .cloned()
                        .map(Cell::value)
                        .collect();
                    data.values.insert((row_coord, column_coord), cells);
                }
            }
        }

        debug!(
            "computed cube queries={} rows={} columns={} cells={} elapsed_ms={}",
            total,
            data.row_order.len(),
            data.column_order.len(),
            data.values.len(),
            started.elapsed().as_millis()
        );
        Ok(data)
    }

    /// Computes the cube and lays it out as a grid.
    pub fn build(&self) -> Result<Grid> {
        let data = self.compute()?;
        let rows = visible_coordinates(&data.row_order, self.spec.rows.len(), &self.spec.row_expansions);
        let columns = visible_coordinates(
            &data.column_order,
            self.spec.columns.len(),
            &self.spec.column_expansions,
        );

        let layout = GridLayout {
            row_dimensions: self.spec.rows.clone(),
            column_dimensions: self.spec.columns.clone(),
            measures: self.spec.measures.clone(),
            properties: self.spec.properties.clone(),
            total_label: self.config.total_label.clone(),
        };
        Ok(Grid::new(layout, rows, columns, data.values, data.properties))
    }
}

/// Convenience wrapper: builds the grid of `spec` in one call.
pub fn build_cube<S: CacheStore, A: AggregationSource>(
    spec: CubeSpec,
    cache: &MaterializedCache<S, A>,
    config: EngineConfig,
) -> Result<Grid> {
    Cube::new(spec, cache).with_config(config).build()
}

// ============================================================================
// AXIS WALK
// ============================================================================

/// Visible coordinates of one axis in display order: a depth-first walk of
/// the drill tree from the grand total, visiting siblings in `order` and
/// emitting every node that `expansions` makes visible. The grand total is
/// always first.
///
/// Nodes missing from `order` (levels that were never queried) still link
/// their descendants into the tree, so an expanded prefix whose ancestors
/// are collapsed shows its children directly under the grand total.
pub fn visible_coordinates(
    order: &[Coordinate],
    width: usize,
    expansions: &Expansions,
) -> Vec<Coordinate> {
    let mut nodes: FxHashMap<Vec<Value>, &Coordinate> = FxHashMap::default();
    let mut children: FxHashMap<Vec<Value>, Vec<Vec<Value>>> = FxHashMap::default();
    let mut linked: FxHashSet<Vec<Value>> = FxHashSet::default();

    for coord in order {
        // Only prefix-shaped coordinates belong to the drill tree.
        if coord.is_grand_total() || coord.depth() != coord.non_null_count() {
            continue;
        }
        let prefix = coord.node_prefix();
        for len in 1..=prefix.len() {
            let node = &prefix[..len];
            if linked.insert(node.to_vec()) {
                children
                    .entry(prefix[..len - 1].to_vec())
                    .or_default()
                    .push(node.to_vec());
            }
        }
        nodes.entry(prefix).or_insert(coord);
    }

    let mut result = vec![Coordinate::grand_total(width)];
    // Each frame is a parent prefix and the index of its next child.
    let root: &[Value] = &[];
    let mut stack: Vec<(&[Value], usize)> = vec![(root, 0)];
    while let Some((prefix, next)) = stack.pop() {
        let Some(child) = children.get(prefix).and_then(|c| c.get(next)) else {
            continue;
        };
        stack.push((prefix, next + 1));
        if let Some(&coord) = nodes.get(child) {
            if expansions.is_visible(coord) {
                result.push(coord.clone());
            }
        }
        if child.len() < width {
            stack.push((child.as_slice(), 0));
        }
    }
    result
}
