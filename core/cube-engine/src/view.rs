//! FILENAME: core/cube-engine/src/view.rs
//! Grid - Renderable output of a cube build.
//!
//! Layout, top to bottom:
//! - one header row per column dimension
//! - a measure-name row
//! - one data row per visible row coordinate
//!
//! Left to right, every row starts with one cell per row dimension (at least
//! one) and one per property, followed by one cell per measure for each
//! visible column coordinate. Rows are assembled on demand, so the grid can
//! be iterated any number of times without holding the full cell matrix.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use cube_core::{Cell, CellKind, CellOverrides, Coordinate, Value};

use crate::definition::Measure;

/// Labels and fields the grid is laid out from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridLayout {
    pub row_dimensions: Vec<String>,
    pub column_dimensions: Vec<String>,
    pub measures: Vec<Measure>,
    pub properties: Vec<String>,
    pub total_label: String,
}

// ============================================================================
// ROW DESCRIPTORS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowKind {
    /// A column-dimension header row.
    ColumnHeader,
    /// The row naming the measures.
    MeasureHeader,
    /// The grand-total data row.
    GrandTotal,
    Data,
}

/// Metadata of one grid row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDescriptor<'a> {
    pub kind: RowKind,
    /// Row coordinate of data rows.
    pub coordinate: Option<&'a Coordinate>,
    /// Drill depth of data rows; header level of column-header rows.
    pub depth: usize,
}

/// A run of equal adjacent cells in one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub len: usize,
}

// ============================================================================
// GRID
// ============================================================================

#[derive(Debug, Clone)]
pub struct Grid {
    layout: GridLayout,
    row_coordinates: Vec<Coordinate>,
    column_coordinates: Vec<Coordinate>,
    values: FxHashMap<(Coordinate, Coordinate), Vec<Cell>>,
    properties: FxHashMap<Coordinate, Vec<Value>>,
}

impl Grid {
    pub fn new(
        layout: GridLayout,
        row_coordinates: Vec<Coordinate>,
        column_coordinates: Vec<Coordinate>,
        values: FxHashMap<(Coordinate, Coordinate), Vec<Cell>>,
        properties: FxHashMap<Coordinate, Vec<Value>>,
    ) -> Self {
        Grid {
            layout,
            row_coordinates,
            column_coordinates,
            values,
            properties,
        }
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Visible row coordinates in display order.
    pub fn row_coordinates(&self) -> &[Coordinate] {
        &self.row_coordinates
    }

    /// Visible column coordinates in display order.
    pub fn column_coordinates(&self) -> &[Coordinate] {
        &self.column_coordinates
    }

    /// Column-dimension header rows plus the measure-name row.
    pub fn header_row_count(&self) -> usize {
        self.layout.column_dimensions.len() + 1
    }

    pub fn data_row_count(&self) -> usize {
        self.row_coordinates.len()
    }

    pub fn row_count(&self) -> usize {
        self.header_row_count() + self.data_row_count()
    }

    /// Width of the left area: row dimensions (at least one) then properties.
    pub fn left_width(&self) -> usize {
        self.layout.row_dimensions.len().max(1) + self.layout.properties.len()
    }

    pub fn column_count(&self) -> usize {
        self.left_width() + self.column_coordinates.len() * self.layout.measures.len()
    }

    /// Iterates the rows, header rows first. Each call starts over.
    pub fn rows(&self) -> GridRows<'_> {
        GridRows {
            grid: self,
            next: 0,
            end: self.row_count(),
        }
    }

    /// Iterates `count` rows starting at `start`, clamped to the grid.
    pub fn window(&self, start: usize, count: usize) -> GridRows<'_> {
        let end = start.saturating_add(count).min(self.row_count());
        GridRows {
            grid: self,
            next: start.min(end),
            end,
        }
    }

    /// Assembles every row.
    pub fn to_vec(&self) -> Vec<Vec<Cell>> {
        self.rows().collect()
    }

    /// Builds row `index`, or `None` past the end.
    pub fn row(&self, index: usize) -> Option<Vec<Cell>> {
        let headers = self.layout.column_dimensions.len();
        if index < headers {
            Some(self.column_header_row(index))
        } else if index == headers {
            Some(self.measure_header_row())
        } else {
            self.row_coordinates
                .get(index - headers - 1)
                .map(|coord| self.data_row(coord))
        }
    }

    pub fn descriptor(&self, index: usize) -> Option<RowDescriptor<'_>> {
        let headers = self.layout.column_dimensions.len();
        if index < headers {
            return Some(RowDescriptor {
                kind: RowKind::ColumnHeader,
                coordinate: None,
                depth: index,
            });
        }
        if index == headers {
            return Some(RowDescriptor {
                kind: RowKind::MeasureHeader,
                coordinate: None,
                depth: 0,
            });
        }
        let coord = self.row_coordinates.get(index - headers - 1)?;
        Some(RowDescriptor {
            kind: if coord.is_grand_total() {
                RowKind::GrandTotal
            } else {
                RowKind::Data
            },
            coordinate: Some(coord),
            depth: coord.depth(),
        })
    }

    /// Runs of equal adjacent cells in row `index`, for merged header
    /// rendering. Equality is cell equality: value and kind.
    pub fn header_spans(&self, index: usize) -> Vec<Span> {
        let Some(cells) = self.row(index) else {
            return Vec::new();
        };
        let mut spans: Vec<Span> = Vec::new();
        for (i, cell) in cells.iter().enumerate() {
            match spans.last_mut() {
                Some(span) if cells[span.start] == *cell => span.len += 1,
                _ => spans.push(Span { start: i, len: 1 }),
            }
        }
        spans
    }

    /// The aggregate of `measure` at a visible (row, column) pair.
    pub fn value_at(&self, row: &Coordinate, column: &Coordinate, measure: usize) -> Option<&Value> {
        self.values
            .get(&(row.clone(), column.clone()))
            .and_then(|cells| cells.get(measure))
            .map(|cell| &cell.value)
    }

    // ------------------------------------------------------------------------
    // Row assembly
    // ------------------------------------------------------------------------

    /// Label cell of `coord` at `level`: the innermost value only, the total
    /// label at level 0 of the grand total, blank elsewhere. Nodes that can
    /// drill further carry their expansion prefix. Built as a row header;
    /// column headers re-role it with `Cell::copy`.
    fn header_cell(&self, coord: &Coordinate, level: usize, width: usize) -> Cell {
        let depth = coord.depth();
        let label = if depth == 0 {
            (level == 0).then(|| Value::text(self.layout.total_label.as_str()))
        } else if level + 1 == depth {
            coord.get(level).cloned()
        } else {
            None
        };

        match label {
            Some(value) => {
                let cell = Cell::row_header(value);
                if depth < width {
                    cell.with_expansion(coord.node_prefix())
                } else {
                    cell
                }
            }
            None => Cell::blank(CellKind::RowHeader),
        }
    }

    fn column_header_row(&self, level: usize) -> Vec<Cell> {
        let width = self.layout.column_dimensions.len();
        let measures = self.layout.measures.len();
        let mut cells = Vec::with_capacity(self.column_count());
        cells.extend((0..self.left_width()).map(|_| Cell::blank(CellKind::ColumnHeader)));
        for coord in &self.column_coordinates {
            let cell = self.header_cell(coord, level, width).copy(CellOverrides {
                kind: Some(CellKind::ColumnHeader),
                ..CellOverrides::default()
            });
            cells.extend(std::iter::repeat(cell).take(measures));
        }
        cells
    }

    fn measure_header_row(&self) -> Vec<Cell> {
        let mut cells = Vec::with_capacity(self.column_count());
        if self.layout.row_dimensions.is_empty() {
            cells.push(Cell::blank(CellKind::ColumnHeader));
        }
        cells.extend(
            self.layout
                .row_dimensions
                .iter()
                .chain(&self.layout.properties)
                .map(|name| Cell::column_header(name.as_str())),
        );
        for _ in &self.column_coordinates {
            cells.extend(
                self.layout
                    .measures
                    .iter()
                    .map(|m| Cell::column_header(m.label())),
            );
        }
        cells
    }

    fn data_row(&self, coord: &Coordinate) -> Vec<Cell> {
        let width = self.layout.row_dimensions.len();
        let measures = self.layout.measures.len();
        let properties = self.properties.get(coord);
        let mut cells = Vec::with_capacity(self.column_count());

        for level in 0..width.max(1) {
            let cell = self.header_cell(coord, level, width);
            match properties {
                Some(values) if level + 1 == coord.depth() => cells.push(cell.copy(CellOverrides {
                    properties: Some(Some(values.clone())),
                    ..CellOverrides::default()
                })),
                _ => cells.push(cell),
            }
        }

        for i in 0..self.layout.properties.len() {
            match properties.and_then(|values| values.get(i)) {
                Some(value) => cells.push(Cell::row_header(value.clone())),
                None => cells.push(Cell::blank(CellKind::RowHeader)),
            }
        }

        for column in &self.column_coordinates {
            match self.values.get(&(coord.clone(), column.clone())) {
                Some(values) => cells.extend(values.iter().cloned()),
                None => cells.extend((0..measures).map(|_| Cell::value(Value::Null))),
            }
        }
        cells
    }
}

/// Lazy row iterator over a `Grid`.
#[derive(Debug, Clone)]
pub struct GridRows<'a> {
    grid: &'a Grid,
    next: usize,
    end: usize,
}

impl Iterator for GridRows<'_> {
    type Item = Vec<Cell>;

    fn next(&mut self) -> Option<Vec<Cell>> {
        if self.next >= self.end {
            return None;
        }
        let row = self.grid.row(self.next);
        self.next += 1;
        row
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for GridRows<'_> {}
