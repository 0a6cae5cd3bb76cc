//! FILENAME: core/cube-engine/src/lib.rs
//! Drillable pivot cube over a flat dataset.
//!
//! A `CubeSpec` names the row and column dimensions, measures, properties,
//! ordering, and which nodes are expanded. The engine plans one grouped
//! aggregate query per drill-level pair, fetches the results through a
//! materialized cache, and lays the visible part out as a `Grid`. The spec
//! travels between requests as a flat URL-safe string.
//!
//! Layers:
//! - `definition`: The spec and its interaction operations (WHAT the cube IS)
//! - `query`: Drill-level query planning
//! - `source`: Aggregation source boundary and the in-memory implementation
//! - `store` / `cache`: Materialized query results (WHERE rows come from)
//! - `engine`: Reduction and visibility (HOW we calculate)
//! - `view`: The grid (WHAT we display)
//! - `codec` / `literal`: The wire format

pub mod cache;
pub mod codec;
pub mod config;
pub mod definition;
pub mod engine;
pub mod error;
pub mod literal;
pub mod query;
pub mod schema;
pub mod source;
pub mod store;
pub mod view;

pub use cache::{fingerprint, lock_key, CacheStats, MaterializedCache};
pub use config::{CacheConfig, EngineConfig};
pub use definition::*;
pub use engine::{build_cube, visible_coordinates, Cube, CubeData};
pub use error::{CubeError, Result};
pub use query::{plan, AggregateQuery, PlanMode, PlannedQuery, QueryPlan};
pub use schema::{FieldDef, FieldKind, FieldRef, Schema};
pub use source::{AggregationSource, Dataset, MemorySource, Row};
pub use store::{CacheStore, Durability, MemoryStore, UnitOfWork};
pub use view::{Grid, GridLayout, GridRows, RowDescriptor, RowKind, Span};

pub use cube_core::{Cell, CellKind, Coordinate, Locale, Value};
