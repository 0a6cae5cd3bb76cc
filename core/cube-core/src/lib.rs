//! FILENAME: core/cube-core/src/lib.rs
//! PURPOSE: Shared types for the pivot cube engine.
//! CONTEXT: Values, coordinates and grid cells, plus their locale-aware
//! display formatting. The `cube-engine` crate builds on these.

pub mod cell;
pub mod coord;
pub mod number_format;
pub mod value;

// Re-export commonly used types at the crate root
pub use cell::{Cell, CellKind, CellOverrides};
pub use coord::{Coordinate, Slot};
pub use number_format::{format_duration, format_fixed, format_value, FormatOptions, Locale};
pub use value::{OrderedFloat, Value};
