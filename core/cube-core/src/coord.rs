//! FILENAME: core/cube-core/src/coord.rs
//! PURPOSE: Coordinates that address one node of a row or column hierarchy.
//! CONTEXT: A coordinate has one slot per dimension of its axis. A `None` slot
//! means the dimension is aggregated away at that drill level, so the all-`None`
//! coordinate is the grand total and `(a, None)` is the subtotal of `a`.
//! Expansion prefixes are plain value tuples without `None` holes.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::value::Value;

/// One slot of a coordinate.
pub type Slot = Option<Value>;

/// A node address on one axis of the cube.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coordinate(SmallVec<[Slot; 4]>);

impl Coordinate {
    pub fn new(slots: impl IntoIterator<Item = Slot>) -> Self {
        Coordinate(slots.into_iter().collect())
    }

    /// The all-`None` coordinate of an axis with `width` dimensions.
    pub fn grand_total(width: usize) -> Self {
        Coordinate(SmallVec::from_elem(None, width))
    }

    /// Builds the node addressed by `prefix`, padded with `None` to `width`.
    pub fn from_prefix(prefix: &[Value], width: usize) -> Self {
        let mut slots: SmallVec<[Slot; 4]> = prefix.iter().cloned().map(Some).collect();
        while slots.len() < width {
            slots.push(None);
        }
        Coordinate(slots)
    }

    pub fn width(&self) -> usize {
        self.0.len()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.0
    }

    pub fn get(&self, level: usize) -> Option<&Value> {
        self.0.get(level).and_then(|slot| slot.as_ref())
    }

    /// Number of leading non-`None` slots.
    pub fn depth(&self) -> usize {
        self.0.iter().take_while(|slot| slot.is_some()).count()
    }

    pub fn non_null_count(&self) -> usize {
        self.0.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_grand_total(&self) -> bool {
        self.0.iter().all(|slot| slot.is_none())
    }

    /// True when no slot is aggregated away.
    pub fn is_fully_specified(&self) -> bool {
        self.0.iter().all(|slot| slot.is_some())
    }

    /// The values of the leading non-`None` slots: the prefix that expands or
    /// collapses this node.
    pub fn node_prefix(&self) -> Vec<Value> {
        self.0.iter().map_while(|slot| slot.clone()).collect()
    }

    /// The prefix of this node's parent, or `None` for the grand total.
    pub fn parent_prefix(&self) -> Option<Vec<Value>> {
        let mut prefix = self.node_prefix();
        if prefix.is_empty() {
            return None;
        }
        prefix.pop();
        Some(prefix)
    }

    /// Whether the first `prefix.len()` slots hold exactly `prefix`.
    pub fn starts_with(&self, prefix: &[Value]) -> bool {
        prefix.len() <= self.0.len()
            && self
                .0
                .iter()
                .zip(prefix)
                .all(|(slot, value)| slot.as_ref() == Some(value))
    }

    /// Whether this coordinate sits exactly one level below the node addressed
    /// by `prefix`: it starts with `prefix` and exactly one later slot is set.
    pub fn is_child_of(&self, prefix: &[Value]) -> bool {
        self.starts_with(prefix)
            && self.0[prefix.len()..].iter().filter(|slot| slot.is_some()).count() == 1
    }
}

impl FromIterator<Slot> for Coordinate {
    fn from_iter<I: IntoIterator<Item = Slot>>(iter: I) -> Self {
        Coordinate(iter.into_iter().collect())
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, slot) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match slot {
                Some(value) => write!(f, "{}", value)?,
                None => f.write_str("*")?,
            }
        }
        f.write_str(")")
    }
}
