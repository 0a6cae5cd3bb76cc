//! FILENAME: core/cube-engine/src/codec.rs
//! Spec Codec - CubeSpec to and from a flat, URL-safe string.
//!
//! The string is `key=value` pairs joined by `&`, every key and value
//! percent-escaped. List fields repeat their key once per item:
//!
//! - `rows`, `columns`, `properties`: plain field names
//! - `measures`: `('field', 'agg')`
//! - `order`: `('field', 'asc')` or `(('field', 'agg'), 'desc')`
//! - `row_expansions`, `column_expansions`: a tuple of values per prefix
//! - `row_expand_all`, `column_expand_all`: `True` when every node is expanded
//!
//! The table is not part of the string; the caller supplies it on decode.

use std::borrow::Cow;

use log::warn;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use cube_core::Value;

use crate::definition::{Axis, CubeSpec, Expansions, Measure, OrderItem, OrderKey};
use crate::error::{CubeError, Result};
use crate::literal::{self, Literal};

/// Everything but the RFC 3986 unreserved characters gets escaped.
const WIRE_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

const ROWS: &str = "rows";
const COLUMNS: &str = "columns";
const MEASURES: &str = "measures";
const PROPERTIES: &str = "properties";
const ORDER: &str = "order";
const ROW_EXPANSIONS: &str = "row_expansions";
const COLUMN_EXPANSIONS: &str = "column_expansions";
const ROW_EXPAND_ALL: &str = "row_expand_all";
const COLUMN_EXPAND_ALL: &str = "column_expand_all";

// ============================================================================
// ENCODE
// ============================================================================

/// Serializes every field of `spec` except the table.
pub fn encode(spec: &CubeSpec) -> String {
    let mut pairs: Vec<(&str, String)> = Vec::new();

    pairs.extend(spec.rows.iter().map(|f| (ROWS, f.clone())));
    pairs.extend(spec.columns.iter().map(|f| (COLUMNS, f.clone())));
    pairs.extend(spec.measures.iter().map(|m| (MEASURES, encode_measure(m))));
    pairs.extend(spec.properties.iter().map(|f| (PROPERTIES, f.clone())));
    pairs.extend(spec.order.iter().map(|item| (ORDER, encode_order(item))));

    for (axis, list_key, all_key) in [
        (Axis::Rows, ROW_EXPANSIONS, ROW_EXPAND_ALL),
        (Axis::Columns, COLUMN_EXPANSIONS, COLUMN_EXPAND_ALL),
    ] {
        match spec.expansions(axis) {
            Expansions::All => pairs.push((all_key, "True".to_string())),
            Expansions::Prefixes(prefixes) => pairs.extend(
                prefixes
                    .iter()
                    .map(|p| (list_key, literal::encode_tuple(p.iter().map(literal::encode_value)))),
            ),
        }
    }

    pairs
        .iter()
        .map(|(key, value)| format!("{}={}", key, utf8_percent_encode(value, WIRE_ESCAPE)))
        .collect::<Vec<_>>()
        .join("&")
}

fn encode_measure(measure: &Measure) -> String {
    literal::encode_tuple([
        literal::encode_str(&measure.field),
        literal::encode_str(measure.aggregate.as_str()),
    ])
}

fn encode_order(item: &OrderItem) -> String {
    let key = match &item.key {
        OrderKey::Field(f) => literal::encode_str(f),
        OrderKey::Measure(m) => encode_measure(m),
    };
    literal::encode_tuple([key, literal::encode_str(item.direction.as_str())])
}

// ============================================================================
// DECODE
// ============================================================================

/// Rebuilds a spec from `input` and attaches `table`. Absent or empty input
/// gives the empty spec. Literals that do not parse are skipped with a
/// warning; literals of the wrong shape, unknown keys, and pairs without
/// `=` are errors.
pub fn decode(input: Option<&str>, table: Option<&str>) -> Result<CubeSpec> {
    let mut spec = CubeSpec {
        table: table.map(str::to_string),
        ..CubeSpec::default()
    };
    let Some(input) = input else {
        return Ok(spec);
    };

    for pair in input.split('&').filter(|p| !p.is_empty()) {
        let (raw_key, raw_value) = pair
            .split_once('=')
            .ok_or_else(|| CubeError::Decode(format!("missing '=' in '{}'", pair)))?;
        let key = unescape(raw_key)?;
        let value = unescape(raw_value)?;

        match key.as_str() {
            ROWS => spec.rows.push(value),
            COLUMNS => spec.columns.push(value),
            PROPERTIES => spec.properties.push(value),
            MEASURES => {
                if let Some(lit) = parse_or_skip(&key, &value) {
                    spec.measures.push(measure_from(lit)?);
                }
            }
            ORDER => {
                if let Some(lit) = parse_or_skip(&key, &value) {
                    spec.order.push(order_from(lit)?);
                }
            }
            ROW_EXPANSIONS | COLUMN_EXPANSIONS => {
                if let Some(lit) = parse_or_skip(&key, &value) {
                    let axis = if key == ROW_EXPANSIONS { Axis::Rows } else { Axis::Columns };
                    spec.expand(axis, prefix_from(lit)?);
                }
            }
            ROW_EXPAND_ALL | COLUMN_EXPAND_ALL => {
                if let Some(lit) = parse_or_skip(&key, &value) {
                    let axis = if key == ROW_EXPAND_ALL { Axis::Rows } else { Axis::Columns };
                    match lit {
                        Literal::Bool(true) => spec.expand_all(axis),
                        Literal::Bool(false) => {}
                        other => return Err(shape_error(&key, "True or False", &other)),
                    }
                }
            }
            other => {
                return Err(CubeError::Specification(format!("unknown key '{}'", other)));
            }
        }
    }
    Ok(spec)
}

/// Percent-decodes one side of a pair. `+` stands for a space.
fn unescape(raw: &str) -> Result<String> {
    let spaced: Cow<'_, str> = if raw.contains('+') {
        Cow::Owned(raw.replace('+', " "))
    } else {
        Cow::Borrowed(raw)
    };
    let decoded = percent_decode_str(&spaced)
        .decode_utf8()
        .map_err(|e| CubeError::Decode(format!("invalid UTF-8 in '{}': {}", raw, e)))?;
    Ok(decoded.into_owned())
}

fn parse_or_skip(key: &str, value: &str) -> Option<Literal> {
    match literal::parse(value) {
        Ok(lit) => Some(lit),
        Err(e) => {
            warn!("skipping unparseable {} literal '{}': {}", key, value, e);
            None
        }
    }
}

fn shape_error(key: &str, expected: &str, got: &Literal) -> CubeError {
    CubeError::Specification(format!("{} expects {}, got {:?}", key, expected, got))
}

fn measure_from(lit: Literal) -> Result<Measure> {
    match lit {
        Literal::Tuple(items) => match <[Literal; 2]>::try_from(items) {
            Ok([Literal::Str(field), Literal::Str(aggregate)]) => {
                Ok(Measure::new(field, aggregate.parse()?))
            }
            Ok(items) => Err(shape_error(MEASURES, "(field, aggregate)", &Literal::Tuple(items.into()))),
            Err(items) => Err(shape_error(MEASURES, "(field, aggregate)", &Literal::Tuple(items))),
        },
        other => Err(shape_error(MEASURES, "(field, aggregate)", &other)),
    }
}

fn order_from(lit: Literal) -> Result<OrderItem> {
    let expected = "(key, direction)";
    let items = match lit {
        Literal::Tuple(items) => items,
        other => return Err(shape_error(ORDER, expected, &other)),
    };
    let [key, direction] = <[Literal; 2]>::try_from(items)
        .map_err(|items| shape_error(ORDER, expected, &Literal::Tuple(items)))?;
    let direction = match direction {
        Literal::Str(direction) => direction,
        other => return Err(shape_error(ORDER, "a direction string", &other)),
    };
    let key = match key {
        Literal::Str(field) => OrderKey::Field(field),
        tuple @ Literal::Tuple(_) => OrderKey::Measure(measure_from(tuple)?),
        other => return Err(shape_error(ORDER, "a field or measure key", &other)),
    };
    Ok(OrderItem::new(key, direction.parse()?))
}

fn prefix_from(lit: Literal) -> Result<Vec<Value>> {
    let items = match lit {
        Literal::Tuple(items) => items,
        other => return Err(shape_error("expansions", "a tuple of values", &other)),
    };
    items
        .into_iter()
        .map(|item| match item.into_value() {
            Some(value) => Ok(value),
            None => Err(CubeError::Specification(
                "expansion prefixes may not nest tuples".to_string(),
            )),
        })
        .collect()
}
