//! Property-based tests for the spec codec.
//!
//! Any spec, however odd its field names and expansion values, must survive
//! an encode/decode cycle with only the table dropped.

use chrono::{NaiveDate, NaiveDateTime};
use cube_engine::codec::{decode, encode};
use cube_engine::{Aggregate, CubeSpec, Direction, Expansions, Measure, OrderItem, OrderKey, Value};
use proptest::prelude::*;

/// Field names, including characters the wire format must escape.
fn name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z_]{1,10}",
        "[ -~]{0,8}",
        any::<String>(),
    ]
}

fn aggregate_strategy() -> impl Strategy<Value = Aggregate> {
    prop::sample::select(Aggregate::ALL.to_vec())
}

fn direction_strategy() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Asc), Just(Direction::Desc)]
}

fn measure_strategy() -> impl Strategy<Value = Measure> {
    (name_strategy(), aggregate_strategy()).prop_map(|(field, agg)| Measure::new(field, agg))
}

fn date_strategy() -> impl Strategy<Value = NaiveDate> {
    // 0001-01-01 through 9999-12-31
    (1i32..=3_652_059).prop_map(|days| {
        NaiveDate::from_num_days_from_ce_opt(days).unwrap_or_default()
    })
}

fn timestamp_strategy() -> impl Strategy<Value = NaiveDateTime> {
    (date_strategy(), 0u32..86_400, 0u32..1_000_000_000).prop_map(|(date, secs, nanos)| {
        date.and_hms_nano_opt(secs / 3600, (secs / 60) % 60, secs % 60, nanos)
            .unwrap_or_default()
    })
}

fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<i64>().prop_map(Value::Integer),
        any::<f64>().prop_map(Value::number),
        any::<String>().prop_map(Value::Text),
        any::<bool>().prop_map(Value::Boolean),
        date_strategy().prop_map(Value::Date),
        timestamp_strategy().prop_map(Value::Timestamp),
        any::<i64>().prop_map(Value::Duration),
        prop::collection::vec(any::<u8>(), 0..8).prop_map(Value::Bytes),
    ]
}

fn expansions_strategy() -> impl Strategy<Value = Expansions> {
    prop_oneof![
        1 => Just(Expansions::All),
        4 => prop::collection::vec(prop::collection::vec(value_strategy(), 0..3), 0..4)
            .prop_map(Expansions::from_prefixes),
    ]
}

fn order_strategy() -> impl Strategy<Value = OrderItem> {
    let key = prop_oneof![
        name_strategy().prop_map(OrderKey::Field),
        measure_strategy().prop_map(OrderKey::Measure),
    ];
    (key, direction_strategy()).prop_map(|(key, direction)| OrderItem::new(key, direction))
}

fn spec_strategy() -> impl Strategy<Value = CubeSpec> {
    (
        prop::collection::vec(name_strategy(), 0..3),
        prop::collection::vec(name_strategy(), 0..3),
        prop::collection::vec(measure_strategy(), 0..3),
        prop::collection::vec(name_strategy(), 0..2),
        prop::collection::vec(order_strategy(), 0..3),
        expansions_strategy(),
        expansions_strategy(),
    )
        .prop_map(
            |(rows, columns, measures, properties, order, row_expansions, column_expansions)| CubeSpec {
                table: None,
                rows,
                columns,
                measures,
                properties,
                order,
                row_expansions,
                column_expansions,
            },
        )
}

proptest! {
    /// Property: decode(encode(spec)) == spec, apart from the table.
    #[test]
    fn encode_decode_round_trip(spec in spec_strategy()) {
        let wire = encode(&spec);
        let decoded = decode(Some(&wire), None).unwrap();
        prop_assert_eq!(decoded, spec);
    }

    /// Property: the table passed to decode is reattached verbatim.
    #[test]
    fn table_is_reattached(spec in spec_strategy(), table in "[a-z]{1,12}") {
        let wire = encode(&spec);
        let decoded = decode(Some(&wire), Some(&table)).unwrap();
        prop_assert_eq!(decoded.table.as_deref(), Some(table.as_str()));
    }

    /// Property: the encoded form only uses URL-unreserved characters,
    /// percent escapes, and the pair separators.
    #[test]
    fn wire_is_url_safe(spec in spec_strategy()) {
        let wire = encode(&spec);
        prop_assert!(wire
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_.~%=&".contains(&b)));
    }
}
