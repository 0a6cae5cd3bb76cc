//! End-to-end tests: spec -> plan -> cache -> grid, over an in-memory dataset.

use std::sync::{Arc, Barrier};
use std::time::Duration;

use cube_engine::codec::{decode, encode};
use cube_engine::{
    Aggregate, AggregateQuery, AggregationSource, Axis, Cell, CellKind, Coordinate, Cube,
    CubeError, CubeSpec, Dataset, Direction, EngineConfig, Expansions, FieldKind, Grid, Locale,
    MaterializedCache, Measure, MemorySource, MemoryStore, OrderKey, PlanMode, Row, Schema, Value,
};

// ============================================================================
// FIXTURES
// ============================================================================

fn sales_schema() -> Schema {
    Schema::new([
        ("category", FieldKind::Text),
        ("region", FieldKind::Text),
        ("year", FieldKind::Integer),
        ("amount", FieldKind::Number),
        ("units", FieldKind::Integer),
        ("sku", FieldKind::Text),
    ])
    .unwrap()
}

fn sales_rows() -> Vec<Row> {
    let row = |category: Option<&str>, region: &str, year: i64, amount: f64, units: i64, sku: &str| {
        vec![
            category.map(Value::text).unwrap_or(Value::Null),
            Value::text(region),
            Value::Integer(year),
            Value::number(amount),
            Value::Integer(units),
            Value::text(sku),
        ]
    };
    vec![
        row(Some("Fruit"), "North", 2023, 10.0, 1, "F-1"),
        row(Some("Fruit"), "South", 2024, 20.0, 2, "F-2"),
        row(Some("Veg"), "North", 2023, 5.0, 3, "V-1"),
        row(Some("Veg"), "North", 2024, 7.5, 4, "V-2"),
        row(Some("Dairy"), "South", 2024, 12.0, 5, "D-1"),
        row(None, "North", 2023, 1.0, 6, "X-1"),
    ]
}

fn sales_source() -> MemorySource {
    let dataset = Dataset::new(sales_schema()).with_rows(sales_rows()).unwrap();
    MemorySource::new().with_table("sales", dataset)
}

fn sales_cache() -> MaterializedCache<MemoryStore, MemorySource> {
    MaterializedCache::new(MemoryStore::new(), sales_source())
}

fn by_category() -> CubeSpec {
    CubeSpec::new("sales")
        .with_rows(["category"])
        .with_measure("amount", Aggregate::Sum)
}

fn build(spec: CubeSpec, cache: &MaterializedCache<MemoryStore, MemorySource>) -> Grid {
    Cube::new(spec, cache).build().unwrap()
}

fn text(s: &str) -> Value {
    Value::text(s)
}

fn coord(values: &[Value], width: usize) -> Coordinate {
    Coordinate::from_prefix(values, width)
}

fn labels(row: &[Cell]) -> Vec<Value> {
    row.iter().map(|c| c.value.clone()).collect()
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[test]
fn scenario_collapsed_cube_is_header_plus_total() {
    let cache = sales_cache();
    let grid = build(by_category(), &cache);

    assert_eq!(grid.row_count(), 2);
    assert_eq!(grid.header_row_count(), 1);
    assert_eq!(grid.column_count(), 2);

    let rows = grid.to_vec();
    assert_eq!(labels(&rows[0]), vec![text("category"), text("Sum of amount")]);
    assert_eq!(labels(&rows[1]), vec![text("Total"), Value::number(55.5)]);
    assert_eq!(rows[1][0].expansion, Some(vec![]));
    assert_eq!(rows[1][0].kind, CellKind::RowHeader);
}

#[test]
fn scenario_expanding_the_root_adds_one_row_per_category() {
    let cache = sales_cache();
    let mut spec = by_category();
    spec.expand_row(vec![]);
    let grid = build(spec, &cache);

    assert_eq!(grid.data_row_count(), 1 + 4);
    assert_eq!(
        grid.row_coordinates(),
        &[
            Coordinate::grand_total(1),
            coord(&[text("Dairy")], 1),
            coord(&[text("Fruit")], 1),
            coord(&[text("Veg")], 1),
            coord(&[Value::Null], 1),
        ]
    );

    let fruit = grid.row(3).unwrap();
    assert_eq!(labels(&fruit), vec![text("Fruit"), Value::number(30.0)]);
    // Leaf nodes cannot drill further.
    assert_eq!(fruit[0].expansion, None);
}

#[test]
fn scenario_two_measures_repeat_per_column_group() {
    let cache = sales_cache();
    let mut spec = by_category()
        .with_columns(["year"])
        .with_measure("units", Aggregate::Count);
    spec.expand_row(vec![]);
    spec.expand_all(Axis::Columns);
    let grid = build(spec, &cache);

    assert_eq!(grid.column_coordinates().len(), 3);
    assert_eq!(grid.column_count(), 1 + 3 * 2);
    assert_eq!(grid.header_row_count(), 2);

    let years = grid.row(0).unwrap();
    assert_eq!(
        labels(&years),
        vec![
            Value::Null,
            text("Total"),
            text("Total"),
            Value::Integer(2023),
            Value::Integer(2023),
            Value::Integer(2024),
            Value::Integer(2024),
        ]
    );

    let measures = grid.row(1).unwrap();
    assert_eq!(
        labels(&measures[1..]),
        vec![
            text("Sum of amount"),
            text("Count of units"),
            text("Sum of amount"),
            text("Count of units"),
            text("Sum of amount"),
            text("Count of units"),
        ]
    );

    for row in grid.rows().skip(grid.header_row_count()) {
        assert_eq!(row.len(), 7);
        assert!(row[1..].iter().all(|c| c.kind == CellKind::Value));
    }

    // Dairy has no 2023 sales: placeholders, one per measure.
    let dairy = grid.row(3).unwrap();
    assert_eq!(labels(&dairy[3..5]), vec![Value::Null, Value::Null]);
    assert_eq!(labels(&dairy[5..7]), vec![Value::number(12.0), Value::Integer(1)]);
}

#[test]
fn scenario_measure_order_round_trips() {
    let spec = by_category().with_order(
        OrderKey::Measure(Measure::new("amount", Aggregate::Sum)),
        Direction::Desc,
    );
    let wire = encode(&spec);
    let decoded = decode(Some(&wire), Some("sales")).unwrap();
    assert_eq!(decoded, spec);
    assert_eq!(decoded.order[0].direction, Direction::Desc);

    let cache = sales_cache();
    let mut spec = decoded;
    spec.expand_row(vec![]);
    let grid = build(spec, &cache);
    let categories: Vec<Value> = grid.row_coordinates()[1..]
        .iter()
        .map(|c| c.get(0).cloned().unwrap_or(Value::Null))
        .collect();
    assert_eq!(categories, vec![text("Fruit"), text("Veg"), text("Dairy"), Value::Null]);
}

// ============================================================================
// PROPERTIES OF THE ENGINE
// ============================================================================

#[test]
fn builds_are_idempotent_and_hit_the_cache() {
    let cache = sales_cache();
    let mut spec = by_category().with_columns(["region"]);
    spec.expand_row(vec![]);
    spec.expand_column(vec![]);

    let first = build(spec.clone(), &cache).to_vec();
    let created = cache.stats().created;
    assert_eq!(created, 4);

    let second = build(spec, &cache).to_vec();
    assert_eq!(first, second);
    assert_eq!(cache.stats().created, created);
    assert_eq!(cache.stats().hits, 4);
    assert_eq!(cache.store().table_count(), 4);
}

#[test]
fn identical_queries_share_a_materialization() {
    let cache = sales_cache();
    build(by_category(), &cache);
    let by_region = CubeSpec::new("sales")
        .with_rows(["region"])
        .with_measure("amount", Aggregate::Sum);
    build(by_region, &cache);

    // Both collapsed cubes only need the same grand-total query.
    assert_eq!(cache.store().table_count(), 1);
    assert_eq!(cache.stats().hits, 1);

    let with_units = by_category().with_measure("units", Aggregate::Sum);
    build(with_units, &cache);
    assert_eq!(cache.store().table_count(), 2);
}

#[test]
fn expanding_only_adds_children() {
    let cache = sales_cache();
    let mut spec = CubeSpec::new("sales")
        .with_rows(["category", "region"])
        .with_measure("amount", Aggregate::Sum);
    spec.expand_row(vec![]);
    let before = build(spec.clone(), &cache).row_coordinates().to_vec();

    let fruit = vec![text("Fruit")];
    spec.expand_row(fruit.clone());
    let after = build(spec, &cache).row_coordinates().to_vec();

    assert!(before.iter().all(|c| after.contains(c)));
    let added: Vec<&Coordinate> = after.iter().filter(|c| !before.contains(c)).collect();
    assert_eq!(added.len(), 2);
    assert!(added.iter().all(|c| c.is_child_of(&fruit)));

    // Children sit directly below their parent.
    let parent = after.iter().position(|c| *c == coord(&fruit, 2)).unwrap();
    assert_eq!(after[parent + 1], coord(&[text("Fruit"), text("North")], 2));
    assert_eq!(after[parent + 2], coord(&[text("Fruit"), text("South")], 2));
}

#[test]
fn expanding_under_a_collapsed_parent_adds_its_children() {
    let cache = sales_cache();
    let spec = CubeSpec::new("sales")
        .with_rows(["category", "region"])
        .with_measure("amount", Aggregate::Sum);
    let before = build(spec.clone(), &cache);
    assert_eq!(before.row_coordinates(), &[coord(&[], 2)]);

    let fruit = vec![text("Fruit")];
    let mut expanded = spec;
    expanded.expand_row(fruit.clone());
    let wire = encode(&expanded);
    let decoded = decode(Some(&wire), Some("sales")).unwrap();
    let after = build(decoded, &cache);

    assert_eq!(
        after.row_coordinates(),
        &[
            coord(&[], 2),
            coord(&[text("Fruit"), text("North")], 2),
            coord(&[text("Fruit"), text("South")], 2),
        ]
    );
    let north = coord(&[text("Fruit"), text("North")], 2);
    assert_eq!(after.value_at(&north, &coord(&[], 0), 0), Some(&Value::number(10.0)));
    assert_eq!(after.data_row_count(), before.data_row_count() + 2);
}

#[test]
fn full_and_visible_plans_build_the_same_grid() {
    let states: Vec<(Expansions, Expansions)> = vec![
        (Expansions::none(), Expansions::none()),
        (Expansions::from_prefixes([vec![]]), Expansions::none()),
        (
            Expansions::from_prefixes([vec![], vec![text("Veg")]]),
            Expansions::from_prefixes([vec![]]),
        ),
        (Expansions::from_prefixes([vec![Value::Null]]), Expansions::All),
        (
            Expansions::from_prefixes([vec![text("Veg")], vec![text("Fruit")]]),
            Expansions::none(),
        ),
        (Expansions::All, Expansions::All),
    ];

    for (rows, columns) in states {
        let mut spec = CubeSpec::new("sales")
            .with_rows(["category", "region"])
            .with_columns(["year"])
            .with_measure("amount", Aggregate::Sum)
            .with_measure("units", Aggregate::Max)
            .with_property("sku")
            .with_order(
                OrderKey::Measure(Measure::new("amount", Aggregate::Sum)),
                Direction::Desc,
            );
        spec.row_expansions = rows;
        spec.column_expansions = columns;

        let cache = sales_cache();
        let full = Cube::new(spec.clone(), &cache)
            .with_config(EngineConfig::default().with_plan_mode(PlanMode::Full))
            .build()
            .unwrap();
        let visible = Cube::new(spec.clone(), &cache)
            .with_config(EngineConfig::default().with_plan_mode(PlanMode::Visible))
            .build()
            .unwrap();

        assert_eq!(full.to_vec(), visible.to_vec(), "{:?}", spec);
        assert_eq!(full.row_coordinates(), visible.row_coordinates());
        assert!(Cube::new(spec.clone(), &cache).plan().unwrap().len() <= 3 * 2);
    }
}

#[test]
fn null_group_is_not_the_grand_total() {
    let cache = sales_cache();
    let mut spec = CubeSpec::new("sales")
        .with_rows(["category", "region"])
        .with_measure("amount", Aggregate::Sum);
    spec.expand_row(vec![]);
    spec.expand_row(vec![Value::Null]);
    let grid = build(spec, &cache);

    let null_node = coord(&[Value::Null], 2);
    let total = Coordinate::grand_total(2);
    let column = Coordinate::grand_total(0);
    assert_ne!(null_node, total);
    assert_eq!(grid.value_at(&null_node, &column, 0), Some(&Value::number(1.0)));
    assert_eq!(grid.value_at(&total, &column, 0), Some(&Value::number(55.5)));
    assert!(grid
        .row_coordinates()
        .contains(&coord(&[Value::Null, text("North")], 2)));
}

#[test]
fn properties_fill_leaf_rows_only() {
    let cache = sales_cache();
    let mut spec = CubeSpec::new("sales")
        .with_rows(["category", "region"])
        .with_measure("amount", Aggregate::Sum)
        .with_property("sku");
    spec.expand_all(Axis::Rows);
    let grid = build(spec, &cache);

    assert_eq!(grid.left_width(), 3);
    for (coordinate, row) in grid
        .row_coordinates()
        .iter()
        .zip(grid.rows().skip(grid.header_row_count()))
    {
        if coordinate.is_fully_specified() {
            assert!(!row[2].is_blank(), "{} should carry its sku", coordinate);
        } else {
            assert!(row[2].is_blank());
        }
    }

    let veg_north = grid
        .row_coordinates()
        .iter()
        .position(|c| *c == coord(&[text("Veg"), text("North")], 2))
        .unwrap();
    let row = grid.row(grid.header_row_count() + veg_north).unwrap();
    // Two products share the node: the minimum sku represents it.
    assert_eq!(row[2].value, text("V-1"));
    assert_eq!(row[1].properties, Some(vec![text("V-1")]));
}

#[test]
fn header_spans_merge_repeated_labels() {
    let cache = sales_cache();
    let mut spec = by_category()
        .with_columns(["year"])
        .with_measure("units", Aggregate::Sum);
    spec.expand_all(Axis::Columns);
    let grid = build(spec, &cache);

    let spans = grid.header_spans(0);
    let widths: Vec<usize> = spans.iter().map(|s| s.len).collect();
    assert_eq!(widths, vec![1, 2, 2, 2]);
}

#[test]
fn formatting_follows_the_locale() {
    let cache = sales_cache();
    let mut spec = CubeSpec::new("sales")
        .with_rows(["category"])
        .with_measure("units", Aggregate::Avg);
    spec.expand_row(vec![]);
    let grid = build(spec, &cache);

    let total = grid.row(1).unwrap();
    assert_eq!(total[1].formatted(&Locale::en_us()), "3.50");
    assert_eq!(total[1].formatted(&Locale::de_de()), "3,50");
}

#[test]
fn custom_total_label() {
    let cache = sales_cache();
    let config = EngineConfig::default().with_total_label("All sales");
    let grid = Cube::new(by_category(), &cache).with_config(config).build().unwrap();
    assert_eq!(grid.row(1).unwrap()[0].value, text("All sales"));
}

// ============================================================================
// ERRORS
// ============================================================================

#[test]
fn schema_checks_reject_bad_specs_before_querying() {
    let cache = sales_cache();
    let schema = sales_schema();

    let unknown = CubeSpec::new("sales").with_rows(["colour"]);
    let err = Cube::new(unknown, &cache).with_schema(&schema).build().unwrap_err();
    assert!(matches!(err, CubeError::UnknownField(_)));

    let avg_text = CubeSpec::new("sales").with_measure("category", Aggregate::Avg);
    let err = Cube::new(avg_text, &cache).with_schema(&schema).build().unwrap_err();
    assert!(matches!(err, CubeError::AggregationType { .. }));

    let mut too_long = by_category();
    too_long.expand_row(vec![text("Fruit"), text("North")]);
    let err = Cube::new(too_long, &cache).build().unwrap_err();
    assert!(matches!(err, CubeError::InvalidExpansion { axis: "row", .. }));

    assert_eq!(cache.store().table_count(), 0);
}

#[test]
fn aggregation_type_errors_come_from_the_source_without_a_schema() {
    let cache = sales_cache();
    let spec = CubeSpec::new("sales").with_measure("region", Aggregate::Sum);
    let err = Cube::new(spec, &cache).build().unwrap_err();
    assert!(matches!(err, CubeError::PlanQuery { index: 0, total: 1, .. }));
    assert!(matches!(err.root(), CubeError::AggregationType { .. }));
}

/// A source that takes a fixed time per query and honours the timeout.
struct SlowSource {
    inner: MemorySource,
    delay: Duration,
}

impl AggregationSource for SlowSource {
    fn select(&self, query: &AggregateQuery, timeout: Option<Duration>) -> cube_engine::Result<Vec<Row>> {
        if let Some(limit) = timeout {
            if self.delay > limit {
                std::thread::sleep(limit);
                return Err(CubeError::Timeout { limit });
            }
        }
        std::thread::sleep(self.delay);
        self.inner.select(query, timeout)
    }
}

#[test]
fn timeouts_abort_the_build() {
    let source = SlowSource {
        inner: sales_source(),
        delay: Duration::from_millis(50),
    };
    let cache = MaterializedCache::new(MemoryStore::new(), source);
    let config = EngineConfig::default().with_timeout(Duration::from_millis(5));
    let err = Cube::new(by_category(), &cache).with_config(config).build().unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(cache.store().table_count(), 0);

    let relaxed = EngineConfig::default().with_timeout(Duration::from_secs(5));
    assert!(Cube::new(by_category(), &cache).with_config(relaxed).build().is_ok());
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn concurrent_gets_materialize_once() {
    const THREADS: usize = 8;
    let cache = MaterializedCache::new(
        MemoryStore::new(),
        SlowSource {
            inner: sales_source(),
            delay: Duration::from_millis(20),
        },
    );
    let spec = by_category();
    let plan = Cube::new(spec, &cache).plan().unwrap();
    let query = plan.queries[0].query.clone();
    let barrier = Barrier::new(THREADS);

    let results: Vec<Arc<Vec<Row>>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    cache.get("sales", &query, None).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(cache.store().table_count(), 1);
    assert_eq!(cache.stats().created, 1);
    assert_eq!(cache.stats().hits, THREADS as u64 - 1);
    assert!(results.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn concurrent_builds_agree() {
    let cache = sales_cache();
    let mut spec = by_category().with_columns(["year"]);
    spec.expand_row(vec![]);
    spec.expand_all(Axis::Columns);

    let grids: Vec<Vec<Vec<Cell>>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| build(spec.clone(), &cache).to_vec()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(grids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(cache.stats().created, 4);
}
