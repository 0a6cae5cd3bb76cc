//! FILENAME: core/cube-engine/src/query.rs
//! Query Planning - Turns a cube spec into grouped aggregate queries.
//!
//! Each axis with dimensions `[d1 .. dn]` contributes the `n + 1` prefix
//! levels `[]`, `[d1]`, `[d1, d2]`, ... The plan is the product of the row
//! levels and the column levels; every query groups by the union of its two
//! levels and selects every measure and property.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::definition::{CubeSpec, Direction, Measure, OrderItem, OrderKey};

/// The group-by fields of one drill level.
pub type Level = Vec<String>;

/// Which levels get planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
    /// Every row level crossed with every column level.
    Full,
    /// Only levels that hold visible nodes, or their ancestors, under the
    /// current expansions.
    Visible,
}

impl Default for PlanMode {
    fn default() -> Self {
        PlanMode::Visible
    }
}

// ============================================================================
// AGGREGATE QUERY
// ============================================================================

/// One grouped aggregate query against the backing dataset.
///
/// Result rows hold one value per `group_by` field, then one per measure,
/// then one per property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateQuery {
    pub table: String,
    pub group_by: Vec<String>,
    pub measures: Vec<Measure>,
    /// Fields reduced with MIN to one representative value.
    pub properties: Vec<String>,
    pub order_by: Vec<OrderItem>,
}

impl AggregateQuery {
    /// Number of values in each result row.
    pub fn row_width(&self) -> usize {
        self.group_by.len() + self.measures.len() + self.properties.len()
    }

    /// Result column holding `key`, if the key is part of this query.
    pub fn column_of(&self, key: &OrderKey) -> Option<usize> {
        match key {
            OrderKey::Field(f) => self.group_by.iter().position(|g| g == f),
            OrderKey::Measure(m) => self
                .measures
                .iter()
                .position(|q| q == m)
                .map(|i| self.group_by.len() + i),
        }
    }

    /// Renders the query as SQL text. The text is stable for equal queries
    /// and is what the materialized cache fingerprints.
    pub fn to_sql(&self) -> String {
        let mut select: Vec<String> = self.group_by.iter().map(|f| quote_ident(f)).collect();
        for m in &self.measures {
            select.push(format!(
                "{}({}) AS {}",
                m.aggregate.as_str().to_ascii_uppercase(),
                quote_ident(&m.field),
                quote_ident(&m.alias())
            ));
        }
        for p in &self.properties {
            select.push(format!("MIN({}) AS {}", quote_ident(p), quote_ident(&format!("{}__min", p))));
        }
        if select.is_empty() {
            select.push("COUNT(*)".to_string());
        }

        let mut sql = format!("SELECT {} FROM {}", select.join(", "), quote_ident(&self.table));
        if !self.group_by.is_empty() {
            let group: Vec<String> = self.group_by.iter().map(|f| quote_ident(f)).collect();
            let _ = write!(sql, " GROUP BY {}", group.join(", "));
        }
        if !self.order_by.is_empty() {
            let order: Vec<String> = self
                .order_by
                .iter()
                .map(|item| {
                    let column = match &item.key {
                        OrderKey::Field(f) => quote_ident(f),
                        OrderKey::Measure(m) => quote_ident(&m.alias()),
                    };
                    format!("{} {}", column, item.direction.as_str().to_ascii_uppercase())
                })
                .collect();
            let _ = write!(sql, " ORDER BY {}", order.join(", "));
        }
        sql
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// ============================================================================
// PLAN
// ============================================================================

/// The prefix levels of one axis: `dimensions.len() + 1` entries.
pub fn axis_levels(dimensions: &[String]) -> Vec<Level> {
    (0..=dimensions.len()).map(|i| dimensions[..i].to_vec()).collect()
}

/// A query tagged with the drill levels it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedQuery {
    pub row_level: usize,
    pub column_level: usize,
    pub query: AggregateQuery,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    pub row_levels: Vec<Level>,
    pub column_levels: Vec<Level>,
    pub queries: Vec<PlannedQuery>,
}

impl QueryPlan {
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

/// Plans the drill-level queries for `spec` against `table`.
pub fn plan(spec: &CubeSpec, table: &str, mode: PlanMode) -> QueryPlan {
    let row_levels = axis_levels(&spec.rows);
    let column_levels = axis_levels(&spec.columns);
    let mut queries = Vec::new();

    for (row_level, row_fields) in row_levels.iter().enumerate() {
        if mode == PlanMode::Visible && !spec.row_expansions.level_is_needed(row_level) {
            continue;
        }
        for (column_level, column_fields) in column_levels.iter().enumerate() {
            if mode == PlanMode::Visible && !spec.column_expansions.level_is_needed(column_level) {
                continue;
            }
            let group_by: Vec<String> = row_fields.iter().chain(column_fields).cloned().collect();
            let order_by = order_for(spec, &group_by);
            queries.push(PlannedQuery {
                row_level,
                column_level,
                query: AggregateQuery {
                    table: table.to_string(),
                    group_by,
                    measures: spec.measures.clone(),
                    properties: spec.properties.clone(),
                    order_by,
                },
            });
        }
    }

    QueryPlan {
        row_levels,
        column_levels,
        queries,
    }
}

/// The spec's order entries that apply to a query grouped by `group_by`,
/// followed by the remaining group-by fields ascending so results are stable.
fn order_for(spec: &CubeSpec, group_by: &[String]) -> Vec<OrderItem> {
    let mut order: Vec<OrderItem> = spec
        .order
        .iter()
        .filter(|item| match &item.key {
            OrderKey::Field(f) => group_by.contains(f),
            OrderKey::Measure(m) => spec.measures.contains(m),
        })
        .cloned()
        .collect();

    for field in group_by {
        let key = OrderKey::Field(field.clone());
        if !order.iter().any(|item| item.key == key) {
            order.push(OrderItem::new(key, Direction::Asc));
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{Aggregate, Expansions};
    use cube_core::Value;

    fn spec() -> CubeSpec {
        CubeSpec::new("sales")
            .with_rows(["region", "product"])
            .with_columns(["year"])
            .with_measure("amount", Aggregate::Sum)
            .with_property("note")
    }

    #[test]
    fn an_axis_has_one_more_level_than_dimensions() {
        for n in 0..5 {
            let dims: Vec<String> = (0..n).map(|i| format!("d{}", i)).collect();
            let levels = axis_levels(&dims);
            assert_eq!(levels.len(), n + 1);
            assert!(levels[0].is_empty());
            assert_eq!(levels[n], dims);
        }
    }

    #[test]
    fn full_plan_is_the_level_product() {
        let p = plan(&spec(), "sales", PlanMode::Full);
        assert_eq!(p.len(), 3 * 2);
        let deepest = &p.queries[5].query;
        assert_eq!(deepest.group_by, vec!["region", "product", "year"]);
        assert_eq!(deepest.row_width(), 3 + 1 + 1);
    }

    #[test]
    fn visible_plan_skips_unreachable_levels() {
        let mut s = spec();
        assert_eq!(plan(&s, "sales", PlanMode::Visible).len(), 1);

        s.row_expansions = Expansions::from_prefixes([vec![]]);
        let p = plan(&s, "sales", PlanMode::Visible);
        let levels: Vec<_> = p.queries.iter().map(|q| (q.row_level, q.column_level)).collect();
        assert_eq!(levels, vec![(0, 0), (1, 0)]);

        // Level 1 orders the parents of the visible level-2 rows.
        s.row_expansions = Expansions::from_prefixes([vec![Value::text("North")]]);
        s.column_expansions = Expansions::from_prefixes([vec![]]);
        let p = plan(&s, "sales", PlanMode::Visible);
        let levels: Vec<_> = p.queries.iter().map(|q| (q.row_level, q.column_level)).collect();
        assert_eq!(
            levels,
            vec![(0, 0), (0, 1), (1, 0), (1, 1), (2, 0), (2, 1)]
        );

        s.column_expansions = Expansions::none();
        assert_eq!(plan(&s, "sales", PlanMode::Visible).len(), 3);
    }

    #[test]
    fn order_entries_on_absent_fields_are_dropped() {
        let s = spec()
            .with_order(OrderKey::Field("product".into()), Direction::Desc)
            .with_order(
                OrderKey::Measure(Measure::new("amount", Aggregate::Sum)),
                Direction::Desc,
            );
        let p = plan(&s, "sales", PlanMode::Full);

        let grand_total = &p.queries[0].query;
        assert_eq!(grand_total.order_by.len(), 1);
        assert!(matches!(grand_total.order_by[0].key, OrderKey::Measure(_)));

        let by_region = &p.queries[2].query;
        assert_eq!(by_region.group_by, vec!["region"]);
        let keys: Vec<String> = by_region.order_by.iter().map(|o| o.key.to_string()).collect();
        assert_eq!(keys, vec!["sum(amount)", "region"]);

        let by_product = &p.queries[4].query;
        let keys: Vec<String> = by_product.order_by.iter().map(|o| o.key.to_string()).collect();
        assert_eq!(keys, vec!["product", "sum(amount)", "region"]);
        assert_eq!(by_product.order_by[0].direction, Direction::Desc);
    }

    #[test]
    fn sql_text_is_deterministic() {
        let p = plan(&spec(), "sales", PlanMode::Full);
        let q = &p.queries[3].query;
        assert_eq!(
            q.to_sql(),
            "SELECT \"region\", \"year\", SUM(\"amount\") AS \"amount__sum\", \
             MIN(\"note\") AS \"note__min\" FROM \"sales\" \
             GROUP BY \"region\", \"year\" ORDER BY \"region\" ASC, \"year\" ASC"
        );
        assert_eq!(q.to_sql(), q.clone().to_sql());
        assert_ne!(q.to_sql(), p.queries[2].query.to_sql());
    }

    #[test]
    fn queries_are_usable_as_set_keys() {
        let s = spec().with_order(
            OrderKey::Measure(Measure::new("amount", Aggregate::Sum)),
            Direction::Desc,
        );
        let p = plan(&s, "sales", PlanMode::Full);
        let mut seen = rustc_hash::FxHashSet::default();
        for planned in p.queries.iter().chain(p.queries.iter()) {
            seen.insert(planned.query.clone());
        }
        assert_eq!(seen.len(), p.len());
        assert!(seen.contains(&p.queries[0].query));
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn column_of_resolves_keys() {
        let p = plan(&spec(), "sales", PlanMode::Full);
        let q = &p.queries[3].query;
        assert_eq!(q.column_of(&OrderKey::Field("year".into())), Some(1));
        assert_eq!(
            q.column_of(&OrderKey::Measure(Measure::new("amount", Aggregate::Sum))),
            Some(2)
        );
        assert_eq!(q.column_of(&OrderKey::Field("product".into())), None);
    }
}
