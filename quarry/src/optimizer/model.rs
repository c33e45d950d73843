//! Cost and cardinality model.
//!
//! Costs are in page reads. Cardinalities come from per-column `[min, max]`
//! statistics, assuming values spread uniformly over that range.
use std::collections::HashMap;

use super::constraints::ConstraintSet;
use crate::catalog::{ColumnStats, IndexInfo, TableInfo, TableStats};
use crate::types::Attribute;

/// Pages read descending from the root of an index to its first leaf.
const INDEX_DESCENT_COST: f64 = 3.0;

pub fn scan_cost(stats: &TableStats) -> f64 {
    stats.pages as f64
}

/// Clustered: the matching tuples sit on `pages * r` consecutive pages.
/// Unclustered: `leaves * r` leaf pages plus one page read per matching tuple.
pub fn index_scan_cost(index: &IndexInfo, stats: &TableStats, leaves: u32, reduction: f64) -> f64 {
    if index.clustered {
        INDEX_DESCENT_COST + stats.pages as f64 * reduction
    } else {
        INDEX_DESCENT_COST + leaves as f64 * reduction + stats.rows as f64 * reduction
    }
}

/// Share of the column's domain that falls inside `[low, high]`.
pub fn reduction_factor(stats: ColumnStats, low: Option<i64>, high: Option<i64>) -> f64 {
    let min = i64::from(stats.min);
    let max = i64::from(stats.max);
    let low = low.map_or(min, |v| v.max(min));
    let high = high.map_or(max, |v| v.min(max));
    if high < low {
        return 0.0;
    }
    ((high - low + 1) as f64 / stats.domain()).min(1.0)
}

/// Estimated output of one base relation after its own predicates.
#[derive(Debug, Clone)]
pub struct RelationEstimate {
    pub alias: String,
    pub size: f64,
    /// Estimated distinct values per attribute.
    pub v_values: HashMap<Attribute, f64>,
}

pub fn estimate_relation(alias: &str, table: &TableInfo, constraints: &ConstraintSet) -> RelationEstimate {
    let mut size = table.stats.rows as f64;
    let mut extents = Vec::with_capacity(table.columns.len());
    for (column, stats) in table.columns.iter().zip(&table.stats.columns) {
        let attribute = Attribute::new(alias, column.as_str());
        let (reduction, extent) = match constraints.class_of(&attribute) {
            Some(class) if class.is_empty() => (0.0, 0.0),
            Some(class) => {
                let r = reduction_factor(*stats, class.lower, class.upper);
                (r, r * stats.domain())
            }
            None => (1.0, stats.domain()),
        };
        size *= reduction;
        extents.push((attribute, extent));
    }
    let v_values = extents
        .into_iter()
        .map(|(attribute, extent)| (attribute, clamp_v(extent, size)))
        .collect();
    RelationEstimate {
        alias: alias.to_string(),
        size,
        v_values,
    }
}

fn clamp_v(v: f64, size: f64) -> f64 {
    v.min(size).max(1.0)
}

/// `outer × inner / Π max V`, one factor per attribute class that links the
/// two sides through an equality.
pub fn join_size(
    outer_size: f64,
    outer_v: &HashMap<Attribute, f64>,
    inner: &RelationEstimate,
    constraints: &ConstraintSet,
) -> f64 {
    let mut denominator = 1.0;
    for class in constraints.classes() {
        let outer_max = class
            .attributes
            .iter()
            .filter_map(|a| outer_v.get(a))
            .copied()
            .reduce(f64::max);
        let inner_max = class
            .attributes
            .iter()
            .filter_map(|a| inner.v_values.get(a))
            .copied()
            .reduce(f64::max);
        if let (Some(o), Some(i)) = (outer_max, inner_max) {
            denominator *= o.max(i).max(1.0);
        }
    }
    outer_size * inner.size / denominator
}

/// V-values of a join result: attributes of one class share the smallest V of
/// the class, and no V exceeds the result size.
pub fn join_v_values(
    outer_v: &HashMap<Attribute, f64>,
    inner_v: &HashMap<Attribute, f64>,
    constraints: &ConstraintSet,
    size: f64,
) -> HashMap<Attribute, f64> {
    let mut merged: HashMap<Attribute, f64> = outer_v
        .iter()
        .chain(inner_v.iter())
        .map(|(a, v)| (a.clone(), *v))
        .collect();
    for class in constraints.classes() {
        let smallest = class
            .attributes
            .iter()
            .filter_map(|a| merged.get(a))
            .copied()
            .reduce(f64::min);
        if let Some(smallest) = smallest {
            for attribute in &class.attributes {
                if let Some(v) = merged.get_mut(attribute) {
                    *v = smallest;
                }
            }
        }
    }
    for v in merged.values_mut() {
        *v = clamp_v(*v, size);
    }
    merged
}
