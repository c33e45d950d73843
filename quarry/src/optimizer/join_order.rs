use std::collections::HashMap;

use super::constraints::ConstraintSet;
use super::model::{join_size, join_v_values, RelationEstimate};
use crate::errors::ExecutionError;
use crate::types::Attribute;

/// Subsets are bitmasks over relation positions, so the table has `2^n` slots.
const MAX_RELATIONS: usize = 16;

/// Best left-deep order found for one subset of relations.
#[derive(Debug, Clone)]
pub struct JoinOrderEntry {
    /// Relation positions, outermost first.
    pub order: Vec<usize>,
    pub size: f64,
    pub cost: f64,
    pub v_values: HashMap<Attribute, f64>,
}

#[derive(Debug, Clone)]
pub struct JoinOrderTable {
    entries: Vec<Option<JoinOrderEntry>>,
    full_mask: u32,
}

impl JoinOrderTable {
    /// Fills the table bottom-up. Every proper subset of a mask is numerically
    /// smaller than the mask, so ascending order visits predecessors first.
    pub fn build(
        relations: &[RelationEstimate],
        constraints: &ConstraintSet,
    ) -> Result<Self, ExecutionError> {
        let n = relations.len();
        if n == 0 || n > MAX_RELATIONS {
            return Err(ExecutionError::PlanningError(format!(
                "cannot order a join of {n} relations (1 to {MAX_RELATIONS} supported)"
            )));
        }
        let full_mask = (1u32 << n) - 1;
        let mut entries: Vec<Option<JoinOrderEntry>> = vec![None; 1usize << n];

        for mask in 1..=full_mask {
            let members: Vec<usize> = (0..n).filter(|&i| mask & (1 << i) != 0).collect();
            let entry = match members.as_slice() {
                [only] => {
                    let relation = &relations[*only];
                    JoinOrderEntry {
                        order: vec![*only],
                        size: relation.size,
                        cost: 0.0,
                        v_values: relation.v_values.clone(),
                    }
                }
                [a, b] => {
                    let (outer, inner) = if relations[*a].size <= relations[*b].size {
                        (*a, *b)
                    } else {
                        (*b, *a)
                    };
                    let Some(outer_entry) = entries[1usize << outer].as_ref() else {
                        continue;
                    };
                    extend(outer_entry, inner, 0.0, relations, constraints)
                }
                _ => {
                    let mut best: Option<(&JoinOrderEntry, usize, f64)> = None;
                    for inner in &members {
                        let rest = (mask & !(1u32 << *inner)) as usize;
                        let Some(predecessor) = entries[rest].as_ref() else {
                            continue;
                        };
                        let cost = predecessor.cost + predecessor.size;
                        if best.map_or(true, |(_, _, best_cost)| cost < best_cost) {
                            best = Some((predecessor, *inner, cost));
                        }
                    }
                    let Some((predecessor, inner, cost)) = best else {
                        continue;
                    };
                    extend(predecessor, inner, cost, relations, constraints)
                }
            };
            tracing::trace!(mask, order = ?entry.order, size = entry.size, cost = entry.cost, "join order entry");
            entries[mask as usize] = Some(entry);
        }

        Ok(Self { entries, full_mask })
    }

    pub fn get(&self, mask: u32) -> Option<&JoinOrderEntry> {
        self.entries.get(mask as usize).and_then(Option::as_ref)
    }

    /// The entry covering every relation.
    pub fn best(&self) -> Option<&JoinOrderEntry> {
        self.get(self.full_mask)
    }
}

fn extend(
    predecessor: &JoinOrderEntry,
    inner: usize,
    cost: f64,
    relations: &[RelationEstimate],
    constraints: &ConstraintSet,
) -> JoinOrderEntry {
    let relation = &relations[inner];
    let size = join_size(predecessor.size, &predecessor.v_values, relation, constraints);
    let v_values = join_v_values(&predecessor.v_values, &relation.v_values, constraints, size);
    let mut order = predecessor.order.clone();
    order.push(inner);
    JoinOrderEntry {
        order,
        size,
        cost,
        v_values,
    }
}
