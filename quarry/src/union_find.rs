//! Equivalence classes of attributes linked by equality predicates.
use std::collections::HashMap;

use crate::types::Attribute;

/// One class: its member attributes and the value range they share.
///
/// Bounds are inclusive and kept as `i64` so that strict comparisons against
/// extreme `i32` literals can be shifted by one without overflow.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnionFindElement {
    pub attributes: Vec<Attribute>,
    pub lower: Option<i64>,
    pub upper: Option<i64>,
    pub equality: Option<i64>,
}

impl UnionFindElement {
    fn singleton(attribute: Attribute) -> Self {
        Self {
            attributes: vec![attribute],
            ..Self::default()
        }
    }

    pub fn tighten_lower(&mut self, value: i64) {
        self.lower = Some(self.lower.map_or(value, |low| low.max(value)));
        self.settle();
    }

    pub fn tighten_upper(&mut self, value: i64) {
        self.upper = Some(self.upper.map_or(value, |high| high.min(value)));
        self.settle();
    }

    pub fn set_equality(&mut self, value: i64) {
        self.tighten_lower(value);
        self.tighten_upper(value);
    }

    /// True when no value satisfies both bounds.
    pub fn is_empty(&self) -> bool {
        matches!((self.lower, self.upper), (Some(low), Some(high)) if low > high)
    }

    fn absorb(&mut self, other: UnionFindElement) {
        self.attributes.extend(other.attributes);
        if let Some(low) = other.lower {
            self.tighten_lower(low);
        }
        if let Some(high) = other.upper {
            self.tighten_upper(high);
        }
    }

    fn settle(&mut self) {
        self.equality = match (self.lower, self.upper) {
            (Some(low), Some(high)) if low == high => Some(low),
            _ => None,
        };
    }
}

/// Disjoint sets over attributes with path compression and union by size.
#[derive(Debug, Default, Clone)]
pub struct UnionFind {
    index: HashMap<Attribute, usize>,
    parent: Vec<usize>,
    /// Class data, present at root slots only.
    elements: Vec<Option<UnionFindElement>>,
}

impl UnionFind {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, attribute: &Attribute) -> usize {
        if let Some(slot) = self.index.get(attribute) {
            return *slot;
        }
        let slot = self.parent.len();
        self.index.insert(attribute.clone(), slot);
        self.parent.push(slot);
        self.elements
            .push(Some(UnionFindElement::singleton(attribute.clone())));
        slot
    }

    fn root(&mut self, mut slot: usize) -> usize {
        let mut top = slot;
        while self.parent[top] != top {
            top = self.parent[top];
        }
        while self.parent[slot] != top {
            let next = self.parent[slot];
            self.parent[slot] = top;
            slot = next;
        }
        top
    }

    /// The class of `attribute`, creating a singleton class on first sight.
    pub fn find(&mut self, attribute: &Attribute) -> &mut UnionFindElement {
        let slot = self.slot(attribute);
        let root = self.root(slot);
        self.elements[root]
            .get_or_insert_with(UnionFindElement::default)
    }

    /// The class of `attribute` if it has been seen.
    pub fn get(&self, attribute: &Attribute) -> Option<&UnionFindElement> {
        let mut slot = *self.index.get(attribute)?;
        while self.parent[slot] != slot {
            slot = self.parent[slot];
        }
        self.elements[slot].as_ref()
    }

    /// Merges the classes of `a` and `b`; their ranges intersect.
    pub fn union(&mut self, a: &Attribute, b: &Attribute) {
        let slot_a = self.slot(a);
        let slot_b = self.slot(b);
        let (root_a, root_b) = (self.root(slot_a), self.root(slot_b));
        if root_a == root_b {
            return;
        }
        let size = |elements: &[Option<UnionFindElement>], root: usize| {
            elements[root].as_ref().map_or(0, |e| e.attributes.len())
        };
        let (keep, merge) = if size(&self.elements, root_a) >= size(&self.elements, root_b) {
            (root_a, root_b)
        } else {
            (root_b, root_a)
        };
        self.parent[merge] = keep;
        if let Some(merged) = self.elements[merge].take() {
            if let Some(kept) = self.elements[keep].as_mut() {
                kept.absorb(merged);
            }
        }
    }

    pub fn same_class(&self, a: &Attribute, b: &Attribute) -> bool {
        match (self.get(a), self.get(b)) {
            (Some(x), Some(y)) => std::ptr::eq(x, y),
            _ => false,
        }
    }

    /// Every class, ordered by the first time any of its attributes was seen.
    pub fn elements(&self) -> Vec<&UnionFindElement> {
        let mut roots: Vec<usize> = Vec::new();
        for start in 0..self.parent.len() {
            let mut slot = start;
            while self.parent[slot] != slot {
                slot = self.parent[slot];
            }
            if !roots.contains(&slot) {
                roots.push(slot);
            }
        }
        roots
            .into_iter()
            .filter_map(|root| self.elements[root].as_ref())
            .collect()
    }
}
