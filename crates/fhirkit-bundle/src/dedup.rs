//! Coalescing of identical reads inside one bucket wave.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::route::{ResolvedRoute, RouteDescriptor};

/// An entry that is ready to dispatch.
#[derive(Debug, Clone)]
pub struct DedupCandidate {
    pub index: usize,
    pub route: ResolvedRoute,
    /// Cleared for entries whose result depends on their own headers.
    pub coalesce: bool,
}

/// One dispatch and every entry position that receives its response.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchUnit {
    pub route: ResolvedRoute,
    /// Never empty; the first index is the entry whose body and headers are dispatched.
    pub indices: Vec<usize>,
}

impl DispatchUnit {
    pub fn leader(&self) -> usize {
        self.indices[0]
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionPlan {
    pub units: Vec<DispatchUnit>,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Number of entries that ride on another entry's dispatch.
    pub fn coalesced(&self) -> usize {
        self.units.iter().map(|u| u.indices.len() - 1).sum()
    }
}

pub struct RouteDeduplicator;

impl RouteDeduplicator {
    /// Groups GET and HEAD candidates with equal descriptors into one unit.
    /// Every other candidate gets a unit of its own. Units keep first-seen order.
    pub fn plan(candidates: impl IntoIterator<Item = DedupCandidate>) -> ExecutionPlan {
        let mut units: Vec<DispatchUnit> = Vec::new();
        let mut key_to_unit: HashMap<RouteDescriptor, usize> = HashMap::new();

        for candidate in candidates {
            if candidate.coalesce && candidate.route.method().is_idempotent_read() {
                match key_to_unit.entry(candidate.route.descriptor.clone()) {
                    Entry::Occupied(existing) => {
                        units[*existing.get()].indices.push(candidate.index);
                        continue;
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(units.len());
                    }
                }
            }
            units.push(DispatchUnit {
                route: candidate.route,
                indices: vec![candidate.index],
            });
        }

        ExecutionPlan { units }
    }
}
