// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Instance-index allocation for one instance group's planning call.
//!
//! Seeded with every index in use across the whole group (including records
//! headed for obsolescence, whose indices stay claimed until teardown), so
//! that concurrently-constructed plans can never collide. Single authority:
//! the planner is the only caller.

use director_types::ExistingInstanceRecord;
use std::collections::BTreeSet;

#[derive(Debug)]
pub struct IndexAssigner {
    in_use: BTreeSet<i32>,
}

impl IndexAssigner {
    pub fn new<'a>(
        existing_records: impl Iterator<Item = &'a ExistingInstanceRecord>,
    ) -> Self {
        Self { in_use: existing_records.map(|r| r.index).collect() }
    }

    /// Record that a matched plan keeps its inherited index.
    pub fn claim(&mut self, index: i32) {
        self.in_use.insert(index);
    }

    /// Lowest non-negative index not currently claimed. Claims it.
    pub fn next_free(&mut self) -> i32 {
        let mut candidate = 0;
        for &used in &self.in_use {
            if used > candidate {
                break;
            }
            if used == candidate {
                candidate += 1;
            }
        }
        self.in_use.insert(candidate);
        candidate
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::example::example_record;

    #[test]
    fn next_free_skips_indices_of_all_existing_records() {
        let records = vec![
            example_record("web", 0, Some("old")),
            example_record("web", 1, Some("old")),
        ];
        let mut assigner = IndexAssigner::new(records.iter());
        // Indices 0 and 1 stay claimed even though their records are headed
        // for obsolescence.
        assert_eq!(assigner.next_free(), 2);
        assert_eq!(assigner.next_free(), 3);
    }

    #[test]
    fn next_free_fills_gaps_from_the_bottom() {
        let records = vec![
            example_record("web", 1, None),
            example_record("web", 3, None),
        ];
        let mut assigner = IndexAssigner::new(records.iter());
        assert_eq!(assigner.next_free(), 0);
        assert_eq!(assigner.next_free(), 2);
        assert_eq!(assigner.next_free(), 4);
    }

    #[test]
    fn claim_reserves_an_inherited_index() {
        let mut assigner = IndexAssigner::new(std::iter::empty());
        assigner.claim(0);
        assert_eq!(assigner.next_free(), 1);
    }
}
