// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Deterministic total order over instance plans for update execution.
//!
//! The bootstrap instance sorts first unconditionally (other instances
//! discover its registered state), then plans group by availability zone
//! name — no az is its own group, ahead of named ones — and order by uuid
//! within a group. The order is reproducible across retries for any input
//! permutation.

use crate::plan::InstancePlan;

pub struct InstancePlanSorter;

impl InstancePlanSorter {
    pub fn sort(mut plans: Vec<InstancePlan>) -> Vec<InstancePlan> {
        plans.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
        plans
    }
}

fn sort_key(plan: &InstancePlan) -> (bool, Option<String>, String) {
    let bootstrap =
        plan.instance().map_or(false, |instance| instance.is_bootstrap());
    let az = plan
        .instance()
        .and_then(|instance| instance.az_name().map(str::to_string))
        .or_else(|| {
            plan.existing_instance()
                .and_then(|record| record.availability_zone.clone())
        });
    let uuid = plan
        .instance()
        .map(|instance| instance.uuid().to_string())
        .or_else(|| {
            plan.existing_instance().map(|record| record.uuid.clone())
        })
        .unwrap_or_default();
    (!bootstrap, az, uuid)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::example::ExampleDeployment;
    use proptest::prelude::*;
    use test_strategy::proptest;

    fn uuids(plans: &[InstancePlan]) -> Vec<String> {
        plans
            .iter()
            .map(|plan| plan.instance().unwrap().uuid().to_string())
            .collect()
    }

    #[test]
    fn bootstrap_sorts_first_then_az_then_uuid() {
        let example = ExampleDeployment::new("simple");
        let plans = vec![
            example.synthetic_plan(Some("z2"), "cccc", false),
            example.synthetic_plan(Some("z1"), "dddd", false),
            // Bootstrap lives in the later az but still sorts first.
            example.synthetic_plan(Some("z2"), "aaaa", true),
            example.synthetic_plan(None, "bbbb", false),
            example.synthetic_plan(Some("z1"), "aaab", false),
        ];
        let sorted = InstancePlanSorter::sort(plans);
        assert_eq!(
            uuids(&sorted),
            vec!["aaaa", "bbbb", "aaab", "dddd", "cccc"]
        );
    }

    #[proptest]
    fn sort_is_invariant_under_permutation(
        #[strategy(proptest::collection::vec((proptest::option::of(0u8..3), 0u32..1000), 1..12))]
        slots: Vec<(Option<u8>, u32)>,
        bootstrap_slot: proptest::sample::Index,
        shuffle_seed: u64,
    ) {
        let example = ExampleDeployment::new("simple");
        let bootstrap = bootstrap_slot.index(slots.len());

        let build = |order: &[usize]| {
            let plans = order
                .iter()
                .map(|&i| {
                    let (az, uuid) = &slots[i];
                    let az = az.map(|n| format!("z{n}"));
                    example.synthetic_plan(
                        az.as_deref(),
                        // Slot position keeps uuids unique even when the
                        // generated values collide.
                        &format!("{uuid:08}-{i}"),
                        i == bootstrap,
                    )
                })
                .collect::<Vec<_>>();
            uuids(&InstancePlanSorter::sort(plans))
        };

        let input_order: Vec<usize> = (0..slots.len()).collect();
        let mut shuffled = input_order.clone();
        // Deterministic Fisher-Yates driven by the generated seed.
        let mut state = shuffle_seed | 1;
        for i in (1..shuffled.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let j = (state >> 33) as usize % (i + 1);
            shuffled.swap(i, j);
        }

        prop_assert_eq!(build(&input_order), build(&shuffled));
    }
}
