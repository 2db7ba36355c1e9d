//! Property tests for snapshot integrity invariants.

use std::collections::HashMap;

use keel_core::{Manifest, PropertyMap, ResourceState, ResourceStatus, Snapshot, Urn};
use proptest::prelude::*;

fn urn(i: usize) -> Urn {
    Urn::new("dev", "web", None, "test:index:Thing", &format!("r{i}"))
}

/// Generates a valid snapshot: each resource may only point at resources
/// generated before it.
fn arb_valid_snapshot() -> impl Strategy<Value = Snapshot> {
    prop::collection::vec(
        (
            any::<prop::sample::Index>(),
            prop::collection::vec(any::<prop::sample::Index>(), 0..3),
            any::<bool>(),
        ),
        1..24,
    )
    .prop_map(|specs| {
        let mut resources = Vec::with_capacity(specs.len());
        for (i, (parent, deps, has_parent)) in specs.into_iter().enumerate() {
            let mut state = ResourceState::new(urn(i), PropertyMap::new());
            state.status = ResourceStatus::Created;
            if i > 0 {
                if has_parent {
                    state.parent = Some(urn(parent.index(i)));
                }
                let mut deps: Vec<Urn> = deps.iter().map(|d| urn(d.index(i))).collect();
                deps.sort();
                deps.dedup();
                state.dependencies = deps;
            }
            resources.push(state);
        }
        Snapshot::new("dev", Manifest::new("keel-test", Vec::new()), resources)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn verified_snapshots_reference_only_lower_indices(snap in arb_valid_snapshot()) {
        prop_assert!(snap.verify_integrity().is_ok());

        let positions: HashMap<&Urn, usize> =
            snap.resources.iter().enumerate().map(|(i, r)| (&r.urn, i)).collect();
        for (i, state) in snap.resources.iter().enumerate() {
            if let Some(parent) = &state.parent {
                prop_assert!(positions[parent] < i);
            }
            for dep in &state.dependencies {
                prop_assert!(positions[dep] < i);
            }
        }
    }

    #[test]
    fn verified_snapshots_have_one_live_record_per_urn(
        snap in arb_valid_snapshot(),
        dup in any::<prop::sample::Index>(),
        keep_live in any::<bool>(),
    ) {
        let mut snap = snap;
        let mut copy = snap.resources[dup.index(snap.resources.len())].clone();
        copy.pending_deletion = !keep_live;
        snap.resources.push(copy);

        let verdict = snap.verify_integrity();
        let mut live: HashMap<&Urn, usize> = HashMap::new();
        for state in snap.resources.iter().filter(|r| r.is_live()) {
            *live.entry(&state.urn).or_default() += 1;
        }

        if verdict.is_ok() {
            prop_assert!(live.values().all(|&n| n <= 1));
        }
        prop_assert_eq!(verdict.is_ok(), !keep_live);
    }

    #[test]
    fn moving_a_referencing_resource_first_breaks_integrity(snap in arb_valid_snapshot()) {
        let referencing = snap
            .resources
            .iter()
            .position(|r| r.parent.is_some() || !r.dependencies.is_empty());
        if let Some(i) = referencing {
            let mut broken = snap.clone();
            let moved = broken.resources.remove(i);
            broken.resources.insert(0, moved);
            prop_assert!(broken.verify_integrity().is_err());
        }
    }
}
