use billsplit_core::engine::allocator::allocate_item;
use billsplit_core::{normalize_item, Claim, Item, ShareMode};
use proptest::prelude::*;
use rust_decimal::Decimal;

const USERNAMES: [&str; 6] = ["alice", "bob", "carol", "dave", "erin", "frank"];

fn raw_share() -> impl Strategy<Value = Decimal> {
    (0i64..=100).prop_map(|cents| Decimal::new(cents, 2))
}

fn modes(raws: &[Decimal]) -> Vec<ShareMode> {
    raws.iter()
        .map(|raw| ShareMode::from_raw(*raw).unwrap())
        .collect()
}

fn claims(modes: &[ShareMode]) -> Vec<Claim<'static>> {
    modes
        .iter()
        .zip(USERNAMES)
        .map(|(mode, username)| Claim::new(username, *mode))
        .collect()
}

/// Splits 100 cents into strictly positive parts at the given cut points.
fn exact_partition(mut cuts: Vec<i64>) -> Vec<Decimal> {
    cuts.sort_unstable();
    cuts.dedup();
    let mut parts = Vec::new();
    let mut previous = 0;
    for cut in cuts.into_iter().chain(std::iter::once(100)) {
        parts.push(Decimal::new(cut - previous, 2));
        previous = cut;
    }
    parts
}

proptest! {
    #[test]
    fn normalized_shares_partition_the_item(raws in prop::collection::vec(raw_share(), 1..=6)) {
        let modes = modes(&raws);
        let shares = normalize_item("item", &claims(&modes)).unwrap();
        prop_assert_eq!(shares.len(), raws.len());

        let total: Decimal = shares.iter().map(|share| share.share).sum();
        let tolerance = Decimal::new(5, 3) * Decimal::from(shares.len());
        prop_assert!((total - Decimal::ONE).abs() <= tolerance, "total {}", total);
    }

    #[test]
    fn exact_fixed_partitions_are_kept(cuts in prop::collection::vec(1i64..100, 0..5)) {
        let parts = exact_partition(cuts);
        let modes: Vec<ShareMode> = parts.iter().map(|part| ShareMode::Fixed(*part)).collect();
        let shares = normalize_item("item", &claims(&modes)).unwrap();
        let values: Vec<Decimal> = shares.iter().map(|share| share.share).collect();
        prop_assert_eq!(values, parts);
    }

    #[test]
    fn allocated_costs_follow_shares(
        raws in prop::collection::vec(raw_share(), 1..=6),
        unit_cents in 0i64..100_000,
    ) {
        let unit_cost = Decimal::new(unit_cents, 2);
        let item = Item::new("item", unit_cost, 1, "misc");
        let modes = modes(&raws);
        let shares = normalize_item("item", &claims(&modes)).unwrap();
        let costs = allocate_item(&item, &shares).unwrap();

        let share_total: Decimal = shares.iter().map(|share| share.share).sum();
        let cost_total: Decimal = costs.iter().map(|cost| cost.cost).sum();
        let tolerance = Decimal::new(5, 3) * Decimal::from(costs.len());
        prop_assert!((cost_total - unit_cost * share_total).abs() <= tolerance);
        let claimants = Decimal::from(costs.len());
        let slack = Decimal::new(5, 3) * claimants;
        prop_assert!((cost_total - unit_cost).abs() <= unit_cost * slack + slack);
        prop_assert!(costs.iter().all(|cost| cost.cost.scale() <= 2));
    }
}
