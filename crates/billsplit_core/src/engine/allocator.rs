//! Cost allocation from normalized shares.
//!
//! # Invariants
//! - `cost = round(unit_cost * share, 2)` per member and item.
//! - Negative unit costs are rejected before any cost is produced.
//! - Costs and per-member sums of one bill never overflow `Decimal`; an
//!   overflowing item is reported as `InvalidUnitCost`, so downstream
//!   totals can add freely.

use crate::engine::normalizer::ItemShares;
use crate::engine::{round_money, EngineError, EngineResult};
use crate::model::bill::Item;
use crate::model::share::{NormalizedShare, UserItemCost};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Converts one item's normalized shares into member costs.
///
/// # Errors
/// - `EngineError::InvalidUnitCost` when `item.unit_cost` is negative or
///   its product with a share overflows.
pub fn allocate_item(item: &Item, shares: &[NormalizedShare]) -> EngineResult<Vec<UserItemCost>> {
    if item.unit_cost < Decimal::ZERO {
        return Err(invalid_unit_cost(item));
    }

    shares
        .iter()
        .map(|share| {
            let cost = item
                .unit_cost
                .checked_mul(share.share)
                .ok_or_else(|| invalid_unit_cost(item))?;
            Ok(UserItemCost {
                username: share.username.clone(),
                item: item.name.clone(),
                share: share.share,
                cost: round_money(cost),
            })
        })
        .collect()
}

/// Allocates costs for every resolved item of a bill, in catalog order.
///
/// # Errors
/// - `EngineError::UnknownItemReference` when `resolved` names an item
///   missing from `catalog`.
/// - `EngineError::InvalidUnitCost` from [`allocate_item`], or when a
///   member's running total overflows.
pub fn allocate_bill(catalog: &[Item], resolved: &[ItemShares]) -> EngineResult<Vec<UserItemCost>> {
    let mut costs = Vec::new();
    let mut running: BTreeMap<String, Decimal> = BTreeMap::new();
    for item_shares in resolved {
        let item = catalog
            .iter()
            .find(|item| item.name == item_shares.name)
            .ok_or_else(|| EngineError::UnknownItemReference {
                item: item_shares.name.clone(),
            })?;
        for cost in allocate_item(item, &item_shares.users)? {
            let total = running.entry(cost.username.clone()).or_default();
            *total = total
                .checked_add(cost.cost)
                .ok_or_else(|| invalid_unit_cost(item))?;
            costs.push(cost);
        }
    }
    Ok(costs)
}

fn invalid_unit_cost(item: &Item) -> EngineError {
    EngineError::InvalidUnitCost {
        item: item.name.clone(),
        unit_cost: item.unit_cost,
    }
}

#[cfg(test)]
mod tests {
    use super::{allocate_bill, allocate_item};
    use crate::engine::normalizer::ItemShares;
    use crate::engine::EngineError;
    use crate::model::bill::Item;
    use crate::model::share::NormalizedShare;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).expect("valid decimal")
    }

    fn share(username: &str, value: &str) -> NormalizedShare {
        NormalizedShare {
            username: username.to_string(),
            share: dec(value),
        }
    }

    #[test]
    fn costs_are_rounded_per_member() {
        let item = Item::new("pizza", dec("10.00"), 1, "food");
        let costs = allocate_item(
            &item,
            &[share("a", "0.33"), share("b", "0.33"), share("c", "0.33")],
        )
        .unwrap();
        assert!(costs.iter().all(|cost| cost.cost == dec("3.30")));
        assert_eq!(costs[2].username, "c");
        assert_eq!(costs[2].item, "pizza");
    }

    #[test]
    fn negative_unit_cost_is_rejected() {
        let item = Item::new("refund", dec("-1.00"), 1, "misc");
        assert_eq!(
            allocate_item(&item, &[share("a", "1")]),
            Err(EngineError::InvalidUnitCost {
                item: "refund".to_string(),
                unit_cost: dec("-1.00"),
            })
        );
    }

    #[test]
    fn allocate_bill_skips_unclaimed_items() {
        let catalog = vec![
            Item::new("wine", dec("9.00"), 1, "drinks"),
            Item::new("bread", dec("2.00"), 1, "bakery"),
        ];
        let resolved = vec![
            ItemShares {
                name: "wine".to_string(),
                users: vec![share("a", "0.5"), share("b", "0.25"), share("c", "0.25")],
            },
            ItemShares {
                name: "bread".to_string(),
                users: Vec::new(),
            },
        ];

        let costs = allocate_bill(&catalog, &resolved).unwrap();
        let values: Vec<Decimal> = costs.iter().map(|cost| cost.cost).collect();
        assert_eq!(values, vec![dec("4.50"), dec("2.25"), dec("2.25")]);
    }

    #[test]
    fn overflowing_costs_are_rejected() {
        let item = Item::new("galaxy", Decimal::MAX, 1, "misc");
        assert_eq!(
            allocate_item(&item, &[share("a", "1.5")]),
            Err(EngineError::InvalidUnitCost {
                item: "galaxy".to_string(),
                unit_cost: Decimal::MAX,
            })
        );

        let catalog = vec![
            Item::new("left", Decimal::MAX, 1, "misc"),
            Item::new("right", Decimal::MAX, 1, "misc"),
        ];
        let resolved = vec![
            ItemShares {
                name: "left".to_string(),
                users: vec![share("a", "1")],
            },
            ItemShares {
                name: "right".to_string(),
                users: vec![share("a", "1")],
            },
        ];
        assert_eq!(
            allocate_bill(&catalog, &resolved),
            Err(EngineError::InvalidUnitCost {
                item: "right".to_string(),
                unit_cost: Decimal::MAX,
            })
        );
    }
}
