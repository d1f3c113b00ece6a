//! Per-member and per-bill aggregation of item costs.
//!
//! # Responsibility
//! - Sum already-rounded item costs into member totals.
//! - Build the per-user and per-bill read views.
//!
//! # Invariants
//! - Totals are exact sums of rounded item costs, re-rounded only to drop
//!   representation noise.

use crate::engine::round_money;
use crate::model::bill::{Bill, BillStatus};
use crate::model::share::UserItemCost;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One item line of a member's bill view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBillLine {
    pub name: String,
    pub cost: Decimal,
    pub quantity: u32,
    pub share: Decimal,
    #[serde(rename = "type")]
    pub category: String,
}

/// A member's view of one bill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBillView {
    pub items: Vec<UserBillLine>,
    pub amount: Decimal,
    pub paid: bool,
    pub locked: bool,
}

/// One member's total inside a bill view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberTotal {
    pub username: String,
    pub amount: Decimal,
    pub paid: bool,
    pub locked: bool,
}

/// Totals of every member of one bill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillTotalsView {
    pub name: String,
    pub status: BillStatus,
    pub members: Vec<MemberTotal>,
}

/// Sums one member's costs.
pub fn member_total(costs: &[UserItemCost], username: &str) -> Decimal {
    round_money(
        costs
            .iter()
            .filter(|cost| cost.username == username)
            .map(|cost| cost.cost)
            .sum(),
    )
}

/// Sums costs per member, keyed by username.
pub fn totals_by_member(costs: &[UserItemCost]) -> BTreeMap<String, Decimal> {
    let mut totals: BTreeMap<String, Decimal> = BTreeMap::new();
    for cost in costs {
        *totals.entry(cost.username.clone()).or_insert(Decimal::ZERO) += cost.cost;
    }
    for total in totals.values_mut() {
        *total = round_money(*total);
    }
    totals
}

/// Builds a member's bill view from the bill's item costs.
///
/// Returns `None` when `username` is not a member of `bill`. Only items the
/// member claimed are listed, in catalog order.
pub fn user_bill_view(
    bill: &Bill,
    username: &str,
    costs: &[UserItemCost],
) -> Option<UserBillView> {
    let member = bill.member(username)?;
    let items = bill
        .items
        .iter()
        .filter_map(|item| {
            costs
                .iter()
                .find(|cost| cost.username == username && cost.item == item.name)
                .map(|cost| UserBillLine {
                    name: item.name.clone(),
                    cost: cost.cost,
                    quantity: item.quantity,
                    share: cost.share,
                    category: item.category.clone(),
                })
        })
        .collect();

    Some(UserBillView {
        items,
        amount: member_total(costs, username),
        paid: member.paid,
        locked: member.locked,
    })
}

/// Builds the per-bill totals view, members in join order.
pub fn bill_totals(bill: &Bill, costs: &[UserItemCost]) -> BillTotalsView {
    let totals = totals_by_member(costs);
    BillTotalsView {
        name: bill.name.clone(),
        status: bill.status,
        members: bill
            .members
            .iter()
            .map(|member| MemberTotal {
                username: member.username.clone(),
                amount: totals
                    .get(&member.username)
                    .copied()
                    .unwrap_or(Decimal::ZERO),
                paid: member.paid,
                locked: member.locked,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::{bill_totals, member_total, totals_by_member, user_bill_view};
    use crate::model::bill::{Bill, Item, Member};
    use crate::model::share::UserItemCost;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).expect("valid decimal")
    }

    fn cost(username: &str, item: &str, share: &str, value: &str) -> UserItemCost {
        UserItemCost {
            username: username.to_string(),
            item: item.to_string(),
            share: dec(share),
            cost: dec(value),
        }
    }

    fn sample_bill() -> Bill {
        let mut bill = Bill::new(
            "dinner",
            "flat",
            vec![
                Item::new("pasta", dec("12.00"), 2, "food"),
                Item::new("wine", dec("9.00"), 1, "drinks"),
                Item::new("dessert", dec("6.00"), 1, "food"),
            ],
        );
        let mut alice = Member::new("alice");
        alice.locked = true;
        bill.members.push(alice);
        bill.members.push(Member::new("bob"));
        bill.members.push(Member::new("carol"));
        bill
    }

    fn sample_costs() -> Vec<UserItemCost> {
        vec![
            cost("alice", "wine", "0.5", "4.50"),
            cost("bob", "wine", "0.25", "2.25"),
            cost("alice", "pasta", "0.33", "3.96"),
            cost("bob", "pasta", "0.67", "8.04"),
        ]
    }

    #[test]
    fn totals_sum_rounded_costs() {
        let costs = sample_costs();
        assert_eq!(member_total(&costs, "alice"), dec("8.46"));
        assert_eq!(member_total(&costs, "nobody"), Decimal::ZERO);

        let totals = totals_by_member(&costs);
        assert_eq!(totals.get("bob"), Some(&dec("10.29")));
        assert_eq!(totals.len(), 2);
    }

    #[test]
    fn user_view_lists_claimed_items_in_catalog_order() {
        let bill = sample_bill();
        let view = user_bill_view(&bill, "alice", &sample_costs()).unwrap();
        let names: Vec<&str> = view.items.iter().map(|line| line.name.as_str()).collect();
        assert_eq!(names, vec!["pasta", "wine"]);
        assert_eq!(view.items[0].quantity, 2);
        assert_eq!(view.items[0].category, "food");
        assert_eq!(view.amount, dec("8.46"));
        assert!(view.locked);
        assert!(!view.paid);

        assert!(user_bill_view(&bill, "mallory", &sample_costs()).is_none());
    }

    #[test]
    fn bill_totals_include_members_without_costs() {
        let bill = sample_bill();
        let view = bill_totals(&bill, &sample_costs());
        let amounts: Vec<(&str, Decimal)> = view
            .members
            .iter()
            .map(|member| (member.username.as_str(), member.amount))
            .collect();
        assert_eq!(
            amounts,
            vec![
                ("alice", dec("8.46")),
                ("bob", dec("10.29")),
                ("carol", Decimal::ZERO)
            ]
        );
    }
}
