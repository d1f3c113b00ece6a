use billsplit_core::db::{open_db, open_db_in_memory};
use billsplit_core::{
    Bill, BillEdit, BillListQuery, BillRepository, BillStatus, Item, ItemShares,
    NormalizedShare, RepoError, RepoResult, Settlement, ShareAssignment, ShareMode,
    SqliteBillRepository, StatusUpdate, UserItemCost,
};
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

fn dinner() -> Bill {
    Bill::new(
        "dinner",
        "flat",
        vec![
            Item::new("pasta", dec("12.00"), 2, "food"),
            Item::new("wine", dec("9.00"), 1, "drinks"),
        ],
    )
}

fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn partition(item: &str, shares: &[(&str, &str)]) -> ItemShares {
    ItemShares {
        name: item.to_string(),
        users: shares
            .iter()
            .map(|(username, share)| NormalizedShare {
                username: username.to_string(),
                share: dec(share),
            })
            .collect(),
    }
}

#[test]
fn create_and_get_roundtrip_keeps_catalog_order() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteBillRepository::try_new(&mut conn).unwrap();

    let bill = dinner();
    let id = repo.create_bill(&bill).unwrap();
    assert_eq!(id, bill.uuid);

    let loaded = repo.get_bill("dinner").unwrap().unwrap();
    assert_eq!(loaded, bill);
    assert_eq!(loaded.status, BillStatus::Open);
    assert_eq!(loaded.items[0].name, "pasta");
    assert_eq!(loaded.items[1].unit_cost, dec("9.00"));
    assert!(repo.get_bill("missing").unwrap().is_none());
}

#[test]
fn duplicate_bill_names_are_rejected() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteBillRepository::try_new(&mut conn).unwrap();
    repo.create_bill(&dinner()).unwrap();

    let err = repo.create_bill(&dinner()).unwrap_err();
    assert!(matches!(err, RepoError::BillAlreadyExists(name) if name == "dinner"));
}

#[test]
fn try_new_rejects_unmigrated_connection() {
    let mut conn = Connection::open_in_memory().unwrap();
    let err = SqliteBillRepository::try_new(&mut conn).err().unwrap();
    assert!(matches!(err, RepoError::MissingRequiredTable("bills")));
}

#[test]
fn list_bills_filters_group_and_settled() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteBillRepository::try_new(&mut conn).unwrap();
    repo.create_bill(&dinner()).unwrap();
    repo.create_bill(&Bill::new("trip", "friends", Vec::new()))
        .unwrap();
    let mut settled = Bill::new("archive", "flat", Vec::new());
    settled.status = BillStatus::Settled;
    repo.create_bill(&settled).unwrap();

    let flat = repo
        .list_bills(&BillListQuery {
            group: Some("flat".to_string()),
            include_settled: false,
        })
        .unwrap();
    assert_eq!(flat.len(), 1);
    assert_eq!(flat[0].name, "dinner");

    let everything = repo
        .list_bills(&BillListQuery {
            group: None,
            include_settled: true,
        })
        .unwrap();
    assert_eq!(everything.len(), 3);
}

#[test]
fn member_shares_roundtrip_in_catalog_then_join_order() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteBillRepository::try_new(&mut conn).unwrap();
    repo.create_bill(&dinner()).unwrap();
    repo.attach_member("alice", &names(&["dinner"]), false)
        .unwrap();
    repo.attach_member("bob", &names(&["dinner"]), false)
        .unwrap();

    repo.replace_member_shares(
        "dinner",
        "bob",
        &[
            ("wine".to_string(), ShareMode::Auto),
            ("pasta".to_string(), ShareMode::Fixed(dec("0.4"))),
        ],
    )
    .unwrap();
    repo.replace_member_shares("dinner", "alice", &[("wine".to_string(), ShareMode::Auto)])
        .unwrap();

    let assignments = repo.load_assignments("dinner").unwrap();
    let rows: Vec<(&str, &str, ShareMode)> = assignments
        .iter()
        .map(|row| (row.username.as_str(), row.item.as_str(), row.mode))
        .collect();
    assert_eq!(
        rows,
        vec![
            ("bob", "pasta", ShareMode::Fixed(dec("0.4"))),
            ("alice", "wine", ShareMode::Auto),
            ("bob", "wine", ShareMode::Auto),
        ]
    );

    repo.replace_member_shares("dinner", "bob", &[]).unwrap();
    assert_eq!(repo.load_assignments("dinner").unwrap().len(), 1);
}

#[test]
fn unknown_items_and_members_are_reported() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteBillRepository::try_new(&mut conn).unwrap();
    repo.create_bill(&dinner()).unwrap();
    repo.attach_member("alice", &names(&["dinner"]), false)
        .unwrap();

    let err = repo
        .replace_member_shares("dinner", "alice", &[("cake".to_string(), ShareMode::Auto)])
        .unwrap_err();
    assert!(matches!(err, RepoError::ItemNotFound { item, .. } if item == "cake"));

    let err = repo
        .set_locked("dinner", &names(&["mallory"]), true)
        .unwrap_err();
    assert!(matches!(err, RepoError::MemberNotFound { .. }));

    let err = repo
        .attach_member("alice", &names(&["dinner"]), false)
        .unwrap_err();
    assert!(matches!(err, RepoError::MemberAlreadyExists { .. }));
}

#[test]
fn attach_member_is_atomic_across_bills() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteBillRepository::try_new(&mut conn).unwrap();
    repo.create_bill(&dinner()).unwrap();

    let err = repo
        .attach_member("alice", &names(&["dinner", "missing"]), false)
        .unwrap_err();
    assert!(matches!(err, RepoError::BillNotFound(name) if name == "missing"));
    assert!(repo.get_bill("dinner").unwrap().unwrap().members.is_empty());
}

#[test]
fn detach_member_drops_their_shares() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteBillRepository::try_new(&mut conn).unwrap();
    repo.create_bill(&dinner()).unwrap();
    repo.attach_member("alice", &names(&["dinner"]), false)
        .unwrap();
    repo.replace_member_shares("dinner", "alice", &[("wine".to_string(), ShareMode::Auto)])
        .unwrap();

    repo.detach_member("alice", &names(&["dinner"])).unwrap();
    assert!(repo.load_assignments("dinner").unwrap().is_empty());
    assert!(repo.list_member_bills("alice").unwrap().is_empty());
}

#[test]
fn write_statuses_never_touches_settled_bills() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteBillRepository::try_new(&mut conn).unwrap();
    repo.create_bill(&dinner()).unwrap();
    let mut archive = Bill::new("archive", "flat", Vec::new());
    archive.status = BillStatus::Settled;
    repo.create_bill(&archive).unwrap();

    let changed = repo
        .write_statuses(&[
            StatusUpdate {
                bill: "dinner".to_string(),
                status: BillStatus::Pending,
            },
            StatusUpdate {
                bill: "archive".to_string(),
                status: BillStatus::Open,
            },
        ])
        .unwrap();
    assert_eq!(changed, 1);
    assert_eq!(
        repo.get_bill("archive").unwrap().unwrap().status,
        BillStatus::Settled
    );
    assert_eq!(
        repo.get_bill("dinner").unwrap().unwrap().status,
        BillStatus::Pending
    );
}

#[test]
fn apply_edit_attaches_new_members_locked_and_removes_old_ones() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteBillRepository::try_new(&mut conn).unwrap();
    repo.create_bill(&dinner()).unwrap();
    repo.attach_member("alice", &names(&["dinner"]), false)
        .unwrap();
    repo.attach_member("bob", &names(&["dinner"]), false)
        .unwrap();
    repo.replace_member_shares("dinner", "alice", &[("wine".to_string(), ShareMode::Auto)])
        .unwrap();

    repo.apply_edit(
        "dinner",
        &BillEdit {
            resolved_items: vec![partition("pasta", &[("alice", "0"), ("carol", "1")])],
            new_members: names(&["carol"]),
            removed_members: names(&["bob"]),
        },
    )
    .unwrap();

    let bill = repo.get_bill("dinner").unwrap().unwrap();
    let members: Vec<(&str, bool)> = bill
        .members
        .iter()
        .map(|member| (member.username.as_str(), member.locked))
        .collect();
    assert_eq!(members, vec![("alice", false), ("carol", true)]);
    assert_eq!(repo.load_assignments("dinner").unwrap().len(), 1);
    assert_eq!(
        repo.load_resolved_shares("dinner").unwrap(),
        vec![partition("pasta", &[("alice", "0"), ("carol", "1")])]
    );
}

#[test]
fn apply_edit_rejects_partitions_naming_non_members() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteBillRepository::try_new(&mut conn).unwrap();
    repo.create_bill(&dinner()).unwrap();

    let err = repo
        .apply_edit(
            "dinner",
            &BillEdit {
                resolved_items: vec![partition("pasta", &[("dave", "1")])],
                ..BillEdit::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, RepoError::MemberNotFound { username, .. } if username == "dave"));
    assert!(repo.load_resolved_shares("dinner").unwrap().is_empty());
}

#[test]
fn resolved_items_can_be_emptied() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteBillRepository::try_new(&mut conn).unwrap();
    repo.create_bill(&dinner()).unwrap();

    repo.apply_edit(
        "dinner",
        &BillEdit {
            resolved_items: vec![partition("wine", &[])],
            ..BillEdit::default()
        },
    )
    .unwrap();
    assert_eq!(
        repo.load_resolved_shares("dinner").unwrap(),
        vec![partition("wine", &[])]
    );
}

#[test]
fn member_edits_drop_manager_partitions_they_touch() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteBillRepository::try_new(&mut conn).unwrap();
    repo.create_bill(&dinner()).unwrap();
    for username in ["alice", "bob"] {
        repo.attach_member(username, &names(&["dinner"]), false)
            .unwrap();
    }
    repo.apply_edit(
        "dinner",
        &BillEdit {
            resolved_items: vec![
                partition("pasta", &[("alice", "1")]),
                partition("wine", &[("alice", "0.5"), ("bob", "0.5")]),
            ],
            ..BillEdit::default()
        },
    )
    .unwrap();

    repo.replace_member_shares("dinner", "bob", &[("pasta".to_string(), ShareMode::Auto)])
        .unwrap();
    let resolved = repo.load_resolved_shares("dinner").unwrap();
    assert!(resolved.is_empty(), "pasta claimed and wine held by bob: {resolved:?}");

    repo.apply_edit(
        "dinner",
        &BillEdit {
            resolved_items: vec![partition("wine", &[("alice", "1")])],
            ..BillEdit::default()
        },
    )
    .unwrap();
    repo.detach_member("bob", &names(&["dinner"])).unwrap();
    assert_eq!(
        repo.load_resolved_shares("dinner").unwrap(),
        vec![partition("wine", &[("alice", "1")])]
    );

    repo.detach_member("alice", &names(&["dinner"])).unwrap();
    assert!(repo.load_resolved_shares("dinner").unwrap().is_empty());
}

fn wine_settlement(bill: &Bill, assignments: &[ShareAssignment]) -> Settlement {
    let costs: Vec<UserItemCost> = assignments
        .iter()
        .map(|assignment| UserItemCost {
            username: assignment.username.clone(),
            item: assignment.item.clone(),
            share: dec("1"),
            cost: dec("9.00"),
        })
        .collect();
    let amounts = costs
        .iter()
        .map(|cost| (cost.username.clone(), cost.cost))
        .collect::<BTreeMap<_, _>>();
    Settlement {
        bill: bill.name.clone(),
        amounts,
        costs,
    }
}

#[test]
fn settlement_freezes_bill_and_rejects_later_writes() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteBillRepository::try_new(&mut conn).unwrap();
    repo.create_bill(&dinner()).unwrap();
    repo.attach_member("alice", &names(&["dinner"]), true)
        .unwrap();
    repo.replace_member_shares("dinner", "alice", &[("wine".to_string(), ShareMode::Auto)])
        .unwrap();

    let settlement = repo
        .finalize_with("dinner", |bill, assignments, resolved| -> RepoResult<Settlement> {
            assert_eq!(bill.status, BillStatus::Open);
            assert!(resolved.is_empty());
            Ok(wine_settlement(bill, assignments))
        })
        .unwrap();
    assert_eq!(settlement.amounts["alice"], dec("9.00"));

    let bill = repo.get_bill("dinner").unwrap().unwrap();
    assert_eq!(bill.status, BillStatus::Settled);
    assert_eq!(bill.members[0].amount, dec("9.00"));
    let frozen = repo.load_settled_costs("dinner").unwrap();
    assert_eq!(frozen, settlement.costs);

    let err = repo
        .replace_member_shares("dinner", "alice", &[])
        .unwrap_err();
    assert!(matches!(err, RepoError::BillSettled(name) if name == "dinner"));
    let err = repo
        .set_locked("dinner", &names(&["alice"]), false)
        .unwrap_err();
    assert!(matches!(err, RepoError::BillSettled(_)));
    let err = repo
        .finalize_with("dinner", |bill, assignments, _| -> RepoResult<Settlement> {
            Ok(wine_settlement(bill, assignments))
        })
        .unwrap_err();
    assert!(matches!(err, RepoError::BillSettled(_)));

    repo.set_paid("dinner", "alice", true).unwrap();
    let records = repo.list_ledger_records().unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].paid);
}

#[test]
fn failed_settlement_computation_leaves_bill_open() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteBillRepository::try_new(&mut conn).unwrap();
    repo.create_bill(&dinner()).unwrap();

    let err = repo
        .finalize_with("dinner", |_, _, _| -> RepoResult<Settlement> {
            Err(RepoError::InvalidData("boom".to_string()))
        })
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidData(_)));
    assert_eq!(
        repo.get_bill("dinner").unwrap().unwrap().status,
        BillStatus::Open
    );
}

#[test]
fn finalize_holds_off_concurrent_share_edits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bills.sqlite3");
    let mut first = open_db(&path).unwrap();
    let mut second = open_db(&path).unwrap();
    second.busy_timeout(Duration::ZERO).unwrap();

    let mut repo = SqliteBillRepository::try_new(&mut first).unwrap();
    repo.create_bill(&dinner()).unwrap();
    for username in ["alice", "bob"] {
        repo.attach_member(username, &names(&["dinner"]), true)
            .unwrap();
    }
    repo.replace_member_shares("dinner", "alice", &[("wine".to_string(), ShareMode::Auto)])
        .unwrap();

    let mut other = SqliteBillRepository::try_new(&mut second).unwrap();
    let settlement = repo
        .finalize_with("dinner", |bill, assignments, _| -> RepoResult<Settlement> {
            let racing = other.replace_member_shares(
                "dinner",
                "bob",
                &[("wine".to_string(), ShareMode::Auto)],
            );
            assert!(matches!(racing, Err(RepoError::Db(_))), "{racing:?}");
            Ok(wine_settlement(bill, assignments))
        })
        .unwrap();
    assert_eq!(settlement.costs.len(), 1);

    let err = other
        .replace_member_shares("dinner", "bob", &[("wine".to_string(), ShareMode::Auto)])
        .unwrap_err();
    assert!(matches!(err, RepoError::BillSettled(_)));
    assert!(other
        .load_assignments("dinner")
        .unwrap()
        .iter()
        .all(|assignment| assignment.username == "alice"));
    assert_eq!(other.load_settled_costs("dinner").unwrap(), settlement.costs);
}

#[test]
fn storage_triggers_block_direct_writes_to_settled_bills() {
    let mut conn = open_db_in_memory().unwrap();
    {
        let mut repo = SqliteBillRepository::try_new(&mut conn).unwrap();
        repo.create_bill(&dinner()).unwrap();
        repo.attach_member("alice", &names(&["dinner"]), true)
            .unwrap();
        repo.replace_member_shares("dinner", "alice", &[("wine".to_string(), ShareMode::Auto)])
            .unwrap();
    }
    conn.execute("UPDATE bills SET status = 'settled' WHERE name = 'dinner';", [])
        .unwrap();

    assert!(conn.execute("DELETE FROM shares;", []).is_err());
    assert!(conn.execute("DELETE FROM resolved_shares;", []).is_ok());
    assert!(conn
        .execute(
            "INSERT INTO resolved_shares (item_id, bill_uuid, username, share)
             SELECT id, bill_uuid, 'alice', '1' FROM items WHERE name = 'pasta';",
            [],
        )
        .is_err());
    assert!(conn
        .execute("UPDATE bills SET status = 'open' WHERE name = 'dinner';", [])
        .is_err());
}
