//! Bill repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Load bills with their catalog, members and raw share claims.
//! - Apply member, share, status and settlement writes as atomic batches.
//! - Keep manager-resolved item partitions next to the raw claims.
//!
//! # Invariants
//! - Writes targeting a settled bill fail with `RepoError::BillSettled`
//!   before any row changes.
//! - Status writes never touch a settled bill.
//! - Finalization reads claims and writes the settlement in one transaction.
//! - A member's claim edit or removal drops the manager partition of every
//!   item it touches.
//! - Read paths reject malformed persisted values instead of masking them.

use crate::db::DbError;
use crate::engine::ledger::{LedgerRecord, Settlement};
use crate::engine::normalizer::ItemShares;
use crate::engine::status::StatusUpdate;
use crate::model::bill::{
    validate_username, Bill, BillId, BillStatus, BillValidationError, Item, Member,
};
use crate::model::share::{NormalizedShare, ShareAssignment, ShareMode, UserItemCost};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Transaction, TransactionBehavior,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

const REQUIRED_TABLES: [&str; 6] = [
    "bills",
    "items",
    "members",
    "shares",
    "resolved_shares",
    "settled_costs",
];

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for bill persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(BillValidationError),
    Db(DbError),
    BillNotFound(String),
    BillAlreadyExists(String),
    MemberNotFound { bill: String, username: String },
    MemberAlreadyExists { bill: String, username: String },
    ItemNotFound { bill: String, item: String },
    /// Write rejected because the bill is settled.
    BillSettled(String),
    MissingRequiredTable(&'static str),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::BillNotFound(name) => write!(f, "bill not found: `{name}`"),
            Self::BillAlreadyExists(name) => write!(f, "bill already exists: `{name}`"),
            Self::MemberNotFound { bill, username } => {
                write!(f, "`{username}` is not a member of bill `{bill}`")
            }
            Self::MemberAlreadyExists { bill, username } => {
                write!(f, "`{username}` is already a member of bill `{bill}`")
            }
            Self::ItemNotFound { bill, item } => {
                write!(f, "item `{item}` not found in bill `{bill}`")
            }
            Self::BillSettled(name) => write!(f, "bill `{name}` is settled"),
            Self::MissingRequiredTable(table) => write!(f, "missing required table `{table}`"),
            Self::InvalidData(message) => write!(f, "invalid persisted bill data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BillValidationError> for RepoError {
    fn from(value: BillValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Filter options for listing bills.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BillListQuery {
    /// Exact group match. `None` lists every group.
    pub group: Option<String>,
    pub include_settled: bool,
}

/// A member's participation row joined with its bill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberBillRecord {
    pub name: String,
    pub status: BillStatus,
    pub amount: Decimal,
    pub paid: bool,
    pub locked: bool,
}

/// Batch of manager edits applied to one bill in a single transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BillEdit {
    /// Already normalized partitions replacing the listed items' resolution.
    pub resolved_items: Vec<ItemShares>,
    /// Members attached as locked.
    pub new_members: Vec<String>,
    /// Members detached together with their shares.
    pub removed_members: Vec<String>,
}

/// Persistence interface for bills, members and share claims.
pub trait BillRepository {
    fn create_bill(&mut self, bill: &Bill) -> RepoResult<BillId>;
    fn get_bill(&self, name: &str) -> RepoResult<Option<Bill>>;
    fn list_bills(&self, query: &BillListQuery) -> RepoResult<Vec<Bill>>;
    /// Raw claims of every member, ordered by catalog position then join order.
    fn load_assignments(&self, bill: &str) -> RepoResult<Vec<ShareAssignment>>;
    /// Manager partitions in catalog order, only for resolved items.
    fn load_resolved_shares(&self, bill: &str) -> RepoResult<Vec<ItemShares>>;
    /// Normalized shares and costs frozen at finalization.
    fn load_settled_costs(&self, bill: &str) -> RepoResult<Vec<UserItemCost>>;
    fn attach_member(&mut self, username: &str, bills: &[String], locked: bool)
        -> RepoResult<()>;
    fn detach_member(&mut self, username: &str, bills: &[String]) -> RepoResult<()>;
    /// Replaces the member's whole claim set on one bill.
    fn replace_member_shares(
        &mut self,
        bill: &str,
        username: &str,
        shares: &[(String, ShareMode)],
    ) -> RepoResult<()>;
    fn set_locked(&mut self, bill: &str, usernames: &[String], locked: bool) -> RepoResult<()>;
    /// Writes recomputed statuses, skipping settled bills. Returns rows changed.
    fn write_statuses(&mut self, updates: &[StatusUpdate]) -> RepoResult<usize>;
    fn apply_edit(&mut self, bill: &str, edit: &BillEdit) -> RepoResult<()>;
    /// Settles a bill atomically.
    ///
    /// `compute` receives the bill, its raw claims and its manager partitions
    /// as read inside the write transaction; the returned costs and amounts
    /// are persisted and the bill marked settled before any other writer can
    /// touch it.
    fn finalize_with<F, E>(&mut self, bill: &str, compute: F) -> Result<Settlement, E>
    where
        F: FnOnce(&Bill, &[ShareAssignment], &[ItemShares]) -> Result<Settlement, E>,
        E: From<RepoError>;
    fn set_paid(&mut self, bill: &str, username: &str, paid: bool) -> RepoResult<()>;
    fn list_member_bills(&self, username: &str) -> RepoResult<Vec<MemberBillRecord>>;
    fn list_ledger_records(&self) -> RepoResult<Vec<LedgerRecord>>;
}

/// SQLite-backed bill repository.
pub struct SqliteBillRepository<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> SqliteBillRepository<'conn> {
    /// Constructs a repository from a migrated connection.
    ///
    /// # Errors
    /// - `RepoError::MissingRequiredTable` when migrations were not applied.
    pub fn try_new(conn: &'conn mut Connection) -> RepoResult<Self> {
        for table in REQUIRED_TABLES {
            if !table_exists(conn, table)? {
                return Err(RepoError::MissingRequiredTable(table));
            }
        }
        Ok(Self { conn })
    }

    fn begin(&mut self) -> RepoResult<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }
}

struct BillRow {
    uuid: String,
    name: String,
    group: String,
    status: String,
}

impl BillRepository for SqliteBillRepository<'_> {
    fn create_bill(&mut self, bill: &Bill) -> RepoResult<BillId> {
        bill.validate()?;

        let tx = self.begin()?;
        if bill_header(&tx, &bill.name)?.is_some() {
            return Err(RepoError::BillAlreadyExists(bill.name.clone()));
        }

        let uuid = bill.uuid.to_string();
        tx.execute(
            "INSERT INTO bills (uuid, name, bill_group, status) VALUES (?1, ?2, ?3, ?4);",
            params![uuid, bill.name, bill.group, bill.status.as_str()],
        )?;

        for (position, item) in (1_i64..).zip(bill.items.iter()) {
            tx.execute(
                "INSERT INTO items (bill_uuid, position, name, unit_cost, quantity, category)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
                params![
                    uuid,
                    position,
                    item.name,
                    item.unit_cost.to_string(),
                    item.quantity,
                    item.category,
                ],
            )?;
        }

        for member in &bill.members {
            tx.execute(
                "INSERT INTO members (bill_uuid, username, locked, paid, amount)
                 VALUES (?1, ?2, ?3, ?4, ?5);",
                params![
                    uuid,
                    member.username,
                    bool_to_int(member.locked),
                    bool_to_int(member.paid),
                    member.amount.to_string(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(bill.uuid)
    }

    fn get_bill(&self, name: &str) -> RepoResult<Option<Bill>> {
        load_bill(self.conn, name)
    }

    fn list_bills(&self, query: &BillListQuery) -> RepoResult<Vec<Bill>> {
        let mut sql = String::from("SELECT uuid, name, bill_group, status FROM bills WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if !query.include_settled {
            sql.push_str(" AND status <> 'settled'");
        }
        if let Some(group) = query.group.as_ref() {
            sql.push_str(" AND bill_group = ?");
            bind_values.push(Value::Text(group.clone()));
        }
        sql.push_str(" ORDER BY created_at ASC, name ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut headers = Vec::new();
        while let Some(row) = rows.next()? {
            headers.push(BillRow {
                uuid: row.get("uuid")?,
                name: row.get("name")?,
                group: row.get("bill_group")?,
                status: row.get("status")?,
            });
        }

        headers
            .into_iter()
            .map(|header| hydrate_bill(self.conn, header))
            .collect()
    }

    fn load_assignments(&self, bill: &str) -> RepoResult<Vec<ShareAssignment>> {
        let (uuid, _) = require_bill(self.conn, bill)?;
        load_bill_assignments(self.conn, &uuid)
    }

    fn load_resolved_shares(&self, bill: &str) -> RepoResult<Vec<ItemShares>> {
        let (uuid, _) = require_bill(self.conn, bill)?;
        load_bill_resolved(self.conn, &uuid)
    }

    fn load_settled_costs(&self, bill: &str) -> RepoResult<Vec<UserItemCost>> {
        let (uuid, _) = require_bill(self.conn, bill)?;
        let mut stmt = self.conn.prepare(
            "SELECT c.username, i.name AS item_name, c.share, c.cost
             FROM settled_costs c
             INNER JOIN items i ON i.id = c.item_id
             INNER JOIN members m ON m.bill_uuid = c.bill_uuid AND m.username = c.username
             WHERE c.bill_uuid = ?1
             ORDER BY i.position ASC, m.rowid ASC;",
        )?;
        let mut rows = stmt.query([uuid.as_str()])?;
        let mut costs = Vec::new();
        while let Some(row) = rows.next()? {
            let share: String = row.get("share")?;
            let cost: String = row.get("cost")?;
            costs.push(UserItemCost {
                username: row.get("username")?,
                item: row.get("item_name")?,
                share: parse_decimal(&share, "settled_costs.share")?,
                cost: parse_decimal(&cost, "settled_costs.cost")?,
            });
        }
        Ok(costs)
    }

    fn attach_member(
        &mut self,
        username: &str,
        bills: &[String],
        locked: bool,
    ) -> RepoResult<()> {
        validate_username(username)?;

        let tx = self.begin()?;
        for bill in bills {
            let uuid = require_mutable_bill(&tx, bill)?;
            if member_exists(&tx, &uuid, username)? {
                return Err(RepoError::MemberAlreadyExists {
                    bill: bill.clone(),
                    username: username.to_string(),
                });
            }
            insert_member(&tx, &uuid, username, locked)?;
            touch_bill(&tx, &uuid)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn detach_member(&mut self, username: &str, bills: &[String]) -> RepoResult<()> {
        let tx = self.begin()?;
        for bill in bills {
            let uuid = require_mutable_bill(&tx, bill)?;
            delete_member(&tx, &uuid, bill, username)?;
            touch_bill(&tx, &uuid)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn replace_member_shares(
        &mut self,
        bill: &str,
        username: &str,
        shares: &[(String, ShareMode)],
    ) -> RepoResult<()> {
        let tx = self.begin()?;
        let uuid = require_mutable_bill(&tx, bill)?;
        if !member_exists(&tx, &uuid, username)? {
            return Err(RepoError::MemberNotFound {
                bill: bill.to_string(),
                username: username.to_string(),
            });
        }
        clear_member_resolutions(&tx, &uuid, username)?;
        write_member_shares(&tx, &uuid, bill, username, shares)?;
        touch_bill(&tx, &uuid)?;
        tx.commit()?;
        Ok(())
    }

    fn set_locked(&mut self, bill: &str, usernames: &[String], locked: bool) -> RepoResult<()> {
        let tx = self.begin()?;
        let uuid = require_mutable_bill(&tx, bill)?;
        for username in usernames {
            let changed = tx.execute(
                "UPDATE members SET locked = ?3 WHERE bill_uuid = ?1 AND username = ?2;",
                params![uuid, username, bool_to_int(locked)],
            )?;
            if changed == 0 {
                return Err(RepoError::MemberNotFound {
                    bill: bill.to_string(),
                    username: username.clone(),
                });
            }
        }
        touch_bill(&tx, &uuid)?;
        tx.commit()?;
        Ok(())
    }

    fn write_statuses(&mut self, updates: &[StatusUpdate]) -> RepoResult<usize> {
        if updates.is_empty() {
            return Ok(0);
        }

        let tx = self.begin()?;
        let mut changed = 0;
        for update in updates {
            changed += tx.execute(
                "UPDATE bills
                 SET
                    status = ?2,
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE name = ?1
                   AND status <> 'settled'
                   AND status <> ?2;",
                params![update.bill, update.status.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(changed)
    }

    fn apply_edit(&mut self, bill: &str, edit: &BillEdit) -> RepoResult<()> {
        let tx = self.begin()?;
        let uuid = require_mutable_bill(&tx, bill)?;

        for username in &edit.removed_members {
            delete_member(&tx, &uuid, bill, username)?;
        }

        for username in &edit.new_members {
            validate_username(username)?;
            if member_exists(&tx, &uuid, username)? {
                return Err(RepoError::MemberAlreadyExists {
                    bill: bill.to_string(),
                    username: username.clone(),
                });
            }
            insert_member(&tx, &uuid, username, true)?;
        }

        for item in &edit.resolved_items {
            for user in &item.users {
                if !member_exists(&tx, &uuid, &user.username)? {
                    return Err(RepoError::MemberNotFound {
                        bill: bill.to_string(),
                        username: user.username.clone(),
                    });
                }
            }
            write_resolved_item(&tx, &uuid, bill, item)?;
        }

        touch_bill(&tx, &uuid)?;
        tx.commit()?;
        Ok(())
    }

    fn finalize_with<F, E>(&mut self, bill: &str, compute: F) -> Result<Settlement, E>
    where
        F: FnOnce(&Bill, &[ShareAssignment], &[ItemShares]) -> Result<Settlement, E>,
        E: From<RepoError>,
    {
        let tx = self.begin()?;
        let uuid = require_mutable_bill(&tx, bill)?;
        let current = load_bill(&tx, bill)?
            .ok_or_else(|| RepoError::BillNotFound(bill.to_string()))?;
        let assignments = load_bill_assignments(&tx, &uuid)?;
        let resolved = load_bill_resolved(&tx, &uuid)?;

        let settlement = compute(&current, &assignments, &resolved)?;
        write_settlement(&tx, &uuid, bill, &settlement)?;
        tx.commit().map_err(RepoError::from)?;
        Ok(settlement)
    }

    fn set_paid(&mut self, bill: &str, username: &str, paid: bool) -> RepoResult<()> {
        let (uuid, _) = require_bill(self.conn, bill)?;
        let changed = self.conn.execute(
            "UPDATE members SET paid = ?3 WHERE bill_uuid = ?1 AND username = ?2;",
            params![uuid, username, bool_to_int(paid)],
        )?;
        if changed == 0 {
            return Err(RepoError::MemberNotFound {
                bill: bill.to_string(),
                username: username.to_string(),
            });
        }
        Ok(())
    }

    fn list_member_bills(&self, username: &str) -> RepoResult<Vec<MemberBillRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT b.name, b.status, m.amount, m.paid, m.locked
             FROM members m
             INNER JOIN bills b ON b.uuid = m.bill_uuid
             WHERE m.username = ?1
             ORDER BY m.rowid ASC;",
        )?;
        let mut rows = stmt.query([username])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let status: String = row.get("status")?;
            let amount: String = row.get("amount")?;
            records.push(MemberBillRecord {
                name: row.get("name")?,
                status: parse_status(&status)?,
                amount: parse_decimal(&amount, "members.amount")?,
                paid: parse_flag(row.get("paid")?, "members.paid")?,
                locked: parse_flag(row.get("locked")?, "members.locked")?,
            });
        }
        Ok(records)
    }

    fn list_ledger_records(&self) -> RepoResult<Vec<LedgerRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.username, b.name, b.status, m.amount, m.paid
             FROM members m
             INNER JOIN bills b ON b.uuid = m.bill_uuid
             ORDER BY m.username ASC, m.rowid ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let status: String = row.get("status")?;
            let amount: String = row.get("amount")?;
            records.push(LedgerRecord {
                username: row.get("username")?,
                bill: row.get("name")?,
                status: parse_status(&status)?,
                amount: parse_decimal(&amount, "members.amount")?,
                paid: parse_flag(row.get("paid")?, "members.paid")?,
            });
        }
        Ok(records)
    }
}

fn hydrate_bill(conn: &Connection, row: BillRow) -> RepoResult<Bill> {
    let uuid = Uuid::parse_str(&row.uuid).map_err(|_| {
        RepoError::InvalidData(format!("invalid uuid value `{}` in bills.uuid", row.uuid))
    })?;
    let status = parse_status(&row.status)?;
    let items = load_items(conn, &row.uuid)?;
    let members = load_members(conn, &row.uuid)?;

    Ok(Bill {
        uuid,
        name: row.name,
        group: row.group,
        status,
        items,
        members,
    })
}

fn load_bill(conn: &Connection, name: &str) -> RepoResult<Option<Bill>> {
    let row = conn
        .query_row(
            "SELECT uuid, name, bill_group, status FROM bills WHERE name = ?1;",
            [name],
            |row| {
                Ok(BillRow {
                    uuid: row.get(0)?,
                    name: row.get(1)?,
                    group: row.get(2)?,
                    status: row.get(3)?,
                })
            },
        )
        .optional()?;

    match row {
        Some(row) => Ok(Some(hydrate_bill(conn, row)?)),
        None => Ok(None),
    }
}

fn load_bill_assignments(
    conn: &Connection,
    bill_uuid: &str,
) -> RepoResult<Vec<ShareAssignment>> {
    let mut stmt = conn.prepare(
        "SELECT s.username, i.name AS item_name, s.share_mode, s.share_value
         FROM shares s
         INNER JOIN items i ON i.id = s.item_id
         INNER JOIN members m ON m.bill_uuid = s.bill_uuid AND m.username = s.username
         WHERE s.bill_uuid = ?1
         ORDER BY i.position ASC, m.rowid ASC;",
    )?;
    let mut rows = stmt.query([bill_uuid])?;
    let mut assignments = Vec::new();
    while let Some(row) = rows.next()? {
        let mode_text: String = row.get("share_mode")?;
        let value_text: Option<String> = row.get("share_value")?;
        assignments.push(ShareAssignment {
            username: row.get("username")?,
            item: row.get("item_name")?,
            mode: parse_share_mode(&mode_text, value_text.as_deref())?,
        });
    }
    Ok(assignments)
}

fn load_bill_resolved(conn: &Connection, bill_uuid: &str) -> RepoResult<Vec<ItemShares>> {
    let mut stmt = conn.prepare(
        "SELECT i.name AS item_name, r.username, r.share
         FROM items i
         LEFT JOIN resolved_shares r ON r.item_id = i.id
         LEFT JOIN members m ON m.bill_uuid = r.bill_uuid AND m.username = r.username
         WHERE i.bill_uuid = ?1 AND i.resolved = 1
         ORDER BY i.position ASC, m.rowid ASC;",
    )?;
    let mut rows = stmt.query([bill_uuid])?;
    let mut resolved: Vec<ItemShares> = Vec::new();
    while let Some(row) = rows.next()? {
        let item: String = row.get("item_name")?;
        if resolved.last().map_or(true, |last| last.name != item) {
            resolved.push(ItemShares {
                name: item,
                users: Vec::new(),
            });
        }
        let username: Option<String> = row.get("username")?;
        let share: Option<String> = row.get("share")?;
        if let (Some(username), Some(share), Some(current)) = (username, share, resolved.last_mut())
        {
            current.users.push(NormalizedShare {
                username,
                share: parse_decimal(&share, "resolved_shares.share")?,
            });
        }
    }
    Ok(resolved)
}

fn load_items(conn: &Connection, bill_uuid: &str) -> RepoResult<Vec<Item>> {
    let mut stmt = conn.prepare(
        "SELECT name, unit_cost, quantity, category
         FROM items
         WHERE bill_uuid = ?1
         ORDER BY position ASC;",
    )?;
    let mut rows = stmt.query([bill_uuid])?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        let unit_cost: String = row.get("unit_cost")?;
        items.push(Item {
            name: row.get("name")?,
            unit_cost: parse_decimal(&unit_cost, "items.unit_cost")?,
            quantity: row.get("quantity")?,
            category: row.get("category")?,
        });
    }
    Ok(items)
}

fn load_members(conn: &Connection, bill_uuid: &str) -> RepoResult<Vec<Member>> {
    let mut stmt = conn.prepare(
        "SELECT username, locked, paid, amount
         FROM members
         WHERE bill_uuid = ?1
         ORDER BY rowid ASC;",
    )?;
    let mut rows = stmt.query([bill_uuid])?;
    let mut members = Vec::new();
    while let Some(row) = rows.next()? {
        let amount: String = row.get("amount")?;
        members.push(Member {
            username: row.get("username")?,
            locked: parse_flag(row.get("locked")?, "members.locked")?,
            paid: parse_flag(row.get("paid")?, "members.paid")?,
            amount: parse_decimal(&amount, "members.amount")?,
        });
    }
    Ok(members)
}

fn bill_header(conn: &Connection, name: &str) -> RepoResult<Option<(String, BillStatus)>> {
    let row = conn
        .query_row(
            "SELECT uuid, status FROM bills WHERE name = ?1;",
            [name],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;

    match row {
        Some((uuid, status)) => Ok(Some((uuid, parse_status(&status)?))),
        None => Ok(None),
    }
}

fn require_bill(conn: &Connection, name: &str) -> RepoResult<(String, BillStatus)> {
    bill_header(conn, name)?.ok_or_else(|| RepoError::BillNotFound(name.to_string()))
}

fn require_mutable_bill(tx: &Transaction<'_>, name: &str) -> RepoResult<String> {
    let (uuid, status) = require_bill(tx, name)?;
    if status.is_terminal() {
        return Err(RepoError::BillSettled(name.to_string()));
    }
    Ok(uuid)
}

fn member_exists(conn: &Connection, bill_uuid: &str, username: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM members WHERE bill_uuid = ?1 AND username = ?2
        );",
        params![bill_uuid, username],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn insert_member(
    tx: &Transaction<'_>,
    bill_uuid: &str,
    username: &str,
    locked: bool,
) -> RepoResult<()> {
    tx.execute(
        "INSERT INTO members (bill_uuid, username, locked) VALUES (?1, ?2, ?3);",
        params![bill_uuid, username, bool_to_int(locked)],
    )?;
    Ok(())
}

fn delete_member(
    tx: &Transaction<'_>,
    bill_uuid: &str,
    bill: &str,
    username: &str,
) -> RepoResult<()> {
    clear_member_resolutions(tx, bill_uuid, username)?;
    let changed = tx.execute(
        "DELETE FROM members WHERE bill_uuid = ?1 AND username = ?2;",
        params![bill_uuid, username],
    )?;
    if changed == 0 {
        return Err(RepoError::MemberNotFound {
            bill: bill.to_string(),
            username: username.to_string(),
        });
    }
    Ok(())
}

fn write_member_shares(
    tx: &Transaction<'_>,
    bill_uuid: &str,
    bill: &str,
    username: &str,
    shares: &[(String, ShareMode)],
) -> RepoResult<()> {
    tx.execute(
        "DELETE FROM shares WHERE bill_uuid = ?1 AND username = ?2;",
        params![bill_uuid, username],
    )?;

    for (item, mode) in shares {
        let item_id = lookup_item_id(tx, bill_uuid, bill, item)?;
        clear_resolution(tx, item_id)?;

        let (mode_text, value) = share_mode_to_db(*mode);
        tx.execute(
            "INSERT INTO shares (item_id, bill_uuid, username, share_mode, share_value)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![item_id, bill_uuid, username, mode_text, value],
        )?;
    }
    Ok(())
}

fn lookup_item_id(
    tx: &Transaction<'_>,
    bill_uuid: &str,
    bill: &str,
    item: &str,
) -> RepoResult<i64> {
    let id: Option<i64> = tx
        .query_row(
            "SELECT id FROM items WHERE bill_uuid = ?1 AND name = ?2;",
            params![bill_uuid, item],
            |row| row.get(0),
        )
        .optional()?;
    id.ok_or_else(|| RepoError::ItemNotFound {
        bill: bill.to_string(),
        item: item.to_string(),
    })
}

fn clear_resolution(tx: &Transaction<'_>, item_id: i64) -> RepoResult<()> {
    tx.execute("DELETE FROM resolved_shares WHERE item_id = ?1;", [item_id])?;
    tx.execute("UPDATE items SET resolved = 0 WHERE id = ?1;", [item_id])?;
    Ok(())
}

/// Drops the manager partition of every item the member claims or was
/// resolved into.
fn clear_member_resolutions(
    tx: &Transaction<'_>,
    bill_uuid: &str,
    username: &str,
) -> RepoResult<()> {
    let mut stmt = tx.prepare(
        "SELECT item_id FROM shares WHERE bill_uuid = ?1 AND username = ?2
         UNION
         SELECT item_id FROM resolved_shares WHERE bill_uuid = ?1 AND username = ?2;",
    )?;
    let item_ids = stmt
        .query_map(params![bill_uuid, username], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    for item_id in item_ids {
        clear_resolution(tx, item_id)?;
    }
    Ok(())
}

fn write_resolved_item(
    tx: &Transaction<'_>,
    bill_uuid: &str,
    bill: &str,
    item: &ItemShares,
) -> RepoResult<()> {
    let item_id = lookup_item_id(tx, bill_uuid, bill, &item.name)?;
    clear_resolution(tx, item_id)?;
    for user in &item.users {
        tx.execute(
            "INSERT INTO resolved_shares (item_id, bill_uuid, username, share)
             VALUES (?1, ?2, ?3, ?4);",
            params![item_id, bill_uuid, user.username, user.share.to_string()],
        )?;
    }
    tx.execute("UPDATE items SET resolved = 1 WHERE id = ?1;", [item_id])?;
    Ok(())
}

fn write_settlement(
    tx: &Transaction<'_>,
    bill_uuid: &str,
    bill: &str,
    settlement: &Settlement,
) -> RepoResult<()> {
    for cost in &settlement.costs {
        let item_id = lookup_item_id(tx, bill_uuid, bill, &cost.item)?;
        if !member_exists(tx, bill_uuid, &cost.username)? {
            return Err(RepoError::MemberNotFound {
                bill: bill.to_string(),
                username: cost.username.clone(),
            });
        }
        tx.execute(
            "INSERT INTO settled_costs (item_id, bill_uuid, username, share, cost)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                item_id,
                bill_uuid,
                cost.username,
                cost.share.to_string(),
                cost.cost.to_string(),
            ],
        )?;
    }

    for (username, amount) in &settlement.amounts {
        let changed = tx.execute(
            "UPDATE members SET amount = ?3 WHERE bill_uuid = ?1 AND username = ?2;",
            params![bill_uuid, username, amount.to_string()],
        )?;
        if changed == 0 {
            return Err(RepoError::MemberNotFound {
                bill: bill.to_string(),
                username: username.clone(),
            });
        }
    }

    tx.execute(
        "UPDATE bills
         SET
            status = 'settled',
            updated_at = (strftime('%s', 'now') * 1000)
         WHERE uuid = ?1;",
        [bill_uuid],
    )?;
    Ok(())
}

fn touch_bill(tx: &Transaction<'_>, bill_uuid: &str) -> RepoResult<()> {
    tx.execute(
        "UPDATE bills SET updated_at = (strftime('%s', 'now') * 1000) WHERE uuid = ?1;",
        [bill_uuid],
    )?;
    Ok(())
}

fn share_mode_to_db(mode: ShareMode) -> (&'static str, Option<String>) {
    match mode {
        ShareMode::Fixed(value) => ("fixed", Some(value.to_string())),
        ShareMode::Auto => ("auto", None),
    }
}

fn parse_share_mode(mode: &str, value: Option<&str>) -> RepoResult<ShareMode> {
    match (mode, value) {
        ("auto", None) => Ok(ShareMode::Auto),
        ("fixed", Some(value)) => Ok(ShareMode::Fixed(parse_decimal(
            value,
            "shares.share_value",
        )?)),
        (other, _) => Err(RepoError::InvalidData(format!(
            "invalid share mode `{other}` in shares.share_mode"
        ))),
    }
}

fn parse_status(value: &str) -> RepoResult<BillStatus> {
    BillStatus::parse(value).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid bill status `{value}` in bills.status"))
    })
}

fn parse_decimal(value: &str, column: &str) -> RepoResult<Decimal> {
    Decimal::from_str(value).map_err(|_| {
        RepoError::InvalidData(format!("invalid decimal value `{value}` in {column}"))
    })
}

fn parse_flag(value: i64, column: &str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid flag value `{other}` in {column}"
        ))),
    }
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
