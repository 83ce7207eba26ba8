//! Queries for ledger entries.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use tiffin_core::{LedgerEntryId, Money, RideId};

use crate::models::{EntryKind, LedgerAccount, LedgerEntry};
use crate::store::StoreError;

#[derive(sqlx::FromRow)]
struct EntryRow {
    id: LedgerEntryId,
    account_kind: String,
    account_id: i32,
    kind: EntryKind,
    amount: Money,
    ride_id: Option<RideId>,
    memo: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(r: EntryRow) -> Result<Self, Self::Error> {
        let account = LedgerAccount::from_parts(&r.account_kind, r.account_id).ok_or_else(|| {
            StoreError::DataCorruption(format!(
                "invalid ledger account in database: {}",
                r.account_kind
            ))
        })?;
        Ok(Self {
            id: r.id,
            account,
            kind: r.kind,
            amount: r.amount,
            ride_id: r.ride_id,
            memo: r.memo,
            created_at: r.created_at,
        })
    }
}

const ENTRY_COLUMNS: &str =
    "id, account_kind, account_id, kind, amount, ride_id, memo, created_at";

/// Append an entry.
///
/// A second entry of the same kind for the same ride is rejected with
/// [`StoreError::Conflict`].
pub(super) async fn insert(
    conn: &mut PgConnection,
    account: LedgerAccount,
    kind: EntryKind,
    amount: Money,
    ride_id: Option<RideId>,
    memo: Option<&str>,
    now: DateTime<Utc>,
) -> Result<LedgerEntry, StoreError> {
    let row: EntryRow = sqlx::query_as(&format!(
        "INSERT INTO ledger_entries (account_kind, account_id, kind, amount, ride_id, memo, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING {ENTRY_COLUMNS}"
    ))
    .bind(account.kind())
    .bind(account.raw_id())
    .bind(kind)
    .bind(amount)
    .bind(ride_id)
    .bind(memo)
    .bind(now)
    .fetch_one(conn)
    .await
    .map_err(super::conflict_on_unique)?;
    row.try_into()
}

pub(super) async fn for_account(
    conn: &mut PgConnection,
    account: LedgerAccount,
    limit: usize,
) -> Result<Vec<LedgerEntry>, StoreError> {
    let rows: Vec<EntryRow> = sqlx::query_as(&format!(
        "SELECT {ENTRY_COLUMNS} FROM ledger_entries \
         WHERE account_kind = $1 AND account_id = $2 \
         ORDER BY id DESC LIMIT $3"
    ))
    .bind(account.kind())
    .bind(account.raw_id())
    .bind(i64::try_from(limit).unwrap_or(i64::MAX))
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(LedgerEntry::try_from).collect()
}

pub(super) async fn for_ride(
    conn: &mut PgConnection,
    ride_id: RideId,
) -> Result<Vec<LedgerEntry>, StoreError> {
    let rows: Vec<EntryRow> = sqlx::query_as(&format!(
        "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE ride_id = $1 ORDER BY id"
    ))
    .bind(ride_id)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(LedgerEntry::try_from).collect()
}

pub(super) async fn total(
    conn: &mut PgConnection,
    account: LedgerAccount,
) -> Result<Money, StoreError> {
    Ok(sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM ledger_entries \
         WHERE account_kind = $1 AND account_id = $2",
    )
    .bind(account.kind())
    .bind(account.raw_id())
    .fetch_one(conn)
    .await?)
}
