//! Ledger audit command.
//!
//! Recomputes an account balance from its ledger entries and compares it with
//! the balance stored on the account row.

use tiffin_core::{CaptainId, ShopId};
use tiffin_dispatch::db::{self, PgStore};
use tiffin_dispatch::models::{AccountAudit, LedgerAccount};
use tiffin_dispatch::store::DispatchStore;
use tracing::{error, info};

use super::database_url;

/// Audit one account; the platform account when neither ID is given.
///
/// # Errors
///
/// Returns an error on database failure or when the balance does not match
/// its entries.
pub async fn run(shop: Option<i32>, captain: Option<i32>) -> Result<(), Box<dyn std::error::Error>> {
    let account = match (shop, captain) {
        (Some(id), _) => LedgerAccount::Shop(ShopId::new(id)),
        (None, Some(id)) => LedgerAccount::Captain(CaptainId::new(id)),
        (None, None) => LedgerAccount::Platform,
    };

    let store = PgStore::new(db::create_pool(&database_url()?).await?);
    let stored = store.account_balance(account).await?;
    let computed = store.ledger_total(account).await?;
    let audit = AccountAudit::new(account, stored, computed);

    if audit.consistent {
        info!(%account, balance = %audit.stored, "Ledger consistent");
        Ok(())
    } else {
        error!(%account, stored = %audit.stored, computed = %audit.computed, "Ledger mismatch");
        Err(format!("{account}: stored {} but entries sum to {}", audit.stored, audit.computed).into())
    }
}
