//! Shop balances, payouts and ledger audits.

use chrono::Utc;
use tiffin_core::{Money, ShopId};
use tracing::{error, info, instrument};

use super::{DispatchError, DispatchService, ShopBalance};
use crate::models::{AccountAudit, LedgerAccount, LedgerEntry};
use crate::notify::Notifier;
use crate::store::DispatchStore;

/// Most ledger entries returned per page.
const MAX_LEDGER_PAGE: usize = 200;

/// Longest accepted payout memo.
const MAX_MEMO_LEN: usize = 200;

impl<S: DispatchStore, N: Notifier> DispatchService<S, N> {
    /// The shop's balance, checked against its ledger.
    ///
    /// # Errors
    ///
    /// `NotFound` if the shop does not exist.
    pub async fn shop_balance(&self, shop: ShopId) -> Result<ShopBalance, DispatchError> {
        let audit = self.audit_account(LedgerAccount::Shop(shop)).await?;
        Ok(ShopBalance {
            shop_id: shop,
            balance: audit.stored,
            audit,
        })
    }

    /// The shop's latest ledger entries, newest first.
    ///
    /// # Errors
    ///
    /// Store failures only.
    pub async fn shop_ledger(
        &self,
        shop: ShopId,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, DispatchError> {
        Ok(self
            .store
            .ledger_entries(LedgerAccount::Shop(shop), limit.clamp(1, MAX_LEDGER_PAGE))
            .await?)
    }

    /// Pay money out of the shop's balance.
    ///
    /// # Errors
    ///
    /// `Validation` unless the amount is positive whole cents,
    /// `InsufficientBalance` if it exceeds the balance.
    #[instrument(skip(self, memo), fields(shop_id = %shop, amount = %amount))]
    pub async fn request_payout(
        &self,
        shop: ShopId,
        amount: Money,
        memo: Option<&str>,
    ) -> Result<LedgerEntry, DispatchError> {
        if amount.is_negative() || amount.is_zero() {
            return Err(DispatchError::Validation(
                "payout amount must be positive".to_owned(),
            ));
        }
        if amount.round_cents() != amount {
            return Err(DispatchError::Validation(
                "payout amount must be whole cents".to_owned(),
            ));
        }
        let memo = memo.map(str::trim).filter(|m| !m.is_empty());
        if memo.is_some_and(|m| m.len() > MAX_MEMO_LEN) {
            return Err(DispatchError::Validation(format!(
                "memo must be at most {MAX_MEMO_LEN} characters"
            )));
        }

        let entry = self
            .store
            .record_payout(shop, amount, memo, Utc::now())
            .await?;
        info!(entry_id = %entry.id, "Payout recorded");
        Ok(entry)
    }

    /// Recompute an account's balance from its ledger entries and compare it
    /// with the stored balance.
    ///
    /// A mismatch is reported as an error event but is not itself an error.
    ///
    /// # Errors
    ///
    /// `NotFound` if the account does not exist.
    pub async fn audit_account(&self, account: LedgerAccount) -> Result<AccountAudit, DispatchError> {
        let stored = self.store.account_balance(account).await?;
        let computed = self.store.ledger_total(account).await?;
        let audit = AccountAudit::new(account, stored, computed);
        if !audit.consistent {
            error!(%account, %stored, %computed, "Ledger does not match stored balance");
        }
        Ok(audit)
    }
}
