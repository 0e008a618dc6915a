use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::info;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, Entity};

/// Balance needed to admit a charge: partial currency units round up.
pub(crate) fn required_balance(amount: Decimal) -> Decimal {
    amount.ceil()
}

pub(crate) fn entry(kind: TxKind, amount: Decimal, booking_id: Option<Ulid>, at: Ms) -> TransactionRef {
    TransactionRef {
        reference_id: Ulid::new(),
        booking_id,
        kind,
        amount,
        at,
    }
}

impl Engine {
    pub async fn create_wallet(&self, user_id: Ulid) -> Result<Wallet, EngineError> {
        let now = self.clock.now();
        let wallet = Arc::new(Mutex::new(Wallet::new(user_id, now)));
        // Publish it locked: a racing reader waits until it is durable.
        let guard = wallet.clone().lock_owned().await;
        match self.store.wallets.entry(user_id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(Entity::Wallet, user_id)),
            Entry::Vacant(slot) => {
                slot.insert(wallet);
            }
        }
        let _gate = self.gate.read().await;
        if let Err(e) = self.wal_append(&Event::WalletCreated { user_id, at: now }).await {
            self.store.wallets.remove(&user_id);
            return Err(e);
        }
        info!("created wallet for user {user_id}");
        Ok((*guard).clone())
    }

    /// Credit from a confirmed external payment. Returns the new balance.
    pub async fn top_up(&self, user_id: Ulid, amount: Decimal) -> Result<Decimal, EngineError> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::Invalid("top-up amount must be positive"));
        }
        let wallet = self.store.wallet(&user_id)?;
        let mut guard = wallet.lock().await;
        let at = self.clock.now();
        self.persist_wallet(&mut guard, vec![entry(TxKind::TopUp, amount, None, at)])
            .await?;
        metrics::counter!(crate::observability::WALLET_POSTINGS_TOTAL, "kind" => TxKind::TopUp.as_str())
            .increment(1);
        Ok(guard.balance)
    }

    /// `balance >= ceil(amount)`.
    pub async fn has_sufficient_balance(&self, user_id: Ulid, amount: Decimal) -> Result<bool, EngineError> {
        let wallet = self.store.wallet(&user_id)?;
        let guard = wallet.lock().await;
        Ok(guard.balance >= required_balance(amount))
    }

    pub(super) async fn ensure_sufficient_balance(
        &self,
        user_id: Ulid,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        let wallet = self.store.wallet(&user_id)?;
        let guard = wallet.lock().await;
        let required = required_balance(amount);
        if guard.balance < required {
            return Err(EngineError::InsufficientFunds {
                required,
                available: guard.balance,
            });
        }
        Ok(())
    }

    /// Check-and-debit as one step under the wallet's lock.
    pub async fn debit_checked(
        &self,
        user_id: Ulid,
        amount: Decimal,
        kind: TxKind,
        booking_id: Option<Ulid>,
    ) -> Result<TransactionRef, EngineError> {
        if amount < Decimal::ZERO {
            return Err(EngineError::Invalid("debit amount must not be negative"));
        }
        let wallet = self.store.wallet(&user_id)?;
        let mut guard = wallet.lock().await;
        let required = required_balance(amount);
        if guard.balance < required {
            return Err(EngineError::InsufficientFunds {
                required,
                available: guard.balance,
            });
        }
        let debit = entry(kind, -amount, booking_id, self.clock.now());
        self.persist_wallet(&mut guard, vec![debit.clone()]).await?;
        metrics::counter!(crate::observability::WALLET_POSTINGS_TOTAL, "kind" => kind.as_str())
            .increment(1);
        Ok(debit)
    }

    pub async fn credit(
        &self,
        user_id: Ulid,
        amount: Decimal,
        kind: TxKind,
        booking_id: Option<Ulid>,
    ) -> Result<TransactionRef, EngineError> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::Invalid("credit amount must be positive"));
        }
        let wallet = self.store.wallet(&user_id)?;
        let mut guard = wallet.lock().await;
        let credit = entry(kind, amount, booking_id, self.clock.now());
        self.persist_wallet(&mut guard, vec![credit.clone()]).await?;
        metrics::counter!(crate::observability::WALLET_POSTINGS_TOTAL, "kind" => kind.as_str())
            .increment(1);
        Ok(credit)
    }

    /// Post several entries as one atomic movement without a sufficiency
    /// check. Penalties may take the balance below zero. Empty is a no-op.
    pub(super) async fn post_unchecked(
        &self,
        user_id: Ulid,
        entries: Vec<TransactionRef>,
    ) -> Result<(), EngineError> {
        if entries.is_empty() {
            return Ok(());
        }
        let wallet = self.store.wallet(&user_id)?;
        let mut guard = wallet.lock().await;
        for e in &entries {
            metrics::counter!(crate::observability::WALLET_POSTINGS_TOTAL, "kind" => e.kind.as_str())
                .increment(1);
        }
        self.persist_wallet(&mut guard, entries).await?;
        if guard.balance < Decimal::ZERO {
            tracing::warn!("wallet of user {user_id} is in debt: {}", guard.balance);
        }
        Ok(())
    }
}
