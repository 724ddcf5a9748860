//! Record of purchase tokens the auto-consume policy has already acted on.

use crate::error::BillingError;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Mutex;

pub trait ConsumeLedger: Send + Sync {
    /// Marks `token` as being consumed. False when it already was.
    fn try_claim(&self, token: &str) -> bool;

    /// Forgets a claim, e.g. after the consume call failed.
    fn release(&self, token: &str);

    fn contains(&self, token: &str) -> bool;
}

/// Claims held for the lifetime of the process.
///
/// Successful claims are never evicted, so the set grows with every consumed
/// token. Use [`SledLedger`] for long running processes.
#[derive(Default)]
pub struct InMemoryLedger {
    tokens: Mutex<HashSet<String>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConsumeLedger for InMemoryLedger {
    fn try_claim(&self, token: &str) -> bool {
        match self.tokens.lock() {
            Ok(mut tokens) => tokens.insert(token.to_string()),
            Err(_) => false,
        }
    }

    fn release(&self, token: &str) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.remove(token);
        }
    }

    fn contains(&self, token: &str) -> bool {
        self.tokens
            .lock()
            .map(|tokens| tokens.contains(token))
            .unwrap_or(false)
    }
}

/// Claims persisted in a sled tree, so they survive restarts.
///
/// sled holds an exclusive lock on its directory until every handle is
/// dropped. Within one process, open the [`sled::Db`] once and build ledgers
/// with [`SledLedger::from_db`] instead of reopening the path.
#[derive(Clone)]
pub struct SledLedger {
    tree: sled::Tree,
}

impl SledLedger {
    pub fn from_db(db: &sled::Db) -> Result<Self, BillingError> {
        Ok(Self {
            tree: db.open_tree("consumed")?,
        })
    }
}

impl ConsumeLedger for SledLedger {
    fn try_claim(&self, token: &str) -> bool {
        let claimed_at = Utc::now().to_rfc3339().into_bytes();
        match self
            .tree
            .compare_and_swap(token.as_bytes(), None as Option<&[u8]>, Some(claimed_at))
        {
            Ok(Ok(())) => {
                if let Err(e) = self.tree.flush() {
                    tracing::warn!(error = %e, "failed to flush consume ledger");
                }
                true
            }
            Ok(Err(_)) => false,
            Err(e) => {
                tracing::error!(token = %token, error = %e, "consume ledger write failed");
                false
            }
        }
    }

    fn release(&self, token: &str) {
        if let Err(e) = self.tree.remove(token.as_bytes()) {
            tracing::error!(token = %token, error = %e, "consume ledger remove failed");
        }
    }

    fn contains(&self, token: &str) -> bool {
        self.tree.contains_key(token.as_bytes()).unwrap_or(false)
    }
}
