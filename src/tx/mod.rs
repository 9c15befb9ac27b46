//! Transaction management.
//!
//! Each public entity operation runs inside exactly one transaction: reads
//! in `ReadOnly`, writes in `ReadWrite`. A failed write rolls its
//! transaction back before the error reaches the caller.

use serde::{Deserialize, Serialize};

use crate::storage::StorageBackend;
use crate::{Error, Result};

/// Transaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

/// Opaque transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub u64);

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Transaction trait that all backends must implement.
pub trait Transaction: Send + Sync {
    fn mode(&self) -> TxMode;
    fn id(&self) -> TxId;

    /// Fail unless the transaction may write.
    fn ensure_writable(&self) -> Result<()> {
        match self.mode() {
            TxMode::ReadWrite => Ok(()),
            TxMode::ReadOnly => Err(Error::TxError(format!("{} is read-only", self.id()))),
        }
    }
}

/// Commit `tx` if `outcome` succeeded, roll it back otherwise.
///
/// A failed rollback is logged; the original error still wins.
pub async fn finish<B: StorageBackend, T>(backend: &B, tx: B::Tx, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            backend.commit_tx(tx).await?;
            Ok(value)
        }
        Err(err) => {
            let id = tx.id();
            if let Err(rollback) = backend.rollback_tx(tx).await {
                tracing::warn!(tx = %id, error = %rollback, "rollback failed");
            } else {
                tracing::debug!(tx = %id, error = %err, "rolled back");
            }
            Err(err)
        }
    }
}
