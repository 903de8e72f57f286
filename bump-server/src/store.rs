use std::collections::HashMap;

use async_trait::async_trait;
use bump_core::claim::{validate_amount, ClaimId, ClaimRecord, ClaimStatus};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("invalid claim input")]
    InvalidInput,

    #[error("claim not found")]
    NotFound,

    #[error("claim already redeemed")]
    AlreadyRedeemed,

    #[error("claim expired")]
    Expired,
}

/// Fields of a claim the issuer supplies; the store assigns the id and
/// derives the expiry.
#[derive(Debug, Clone)]
pub struct NewClaim {
    pub secret_hash: String,
    pub amount: f64,
    pub token: String,
    pub created_at: u64,
}

/// Keyed claim storage. Every operation on a single claim id is
/// linearizable, so concurrent redemptions cannot both succeed.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Persist a fresh pending claim and return its assigned id.
    async fn create(&self, new_claim: NewClaim) -> Result<ClaimId, StoreError>;

    /// Read-only lookup of the stored record.
    async fn get(&self, claim_id: ClaimId) -> Result<ClaimRecord, StoreError>;

    /// Compare-and-set `pending` to `redeemed`. A claim past its expiry is
    /// moved to `expired` instead and the call fails with `Expired`.
    async fn mark_redeemed(&self, claim_id: ClaimId, now: u64) -> Result<ClaimRecord, StoreError>;

    /// Move every overdue pending claim to `expired`; returns how many moved.
    async fn expire_overdue(&self, now: u64) -> usize;
}

/// In-memory store, suitable for development and tests. The write lock is
/// what makes `mark_redeemed` atomic.
#[derive(Default)]
pub struct MemoryClaimStore {
    claims: RwLock<HashMap<ClaimId, ClaimRecord>>,
}

impl MemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClaimStore for MemoryClaimStore {
    async fn create(&self, new_claim: NewClaim) -> Result<ClaimId, StoreError> {
        validate_amount(new_claim.amount).map_err(|_| StoreError::InvalidInput)?;
        if new_claim.secret_hash.is_empty() {
            return Err(StoreError::InvalidInput);
        }

        let claim_id = ClaimId::generate();
        let record = ClaimRecord::new_pending(
            claim_id,
            new_claim.secret_hash,
            new_claim.amount,
            new_claim.token,
            new_claim.created_at,
        );
        self.claims.write().await.insert(claim_id, record);
        Ok(claim_id)
    }

    async fn get(&self, claim_id: ClaimId) -> Result<ClaimRecord, StoreError> {
        self.claims
            .read()
            .await
            .get(&claim_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn mark_redeemed(&self, claim_id: ClaimId, now: u64) -> Result<ClaimRecord, StoreError> {
        let mut claims = self.claims.write().await;
        let record = claims.get_mut(&claim_id).ok_or(StoreError::NotFound)?;

        match record.status {
            ClaimStatus::Redeemed => return Err(StoreError::AlreadyRedeemed),
            ClaimStatus::Expired => return Err(StoreError::Expired),
            ClaimStatus::Pending => {}
        }

        if record.is_expired(now) {
            record.status = ClaimStatus::Expired;
            return Err(StoreError::Expired);
        }

        record.status = ClaimStatus::Redeemed;
        Ok(record.clone())
    }

    async fn expire_overdue(&self, now: u64) -> usize {
        let mut claims = self.claims.write().await;
        let mut moved = 0;
        for record in claims.values_mut() {
            if record.status == ClaimStatus::Pending && record.is_expired(now) {
                record.status = ClaimStatus::Expired;
                moved += 1;
            }
        }
        if moved > 0 {
            debug!("expired {} overdue claim(s)", moved);
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bump_core::claim::{hash_secret, CLAIM_TTL_SECS};

    fn new_claim(amount: f64) -> NewClaim {
        NewClaim {
            secret_hash: hash_secret("secret"),
            amount,
            token: "USDC".to_string(),
            created_at: 1_000,
        }
    }

    #[tokio::test]
    async fn create_assigns_unique_pending_ids() {
        let store = MemoryClaimStore::new();
        let a = store.create(new_claim(10.0)).await.unwrap();
        let b = store.create(new_claim(10.0)).await.unwrap();
        assert_ne!(a, b);

        let record = store.get(a).await.unwrap();
        assert_eq!(record.status, ClaimStatus::Pending);
        assert_eq!(record.expiry, 1_000 + CLAIM_TTL_SECS);
    }

    #[tokio::test]
    async fn create_rejects_bad_amounts() {
        let store = MemoryClaimStore::new();
        assert_eq!(
            store.create(new_claim(0.0)).await,
            Err(StoreError::InvalidInput)
        );
        assert_eq!(
            store.create(new_claim(-1.0)).await,
            Err(StoreError::InvalidInput)
        );
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let store = MemoryClaimStore::new();
        assert_eq!(
            store.get(ClaimId::generate()).await,
            Err(StoreError::NotFound)
        );
    }

    #[tokio::test]
    async fn mark_redeemed_happens_once() {
        let store = MemoryClaimStore::new();
        let id = store.create(new_claim(10.0)).await.unwrap();

        let record = store.mark_redeemed(id, 2_000).await.unwrap();
        assert_eq!(record.status, ClaimStatus::Redeemed);

        assert_eq!(
            store.mark_redeemed(id, 2_000).await,
            Err(StoreError::AlreadyRedeemed)
        );
    }

    #[tokio::test]
    async fn mark_redeemed_past_expiry_flips_status() {
        let store = MemoryClaimStore::new();
        let id = store.create(new_claim(10.0)).await.unwrap();

        let late = 1_000 + CLAIM_TTL_SECS + 1;
        assert_eq!(
            store.mark_redeemed(id, late).await,
            Err(StoreError::Expired)
        );
        assert_eq!(store.get(id).await.unwrap().status, ClaimStatus::Expired);

        // Terminal state holds even for an in-window retry.
        assert_eq!(
            store.mark_redeemed(id, 2_000).await,
            Err(StoreError::Expired)
        );
    }

    #[tokio::test]
    async fn expire_overdue_only_touches_pending() {
        let store = MemoryClaimStore::new();
        let overdue = store.create(new_claim(10.0)).await.unwrap();
        let redeemed = store.create(new_claim(5.0)).await.unwrap();
        store.mark_redeemed(redeemed, 2_000).await.unwrap();

        let late = 1_000 + CLAIM_TTL_SECS + 1;
        assert_eq!(store.expire_overdue(late).await, 1);
        assert_eq!(
            store.get(overdue).await.unwrap().status,
            ClaimStatus::Expired
        );
        assert_eq!(
            store.get(redeemed).await.unwrap().status,
            ClaimStatus::Redeemed
        );

        assert_eq!(store.expire_overdue(late).await, 0);
    }

    #[tokio::test]
    async fn concurrent_redemptions_yield_one_winner() {
        use std::sync::Arc;

        let store = Arc::new(MemoryClaimStore::new());
        let id = store.create(new_claim(10.0)).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(
                async move { store.mark_redeemed(id, 2_000).await },
            ));
        }

        let mut wins = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }
}
