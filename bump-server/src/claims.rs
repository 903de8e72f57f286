use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bump_core::api::{ClaimSummary, CreateClaimResponse, RedeemClaimResponse};
use bump_core::claim::{generate_secret, hash_secret, normalize_token, verify_secret};
use bump_core::claim::{ClaimId, ClaimStatus};
use thiserror::Error;
use tracing::info;

use crate::store::{ClaimStore, NewClaim, StoreError};

/// Why a redemption was refused. Callers facing the network must collapse
/// these into one undifferentiated failure; see `ServerError::Unavailable`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemError {
    #[error("claim not found")]
    NotFound,

    #[error("secret does not match")]
    InvalidSecret,

    #[error("claim already redeemed")]
    AlreadyRedeemed,

    #[error("claim expired")]
    Expired,
}

impl From<StoreError> for RedeemError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyRedeemed => RedeemError::AlreadyRedeemed,
            StoreError::Expired => RedeemError::Expired,
            StoreError::NotFound | StoreError::InvalidInput => RedeemError::NotFound,
        }
    }
}

/// Issuance, lookup, and redemption over an injected [`ClaimStore`].
pub struct ClaimService {
    store: Arc<dyn ClaimStore>,
}

impl ClaimService {
    pub fn new(store: Arc<dyn ClaimStore>) -> Self {
        Self { store }
    }

    /// Mint a claim: fresh secret, hash stored, plaintext returned to the
    /// caller exactly once.
    pub async fn issue(
        &self,
        amount: f64,
        token: Option<&str>,
    ) -> Result<CreateClaimResponse, StoreError> {
        let token = normalize_token(token);
        let secret = generate_secret();
        let secret_hash = hash_secret(&secret);

        let claim_id = self
            .store
            .create(NewClaim {
                secret_hash,
                amount,
                token,
                created_at: now_unix(),
            })
            .await?;
        let record = self.store.get(claim_id).await?;

        info!(
            "issued claim {} for {} {}, expires at {}",
            claim_id, record.amount, record.token, record.expiry
        );
        Ok(CreateClaimResponse {
            claim_id,
            secret,
            expiry: record.expiry,
            amount: record.amount,
            token: record.token,
        })
    }

    /// Public view of a claim. Reports `expired` for an overdue claim even
    /// before the sweep has moved it.
    pub async fn lookup(&self, claim_id: ClaimId) -> Option<ClaimSummary> {
        let record = self.store.get(claim_id).await.ok()?;
        let status = if record.status == ClaimStatus::Pending && record.is_expired(now_unix()) {
            ClaimStatus::Expired
        } else {
            record.status
        };
        Some(ClaimSummary {
            claim_id: record.claim_id,
            amount: record.amount,
            token: record.token,
            status,
            created_at: record.created_at,
            expiry: record.expiry,
        })
    }

    /// Verify the presented secret against the stored hash, then take the
    /// claim through its one `pending` to `redeemed` transition. The id
    /// arrives as a raw string; a malformed id fails the same way an
    /// unknown one does.
    pub async fn redeem(
        &self,
        claim_id: &str,
        secret: &str,
    ) -> Result<RedeemClaimResponse, RedeemError> {
        let claim_id: ClaimId = claim_id.parse().map_err(|_| RedeemError::NotFound)?;
        let record = self.store.get(claim_id).await.map_err(RedeemError::from)?;

        if !verify_secret(secret, &record.secret_hash) {
            return Err(RedeemError::InvalidSecret);
        }

        let record = self
            .store
            .mark_redeemed(claim_id, now_unix())
            .await
            .map_err(RedeemError::from)?;

        info!("claim {} redeemed", claim_id);
        Ok(RedeemClaimResponse {
            amount: record.amount,
            token: record.token,
        })
    }

    /// One pass of the background sweep.
    pub async fn expire_overdue(&self) -> usize {
        self.store.expire_overdue(now_unix()).await
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
