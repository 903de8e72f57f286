//! Claim lifecycle: identifiers, secrets, the hash scheme, status transitions.

use std::fmt;
use std::str::FromStr;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Claim lifetime from issuance to expiry (24 hours).
pub const CLAIM_TTL_SECS: u64 = 24 * 60 * 60;

/// Secret size in bytes before hex encoding (128 bits).
pub const SECRET_LEN: usize = 16;

/// Asset symbol applied when the issuer leaves `token` blank.
pub const DEFAULT_TOKEN: &str = "USDC";

/// Server-assigned public claim identifier.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimId(Uuid);

impl ClaimId {
    /// Mint a fresh identifier.
    pub fn generate() -> Self {
        ClaimId(Uuid::new_v4())
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ClaimId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(ClaimId)
    }
}

/// Claim status. Forward-only: `pending` may close to `redeemed` or `expired`;
/// terminal states never move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Pending,
    Redeemed,
    Expired,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Pending => "pending",
            ClaimStatus::Redeemed => "redeemed",
            ClaimStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored claim. `secret_hash` must never leave the redemption path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub claim_id: ClaimId,
    pub secret_hash: String,
    pub amount: f64,
    pub token: String,
    pub status: ClaimStatus,
    pub created_at: u64,
    pub expiry: u64,
}

impl ClaimRecord {
    /// Fresh pending record. Expiry is fixed at creation and never moves.
    pub fn new_pending(
        claim_id: ClaimId,
        secret_hash: String,
        amount: f64,
        token: String,
        created_at: u64,
    ) -> Self {
        Self {
            claim_id,
            secret_hash,
            amount,
            token,
            status: ClaimStatus::Pending,
            created_at,
            expiry: created_at.saturating_add(CLAIM_TTL_SECS),
        }
    }

    /// Whether the redemption window has closed at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expiry
    }
}

/// Amounts must be positive and finite.
pub fn validate_amount(amount: f64) -> Result<(), InvalidAmount> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(InvalidAmount)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("amount must be a positive number")]
pub struct InvalidAmount;

/// Resolve the asset symbol for issuance; blank means the default.
pub fn normalize_token(token: Option<&str>) -> String {
    match token {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => DEFAULT_TOKEN.to_string(),
    }
}

/// Generate a fresh secret: `SECRET_LEN` random bytes, hex-encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_LEN];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// One-way hash of a secret as persisted server-side.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare a presented secret against a stored hash. Touches every byte
/// regardless of where a mismatch occurs.
pub fn verify_secret(secret: &str, stored_hash: &str) -> bool {
    let computed = hash_secret(secret);
    if computed.len() != stored_hash.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in computed.bytes().zip(stored_hash.bytes()) {
        diff |= a ^ b;
    }
    diff == 0
}
