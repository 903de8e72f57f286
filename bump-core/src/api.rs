//! Request and response shapes for the claims HTTP API, shared by the
//! server and any client driving it.

use serde::{Deserialize, Serialize};

use crate::claim::{ClaimId, ClaimStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClaimRequest {
    pub amount: f64,
    /// Asset symbol; the server substitutes its default when omitted or blank.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClaimResponse {
    pub claim_id: ClaimId,
    /// Plaintext secret. Returned exactly once; the server keeps only its hash.
    pub secret: String,
    pub expiry: u64,
    pub amount: f64,
    pub token: String,
}

/// Public view of a claim. Carries no secret material.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSummary {
    pub claim_id: ClaimId,
    pub amount: f64,
    pub token: String,
    pub status: ClaimStatus,
    pub created_at: u64,
    pub expiry: u64,
}

/// The id travels as a raw string so lookup failures and parse failures
/// are indistinguishable to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemClaimRequest {
    pub claim_id: String,
    pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedeemClaimResponse {
    pub amount: f64,
    pub token: String,
}
