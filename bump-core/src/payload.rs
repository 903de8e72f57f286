//! Claim payload: the versioned JSON document pushed device-to-device.

use serde::{Deserialize, Serialize};

use crate::claim::ClaimId;

/// Current payload version.
pub const PAYLOAD_VERSION: u8 = 1;

/// Payloads above this size are rejected before parsing.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024;

/// What the sender hands the receiver: everything needed to redeem.
/// Not persisted anywhere; consumed once on the receiving side.
/// Unknown fields are tolerated so later versions can add to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimPayload {
    #[serde(rename = "v")]
    pub version: u8,
    pub claim_id: ClaimId,
    pub secret: String,
    pub token: String,
    pub amount: f64,
}

impl ClaimPayload {
    /// Build a current-version payload for a freshly issued claim.
    pub fn new(claim_id: ClaimId, secret: String, token: String, amount: f64) -> Self {
        Self {
            version: PAYLOAD_VERSION,
            claim_id,
            secret,
            token,
            amount,
        }
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        serde_json::to_vec(self).map_err(PayloadError::Malformed)
    }

    /// Parse bytes received from a peer. Size-bounded and version-checked;
    /// bad input is an error, never a panic.
    pub fn decode(bytes: &[u8]) -> Result<Self, PayloadError> {
        if bytes.len() > MAX_PAYLOAD_LEN {
            return Err(PayloadError::TooLarge);
        }
        let payload: ClaimPayload =
            serde_json::from_slice(bytes).map_err(PayloadError::Malformed)?;
        if payload.version != PAYLOAD_VERSION {
            return Err(PayloadError::UnsupportedVersion(payload.version));
        }
        Ok(payload)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("payload too large")]
    TooLarge,
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported payload version {0}")]
    UnsupportedVersion(u8),
}
