//! HTTP client for the claims service.

use bump_core::api::{
    ClaimSummary, CreateClaimRequest, CreateClaimResponse, RedeemClaimRequest, RedeemClaimResponse,
};
use bump_core::ClaimId;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server refused: {0}")]
    Rejected(String),
}

/// Body the service sends alongside non-2xx statuses.
#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct ApiClient {
    base: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn create_claim(
        &self,
        amount: f64,
        token: Option<String>,
    ) -> Result<CreateClaimResponse, ApiError> {
        let resp = self
            .http
            .post(format!("{}/claims", self.base))
            .json(&CreateClaimRequest { amount, token })
            .send()
            .await?;
        parse_response(resp).await
    }

    pub async fn get_claim(&self, claim_id: ClaimId) -> Result<ClaimSummary, ApiError> {
        let resp = self
            .http
            .get(format!("{}/claims", self.base))
            .query(&[("claimId", claim_id.to_string())])
            .send()
            .await?;
        parse_response(resp).await
    }

    pub async fn redeem_claim(
        &self,
        claim_id: &str,
        secret: &str,
    ) -> Result<RedeemClaimResponse, ApiError> {
        let resp = self
            .http
            .post(format!("{}/claims/redeem", self.base))
            .json(&RedeemClaimRequest {
                claim_id: claim_id.to_string(),
                secret: secret.to_string(),
            })
            .send()
            .await?;
        parse_response(resp).await
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json::<T>().await?);
    }
    let message = resp
        .json::<ErrorBody>()
        .await
        .map(|body| body.error)
        .unwrap_or_else(|_| status.to_string());
    Err(ApiError::Rejected(message))
}
