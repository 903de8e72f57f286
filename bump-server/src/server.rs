use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use bump_core::api::{
    ClaimSummary, CreateClaimRequest, CreateClaimResponse, RedeemClaimRequest, RedeemClaimResponse,
};
use bump_core::claim::ClaimId;
use bump_core::claim_link;

use crate::claims::ClaimService;
use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::store::{ClaimStore, MemoryClaimStore, StoreError};

pub struct AppState {
    pub config: ServerConfig,
    pub claims: Arc<ClaimService>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryClaimStore::new()))
    }

    pub fn with_store(config: ServerConfig, store: Arc<dyn ClaimStore>) -> Self {
        Self {
            config,
            claims: Arc::new(ClaimService::new(store)),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        // Issuance and lookup
        .route("/claims", post(create_claim).get(get_claim))
        // Redemption (single generic failure mode, see ServerError)
        .route("/claims/redeem", post(redeem_claim))
        // Deep-link target: what a scanned QR resolves to
        .route("/claim/:claim_id", get(resolve_claim_link))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = state.config.bind_addr();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("claims service listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetClaimParams {
    claim_id: Option<String>,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn create_claim(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateClaimRequest>,
) -> Result<Json<CreateClaimResponse>> {
    let issued = state
        .claims
        .issue(req.amount, req.token.as_deref())
        .await
        .map_err(|err| match err {
            StoreError::InvalidInput => {
                ServerError::InvalidRequest("amount must be a positive number".to_string())
            }
            other => ServerError::Internal(other.to_string()),
        })?;

    info!(
        "fallback link for claim {}: {}",
        issued.claim_id,
        claim_link(&state.config.link_base, issued.claim_id)
    );
    Ok(Json(issued))
}

async fn get_claim(
    State(state): State<Arc<AppState>>,
    Query(params): Query<GetClaimParams>,
) -> Result<Json<ClaimSummary>> {
    let raw = params
        .claim_id
        .ok_or_else(|| ServerError::InvalidRequest("missing claimId".to_string()))?;
    let claim_id: ClaimId = raw.parse().map_err(|_| ServerError::NotFound)?;

    let summary = state
        .claims
        .lookup(claim_id)
        .await
        .ok_or(ServerError::NotFound)?;
    Ok(Json(summary))
}

async fn resolve_claim_link(
    State(state): State<Arc<AppState>>,
    Path(claim_id): Path<String>,
) -> Result<Json<ClaimSummary>> {
    let claim_id: ClaimId = claim_id.parse().map_err(|_| ServerError::NotFound)?;
    let summary = state
        .claims
        .lookup(claim_id)
        .await
        .ok_or(ServerError::NotFound)?;
    Ok(Json(summary))
}

async fn redeem_claim(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RedeemClaimRequest>,
) -> Result<Json<RedeemClaimResponse>> {
    let redeemed = state
        .claims
        .redeem(&req.claim_id, &req.secret)
        .await
        .map_err(|err| {
            // The reason stays in the log; the wire sees one answer.
            info!("redemption refused: {}", err);
            ServerError::Unavailable
        })?;
    Ok(Json(redeemed))
}
