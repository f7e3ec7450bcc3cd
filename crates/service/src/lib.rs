//! # DCSN Signing Service
//!
//! Service wrapper around the collective-signing protocol: accepts
//! proposals, runs one round per request over an in-process roster,
//! returns the signature, and counts served requests.
//!
//! The HTTP surface mirrors the service API as JSON endpoints:
//!
//! | Route | Method | Body |
//! |-------|--------|------|
//! | `/health` | GET | status + version |
//! | `/info` | GET | roster size, fan-out, defaults |
//! | `/count` | GET | requests served so far |
//! | `/sign` | POST | `{ "proposal": "<hex>" }` → signature |
//!
//! One round = one fresh `LocalRouter` + factory; no state survives a
//! round apart from the roster keys and the served counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use curve25519_dalek::scalar::Scalar;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use dcsn_common::{verify, CryptoError, Mask, Policy, POINT_SIZE, SCALAR_SIZE};
use dcsn_protocol::{
    generate_local_roster, CreateProtocol, LocalProtocolFactory, LocalRouter, Roster, RosterError,
    RoundConfig, RoundError, SigningRound,
};

/// Service name reported by `/health` and the CLI.
pub const SERVICE_NAME: &str = "dcsn";

/// Service version reported by `/health` and the CLI.
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

// ════════════════════════════════════════════════════════════════════════════
// SERVICE CONFIG
// ════════════════════════════════════════════════════════════════════════════

/// Per-service signing defaults applied to every round.
///
/// Zero durations fall back to the protocol-crate defaults when the
/// round runs.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Requested fan-out K for every round.
    pub n_subtrees: usize,
    /// Whole-round deadline.
    pub protocol_timeout: Duration,
    /// Per-subleader deadline before failover.
    pub subleader_timeout: Duration,
    /// Per-leaf deadline before exclusion.
    pub leaves_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            n_subtrees: 2,
            protocol_timeout: Duration::ZERO,
            subleader_timeout: Duration::ZERO,
            leaves_timeout: Duration::ZERO,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// SIGNING SERVICE
// ════════════════════════════════════════════════════════════════════════════

/// Outcome of one served signing request.
#[derive(Clone, Debug)]
pub struct SignOutcome {
    /// Final signature bytes (`commitment ‖ response ‖ mask`).
    pub signature: Vec<u8>,
    /// Number of signers included in the mask.
    pub participants: usize,
    /// Roster size.
    pub total: usize,
}

/// In-process collective-signing service.
///
/// Holds the roster and its private keys (it plays every server of the
/// roster locally) plus a served-request counter. Each request builds a
/// fresh router and factory, so concurrent requests do not share any
/// protocol state.
pub struct SigningService {
    roster: Arc<Roster>,
    secrets: Vec<Scalar>,
    config: ServiceConfig,
    served: AtomicU64,
}

impl SigningService {
    /// Create a service with a freshly generated local roster of
    /// `n_signers` servers.
    pub fn new(n_signers: usize, config: ServiceConfig) -> Result<Self, RosterError> {
        let (roster, secrets) = generate_local_roster(n_signers)?;
        Ok(Self::from_parts(Arc::new(roster), secrets, config))
    }

    /// Create a service from an existing roster and aligned secrets.
    #[must_use]
    pub fn from_parts(roster: Arc<Roster>, secrets: Vec<Scalar>, config: ServiceConfig) -> Self {
        Self {
            roster,
            secrets,
            config,
            served: AtomicU64::new(0),
        }
    }

    /// The roster this service signs with.
    #[must_use]
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Requests served successfully so far.
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.served.load(Ordering::SeqCst)
    }

    /// Run one collective signing round for `proposal`.
    ///
    /// On success the served counter is incremented and the signature is
    /// returned together with its participation numbers.
    pub async fn sign_proposal(&self, proposal: Vec<u8>) -> Result<SignOutcome, RoundError> {
        let router = Arc::new(LocalRouter::new());
        let factory = Arc::new(
            LocalProtocolFactory::new(
                Arc::clone(&router),
                Arc::clone(&self.roster),
                self.secrets.clone(),
            )
            .map_err(RoundError::SubProtocol)?,
        );
        let create: CreateProtocol = Arc::new(move |spec| factory.spawn_subtree(&spec));

        let mut round_config = RoundConfig::new(proposal, self.config.n_subtrees, create);
        round_config.protocol_timeout = self.config.protocol_timeout;
        round_config.subleader_timeout = self.config.subleader_timeout;
        round_config.leaves_timeout = self.config.leaves_timeout;

        let round = SigningRound::new(Arc::clone(&self.roster), self.secrets[0], round_config);
        let result = round.run().await;

        // Wake any participant still parked on a channel before the
        // router goes away
        router.shutdown();

        let signature = result?;
        let participants = self.participants_in(&signature)?;
        self.served.fetch_add(1, Ordering::SeqCst);
        info!(
            participants,
            total = self.roster.len(),
            served = self.request_count(),
            "signing request served"
        );

        Ok(SignOutcome {
            signature,
            participants,
            total: self.roster.len(),
        })
    }

    /// Verify a signature produced by this roster under `policy`.
    pub fn verify_signature(
        &self,
        proposal: &[u8],
        signature: &[u8],
        policy: &Policy,
    ) -> Result<(), CryptoError> {
        verify(&self.roster.publics(), proposal, signature, policy)
    }

    fn participants_in(&self, signature: &[u8]) -> Result<usize, RoundError> {
        let mask = Mask::from_bytes(
            &self.roster.publics(),
            &signature[POINT_SIZE + SCALAR_SIZE..],
        )
        .map_err(RoundError::Crypto)?;
        Ok(mask.count_enabled())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// HTTP SURFACE (axum)
// ════════════════════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    name: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct InfoResponse {
    name: &'static str,
    version: &'static str,
    signers: usize,
    n_subtrees: usize,
}

#[derive(Serialize)]
struct CountResponse {
    served: u64,
}

/// `POST /sign` request body.
#[derive(Deserialize)]
pub struct SignRequest {
    /// Hex-encoded proposal bytes.
    pub proposal: String,
}

/// `POST /sign` response body.
#[derive(Serialize, Debug)]
pub struct SignResponse {
    /// Hex-encoded signature.
    pub signature: String,
    /// Signers included in the mask.
    pub participants: usize,
    /// Roster size.
    pub total: usize,
}

async fn health_handler(State(_): State<Arc<SigningService>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        name: SERVICE_NAME,
        version: SERVICE_VERSION,
    })
}

async fn info_handler(State(service): State<Arc<SigningService>>) -> Json<InfoResponse> {
    Json(InfoResponse {
        name: SERVICE_NAME,
        version: SERVICE_VERSION,
        signers: service.roster().len(),
        n_subtrees: service.config.n_subtrees,
    })
}

async fn count_handler(State(service): State<Arc<SigningService>>) -> Json<CountResponse> {
    Json(CountResponse {
        served: service.request_count(),
    })
}

async fn sign_handler(
    State(service): State<Arc<SigningService>>,
    Json(request): Json<SignRequest>,
) -> Result<Json<SignResponse>, (StatusCode, String)> {
    let proposal = hex::decode(&request.proposal)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid proposal hex: {}", e)))?;

    match service.sign_proposal(proposal).await {
        Ok(outcome) => Ok(Json(SignResponse {
            signature: hex::encode(&outcome.signature),
            participants: outcome.participants,
            total: outcome.total,
        })),
        Err(RoundError::MissingProposal) => {
            Err((StatusCode::BAD_REQUEST, RoundError::MissingProposal.to_string()))
        }
        Err(e) => {
            warn!(error = %e, "signing request failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// Build the service router with all observability and signing routes.
#[must_use]
pub fn build_router(service: Arc<SigningService>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/info", get(info_handler))
        .route("/count", get(count_handler))
        .route("/sign", post(sign_handler))
        .with_state(service)
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn make_service(n: usize) -> Arc<SigningService> {
        Arc::new(SigningService::new(n, ServiceConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn test_sign_proposal_roundtrip() {
        let service = make_service(5);
        let outcome = service.sign_proposal(b"proposal".to_vec()).await.unwrap();

        assert_eq!(outcome.participants, 5);
        assert_eq!(outcome.total, 5);
        service
            .verify_signature(b"proposal", &outcome.signature, &Policy::Complete)
            .unwrap();
    }

    #[tokio::test]
    async fn test_served_counter_increments_per_success() {
        let service = make_service(3);
        assert_eq!(service.request_count(), 0);

        service.sign_proposal(b"one".to_vec()).await.unwrap();
        service.sign_proposal(b"two".to_vec()).await.unwrap();
        assert_eq!(service.request_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_request_does_not_count() {
        let service = make_service(3);
        let result = service.sign_proposal(Vec::new()).await;
        assert!(matches!(result, Err(RoundError::MissingProposal)));
        assert_eq!(service.request_count(), 0);
    }

    #[tokio::test]
    async fn test_single_signer_service() {
        let service = make_service(1);
        let outcome = service.sign_proposal(b"solo".to_vec()).await.unwrap();
        assert_eq!(outcome.participants, 1);
        service
            .verify_signature(b"solo", &outcome.signature, &Policy::Complete)
            .unwrap();
    }

    #[tokio::test]
    async fn test_verify_rejects_other_proposal() {
        let service = make_service(4);
        let outcome = service.sign_proposal(b"proposal".to_vec()).await.unwrap();
        assert!(service
            .verify_signature(b"other", &outcome.signature, &Policy::Complete)
            .is_err());
    }

    // ────────────────────────────────────────────────────────────────────────
    // HANDLERS
    // ────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_sign_handler_happy_path() {
        let service = make_service(3);
        let request = SignRequest {
            proposal: hex::encode(b"proposal"),
        };
        let Json(response) = sign_handler(State(service.clone()), Json(request))
            .await
            .unwrap();

        assert_eq!(response.participants, 3);
        let signature = hex::decode(&response.signature).unwrap();
        service
            .verify_signature(b"proposal", &signature, &Policy::Complete)
            .unwrap();
        assert_eq!(service.request_count(), 1);
    }

    #[tokio::test]
    async fn test_sign_handler_rejects_bad_hex() {
        let service = make_service(3);
        let request = SignRequest {
            proposal: "not-hex".to_string(),
        };
        let err = sign_handler(State(service), Json(request)).await.unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_sign_handler_rejects_empty_proposal() {
        let service = make_service(3);
        let request = SignRequest {
            proposal: String::new(),
        };
        let err = sign_handler(State(service), Json(request)).await.unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_count_handler_reflects_served() {
        let service = make_service(3);
        service.sign_proposal(b"one".to_vec()).await.unwrap();

        let Json(response) = count_handler(State(service)).await;
        assert_eq!(response.served, 1);
    }

    #[test]
    fn test_build_router() {
        let service = make_service(2);
        let _router = build_router(service);
    }
}
