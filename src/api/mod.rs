//! API — Axum web server for the settlement service.
//!
//! One mutating endpoint (`POST /api/bet`) plus read-only
//! observability endpoints. CORS enabled for local development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::info;

pub use routes::AppState;

/// Run the API server until shutdown. Blocks the calling task.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;
    info!(port, "Accepting bets on http://localhost:{port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;
    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin("*".parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static("x-caller-id"),
        ]);

    Router::new()
        // Settlement
        .route("/api/bet", post(routes::place_bet))
        // Read-only observability
        .route("/api/users/:id", get(routes::get_user))
        .route("/api/contracts/:id", get(routes::get_contract))
        .route("/api/contracts/:id/bets", get(routes::get_contract_bets))
        .route("/api/bets/:id", get(routes::get_bet))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received, draining connections");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::ledger::MockBetLedger;
    use crate::types::{Bet, BookieError, Contract, Outcome, Pool, Settlement, User};

    fn test_state(mock: MockBetLedger) -> AppState {
        Arc::new(mock)
    }

    fn make_settlement() -> Settlement {
        Settlement {
            bet: Bet {
                id: "bet-001".to_string(),
                user_id: "user-001".to_string(),
                contract_id: "contract-001".to_string(),
                amount: 10.0,
                outcome: Outcome::Yes,
                dpm_weight: 100000.0 / 11000.0,
                prob_before: 0.5,
                prob_average: 0.5241689672301659,
                prob_after: 12100.0 / 22100.0,
                created_time: 1_700_000_000_000,
            },
            new_balance: 990.0,
        }
    }

    fn bet_request(caller: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/bet")
            .header("content-type", "application/json");
        if let Some(id) = caller {
            builder = builder.header("x-caller-id", id);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = build_router(test_state(MockBetLedger::new()));
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_place_bet_success() {
        let mut mock = MockBetLedger::new();
        mock.expect_place_bet()
            .withf(|req| {
                req.caller.as_deref() == Some("user-001")
                    && req.amount == 10.0
                    && req.outcome == "YES"
                    && req.contract_id == "contract-001"
            })
            .returning(|_| Ok(make_settlement()));

        let app = build_router(test_state(mock));
        let resp = app
            .oneshot(bet_request(
                Some("user-001"),
                r#"{"amount":10.0,"outcome":"YES","contractId":"contract-001"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "success");
        assert!(json.get("message").is_none());
    }

    #[tokio::test]
    async fn test_place_bet_without_identity() {
        let mut mock = MockBetLedger::new();
        mock.expect_place_bet()
            .withf(|req| req.caller.is_none())
            .returning(|_| Err(BookieError::Unauthorized));

        let app = build_router(test_state(mock));
        let resp = app
            .oneshot(bet_request(
                None,
                r#"{"amount":10.0,"outcome":"YES","contractId":"contract-001"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "Not authorized");
    }

    #[tokio::test]
    async fn test_place_bet_insufficient_balance() {
        let mut mock = MockBetLedger::new();
        mock.expect_place_bet().returning(|_| {
            Err(BookieError::InsufficientBalance {
                needed: 60.0,
                available: 50.0,
            })
        });

        let app = build_router(test_state(mock));
        let resp = app
            .oneshot(bet_request(
                Some("user-001"),
                r#"{"amount":60.0,"outcome":"YES","contractId":"contract-001"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);
        let json = body_json(resp).await;
        assert!(json["message"]
            .as_str()
            .unwrap()
            .contains("Insufficient balance"));
    }

    #[tokio::test]
    async fn test_place_bet_malformed_body() {
        // No expectations: the handler must reject before the ledger.
        let app = build_router(test_state(MockBetLedger::new()));
        let resp = app
            .oneshot(bet_request(Some("user-001"), "{not json"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "error");
    }

    #[tokio::test]
    async fn test_place_bet_conflict_maps_to_409() {
        let mut mock = MockBetLedger::new();
        mock.expect_place_bet()
            .returning(|_| Err(BookieError::Conflict));

        let app = build_router(test_state(mock));
        let resp = app
            .oneshot(bet_request(
                Some("user-001"),
                r#"{"amount":10.0,"outcome":"NO","contractId":"contract-001"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_get_user() {
        let mut mock = MockBetLedger::new();
        mock.expect_user()
            .withf(|id| id == "user-001")
            .returning(|_| Ok(Some(User::sample())));

        let app = build_router(test_state(mock));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/users/user-001")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["id"], "user-001");
        assert_eq!(json["name"], "alice");
        assert_eq!(json["balance"], 1000.0);
    }

    #[tokio::test]
    async fn test_get_user_missing() {
        let mut mock = MockBetLedger::new();
        mock.expect_user().returning(|_| Ok(None));

        let app = build_router(test_state(mock));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/users/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "error");
    }

    #[tokio::test]
    async fn test_get_contract_reports_probability() {
        let mut mock = MockBetLedger::new();
        mock.expect_contract().returning(|_| {
            let mut contract = Contract::sample();
            contract.pot = Pool::new(300.0, 100.0);
            Ok(Some(contract))
        });

        let app = build_router(test_state(mock));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/contracts/contract-001")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["id"], "contract-001");
        assert!((json["impliedProbability"].as_f64().unwrap() - 0.9).abs() < 1e-12);
        assert_eq!(json["pot"]["YES"], 300.0);
    }

    #[tokio::test]
    async fn test_get_contract_bets() {
        let mut mock = MockBetLedger::new();
        mock.expect_contract()
            .returning(|_| Ok(Some(Contract::sample())));
        mock.expect_contract_bets()
            .withf(|id| id == "contract-001")
            .returning(|_| Ok(vec![make_settlement().bet]));

        let app = build_router(test_state(mock));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/contracts/contract-001/bets")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        let bets = json.as_array().unwrap();
        assert_eq!(bets.len(), 1);
        assert_eq!(bets[0]["userId"], "user-001");
        assert_eq!(bets[0]["outcome"], "YES");
    }

    #[tokio::test]
    async fn test_get_bet_missing() {
        let mut mock = MockBetLedger::new();
        mock.expect_bet().returning(|_| Ok(None));

        let app = build_router(test_state(mock));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/bets/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
