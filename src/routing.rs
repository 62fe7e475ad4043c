//! Application router configuration.

use axum::{
    Json, Router,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::{
    AppState,
    budget::endpoints::{
        acknowledge_endpoint, association_approval_endpoint, create_budget_endpoint,
        get_budget_endpoint, present_endpoint, progress_endpoint, propose_update_endpoint,
        review_endpoint, submit_endpoint, update_draft_endpoint,
    },
    compensation::{
        compensation_status_endpoint, decide_override_endpoint, request_override_endpoint,
    },
    endpoints,
    exception::resolve_exception_endpoint,
    governance::upsert_governance_endpoint,
    logging::logging_middleware,
    snapshot::create_team_season_endpoint,
    transaction::endpoints::{
        create_transaction_endpoint, delete_transaction_endpoint, get_transaction_endpoint,
        import_endpoint, list_transactions_endpoint, receipt_requirement_endpoint,
        revalidate_endpoint,
    },
};

/// Return a router with all the app's routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(endpoints::BUDGETS, post(create_budget_endpoint))
        .route(endpoints::BUDGET, get(get_budget_endpoint))
        .route(endpoints::BUDGET_DRAFT, put(update_draft_endpoint))
        .route(endpoints::BUDGET_SUBMIT, post(submit_endpoint))
        .route(endpoints::BUDGET_REVIEW, post(review_endpoint))
        .route(endpoints::BUDGET_PRESENT, post(present_endpoint))
        .route(endpoints::BUDGET_ACKNOWLEDGE, post(acknowledge_endpoint))
        .route(
            endpoints::BUDGET_PROPOSE_UPDATE,
            post(propose_update_endpoint),
        )
        .route(endpoints::BUDGET_PROGRESS, get(progress_endpoint))
        .route(
            endpoints::BUDGET_ASSOCIATION_APPROVAL,
            post(association_approval_endpoint),
        )
        .route(
            endpoints::TRANSACTIONS,
            post(create_transaction_endpoint).get(list_transactions_endpoint),
        )
        .route(
            endpoints::TRANSACTION,
            get(get_transaction_endpoint).delete(delete_transaction_endpoint),
        )
        .route(endpoints::TRANSACTION_REVALIDATE, post(revalidate_endpoint))
        .route(endpoints::TRANSACTIONS_IMPORT, post(import_endpoint))
        .route(endpoints::EXCEPTION_RESOLVE, post(resolve_exception_endpoint))
        .route(endpoints::GOVERNANCE, put(upsert_governance_endpoint))
        .route(endpoints::TEAM_SEASONS, post(create_team_season_endpoint))
        .route(
            endpoints::RECEIPT_REQUIREMENT,
            get(receipt_requirement_endpoint),
        )
        .route(endpoints::RULE_OVERRIDES, post(request_override_endpoint))
        .route(
            endpoints::RULE_OVERRIDE_DECIDE,
            post(decide_override_endpoint),
        )
        .route(
            endpoints::COMPENSATION_STATUS,
            get(compensation_status_endpoint),
        )
        .fallback(not_found)
        .layer(middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "error": "the requested resource could not be found" })),
    )
}

#[cfg(test)]
mod routing_tests {
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use rusqlite::Connection;
    use serde_json::{Value, json};

    use crate::{
        AppState,
        endpoints::{self, format_endpoint},
        family::{PlayerStatus, add_player, create_family},
        governance::{GovernanceRule, ThresholdMode, create_association, upsert_governance_rule},
        receipt::ReceiptPolicy,
        routing::build_router,
        team::{create_category, create_team},
    };

    struct Fixture {
        server: TestServer,
        team_id: i64,
        category_id: i64,
        family_ids: Vec<i64>,
    }

    /// An association in PERCENT 60 mode, a team with one category, and five
    /// families each with an active player.
    fn fixture() -> Fixture {
        let state = AppState::new(Connection::open_in_memory().unwrap()).unwrap();

        let (team_id, category_id, family_ids) = {
            let conn = state.connection().unwrap();
            let association_id = create_association("Test League", &conn).unwrap();
            upsert_governance_rule(
                &GovernanceRule {
                    association_id,
                    parent_ack_mode: ThresholdMode::Percent,
                    default_count_threshold: None,
                    default_percent_threshold: Some(60),
                    allow_team_override: false,
                    override_min_percent: None,
                    override_max_percent: None,
                    override_min_count: None,
                    override_max_count: None,
                    requires_association_approval: false,
                    receipt_policy: ReceiptPolicy::default(),
                },
                &conn,
            )
            .unwrap();
            let team = create_team(association_id, "U12 Comets", &conn).unwrap();
            let category = create_category(team.id, "Equipment", &conn).unwrap();

            let mut family_ids = Vec::new();
            for name in ["Abbott", "Baker", "Cruz", "Diaz", "Evans"] {
                let family = create_family(team.id, name, &conn).unwrap();
                add_player(family.id, "Player", PlayerStatus::Active, &conn).unwrap();
                family_ids.push(family.id);
            }

            (team.id, category.id, family_ids)
        };

        let server = TestServer::new(build_router(state));

        Fixture {
            server,
            team_id,
            category_id,
            family_ids,
        }
    }

    /// Drive a budget over HTTP to PRESENTED, returning (budget_id,
    /// presented_version_id).
    async fn present_budget(fixture: &Fixture) -> (i64, i64) {
        let response = fixture
            .server
            .post(endpoints::TEAM_SEASONS)
            .add_header("X-User-Id", "3")
            .add_header("X-User-Role", "ASSOCIATION_ADMIN")
            .json(&json!({
                "team_id": fixture.team_id,
                "association_id": 1,
                "label": "2026 Spring",
                "start_date": "2026-03-01",
                "end_date": "2026-06-30",
            }))
            .await;
        response.assert_status_ok();
        let season_id = response.json::<Value>()["data"]["id"].as_i64().unwrap();

        let response = fixture
            .server
            .post(endpoints::BUDGETS)
            .add_header("X-User-Id", "1")
            .add_header("X-User-Role", "TREASURER")
            .json(&json!({
                "team_id": fixture.team_id,
                "team_season_id": season_id,
                "allocations": [
                    { "category_id": fixture.category_id, "allocated_cents": 250_000 },
                ],
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let budget_id = response.json::<Value>()["id"].as_i64().unwrap();

        fixture
            .server
            .post(&format_endpoint(endpoints::BUDGET_SUBMIT, budget_id))
            .add_header("X-User-Id", "1")
            .add_header("X-User-Role", "TREASURER")
            .await
            .assert_status_ok();

        fixture
            .server
            .post(&format_endpoint(endpoints::BUDGET_REVIEW, budget_id))
            .add_header("X-User-Id", "2")
            .add_header("X-User-Role", "PRESIDENT")
            .json(&json!({ "approve": true }))
            .await
            .assert_status_ok();

        fixture
            .server
            .post(&format_endpoint(endpoints::BUDGET_PRESENT, budget_id))
            .add_header("X-User-Id", "1")
            .add_header("X-User-Role", "TREASURER")
            .json(&json!({}))
            .await
            .assert_status_ok();

        let detail = fixture
            .server
            .get(&format_endpoint(endpoints::BUDGET, budget_id))
            .add_header("X-User-Id", "100")
            .add_header("X-User-Role", "PARENT")
            .await
            .json::<Value>();
        let version_id = detail["version"]["id"].as_i64().unwrap();

        (budget_id, version_id)
    }

    async fn acknowledge(
        fixture: &Fixture,
        budget_id: i64,
        version_id: i64,
        family_id: i64,
    ) -> axum_test::TestResponse {
        fixture
            .server
            .post(&format_endpoint(endpoints::BUDGET_ACKNOWLEDGE, budget_id))
            .add_header("X-User-Id", format!("{}", 100 + family_id))
            .add_header("X-User-Role", "PARENT")
            .json(&json!({
                "budget_version_id": version_id,
                "family_id": family_id,
                "has_questions": false,
            }))
            .await
    }

    #[tokio::test]
    async fn acknowledgments_lock_the_budget_at_sixty_percent() {
        let fixture = fixture();
        let (budget_id, version_id) = present_budget(&fixture).await;

        // Two of five families is 40%: under the 60% threshold.
        for family_id in &fixture.family_ids[..2] {
            let response = acknowledge(&fixture, budget_id, version_id, *family_id).await;
            response.assert_status_ok();
            assert_eq!(response.json::<Value>()["locked"], json!(false));
        }

        // The third acknowledgment crosses 60% and locks.
        let response = acknowledge(&fixture, budget_id, version_id, fixture.family_ids[2]).await;
        response.assert_status_ok();
        let outcome = response.json::<Value>();
        assert_eq!(outcome["locked"], json!(true));
        assert_eq!(outcome["progress"]["threshold_met"], json!(true));

        // A late family hits a conflict, not a silent no-op.
        let late = acknowledge(&fixture, budget_id, version_id, fixture.family_ids[3]).await;
        late.assert_status(StatusCode::CONFLICT);

        let detail = fixture
            .server
            .get(&format_endpoint(endpoints::BUDGET, budget_id))
            .add_header("X-User-Id", "100")
            .add_header("X-User-Role", "PARENT")
            .await
            .json::<Value>();
        assert_eq!(detail["budget"]["status"], json!("LOCKED"));
        assert_eq!(detail["budget"]["locked_by"], json!("SYSTEM"));
    }

    #[tokio::test]
    async fn requests_without_identity_headers_are_refused() {
        let fixture = fixture();

        let response = fixture
            .server
            .post(endpoints::BUDGETS)
            .json(&json!({
                "team_id": fixture.team_id,
                "team_season_id": 1,
                "allocations": [],
            }))
            .await;

        response.assert_status(StatusCode::FORBIDDEN);
        assert_eq!(response.json::<Value>()["success"], json!(false));
    }

    #[tokio::test]
    async fn parents_may_not_record_transactions_over_http() {
        let fixture = fixture();

        let response = fixture
            .server
            .post(endpoints::TRANSACTIONS)
            .add_header("X-User-Id", "100")
            .add_header("X-User-Role", "PARENT")
            .json(&json!({
                "team_id": fixture.team_id,
                "amount_cents": 4_500,
                "transaction_type": "EXPENSE",
                "category_id": fixture.category_id,
                "vendor": "Acme Sports",
                "transaction_date": "2026-04-01",
            }))
            .await;

        response.assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn transaction_entry_and_exception_resolution_round_trip() {
        let fixture = fixture();

        // No receipt on an old, large expense raises an exception.
        let response = fixture
            .server
            .post(endpoints::TRANSACTIONS)
            .add_header("X-User-Id", "1")
            .add_header("X-User-Role", "TREASURER")
            .json(&json!({
                "team_id": fixture.team_id,
                "amount_cents": 20_000,
                "transaction_type": "EXPENSE",
                "category_id": fixture.category_id,
                "vendor": "Acme Sports",
                "transaction_date": "2025-01-15",
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let transaction = response.json::<Value>();
        assert_eq!(transaction["status"], json!("EXCEPTION"));
        let transaction_id = transaction["id"].as_i64().unwrap();

        let response = fixture
            .server
            .post(&format_endpoint(endpoints::EXCEPTION_RESOLVE, transaction_id))
            .add_header("X-User-Id", "1")
            .add_header("X-User-Role", "TREASURER")
            .json(&json!({
                "resolution": "CORRECT",
                "corrections": { "receipt_url": "https://receipts.example/1.pdf" },
            }))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["status"], json!("VALIDATED"));

        // Resolving again conflicts: the transaction left EXCEPTION.
        let response = fixture
            .server
            .post(&format_endpoint(endpoints::EXCEPTION_RESOLVE, transaction_id))
            .add_header("X-User-Id", "1")
            .add_header("X-User-Role", "TREASURER")
            .json(&json!({ "resolution": "REVALIDATE" }))
            .await;
        response.assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn unknown_routes_return_a_json_not_found() {
        let fixture = fixture();

        let response = fixture.server.get("/api/espresso").await;

        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json::<Value>()["success"], json!(false));
    }
}
