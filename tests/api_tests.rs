//! Management API tests against the real router and an in-memory
//! store, with a stubbed sink for the OAuth flows.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use vidbridge::api::server::{router, AppState};
use vidbridge::credentials::CredentialService;
use vidbridge::database::models::{ItemDbModel, JobDbModel};
use vidbridge::database::repositories::{
    ItemRepository, JobRepository, SqlxItemRepository, SqlxJobRepository,
};
use vidbridge::database::{init_write_pool, run_migrations};
use vidbridge::manager::JobManager;
use vidbridge::sink::{PublishRequest, SinkApi, TokenPair};
use vidbridge::{Error, Result};

/// Sink stub for the token endpoints.
struct StubSink;

#[async_trait]
impl SinkApi for StubSink {
    async fn publish(&self, _request: &PublishRequest) -> Result<String> {
        Err(Error::Other("not used".to_string()))
    }

    async fn verify(&self, _access_token: &str) -> Result<bool> {
        Ok(true)
    }

    async fn exchange_code(&self, code: &str, _redirect_uri: &str) -> Result<TokenPair> {
        if code == "GOODCODE" {
            Ok(TokenPair {
                access_token: "T-new".to_string(),
                refresh_token: "R-new".to_string(),
                expires_in: 7200,
                token_type: "Bearer".to_string(),
                scope: "video.upload".to_string(),
                open_id: "snk1".to_string(),
            })
        } else {
            Err(Error::sink_api("invalid_grant", "code expired"))
        }
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenPair> {
        Err(Error::AuthRefreshFailed("unused".to_string()))
    }
}

struct TestApp {
    app: axum::Router,
    jobs: Arc<dyn JobRepository>,
    items: Arc<dyn ItemRepository>,
}

async fn setup_test_app() -> TestApp {
    let pool = init_write_pool("sqlite::memory:")
        .await
        .expect("Failed to create test pool");
    run_migrations(&pool).await.expect("Failed to run migrations");

    let jobs: Arc<dyn JobRepository> =
        Arc::new(SqlxJobRepository::new(pool.clone(), pool.clone()));
    let items: Arc<dyn ItemRepository> = Arc::new(SqlxItemRepository::new(pool.clone(), pool));
    let sink: Arc<dyn SinkApi> = Arc::new(StubSink);

    let credentials = Arc::new(CredentialService::new(
        Arc::clone(&jobs),
        Arc::clone(&sink),
        "client-key-1",
        "https://auth.sink.example/authorize/",
        "http://localhost:8080/api/oauth/callback",
    ));

    let state = AppState {
        start_time: Instant::now(),
        manager: Arc::new(JobManager::new(Arc::clone(&jobs))),
        items: Arc::clone(&items),
        sink,
        credentials,
    };

    TestApp {
        app: router(state),
        jobs,
        items,
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let test = setup_test_app().await;

    let response = test
        .app
        .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn create_get_and_deactivate_job() {
    let test = setup_test_app().await;

    let create = serde_json::json!({
        "source_channel_id": "UCabc",
        "sink_account_id": "snk1",
        "sink_access_token": "T0"
    });
    let response = test
        .app
        .clone()
        .oneshot(
            Request::post("/api/jobs")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&create).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created = body_json(response).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["source_channel_id"], "UCabc");
    assert_eq!(created["has_access_token"], true);
    // Tokens themselves never appear in responses.
    assert!(created.get("sink_access_token").is_none());

    let response = test
        .app
        .clone()
        .oneshot(
            Request::get(format!("/api/jobs/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = test
        .app
        .clone()
        .oneshot(
            Request::post(format!("/api/jobs/{id}/deactivate"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let deactivated = body_json(response).await;
    assert_eq!(deactivated["is_active"], false);

    let stored = test.jobs.get_job_by_id(&id).await.unwrap().unwrap();
    assert!(!stored.active());
}

#[tokio::test]
async fn duplicate_mapping_returns_conflict() {
    let test = setup_test_app().await;
    let job = JobDbModel::new("UCabc", "snk1", "T0");
    test.jobs.upsert_job(&job).await.unwrap();

    let create = serde_json::json!({
        "source_channel_id": "UCabc",
        "sink_account_id": "snk-other",
        "sink_access_token": "T1"
    });
    let response = test
        .app
        .oneshot(
            Request::post("/api/jobs")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&create).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn unknown_job_returns_not_found() {
    let test = setup_test_app().await;

    let response = test
        .app
        .oneshot(
            Request::get("/api/jobs/nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn pending_items_respects_the_limit_ceiling() {
    let test = setup_test_app().await;
    let job = JobDbModel::new("UCabc", "snk1", "T0");
    test.jobs.upsert_job(&job).await.unwrap();

    for i in 0..3i64 {
        let mut item = ItemDbModel::new(format!("vid{i}"), &job.id, "t", "d");
        item.created_at = 1_000 + i;
        test.items.upsert_item(&item).await.unwrap();
    }

    let response = test
        .app
        .clone()
        .oneshot(
            Request::get("/api/items/pending?limit=2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 2);

    // An oversized limit clamps instead of erroring.
    let response = test
        .app
        .clone()
        .oneshot(
            Request::get("/api/items/pending?limit=5000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = test
        .app
        .oneshot(
            Request::get("/api/items/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["pending"], 3);
}

#[tokio::test]
async fn exchange_code_updates_job_tokens() {
    let test = setup_test_app().await;
    let job = JobDbModel::new("UCabc", "snk1", "T0");
    test.jobs.upsert_job(&job).await.unwrap();

    let payload = serde_json::json!({
        "code": "GOODCODE",
        "job_id": job.id,
    });
    let response = test
        .app
        .oneshot(
            Request::post("/api/oauth/exchange-code")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&payload).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["has_refresh_token"], true);

    let stored = test.jobs.get_job_by_id(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.sink_access_token, "T-new");
    assert_eq!(stored.sink_refresh_token.as_deref(), Some("R-new"));
    assert!(stored.sink_token_expires_at.is_some());
}

#[tokio::test]
async fn exchange_code_with_bad_code_is_a_gateway_error() {
    let test = setup_test_app().await;
    let job = JobDbModel::new("UCabc", "snk1", "T0");
    test.jobs.upsert_job(&job).await.unwrap();

    let payload = serde_json::json!({
        "code": "BADCODE",
        "job_id": job.id,
    });
    let response = test
        .app
        .oneshot(
            Request::post("/api/oauth/exchange-code")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&payload).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    // Tokens untouched on failure.
    let stored = test.jobs.get_job_by_id(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.sink_access_token, "T0");
}

#[tokio::test]
async fn authorize_redirects_to_the_sink_consent_page() {
    let test = setup_test_app().await;
    let job = JobDbModel::new("UCabc", "snk1", "T0");
    test.jobs.upsert_job(&job).await.unwrap();

    let response = test
        .app
        .oneshot(
            Request::get(format!("/api/oauth/authorize/{}", job.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response
        .headers()
        .get("location")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(location.starts_with("https://auth.sink.example/authorize/"));
    assert!(location.contains("client_key=client-key-1"));
    assert!(location.contains(&format!("state={}", job.id)));
}

#[tokio::test]
async fn callback_exchanges_the_code_for_the_state_job() {
    let test = setup_test_app().await;
    let job = JobDbModel::new("UCabc", "snk1", "T0");
    test.jobs.upsert_job(&job).await.unwrap();

    let response = test
        .app
        .oneshot(
            Request::get(format!(
                "/api/oauth/callback?code=GOODCODE&state={}",
                job.id
            ))
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stored = test.jobs.get_job_by_id(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.sink_access_token, "T-new");
}
