use axum::{body::Body, http::Request, http::StatusCode};
use tower::ServiceExt;

#[tokio::test]
async fn livez_is_open_and_analysis_requires_auth() {
    let state = ks_api::test_state("test-key");
    let app = ks_api::create_router(state);

    let livez_response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/livez")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(livez_response.status(), StatusCode::OK);

    let unauthorized = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/analysis/sentiment")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"doc_id": "S100A000"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn progress_requires_auth_and_valid_uuid() {
    let state = ks_api::test_state("test-key");
    let app = ks_api::create_router(state);

    let unauthorized = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/analysis/00000000-0000-0000-0000-000000000000/progress")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);

    let bad_uuid = app
        .oneshot(
            Request::builder()
                .uri("/api/analysis/not-a-uuid/progress")
                .header("x-api-key", "test-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(bad_uuid.status(), StatusCode::BAD_REQUEST);
}
