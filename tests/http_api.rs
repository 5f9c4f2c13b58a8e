mod support;

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use serde::de::DeserializeOwned;
use support::{
    ARTICLE, FAIL_MARKER, Harness, HarnessOptions, QueueKind, StalledQueue, wait_for_job,
};
use texpress::{
    application::jobs::run_compile_job,
    infra::http::{ApiState, build_router},
};
use texpress_api_types::{
    CompletedResponse, ErrorBody, HealthResponse, JobLogsResponse, JobStatusResponse,
    QueuedResponse,
};
use tower::ServiceExt;
use uuid::Uuid;

fn router(harness: &Harness) -> Router {
    build_router(ApiState::new(Arc::clone(&harness.service)))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<serde_json::Value>) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    app.clone()
        .oneshot(builder.body(body).expect("request should build"))
        .await
        .expect("router should respond")
}

async fn read_json<T: DeserializeOwned>(response: Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

async fn compile(app: &Router, source: &str) -> Response {
    send(
        app,
        Method::POST,
        "/api/v1/compile",
        Some(serde_json::json!({ "source": source })),
    )
    .await
}

#[tokio::test]
async fn queued_submission_flows_through_status_logs_and_preview() {
    let harness = Harness::local();
    let app = router(&harness);

    let response = compile(&app, ARTICLE).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let queued: QueuedResponse = read_json(response).await;
    assert_eq!(queued.status, "pending");
    assert_eq!(queued.status_url, format!("/api/v1/jobs/{}", queued.job_id));

    let job_id = Uuid::parse_str(&queued.job_id).expect("uuid");
    wait_for_job(harness.repo.as_ref(), job_id, Duration::from_secs(10))
        .await
        .expect("job finishes");

    let response = send(&app, Method::GET, &queued.status_url, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let status: JobStatusResponse = read_json(response).await;
    assert_eq!(status.status, "completed");
    assert!(status.error.is_none());
    let preview_url = status.preview_url.expect("preview url");
    assert!(preview_url.contains("?token="));

    let response = send(&app, Method::GET, &format!("{}/logs", queued.status_url), None).await;
    let logs: JobLogsResponse = read_json(response).await;
    assert!(logs.logs.iter().any(|line| line.starts_with("== pdflatex pass")));

    let response = send(&app, Method::GET, &preview_url, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(response.headers()[header::CONTENT_DISPOSITION], "inline");
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "public, max-age=300"
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("pdf");
    assert!(bytes.starts_with(b"%PDF-"));

    let response = compile(&app, ARTICLE).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cached: CompletedResponse = read_json(response).await;
    assert_eq!(cached.source, "cache");
    assert!(cached.job_id.is_none());
    assert_eq!(cached.preview_url, preview_url);
}

#[tokio::test]
async fn preview_without_token_is_forbidden() {
    let harness = Harness::fallback();
    let app = router(&harness);

    let response = compile(&app, ARTICLE).await;
    assert_eq!(response.status(), StatusCode::OK);
    let completed: CompletedResponse = read_json(response).await;
    assert_eq!(completed.source, "fallback");
    let filename = completed.pdf_filename.expect("filename");

    let response = send(&app, Method::GET, &format!("/api/v1/preview/{filename}"), None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: ErrorBody = read_json(response).await;
    assert_eq!(body.error.code, "forbidden");

    let response = send(
        &app,
        Method::GET,
        &format!("/api/v1/preview/{filename}?token=guess"),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let harness = Harness::local();
    let app = router(&harness);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/compile")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .expect("request should build"),
        )
        .await
        .expect("router should respond");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = read_json(response).await;
    assert_eq!(body.error.code, "bad_request");

    let response = send(
        &app,
        Method::POST,
        "/api/v1/compile",
        Some(serde_json::json!({ "source": ARTICLE, "engine": "context" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = read_json(response).await;
    assert_eq!(body.error.code, "validation_error");

    let response = compile(&app, "\\begin{document}x\\end{document}").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = read_json(response).await;
    assert!(
        body.error
            .hint
            .as_deref()
            .is_some_and(|hint| hint.contains("documentclass"))
    );

    assert!(harness.repo.is_empty());
}

#[tokio::test]
async fn failed_inline_compile_returns_logs() {
    let harness = Harness::fallback();
    let app = router(&harness);

    let response = compile(&app, &ARTICLE.replace("Hello", FAIL_MARKER)).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: ErrorBody = read_json(response).await;
    assert_eq!(body.error.code, "compilation_failed");
    assert!(
        body.error
            .logs
            .iter()
            .any(|line| line.contains("Undefined control sequence"))
    );
}

#[tokio::test]
async fn unknown_and_malformed_job_ids_are_not_found() {
    let harness = Harness::local();
    let app = router(&harness);

    for uri in [
        format!("/api/v1/jobs/{}", Uuid::new_v4()),
        "/api/v1/jobs/not-a-uuid".to_owned(),
        format!("/api/v1/jobs/{}/logs", Uuid::new_v4()),
        format!("/api/v1/jobs/{}/download", Uuid::new_v4()),
    ] {
        let response = send(&app, Method::GET, &uri, None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn download_conflicts_until_completion_then_is_one_shot() {
    let stalled = Arc::new(StalledQueue::default());
    let harness = Harness::new(HarnessOptions {
        queue: QueueKind::Stalled(Arc::clone(&stalled)),
        ..Default::default()
    });
    let app = router(&harness);

    let queued: QueuedResponse = read_json(compile(&app, ARTICLE).await).await;
    let download = format!("/api/v1/jobs/{}/download", queued.job_id);

    let response = send(&app, Method::GET, &download, None).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: ErrorBody = read_json(response).await;
    assert_eq!(body.error.code, "not_ready");

    // Identical submissions while the job waits share its id.
    let response = compile(&app, ARTICLE).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let joined: QueuedResponse = read_json(response).await;
    assert_eq!(joined.job_id, queued.job_id);

    let payload = stalled.accepted.lock().expect("lock").remove(0);
    run_compile_job(&harness.context, payload).await.expect("run");

    let response = send(&app, Method::GET, &download, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"document.pdf\""
    );
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");

    let response = send(&app, Method::GET, &download, None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_reports_mode_and_backend() {
    let harness = Harness::local();
    let app = router(&harness);
    let health: HealthResponse = read_json(send(&app, Method::GET, "/_health", None).await).await;
    assert_eq!(health.mode, "queued");
    assert_eq!(health.backend, "local");

    let harness = Harness::fallback();
    let app = router(&harness);
    compile(&app, ARTICLE).await;
    let health: HealthResponse = read_json(send(&app, Method::GET, "/_health", None).await).await;
    assert_eq!(health.mode, "fallback");
    assert_eq!(health.backend, "postgres");
    assert_eq!(health.queue_depth, 0);
}
