//! Defines routes for the resumable upload API.
//!
//! ## Structure
//! - **Upload flow**
//!   - `POST /upload` — store one chunk (multipart: `chunk`, `hash`, `fileHash`, `filename`)
//!   - `POST /verify` — resume query (`{fileHash, filename}`)
//!   - `POST /merge`  — assemble the final file (`{fileHash, filename, size}`)
//!
//! - **Probes**
//!   - `GET /healthz`, `GET /readyz`
//!
//! CORS is wide open: any origin, method and header. Preflight requests are
//! answered by the CORS layer with an empty 200.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{merge_chunks, upload_chunk, verify_upload},
    },
    services::upload_service::UploadService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Build the router for the upload API.
///
/// `max_body_bytes` caps every request body, chunk uploads included.
pub fn routes(max_body_bytes: usize) -> Router<UploadService> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/upload", post(upload_chunk))
        .route("/verify", post(verify_upload))
        .route("/merge", post(merge_chunks))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode, header},
    };
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    const BOUNDARY: &str = "X-CHUNK-STORE-BOUNDARY";

    fn app(tmp: &TempDir) -> Router {
        let service = UploadService::new(tmp.path(), 4, CancellationToken::new());
        routes(8 * 1024 * 1024).with_state(service)
    }

    fn text_part(body: &mut Vec<u8>, name: &str, value: &str) {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }

    fn upload_request(file_hash: &str, chunk_id: &str, filename: &str, payload: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"chunk\"; filename=\"blob\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(payload);
        body.extend_from_slice(b"\r\n");
        text_part(&mut body, "hash", chunk_id);
        text_part(&mut body, "fileHash", file_hash);
        text_part(&mut body, "filename", filename);
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(app, req).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn full_resumable_upload_flow() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp);
        let data: Vec<u8> = (0..2500u32).map(|i| (i % 256) as u8).collect();
        let pieces: Vec<&[u8]> = data.chunks(1000).collect();

        let (status, body) = send_json(
            &app,
            json_request("/verify", json!({ "fileHash": "f00d", "filename": "pic.png" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "shouldUpload": true, "uploadedList": [] }));

        for idx in [2usize, 0] {
            let (status, body) = send(
                &app,
                upload_request("f00d", &format!("f00d-{idx}"), "pic.png", pieces[idx]),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, b"received file chunk");
        }

        // interrupted: resume tells us what is left
        let (_, body) = send_json(
            &app,
            json_request("/verify", json!({ "fileHash": "f00d", "filename": "pic.png" })),
        )
        .await;
        assert_eq!(body, json!({ "shouldUpload": true, "uploadedList": ["f00d-0", "f00d-2"] }));

        send(&app, upload_request("f00d", "f00d-1", "pic.png", pieces[1])).await;

        let (status, body) = send_json(
            &app,
            json_request("/merge", json!({ "fileHash": "f00d", "filename": "pic.png", "size": 1000 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "code": 200, "message": "file merged success" }));
        assert_eq!(std::fs::read(tmp.path().join("f00d.png")).unwrap(), data);

        let (_, body) = send_json(
            &app,
            json_request("/verify", json!({ "fileHash": "f00d", "filename": "pic.png" })),
        )
        .await;
        assert_eq!(body, json!({ "shouldUpload": false }));

        let (status, body) = send(&app, upload_request("f00d", "f00d-0", "pic.png", pieces[0])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"file exist");
        assert!(!tmp.path().join("f00d").exists());
        // spool is empty again
        assert_eq!(std::fs::read_dir(tmp.path().join(".incoming")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn metadata_first_uploads_skip_the_spool() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp);
        let mut body = Vec::new();
        text_part(&mut body, "fileHash", "beef");
        text_part(&mut body, "filename", "doc.pdf");
        text_part(&mut body, "hash", "beef-0");
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"chunk\"; filename=\"blob\"\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"streamed payload");
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        let req = Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();

        let (status, body) = send(&app, req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"received file chunk");
        assert_eq!(
            std::fs::read(tmp.path().join("beef").join("beef-0")).unwrap(),
            b"streamed payload"
        );
        assert!(!tmp.path().join(".incoming").exists());
    }

    #[tokio::test]
    async fn merge_with_gap_reports_conflict() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp);
        send(&app, upload_request("gap", "gap-0", "a.bin", &[1u8; 10])).await;
        send(&app, upload_request("gap", "gap-2", "a.bin", &[3u8; 4])).await;

        let (status, body) = send_json(
            &app,
            json_request("/merge", json!({ "fileHash": "gap", "filename": "a.bin", "size": 10 })),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], 409);
        assert!(body["message"].as_str().unwrap().contains("missing chunk"));
        assert!(!tmp.path().join("gap.bin").exists());
    }

    #[tokio::test]
    async fn verify_accepts_json_without_content_type() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp);
        let req = Request::builder()
            .method(Method::POST)
            .uri("/verify")
            .body(Body::from(r#"{"fileHash":"abc","filename":"x.txt"}"#))
            .unwrap();

        let (status, body) = send_json(&app, req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["shouldUpload"], true);
    }

    #[tokio::test]
    async fn malformed_requests_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp);

        let (status, _) = send(
            &app,
            Request::builder()
                .method(Method::POST)
                .uri("/verify")
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send_json(
            &app,
            json_request("/merge", json!({ "fileHash": "../etc", "filename": "a", "size": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 400);

        let (status, _) = send(&app, upload_request("abc", "no-ordinal", "a.bin", b"x")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(std::fs::read_dir(tmp.path().join(".incoming")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn merge_of_unknown_session_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp);

        let (status, body) = send_json(
            &app,
            json_request("/merge", json!({ "fileHash": "ghost", "filename": "a.bin", "size": 10 })),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], 404);
    }

    #[tokio::test]
    async fn preflight_is_allowed_from_anywhere() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp);
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/upload")
            .header(header::ORIGIN, "http://localhost:8080")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn probes_report_ok() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp);

        let (status, body) = send_json(
            &app,
            Request::builder().uri("/healthz").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = send_json(
            &app,
            Request::builder().uri("/readyz").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["disk"]["ok"], true);
    }
}
