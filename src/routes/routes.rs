//! Defines the HTTP surface of the upload store.
//!
//! ## Structure
//! - `POST /upload` — store the multipart `file` field (basic auth required)
//! - `GET  /{access_prefix}/{year}/{month}/{day}/{filename}` — fetch a stored
//!   upload (no auth; `HEAD` and range requests supported)
//! - `GET  /healthz`, `GET /readyz` — liveness and readiness checks
//!
//! The access prefix may span several segments, e.g. `static/files`.

use crate::{
    config::AppConfig,
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{get_file, upload_file, upload_method_not_allowed},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    routing::{get, post},
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Build the router for all routes, still waiting for its `AppState`.
pub fn routes(cfg: &AppConfig) -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/upload",
            post(upload_file)
                .fallback(upload_method_not_allowed)
                .layer(DefaultBodyLimit::max(cfg.max_upload_bytes)),
        )
        .route(&download_route(&cfg.access_prefix), get(get_file))
}

/// The complete application: routes, state, request tracing and timeout.
pub fn app(cfg: &AppConfig) -> Router {
    routes(cfg)
        .with_state(AppState::new(cfg))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            cfg.request_timeout(),
        ))
        .layer(TraceLayer::new_for_http())
}

fn download_route(access_prefix: &str) -> String {
    format!("/{}/{{year}}/{{month}}/{{day}}/{{filename}}", access_prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Method, Request, header},
    };
    use axum_test::{
        TestResponse, TestServer,
        multipart::{MultipartForm, Part},
    };
    use base64::{Engine as _, engine::general_purpose};
    use bytes::Bytes;
    use futures::{StreamExt, stream};
    use std::{
        io,
        path::{Path, PathBuf},
    };
    use tempfile::TempDir;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn test_config(root: &Path) -> AppConfig {
        AppConfig {
            upload_dir: root.to_path_buf(),
            access_prefix: "files".into(),
            username: "admin".into(),
            password: "s3cret".into(),
            ..AppConfig::default()
        }
    }

    fn server(cfg: &AppConfig) -> TestServer {
        TestServer::new(app(cfg)).unwrap()
    }

    fn basic_auth(user: &str, pass: &str) -> String {
        format!(
            "Basic {}",
            general_purpose::STANDARD.encode(format!("{}:{}", user, pass))
        )
    }

    async fn upload(server: &TestServer, filename: &str, content: &[u8]) -> TestResponse {
        server
            .post("/upload")
            .add_header(header::AUTHORIZATION, basic_auth("admin", "s3cret"))
            .multipart(
                MultipartForm::new()
                    .add_text("note", "ignored")
                    .add_part("file", Part::bytes(content.to_vec()).file_name(filename)),
            )
            .await
    }

    /// Every regular file below `root`, including temp files.
    fn stored_files(root: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else {
                    found.push(path);
                }
            }
        }
        found
    }

    /// Split `prefix/yyyy/mm/dd/<uuid><ext>` and check each component's shape.
    fn assert_public_url(url: &str, prefix: &str, extension: &str) -> Uuid {
        let rest = url
            .strip_prefix(prefix)
            .and_then(|r| r.strip_prefix('/'))
            .unwrap_or_else(|| panic!("`{}` does not start with `{}/`", url, prefix));
        let parts: Vec<&str> = rest.split('/').collect();
        assert_eq!(parts.len(), 4, "unexpected url shape: {}", url);
        assert_eq!(parts[0].len(), 4);
        assert_eq!(parts[1].len(), 2);
        assert_eq!(parts[2].len(), 2);
        for date_part in &parts[..3] {
            assert!(date_part.chars().all(|c| c.is_ascii_digit()), "{}", url);
        }
        let stem = parts[3]
            .strip_suffix(extension)
            .unwrap_or_else(|| panic!("`{}` does not end with `{}`", url, extension));
        Uuid::parse_str(stem).unwrap()
    }

    #[tokio::test]
    async fn upload_then_download_round_trip() {
        let root = TempDir::new().unwrap();
        let cfg = test_config(root.path());
        let server = server(&cfg);
        let content = b"\x89PNG\r\n\x1a\nnot really a png".to_vec();

        let response = upload(&server, "photo.png", &content).await;
        response.assert_status(StatusCode::OK);
        let url = response.text();
        let id = assert_public_url(&url, "files", ".png");
        assert_eq!(id.get_version_num(), 4);

        let on_disk = root.path().join(url.strip_prefix("files/").unwrap());
        assert_eq!(std::fs::read(&on_disk).unwrap(), content);

        let download = server.get(&format!("/{}", url)).await;
        download.assert_status(StatusCode::OK);
        assert_eq!(download.as_bytes().as_ref(), content.as_slice());
        assert_eq!(download.header(header::CONTENT_TYPE), "image/png");
        assert_eq!(
            download.header(header::CACHE_CONTROL),
            "public, max-age=315360000"
        );
        assert_eq!(
            download.header(header::CONTENT_DISPOSITION),
            format!(r#"inline; filename="{}.png""#, id).as_str()
        );
    }

    #[tokio::test]
    async fn extensionless_upload_is_served_as_octet_stream() {
        let root = TempDir::new().unwrap();
        let server = server(&test_config(root.path()));

        let response = upload(&server, "README", b"read me").await;
        response.assert_status(StatusCode::OK);
        let url = response.text();
        assert_public_url(&url, "files", "");

        let download = server.get(&format!("/{}", url)).await;
        download.assert_status(StatusCode::OK);
        assert_eq!(download.text(), "read me");
        assert_eq!(
            download.header(header::CONTENT_TYPE),
            "application/octet-stream"
        );
    }

    #[tokio::test]
    async fn repeated_uploads_get_distinct_paths() {
        let root = TempDir::new().unwrap();
        let server = server(&test_config(root.path()));

        let first = upload(&server, "same.txt", b"one").await.text();
        let second = upload(&server, "same.txt", b"two").await.text();

        assert_ne!(first, second);
        assert_eq!(stored_files(root.path()).len(), 2);
        assert_eq!(server.get(&format!("/{}", first)).await.text(), "one");
        assert_eq!(server.get(&format!("/{}", second)).await.text(), "two");
    }

    #[tokio::test]
    async fn upload_without_credentials_is_unauthorized() {
        let root = TempDir::new().unwrap();
        let server = server(&test_config(root.path()));

        let response = server
            .post("/upload")
            .multipart(
                MultipartForm::new()
                    .add_part("file", Part::bytes(b"data".to_vec()).file_name("a.txt")),
            )
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(response.text(), "Unauthorized");
        assert!(stored_files(root.path()).is_empty());
    }

    #[tokio::test]
    async fn upload_with_wrong_credentials_is_unauthorized() {
        let root = TempDir::new().unwrap();
        let server = server(&test_config(root.path()));

        let response = server
            .post("/upload")
            .add_header(header::AUTHORIZATION, basic_auth("admin", "guess"))
            .multipart(
                MultipartForm::new()
                    .add_part("file", Part::bytes(b"data".to_vec()).file_name("a.txt")),
            )
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
        assert!(stored_files(root.path()).is_empty());
    }

    #[tokio::test]
    async fn upload_with_wrong_method_is_rejected_before_auth() {
        let root = TempDir::new().unwrap();
        let server = server(&test_config(root.path()));

        let response = server.get("/upload").await;

        response.assert_status(StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.header(header::ALLOW), "POST");
        assert_eq!(response.text(), "Method not allowed");
        assert!(stored_files(root.path()).is_empty());
    }

    #[tokio::test]
    async fn upload_without_file_field_is_bad_request() {
        let root = TempDir::new().unwrap();
        let server = server(&test_config(root.path()));

        let response = server
            .post("/upload")
            .add_header(header::AUTHORIZATION, basic_auth("admin", "s3cret"))
            .multipart(MultipartForm::new().add_text("other", "value"))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.text(), "Bad Request: Missing file");

        // A `file` field that is plain text, not a file part, does not count.
        let response = server
            .post("/upload")
            .add_header(header::AUTHORIZATION, basic_auth("admin", "s3cret"))
            .multipart(MultipartForm::new().add_text("file", "value"))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);

        assert!(stored_files(root.path()).is_empty());
    }

    #[tokio::test]
    async fn upload_with_non_multipart_body_is_bad_request() {
        let root = TempDir::new().unwrap();
        let server = server(&test_config(root.path()));

        let response = server
            .post("/upload")
            .add_header(header::AUTHORIZATION, basic_auth("admin", "s3cret"))
            .text("just text")
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_upload_is_bad_request_and_leaves_nothing() {
        let root = TempDir::new().unwrap();
        let cfg = AppConfig {
            max_upload_bytes: 1024,
            ..test_config(root.path())
        };
        let server = server(&cfg);

        let response = upload(&server, "big.bin", &vec![7u8; 64 * 1024]).await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(stored_files(root.path()).is_empty());
    }

    #[tokio::test]
    async fn download_of_unknown_file_is_not_found() {
        let root = TempDir::new().unwrap();
        let server = server(&test_config(root.path()));

        let response = server
            .get(&format!("/files/2024/03/05/{}.png", Uuid::new_v4()))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.text(), "Not Found");

        let response = server.get("/files/2024/03/05").await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn download_cannot_escape_upload_root() {
        let root = TempDir::new().unwrap();
        let uploads = root.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        std::fs::write(root.path().join("secret.txt"), b"secret").unwrap();
        let server = server(&test_config(&uploads));

        let response = server.get("/files/%2E%2E/x/y/secret.txt").await;
        response.assert_status(StatusCode::NOT_FOUND);

        let response = server.get("/files/a/b/c/..%2F..%2F..%2Fsecret.txt").await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn download_honours_byte_ranges() {
        let root = TempDir::new().unwrap();
        let server = server(&test_config(root.path()));
        let url = upload(&server, "digits.txt", b"0123456789").await.text();

        let response = server
            .get(&format!("/{}", url))
            .add_header(header::RANGE, "bytes=2-5")
            .await;

        response.assert_status(StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.text(), "2345");
        assert_eq!(
            response.header(header::CACHE_CONTROL),
            "public, max-age=315360000"
        );
    }

    #[tokio::test]
    async fn head_request_returns_headers_without_body() {
        let root = TempDir::new().unwrap();
        let server = server(&test_config(root.path()));
        let url = upload(&server, "photo.png", b"png bytes").await.text();

        let response = server.method(Method::HEAD, &format!("/{}", url)).await;

        response.assert_status(StatusCode::OK);
        assert!(response.as_bytes().is_empty());
        assert_eq!(response.header(header::CONTENT_TYPE), "image/png");
        assert_eq!(
            response.header(header::CACHE_CONTROL),
            "public, max-age=315360000"
        );
        assert!(response.maybe_header(header::CONTENT_DISPOSITION).is_some());
    }

    #[tokio::test]
    async fn conditional_download_is_not_modified() {
        let root = TempDir::new().unwrap();
        let server = server(&test_config(root.path()));
        let url = upload(&server, "notes.txt", b"unchanged").await.text();
        let path = format!("/{}", url);

        let first = server.get(&path).await;
        first.assert_status(StatusCode::OK);
        let last_modified = first.header(header::LAST_MODIFIED);

        let response = server
            .get(&path)
            .add_header(header::IF_MODIFIED_SINCE, last_modified)
            .await;

        response.assert_status(StatusCode::NOT_MODIFIED);
        assert!(response.as_bytes().is_empty());
        assert_eq!(
            response.header(header::CACHE_CONTROL),
            "public, max-age=315360000"
        );
    }

    #[tokio::test]
    async fn download_with_unreadable_path_is_not_found() {
        let root = TempDir::new().unwrap();
        // A regular file where the day directory should be makes stat fail
        // with something other than NotFound.
        std::fs::create_dir_all(root.path().join("2024/03")).unwrap();
        std::fs::write(root.path().join("2024/03/05"), b"x").unwrap();
        let server = server(&test_config(root.path()));

        let response = server.get("/files/2024/03/05/x.png").await;

        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.text(), "Not Found");
    }

    #[tokio::test]
    async fn stalled_upload_times_out_and_leaves_nothing() {
        let root = TempDir::new().unwrap();
        let cfg = AppConfig {
            request_timeout_secs: 1,
            ..test_config(root.path())
        };

        let head = concat!(
            "--XBOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"file\"; filename=\"slow.bin\"\r\n",
            "Content-Type: application/octet-stream\r\n",
            "\r\n",
            "partial content",
        );
        let body = stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(
            head.as_bytes(),
        ))])
        .chain(stream::pending());
        let request = Request::post("/upload")
            .header(header::AUTHORIZATION, basic_auth("admin", "s3cret"))
            .header(
                header::CONTENT_TYPE,
                "multipart/form-data; boundary=XBOUNDARY",
            )
            .body(Body::from_stream(body))
            .unwrap();

        let response = app(&cfg).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert!(stored_files(root.path()).is_empty());
        // The date directory was created before the body stalled.
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn multi_segment_access_prefix_round_trip() {
        let root = TempDir::new().unwrap();
        let cfg = AppConfig {
            access_prefix: "static/files".into(),
            ..test_config(root.path())
        };
        let server = server(&cfg);

        let url = upload(&server, "notes.txt", b"hi").await.text();
        assert_public_url(&url, "static/files", ".txt");

        let download = server.get(&format!("/{}", url)).await;
        download.assert_status(StatusCode::OK);
        assert_eq!(download.text(), "hi");
    }

    #[tokio::test]
    async fn health_endpoints_report_disk_state() {
        let root = TempDir::new().unwrap();
        let server = server(&test_config(root.path()));
        server.get("/healthz").await.assert_status(StatusCode::OK);
        server.get("/readyz").await.assert_status(StatusCode::OK);
        assert!(stored_files(root.path()).is_empty());

        let missing = server_for_missing_root(root.path());
        missing
            .get("/readyz")
            .await
            .assert_status(StatusCode::SERVICE_UNAVAILABLE);
    }

    fn server_for_missing_root(root: &Path) -> TestServer {
        server(&test_config(&root.join("does-not-exist")))
    }
}
