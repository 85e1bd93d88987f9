//! HTTP handlers for storing and serving uploads.
//! Upload bodies are streamed to disk by `StorageService`; downloads are
//! streamed back through `ServeFile` so ranges and conditional requests work.

use crate::{
    errors::AppError,
    models::storage_key::StorageKey,
    services::storage_service::StorageError,
    state::AppState,
};
use axum::{
    body::Body,
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, error, info, warn};

const FILE_FIELD: &str = "file";
const CACHE_CONTROL_IMMUTABLE: &str = "public, max-age=315360000";

/// `POST /upload` — store the multipart `file` field and return its public URL.
///
/// Credentials are checked before the body is read.
pub async fn upload_file(
    State(state): State<AppState>,
    request: Request,
) -> Result<String, AppError> {
    if let Err(err) = state
        .credentials
        .verify(request.headers().get(header::AUTHORIZATION))
    {
        debug!("rejected upload: {}", err);
        return Err(AppError::unauthorized());
    }

    let mut multipart = Multipart::from_request(request, &state)
        .await
        .map_err(|rejection| {
            debug!("upload is not a multipart form: {}", rejection);
            missing_file()
        })?;

    let field = loop {
        match multipart.next_field().await {
            Ok(Some(field))
                if field.name() == Some(FILE_FIELD)
                    && field.file_name().is_some_and(|name| !name.is_empty()) =>
            {
                break field;
            }
            Ok(Some(_)) => continue,
            Ok(None) => return Err(missing_file()),
            Err(err) => {
                debug!("malformed multipart body: {}", err);
                return Err(missing_file());
            }
        }
    };

    let key = StorageKey::generate(field.file_name().unwrap_or_default());
    let stored = state
        .storage
        .store_stream(&key, field)
        .await
        .map_err(|err| {
            match &err {
                StorageError::Body(cause) => debug!("upload {} aborted: {}", key, cause),
                other => error!("failed to store upload {}: {}", key, other),
            }
            AppError::from(err)
        })?;

    info!(
        key = %key,
        size_bytes = stored.size_bytes,
        path = %stored.path.display(),
        "stored upload"
    );
    Ok(key.public_url(&state.access_prefix))
}

/// Any method other than POST on `/upload`.
pub async fn upload_method_not_allowed() -> impl IntoResponse {
    ([(header::ALLOW, "POST")], AppError::method_not_allowed())
}

/// `GET /{access_prefix}/{year}/{month}/{day}/{filename}` — stream a stored upload.
///
/// No credentials are required; the random file name is the only secret.
pub async fn get_file(
    State(state): State<AppState>,
    Path((year, month, day, filename)): Path<(String, String, String, String)>,
    request: Request,
) -> Result<Response, AppError> {
    let path = match state.storage.locate(&year, &month, &day, &filename).await {
        Ok(path) => path,
        Err(StorageError::Io(err)) => {
            warn!("cannot stat {year}/{month}/{day}/{filename}: {err}");
            return Err(AppError::not_found());
        }
        Err(err) => {
            debug!("download miss: {}", err);
            return Err(err.into());
        }
    };

    let mime = mime_guess::from_path(&filename).first_or_octet_stream();
    let response = ServeFile::new_with_mime(&path, &mime)
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {});

    let mut response = response.map(Body::new);
    if response.status().is_success() || response.status().is_redirection() {
        set_download_headers(response.headers_mut(), &filename);
    }
    Ok(response)
}

fn missing_file() -> AppError {
    AppError::bad_request("Bad Request: Missing file")
}

fn set_download_headers(headers: &mut HeaderMap, filename: &str) {
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(CACHE_CONTROL_IMMUTABLE),
    );

    let disposition = format!(r#"inline; filename="{}""#, quote_filename(filename));
    match HeaderValue::from_str(&disposition) {
        Ok(value) => {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
        Err(_) => debug!("filename {:?} not representable in a header", filename),
    }
}

/// Backslash-escape characters that would end a quoted-string early.
fn quote_filename(filename: &str) -> String {
    let mut quoted = String::with_capacity(filename.len());
    for c in filename.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted
}
