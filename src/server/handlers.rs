//! Request handlers
//!
//! Handlers never reject: every outcome, errors included, is turned into a
//! response here so clients always get a JSON `{ "error": ... }` body (plain
//! text for raw files).

use std::convert::Infallible;
use std::path::Path;
use std::str::FromStr;

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::path::Tail;
use warp::reply::Response;

use super::reply::{file_bytes, json_error, json_status, plain_status, zip_attachment};
use super::AppState;
use crate::analytics::{EventType, TrackedEvent};
use crate::archive::{build_archive, bulk_archive_name, bundle_presentation, presentation_archive_name};
use crate::error::{EduDropError, Result};
use crate::ignore_rules::IgnoreMatcher;
use crate::limiter::RateDecision;
use crate::paths::{content_type_for, decode_segments, resolve_within, validate_presentation_name};
use crate::scanner::{ScanSummary, Scanner};
use crate::types::{validate_relative_path, DownloadableItem};
use crate::utils::format_file_size;
use crate::{bail, ensure};

type Reply = std::result::Result<Response, Infallible>;

/// `?path=` for the listing endpoint
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub path: Option<String>,
}

/// `?file=` for the presentation endpoint
#[derive(Debug, Deserialize)]
pub struct PresentationQuery {
    pub file: Option<String>,
}

#[derive(Serialize)]
struct ListResponse {
    files: Vec<DownloadableItem>,
    summary: ScanSummary,
}

/// Body of a bulk archive request
#[derive(Debug, Deserialize, Serialize)]
pub struct BulkRequest {
    pub files: Vec<DownloadableItem>,
}

/// Body of a download record request
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRecordRequest {
    pub file_count: usize,
    pub total_size: u64,
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Body of an analytics event
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRequest {
    pub event_type: String,
    pub resource: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Run blocking filesystem work off the async executor
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| crate::error!(Unexpected, "Background task failed: {}", e))?
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: &Bytes) -> Result<T> {
    Ok(serde_json::from_slice(body)?)
}

pub async fn list_files(query: ListQuery, state: AppState) -> Reply {
    let downloads = state.config.downloads_dir.clone();

    let root = match query.path.as_deref().map(|p| p.trim_matches('/')) {
        Some(sub) if !sub.is_empty() => match resolve_listing_root(&state, &downloads, sub) {
            Ok(root) => root,
            Err(e) => return Ok(json_error(&e)),
        },
        _ => downloads.clone(),
    };

    let scanner = Scanner::new(state.matcher.clone())
        .with_project_root(downloads.clone())
        .with_max_depth(state.config.max_depth);

    match blocking(move || scanner.scan_directory(&root, &downloads, 0)).await {
        Ok((files, summary)) => Ok(json_status(
            &ListResponse { files, summary },
            StatusCode::OK,
        )),
        Err(e) => Ok(json_error(&e)),
    }
}

fn resolve_listing_root(state: &AppState, downloads: &Path, sub: &str) -> Result<std::path::PathBuf> {
    validate_relative_path(sub)?;
    ensure!(
        !state.matcher.is_ignored(Path::new(sub), true),
        NotFound,
        "Directory not found"
    );
    let root = resolve_within(downloads, sub)?;
    ensure!(root.is_dir(), InvalidInput, "Not a directory: {}", sub);
    Ok(root)
}

pub async fn bulk_download(body: Bytes, state: AppState) -> Reply {
    let request: BulkRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(e) => return Ok(json_error(&e)),
    };

    let matcher = state.matcher.clone();
    let downloads = state.config.downloads_dir.clone();
    let built = blocking(move || {
        check_selection(&matcher, &downloads, &request.files)?;
        build_archive(&request.files, &downloads)
    })
    .await;

    match built {
        Ok(bytes) => Ok(zip_attachment(bytes, &bulk_archive_name(&Local::now()))),
        Err(e) => Ok(json_error(&e)),
    }
}

/// Shape check plus a guard against selections naming ignored paths or the
/// rules file itself
fn check_selection(matcher: &IgnoreMatcher, downloads: &Path, items: &[DownloadableItem]) -> Result<()> {
    for item in items {
        item.validate()?;
        for file in item.selected_files() {
            if matcher.is_ignored(Path::new(&file.path), false) {
                bail!(Forbidden, "File is not available for download: {}", file.path);
            }
            let is_rules_file = matcher.source().is_some_and(|source| {
                resolve_within(downloads, &file.path).is_ok_and(|resolved| resolved == source)
            });
            if is_rules_file {
                bail!(Forbidden, "File is not available for download: {}", file.path);
            }
        }
    }
    Ok(())
}

pub async fn presentation_download(query: PresentationQuery, state: AppState) -> Reply {
    let Some(file) = query.file else {
        return Ok(json_error(&crate::error!(
            InvalidInput,
            "Missing 'file' parameter"
        )));
    };
    if let Err(e) = validate_presentation_name(&file) {
        return Ok(json_error(&e));
    }

    let dir = state.config.presentations_dir.clone();
    let name = file.clone();
    match blocking(move || bundle_presentation(&dir, &name)).await {
        Ok(bytes) => Ok(zip_attachment(bytes, &presentation_archive_name(&file))),
        Err(e) => Ok(json_error(&e)),
    }
}

pub async fn serve_file(tail: Tail, state: AppState) -> Reply {
    let raw: Vec<&str> = tail.as_str().split('/').collect();
    let segments = match decode_segments(&raw) {
        Ok(segments) => segments,
        Err(EduDropError::Forbidden(_)) => {
            warn!(path = %tail.as_str(), "rejected traversal attempt");
            return Ok(plain_status(StatusCode::FORBIDDEN));
        }
        Err(_) => return Ok(plain_status(StatusCode::BAD_REQUEST)),
    };

    let relative = segments.join("/");
    let public = state.config.public_dir.clone();
    let read = blocking(move || {
        let path = resolve_within(&public, &relative)?;
        ensure!(path.is_file(), NotFound, "File not found");
        let bytes = std::fs::read(&path)?;
        Ok((bytes, content_type_for(&path)))
    })
    .await;

    match read {
        Ok((bytes, content_type)) => Ok(file_bytes(bytes, content_type)),
        Err(EduDropError::Forbidden(_)) => {
            warn!(path = %tail.as_str(), "rejected path outside public directory");
            Ok(plain_status(StatusCode::FORBIDDEN))
        }
        Err(EduDropError::NotFound(_)) => Ok(plain_status(StatusCode::NOT_FOUND)),
        Err(e) => {
            tracing::error!(path = %tail.as_str(), error = %e, "cannot serve file");
            Ok(plain_status(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

/// Current decision for `client`, falling back to "allowed" when the limiter is down
async fn decide(state: &AppState, client: &str) -> RateDecision {
    match state.limiter.can_proceed(client).await {
        Ok(decision) => decision,
        Err(e) => {
            warn!(client = %client, error = %e, "rate limiter unavailable, allowing download");
            RateDecision {
                allowed: true,
                remaining: state.limiter.limit(),
            }
        }
    }
}

fn rate_limited() -> Response {
    json_status(
        &json!({
            "allowed": false,
            "reason": "rate_limit_exceeded",
            "message": "Download limit reached. Please try again later.",
        }),
        StatusCode::TOO_MANY_REQUESTS,
    )
}

pub async fn download_check(client: String, state: AppState) -> Reply {
    let decision = decide(&state, &client).await;
    if !decision.allowed {
        debug!(client = %client, "download refused");
        return Ok(rate_limited());
    }

    Ok(json_status(
        &json!({
            "allowed": true,
            "remaining": decision.remaining,
            "message": format!("You have {} downloads remaining", decision.remaining),
        }),
        StatusCode::OK,
    ))
}

fn validate_record(record: &DownloadRecordRequest) -> Result<()> {
    ensure!(record.file_count > 0, InvalidInput, "fileCount must be at least 1");
    ensure!(
        record.paths.is_empty() || record.paths.len() == record.file_count,
        InvalidInput,
        "fileCount does not match the number of paths"
    );
    for path in &record.paths {
        validate_relative_path(path)?;
    }
    Ok(())
}

pub async fn download_record(client: String, body: Bytes, state: AppState) -> Reply {
    let record: DownloadRecordRequest = match parse_body(&body) {
        Ok(record) => record,
        Err(e) => return Ok(json_error(&e)),
    };
    if let Err(e) = validate_record(&record) {
        return Ok(json_error(&e));
    }

    let remaining = match state.limiter.consume(&client).await {
        Ok(decision) if !decision.allowed => return Ok(rate_limited()),
        Ok(decision) => decision.remaining,
        Err(e) => {
            warn!(client = %client, error = %e, "rate limiter unavailable, download not counted");
            state.limiter.limit().saturating_sub(1)
        }
    };

    let resource = match record.paths.as_slice() {
        [single] => single.clone(),
        _ => "bulk".to_string(),
    };
    let event = TrackedEvent::new(
        EventType::Download,
        resource,
        client.as_str(),
        json!({
            "fileCount": record.file_count,
            "totalSize": record.total_size,
            "paths": record.paths,
        }),
    );
    if let Err(e) = state.analytics.track(event).await {
        warn!(client = %client, error = %e, "cannot track download event");
    }

    info!(
        client = %client,
        files = record.file_count,
        size = %format_file_size(record.total_size),
        "download recorded"
    );
    Ok(json_status(
        &json!({
            "success": true,
            "remaining": remaining,
        }),
        StatusCode::OK,
    ))
}

pub async fn track_event(client: String, body: Bytes, state: AppState) -> Reply {
    let request: TrackRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(e) => return Ok(json_error(&e)),
    };

    let Ok(event_type) = EventType::from_str(&request.event_type) else {
        let allowed = EventType::allowed();
        return Ok(json_status(
            &json!({
                "error": format!("Invalid eventType. Must be one of: {}", allowed.join(", ")),
                "allowedEventTypes": allowed,
            }),
            StatusCode::BAD_REQUEST,
        ));
    };

    if request.resource.trim().is_empty() {
        return Ok(json_error(&crate::error!(InvalidInput, "resource is required")));
    }
    if !(request.metadata.is_null() || request.metadata.is_object()) {
        return Ok(json_error(&crate::error!(
            InvalidInput,
            "metadata must be a JSON object"
        )));
    }

    let event = TrackedEvent::new(event_type, request.resource, client.as_str(), request.metadata);
    if let Err(e) = state.analytics.track(event).await {
        warn!(client = %client, error = %e, "cannot track event");
    }

    Ok(json_status(&json!({ "success": true }), StatusCode::OK))
}

pub async fn stats(state: AppState) -> Reply {
    match state.analytics.stats().await {
        Ok(stats) => Ok(json_status(&stats, StatusCode::OK)),
        Err(e) => Ok(json_error(&EduDropError::Backend(e.to_string()))),
    }
}
