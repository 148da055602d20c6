/*!
 * HTTP surface
 *
 * Routes:
 * - `GET  /api/files[?path=sub]`            download listing
 * - `POST /api/download/bulk`               ZIP of a selection
 * - `GET  /api/download/presentation?file=` ZIP of a presentation and its assets
 * - `GET  /api/download/check`              rate limit check
 * - `POST /api/download/record`             count a completed download
 * - `POST /api/track`                       analytics event
 * - `GET  /api/stats`                       analytics aggregate
 * - `GET  /files/<path..>`                  raw public files
 */

mod handlers;
mod reply;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::json;
use tracing::info;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::analytics::{Analytics, InMemoryAnalytics};
use crate::config::Config;
use crate::error::Result;
use crate::ignore_rules::IgnoreMatcher;
use crate::limiter::{InMemoryRateLimiter, RateLimiter};
use crate::utils::client_key;

pub use handlers::{BulkRequest, DownloadRecordRequest, TrackRequest};
pub use reply::LONG_CACHE;

/// Largest JSON body accepted
const MAX_BODY_BYTES: u64 = 8 * 1024 * 1024;

/// Everything a request handler needs, shared across requests
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Loaded once at startup and never modified
    pub matcher: Arc<IgnoreMatcher>,
    pub limiter: Arc<dyn RateLimiter>,
    pub analytics: Arc<dyn Analytics>,
}

impl AppState {
    /// State with explicit collaborators
    pub fn new(
        config: Config,
        limiter: Arc<dyn RateLimiter>,
        analytics: Arc<dyn Analytics>,
    ) -> Self {
        let matcher = IgnoreMatcher::load(&config.ignore_file, &config.downloads_dir);
        info!(
            rules = matcher.len(),
            file = %config.ignore_file.display(),
            "ignore rules loaded"
        );
        Self {
            config: Arc::new(config),
            matcher: Arc::new(matcher),
            limiter,
            analytics,
        }
    }

    /// State backed by the in-memory limiter and analytics
    pub fn from_config(config: Config) -> Self {
        let limiter = Arc::new(InMemoryRateLimiter::new(
            config.rate_limit,
            config.rate_window,
        ));
        Self::new(config, limiter, Arc::new(InMemoryAnalytics::new()))
    }
}

fn with_state(
    state: AppState,
) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn client() -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::header::optional::<String>("x-forwarded-for")
        .and(warp::addr::remote())
        .map(|forwarded: Option<String>, remote: Option<SocketAddr>| {
            client_key(forwarded.as_deref(), remote)
        })
}

fn json_body() -> impl Filter<Extract = (warp::hyper::body::Bytes,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::bytes())
}

/// All routes with JSON/plain-text rejection handling
pub fn routes(
    state: AppState,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let list_files = warp::path!("api" / "files")
        .and(warp::get())
        .and(warp::query::<handlers::ListQuery>())
        .and(with_state(state.clone()))
        .and_then(handlers::list_files);

    let bulk = warp::path!("api" / "download" / "bulk")
        .and(warp::post())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::bulk_download);

    let presentation = warp::path!("api" / "download" / "presentation")
        .and(warp::get())
        .and(warp::query::<handlers::PresentationQuery>())
        .and(with_state(state.clone()))
        .and_then(handlers::presentation_download);

    let check = warp::path!("api" / "download" / "check")
        .and(warp::get())
        .and(client())
        .and(with_state(state.clone()))
        .and_then(handlers::download_check);

    let record = warp::path!("api" / "download" / "record")
        .and(warp::post())
        .and(client())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::download_record);

    let track = warp::path!("api" / "track")
        .and(warp::post())
        .and(client())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::track_event);

    let stats = warp::path!("api" / "stats")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::stats);

    let files = warp::path("files")
        .and(warp::path::tail())
        .and(warp::get())
        .and(with_state(state))
        .and_then(handlers::serve_file);

    list_files
        .or(bulk)
        .or(presentation)
        .or(check)
        .or(record)
        .or(track)
        .or(stats)
        .or(files)
        .recover(handle_rejection)
        .with(warp::trace::request())
}

async fn handle_rejection(rejection: Rejection) -> std::result::Result<warp::reply::Response, Infallible> {
    let status = if rejection.is_not_found() {
        StatusCode::NOT_FOUND
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        StatusCode::PAYLOAD_TOO_LARGE
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        StatusCode::METHOD_NOT_ALLOWED
    } else if rejection.find::<warp::reject::InvalidQuery>().is_some()
        || rejection.find::<warp::reject::LengthRequired>().is_some()
    {
        StatusCode::BAD_REQUEST
    } else {
        tracing::error!(?rejection, "unhandled rejection");
        StatusCode::INTERNAL_SERVER_ERROR
    };

    let message = status.canonical_reason().unwrap_or("Error");
    Ok(reply::json_status(&json!({ "error": message }), status))
}

/// Serve until Ctrl-C
pub async fn serve(state: AppState) -> Result<()> {
    let addr = state.config.socket_addr()?;
    let (bound, server) = warp::serve(routes(state))
        .try_bind_with_graceful_shutdown(addr, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "cannot listen for shutdown signal");
            }
        })
        .map_err(|e| crate::error!(Config, "Cannot bind {}: {}", addr, e))?;

    info!(addr = %bound, "listening");
    server.await;
    info!("shut down");
    Ok(())
}
