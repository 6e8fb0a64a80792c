use crate::server::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

pub const SDK_CONTENT_TYPE: &str = "application/javascript; charset=utf-8";
const DEFAULT_USER_AGENT: &str = "tkdesigner-edge";
const DEFAULT_ACCEPT_ENCODING: &str = "gzip, deflate, br";
const KNOWN_ENCODINGS: [&str; 5] = ["br", "deflate", "gzip", "identity", "zstd"];
const MAX_CACHED_SCRIPTS: usize = 8;

fn cors_headers() -> [(HeaderName, HeaderValue); 3] {
    [
        (
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ),
        (
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, OPTIONS"),
        ),
        (
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("*"),
        ),
    ]
}

#[derive(Debug, Clone)]
struct CachedScript {
    body: Bytes,
    content_encoding: Option<HeaderValue>,
    fetched_at: Instant,
}

/// Upstream SDK bodies keyed by URL and requested encoding. A zero TTL
/// disables caching.
pub struct SdkCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedScript>>,
}

impl SdkCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn key(url: &str, encoding: &str) -> String {
        format!("{url}|{encoding}")
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn get(&self, key: &str) -> Option<CachedScript> {
        if self.ttl.is_zero() {
            return None;
        }
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .cloned()
    }

    async fn put(&self, key: String, entry: CachedScript) {
        if self.ttl.is_zero() {
            return;
        }
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.fetched_at.elapsed() < self.ttl);
        if entries.len() >= MAX_CACHED_SCRIPTS
            && !entries.contains_key(&key)
            && let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.fetched_at)
                .map(|(k, _)| k.clone())
        {
            entries.remove(&oldest);
        }
        entries.insert(key, entry);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

enum FetchError {
    /// Upstream answered, but not with 200.
    Status(StatusCode, String),
    /// No usable response: connect failure, timeout, unreadable body.
    Unreachable(String),
}

/// Reduce a client `Accept-Encoding` to the known codings it accepts, sorted
/// and deduplicated. Unknown codings and `q=0` entries are dropped; an empty
/// result falls back to the default set.
fn normalize_accept_encoding(raw: Option<&str>) -> String {
    let mut accepted: Vec<&str> = raw
        .unwrap_or_default()
        .split(',')
        .filter_map(|item| {
            let mut parts = item.split(';');
            let coding = parts.next()?.trim();
            let refused = parts.any(|p| {
                p.trim()
                    .strip_prefix("q=")
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .is_some_and(|q| q <= 0.0)
            });
            if refused {
                return None;
            }
            KNOWN_ENCODINGS
                .iter()
                .find(|known| known.eq_ignore_ascii_case(coding))
                .copied()
        })
        .collect();
    accepted.sort_unstable();
    accepted.dedup();
    if accepted.is_empty() {
        DEFAULT_ACCEPT_ENCODING.to_string()
    } else {
        accepted.join(", ")
    }
}

fn header_or<'a>(headers: &'a HeaderMap, name: HeaderName, fallback: &'a str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(fallback)
}

async fn fetch_sdk(
    state: &AppState,
    inbound: &HeaderMap,
    accept_encoding: &str,
) -> Result<CachedScript, FetchError> {
    let url = state.config.sdk_upstream_url.clone();
    let mut request = state
        .http
        .get(url.clone())
        .header(
            header::USER_AGENT,
            header_or(inbound, header::USER_AGENT, DEFAULT_USER_AGENT),
        )
        .header(header::ACCEPT, "*/*")
        .header(header::ACCEPT_ENCODING, accept_encoding);
    for name in [header::ORIGIN, header::REFERER] {
        if let Some(value) = inbound.get(&name) {
            request = request.header(name, value.clone());
        }
    }

    let resp = request.send().await.map_err(|err| {
        FetchError::Unreachable(format!("request to {url} failed: {err}"))
    })?;
    let status = resp.status();
    if status != StatusCode::OK {
        let details = resp.text().await.unwrap_or_default();
        return Err(FetchError::Status(status, details));
    }
    let content_encoding = resp.headers().get(header::CONTENT_ENCODING).cloned();
    let body = resp
        .bytes()
        .await
        .map_err(|err| FetchError::Unreachable(format!("reading SDK body failed: {err}")))?;
    Ok(CachedScript {
        body,
        content_encoding,
        fetched_at: Instant::now(),
    })
}

fn script_response(script: CachedScript) -> Response {
    let mut resp = Response::new(axum::body::Body::from(script.body));
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(SDK_CONTENT_TYPE),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(crate::rewrite::SDK_CACHE_CONTROL),
    );
    if let Some(encoding) = script.content_encoding {
        headers.insert(header::CONTENT_ENCODING, encoding);
    }
    for (name, value) in cors_headers() {
        headers.insert(name, value);
    }
    resp
}

fn error_response(status: StatusCode, error: &str, details: serde_json::Value) -> Response {
    (
        status,
        cors_headers(),
        axum::Json(json!({ "error": error, "details": details })),
    )
        .into_response()
}

/// `GET /api/proxy/sdk`: relay the vendor SDK script with CORS headers.
pub async fn serve_sdk(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let encoding = normalize_accept_encoding(
        headers
            .get(header::ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok()),
    );
    let key = SdkCache::key(state.config.sdk_upstream_url.as_str(), &encoding);
    if let Some(hit) = state.sdk_cache.get(&key).await {
        debug!(bytes = hit.body.len(), "serving SDK from cache");
        return script_response(hit);
    }

    match fetch_sdk(&state, &headers, &encoding).await {
        Ok(script) => {
            info!(bytes = script.body.len(), %encoding, "fetched SDK from upstream");
            state.sdk_cache.put(key, script.clone()).await;
            let entries = state.sdk_cache.len().await;
            debug!(entries, "SDK cache updated");
            script_response(script)
        }
        Err(FetchError::Status(status, details)) => {
            warn!(%status, "SDK upstream returned an error");
            let details = serde_json::from_str(&details).unwrap_or(json!(details));
            error_response(status, "SDK server error", details)
        }
        Err(FetchError::Unreachable(details)) => {
            error!(%details, "SDK proxy error");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to fetch SDK",
                json!(details),
            )
        }
    }
}

/// Pre-flight for the SDK route.
pub async fn preflight() -> impl IntoResponse {
    (StatusCode::NO_CONTENT, cors_headers())
}

pub async fn method_not_allowed() -> Response {
    error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        "Method not allowed",
        serde_json::Value::Null,
    )
}
