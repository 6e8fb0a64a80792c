use crate::config::VendorHosts;
use crate::server::AppState;
use anyhow::Context;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

const PATH_WILDCARD: &str = ":path*";
pub const SDK_CACHE_CONTROL: &str = "public, max-age=3600";

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("source `{0}` must look like `/prefix/:path*`")]
    Source(String),
    #[error("destination `{0}` must be an absolute URL ending in `/:path*`")]
    Destination(String),
}

/// One `source -> destination` entry, written in the `/api/:path*` form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteSpec {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub cache_control: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RewriteRule {
    prefix: String,
    base: Url,
    cache_control: Option<HeaderValue>,
}

impl RewriteRule {
    pub fn parse(spec: &RewriteSpec) -> Result<Self, RewriteError> {
        let prefix = spec
            .source
            .strip_suffix(PATH_WILDCARD)
            .filter(|p| p.starts_with('/') && p.ends_with('/') && p.len() > 1)
            .ok_or_else(|| RewriteError::Source(spec.source.clone()))?;
        let base = spec
            .destination
            .strip_suffix(PATH_WILDCARD)
            .filter(|d| d.ends_with('/'))
            .and_then(|d| Url::parse(d).ok())
            .filter(|u| u.has_host())
            .ok_or_else(|| RewriteError::Destination(spec.destination.clone()))?;
        let cache_control = match &spec.cache_control {
            Some(v) => Some(
                HeaderValue::from_str(v)
                    .map_err(|_| RewriteError::Destination(spec.destination.clone()))?,
            ),
            None => None,
        };
        Ok(Self {
            prefix: prefix.to_string(),
            base,
            cache_control,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `:path*` also matches zero segments, so `/api` maps to the base itself.
    fn target(&self, path: &str, query: Option<&str>) -> Option<Url> {
        let rest = if path == self.prefix.trim_end_matches('/') {
            ""
        } else {
            path.strip_prefix(&self.prefix)?.trim_start_matches('/')
        };
        // `./` keeps a colon in the first segment from reading as a scheme.
        let mut url = self.base.join(&format!("./{rest}")).ok()?;
        // The remainder must never move the request off the vendor host
        // or above the destination path.
        if url.origin() != self.base.origin() || !url.path().starts_with(self.base.path()) {
            return None;
        }
        url.set_query(query);
        Some(url)
    }
}

/// Prefix table consulted for every path without a local route.
#[derive(Debug, Clone, Default)]
pub struct RewriteTable {
    rules: Vec<RewriteRule>,
}

#[derive(Debug, Deserialize)]
struct RewriteFile {
    #[serde(default)]
    rewrites: Vec<RewriteSpec>,
}

impl RewriteTable {
    pub fn from_specs(specs: &[RewriteSpec]) -> Result<Self, RewriteError> {
        let rules = specs
            .iter()
            .map(RewriteRule::parse)
            .collect::<Result<_, _>>()?;
        Ok(Self { rules })
    }

    /// `/api`, `/sdk`, `/cdn` and, when configured, `/auth`.
    pub fn defaults(vendor: &VendorHosts) -> Self {
        let mut specs = vec![
            spec("/api/", &vendor.api, None),
            spec("/sdk/", &vendor.sdk, Some(SDK_CACHE_CONTROL)),
            spec("/cdn/", &vendor.cdn, None),
        ];
        if let Some(auth) = &vendor.auth {
            specs.push(spec("/auth/", auth, None));
        }
        let rules = specs
            .iter()
            .filter_map(|s| match RewriteRule::parse(s) {
                Ok(rule) => Some(rule),
                Err(err) => {
                    warn!(%err, "skipping vendor rewrite");
                    None
                }
            })
            .collect();
        Self { rules }
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let file: RewriteFile = toml::from_str(raw).context("parsing rewrite table")?;
        Ok(Self::from_specs(&file.rewrites)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading rewrite table {:?}", path))?;
        Self::from_toml(&raw)
    }

    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    /// First matching rule and the outbound URL for `path`.
    pub fn resolve(&self, path: &str, query: Option<&str>) -> Option<(&RewriteRule, Url)> {
        self.rules
            .iter()
            .find_map(|rule| rule.target(path, query).map(|url| (rule, url)))
    }
}

fn spec(prefix: &str, host: &Url, cache_control: Option<&str>) -> RewriteSpec {
    let host = host.as_str().trim_end_matches('/');
    RewriteSpec {
        source: format!("{prefix}{PATH_WILDCARD}"),
        destination: format!("{host}/{PATH_WILDCARD}"),
        cache_control: cache_control.map(str::to_string),
    }
}

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Inbound headers minus hop-by-hop and `Host`, plus the `X-Forwarded-*` set.
fn outbound_headers(inbound: &HeaderMap, client: Option<SocketAddr>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound {
        if is_hop_by_hop(name) || name == header::HOST || name == header::CONTENT_LENGTH {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let peer = client.map(|addr| addr.ip().to_string());
    let real_ip = header_str(inbound, "x-real-ip")
        .or_else(|| header_str(inbound, "x-forwarded-for"))
        .map(str::to_string)
        .or(peer)
        .unwrap_or_default();
    let forwarded_for = header_str(inbound, "x-forwarded-for")
        .map(str::to_string)
        .unwrap_or_else(|| real_ip.clone());
    let proto = header_str(inbound, "x-forwarded-proto").unwrap_or("https");
    let host = header_str(inbound, "x-forwarded-host")
        .or_else(|| header_str(inbound, "host"))
        .unwrap_or_default();

    for (name, value) in [
        ("x-real-ip", real_ip.as_str()),
        ("x-forwarded-for", forwarded_for.as_str()),
        ("x-forwarded-proto", proto),
        ("x-forwarded-host", host),
    ] {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
    headers
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

fn json_error(status: StatusCode, error: &str, details: impl Into<serde_json::Value>) -> Response {
    (
        status,
        axum::Json(json!({ "error": error, "details": details.into() })),
    )
        .into_response()
}

/// Fallback handler: relay the request to the vendor host its prefix maps to.
pub async fn forward(State(state): State<AppState>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let Some((rule, target)) = state.rewrites.resolve(&path, query.as_deref()) else {
        if req.method() == Method::GET
            && let Some(origin) = &state.config.static_origin
        {
            return serve_static(&state, origin, &path, query.as_deref()).await;
        }
        return json_error(StatusCode::NOT_FOUND, "Not found", path);
    };
    if req.method() == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    let cache_control = rule.cache_control.clone();

    let client_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let method = req.method().clone();
    let headers = outbound_headers(req.headers(), client_addr);
    let body = match axum::body::to_bytes(req.into_body(), state.config.max_body_bytes).await {
        Ok(body) => body,
        Err(err) => {
            return json_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body rejected",
                err.to_string(),
            );
        }
    };

    debug!(%method, %path, %target, "forwarding to vendor");
    let mut outbound = state.http.request(method.clone(), target.clone()).headers(headers);
    if !body.is_empty() {
        outbound = outbound.body(body);
    }
    let upstream = match outbound.send().await {
        Ok(resp) => resp,
        Err(err) => {
            warn!(%method, %target, ?err, "vendor request failed");
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to proxy API request",
                err.to_string(),
            );
        }
    };

    relay(upstream, cache_control)
}

/// Status, end-to-end headers and a streamed body from `upstream`.
fn relay(upstream: reqwest::Response, cache_control: Option<HeaderValue>) -> Response {
    let status = upstream.status();
    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if !is_hop_by_hop(name) {
            response_headers.append(name.clone(), value.clone());
        }
    }
    if let Some(cache_control) = cache_control {
        response_headers.insert(header::CACHE_CONTROL, cache_control);
    }
    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

/// Relay a GET to the static site; `/` is served as `/index.html`.
async fn serve_static(
    state: &AppState,
    origin: &Url,
    path: &str,
    query: Option<&str>,
) -> Response {
    let file = if path == "/" { "index.html" } else { path.trim_start_matches('/') };
    let target = origin
        .join(&format!("./{file}"))
        .ok()
        .filter(|url| url.origin() == origin.origin());
    let Some(mut target) = target else {
        return json_error(StatusCode::NOT_FOUND, "Not found", path);
    };
    target.set_query(query);

    debug!(%path, %target, "serving from static origin");
    match state.http.get(target.clone()).send().await {
        Ok(upstream) => relay(upstream, None),
        Err(err) => {
            warn!(%target, ?err, "static origin unreachable");
            json_error(StatusCode::NOT_FOUND, "Not found", path)
        }
    }
}
