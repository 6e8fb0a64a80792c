use crate::config::AppConfig;
use axum::Router;
use axum::http::{HeaderName, HeaderValue};
use tower_http::set_header::SetResponseHeaderLayer;

pub const ALLOW_ALL_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";

/// Headers stamped on every response the server produces.
#[derive(Debug, Clone, Default)]
pub struct ResponseHeaderTable {
    entries: Vec<(HeaderName, HeaderValue)>,
}

impl ResponseHeaderTable {
    pub fn from_config(config: &AppConfig) -> Self {
        let mut table = Self::cors();
        if config.cross_origin_isolation {
            table.push_static("cross-origin-opener-policy", "same-origin");
            table.push_static("cross-origin-embedder-policy", "require-corp");
            table.push_static("cross-origin-resource-policy", "cross-origin");
        }
        if config.content_security_policy
            && let Ok(value) = HeaderValue::from_str(&content_security_policy(&config.vendor.domain))
        {
            table
                .entries
                .push((HeaderName::from_static("content-security-policy"), value));
        }
        table
    }

    /// The permissive CORS set applied to every route.
    pub fn cors() -> Self {
        let mut table = Self::default();
        table.push_static("access-control-allow-origin", "*");
        table.push_static("access-control-allow-methods", ALLOW_ALL_METHODS);
        table.push_static("access-control-allow-headers", "*");
        table.push_static("access-control-allow-credentials", "true");
        table
    }

    fn push_static(&mut self, name: &'static str, value: &'static str) {
        self.entries.push((
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        ));
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.entries
            .iter()
            .find(|(n, _)| n.as_str().eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wrap `router` so every entry overrides whatever a handler set.
    pub fn apply<S>(&self, mut router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        if self.is_empty() {
            return router;
        }
        for (name, value) in &self.entries {
            router = router.layer(SetResponseHeaderLayer::overriding(
                name.clone(),
                value.clone(),
            ));
        }
        router
    }
}

fn content_security_policy(vendor_domain: &str) -> String {
    let vendor = format!("https://*.{vendor_domain}");
    [
        "default-src 'self'".to_string(),
        format!("script-src 'self' 'unsafe-inline' 'unsafe-eval' {vendor}"),
        format!("connect-src 'self' {vendor}"),
        format!("img-src 'self' data: blob: {vendor}"),
        format!("style-src 'self' 'unsafe-inline' {vendor}"),
        format!("font-src 'self' data: {vendor}"),
        format!("frame-src 'self' {vendor}"),
    ]
    .join("; ")
}
