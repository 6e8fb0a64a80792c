use crate::bootstrap::BootstrapOptions;
use crate::editor::EditorSettings;
use crate::retry::{Backoff, RetryPolicy};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_SDK_UPSTREAM: &str = "https://sdk.picsart.io/cdn/1.12.4/sdk.js";
pub const LOCAL_SDK_PATH: &str = "/api/proxy/sdk";

/// Runtime configuration for the edge server and the editor bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub sdk_upstream_url: Url,
    pub sdk_cache_ttl: Duration,
    pub upstream_timeout: Duration,
    pub max_body_bytes: usize,
    pub vendor: VendorHosts,
    pub cross_origin_isolation: bool,
    pub content_security_policy: bool,
    pub rewrites_file: Option<PathBuf>,
    /// Static site that answers GETs no local route or rewrite claims.
    pub static_origin: Option<Url>,
    /// Public key handed to the browser editor; absence is fatal for the bootstrap.
    pub api_key: Option<String>,
    pub editor: EditorSettings,
    pub bootstrap: BootstrapSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorHosts {
    pub api: Url,
    pub sdk: Url,
    pub cdn: Url,
    pub auth: Option<Url>,
    /// Registrable domain allow-listed in the CSP.
    pub domain: String,
}

impl Default for VendorHosts {
    fn default() -> Self {
        Self {
            api: Url::parse("https://api.picsart.io").expect("static url"),
            sdk: Url::parse("https://sdk.picsart.io").expect("static url"),
            cdn: Url::parse("https://cdn.picsart.io").expect("static url"),
            auth: None,
            domain: "picsart.io".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapSettings {
    pub retry: RetryPolicy,
    pub load_timeout: Duration,
    pub global_wait: Duration,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            load_timeout: Duration::from_secs(10),
            global_wait: Duration::from_millis(500),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr: SocketAddr = std::env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .context("failed to parse BIND_ADDR")?;

        let sdk_upstream_url = Url::parse(
            &std::env::var("SDK_UPSTREAM_URL").unwrap_or_else(|_| DEFAULT_SDK_UPSTREAM.into()),
        )
        .context("failed to parse SDK_UPSTREAM_URL")?;

        let sdk_cache_ttl = env_secs("SDK_CACHE_TTL_SECS").unwrap_or(Duration::ZERO);
        let upstream_timeout =
            env_millis("UPSTREAM_TIMEOUT_MS").unwrap_or_else(|| Duration::from_secs(10));
        let max_body_bytes = std::env::var("MAX_BODY_BYTES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(25 * 1024 * 1024);

        let defaults = VendorHosts::default();
        let vendor = VendorHosts {
            api: env_url("VENDOR_API_HOST")?.unwrap_or(defaults.api),
            sdk: env_url("VENDOR_SDK_HOST")?.unwrap_or(defaults.sdk),
            cdn: env_url("VENDOR_CDN_HOST")?.unwrap_or(defaults.cdn),
            auth: env_url("VENDOR_AUTH_HOST")?,
            domain: std::env::var("VENDOR_DOMAIN").unwrap_or(defaults.domain),
        };

        let cross_origin_isolation = env_flag("ENABLE_CROSS_ORIGIN_ISOLATION");
        let content_security_policy = env_flag("ENABLE_CSP");
        let rewrites_file = std::env::var("REWRITES_FILE").ok().map(PathBuf::from);
        let static_origin = env_url("STATIC_ORIGIN")?;

        let api_key = std::env::var("PICSART_API_KEY")
            .or_else(|_| std::env::var("NEXT_PUBLIC_PICSART_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());

        let mut editor = EditorSettings::default();
        if let Ok(property_id) = std::env::var("EDITOR_PROPERTY_ID") {
            editor.property_id = property_id;
        }
        editor.container_id = std::env::var("EDITOR_CONTAINER_ID").ok();

        let mut bootstrap = BootstrapSettings::default();
        if let Some(max) = std::env::var("BOOTSTRAP_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
        {
            bootstrap.retry.max_attempts = max;
        }
        if let Some(base) = env_millis("BOOTSTRAP_BASE_DELAY_MS") {
            bootstrap.retry.base_delay = base;
        }
        if let Ok(backoff) = std::env::var("BOOTSTRAP_BACKOFF") {
            bootstrap.retry.backoff = backoff
                .parse::<Backoff>()
                .context("failed to parse BOOTSTRAP_BACKOFF")?;
        }
        if let Some(timeout) = env_millis("BOOTSTRAP_LOAD_TIMEOUT_MS") {
            bootstrap.load_timeout = timeout;
        }
        if let Some(wait) = env_millis("BOOTSTRAP_GLOBAL_WAIT_MS") {
            bootstrap.global_wait = wait;
        }

        Ok(Self {
            bind_addr,
            sdk_upstream_url,
            sdk_cache_ttl,
            upstream_timeout,
            max_body_bytes,
            vendor,
            cross_origin_isolation,
            content_security_policy,
            rewrites_file,
            static_origin,
            api_key,
            editor,
            bootstrap,
        })
    }

    /// Bootstrap options pointing at `sdk_url`, carrying this config's key,
    /// editor template and retry settings.
    pub fn bootstrap_options(&self, sdk_url: impl Into<String>) -> BootstrapOptions {
        let mut opts = BootstrapOptions::new(sdk_url);
        opts.api_key = self.api_key.clone();
        opts.settings = self.editor.clone();
        opts.retry = self.bootstrap.retry;
        opts.load_timeout = self.bootstrap.load_timeout;
        opts.global_wait = self.bootstrap.global_wait;
        opts
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}

fn env_url(name: &str) -> anyhow::Result<Option<Url>> {
    match std::env::var(name) {
        Ok(raw) => Ok(Some(
            Url::parse(&raw).with_context(|| format!("failed to parse {name}"))?,
        )),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
impl AppConfig {
    /// Defaults without consulting the environment.
    pub fn for_tests() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".parse().expect("static addr"),
            sdk_upstream_url: Url::parse(DEFAULT_SDK_UPSTREAM).expect("static url"),
            sdk_cache_ttl: Duration::ZERO,
            upstream_timeout: Duration::from_secs(5),
            max_body_bytes: 1024 * 1024,
            vendor: VendorHosts::default(),
            cross_origin_isolation: false,
            content_security_policy: false,
            rewrites_file: None,
            static_origin: None,
            api_key: Some("test-key".into()),
            editor: EditorSettings::default(),
            bootstrap: BootstrapSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_options_carry_config() {
        let mut cfg = AppConfig::for_tests();
        cfg.bootstrap.retry.max_attempts = 5;
        cfg.bootstrap.global_wait = Duration::from_millis(20);
        cfg.editor.container_id = Some("root".into());
        let opts = cfg.bootstrap_options("http://localhost:8080/api/proxy/sdk");
        assert_eq!(opts.sdk_url, "http://localhost:8080/api/proxy/sdk");
        assert_eq!(opts.api_key.as_deref(), Some("test-key"));
        assert_eq!(opts.retry.max_attempts, 5);
        assert_eq!(opts.global_wait, Duration::from_millis(20));
        assert_eq!(opts.settings.container_id.as_deref(), Some("root"));
    }

    #[test]
    fn vendor_defaults_point_at_picsart() {
        let hosts = VendorHosts::default();
        assert_eq!(hosts.api.host_str(), Some("api.picsart.io"));
        assert_eq!(hosts.sdk.host_str(), Some("sdk.picsart.io"));
        assert_eq!(hosts.cdn.host_str(), Some("cdn.picsart.io"));
        assert!(hosts.auth.is_none());
    }
}
